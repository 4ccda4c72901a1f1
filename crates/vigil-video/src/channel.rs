//! Channel link parsing

/// Extract the numeric channel identifier from a channel link href.
/// Accepts any path containing a `channel/<digits>` pair of segments.
pub fn channel_id_from_href(href: &str) -> Option<String> {
    let mut segments = href.split(['/', '?', '#']);
    while let Some(segment) = segments.next() {
        if segment == "channel" {
            let id = segments.next()?;
            if !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()) {
                return Some(id.to_string());
            }
            return None;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_numeric_id() {
        assert_eq!(channel_id_from_href("/channel/12345"), Some("12345".into()));
        assert_eq!(
            channel_id_from_href("https://host/channel/987/videos"),
            Some("987".into())
        );
        assert_eq!(
            channel_id_from_href("/channel/42?tab=uploads"),
            Some("42".into())
        );
    }

    #[test]
    fn test_rejects_non_numeric() {
        assert_eq!(channel_id_from_href("/channel/handle-name"), None);
        assert_eq!(channel_id_from_href("/channel/"), None);
        assert_eq!(channel_id_from_href("/user/12345"), None);
        assert_eq!(channel_id_from_href(""), None);
    }
}
