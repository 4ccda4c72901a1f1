//! Identifier extraction
//!
//! The two independent strategies for reading the current identity out of
//! the host page: the in-page initial-state object the platform embeds, and
//! the address string. Both are pure; parse failures are traced and yield
//! nothing rather than propagating.

use serde_json::Value;
use url::Url;

use crate::{PageType, VideoId};

/// Read the identifier from the in-page initial-state object
pub fn id_from_state(state: &Value) -> Option<VideoId> {
    let raw = state.get("video")?.get("id")?.as_str()?;
    let id = VideoId::new(raw);
    if id.is_none() {
        tracing::warn!(raw, "initial-state object carries a malformed identifier");
    }
    id
}

/// Live/premiere flag from the in-page initial-state object
pub fn live_premiere_from_state(state: &Value) -> bool {
    let flag = |key: &str| {
        state
            .get("video")
            .and_then(|v| v.get(key))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    };
    flag("isLive") || flag("isPremiere")
}

/// Parse the identifier out of an address string
pub fn id_from_address(address: &str) -> Option<VideoId> {
    let url = match Url::parse(address) {
        Ok(url) => url,
        Err(err) => {
            tracing::warn!(%err, address, "unparseable address");
            return None;
        }
    };
    let path: Vec<&str> = url.path_segments()?.collect();
    id_from_path(&path)
}

/// Parse the identifier out of a link href, absolute or page-relative
pub fn id_from_href(href: &str) -> Option<VideoId> {
    if let Ok(url) = Url::parse(href) {
        let path: Vec<&str> = url.path_segments()?.collect();
        return id_from_path(&path);
    }
    let trimmed = href.split(['?', '#']).next().unwrap_or("");
    let path: Vec<&str> = trimmed.trim_start_matches('/').split('/').collect();
    id_from_path(&path)
}

fn id_from_path(segments: &[&str]) -> Option<VideoId> {
    match segments {
        [kind, id, ..] if matches!(*kind, "video" | "embed" | "live") => VideoId::new(id),
        _ => None,
    }
}

/// Classify the page from its address
pub fn page_type_from_address(address: &str) -> PageType {
    let Ok(url) = Url::parse(address) else {
        return PageType::Unknown;
    };
    let first = url
        .path_segments()
        .and_then(|mut segments| segments.next())
        .unwrap_or("");
    match first {
        "" => PageType::Home,
        "video" => PageType::Video,
        "embed" => PageType::Embed,
        "live" => PageType::Live,
        "channel" => PageType::Channel,
        "results" => PageType::Search,
        _ => PageType::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_id_from_address() {
        let id = id_from_address("https://host/video/AB12345678CD").unwrap();
        assert_eq!(id.as_str(), "AB12345678CD");

        let id = id_from_address("https://host/embed/AB12345678CD?autoplay=1").unwrap();
        assert_eq!(id.as_str(), "AB12345678CD");

        assert!(id_from_address("https://host/about").is_none());
        assert!(id_from_address("https://host/").is_none());
        assert!(id_from_address("https://host/video/short").is_none());
        assert!(id_from_address("not an address").is_none());
    }

    #[test]
    fn test_id_from_href() {
        let id = id_from_href("/video/AB12345678CD").unwrap();
        assert_eq!(id.as_str(), "AB12345678CD");

        let id = id_from_href("https://host/video/AB12345678CD").unwrap();
        assert_eq!(id.as_str(), "AB12345678CD");

        let id = id_from_href("/video/AB12345678CD?t=42").unwrap();
        assert_eq!(id.as_str(), "AB12345678CD");

        assert!(id_from_href("/channel/123").is_none());
        assert!(id_from_href("").is_none());
    }

    #[test]
    fn test_id_from_state() {
        let state = json!({ "video": { "id": "AB12345678CD" } });
        assert_eq!(id_from_state(&state).unwrap().as_str(), "AB12345678CD");

        assert!(id_from_state(&json!({})).is_none());
        assert!(id_from_state(&json!({ "video": { "id": "nope" } })).is_none());
        assert!(id_from_state(&json!({ "video": { "id": 7 } })).is_none());
    }

    #[test]
    fn test_live_premiere_from_state() {
        assert!(live_premiere_from_state(&json!({ "video": { "isLive": true } })));
        assert!(live_premiere_from_state(&json!({ "video": { "isPremiere": true } })));
        assert!(!live_premiere_from_state(&json!({ "video": { "isLive": false } })));
        assert!(!live_premiere_from_state(&json!({})));
    }

    #[test]
    fn test_page_type() {
        assert_eq!(
            page_type_from_address("https://host/video/AB12345678CD"),
            PageType::Video
        );
        assert_eq!(
            page_type_from_address("https://host/embed/AB12345678CD"),
            PageType::Embed
        );
        assert_eq!(page_type_from_address("https://host/"), PageType::Home);
        assert_eq!(
            page_type_from_address("https://host/channel/12345"),
            PageType::Channel
        );
        assert_eq!(
            page_type_from_address("https://host/results?query=x"),
            PageType::Search
        );
        assert_eq!(page_type_from_address("https://host/about"), PageType::Unknown);
        assert_eq!(page_type_from_address("garbage"), PageType::Unknown);
    }
}
