//! Identity state
//!
//! The field combination owned by the tracker. Everything here is mutated
//! only through the tracker's transition function and read-only elsewhere.

use std::fmt;

/// Opaque, syntactically validated video identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VideoId(String);

impl VideoId {
    /// Identifier length on the host platform
    pub const LENGTH: usize = 12;

    /// Validate and wrap a raw identifier
    pub fn new(raw: &str) -> Option<VideoId> {
        let valid = raw.len() == Self::LENGTH
            && raw
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
        valid.then(|| VideoId(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Page classification derived from the address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PageType {
    #[default]
    Unknown,
    Home,
    Video,
    Embed,
    Live,
    Channel,
    Search,
}

/// Progress of the channel-ownership lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelStatus {
    #[default]
    Fetching,
    Found,
    Failed,
}

/// Channel identifier plus lookup status
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChannelIdInfo {
    pub id: Option<String>,
    pub status: ChannelStatus,
}

/// The tracker's owned state
#[derive(Debug, Default)]
pub struct VideoIdentity {
    pub video_id: Option<VideoId>,
    pub page_type: PageType,
    pub channel: ChannelIdInfo,
    pub is_live_premiere: bool,
}
