//! vigil video - video identity tracking
//!
//! Owns "which video is currently loaded": computes the identifier across
//! single-page navigations, video-element replacement and embed races,
//! resets derived state exactly once per identity, and publishes changes to
//! the rest of the extension.

mod cache;
mod channel;
mod extract;
mod identity;
mod tracker;

pub use cache::BoundedCache;
pub use channel::channel_id_from_href;
pub use extract::{
    id_from_address, id_from_href, id_from_state, live_premiere_from_state,
    page_type_from_address,
};
pub use identity::{ChannelIdInfo, ChannelStatus, PageType, VideoId, VideoIdentity};
pub use tracker::{SetupError, TrackerCallbacks, TrackerConfig, VideoTracker, setup_video_module};
