//! Host page profile
//!
//! The selector set describing the observed platform's player markup. An
//! explicit value rather than module constants so tests and alternative
//! frontends of the platform can swap it out.

/// Selectors for the host platform's player structure
#[derive(Debug, Clone)]
pub struct HostProfile {
    /// The canonical player container element
    pub player_container: String,
    /// Player chrome wrapping a playback element and its control layers
    pub player_chrome: String,
    /// Playback elements
    pub playback: String,
}

impl Default for HostProfile {
    fn default() -> Self {
        Self {
            player_container: "#player".to_string(),
            player_chrome: ".player-shell".to_string(),
            playback: "video".to_string(),
        }
    }
}
