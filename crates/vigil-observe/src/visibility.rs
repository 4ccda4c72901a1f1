//! Visibility oracle
//!
//! Decides whether an element is the effective on-screen element at its
//! location. A bounding-box check alone is not enough on pages with
//! overlapping hover-preview players, so a positive answer is anchored to
//! what hit-testing says is actually drawn on top.

use vigil_dom::{Document, NodeId, Selector, SelectorError};

use crate::HostProfile;

/// Occlusion-aware visibility checks against one host profile
#[derive(Debug, Clone)]
pub struct Visibility {
    playback: Selector,
    player_container: Selector,
    player_chrome: Selector,
}

impl Visibility {
    pub fn new(profile: &HostProfile) -> Result<Self, SelectorError> {
        Ok(Self {
            playback: Selector::parse(&profile.playback)?,
            player_container: Selector::parse(&profile.player_container)?,
            player_chrome: Selector::parse(&profile.player_chrome)?,
        })
    }

    /// Is `element` the effective element at its own location?
    pub fn is_visible(&self, doc: &Document, element: NodeId, ignore_width: bool) -> bool {
        if doc.element(element).is_none() || !doc.is_connected(element) {
            return false;
        }

        // Right after load the main playback element is the only one in the
        // document; layout may not have settled yet, so trust it.
        let is_playback = doc.matches(element, &self.playback);
        if is_playback && doc.query_selector_all(&self.playback).len() == 1 {
            return true;
        }

        let rect = doc.rect(element);
        if rect.height <= 0.0 || (!ignore_width && rect.width <= 0.0) {
            return false;
        }

        let (cx, cy) = rect.center();
        let topmost = doc
            .element_from_point(cx, cy)
            .or_else(|| doc.element_from_point(rect.left(), rect.top()));

        let Some(topmost) = topmost else {
            // Nothing drawn at either probe point: the box is off-page.
            // Inside the player that happens when the page is scrolled past
            // the player top, and the element is still the effective one.
            return rect.top() < 0.0 && doc.closest(element, &self.player_container).is_some();
        };

        let related = topmost == element
            || doc.contains(element, topmost)
            || doc.contains(topmost, element);
        if !related {
            return false;
        }

        if is_playback {
            // A paused hover preview exposes its control layer above a
            // background video; only an occluder inside this element's own
            // player chrome validates it.
            let Some(chrome) = doc.closest(element, &self.player_chrome) else {
                return false;
            };
            return doc.contains(chrome, topmost);
        }
        true
    }

    /// First candidate the oracle accepts, in iteration order
    pub fn find_valid_element(
        &self,
        doc: &Document,
        candidates: &[NodeId],
        ignore_width: bool,
    ) -> Option<NodeId> {
        candidates
            .iter()
            .copied()
            .find(|&candidate| self.is_visible(doc, candidate, ignore_width))
    }
}
