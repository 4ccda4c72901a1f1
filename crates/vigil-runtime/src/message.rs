//! Cross-context messages
//!
//! The channel between the content script, the injected page-context
//! bridge, and the background worker. Broadcast round-trips every message
//! through JSON, matching the structured-clone boundary real contexts sit
//! behind: listeners never share memory with the sender.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use serde::{Deserialize, Serialize};

/// Messages crossing extension contexts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Drop any cached media-session artwork association
    ClearArtwork,
    /// Same-document navigation relayed by the page bridge; the identifier
    /// is whatever the page claimed, unvalidated
    Navigation { video_id: Option<String> },
    /// Player data relayed by the page bridge
    VideoData {
        video_id: String,
        is_live: bool,
        is_premiere: bool,
    },
}

/// Listener handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

/// In-process stand-in for the extension message channel
#[derive(Default)]
pub struct MessageBus {
    listeners: RefCell<Vec<(ListenerId, Rc<dyn Fn(&Message)>)>>,
    next_id: Cell<u64>,
}

impl MessageBus {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Register a listener for every broadcast
    pub fn subscribe(&self, listener: Rc<dyn Fn(&Message)>) -> ListenerId {
        let id = ListenerId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.listeners.borrow_mut().push((id, listener));
        id
    }

    /// Drop a listener. Returns false if it was already gone.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        before != listeners.len()
    }

    /// Number of live listeners
    pub fn listener_count(&self) -> usize {
        self.listeners.borrow().len()
    }

    /// Serialize, cross the context boundary, deliver to every listener in
    /// registration order. A message that does not survive the wire is
    /// dropped with a warning.
    pub fn broadcast(&self, message: &Message) {
        let wire = match serde_json::to_string(message) {
            Ok(wire) => wire,
            Err(err) => {
                tracing::warn!(%err, "message failed to serialize, dropped");
                return;
            }
        };
        let received: Message = match serde_json::from_str(&wire) {
            Ok(received) => received,
            Err(err) => {
                tracing::warn!(%err, "message failed to deserialize, dropped");
                return;
            }
        };
        let listeners: Vec<Rc<dyn Fn(&Message)>> = self
            .listeners
            .borrow()
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        for listener in listeners {
            listener(&received);
        }
    }
}
