//! vigil runtime - extension-side plumbing
//!
//! The pieces of the surrounding extension the observation core relies on:
//! context lifetime (a replaced or unloaded extension must stop acting),
//! the cross-context message channel, and the configuration-readiness
//! predicate.

mod config;
mod context;
mod message;

pub use config::{ConfigSource, SharedFlag};
pub use context::ExtensionContext;
pub use message::{ListenerId, Message, MessageBus};
