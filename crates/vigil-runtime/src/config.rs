//! Configuration readiness
//!
//! Settings live in extension storage and arrive asynchronously; consumers
//! poll `is_ready` rather than block.

use std::cell::Cell;
use std::rc::Rc;

/// Readiness predicate over the extension's configuration store
pub trait ConfigSource {
    /// True once configuration has been fetched and parsed
    fn is_ready(&self) -> bool;
}

/// Shared boolean flag, flipped by whoever owns the real store
#[derive(Default, Clone)]
pub struct SharedFlag {
    ready: Rc<Cell<bool>>,
}

impl SharedFlag {
    pub fn new(ready: bool) -> Self {
        Self {
            ready: Rc::new(Cell::new(ready)),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.set(ready);
    }
}

impl ConfigSource for SharedFlag {
    fn is_ready(&self) -> bool {
        self.ready.get()
    }
}
