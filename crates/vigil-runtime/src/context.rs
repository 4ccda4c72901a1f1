//! Extension context lifetime
//!
//! The host surfaces a hard exception when code touches the APIs of an
//! invalidated extension copy, so every long-lived callback checks
//! `is_valid` before acting. Cleanup listeners run exactly once, when the
//! context is invalidated.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Validity flag plus teardown registration for one extension copy
#[derive(Default)]
pub struct ExtensionContext {
    invalidated: Cell<bool>,
    cleanup: RefCell<Vec<Box<dyn FnOnce()>>>,
}

impl ExtensionContext {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// True while this extension copy is the live one
    #[inline]
    pub fn is_valid(&self) -> bool {
        !self.invalidated.get()
    }

    /// Register a teardown hook, invoked exactly once on invalidation.
    /// Registered after invalidation, it runs immediately.
    pub fn add_cleanup_listener(&self, listener: Box<dyn FnOnce()>) {
        if self.invalidated.get() {
            listener();
        } else {
            self.cleanup.borrow_mut().push(listener);
        }
    }

    /// Mark this copy dead and run the cleanup listeners. Idempotent.
    pub fn invalidate(&self) {
        if self.invalidated.replace(true) {
            return;
        }
        tracing::debug!("extension context invalidated");
        let listeners = std::mem::take(&mut *self.cleanup.borrow_mut());
        for listener in listeners {
            listener();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cleanup_runs_exactly_once() {
        let ctx = ExtensionContext::new();
        let runs = Rc::new(Cell::new(0));
        let runs2 = runs.clone();
        ctx.add_cleanup_listener(Box::new(move || runs2.set(runs2.get() + 1)));

        assert!(ctx.is_valid());
        ctx.invalidate();
        ctx.invalidate();
        assert!(!ctx.is_valid());
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn test_late_registration_fires_immediately() {
        let ctx = ExtensionContext::new();
        ctx.invalidate();

        let ran = Rc::new(Cell::new(false));
        let ran2 = ran.clone();
        ctx.add_cleanup_listener(Box::new(move || ran2.set(true)));
        assert!(ran.get());
    }
}
