//! Page - shared host handle
//!
//! One observed page: document, mutation subscriptions, timers, the address
//! string, the in-page initial-state object, and the load lifecycle. A
//! content script holds this by `Rc` and drives everything through it; tests
//! mutate the document and call `flush`/`advance` to play the host's event
//! bursts deterministically.

use std::cell::{Cell, Ref, RefCell, RefMut};
use std::rc::Rc;

use crate::{Document, MutationHub, TimerQueue};

const MAX_FLUSH_PASSES: usize = 64;

/// Shared page handle
pub struct Page {
    doc: RefCell<Document>,
    hub: MutationHub,
    timers: TimerQueue,
    address: RefCell<String>,
    initial_state: RefCell<Option<serde_json::Value>>,
    ready: Cell<bool>,
    ready_listeners: RefCell<Vec<Box<dyn FnOnce()>>>,
}

impl Page {
    /// A fully loaded page with the usual document scaffold
    pub fn new(address: &str) -> Rc<Self> {
        Rc::new(Self {
            doc: RefCell::new(Document::new()),
            hub: MutationHub::new(),
            timers: TimerQueue::new(),
            address: RefCell::new(address.to_string()),
            initial_state: RefCell::new(None),
            ready: Cell::new(true),
            ready_listeners: RefCell::new(Vec::new()),
        })
    }

    /// A page still streaming in: bare document root, not ready
    pub fn loading(address: &str) -> Rc<Self> {
        Rc::new(Self {
            doc: RefCell::new(Document::empty()),
            hub: MutationHub::new(),
            timers: TimerQueue::new(),
            address: RefCell::new(address.to_string()),
            initial_state: RefCell::new(None),
            ready: Cell::new(false),
            ready_listeners: RefCell::new(Vec::new()),
        })
    }

    /// Borrow the document
    pub fn document(&self) -> Ref<'_, Document> {
        self.doc.borrow()
    }

    /// Borrow the document mutably
    pub fn document_mut(&self) -> RefMut<'_, Document> {
        self.doc.borrow_mut()
    }

    /// Mutation subscriptions for this page
    pub fn hub(&self) -> &MutationHub {
        &self.hub
    }

    /// Timer queue for this page
    pub fn timers(&self) -> &TimerQueue {
        &self.timers
    }

    /// Current address string
    pub fn address(&self) -> String {
        self.address.borrow().clone()
    }

    /// Same-document navigation: only the address changes
    pub fn set_address(&self, address: &str) {
        *self.address.borrow_mut() = address.to_string();
    }

    /// In-page initial-state object, if the page exposed one
    pub fn initial_state(&self) -> Option<serde_json::Value> {
        self.initial_state.borrow().clone()
    }

    pub fn set_initial_state(&self, state: Option<serde_json::Value>) {
        *self.initial_state.borrow_mut() = state;
    }

    /// True once the document finished loading
    pub fn is_ready(&self) -> bool {
        self.ready.get()
    }

    /// Run `callback` when the document is ready (immediately if it already
    /// is)
    pub fn on_ready(&self, callback: Box<dyn FnOnce()>) {
        if self.ready.get() {
            callback();
        } else {
            self.ready_listeners.borrow_mut().push(callback);
        }
    }

    /// Complete the load: build the document scaffold, mark ready, fire
    /// ready listeners, deliver any resulting mutations
    pub fn finish_load(&self) {
        if self.ready.replace(true) {
            return;
        }
        self.doc.borrow_mut().ensure_structure();
        let listeners = std::mem::take(&mut *self.ready_listeners.borrow_mut());
        for listener in listeners {
            listener();
        }
        self.flush();
    }

    /// Deliver pending mutation records to subscribers. Loops because a
    /// callback may mutate the document again; bails out if delivery never
    /// settles.
    pub fn flush(&self) {
        for _ in 0..MAX_FLUSH_PASSES {
            let records = self.doc.borrow_mut().take_records();
            if records.is_empty() {
                return;
            }
            let routed = {
                let doc = self.doc.borrow();
                self.hub.route(&doc, &records)
            };
            for (callback, batch) in routed {
                callback(&batch);
            }
        }
        tracing::warn!("mutation delivery did not settle after {MAX_FLUSH_PASSES} passes");
    }

    /// Advance timers, then deliver whatever the callbacks mutated
    pub fn advance(&self, dt_ms: u64) {
        self.timers.advance(dt_ms);
        self.flush();
    }
}
