//! Element-wait multiplexer
//!
//! Many concurrent "tell me when a selector matches" requests share one
//! structural-change subscription on the document root instead of one
//! subscription each. Waits keyed by the same (selector, visibility
//! requirement) pair share a single pending entry; the subscription is
//! created lazily on first demand and torn down when the last wait
//! resolves.
//!
//! A wait never times out here. Callers needing a deadline wrap with the
//! combinators in [`crate::deadline`].

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use vigil_dom::{
    Document, MutationBatch, MutationKind, NodeId, ObserveOptions, Page, Selector, SelectorError,
    SubscriptionId,
};
use vigil_runtime::ExtensionContext;

use crate::{HostProfile, Visibility};

/// Continuation fired with the matched element
pub type WaitCallback = Box<dyn FnOnce(NodeId)>;

/// One outstanding request, shared by every caller of the same key
struct PendingWait {
    selector: Selector,
    require_visible: bool,
    ignore_width: bool,
    callbacks: Vec<WaitCallback>,
    /// Last candidate set, reused when a batch cannot have changed it
    cached: Option<Vec<NodeId>>,
}

/// Shared element waiting over one page
#[derive(Clone)]
pub struct ElementWaiter {
    shared: Rc<WaiterShared>,
}

struct WaiterShared {
    page: Rc<Page>,
    ctx: Rc<ExtensionContext>,
    visibility: Visibility,
    pending: RefCell<Vec<PendingWait>>,
    subscription: Cell<Option<SubscriptionId>>,
    /// A ready-callback is registered and will create the subscription
    ready_hook: Cell<bool>,
}

impl ElementWaiter {
    pub fn new(
        page: Rc<Page>,
        ctx: Rc<ExtensionContext>,
        profile: &HostProfile,
    ) -> Result<Self, SelectorError> {
        Ok(Self {
            shared: Rc::new(WaiterShared {
                page,
                ctx,
                visibility: Visibility::new(profile)?,
                pending: RefCell::new(Vec::new()),
                subscription: Cell::new(None),
                ready_hook: Cell::new(false),
            }),
        })
    }

    /// The oracle this waiter validates visibility with
    pub fn visibility(&self) -> &Visibility {
        &self.shared.visibility
    }

    /// Occlusion-aware visibility of an element on this waiter's page
    pub fn is_visible(&self, element: NodeId, ignore_width: bool) -> bool {
        let doc = self.shared.page.document();
        self.shared.visibility.is_visible(&doc, element, ignore_width)
    }

    /// Synchronous lookup: first match, oracle-validated when
    /// `require_visible`
    pub fn get_element(
        &self,
        selector: &str,
        require_visible: bool,
        ignore_width: bool,
    ) -> Result<Option<NodeId>, SelectorError> {
        let selector = Selector::parse(selector)?;
        Ok(self.shared.lookup(&selector, require_visible, ignore_width))
    }

    /// First candidate the oracle accepts, in iteration order
    pub fn find_valid_element(&self, candidates: &[NodeId], ignore_width: bool) -> Option<NodeId> {
        let doc = self.shared.page.document();
        self.shared
            .visibility
            .find_valid_element(&doc, candidates, ignore_width)
    }

    /// Continuation-passing wait. Fires immediately on a current match,
    /// otherwise joins (or creates) the pending wait for this key.
    pub fn wait_with(
        &self,
        selector: &str,
        require_visible: bool,
        ignore_width: bool,
        callback: WaitCallback,
    ) -> Result<(), SelectorError> {
        let selector = Selector::parse(selector)?;
        if let Some(element) = self.shared.lookup(&selector, require_visible, ignore_width) {
            callback(element);
            return Ok(());
        }
        self.shared
            .enqueue(selector, require_visible, ignore_width, callback);
        Ok(())
    }

    /// Future-returning wait over the same machinery
    pub fn wait_for_element(
        &self,
        selector: &str,
        require_visible: bool,
        ignore_width: bool,
    ) -> Result<ElementWait, SelectorError> {
        let state = Rc::new(RefCell::new(WaitSlot::default()));
        let resolved = state.clone();
        self.wait_with(
            selector,
            require_visible,
            ignore_width,
            Box::new(move |element| {
                let mut slot = resolved.borrow_mut();
                slot.result = Some(element);
                let waker = slot.waker.take();
                drop(slot);
                if let Some(waker) = waker {
                    waker.wake();
                }
            }),
        )?;
        Ok(ElementWait { state })
    }

    /// Number of distinct pending waits
    pub fn pending_count(&self) -> usize {
        self.shared.pending.borrow().len()
    }

    /// True while the shared subscription is live
    pub fn has_subscription(&self) -> bool {
        self.shared.subscription.get().is_some()
    }
}

impl WaiterShared {
    fn lookup(
        &self,
        selector: &Selector,
        require_visible: bool,
        ignore_width: bool,
    ) -> Option<NodeId> {
        let doc = self.page.document();
        let candidates = doc.query_selector_all(selector);
        if require_visible {
            self.visibility
                .find_valid_element(&doc, &candidates, ignore_width)
        } else {
            candidates.first().copied()
        }
    }

    fn enqueue(
        self: &Rc<Self>,
        selector: Selector,
        require_visible: bool,
        ignore_width: bool,
        callback: WaitCallback,
    ) {
        {
            let mut pending = self.pending.borrow_mut();
            if let Some(wait) = pending.iter_mut().find(|w| {
                w.selector.source() == selector.source() && w.require_visible == require_visible
            }) {
                wait.callbacks.push(callback);
            } else {
                tracing::trace!(selector = selector.source(), require_visible, "wait created");
                pending.push(PendingWait {
                    selector,
                    require_visible,
                    ignore_width,
                    callbacks: vec![callback],
                    cached: None,
                });
            }
        }
        // insert first, subscribe second: no window where a wait is
        // pending with no live subscription
        self.ensure_subscription();
    }

    fn ensure_subscription(self: &Rc<Self>) {
        if self.subscription.get().is_some() || self.pending.borrow().is_empty() {
            return;
        }
        if self.page.document().body().is_none() {
            // too early in the load to observe anything useful
            if !self.ready_hook.replace(true) {
                let shared = self.clone();
                self.page.on_ready(Box::new(move || {
                    shared.ready_hook.set(false);
                    shared.ensure_subscription();
                }));
            }
            return;
        }
        let shared = self.clone();
        let id = self.page.hub().subscribe(
            NodeId::ROOT,
            ObserveOptions::structural(),
            Rc::new(move |batch| shared.evaluate(Some(batch))),
        );
        self.subscription.set(Some(id));
        tracing::debug!("shared observation subscription created");
        // initial synchronous pass
        self.evaluate(None);
    }

    /// Re-evaluate every pending wait against the document. With a batch,
    /// waits the batch cannot have affected skip the document scan and
    /// reuse their cached candidates. All waits are evaluated before any
    /// continuation fires.
    fn evaluate(&self, batch: Option<&MutationBatch>) {
        let mut resolved: Vec<(Vec<WaitCallback>, NodeId)> = Vec::new();
        {
            let doc = self.page.document();
            let mut pending = self.pending.borrow_mut();
            pending.retain_mut(|wait| {
                let rescan = match batch {
                    Some(batch) => batch_touches(&doc, batch, &wait.selector),
                    None => true,
                };
                let candidates = if rescan || wait.cached.is_none() {
                    let found = doc.query_selector_all(&wait.selector);
                    wait.cached = Some(found.clone());
                    found
                } else {
                    wait.cached.clone().unwrap_or_default()
                };
                let hit = if wait.require_visible {
                    self.visibility
                        .find_valid_element(&doc, &candidates, wait.ignore_width)
                } else {
                    candidates.iter().copied().find(|&c| doc.is_connected(c))
                };
                match hit {
                    Some(element) => {
                        resolved.push((std::mem::take(&mut wait.callbacks), element));
                        false
                    }
                    None => true,
                }
            });
        }

        if !resolved.is_empty() {
            if self.ctx.is_valid() {
                for (callbacks, element) in resolved {
                    for callback in callbacks {
                        callback(element);
                    }
                }
            } else {
                tracing::debug!("context invalidated, resolved waits dropped");
            }
        }
        self.maybe_teardown();
    }

    fn maybe_teardown(&self) {
        if !self.pending.borrow().is_empty() {
            return;
        }
        if let Some(id) = self.subscription.take() {
            self.page.hub().unsubscribe(id);
            tracing::debug!("shared observation subscription torn down");
        }
    }
}

/// Could this batch have changed the candidate set for `selector`?
/// Structural records only; an added or removed subtree is relevant when
/// any node in it passes the selector's rightmost compound.
fn batch_touches(doc: &Document, batch: &MutationBatch, selector: &Selector) -> bool {
    batch.records.iter().any(|record| match &record.kind {
        MutationKind::ChildList { added, removed } => added
            .iter()
            .chain(removed.iter())
            .any(|&node| subtree_could_match(doc, node, selector)),
        MutationKind::Attributes { .. } => false,
    })
}

fn subtree_could_match(doc: &Document, node: NodeId, selector: &Selector) -> bool {
    doc.tree()
        .descendants(node)
        .any(|id| doc.element(id).is_some_and(|elem| selector.rightmost_matches(elem)))
}

#[derive(Default)]
struct WaitSlot {
    result: Option<NodeId>,
    waker: Option<Waker>,
}

/// Future resolving to the matched element
pub struct ElementWait {
    state: Rc<RefCell<WaitSlot>>,
}

impl ElementWait {
    /// Non-blocking peek at the resolution
    pub fn peek(&self) -> Option<NodeId> {
        self.state.borrow().result
    }
}

impl Future for ElementWait {
    type Output = NodeId;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<NodeId> {
        let mut slot = self.state.borrow_mut();
        match slot.result {
            Some(element) => Poll::Ready(element),
            None => {
                slot.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use vigil_dom::Rect;

    fn setup(page: &Rc<Page>) -> (ElementWaiter, Rc<ExtensionContext>) {
        let ctx = ExtensionContext::new();
        let waiter = ElementWaiter::new(page.clone(), ctx.clone(), &HostProfile::default()).unwrap();
        (waiter, ctx)
    }

    fn insert_titled(page: &Page, class: &str) -> NodeId {
        let mut doc = page.document_mut();
        let body = doc.body().unwrap();
        let node = doc.create_element("div");
        doc.set_attr(node, "class", class);
        doc.append_child(body, node);
        drop(doc);
        node
    }

    #[test]
    fn test_immediate_match_skips_subscription() {
        let page = Page::new("https://host/");
        let (waiter, _ctx) = setup(&page);
        let existing = insert_titled(&page, "title");
        page.flush();

        let hits = Rc::new(RefCell::new(Vec::new()));
        let hits2 = hits.clone();
        waiter
            .wait_with(".title", false, false, Box::new(move |el| hits2.borrow_mut().push(el)))
            .unwrap();

        assert_eq!(*hits.borrow(), vec![existing]);
        assert_eq!(waiter.pending_count(), 0);
        assert!(!waiter.has_subscription());
    }

    #[test]
    fn test_waiters_share_one_pending_and_resolve_in_order() {
        let page = Page::new("https://host/");
        let (waiter, _ctx) = setup(&page);

        let log = Rc::new(RefCell::new(Vec::new()));
        for tag in ["first", "second"] {
            let log = log.clone();
            waiter
                .wait_with(".title", false, false, Box::new(move |_| log.borrow_mut().push(tag)))
                .unwrap();
        }
        assert_eq!(waiter.pending_count(), 1);
        assert!(waiter.has_subscription());
        assert!(log.borrow().is_empty());

        insert_titled(&page, "title");
        page.flush();

        assert_eq!(*log.borrow(), vec!["first", "second"]);
        assert_eq!(waiter.pending_count(), 0);
    }

    #[test]
    fn test_unrelated_mutations_do_not_resolve() {
        let page = Page::new("https://host/");
        let (waiter, _ctx) = setup(&page);

        let fired = Rc::new(Cell::new(false));
        let fired2 = fired.clone();
        waiter
            .wait_with(".title", false, false, Box::new(move |_| fired2.set(true)))
            .unwrap();

        insert_titled(&page, "sidebar");
        page.flush();
        assert!(!fired.get());
        assert_eq!(waiter.pending_count(), 1);
    }

    #[test]
    fn test_distinct_keys_are_separate_waits() {
        let page = Page::new("https://host/");
        let (waiter, _ctx) = setup(&page);

        waiter.wait_with(".title", false, false, Box::new(|_| {})).unwrap();
        waiter.wait_with(".title", true, false, Box::new(|_| {})).unwrap();
        waiter.wait_with(".other", false, false, Box::new(|_| {})).unwrap();

        assert_eq!(waiter.pending_count(), 3);
    }

    #[test]
    fn test_style_only_change_does_not_resolve_visible_wait() {
        let page = Page::new("https://host/");
        let (waiter, _ctx) = setup(&page);

        let fired = Rc::new(Cell::new(false));
        let fired2 = fired.clone();
        waiter
            .wait_with(".title", true, false, Box::new(move |_| fired2.set(true)))
            .unwrap();

        // inserted hidden: structural batch arrives but the oracle says no
        let node = {
            let mut doc = page.document_mut();
            let body = doc.body().unwrap();
            let node = doc.create_element("div");
            doc.set_attr(node, "class", "title");
            doc.set_hidden(node, true);
            doc.append_child(body, node);
            node
        };
        page.flush();
        assert!(!fired.get());

        // visibility restored by a style change: no structural delta, so
        // the multiplexer stays asleep (documented policy)
        {
            let mut doc = page.document_mut();
            doc.set_hidden(node, false);
            doc.set_rect(node, Rect::new(0.0, 0.0, 100.0, 40.0));
        }
        page.flush();
        assert!(!fired.get());

        // the next structural batch anywhere relevant re-evaluates
        insert_titled(&page, "title hidden-too");
        page.flush();
        assert!(fired.get());
    }

    #[test]
    fn test_cached_candidates_rechecked_without_rescan() {
        let page = Page::new("https://host/");
        let (waiter, _ctx) = setup(&page);

        let fired = Rc::new(Cell::new(false));
        let fired2 = fired.clone();
        waiter
            .wait_with(".title", true, false, Box::new(move |_| fired2.set(true)))
            .unwrap();

        let node = {
            let mut doc = page.document_mut();
            let body = doc.body().unwrap();
            let node = doc.create_element("div");
            doc.set_attr(node, "class", "title");
            doc.append_child(body, node);
            node
        };
        page.flush();
        // present but zero-sized: cached as a candidate, not yet valid
        assert!(!fired.get());

        {
            let mut doc = page.document_mut();
            doc.set_rect(node, Rect::new(0.0, 0.0, 100.0, 40.0));
        }
        // an unrelated structural mutation skips the rescan for .title but
        // still re-checks the cached candidate's visibility
        insert_titled(&page, "sidebar");
        page.flush();
        assert!(fired.get());
    }

    #[test]
    fn test_subscription_teardown_and_recreation() {
        let page = Page::new("https://host/");
        let (waiter, _ctx) = setup(&page);

        waiter.wait_with(".title", false, false, Box::new(|_| {})).unwrap();
        assert!(waiter.has_subscription());
        assert_eq!(page.hub().subscription_count(), 1);

        insert_titled(&page, "title");
        page.flush();
        assert!(!waiter.has_subscription());
        assert_eq!(page.hub().subscription_count(), 0);

        // a fresh wait recreates the subscription and resolves normally
        let fired = Rc::new(Cell::new(false));
        let fired2 = fired.clone();
        waiter
            .wait_with(".late", false, false, Box::new(move |_| fired2.set(true)))
            .unwrap();
        assert!(waiter.has_subscription());

        insert_titled(&page, "late");
        page.flush();
        assert!(fired.get());
        assert!(!waiter.has_subscription());
    }

    #[test]
    fn test_subscription_deferred_until_ready() {
        let page = Page::loading("https://host/");
        let (waiter, _ctx) = setup(&page);

        let fired = Rc::new(Cell::new(false));
        let fired2 = fired.clone();
        waiter
            .wait_with(".title", false, false, Box::new(move |_| fired2.set(true)))
            .unwrap();
        // no body yet, so no subscription either
        assert!(!waiter.has_subscription());

        page.finish_load();
        assert!(waiter.has_subscription());

        insert_titled(&page, "title");
        page.flush();
        assert!(fired.get());
    }

    #[test]
    fn test_invalidated_context_swallows_callbacks() {
        let page = Page::new("https://host/");
        let (waiter, ctx) = setup(&page);

        let fired = Rc::new(Cell::new(false));
        let fired2 = fired.clone();
        waiter
            .wait_with(".title", false, false, Box::new(move |_| fired2.set(true)))
            .unwrap();

        ctx.invalidate();
        insert_titled(&page, "title");
        page.flush();

        assert!(!fired.get());
        // the wait is spent and the subscription still drains away
        assert_eq!(waiter.pending_count(), 0);
        assert!(!waiter.has_subscription());
    }

    #[test]
    fn test_callback_may_start_new_wait() {
        let page = Page::new("https://host/");
        let (waiter, _ctx) = setup(&page);

        let chained = Rc::new(Cell::new(false));
        let chained2 = chained.clone();
        let waiter2 = waiter.clone();
        waiter
            .wait_with(
                ".title",
                false,
                false,
                Box::new(move |_| {
                    waiter2
                        .wait_with(".next", false, false, Box::new(move |_| chained2.set(true)))
                        .unwrap();
                }),
            )
            .unwrap();

        insert_titled(&page, "title");
        page.flush();
        assert_eq!(waiter.pending_count(), 1);
        assert!(waiter.has_subscription());

        insert_titled(&page, "next");
        page.flush();
        assert!(chained.get());
    }

    #[test]
    fn test_future_adapter() {
        let page = Page::new("https://host/");
        let (waiter, _ctx) = setup(&page);

        let wait = waiter.wait_for_element(".title", false, false).unwrap();
        assert_eq!(smol::block_on(smol::future::poll_once(wait)), None);

        let wait = waiter.wait_for_element(".title", false, false).unwrap();
        let inserted = insert_titled(&page, "title");
        page.flush();

        assert_eq!(wait.peek(), Some(inserted));
        assert_eq!(smol::block_on(wait), inserted);
    }
}
