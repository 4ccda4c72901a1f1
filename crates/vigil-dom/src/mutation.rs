//! Mutation records and scoped subscriptions
//!
//! The abstract change-batch shape the rest of the system is written
//! against: a subscription covers a subtree and receives batches of
//! added/removed/attribute-changed node deltas. Routing computes per-
//! subscription batches while the document is borrowed; the caller invokes
//! the callbacks afterwards, so a callback is free to query or mutate the
//! document and to add or drop subscriptions.

use std::cell::RefCell;
use std::rc::Rc;

use crate::{Document, NodeId};

/// One node delta
#[derive(Debug, Clone)]
pub struct MutationRecord {
    /// For child-list changes the parent; for attribute changes the element
    pub target: NodeId,
    pub kind: MutationKind,
}

/// Kind of change
#[derive(Debug, Clone)]
pub enum MutationKind {
    ChildList {
        added: Vec<NodeId>,
        removed: Vec<NodeId>,
    },
    Attributes {
        name: String,
    },
}

impl MutationKind {
    /// True for structural (child-list) changes
    #[inline]
    pub fn is_structural(&self) -> bool {
        matches!(self, MutationKind::ChildList { .. })
    }
}

/// A batch of records delivered to one subscription
#[derive(Debug, Clone)]
pub struct MutationBatch {
    pub records: Vec<MutationRecord>,
}

/// What a subscription wants to hear about
#[derive(Debug, Clone, Copy)]
pub struct ObserveOptions {
    pub child_list: bool,
    pub attributes: bool,
    pub subtree: bool,
}

impl ObserveOptions {
    /// Child-list changes across the whole subtree
    pub fn structural() -> Self {
        Self {
            child_list: true,
            attributes: false,
            subtree: true,
        }
    }
}

/// Subscription handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

/// Delivery callback
pub type BatchCallback = Rc<dyn Fn(&MutationBatch)>;

struct Subscription {
    id: SubscriptionId,
    scope: NodeId,
    options: ObserveOptions,
    callback: BatchCallback,
}

/// Subscription registry for one document
#[derive(Default)]
pub struct MutationHub {
    inner: RefCell<HubInner>,
}

#[derive(Default)]
struct HubInner {
    subs: Vec<Subscription>,
    next_id: u64,
}

impl MutationHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for changes within `scope`
    pub fn subscribe(
        &self,
        scope: NodeId,
        options: ObserveOptions,
        callback: BatchCallback,
    ) -> SubscriptionId {
        let mut inner = self.inner.borrow_mut();
        let id = SubscriptionId(inner.next_id);
        inner.next_id += 1;
        inner.subs.push(Subscription {
            id,
            scope,
            options,
            callback,
        });
        tracing::trace!(id = id.0, scope = scope.0, "mutation subscription added");
        id
    }

    /// Cancel a subscription. Returns false if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut inner = self.inner.borrow_mut();
        let before = inner.subs.len();
        inner.subs.retain(|s| s.id != id);
        before != inner.subs.len()
    }

    /// Live subscription count
    pub fn subscription_count(&self) -> usize {
        self.inner.borrow().subs.len()
    }

    /// Split `records` into per-subscription batches, in subscription order.
    /// Holds no borrows when it returns; the caller fires the callbacks.
    pub fn route(
        &self,
        doc: &Document,
        records: &[MutationRecord],
    ) -> Vec<(BatchCallback, MutationBatch)> {
        let inner = self.inner.borrow();
        let mut routed = Vec::new();
        for sub in &inner.subs {
            let matched: Vec<MutationRecord> = records
                .iter()
                .filter(|record| Self::wants(doc, sub, record))
                .cloned()
                .collect();
            if !matched.is_empty() {
                routed.push((sub.callback.clone(), MutationBatch { records: matched }));
            }
        }
        routed
    }

    fn wants(doc: &Document, sub: &Subscription, record: &MutationRecord) -> bool {
        let kind_ok = match record.kind {
            MutationKind::ChildList { .. } => sub.options.child_list,
            MutationKind::Attributes { .. } => sub.options.attributes,
        };
        if !kind_ok {
            return false;
        }
        record.target == sub.scope
            || (sub.options.subtree && doc.contains(sub.scope, record.target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn structural_record(target: NodeId, added: Vec<NodeId>) -> MutationRecord {
        MutationRecord {
            target,
            kind: MutationKind::ChildList {
                added,
                removed: Vec::new(),
            },
        }
    }

    #[test]
    fn test_scope_filtering() {
        let mut doc = Document::new();
        let body = doc.body().unwrap();
        let inside = doc.create_element("div");
        let outside = doc.create_element("div");
        doc.append_child(body, inside);
        doc.append_child(NodeId::ROOT, outside);

        let hub = MutationHub::new();
        let hits = Rc::new(Cell::new(0));
        let hits2 = hits.clone();
        hub.subscribe(
            body,
            ObserveOptions::structural(),
            Rc::new(move |batch: &MutationBatch| {
                hits2.set(hits2.get() + batch.records.len());
            }),
        );

        let records = vec![
            structural_record(inside, vec![]),
            structural_record(outside, vec![]),
        ];
        for (cb, batch) in hub.route(&doc, &records) {
            cb(&batch);
        }
        // only the record inside <body> is delivered
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn test_attribute_records_filtered_by_options() {
        let doc = Document::new();
        let hub = MutationHub::new();
        let hits = Rc::new(Cell::new(0));
        let hits2 = hits.clone();
        hub.subscribe(
            NodeId::ROOT,
            ObserveOptions::structural(),
            Rc::new(move |_: &MutationBatch| hits2.set(hits2.get() + 1)),
        );

        let records = vec![MutationRecord {
            target: NodeId::ROOT,
            kind: MutationKind::Attributes {
                name: "class".to_string(),
            },
        }];
        assert!(hub.route(&doc, &records).is_empty());
        assert_eq!(hits.get(), 0);
    }

    #[test]
    fn test_unsubscribe() {
        let hub = MutationHub::new();
        let id = hub.subscribe(
            NodeId::ROOT,
            ObserveOptions::structural(),
            Rc::new(|_| {}),
        );
        assert_eq!(hub.subscription_count(), 1);
        assert!(hub.unsubscribe(id));
        assert!(!hub.unsubscribe(id));
        assert_eq!(hub.subscription_count(), 0);
    }

    #[test]
    fn test_callback_may_resubscribe() {
        let doc = Document::new();
        let hub = Rc::new(MutationHub::new());
        let hub2 = hub.clone();
        hub.subscribe(
            NodeId::ROOT,
            ObserveOptions::structural(),
            Rc::new(move |_: &MutationBatch| {
                hub2.subscribe(NodeId::ROOT, ObserveOptions::structural(), Rc::new(|_| {}));
            }),
        );

        let records = vec![structural_record(NodeId::ROOT, vec![])];
        for (cb, batch) in hub.route(&doc, &records) {
            cb(&batch);
        }
        assert_eq!(hub.subscription_count(), 2);
    }
}
