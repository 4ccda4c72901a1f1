//! Document - high-level document API
//!
//! Wraps the arena tree with selector queries, geometry, hit testing and a
//! pending mutation-record log drained by `Page::flush`.

use crate::{
    DomTree, ElementData, MutationKind, MutationRecord, Node, NodeId, Rect, Selector,
};

/// Observed document
#[derive(Debug)]
pub struct Document {
    /// The DOM tree
    tree: DomTree,
    /// Mutation records not yet delivered to subscribers
    records: Vec<MutationRecord>,
    /// Visible viewport; hit tests miss outside it
    viewport: Rect,
}

/// Default viewport dimensions
const VIEWPORT: Rect = Rect {
    x: 0.0,
    y: 0.0,
    width: 1280.0,
    height: 720.0,
};

impl Document {
    /// Create a document with the usual html/head/body scaffold
    pub fn new() -> Self {
        let mut doc = Self::empty();
        doc.ensure_structure();
        doc.records.clear();
        doc
    }

    /// Create a document holding only the root (pre-parse state)
    pub fn empty() -> Self {
        Self {
            tree: DomTree::new(),
            records: Vec::new(),
            viewport: VIEWPORT,
        }
    }

    /// Resize the visible viewport
    pub fn set_viewport(&mut self, viewport: Rect) {
        self.viewport = viewport;
    }

    /// The visible viewport
    pub fn viewport(&self) -> Rect {
        self.viewport
    }

    /// Build html/head/body if absent. Used when a loading document becomes
    /// ready.
    pub fn ensure_structure(&mut self) {
        if self.body().is_some() {
            return;
        }
        let html = self.create_element("html");
        let head = self.create_element("head");
        let body = self.create_element("body");
        self.append_child(NodeId::ROOT, html);
        self.append_child(html, head);
        self.append_child(html, body);
    }

    /// Get `<body>`, if the document has one yet
    pub fn body(&self) -> Option<NodeId> {
        self.tree
            .descendants(NodeId::ROOT)
            .find(|&id| self.tag(id) == Some("body"))
    }

    /// Access the DOM tree
    pub fn tree(&self) -> &DomTree {
        &self.tree
    }

    // ------------------------------------------------------------------
    // Node construction and structural mutation
    // ------------------------------------------------------------------

    /// Allocate a detached element
    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.tree.create_element(tag)
    }

    /// Allocate a detached text node
    pub fn create_text(&mut self, content: &str) -> NodeId {
        self.tree.create_text(content)
    }

    /// Append `child` under `parent`, recording a structural mutation
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        self.tree.append_child(parent, child);
        self.records.push(MutationRecord {
            target: parent,
            kind: MutationKind::ChildList {
                added: vec![child],
                removed: Vec::new(),
            },
        });
    }

    /// Detach a node from its parent, recording a structural mutation
    pub fn remove(&mut self, node: NodeId) {
        let Some(parent) = self.tree.parent(node) else {
            return;
        };
        self.tree.detach(node);
        self.records.push(MutationRecord {
            target: parent,
            kind: MutationKind::ChildList {
                added: Vec::new(),
                removed: vec![node],
            },
        });
    }

    // ------------------------------------------------------------------
    // Attributes and style-equivalents
    // ------------------------------------------------------------------

    /// Set an attribute, recording an attribute mutation
    pub fn set_attr(&mut self, node: NodeId, name: &str, value: &str) {
        if let Some(elem) = self.tree.get_mut(node).and_then(Node::as_element_mut) {
            elem.set_attr(name, value);
            self.records.push(MutationRecord {
                target: node,
                kind: MutationKind::Attributes {
                    name: name.to_string(),
                },
            });
        }
    }

    /// Attribute value of an element
    pub fn attr(&self, node: NodeId, name: &str) -> Option<&str> {
        self.element(node)?.attr(name)
    }

    /// Tag name of an element
    pub fn tag(&self, node: NodeId) -> Option<&str> {
        self.element(node).map(|e| e.tag.as_str())
    }

    /// Element payload of a node
    pub fn element(&self, node: NodeId) -> Option<&ElementData> {
        self.tree.get(node)?.as_element()
    }

    /// Assign a rendered box. Models layout, so no mutation record.
    pub fn set_rect(&mut self, node: NodeId, rect: Rect) {
        if let Some(elem) = self.tree.get_mut(node).and_then(Node::as_element_mut) {
            elem.rect = rect;
        }
    }

    /// Rendered box of an element (zero for non-elements)
    pub fn rect(&self, node: NodeId) -> Rect {
        self.element(node).map(|e| e.rect).unwrap_or_default()
    }

    /// Toggle the computed not-rendered state. Models a style change with no
    /// structural delta, so no mutation record.
    pub fn set_hidden(&mut self, node: NodeId, hidden: bool) {
        if let Some(elem) = self.tree.get_mut(node).and_then(Node::as_element_mut) {
            elem.hidden = hidden;
        }
    }

    /// Computed not-rendered state
    pub fn hidden(&self, node: NodeId) -> bool {
        self.element(node).map(|e| e.hidden).unwrap_or(true)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// True when `node` is an element matching `selector`
    pub fn matches(&self, node: NodeId, selector: &Selector) -> bool {
        let Some(elem) = self.element(node) else {
            return false;
        };
        selector.matches_with_ancestors(elem, || {
            Ancestors {
                doc: self,
                cur: self.tree.parent(node),
            }
            .filter_map(|id| self.element(id))
        })
    }

    /// Nearest ancestor-or-self element matching `selector`
    pub fn closest(&self, node: NodeId, selector: &Selector) -> Option<NodeId> {
        let mut cur = Some(node);
        while let Some(id) = cur {
            if self.matches(id, selector) {
                return Some(id);
            }
            cur = self.tree.parent(id);
        }
        None
    }

    /// First connected element matching `selector`, in document order
    pub fn query_selector(&self, selector: &Selector) -> Option<NodeId> {
        self.tree
            .descendants(NodeId::ROOT)
            .find(|&id| self.matches(id, selector))
    }

    /// All connected elements matching `selector`, in document order
    pub fn query_selector_all(&self, selector: &Selector) -> Vec<NodeId> {
        self.tree
            .descendants(NodeId::ROOT)
            .filter(|&id| self.matches(id, selector))
            .collect()
    }

    /// True when `ancestor` is `node` or one of its ancestors
    pub fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        self.tree.contains(ancestor, node)
    }

    /// True when the node is reachable from the document root
    pub fn is_connected(&self, node: NodeId) -> bool {
        self.tree.is_connected(node)
    }

    /// Topmost rendered element at a point. Points outside the viewport
    /// never hit.
    ///
    /// Paint order without stacking contexts: document order, descendants
    /// above ancestors, later siblings above earlier ones. The last element
    /// visited whose box contains the point wins. Hidden elements and their
    /// subtrees never hit; zero-area boxes never hit.
    pub fn element_from_point(&self, x: f64, y: f64) -> Option<NodeId> {
        if !self.viewport.contains_point(x, y) {
            return None;
        }
        let mut best = None;
        self.hit_walk(NodeId::ROOT, x, y, &mut best);
        best
    }

    fn hit_walk(&self, node: NodeId, x: f64, y: f64, best: &mut Option<NodeId>) {
        if let Some(elem) = self.element(node) {
            if elem.hidden {
                return;
            }
            if !elem.rect.is_empty() && elem.rect.contains_point(x, y) {
                *best = Some(node);
            }
        }
        for &child in self.tree.children(node) {
            self.hit_walk(child, x, y, best);
        }
    }

    // ------------------------------------------------------------------
    // Mutation records
    // ------------------------------------------------------------------

    /// Drain pending mutation records
    pub fn take_records(&mut self) -> Vec<MutationRecord> {
        std::mem::take(&mut self.records)
    }

    /// Number of undelivered records
    pub fn pending_records(&self) -> usize {
        self.records.len()
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

struct Ancestors<'a> {
    doc: &'a Document,
    cur: Option<NodeId>,
}

impl Iterator for Ancestors<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let id = self.cur?;
        self.cur = self.doc.tree.parent(id);
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sel(s: &str) -> Selector {
        Selector::parse(s).unwrap()
    }

    #[test]
    fn test_query_descendant() {
        let mut doc = Document::new();
        let body = doc.body().unwrap();
        let player = doc.create_element("div");
        let video = doc.create_element("video");
        let stray = doc.create_element("video");
        doc.set_attr(player, "id", "player");
        doc.append_child(body, player);
        doc.append_child(player, video);
        doc.append_child(body, stray);

        assert_eq!(doc.query_selector(&sel("#player video")), Some(video));
        assert_eq!(doc.query_selector_all(&sel("video")), vec![video, stray]);
        assert!(doc.matches(video, &sel("#player video")));
        assert!(!doc.matches(stray, &sel("#player video")));
    }

    #[test]
    fn test_closest() {
        let mut doc = Document::new();
        let body = doc.body().unwrap();
        let outer = doc.create_element("div");
        let inner = doc.create_element("span");
        doc.set_attr(outer, "class", "shell");
        doc.append_child(body, outer);
        doc.append_child(outer, inner);

        assert_eq!(doc.closest(inner, &sel(".shell")), Some(outer));
        assert_eq!(doc.closest(inner, &sel("span")), Some(inner));
        assert_eq!(doc.closest(inner, &sel(".absent")), None);
    }

    #[test]
    fn test_removed_node_not_queried() {
        let mut doc = Document::new();
        let body = doc.body().unwrap();
        let div = doc.create_element("div");
        doc.set_attr(div, "class", "gone");
        doc.append_child(body, div);
        assert!(doc.query_selector(&sel(".gone")).is_some());

        doc.remove(div);
        assert_eq!(doc.query_selector(&sel(".gone")), None);
        assert!(!doc.is_connected(div));
    }

    #[test]
    fn test_element_from_point_topmost_wins() {
        let mut doc = Document::new();
        let body = doc.body().unwrap();
        let under = doc.create_element("div");
        let over = doc.create_element("div");
        doc.append_child(body, under);
        doc.append_child(body, over);
        doc.set_rect(under, Rect::new(0.0, 0.0, 100.0, 100.0));
        doc.set_rect(over, Rect::new(0.0, 0.0, 100.0, 100.0));

        // later sibling paints on top
        assert_eq!(doc.element_from_point(50.0, 50.0), Some(over));

        // hidden elements never hit, nor do their subtrees
        doc.set_hidden(over, true);
        assert_eq!(doc.element_from_point(50.0, 50.0), Some(under));
    }

    #[test]
    fn test_descendant_hits_above_ancestor() {
        let mut doc = Document::new();
        let body = doc.body().unwrap();
        let outer = doc.create_element("div");
        let inner = doc.create_element("div");
        doc.append_child(body, outer);
        doc.append_child(outer, inner);
        doc.set_rect(outer, Rect::new(0.0, 0.0, 200.0, 200.0));
        doc.set_rect(inner, Rect::new(10.0, 10.0, 50.0, 50.0));

        assert_eq!(doc.element_from_point(20.0, 20.0), Some(inner));
        assert_eq!(doc.element_from_point(150.0, 150.0), Some(outer));
    }

    #[test]
    fn test_mutation_records() {
        let mut doc = Document::new();
        let body = doc.body().unwrap();
        let div = doc.create_element("div");
        doc.append_child(body, div);
        doc.set_attr(div, "class", "x");
        doc.remove(div);

        let records = doc.take_records();
        assert_eq!(records.len(), 3);
        assert!(matches!(records[0].kind, MutationKind::ChildList { .. }));
        assert!(matches!(records[1].kind, MutationKind::Attributes { .. }));
        assert!(matches!(records[2].kind, MutationKind::ChildList { .. }));
        assert!(doc.take_records().is_empty());
    }

    #[test]
    fn test_style_changes_record_nothing() {
        let mut doc = Document::new();
        let body = doc.body().unwrap();
        let div = doc.create_element("div");
        doc.append_child(body, div);
        doc.take_records();

        doc.set_rect(div, Rect::new(0.0, 0.0, 10.0, 10.0));
        doc.set_hidden(div, true);
        assert_eq!(doc.pending_records(), 0);
    }
}
