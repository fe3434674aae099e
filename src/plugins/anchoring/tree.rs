//! Arena-backed content tree standing in for a rendered message subtree.
//!
//! Hosts mirror the rendered markup of a message into a `ContentTree`; the anchoring engine
//! only ever reads text and wraps/unwraps inline decoration elements, so the text content of a
//! tree is invariant under every mutation exposed here.

use std::collections::BTreeMap;

use super::AnchorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub tag: String,
    pub classes: Vec<String>,
    pub attrs: BTreeMap<String, String>,
}

impl Element {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into().to_ascii_lowercase(),
            classes: Vec::new(),
            attrs: BTreeMap::new(),
        }
    }

    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.classes.push(class.into());
        self
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.insert(name.into(), value.into());
        self
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes.iter().any(|c| c == class)
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

#[derive(Debug, Clone)]
pub struct ContentTree {
    nodes: Vec<Node>,
    /// Slots of detached nodes, reused by the next allocation.
    free: Vec<usize>,
    root: NodeId,
}

impl ContentTree {
    pub fn new(root: Element) -> Self {
        Self {
            nodes: vec![Node {
                kind: NodeKind::Element(root),
                parent: None,
                children: Vec::new(),
            }],
            free: Vec::new(),
            root: NodeId(0),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Append an element under `parent`. Children of text nodes are never visited.
    pub fn append_element(&mut self, parent: NodeId, element: Element) -> NodeId {
        let id = self.alloc(NodeKind::Element(element), Some(parent));
        if let Some(node) = self.nodes.get_mut(parent.0) {
            node.children.push(id);
        }
        id
    }

    pub fn append_text(&mut self, parent: NodeId, text: impl Into<String>) -> NodeId {
        let id = self.alloc(NodeKind::Text(text.into()), Some(parent));
        if let Some(node) = self.nodes.get_mut(parent.0) {
            node.children.push(id);
        }
        id
    }

    pub fn contains(&self, id: NodeId) -> bool {
        id.0 < self.nodes.len() && !self.free.contains(&id.0)
    }

    /// Number of arena slots, live or free.
    pub fn slot_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn kind(&self, id: NodeId) -> Option<&NodeKind> {
        self.nodes.get(id.0).map(|n| &n.kind)
    }

    pub fn element(&self, id: NodeId) -> Option<&Element> {
        match self.kind(id) {
            Some(NodeKind::Element(element)) => Some(element),
            _ => None,
        }
    }

    pub fn element_mut(&mut self, id: NodeId) -> Option<&mut Element> {
        match self.nodes.get_mut(id.0).map(|n| &mut n.kind) {
            Some(NodeKind::Element(element)) => Some(element),
            _ => None,
        }
    }

    pub fn text(&self, id: NodeId) -> Option<&str> {
        match self.kind(id) {
            Some(NodeKind::Text(text)) => Some(text.as_str()),
            _ => None,
        }
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id.0).and_then(|n| n.parent)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.nodes
            .get(id.0)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    /// Whether `id` is `ancestor` or lives somewhere below it.
    pub fn is_within(&self, id: NodeId, ancestor: NodeId) -> bool {
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            if current == ancestor {
                return true;
            }
            cursor = self.parent(current);
        }
        false
    }

    /// Pre-order walk of the subtree rooted at `id` (including `id`).
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if !self.contains(current) {
                continue;
            }
            out.push(current);
            for child in self.children(current).iter().rev() {
                stack.push(*child);
            }
        }
        out
    }

    pub fn text_content(&self, id: NodeId) -> String {
        self.descendants(id)
            .into_iter()
            .filter_map(|n| self.text(n))
            .collect()
    }

    /// First element in the subtree of `id` matching `predicate`, in document order.
    pub fn find_element<F>(&self, id: NodeId, predicate: F) -> Option<NodeId>
    where
        F: Fn(&Element) -> bool,
    {
        self.descendants(id)
            .into_iter()
            .find(|n| self.element(*n).is_some_and(&predicate))
    }

    pub fn find_elements<F>(&self, id: NodeId, predicate: F) -> Vec<NodeId>
    where
        F: Fn(&Element) -> bool,
    {
        self.descendants(id)
            .into_iter()
            .filter(|n| self.element(*n).is_some_and(&predicate))
            .collect()
    }

    /// Split the text node `node` at the char range `start..end` and move the middle slice into a
    /// new `wrapper` element. Returns the wrapper id.
    pub fn wrap_text_slice(
        &mut self,
        node: NodeId,
        start: usize,
        end: usize,
        wrapper: Element,
    ) -> Result<NodeId, AnchorError> {
        let text = self
            .text(node)
            .ok_or_else(|| AnchorError::unknown_node("wrap target is not a text node"))?
            .to_string();
        let parent = self
            .parent(node)
            .ok_or_else(|| AnchorError::unknown_node("wrap target is detached"))?;

        let len = text.chars().count();
        if start >= end || end > len {
            return Err(AnchorError::invalid_boundary(format!(
                "slice {start}..{end} outside text node of length {len}"
            )));
        }

        let start_byte = byte_index(&text, start);
        let end_byte = byte_index(&text, end);
        let before = &text[..start_byte];
        let middle = &text[start_byte..end_byte];
        let after = &text[end_byte..];

        let mut replacement = Vec::with_capacity(3);
        if !before.is_empty() {
            replacement.push(self.alloc(NodeKind::Text(before.to_string()), Some(parent)));
        }
        let span = self.alloc(NodeKind::Element(wrapper), Some(parent));
        let inner = self.alloc(NodeKind::Text(middle.to_string()), Some(span));
        self.nodes[span.0].children.push(inner);
        replacement.push(span);
        if !after.is_empty() {
            replacement.push(self.alloc(NodeKind::Text(after.to_string()), Some(parent)));
        }

        self.replace_child(parent, node, replacement)?;
        self.release(node);
        Ok(span)
    }

    /// Replace `element` with its children, then merge adjacent text siblings.
    pub fn unwrap(&mut self, element: NodeId) -> Result<(), AnchorError> {
        if self.element(element).is_none() {
            return Err(AnchorError::unknown_node("unwrap target is not an element"));
        }
        let parent = self
            .parent(element)
            .ok_or_else(|| AnchorError::unknown_node("cannot unwrap the tree root"))?;

        let children = std::mem::take(&mut self.nodes[element.0].children);
        for child in &children {
            self.nodes[child.0].parent = Some(parent);
        }
        self.replace_child(parent, element, children)?;
        self.release(element);
        self.merge_adjacent_text(parent);
        Ok(())
    }

    fn merge_adjacent_text(&mut self, parent: NodeId) {
        let children = std::mem::take(&mut self.nodes[parent.0].children);
        let mut merged: Vec<NodeId> = Vec::with_capacity(children.len());

        for child in children {
            let child_text = self.text(child).map(str::to_string);
            let previous_is_text = merged.last().is_some_and(|prev| self.text(*prev).is_some());

            match (child_text, previous_is_text, merged.last().copied()) {
                (Some(text), true, Some(prev)) => {
                    if let NodeKind::Text(existing) = &mut self.nodes[prev.0].kind {
                        existing.push_str(&text);
                    }
                    self.release(child);
                }
                _ => merged.push(child),
            }
        }

        self.nodes[parent.0].children = merged;
    }

    fn replace_child(
        &mut self,
        parent: NodeId,
        old: NodeId,
        replacement: Vec<NodeId>,
    ) -> Result<(), AnchorError> {
        let position = self.nodes[parent.0]
            .children
            .iter()
            .position(|c| *c == old)
            .ok_or_else(|| AnchorError::unknown_node("node is not a child of its parent"))?;

        self.nodes[parent.0]
            .children
            .splice(position..=position, replacement);
        self.nodes[old.0].parent = None;
        Ok(())
    }

    fn alloc(&mut self, kind: NodeKind, parent: Option<NodeId>) -> NodeId {
        let node = Node {
            kind,
            parent,
            children: Vec::new(),
        };
        match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = node;
                NodeId(slot)
            }
            None => {
                self.nodes.push(node);
                NodeId(self.nodes.len() - 1)
            }
        }
    }

    /// Return a detached node's slot to the free list. Its children must already be moved.
    fn release(&mut self, id: NodeId) {
        if id == self.root || self.free.contains(&id.0) {
            return;
        }
        if let Some(node) = self.nodes.get_mut(id.0) {
            node.kind = NodeKind::Text(String::new());
            node.parent = None;
            node.children.clear();
            self.free.push(id.0);
        }
    }
}

pub(crate) fn byte_index(text: &str, char_index: usize) -> usize {
    text.char_indices()
        .nth(char_index)
        .map(|(b, _)| b)
        .unwrap_or(text.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (ContentTree, NodeId, NodeId) {
        let mut tree = ContentTree::new(Element::new("div").with_class("mes_text"));
        let p = tree.append_element(tree.root(), Element::new("P"));
        let text = tree.append_text(p, "Say Hello, world now");
        (tree, p, text)
    }

    #[test]
    fn test_wrap_text_slice_splits_node() {
        let (mut tree, p, text) = sample();
        let span = tree
            .wrap_text_slice(text, 4, 16, Element::new("span").with_class("hl"))
            .unwrap();

        assert_eq!(tree.children(p).len(), 3);
        assert_eq!(tree.text_content(span), "Hello, world");
        assert_eq!(tree.text_content(tree.root()), "Say Hello, world now");
        assert_eq!(tree.parent(text), None);
    }

    #[test]
    fn test_wrap_whole_node_has_no_empty_siblings() {
        let (mut tree, p, text) = sample();
        tree.wrap_text_slice(text, 0, 20, Element::new("span")).unwrap();
        assert_eq!(tree.children(p).len(), 1);
    }

    #[test]
    fn test_wrap_rejects_bad_range() {
        let (mut tree, _, text) = sample();
        assert!(matches!(
            tree.wrap_text_slice(text, 5, 5, Element::new("span")),
            Err(AnchorError::InvalidBoundary { .. })
        ));
        assert!(matches!(
            tree.wrap_text_slice(text, 0, 99, Element::new("span")),
            Err(AnchorError::InvalidBoundary { .. })
        ));
    }

    #[test]
    fn test_unwrap_restores_single_text_node() {
        let (mut tree, p, text) = sample();
        let span = tree.wrap_text_slice(text, 4, 9, Element::new("span")).unwrap();
        tree.unwrap(span).unwrap();

        let children = tree.children(p);
        assert_eq!(children.len(), 1);
        assert_eq!(tree.text(children[0]), Some("Say Hello, world now"));
    }

    #[test]
    fn test_redecorating_reuses_detached_slots() {
        let (mut tree, p, mut text) = sample();
        let span = tree.wrap_text_slice(text, 4, 16, Element::new("span")).unwrap();
        tree.unwrap(span).unwrap();
        let settled = tree.slot_count();

        for _ in 0..50 {
            text = tree.children(p)[0];
            let span = tree.wrap_text_slice(text, 4, 16, Element::new("span")).unwrap();
            assert!(!tree.contains(text));
            tree.unwrap(span).unwrap();
        }

        assert_eq!(tree.slot_count(), settled);
        assert_eq!(tree.children(p).len(), 1);
        assert_eq!(tree.text_content(tree.root()), "Say Hello, world now");
    }

    #[test]
    fn test_multibyte_offsets_are_chars() {
        let mut tree = ContentTree::new(Element::new("div"));
        let text = tree.append_text(tree.root(), "안녕하세요 world");
        let span = tree.wrap_text_slice(text, 2, 5, Element::new("span")).unwrap();
        assert_eq!(tree.text_content(span), "하세요");
    }

    #[test]
    fn test_is_within() {
        let (tree, p, text) = sample();
        assert!(tree.is_within(text, tree.root()));
        assert!(tree.is_within(text, p));
        assert!(!tree.is_within(p, text));
    }
}
