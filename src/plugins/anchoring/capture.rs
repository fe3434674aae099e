use std::ops::Range;

use super::flatten::FlatText;
use super::tree::{ContentTree, NodeId};
use super::AnchorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionBoundary {
    pub node: NodeId,
    /// Char offset inside the text node.
    pub offset: usize,
}

impl SelectionBoundary {
    pub fn new(node: NodeId, offset: usize) -> Self {
        Self { node, offset }
    }
}

/// A raw user selection. `start` may come after `end` for backwards drags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionRange {
    pub start: SelectionBoundary,
    pub end: SelectionBoundary,
}

impl SelectionRange {
    pub fn new(start: SelectionBoundary, end: SelectionBoundary) -> Self {
        Self { start, end }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedSelection {
    /// Stripped, block-aware, trimmed text of the selection.
    pub text: String,
    /// Flat position of the selection start within the whole message.
    pub text_offset: usize,
    /// Flat range covered by the selection, used to decorate exactly what was selected.
    pub range: Range<usize>,
}

/// Turn a raw selection inside `container` into anchor data.
pub fn capture_selection(
    tree: &ContentTree,
    container: NodeId,
    selection: &SelectionRange,
) -> Result<CapturedSelection, AnchorError> {
    validate_boundary(tree, container, &selection.start)?;
    validate_boundary(tree, container, &selection.end)?;

    let flat = FlatText::build(tree, container);
    let locate = |boundary: &SelectionBoundary| {
        flat.position_of(boundary.node, boundary.offset)
            .ok_or_else(|| AnchorError::unknown_node("selection boundary was not flattened"))
    };
    let mut start = locate(&selection.start)?;
    let mut end = locate(&selection.end)?;
    if start > end {
        std::mem::swap(&mut start, &mut end);
    }

    let text = flat.extract(start..end);
    if text.is_empty() {
        return Err(AnchorError::empty_selection(
            "selection contains no text once images and code are removed",
        ));
    }

    Ok(CapturedSelection {
        text,
        text_offset: start,
        range: start..end,
    })
}

fn validate_boundary(
    tree: &ContentTree,
    container: NodeId,
    boundary: &SelectionBoundary,
) -> Result<(), AnchorError> {
    if !tree.contains(boundary.node) {
        return Err(AnchorError::unknown_node(format!(
            "node {} does not exist",
            boundary.node.index()
        )));
    }
    if boundary.node == container || !tree.is_within(boundary.node, container) {
        return Err(AnchorError::invalid_boundary(
            "selection boundary is outside the message container",
        ));
    }
    let text = tree
        .text(boundary.node)
        .ok_or_else(|| AnchorError::invalid_boundary("selection boundary is not a text node"))?;
    let len = text.chars().count();
    if boundary.offset > len {
        return Err(AnchorError::invalid_boundary(format!(
            "offset {} past end of text node of length {len}",
            boundary.offset
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::markup::parse_fragment;
    use super::*;

    fn text_node(tree: &ContentTree, needle: &str) -> NodeId {
        tree.descendants(tree.root())
            .into_iter()
            .find(|n| tree.text(*n).is_some_and(|t| t.contains(needle)))
            .unwrap()
    }

    #[test]
    fn test_capture_single_node() {
        let tree = parse_fragment("<p>Well. Hello, world! Bye</p>").unwrap();
        let node = text_node(&tree, "Hello");
        let selection = SelectionRange::new(
            SelectionBoundary::new(node, 6),
            SelectionBoundary::new(node, 18),
        );

        let captured = capture_selection(&tree, tree.root(), &selection).unwrap();
        assert_eq!(captured.text, "Hello, world");
        assert_eq!(captured.text_offset, 6);
        assert_eq!(captured.range, 6..18);
    }

    #[test]
    fn test_capture_across_paragraphs_keeps_paragraph_break() {
        let tree = parse_fragment("<p>first para</p><p>second para</p>").unwrap();
        let first = text_node(&tree, "first");
        let second = text_node(&tree, "second");
        let selection = SelectionRange::new(
            SelectionBoundary::new(first, 6),
            SelectionBoundary::new(second, 6),
        );

        let captured = capture_selection(&tree, tree.root(), &selection).unwrap();
        assert_eq!(captured.text, "para\n\nsecond");
    }

    #[test]
    fn test_backwards_selection_is_normalized() {
        let tree = parse_fragment("<p>abc <b>def</b> ghi</p>").unwrap();
        let a = text_node(&tree, "abc");
        let g = text_node(&tree, "ghi");
        let selection =
            SelectionRange::new(SelectionBoundary::new(g, 2), SelectionBoundary::new(a, 1));

        let captured = capture_selection(&tree, tree.root(), &selection).unwrap();
        assert_eq!(captured.text, "bc def g");
        assert_eq!(captured.text_offset, 1);
    }

    #[test]
    fn test_selection_of_only_code_is_empty() {
        let tree = parse_fragment("<p>a</p><pre><code>let x = 1;</code></pre><p>b</p>").unwrap();
        let code = text_node(&tree, "let x");
        let selection = SelectionRange::new(
            SelectionBoundary::new(code, 0),
            SelectionBoundary::new(code, 5),
        );
        assert!(matches!(
            capture_selection(&tree, tree.root(), &selection),
            Err(AnchorError::EmptySelection { .. })
        ));
    }

    #[test]
    fn test_whitespace_only_selection_is_empty() {
        let tree = parse_fragment("<p>a   b</p>").unwrap();
        let node = text_node(&tree, "a");
        let selection = SelectionRange::new(
            SelectionBoundary::new(node, 1),
            SelectionBoundary::new(node, 4),
        );
        assert!(matches!(
            capture_selection(&tree, tree.root(), &selection),
            Err(AnchorError::EmptySelection { .. })
        ));
    }

    #[test]
    fn test_boundary_outside_container_is_rejected() {
        let tree = parse_fragment("<div class=\"a\">inside</div><div class=\"b\">outside</div>")
            .unwrap();
        let container = tree.children(tree.root())[0];
        let outside = text_node(&tree, "outside");
        let selection = SelectionRange::new(
            SelectionBoundary::new(outside, 0),
            SelectionBoundary::new(outside, 3),
        );
        assert!(matches!(
            capture_selection(&tree, container, &selection),
            Err(AnchorError::InvalidBoundary { .. })
        ));
    }

    #[test]
    fn test_offset_past_end_is_rejected() {
        let tree = parse_fragment("<p>short</p>").unwrap();
        let node = text_node(&tree, "short");
        let selection = SelectionRange::new(
            SelectionBoundary::new(node, 0),
            SelectionBoundary::new(node, 50),
        );
        assert!(matches!(
            capture_selection(&tree, tree.root(), &selection),
            Err(AnchorError::InvalidBoundary { .. })
        ));
    }
}
