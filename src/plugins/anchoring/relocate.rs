//! Decoration of anchored text: wrap, re-locate, restyle and remove highlight spans.

use std::ops::Range;

use super::flatten::FlatText;
use super::tree::{ContentTree, Element, NodeId};
use super::AnchorError;

pub const DECORATION_CLASS: &str = "text-highlight";
pub const ATTR_ID: &str = "data-hl-id";
pub const ATTR_COLOR: &str = "data-color";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoration {
    pub annotation_id: String,
    pub color: String,
    /// Inline style, e.g. `background-color: rgba(..)`.
    pub style: Option<String>,
}

impl Decoration {
    pub fn new(annotation_id: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            annotation_id: annotation_id.into(),
            color: color.into(),
            style: None,
        }
    }

    pub fn with_style(mut self, style: impl Into<String>) -> Self {
        self.style = Some(style.into());
        self
    }

    pub fn element(&self) -> Element {
        let element = Element::new("span")
            .with_class(DECORATION_CLASS)
            .with_attr(ATTR_ID, self.annotation_id.clone())
            .with_attr(ATTR_COLOR, self.color.clone());
        match &self.style {
            Some(style) => element.with_attr("style", style.clone()),
            None => element,
        }
    }

    fn apply_to(&self, element: &mut Element) {
        element
            .attrs
            .insert(ATTR_COLOR.to_string(), self.color.clone());
        match &self.style {
            Some(style) => {
                element.attrs.insert("style".to_string(), style.clone());
            }
            None => {
                element.attrs.remove("style");
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelocateOutcome {
    Decorated { spans: Vec<NodeId> },
    AlreadyDecorated,
    NotFound,
}

/// Decoration spans under `container`, optionally only those of one annotation.
pub fn decoration_spans(
    tree: &ContentTree,
    container: NodeId,
    annotation_id: Option<&str>,
) -> Vec<NodeId> {
    tree.find_elements(container, |element| {
        element.tag == "span"
            && element.has_class(DECORATION_CLASS)
            && annotation_id.is_none_or(|id| element.attr(ATTR_ID) == Some(id))
    })
}

pub fn is_decorated(tree: &ContentTree, container: NodeId, annotation_id: &str) -> bool {
    !decoration_spans(tree, container, Some(annotation_id)).is_empty()
}

/// Whether the stored text still occurs in the message (whitespace-normalized).
pub fn contains_anchor(tree: &ContentTree, container: NodeId, text: &str) -> bool {
    FlatText::build(tree, container).normalized().contains(text)
}

/// Find `text` in the message below `container` and decorate its first occurrence.
///
/// Repeated calls are no-ops once a span for the annotation exists.
pub fn relocate(
    tree: &mut ContentTree,
    container: NodeId,
    text: &str,
    decoration: &Decoration,
) -> Result<RelocateOutcome, AnchorError> {
    if is_decorated(tree, container, &decoration.annotation_id) {
        return Ok(RelocateOutcome::AlreadyDecorated);
    }

    let flat = FlatText::build(tree, container);
    let Some(range) = flat.normalized().find(text) else {
        return Ok(RelocateOutcome::NotFound);
    };

    let spans = decorate_range(tree, &flat, range, decoration)?;
    if spans.is_empty() {
        return Ok(RelocateOutcome::NotFound);
    }
    Ok(RelocateOutcome::Decorated { spans })
}

/// Wrap every text node slice overlapping the flat `range`. `flat` must describe the current tree.
///
/// Whitespace-only slices (formatting between blocks) are left alone.
pub fn decorate_range(
    tree: &mut ContentTree,
    flat: &FlatText,
    range: Range<usize>,
    decoration: &Decoration,
) -> Result<Vec<NodeId>, AnchorError> {
    let targets: Vec<(NodeId, usize, usize)> = flat
        .segments()
        .iter()
        .filter(|segment| segment.len > 0)
        .filter_map(|segment| {
            let start = range.start.max(segment.start);
            let end = range.end.min(segment.end());
            (start < end).then(|| (segment.node, start - segment.start, end - segment.start))
        })
        .collect();

    let mut spans = Vec::with_capacity(targets.len());
    for (node, start, end) in targets {
        let whitespace_only = tree
            .text(node)
            .map(|text| text.chars().skip(start).take(end - start).all(char::is_whitespace))
            .unwrap_or(true);
        if whitespace_only {
            continue;
        }
        spans.push(tree.wrap_text_slice(node, start, end, decoration.element())?);
    }
    Ok(spans)
}

/// Update color/style of an annotation's spans in place. Returns the number of spans touched.
pub fn restyle(tree: &mut ContentTree, container: NodeId, decoration: &Decoration) -> usize {
    let spans = decoration_spans(tree, container, Some(&decoration.annotation_id));
    for span in &spans {
        if let Some(element) = tree.element_mut(*span) {
            decoration.apply_to(element);
        }
    }
    spans.len()
}

/// Unwrap decoration spans (all of them, or one annotation's). Text content is unchanged.
pub fn remove_decorations(
    tree: &mut ContentTree,
    container: NodeId,
    annotation_id: Option<&str>,
) -> Result<usize, AnchorError> {
    let spans = decoration_spans(tree, container, annotation_id);
    for span in &spans {
        tree.unwrap(*span)?;
    }
    Ok(spans.len())
}
