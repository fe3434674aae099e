//! Flatten a message subtree into plain text with a position map back to its text nodes.
//!
//! The same flattening feeds selection capture (offsets + extracted text) and re-location
//! (normalized search over the whole message), so both sides always agree on what "the text of
//! a message" is.

use std::ops::Range;

use super::tree::{ContentTree, Element, NodeId, NodeKind};

const STRIPPED_TAGS: &[&str] = &[
    "img", "style", "script", "pre", "code", "svg", "canvas", "video", "audio", "iframe",
    "object", "embed", "picture", "source",
];

const STRIPPED_CLASSES: &[&str] = &["TH-render", "custom-imageWrapper", "custom-characterImage"];

/// Whether an element is rich (non-text) content that never takes part in anchoring.
pub fn is_stripped(element: &Element) -> bool {
    STRIPPED_TAGS.contains(&element.tag.as_str())
        || element.classes.iter().any(|class| {
            STRIPPED_CLASSES.contains(&class.as_str())
                || class.contains("-render")
                || class.contains("code-block")
        })
}

/// Marker emitted when a block element closes; `None` for inline elements.
fn block_marker(tag: &str) -> Option<&'static str> {
    match tag {
        "p" => Some("\n\n"),
        "div" | "li" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => Some("\n"),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Text,
    Break,
    /// Whitespace directly after a `<br>`; part of the raw text but not of extracted text.
    Swallowed,
}

/// A text node's slice of the flattened stream. Stripped text nodes have `len == 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextSegment {
    pub node: NodeId,
    pub start: usize,
    pub len: usize,
}

impl TextSegment {
    pub fn end(&self) -> usize {
        self.start + self.len
    }
}

#[derive(Debug, Clone, Default)]
pub struct FlatText {
    chars: Vec<char>,
    origins: Vec<Origin>,
    segments: Vec<TextSegment>,
}

impl FlatText {
    /// Flatten everything below `container`. The container itself contributes no block marker.
    pub fn build(tree: &ContentTree, container: NodeId) -> Self {
        let mut flat = Self::default();
        let mut after_break = false;
        for child in tree.children(container) {
            flat.visit(tree, *child, false, &mut after_break);
        }
        flat
    }

    fn visit(&mut self, tree: &ContentTree, id: NodeId, stripped: bool, after_break: &mut bool) {
        match tree.kind(id) {
            Some(NodeKind::Text(text)) => {
                let start = self.chars.len();
                if stripped {
                    self.segments.push(TextSegment {
                        node: id,
                        start,
                        len: 0,
                    });
                    return;
                }
                for c in text.chars() {
                    let origin = if *after_break && c.is_whitespace() {
                        Origin::Swallowed
                    } else {
                        *after_break = false;
                        Origin::Text
                    };
                    self.chars.push(c);
                    self.origins.push(origin);
                }
                self.segments.push(TextSegment {
                    node: id,
                    start,
                    len: self.chars.len() - start,
                });
            }
            Some(NodeKind::Element(element)) => {
                let stripped = stripped || is_stripped(element);
                if !stripped && element.tag == "br" {
                    self.push_break("\n");
                    *after_break = true;
                    return;
                }
                *after_break = false;
                for child in tree.children(id) {
                    self.visit(tree, *child, stripped, after_break);
                }
                if !stripped {
                    if let Some(marker) = block_marker(&element.tag) {
                        self.push_break(marker);
                        *after_break = false;
                    }
                }
            }
            None => {}
        }
    }

    fn push_break(&mut self, marker: &str) {
        for c in marker.chars() {
            self.chars.push(c);
            self.origins.push(Origin::Break);
        }
    }

    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    pub fn segments(&self) -> &[TextSegment] {
        &self.segments
    }

    /// Raw flattened text, virtual breaks included.
    pub fn raw(&self) -> String {
        self.chars.iter().collect()
    }

    /// Flat position of a (text node, char offset) boundary, if the node was visited.
    pub fn position_of(&self, node: NodeId, offset: usize) -> Option<usize> {
        self.segments
            .iter()
            .find(|segment| segment.node == node)
            .map(|segment| segment.start + offset.min(segment.len))
    }

    /// User-facing text of a flat range: swallowed whitespace dropped, 3+ newlines collapsed to
    /// two, then trimmed.
    pub fn extract(&self, range: Range<usize>) -> String {
        let end = range.end.min(self.chars.len());
        let start = range.start.min(end);
        let raw: String = self.chars[start..end]
            .iter()
            .zip(&self.origins[start..end])
            .filter(|(_, origin)| **origin != Origin::Swallowed)
            .map(|(c, _)| *c)
            .collect();
        collapse_newlines(&raw).trim().to_string()
    }

    pub fn normalized(&self) -> NormalizedText {
        let mut text = String::with_capacity(self.chars.len());
        let mut index_map = Vec::with_capacity(self.chars.len());
        let mut in_whitespace = false;

        for (i, c) in self.chars.iter().enumerate() {
            if c.is_whitespace() {
                if !in_whitespace && !index_map.is_empty() {
                    text.push(' ');
                    index_map.push(i);
                    in_whitespace = true;
                }
            } else {
                text.push(*c);
                index_map.push(i);
                in_whitespace = false;
            }
        }
        if text.ends_with(' ') {
            text.pop();
            index_map.pop();
        }

        NormalizedText { text, index_map }
    }
}

/// Whitespace-collapsed message text; `index_map[i]` is the raw flat index of normalized char `i`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedText {
    pub text: String,
    pub index_map: Vec<usize>,
}

impl NormalizedText {
    pub fn contains(&self, needle: &str) -> bool {
        let needle = normalize_whitespace(needle);
        !needle.is_empty() && self.text.contains(&needle)
    }

    /// Raw flat range of the first occurrence of `needle` (whitespace-normalized).
    pub fn find(&self, needle: &str) -> Option<Range<usize>> {
        let needle = normalize_whitespace(needle);
        if needle.is_empty() {
            return None;
        }
        let byte_start = self.text.find(&needle)?;
        let start = self.text[..byte_start].chars().count();
        let end = start + needle.chars().count();

        let raw_start = *self.index_map.get(start)?;
        let raw_end = *self.index_map.get(end - 1)? + 1;
        Some(raw_start..raw_end)
    }
}

/// Collapse every whitespace run to one space and trim both ends.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn collapse_newlines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut run = 0usize;
    for c in text.chars() {
        if c == '\n' {
            run += 1;
            if run <= 2 {
                out.push(c);
            }
        } else {
            run = 0;
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::super::markup::parse_fragment;
    use super::*;

    #[test]
    fn test_block_markers_and_stripping() {
        let tree = parse_fragment(
            "<p>First para</p><p>Second<br>line</p><img src=\"x\"><pre><code>let x;</code></pre><ul><li>item</li></ul>",
        )
        .unwrap();
        let flat = FlatText::build(&tree, tree.root());
        assert_eq!(flat.raw(), "First para\n\nSecond\nline\n\nitem\n");
    }

    #[test]
    fn test_stripped_classes() {
        let tree = parse_fragment(
            "<p>a<span class=\"TH-render\">x</span><div class=\"fancy-render\">y</div><span class=\"my-code-block\">z</span>b</p>",
        )
        .unwrap();
        let flat = FlatText::build(&tree, tree.root());
        assert_eq!(flat.raw(), "ab\n\n");
    }

    #[test]
    fn test_whitespace_after_br_is_swallowed_in_extract() {
        let tree = parse_fragment("<p>one<br>\n   two</p>").unwrap();
        let flat = FlatText::build(&tree, tree.root());
        assert_eq!(flat.extract(0..flat.len()), "one\ntwo");
    }

    #[test]
    fn test_extract_collapses_newlines_and_trims() {
        let tree = parse_fragment("<p>a</p><div></div><p>b</p>").unwrap();
        let flat = FlatText::build(&tree, tree.root());
        assert_eq!(flat.raw(), "a\n\n\nb\n\n");
        assert_eq!(flat.extract(0..flat.len()), "a\n\nb");
    }

    #[test]
    fn test_position_of_stripped_node_is_zero_width() {
        let tree = parse_fragment("<p>ab<code>zz</code>cd</p>").unwrap();
        let flat = FlatText::build(&tree, tree.root());
        let code_text = flat.segments()[1];
        assert_eq!(code_text.len, 0);
        assert_eq!(flat.position_of(code_text.node, 1), Some(2));
    }

    #[test]
    fn test_normalized_find_maps_back_to_raw_range() {
        let tree = parse_fragment("<p>  Hello,\n\n   world </p><p>again</p>").unwrap();
        let flat = FlatText::build(&tree, tree.root());
        let normalized = flat.normalized();
        assert_eq!(normalized.text, "Hello, world again");

        let range = normalized.find("Hello,\nworld").unwrap();
        let raw = flat.raw();
        let slice: String = raw.chars().skip(range.start).take(range.len()).collect();
        assert_eq!(slice, "Hello,\n\n   world");
    }

    #[test]
    fn test_find_across_paragraphs_uses_break_as_space() {
        let tree = parse_fragment("<p>end of one</p><p>start of two</p>").unwrap();
        let normalized = FlatText::build(&tree, tree.root()).normalized();
        assert!(normalized.contains("one\n\nstart"));
        assert!(normalized.find("missing").is_none());
        assert!(normalized.find("   ").is_none());
    }

    #[test]
    fn test_normalize_whitespace() {
        assert_eq!(normalize_whitespace("  a \n\n b\tc "), "a b c");
    }
}
