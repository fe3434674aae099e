//! Text anchoring: turn selections into content-based anchors and find them again after the
//! host re-renders a message.

pub mod capture;
pub mod error;
pub mod flatten;
pub mod markup;
pub mod relocate;
pub mod tree;

pub use capture::{CapturedSelection, SelectionBoundary, SelectionRange, capture_selection};
pub use error::AnchorError;
pub use flatten::{FlatText, NormalizedText, TextSegment, is_stripped, normalize_whitespace};
pub use relocate::{
    Decoration, RelocateOutcome, contains_anchor, decorate_range, decoration_spans,
    is_decorated, relocate, remove_decorations, restyle,
};
pub use tree::{ContentTree, Element, NodeId, NodeKind};
