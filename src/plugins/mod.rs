//! Internal "plugin" modules (crate-local sub-systems).
//!
//! Host-independent: nothing here knows which chat application is driving it.

pub mod anchoring;
pub mod highlights;
