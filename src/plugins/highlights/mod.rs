//! Annotation store, color model and backup import/export.
//!
//! Orchestration against the host lives in `crate::services::session`.

mod error;
pub mod ordering;
pub mod palette;
pub mod repair;
pub mod store;
pub mod transfer;
pub mod types;

pub use error::HighlightError;
pub use ordering::OwnerDirectory;
pub use palette::{ColorSlot, PaletteSettings, Preset, PresetBackup, RemapReport};
pub use repair::{repair_index, repair_settings};
pub use store::{
    AnnotationPatch, HighlightStore, LookupHints, MoveOutcome, NewAnnotation, SettingsSink,
    StoreEvent, StoreSubscription, TabCounts,
};
pub use transfer::{ExportScope, ImportMode, ImportReport};
pub use types::{
    Annotation, AnnotationSort, Bucket, BucketKey, DeleteMode, HighlightIndex, ListSort,
    Preferences, Settings, SortOptions,
};
