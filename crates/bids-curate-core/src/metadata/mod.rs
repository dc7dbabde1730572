//! Bulk sidecar field editing and sidecar-to-sidecar merging.

pub mod fields;
pub mod merge;

pub use fields::{list_fields, remove_fields};
pub use merge::{merge_json_into_json, merge_without_overwrite, MergeOutcome};
