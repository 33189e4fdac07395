//! Persisted per-mbox folder index: the summary records plus the optional
//! body word index, validated against the mbox before reuse.

pub mod builder;
pub mod format;

pub use builder::{build_index, load_index};
pub use format::FolderIndex;
