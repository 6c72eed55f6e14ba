//! Results storage
//!
//! Persists per-key summaries and the combined results table.

mod storage;

pub use storage::ArtifactStore;
