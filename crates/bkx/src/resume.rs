//! 🔁 Resume — remembering where we were when the lights went out.
//!
//! 🎬 *[a process dies mid-bucket. a new one wakes up. it has questions.]*
//!
//! Three pieces, one job:
//! - [`snapshot`]: the per-bucket `ObjectsProgress` map that gets persisted.
//! - [`offsets`]: the pure function that turns a snapshot into "skip this bucket"
//!   or "resume at this name".
//! - [`cache_manager`]: the synchronized aggregate that records completions,
//!   keeps the snapshot honest, and decides when it's worth persisting.
//!
//! 🧠 Knowledge graph:
//! - The snapshot is the canonical resumable state. It is what ends up in
//!   `Progress::encoded_resume_info`.
//! - The processed-key cache is run-local and never persisted. It dedupes
//!   within a run and drives the persistence threshold.
//! - Offsets feed both the store (where to start listing) and the cache's
//!   `exists` check (in case the store ignores them).

pub mod cache_manager;
pub mod offsets;
pub mod snapshot;

pub use cache_manager::{CacheManager, Completion, DEFAULT_CACHE_THRESHOLD, cache_threshold};
pub use offsets::{OffsetInfo, ResumeOffsets, compute_resume_offsets, resume_offsets_from_encoded};
pub use snapshot::{ObjectsProgress, ProgressSnapshot};
