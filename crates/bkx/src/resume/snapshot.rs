//! 🧾 Progress snapshots — the per-bucket ledger that survives a crash.
//!
//! 🧠 Knowledge graph:
//! - `ObjectsProgress`: one bucket's counters, high-water mark, and in-flight set.
//! - `ProgressSnapshot`: bucket name → `ObjectsProgress`. JSON on the wire,
//!   camelCase field names, `BTreeMap`/`BTreeSet` so the encoding is stable.
//! - Encoded into `Progress::encoded_resume_info`. Empty string = no prior progress.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::SourceError;

/// 🪣 How far one bucket got.
///
/// Invariants kept by the mutators below:
/// - `processed_count <= total_count`
/// - `is_bucket_processed` only when `processed_count == total_count` with nothing in flight
/// - `last_processed` never moves backwards
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ObjectsProgress {
    pub is_bucket_processed: bool,
    pub processed_count: u64,
    pub total_count: u64,
    /// 🏁 Lexicographically greatest name fully completed.
    pub last_processed: String,
    /// 🛫 Names accepted from the listing but not completed yet.
    pub processing: BTreeSet<String>,
}

impl ObjectsProgress {
    pub fn new(total_count: u64) -> Self {
        Self {
            total_count,
            ..Default::default()
        }
    }

    /// 🔄 Start a fresh tally for this run, keeping the high-water mark and
    /// the names that were still in flight.
    ///
    /// Called the first time a resumed run touches the bucket. The offset the
    /// listing started from already accounts for everything before it. The
    /// carried in-flight names stay until this run lists and completes them
    /// (or [`ObjectsProgress::forget`]s them): while any of them is
    /// outstanding, the offset stays pinned at or below it, even if
    /// `last_processed` sits further along.
    pub fn restart(&mut self, total_count: u64) {
        self.processed_count = 0;
        self.total_count = total_count;
        self.refresh_bucket_processed();
    }

    pub fn mark_processing(&mut self, name: &str) {
        self.processing.insert(name.to_string());
    }

    /// ✅ One object done: leaves the in-flight set, bumps the count, maybe
    /// moves the high-water mark, maybe finishes the bucket.
    pub fn mark_processed(&mut self, name: &str) {
        self.processing.remove(name);

        // ⚠️ saturate: a store that grew between stats and listing must not
        // push the count past the total
        if self.processed_count < self.total_count {
            self.processed_count += 1;
        }
        self.refresh_bucket_processed();

        if name > self.last_processed.as_str() {
            self.last_processed = name.to_string();
        }
    }

    /// 🫥 Drop an in-flight name without counting it. For names the listing
    /// went past without seeing: the object is gone from the store.
    pub fn forget(&mut self, name: &str) {
        if self.processing.remove(name) {
            self.refresh_bucket_processed();
        }
    }

    /// 🏁 Marks a bucket with nothing left to list as done.
    pub fn finish_empty(&mut self) {
        self.processing.clear();
        self.total_count = self.processed_count;
        self.refresh_bucket_processed();
    }

    fn refresh_bucket_processed(&mut self) {
        self.is_bucket_processed =
            self.processed_count == self.total_count && self.processing.is_empty();
    }
}

/// 🗺️ Bucket name → progress. The whole resumable state of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProgressSnapshot {
    pub buckets: BTreeMap<String, ObjectsProgress>,
}

impl ProgressSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// 🧩 Decode a persisted snapshot. Empty input means "nothing to resume".
    pub fn decode(encoded: &str) -> Result<Self, SourceError> {
        if encoded.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_str(encoded)?)
    }

    pub fn encode(&self) -> Result<String, SourceError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn bucket(&self, bucket: &str) -> Option<&ObjectsProgress> {
        self.buckets.get(bucket)
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// ✅ Every bucket we know about is done. Vacuously true when empty.
    pub fn is_complete(&self) -> bool {
        self.buckets.values().all(|p| p.is_bucket_processed)
    }

    pub fn processed_bucket_count(&self) -> usize {
        self.buckets
            .values()
            .filter(|p| p.is_bucket_processed)
            .count()
    }

    pub fn processed_object_count(&self) -> u64 {
        self.buckets.values().map(|p| p.processed_count).sum()
    }

    pub fn in_flight_count(&self) -> usize {
        self.buckets.values().map(|p| p.processing.len()).sum()
    }
}
