//! 🧭 Resume offsets — "where do we pick up?" answered per bucket.
//!
//! Pure. No I/O. Same snapshot in, same offsets out. 🦆
//!
//! Per bucket:
//! 1. processed → skip the bucket entirely
//! 2. nothing in flight → resume strictly after `last_processed`
//! 3. something in flight → resume at the smallest in-flight name (inclusive)
//!
//! Case 3 is the interesting one. Everything before the smallest outstanding
//! name is known complete, so starting there replays at most the in-flight set
//! and never skips an unfinished object.

use std::collections::BTreeMap;

use crate::common::ObjectKey;
use crate::error::SourceError;
use crate::resume::snapshot::ProgressSnapshot;

/// 📍 Where one bucket's listing should start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OffsetInfo {
    /// ✅ Skip the bucket, all of it was done.
    BucketProcessed,
    /// ⏭️ Resume strictly after this name. Empty = from the very beginning.
    ResumeAfter(String),
    /// 🔁 Resume at this name, inclusive. It was in flight when the snapshot was taken.
    ResumeFrom(String),
}

impl OffsetInfo {
    pub fn is_bucket_processed(&self) -> bool {
        matches!(self, OffsetInfo::BucketProcessed)
    }

    /// 🏷️ The name the offset pivots on, if the bucket isn't skipped.
    pub fn last_processed_object(&self) -> Option<&str> {
        match self {
            OffsetInfo::BucketProcessed => None,
            OffsetInfo::ResumeAfter(name) | OffsetInfo::ResumeFrom(name) => Some(name),
        }
    }

    /// 🙈 Is `name` already accounted for by this offset?
    pub fn covers(&self, name: &str) -> bool {
        match self {
            OffsetInfo::BucketProcessed => true,
            OffsetInfo::ResumeAfter(last) => name <= last.as_str(),
            OffsetInfo::ResumeFrom(first_unfinished) => name < first_unfinished.as_str(),
        }
    }
}

/// 🗺️ Bucket → offset. Buckets absent from the map start from scratch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResumeOffsets {
    offsets: BTreeMap<String, OffsetInfo>,
}

impl ResumeOffsets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, bucket: &str) -> Option<&OffsetInfo> {
        self.offsets.get(bucket)
    }

    pub fn insert(&mut self, bucket: impl Into<String>, offset: OffsetInfo) {
        self.offsets.insert(bucket.into(), offset);
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &OffsetInfo)> {
        self.offsets.iter()
    }

    /// ⏭️ Should the listing skip this whole bucket?
    pub fn skips_bucket(&self, bucket: &str) -> bool {
        self.get(bucket).is_some_and(OffsetInfo::is_bucket_processed)
    }

    /// 🙈 Was this object finished by a previous run?
    pub fn covers(&self, key: &ObjectKey) -> bool {
        self.get(&key.bucket)
            .is_some_and(|offset| offset.covers(&key.name))
    }
}

/// 🧭 Turn a snapshot into per-bucket starting points.
pub fn compute_resume_offsets(snapshot: &ProgressSnapshot) -> ResumeOffsets {
    let mut the_offsets = ResumeOffsets::new();
    for (bucket, progress) in &snapshot.buckets {
        let the_offset = if progress.is_bucket_processed {
            OffsetInfo::BucketProcessed
        } else {
            // 🧠 BTreeSet iterates in order, so `first` is the lexicographic minimum
            match progress.processing.first() {
                Some(first_in_flight) => OffsetInfo::ResumeFrom(first_in_flight.clone()),
                None => OffsetInfo::ResumeAfter(progress.last_processed.clone()),
            }
        };
        the_offsets.insert(bucket.clone(), the_offset);
    }
    the_offsets
}

/// 🧩 Decode then compute. A decode failure is a `Serialization` error and the
/// caller is expected to start fresh instead of giving up.
pub fn resume_offsets_from_encoded(encoded: &str) -> Result<ResumeOffsets, SourceError> {
    let the_snapshot = ProgressSnapshot::decode(encoded)?;
    Ok(compute_resume_offsets(&the_snapshot))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resume::snapshot::ObjectsProgress;

    fn bucket(
        is_bucket_processed: bool,
        processed_count: u64,
        total_count: u64,
        last_processed: &str,
        processing: &[&str],
    ) -> ObjectsProgress {
        ObjectsProgress {
            is_bucket_processed,
            processed_count,
            total_count,
            last_processed: last_processed.to_string(),
            processing: processing.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn snapshot_of(buckets: Vec<(&str, ObjectsProgress)>) -> ProgressSnapshot {
        ProgressSnapshot {
            buckets: buckets
                .into_iter()
                .map(|(name, progress)| (name.to_string(), progress))
                .collect(),
        }
    }

    #[test]
    fn the_one_where_the_smallest_in_flight_name_wins_over_last_processed() {
        let the_snapshot = snapshot_of(vec![("bkt", bucket(false, 3, 5, "c", &["d", "b"]))]);
        let the_offsets = compute_resume_offsets(&the_snapshot);
        let the_offset = the_offsets.get("bkt").expect("💀 bucket should have an offset");
        assert_eq!(the_offset, &OffsetInfo::ResumeFrom("b".into()));
        assert_eq!(the_offset.last_processed_object(), Some("b"));
        assert!(!the_offset.is_bucket_processed());
    }

    #[test]
    fn the_one_where_a_processed_bucket_is_skipped_no_matter_what() {
        let the_snapshot = snapshot_of(vec![("done", bucket(true, 1, 9, "zzz", &["a", "b"]))]);
        let the_offsets = compute_resume_offsets(&the_snapshot);
        assert_eq!(the_offsets.get("done"), Some(&OffsetInfo::BucketProcessed));
        assert!(the_offsets.skips_bucket("done"));
        assert_eq!(
            the_offsets.get("done").and_then(OffsetInfo::last_processed_object),
            None
        );
    }

    #[test]
    fn the_one_where_nothing_in_flight_resumes_after_the_high_water_mark() {
        let the_snapshot = snapshot_of(vec![("bkt", bucket(false, 2, 5, "m", &[]))]);
        let the_offsets = compute_resume_offsets(&the_snapshot);
        assert_eq!(the_offsets.get("bkt"), Some(&OffsetInfo::ResumeAfter("m".into())));
    }

    #[test]
    fn the_one_where_the_same_snapshot_always_gives_the_same_answer() {
        let the_snapshot = snapshot_of(vec![
            ("a", bucket(false, 3, 5, "c", &["q", "b", "x"])),
            ("b", bucket(true, 4, 4, "d", &[])),
            ("c", bucket(false, 0, 2, "", &[])),
        ]);
        let the_first = compute_resume_offsets(&the_snapshot);
        for _ in 0..10 {
            assert_eq!(compute_resume_offsets(&the_snapshot), the_first);
        }
        assert_eq!(the_first.len(), 3);
    }

    #[test]
    fn the_one_where_coverage_respects_inclusive_and_exclusive_edges() {
        let the_after = OffsetInfo::ResumeAfter("m".into());
        assert!(the_after.covers("a"));
        assert!(the_after.covers("m"));
        assert!(!the_after.covers("n"));

        let the_from = OffsetInfo::ResumeFrom("m".into());
        assert!(the_from.covers("a"));
        assert!(!the_from.covers("m"));
        assert!(!the_from.covers("n"));

        let the_fresh = OffsetInfo::ResumeAfter(String::new());
        assert!(!the_fresh.covers("a"));
    }

    #[test]
    fn the_one_where_unknown_buckets_are_never_covered() {
        let mut the_offsets = ResumeOffsets::new();
        the_offsets.insert("known", OffsetInfo::BucketProcessed);
        assert!(the_offsets.covers(&ObjectKey::new("known", "anything")));
        assert!(!the_offsets.covers(&ObjectKey::new("stranger", "anything")));
        assert!(!the_offsets.skips_bucket("stranger"));
    }

    #[test]
    fn the_one_where_encoded_input_round_trips_into_offsets() {
        let the_snapshot = snapshot_of(vec![("bkt", bucket(false, 3, 5, "c", &["b", "d"]))]);
        let the_encoded = the_snapshot.encode().expect("💀 encode");
        let the_offsets = resume_offsets_from_encoded(&the_encoded).expect("💀 decode");
        assert_eq!(the_offsets.get("bkt"), Some(&OffsetInfo::ResumeFrom("b".into())));
        assert!(resume_offsets_from_encoded("").expect("💀 empty").is_empty());
    }

    #[test]
    fn the_one_where_a_mangled_snapshot_is_reported_not_swallowed() {
        let the_result = resume_offsets_from_encoded("[1,2,3");
        assert!(matches!(the_result, Err(SourceError::Serialization(_))));
    }
}
