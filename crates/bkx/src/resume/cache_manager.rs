//! 🗃️ The cache manager — one lock, one truth about what this run has done.
//!
//! Holds the run-local processed-key set (dedupe plus the persistence counter)
//! and the per-bucket [`ProgressSnapshot`] that gets persisted. Both change
//! together under a single `parking_lot` mutex, so a snapshot never disagrees
//! with the counter that triggered it.
//!
//! 🧠 The processed-key set is never persisted. What survives a crash is the
//! snapshot; the next run turns it into [`ResumeOffsets`] and `exists` answers
//! from those for anything finished before the process started.

use std::collections::{BTreeSet, HashMap, HashSet};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::backends::ObjectStats;
use crate::common::ObjectKey;
use crate::error::SourceError;
use crate::resume::offsets::{ResumeOffsets, compute_resume_offsets};
use crate::resume::snapshot::{ObjectsProgress, ProgressSnapshot};

/// 📏 Persist every 1% of the run's objects.
pub const DEFAULT_CACHE_THRESHOLD: f64 = 0.01;

/// 📏 `floor(total * 1%)`. Caching only kicks in above 1.
pub fn cache_threshold(total_objects: u64) -> u64 {
    (total_objects as f64 * DEFAULT_CACHE_THRESHOLD).floor() as u64
}

/// 🧾 What happened when one object was completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// Distinct keys recorded this run, this one included.
    pub processed: u64,
    /// False when the key had already been completed this run.
    pub newly_processed: bool,
    /// 💾 The encoded snapshot, when this completion crossed a threshold multiple.
    pub persist: Option<String>,
}

#[derive(Debug, Default)]
struct CacheState {
    cache: HashSet<ObjectKey>,
    snapshot: ProgressSnapshot,
    /// 🪣 Buckets whose tally already belongs to this run.
    touched: HashSet<String>,
    /// 🧳 In-flight names inherited from the prior run, per bucket, that this
    /// run's listing hasn't reached yet.
    carried: HashMap<String, BTreeSet<String>>,
}

#[derive(Debug)]
pub struct CacheManager {
    threshold: u64,
    total_objects: u64,
    stats: ObjectStats,
    offsets: ResumeOffsets,
    state: Mutex<CacheState>,
}

impl CacheManager {
    /// 🏗️ Build from the prior snapshot and what the store says is left.
    ///
    /// - buckets new to this run start a fresh tally right away
    /// - prior buckets keep their old state until the listing touches them
    /// - prior unfinished buckets with nothing left to list are done now
    pub fn new(threshold: u64, prior: ProgressSnapshot, stats: &ObjectStats) -> Self {
        let the_offsets = compute_resume_offsets(&prior);
        let mut the_state = CacheState {
            snapshot: prior,
            ..Default::default()
        };

        for (bucket, progress) in the_state.snapshot.buckets.iter_mut() {
            if !progress.is_bucket_processed && stats.bucket_total(bucket) == 0 {
                debug!("🏁 bucket '{}' has nothing left to list, calling it done", bucket);
                progress.restart(0);
                progress.finish_empty();
            }
        }
        for (bucket, total) in &stats.bucket_objects {
            if !the_state.snapshot.buckets.contains_key(bucket) {
                the_state
                    .snapshot
                    .buckets
                    .insert(bucket.clone(), ObjectsProgress::new(*total));
                the_state.touched.insert(bucket.clone());
            }
        }

        Self {
            threshold,
            total_objects: stats.num_objects,
            stats: stats.clone(),
            offsets: the_offsets,
            state: Mutex::new(the_state),
        }
    }

    /// 🏗️ Same as [`CacheManager::new`] with the default 1% threshold.
    pub fn for_stats(prior: ProgressSnapshot, stats: &ObjectStats) -> Self {
        Self::new(cache_threshold(stats.num_objects), prior, stats)
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    pub fn caching_enabled(&self) -> bool {
        self.threshold > 1
    }

    pub fn total_objects(&self) -> u64 {
        self.total_objects
    }

    pub fn offsets(&self) -> &ResumeOffsets {
        &self.offsets
    }

    /// 🔎 Done already, either this run or by a run before it?
    pub fn exists(&self, key: &ObjectKey) -> bool {
        self.offsets.covers(key) || self.state.lock().cache.contains(key)
    }

    /// ✍️ Record a key. Idempotent.
    pub fn set(&self, key: ObjectKey) {
        self.state.lock().cache.insert(key);
    }

    /// 💾 The encoded snapshot if the distinct count sits on a threshold multiple.
    pub fn should_persist(&self) -> Option<String> {
        let the_state = self.state.lock();
        self.persist_if_due(&the_state)
    }

    /// 🧹 Forget the processed keys. The snapshot stays.
    pub fn flush(&self) {
        self.state.lock().cache.clear();
    }

    /// 🛫 An object was accepted from the listing and is about to be queued.
    ///
    /// The first touch of a prior bucket restarts its tally. Names the prior
    /// run left in flight stay in flight until the listing reaches them: a
    /// carried name below `key` was not listed, so it is gone and forgotten.
    pub fn mark_processing(&self, key: &ObjectKey) {
        let mut the_state = self.state.lock();
        let CacheState {
            snapshot,
            touched,
            carried,
            ..
        } = &mut *the_state;

        if !touched.contains(&key.bucket) {
            let the_total = self.stats.bucket_total(&key.bucket);
            let the_progress = snapshot
                .buckets
                .entry(key.bucket.clone())
                .or_insert_with(|| ObjectsProgress::new(the_total));
            the_progress.restart(the_total);
            if !the_progress.processing.is_empty() {
                carried.insert(key.bucket.clone(), the_progress.processing.clone());
            }
            touched.insert(key.bucket.clone());
        }

        let Some(progress) = snapshot.buckets.get_mut(&key.bucket) else {
            return;
        };
        if let Some(the_carried) = carried.get_mut(&key.bucket) {
            while let Some(the_first) = the_carried.first().cloned() {
                if the_first.as_str() >= key.name.as_str() {
                    break;
                }
                debug!("🫥 {}/{} was in flight last run but is gone now", key.bucket, the_first);
                the_carried.remove(&the_first);
                progress.forget(&the_first);
            }
            the_carried.remove(&key.name);
            if the_carried.is_empty() {
                carried.remove(&key.bucket);
            }
        }
        progress.mark_processing(&key.name);
    }

    /// 🏁 The listing ran to its end. Carried names it never reached are gone
    /// from the store and no longer hold their buckets open.
    pub fn listing_finished(&self) {
        let mut the_state = self.state.lock();
        let CacheState {
            snapshot, carried, ..
        } = &mut *the_state;
        for (bucket, names) in carried.drain() {
            if let Some(progress) = snapshot.buckets.get_mut(&bucket) {
                for name in &names {
                    debug!("🫥 {}/{} was in flight last run but is gone now", bucket, name);
                    progress.forget(name);
                }
            }
        }
    }

    /// ✅ One object fully emitted. Records it, updates its bucket, and decides
    /// whether this is the moment to persist, all under one lock.
    pub fn complete(&self, key: &ObjectKey) -> Completion {
        self.complete_then(key, |_| {})
    }

    /// ✅ [`CacheManager::complete`], with `record` called before the lock is
    /// released. Completions reach `record` in counter order, so whatever it
    /// writes (the progress record, say) sees every persistence point.
    pub fn complete_then(&self, key: &ObjectKey, record: impl FnOnce(&Completion)) -> Completion {
        let mut the_state = self.state.lock();
        let the_newly_processed = the_state.cache.insert(key.clone());
        if let Some(progress) = the_state.snapshot.buckets.get_mut(&key.bucket) {
            if the_newly_processed {
                progress.mark_processed(&key.name);
            } else {
                progress.forget(&key.name);
            }
        }
        let the_persist = if the_newly_processed {
            self.persist_if_due(&the_state)
        } else {
            None
        };
        let the_completion = Completion {
            processed: the_state.cache.len() as u64,
            newly_processed: the_newly_processed,
            persist: the_persist,
        };
        record(&the_completion);
        the_completion
    }

    /// 🔢 Distinct keys recorded this run.
    pub fn processed(&self) -> u64 {
        self.state.lock().cache.len() as u64
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.state.lock().snapshot.clone()
    }

    pub fn encoded_snapshot(&self) -> Result<String, SourceError> {
        self.state.lock().snapshot.encode()
    }

    /// ✅ Every bucket in the snapshot is finished.
    pub fn is_complete(&self) -> bool {
        self.state.lock().snapshot.is_complete()
    }

    fn persist_if_due(&self, state: &CacheState) -> Option<String> {
        let the_count = state.cache.len() as u64;
        if !self.caching_enabled() || the_count == 0 || the_count % self.threshold != 0 {
            return None;
        }
        match state.snapshot.encode() {
            Ok(encoded) => Some(encoded),
            Err(e) => {
                warn!("⚠️ could not encode the progress snapshot, skipping this save: {e}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resume::offsets::OffsetInfo;

    fn stats_of(buckets: &[(&str, u64)]) -> ObjectStats {
        let mut the_stats = ObjectStats::default();
        for (bucket, total) in buckets {
            the_stats.bucket_objects.insert(bucket.to_string(), *total);
            the_stats.num_objects += total;
        }
        the_stats.num_buckets = buckets.len() as u64;
        the_stats
    }

    fn key(bucket: &str, name: &str) -> ObjectKey {
        ObjectKey::new(bucket, name)
    }

    #[test]
    fn the_one_where_the_threshold_is_one_percent_rounded_down() {
        assert_eq!(cache_threshold(0), 0);
        assert_eq!(cache_threshold(10), 0);
        assert_eq!(cache_threshold(199), 1);
        assert_eq!(cache_threshold(250), 2);
        assert_eq!(cache_threshold(1_000), 10);
    }

    #[test]
    fn the_one_where_persistence_fires_on_every_threshold_multiple() {
        let the_stats = stats_of(&[("b", 1_000)]);
        let the_cache = CacheManager::for_stats(ProgressSnapshot::new(), &the_stats);
        assert_eq!(the_cache.threshold(), 10);
        assert!(the_cache.caching_enabled());

        let mut the_fired_at = Vec::new();
        for i in 0..35 {
            let the_key = key("b", &format!("obj-{i:04}"));
            the_cache.mark_processing(&the_key);
            if the_cache.complete(&the_key).persist.is_some() {
                the_fired_at.push(i + 1);
            }
        }
        assert_eq!(the_fired_at, vec![10, 20, 30]);
    }

    #[test]
    fn the_one_where_should_persist_agrees_with_the_counter() {
        let the_cache = CacheManager::new(2, ProgressSnapshot::new(), &stats_of(&[("b", 300)]));
        assert_eq!(the_cache.should_persist(), None);
        the_cache.set(key("b", "1"));
        assert_eq!(the_cache.should_persist(), None);
        the_cache.set(key("b", "2"));
        assert!(the_cache.should_persist().is_some());
        the_cache.set(key("b", "3"));
        assert_eq!(the_cache.should_persist(), None);
    }

    #[test]
    fn the_one_where_setting_twice_counts_once() {
        let the_cache = CacheManager::new(2, ProgressSnapshot::new(), &stats_of(&[("b", 300)]));
        the_cache.set(key("b", "k"));
        the_cache.set(key("b", "k"));
        assert_eq!(the_cache.processed(), 1);
        assert!(the_cache.exists(&key("b", "k")));

        let the_again = the_cache.complete(&key("b", "k"));
        assert!(!the_again.newly_processed);
        assert_eq!(the_again.processed, 1);
        assert_eq!(the_again.persist, None);
    }

    #[test]
    fn the_one_where_a_threshold_of_one_or_zero_never_persists() {
        for the_threshold in [0, 1] {
            let the_cache =
                CacheManager::new(the_threshold, ProgressSnapshot::new(), &stats_of(&[("b", 10)]));
            assert!(!the_cache.caching_enabled());
            for i in 0..10 {
                let the_key = key("b", &i.to_string());
                the_cache.mark_processing(&the_key);
                assert_eq!(the_cache.complete(&the_key).persist, None);
            }
            assert_eq!(the_cache.processed(), 10);
            the_cache.flush();
            assert_eq!(the_cache.processed(), 0);
        }
    }

    #[test]
    fn the_one_where_the_snapshot_tracks_in_flight_and_done() {
        let the_cache = CacheManager::new(0, ProgressSnapshot::new(), &stats_of(&[("b", 2)]));
        the_cache.mark_processing(&key("b", "x"));
        the_cache.mark_processing(&key("b", "y"));

        let the_mid = the_cache.snapshot();
        let the_bucket = the_mid.bucket("b").expect("💀 bucket b");
        assert_eq!(the_bucket.processing.len(), 2);
        assert!(!the_cache.is_complete());

        the_cache.complete(&key("b", "y"));
        the_cache.complete(&key("b", "x"));
        let the_done = the_cache.snapshot();
        let the_bucket = the_done.bucket("b").expect("💀 bucket b");
        assert!(the_bucket.is_bucket_processed);
        assert_eq!(the_bucket.last_processed, "y");
        assert!(the_cache.is_complete());
    }

    #[test]
    fn the_one_where_prior_work_counts_as_existing() {
        let mut the_prior = ProgressSnapshot::new();
        let mut the_done = ObjectsProgress::new(1);
        the_done.mark_processing("only");
        the_done.mark_processed("only");
        the_prior.buckets.insert("done".into(), the_done);
        let mut the_half = ObjectsProgress::new(4);
        for name in ["a", "b", "c"] {
            the_half.mark_processing(name);
        }
        the_half.mark_processed("a");
        the_half.mark_processed("c");
        the_prior.buckets.insert("half".into(), the_half);

        let the_cache = CacheManager::new(0, the_prior, &stats_of(&[("half", 3)]));
        assert_eq!(the_cache.offsets().get("half"), Some(&OffsetInfo::ResumeFrom("b".into())));
        assert!(the_cache.exists(&key("done", "anything")));
        assert!(the_cache.exists(&key("half", "a")));
        assert!(!the_cache.exists(&key("half", "b")));
        assert!(!the_cache.exists(&key("half", "d")));
        assert_eq!(the_cache.processed(), 0);
    }

    #[test]
    fn the_one_where_untouched_prior_buckets_stay_frozen_until_listed() {
        let mut the_prior = ProgressSnapshot::new();
        let mut the_half = ObjectsProgress::new(3);
        the_half.mark_processing("a");
        the_half.mark_processing("b");
        the_half.mark_processed("a");
        the_prior.buckets.insert("half".into(), the_half.clone());

        let the_cache = CacheManager::new(0, the_prior, &stats_of(&[("half", 2)]));
        assert_eq!(the_cache.snapshot().bucket("half"), Some(&the_half));

        // 🔄 first touch starts a fresh tally over what's left to list
        the_cache.mark_processing(&key("half", "b"));
        let the_snapshot = the_cache.snapshot();
        let the_bucket = the_snapshot.bucket("half").expect("💀 bucket half");
        assert_eq!(the_bucket.total_count, 2);
        assert_eq!(the_bucket.processed_count, 0);
        assert_eq!(the_bucket.last_processed, "a");
        assert!(the_bucket.processing.contains("b"));
    }

    #[test]
    fn the_one_where_an_emptied_prior_bucket_is_finished_at_startup() {
        let mut the_prior = ProgressSnapshot::new();
        let mut the_stuck = ObjectsProgress::new(2);
        the_stuck.mark_processing("gone");
        the_stuck.mark_processing("done");
        the_stuck.mark_processed("done");
        the_prior.buckets.insert("stuck".into(), the_stuck);

        let the_cache = CacheManager::new(0, the_prior, &ObjectStats::default());
        assert!(the_cache.is_complete());
    }

    /// 🏗️ Last run finished "e" while "b" and "d" were still out.
    fn a_prior_with_stragglers_below_the_high_water_mark() -> ProgressSnapshot {
        let mut the_bucket = ObjectsProgress::new(5);
        for name in ["a", "b", "c", "d", "e"] {
            the_bucket.mark_processing(name);
        }
        for name in ["a", "c", "e"] {
            the_bucket.mark_processed(name);
        }
        let mut the_prior = ProgressSnapshot::new();
        the_prior.buckets.insert("bkt".into(), the_bucket);
        the_prior
    }

    #[test]
    fn the_one_where_a_straggler_above_the_cursor_is_never_skipped() {
        let the_cache = CacheManager::new(
            0,
            a_prior_with_stragglers_below_the_high_water_mark(),
            &stats_of(&[("bkt", 4)]),
        );
        assert_eq!(the_cache.offsets().get("bkt"), Some(&OffsetInfo::ResumeFrom("b".into())));

        the_cache.mark_processing(&key("bkt", "b"));
        the_cache.complete(&key("bkt", "b"));

        // 💾 a save taken right now must still point at "d"
        let the_offsets = compute_resume_offsets(&the_cache.snapshot());
        let the_offset = the_offsets.get("bkt").expect("💀 bucket offset");
        assert_eq!(the_offset, &OffsetInfo::ResumeFrom("d".into()));
        assert!(!the_offset.covers("d"));

        for name in ["c", "d", "e"] {
            the_cache.mark_processing(&key("bkt", name));
            the_cache.complete(&key("bkt", name));
        }
        let the_snapshot = the_cache.snapshot();
        let the_bucket = the_snapshot.bucket("bkt").expect("💀 bucket");
        assert!(the_bucket.processing.is_empty());
        assert_eq!(the_bucket.processed_count, 4);
        assert!(the_bucket.is_bucket_processed);
    }

    #[test]
    fn the_one_where_stragglers_deleted_from_the_store_let_the_bucket_finish() {
        let the_cache = CacheManager::new(
            0,
            a_prior_with_stragglers_below_the_high_water_mark(),
            &stats_of(&[("bkt", 1)]),
        );
        // 🗑️ "b" and "d" are gone, only "c" is left to list
        the_cache.mark_processing(&key("bkt", "c"));
        let the_mid = the_cache.snapshot();
        let the_in_flight: Vec<&str> = the_mid
            .bucket("bkt")
            .expect("💀 bucket")
            .processing
            .iter()
            .map(String::as_str)
            .collect();
        assert_eq!(the_in_flight, vec!["c", "d"]);

        the_cache.complete(&key("bkt", "c"));
        assert!(!the_cache.is_complete());
        the_cache.listing_finished();
        assert!(the_cache.is_complete());
    }

    #[test]
    fn the_one_where_racing_completions_are_recorded_in_counter_order() {
        use std::sync::Arc;

        let the_cache = Arc::new(CacheManager::new(
            2,
            ProgressSnapshot::new(),
            &stats_of(&[("b", 400)]),
        ));
        let the_record = Arc::new(Mutex::new(Vec::new()));

        let the_threads: Vec<_> = (0..4)
            .map(|t| {
                let the_cache = Arc::clone(&the_cache);
                let the_record = Arc::clone(&the_record);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        let the_key = key("b", &format!("t{t}-{i:03}"));
                        the_cache.mark_processing(&the_key);
                        the_cache.complete_then(&the_key, |completion| {
                            the_record
                                .lock()
                                .push((completion.processed, completion.persist.is_some()));
                        });
                    }
                })
            })
            .collect();
        for handle in the_threads {
            handle.join().expect("💀 thread");
        }

        let the_record = the_record.lock();
        assert_eq!(the_record.len(), 200);
        for (i, (processed, persisted)) in the_record.iter().enumerate() {
            assert_eq!(*processed, i as u64 + 1);
            assert_eq!(*persisted, processed % 2 == 0);
        }
    }
}
