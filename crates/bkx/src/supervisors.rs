//! 🎬 *[camera pans across a dimly lit server room]*
//! 🎬 *[dramatic orchestral music swells]*
//! 🎬 "In a world where buckets refuse to drain themselves..."
//! 🎬 "One supervisor dared to remember where it left off."
//! 🎬 *[record scratch]* 🦆
//!
//! 📦 The Supervisor — part middle manager, part helicopter parent.
//!
//! One run walks `Listing → Draining → Completing → Done`:
//! - **Listing**: the store's lazy listing is filtered through the cache
//!   manager (`exists` → skip), each accepted object is marked in flight and
//!   pushed onto a bounded job queue.
//! - **Draining**: the queue is closed and a fixed pool of object workers
//!   finishes whatever is left.
//! - **Completing**: final message, final persist (or a cleared resume token
//!   if every bucket is done), cache flush.
//!
//! ⚠️ DO NOT MAKE THE WORKERS PUB EVER
//! 🔒 Like Fight Club, but for async tasks. First rule: you don't pub the workers.

mod workers;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_channel::Sender;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::app_config::{RuntimeConfig, SourceIdentityConfig};
use crate::backends::{ObjectStore, ObjectStoreBackend, StoreObject};
use crate::common::{Chunk, SourceIdentity};
use crate::error::SourceError;
use crate::handlers::HandlerBackend;
use crate::progress::{ProgressHandle, ProgressMetrics};
use crate::resume::{CacheManager, ProgressSnapshot, compute_resume_offsets};
use workers::{ObjectWorker, Worker};

/// 🚦 Where a run is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Listing,
    Draining,
    Completing,
    Done,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let the_name = match self {
            RunState::Listing => "listing",
            RunState::Draining => "draining",
            RunState::Completing => "completing",
            RunState::Done => "done",
        };
        f.write_str(the_name)
    }
}

/// 📋 What a finished run has to say for itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Objects the store reported as left to do.
    pub total_objects: u64,
    pub processed: u64,
    /// Listed but already done by a previous run (or earlier in this one).
    pub skipped: u64,
    /// Failed this run, left in flight for the next one.
    pub failed: u64,
    /// The per-bucket ledger as it stood when the run ended.
    pub snapshot: ProgressSnapshot,
}

#[derive(Debug, Default)]
pub(crate) struct RunCounters {
    pub(crate) skipped: AtomicU64,
    pub(crate) failed: AtomicU64,
}

/// 🧳 Everything a worker needs, shared by the whole pool.
#[derive(Debug)]
pub(crate) struct PipelineContext {
    pub(crate) identity: SourceIdentity,
    pub(crate) store: Arc<ObjectStoreBackend>,
    pub(crate) handler: HandlerBackend,
    pub(crate) cache: CacheManager,
    pub(crate) progress: ProgressHandle,
    pub(crate) metrics: Mutex<ProgressMetrics>,
    pub(crate) counters: RunCounters,
    pub(crate) tx: Sender<Chunk>,
    /// 🛑 A child of the caller's token. A fatal worker error cancels it
    /// without touching the caller's.
    pub(crate) cancel: CancellationToken,
    /// 💀 The first error that stopped the run from inside.
    pub(crate) fatal: Mutex<Option<SourceError>>,
}

impl PipelineContext {
    /// 💀 Remember the first fatal error and stop everything else.
    pub(crate) fn fail_run(&self, error: SourceError) {
        let mut the_fatal = self.fatal.lock();
        if the_fatal.is_none() {
            warn!("💀 stopping the run: {error}");
            *the_fatal = Some(error);
        }
        self.cancel.cancel();
    }
}

/// 📦 The Supervisor: because even async tasks need someone hovering over them
/// asking "is it done yet?" every 5 milliseconds.
#[derive(Debug)]
pub(crate) struct Supervisor {
    identity: SourceIdentity,
    store: Arc<ObjectStoreBackend>,
    handler: HandlerBackend,
    runtime: RuntimeConfig,
    progress: ProgressHandle,
    state: RunState,
}

impl Supervisor {
    /// 🚀 Birth of a Supervisor. It's like a baby, but less crying.
    pub(crate) fn new(
        source: &SourceIdentityConfig,
        store: ObjectStoreBackend,
        handler: HandlerBackend,
        runtime: RuntimeConfig,
        progress: ProgressHandle,
    ) -> Self {
        Self {
            identity: source.identity(store.source_type()),
            store: Arc::new(store),
            handler,
            runtime,
            progress,
            state: RunState::Listing,
        }
    }

    fn transition(&mut self, next: RunState) {
        info!("🚦 run state: {} → {}", self.state, next);
        self.state = next;
    }

    /// 🏃 Ingest everything the store has left, emitting chunks on `tx`.
    ///
    /// `tx` is never closed here; it belongs to the caller. The progress
    /// handle is updated as objects complete and holds the resume token
    /// when this returns, whatever the outcome.
    pub(crate) async fn run(
        mut self,
        tx: Sender<Chunk>,
        cancel: CancellationToken,
    ) -> Result<RunSummary, SourceError> {
        self.runtime.validate()?;

        let the_prior = ProgressSnapshot::decode(&self.progress.encoded_resume_info())
            .unwrap_or_else(|e| {
                warn!("⚠️ resume info did not decode, starting fresh: {e}");
                ProgressSnapshot::new()
            });
        let the_offsets = compute_resume_offsets(&the_prior);
        if !the_offsets.is_empty() {
            info!("🔁 resuming with offsets for {} bucket(s)", the_offsets.len());
        }

        let the_stats = self.store.attributes(&the_offsets).await?;
        info!(
            "📊 {} objects in {} buckets left to process",
            the_stats.num_objects, the_stats.num_buckets
        );

        let the_cache = CacheManager::for_stats(the_prior, &the_stats);
        debug!(
            "🗃️ persistence threshold {} (enabled: {})",
            the_cache.threshold(),
            the_cache.caching_enabled()
        );

        self.progress.update(|p| {
            p.set_counters(0, the_stats.num_objects);
            p.message = "starting to process objects...".to_string();
        });

        let the_metrics = if self.runtime.show_progress {
            ProgressMetrics::new(
                self.identity.name.clone(),
                the_stats.num_objects,
                the_stats.total_bytes,
            )
        } else {
            ProgressMetrics::hidden(
                self.identity.name.clone(),
                the_stats.num_objects,
                the_stats.total_bytes,
            )
        };

        let the_context = Arc::new(PipelineContext {
            identity: self.identity.clone(),
            store: Arc::clone(&self.store),
            handler: self.handler.clone(),
            cache: the_cache,
            progress: self.progress.clone(),
            metrics: Mutex::new(the_metrics),
            counters: RunCounters::default(),
            tx,
            cancel: cancel.child_token(),
            fatal: Mutex::new(None),
        });

        let (the_job_tx, the_job_rx) = async_channel::bounded(self.runtime.queue_capacity);
        let the_workers: Vec<_> = (0..self.runtime.concurrency)
            .map(|id| ObjectWorker::new(id, the_job_rx.clone(), Arc::clone(&the_context)).start())
            .collect();
        drop(the_job_rx);

        info!("🚦 run state: {}", self.state);
        let the_listing_error = match self.store.list_objects(the_context.cache.offsets()).await {
            Ok(listing) => list_into_queue(&the_context, listing, &the_job_tx).await,
            Err(e) => Some(e),
        };
        the_job_tx.close();

        self.transition(RunState::Draining);
        for handle in the_workers {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("⚠️ object worker ended with an error: {e:#}"),
                Err(e) => warn!("⚠️ object worker panicked or was aborted: {e}"),
            }
        }

        self.transition(RunState::Completing);
        let the_summary = self.complete(&the_context)?;
        self.transition(RunState::Done);

        if cancel.is_cancelled() {
            return Err(SourceError::Cancelled);
        }
        let the_fatal = the_context.fatal.lock().take();
        if let Some(e) = the_fatal {
            return Err(e);
        }
        if let Some(e) = the_listing_error {
            return Err(e);
        }
        Ok(the_summary)
    }

    /// 🏁 Final message, final persist, flush.
    fn complete(&self, context: &PipelineContext) -> Result<RunSummary, SourceError> {
        let the_processed = context.cache.processed();
        let the_total = context.cache.total_objects();
        let the_message = format!("finished processing {the_processed} objects");

        let the_encoded = if context.cache.is_complete() {
            info!("✅ every bucket is processed, clearing resume info");
            String::new()
        } else {
            let the_snapshot = context.cache.snapshot();
            info!(
                "💾 {} object(s) still in flight, keeping resume info for the next run",
                the_snapshot.in_flight_count()
            );
            context.cache.encoded_snapshot()?
        };
        self.progress.update(|p| {
            p.set_progress_complete(the_processed, the_total, the_message.clone(), the_encoded)
        });
        context.metrics.lock().finish();

        let the_summary = RunSummary {
            total_objects: the_total,
            processed: the_processed,
            skipped: context.counters.skipped.load(Ordering::Relaxed),
            failed: context.counters.failed.load(Ordering::Relaxed),
            snapshot: context.cache.snapshot(),
        };
        context.cache.flush();
        info!("🏁 {the_message}");
        Ok(the_summary)
    }
}

/// 🌊 Pull the listing into the job queue until it ends, fails, or the run is
/// cancelled. Returns the listing error, if that's how it ended.
async fn list_into_queue(
    context: &PipelineContext,
    mut listing: crate::backends::ObjectListing,
    jobs: &Sender<StoreObject>,
) -> Option<SourceError> {
    loop {
        let the_next = tokio::select! {
            biased;
            _ = context.cancel.cancelled() => {
                debug!("🛑 listing stopped by cancellation");
                return None;
            }
            next = listing.next() => next,
        };
        let object = match the_next {
            None => {
                context.cache.listing_finished();
                return None;
            }
            Some(Ok(object)) => object,
            Some(Err(e)) => {
                warn!("⚠️ listing failed mid-stream, draining what we have: {e}");
                return Some(e);
            }
        };

        let the_key = object.key();
        if context.cache.exists(&the_key) {
            debug!("⏭️ {} already processed, skipping", the_key);
            context.counters.skipped.fetch_add(1, Ordering::Relaxed);
            continue;
        }
        context.cache.mark_processing(&the_key);

        let the_sent = tokio::select! {
            biased;
            _ = context.cancel.cancelled() => return None,
            sent = jobs.send(object) => sent,
        };
        if the_sent.is_err() {
            warn!("⚠️ every object worker is gone, stopping the listing");
            return None;
        }
    }
}
