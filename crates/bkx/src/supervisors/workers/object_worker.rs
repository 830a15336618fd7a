//! 🎬 *[a queue fills with listed objects. somewhere, a worker waits.]*
//! *[the clock on the wall reads 2:47am.]*
//!
//! 📖 The ObjectWorker — pulls one listed object at a time off the job queue,
//! opens it, lets the handler have a look, and otherwise ships the raw bytes
//! as a single chunk. Success is recorded with the cache manager. Failure is
//! logged and left in the in-flight set so the next run tries again.
//!
//! ⚠️ One broken object never takes its siblings down with it.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::Result;
use async_channel::Receiver;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::Worker;
use crate::backends::{ObjectStore, StoreObject};
use crate::error::SourceError;
use crate::handlers::{ContentHandler, ObjectStream, emit_chunk};
use crate::resume::Completion;
use crate::skeleton::build_chunk_skeleton;
use crate::supervisors::PipelineContext;

#[derive(Debug)]
pub(in crate::supervisors) struct ObjectWorker {
    id: usize,
    jobs: Receiver<StoreObject>,
    context: Arc<PipelineContext>,
}

impl ObjectWorker {
    pub(in crate::supervisors) fn new(
        id: usize,
        jobs: Receiver<StoreObject>,
        context: Arc<PipelineContext>,
    ) -> Self {
        Self { id, jobs, context }
    }
}

impl Worker for ObjectWorker {
    fn start(self) -> JoinHandle<Result<()>> {
        tokio::spawn(async move {
            debug!("📥 ObjectWorker {} started draining the job queue...", self.id);
            loop {
                let the_job = tokio::select! {
                    biased;
                    _ = self.context.cancel.cancelled() => {
                        debug!("🛑 ObjectWorker {}: cancelled, putting the tools down.", self.id);
                        return Ok(());
                    }
                    job = self.jobs.recv() => job,
                };
                let Ok(object) = the_job else {
                    debug!("🏁 ObjectWorker {}: queue closed and empty. Shutting down.", self.id);
                    return Ok(());
                };

                let the_key = object.key();
                match process_object(&self.context, &object).await {
                    Ok(bytes) => {
                        let the_name = the_key.to_string();
                        let the_completion = self.context.cache.complete_then(&the_key, |completion| {
                            record_progress(&self.context, &the_name, completion)
                        });
                        if the_completion.newly_processed {
                            self.context.metrics.lock().update(bytes);
                        }
                    }
                    Err(SourceError::Cancelled) => {
                        debug!("🛑 ObjectWorker {}: cancelled mid-object {}", self.id, the_key);
                        return Ok(());
                    }
                    Err(e) if e.is_fatal() => {
                        warn!("💀 object {} hit a run-ending error, it stays in flight", the_key);
                        self.context.counters.failed.fetch_add(1, Ordering::Relaxed);
                        self.context.fail_run(e);
                        return Ok(());
                    }
                    Err(e) => {
                        warn!("⚠️ object {} failed, it will be retried next run: {}", the_key, e);
                        self.context.counters.failed.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        })
    }
}

/// 📖 Open, offer to the handler, otherwise emit raw. Returns bytes read.
async fn process_object(context: &PipelineContext, object: &StoreObject) -> Result<u64, SourceError> {
    let the_skeleton = build_chunk_skeleton(&context.identity, object);
    let the_reader = context.store.open(object).await?;
    let mut the_stream = ObjectStream::new(object.key(), the_reader);

    let the_handled = context
        .handler
        .handle(&mut the_stream, &the_skeleton, &context.tx, &context.cancel)
        .await?;
    if the_handled {
        trace!("🧰 {} was emitted by the content handler", the_stream.key());
        return Ok(object.size);
    }

    the_stream.reset()?;
    let the_data = the_stream.read_to_end().await?;
    let the_len = the_data.len() as u64;
    emit_chunk(&context.tx, the_skeleton.with_data(the_data), &context.cancel).await?;
    trace!("📤 {} emitted as one {} byte chunk", object.key(), the_len);
    Ok(the_len)
}

/// 🧾 Push one completion into the progress record.
///
/// Runs under the cache manager's lock, so completions land here in counter
/// order and every persistence point reaches the record.
fn record_progress(context: &PipelineContext, key: &str, completion: &Completion) {
    if !completion.newly_processed {
        debug!("♻️ {} was already recorded this run", key);
        return;
    }
    let the_total = context.cache.total_objects();
    context.progress.update(|progress| match &completion.persist {
        Some(encoded) => {
            debug!("💾 persisting progress after {} objects", completion.processed);
            progress.set_progress_complete(
                completion.processed,
                the_total,
                format!("object {key} processed"),
                encoded.clone(),
            );
        }
        None => progress.set_counters(completion.processed, the_total),
    });
    debug!("✅ {} processed ({}/{})", key, completion.processed, the_total);
}
