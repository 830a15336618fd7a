//! 🪣 bkx — resumable bucket ingestion.
//!
//! Lists every object in a bucket-style store, turns each into chunks on a
//! channel you own, and remembers how far it got so the next run picks up
//! where this one stopped. At-least-once: an object may be sent twice across
//! a crash, never zero times.
//!
//! 🧠 Knowledge graph:
//! - [`backends`]: where the objects come from (`ObjectStore` + backends)
//! - [`handlers`]: who gets first look at an object's bytes
//! - [`resume`]: snapshot, offsets, and the cache manager
//! - [`progress`]: the caller-visible progress record and the terminal bar
//! - `supervisors`: the pipeline itself (private, like all good kitchens)

pub mod app_config;
pub mod backends;
pub mod common;
pub mod error;
pub mod handlers;
pub mod progress;
pub mod resume;
pub mod skeleton;
mod supervisors;

use async_channel::Sender;
use tokio_util::sync::CancellationToken;

use crate::app_config::AppConfig;
use crate::backends::ObjectStoreBackend;
use crate::common::Chunk;
use crate::error::SourceError;
use crate::handlers::HandlerBackend;
use crate::progress::ProgressHandle;
use crate::supervisors::Supervisor;

pub use crate::supervisors::{RunState, RunSummary};

/// 🚀 Build the store the config describes and ingest it.
pub async fn run(
    app_config: &AppConfig,
    progress: ProgressHandle,
    tx: Sender<Chunk>,
    cancel: CancellationToken,
) -> Result<RunSummary, SourceError> {
    let the_store = ObjectStoreBackend::from_config(&app_config.store).await?;
    run_with_store(app_config, the_store, progress, tx, cancel).await
}

/// 🚀 Same as [`run`], with a store you built yourself.
///
/// `progress` should carry the record from the previous run (its
/// `encoded_resume_info` in particular) and holds this run's record when the
/// call returns, including on error and cancellation.
pub async fn run_with_store(
    app_config: &AppConfig,
    store: ObjectStoreBackend,
    progress: ProgressHandle,
    tx: Sender<Chunk>,
    cancel: CancellationToken,
) -> Result<RunSummary, SourceError> {
    Supervisor::new(
        &app_config.source,
        store,
        HandlerBackend::from_config(&app_config.handler),
        app_config.runtime.clone(),
        progress,
    )
    .run(tx, cancel)
    .await
}
