//! 🚀 bkx-cli — the front door, the bouncer, the maitre d' of bkx.
//!
//! 🎬 *[narrator voice]* "It all started with a simple main() function..."
//! 📦 This binary crate is the thin CLI wrapper that loads config, sets up
//! logging, restores the last progress record, and lets the library do the
//! heavy lifting. Like a manager. 🦆

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use bkx::error::SourceError;
use bkx::progress::{Progress, ProgressHandle};
use bkx::resume::ProgressSnapshot;
use clap::Parser;
use comfy_table::{Table, presets::UTF8_FULL};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// 🪣 Drain every bucket in a store into chunks, resuming where the last run stopped.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// 🔧 TOML config file. Env vars (BKX_*) are merged on top of it.
    #[arg(default_value = "bkx.toml")]
    config: PathBuf,
}

/// 🚀 main() — where it all begins. The genesis. The big bang.
///
/// 🔧 Steps:
/// 1. Init tracing (so we can see what goes wrong, and when)
/// 2. Parse args, load config
/// 3. Restore the progress record from the state file, if any
/// 4. Run the thing, draining chunks as they come (send it and pray 🙏),
///    writing every mid-run save to the state file as it happens
/// 5. Write the progress record back one last time, print the scoreboard
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    // 🔒 Validate the config file exists before we get too emotionally attached
    let config_file = args.config.as_path();
    let config_file_which_is_validated_to_exist = match config_file.try_exists().context(format!(
        "💀 Configuration file may not exist, couldn't find it. Double check that it exists, \
         or use an absolute path to be absolutely certain. Was checking here: '{}'",
        config_file.display()
    ))? {
        true => Some(config_file),
        false => None,
    };

    let app_config = bkx::app_config::load_config(config_file_which_is_validated_to_exist)
        .context("💀 In bkx-cli, main, we couldn't load the config file, take a look at the file, make sure it's correct")?;

    let the_state_file = app_config.resume.state_file.clone();
    let the_prior = match the_state_file.as_deref() {
        Some(path) => read_progress(path).await?,
        None => Progress::default(),
    };
    let the_progress = ProgressHandle::new(the_prior);

    let (the_tx, the_rx) = async_channel::bounded::<bkx::common::Chunk>(app_config.runtime.chunk_channel_capacity.max(1));
    let the_drain = tokio::spawn(async move {
        let mut the_chunks = 0u64;
        let mut the_bytes = 0u64;
        while let Ok(chunk) = the_rx.recv().await {
            debug!("📦 chunk from {} ({} bytes)", chunk.object_key(), chunk.data.len());
            the_chunks += 1;
            the_bytes += chunk.data.len() as u64;
        }
        (the_chunks, the_bytes)
    });

    let the_cancel = CancellationToken::new();
    let the_ctrl_c = the_cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("🛑 Ctrl-C received, finishing in-flight work and saving progress...");
            the_ctrl_c.cancel();
        }
    });

    let the_saver_stop = CancellationToken::new();
    let the_saver = the_state_file
        .clone()
        .map(|path| spawn_state_saver(path, the_progress.clone(), the_saver_stop.clone()));

    let result = bkx::run(&app_config, the_progress.clone(), the_tx, the_cancel).await;

    // -- 🚰 every sender is gone once run() returns, so the drain ends on its own
    let (the_chunks, the_bytes) = the_drain.await.context("💀 chunk drain task fell over")?;
    info!("📦 drained {} chunks, {} bytes", the_chunks, the_bytes);

    the_saver_stop.cancel();
    if let Some(saver) = the_saver {
        saver.await.context("💀 state saver task fell over")?;
    }
    if let Some(path) = the_state_file.as_deref() {
        write_progress(path, &the_progress.get()).await?;
    }

    match result {
        Ok(summary) => {
            println!("{}", bucket_table(&summary.snapshot));
            info!(
                "✅ processed {} of {} objects ({} skipped, {} failed)",
                summary.processed, summary.total_objects, summary.skipped, summary.failed
            );
            Ok(())
        }
        Err(SourceError::Cancelled) => {
            warn!("🛑 cancelled. progress saved, run again to pick up where we left off");
            std::process::exit(130);
        }
        Err(err) => {
            let err = anyhow::Error::new(err);
            error!("💀 error: {}", err);
            // -- 🧅 peel the onion of sadness, one tear-jerking layer at a time
            for cause in err.chain().skip(1) {
                error!("⚠️  cause: {}", cause);
            }
            std::process::exit(1);
        }
    }
}

/// 📖 The last run's progress record. No file, fresh start. Bad file, also a
/// fresh start, with a warning: re-reading objects beats refusing to run.
async fn read_progress(path: &Path) -> Result<Progress> {
    if !tokio::fs::try_exists(path)
        .await
        .with_context(|| format!("💀 couldn't check for state file '{}'", path.display()))?
    {
        return Ok(Progress::default());
    }
    let the_raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("💀 couldn't read state file '{}'", path.display()))?;
    match serde_json::from_str(&the_raw) {
        Ok(progress) => {
            info!("🔁 restored progress from '{}'", path.display());
            Ok(progress)
        }
        Err(e) => {
            warn!("⚠️ state file '{}' is unreadable ({e}), starting fresh", path.display());
            Ok(Progress::default())
        }
    }
}

/// 💾 Write the record back, or remove the file once there's nothing to resume.
///
/// Goes through a sibling temp file and a rename, so a crash mid-write leaves
/// the previous save intact.
async fn write_progress(path: &Path, progress: &Progress) -> Result<()> {
    if progress.encoded_resume_info.is_empty() {
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            tokio::fs::remove_file(path)
                .await
                .with_context(|| format!("💀 couldn't remove state file '{}'", path.display()))?;
        }
        return Ok(());
    }
    let the_json = serde_json::to_string_pretty(progress).context("💀 couldn't encode progress")?;
    let mut the_temp = path.as_os_str().to_owned();
    the_temp.push(".tmp");
    let the_temp = PathBuf::from(the_temp);
    tokio::fs::write(&the_temp, the_json)
        .await
        .with_context(|| format!("💀 couldn't write state file '{}'", the_temp.display()))?;
    tokio::fs::rename(&the_temp, path)
        .await
        .with_context(|| format!("💀 couldn't move state file into '{}'", path.display()))?;
    debug!("💾 progress saved to '{}'", path.display());
    Ok(())
}

/// 🔔 Mirror every mid-run save to the state file until `stop` fires, so a
/// crash or `kill -9` loses at most what happened since the last save.
fn spawn_state_saver(
    path: PathBuf,
    progress: ProgressHandle,
    stop: CancellationToken,
) -> JoinHandle<()> {
    let mut the_saves = progress.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => return,
                changed = the_saves.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
            if let Err(e) = write_progress(&path, &progress.get()).await {
                warn!("⚠️ couldn't save progress mid-run, will try again at the next save: {e:#}");
            }
        }
    })
}

/// 🍽️ One row per bucket.
fn bucket_table(snapshot: &ProgressSnapshot) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Bucket", "Processed", "Total", "In flight", "Done"]);
    for (bucket, progress) in &snapshot.buckets {
        table.add_row(vec![
            bucket.clone(),
            progress.processed_count.to_string(),
            progress.total_count.to_string(),
            progress.processing.len().to_string(),
            if progress.is_bucket_processed { "✅" } else { "⏳" }.to_string(),
        ]);
    }
    table
}
