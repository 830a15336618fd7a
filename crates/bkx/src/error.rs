//! 💀 Errors — the five ways a bucket run can go sideways.
//!
//! 🧠 Knowledge graph:
//! - `Configuration` + `Enumeration` abort the whole run. Nobody processes anything.
//! - `ChannelClosed` also ends the run: with nobody listening, every object after it would fail too.
//! - `ObjectRead` is per-object: logged, object left in flight, retried next run.
//! - `Serialization` is what a mangled resume snapshot becomes. Callers shrug and start fresh.
//! - `Cancelled` bubbles out of the run once every worker has unwound.
//!
//! The library speaks `SourceError`. The CLI and config loader speak `anyhow`.
//! Everybody is bilingual via `?`. 🦆

use crate::common::ObjectKey;

/// 💀 Everything the ingestion core can fail with.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// 🔧 Bad store/source setup. Fatal before anything starts.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// 📋 Listing or stats failed. Fatal for the run.
    #[error("enumeration error: {0}")]
    Enumeration(String),

    /// 📖 One object could not be opened, read, or rewound.
    #[error("error reading object {key}: {source}")]
    ObjectRead {
        key: ObjectKey,
        #[source]
        source: std::io::Error,
    },

    /// 🧩 The persisted resume snapshot did not decode.
    #[error("error decoding resume info: {0}")]
    Serialization(#[from] serde_json::Error),

    /// 🛑 The shared cancellation token fired.
    #[error("ingestion cancelled")]
    Cancelled,

    /// 🚪 The consumer dropped the chunk receiver while we were still talking.
    #[error("chunk channel closed by the consumer")]
    ChannelClosed,
}

impl SourceError {
    /// 📖 Shorthand for the per-object read failure — the most common casualty.
    pub(crate) fn object_read(key: &ObjectKey, source: std::io::Error) -> Self {
        SourceError::ObjectRead {
            key: key.clone(),
            source,
        }
    }

    /// ⚖️ Does this error end the whole run, or just one object's day?
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SourceError::Configuration(_)
                | SourceError::Enumeration(_)
                | SourceError::ChannelClosed
        )
    }
}
