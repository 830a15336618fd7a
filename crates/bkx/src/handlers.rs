//! 🧰 Content handlers — first dibs on an object's bytes.
//!
//! 🎬 *[an object arrives. it might be a tarball. it might be a cat picture.
//! it might be a gzip wearing a `.txt` trenchcoat.]*
//!
//! Every opened object is offered to the configured handler before the
//! pipeline reads it raw. A handler that recognises the content emits its own
//! chunks and returns `Ok(true)`. Anything else (`Ok(false)`) and the pipeline
//! rewinds the stream and emits the whole object as one chunk.
//!
//! 🧠 Knowledge graph:
//! - [`ObjectStream`] is the rewindable reader handlers receive.
//! - [`emit_chunk`] is the one way bytes leave the building: it races the send
//!   against cancellation so a full channel never wedges shutdown.
//! - [`HandlerBackend`] is the enum dispatch, same shape as the store backends.

use async_channel::Sender;
use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::common::Chunk;
use crate::error::SourceError;

pub mod gzip;
pub mod object_stream;

pub use gzip::{GzipHandler, GzipHandlerConfig};
pub use object_stream::ObjectStream;

/// 📏 10 MiB, the default ceiling for one emitted chunk.
pub const DEFAULT_MAX_CHUNK_SIZE_BYTES: usize = 10 * 1024 * 1024;

/// 🧰 Something that may know better than "one object, one chunk".
#[async_trait]
pub trait ContentHandler: std::fmt::Debug + Send + Sync {
    /// `Ok(true)`: handled, chunks (if any) already emitted.
    /// `Ok(false)`: not mine, the caller rewinds `stream` and emits it raw.
    async fn handle(
        &self,
        stream: &mut ObjectStream,
        skeleton: &Chunk,
        tx: &Sender<Chunk>,
        cancel: &CancellationToken,
    ) -> Result<bool, SourceError>;
}

/// 🔧 Which handler a run uses.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub enum HandlerConfig {
    /// 🚶 Every object goes out as one raw chunk.
    Passthrough,
    /// 🫁 Gzip objects are expanded and split, everything else goes raw.
    Gzip(GzipHandlerConfig),
}

impl Default for HandlerConfig {
    fn default() -> Self {
        HandlerConfig::Gzip(GzipHandlerConfig::default())
    }
}

/// 🎭 The handler the pipeline actually calls.
#[derive(Debug, Clone)]
pub enum HandlerBackend {
    Passthrough,
    Gzip(GzipHandler),
}

impl HandlerBackend {
    pub fn from_config(config: &HandlerConfig) -> Self {
        match config {
            HandlerConfig::Passthrough => HandlerBackend::Passthrough,
            HandlerConfig::Gzip(gzip_config) => {
                HandlerBackend::Gzip(GzipHandler::new(gzip_config.clone()))
            }
        }
    }
}

#[async_trait]
impl ContentHandler for HandlerBackend {
    async fn handle(
        &self,
        stream: &mut ObjectStream,
        skeleton: &Chunk,
        tx: &Sender<Chunk>,
        cancel: &CancellationToken,
    ) -> Result<bool, SourceError> {
        match self {
            HandlerBackend::Passthrough => Ok(false),
            HandlerBackend::Gzip(handler) => handler.handle(stream, skeleton, tx, cancel).await,
        }
    }
}

/// 📤 Send one chunk, or give up the moment the run is cancelled.
pub async fn emit_chunk(
    tx: &Sender<Chunk>,
    chunk: Chunk,
    cancel: &CancellationToken,
) -> Result<(), SourceError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SourceError::Cancelled),
        sent = tx.send(chunk) => sent.map_err(|_| SourceError::ChannelClosed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{ObjectKey, ObjectMetadata, SourceType};

    fn a_skeleton() -> Chunk {
        Chunk {
            source_name: "test".into(),
            source_type: SourceType::InMemory,
            source_id: 1,
            job_id: 2,
            verify: false,
            metadata: ObjectMetadata {
                bucket: "bkt".into(),
                filename: "obj".into(),
                ..Default::default()
            },
            data: Vec::new(),
        }
    }

    #[tokio::test]
    async fn the_one_where_passthrough_always_declines() {
        let (the_tx, the_rx) = async_channel::bounded(1);
        let mut the_stream = ObjectStream::new(
            ObjectKey::new("bkt", "obj"),
            Box::new(std::io::Cursor::new(b"raw".to_vec())),
        );
        let the_handled = HandlerBackend::Passthrough
            .handle(&mut the_stream, &a_skeleton(), &the_tx, &CancellationToken::new())
            .await
            .expect("💀 handle");
        assert!(!the_handled);
        assert!(the_rx.is_empty());
    }

    #[tokio::test]
    async fn the_one_where_a_cancelled_run_refuses_to_send() {
        let (the_tx, the_rx) = async_channel::bounded(1);
        let the_cancel = CancellationToken::new();
        the_cancel.cancel();
        let the_result = emit_chunk(&the_tx, a_skeleton(), &the_cancel).await;
        assert!(matches!(the_result, Err(SourceError::Cancelled)));
        assert!(the_rx.is_empty());
    }

    #[tokio::test]
    async fn the_one_where_nobody_is_listening() {
        let (the_tx, the_rx) = async_channel::bounded::<Chunk>(1);
        drop(the_rx);
        let the_result = emit_chunk(&the_tx, a_skeleton(), &CancellationToken::new()).await;
        assert!(matches!(the_result, Err(SourceError::ChannelClosed)));
    }

    #[test]
    fn the_one_where_the_default_handler_is_gzip_at_ten_mib() {
        let HandlerConfig::Gzip(the_config) = HandlerConfig::default() else {
            panic!("💀 default handler should be gzip");
        };
        assert_eq!(the_config.max_chunk_size_bytes, DEFAULT_MAX_CHUNK_SIZE_BYTES);
    }
}
