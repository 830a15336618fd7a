//! 🫁 Gzip handler — squishy bytes go in, unsquished chunks come out.
//!
//! Recognises gzip by its magic bytes (`1f 8b`), not by file name. Every
//! member (concatenated `.gz` logs have several) is decompressed before
//! anything is emitted, so a corrupt archive emits nothing and falls back to
//! the raw path instead of half a story.
//!
//! 💣 Decompression stops at `max_decompressed_size_bytes`. Anything that
//! would expand past it is sent raw, still compressed, instead of being
//! allowed to eat the heap.

use std::io::Read;

use async_channel::Sender;
use async_trait::async_trait;
use flate2::read::MultiGzDecoder;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::common::Chunk;
use crate::error::SourceError;
use crate::handlers::{ContentHandler, DEFAULT_MAX_CHUNK_SIZE_BYTES, ObjectStream, emit_chunk};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// 💣 256 MiB, the default ceiling on one object's decompressed size.
pub const DEFAULT_MAX_DECOMPRESSED_SIZE_BYTES: u64 = 256 * 1024 * 1024;

fn default_max_chunk_size_bytes() -> usize {
    DEFAULT_MAX_CHUNK_SIZE_BYTES
}

fn default_max_decompressed_size_bytes() -> u64 {
    DEFAULT_MAX_DECOMPRESSED_SIZE_BYTES
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct GzipHandlerConfig {
    #[serde(default = "default_max_chunk_size_bytes")]
    pub max_chunk_size_bytes: usize,
    #[serde(default = "default_max_decompressed_size_bytes")]
    pub max_decompressed_size_bytes: u64,
}

impl Default for GzipHandlerConfig {
    fn default() -> Self {
        Self {
            max_chunk_size_bytes: default_max_chunk_size_bytes(),
            max_decompressed_size_bytes: default_max_decompressed_size_bytes(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GzipHandler {
    config: GzipHandlerConfig,
}

impl GzipHandler {
    pub fn new(config: GzipHandlerConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ContentHandler for GzipHandler {
    async fn handle(
        &self,
        stream: &mut ObjectStream,
        skeleton: &Chunk,
        tx: &Sender<Chunk>,
        cancel: &CancellationToken,
    ) -> Result<bool, SourceError> {
        if stream.peek(GZIP_MAGIC.len()).await? != GZIP_MAGIC {
            return Ok(false);
        }

        let the_compressed = stream.read_to_end().await?;
        let the_ceiling = self.config.max_decompressed_size_bytes;
        let mut the_decompressed = Vec::new();
        if let Err(e) = MultiGzDecoder::new(the_compressed.as_slice())
            .take(the_ceiling.saturating_add(1))
            .read_to_end(&mut the_decompressed)
        {
            debug!("🫁 {} looks like gzip but isn't ({e}), sending it raw", stream.key());
            return Ok(false);
        }
        if the_decompressed.len() as u64 > the_ceiling {
            warn!(
                "💣 {} expands past {} bytes, sending it raw instead",
                stream.key(),
                the_ceiling
            );
            return Ok(false);
        }
        trace!(
            "🫁 {} decompressed {} -> {} bytes",
            stream.key(),
            the_compressed.len(),
            the_decompressed.len()
        );

        // -- 📏 a zero ceiling would loop forever; one byte is the smallest honest chunk
        let the_chunk_size = self.config.max_chunk_size_bytes.max(1);
        for piece in the_decompressed.chunks(the_chunk_size) {
            emit_chunk(tx, skeleton.with_data(piece.to_vec()), cancel).await?;
        }
        Ok(true)
    }
}
