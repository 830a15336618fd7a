//! 📼 ObjectStream — a reader that remembers what it read, so it can be rewound.
//!
//! A content handler gets first look at an object's bytes. If it declines, the
//! pipeline rewinds and reads the same bytes again as one raw chunk. Object
//! stores hand out forward-only readers, so we keep a tape of everything
//! pulled while recording is on.
//!
//! Once `stop_recording` is called the consumed part of the tape is dropped
//! and `reset` refuses to rewind. Handlers that stream huge objects call it so
//! memory stays flat.

use std::io;

use tokio::io::AsyncReadExt;

use crate::backends::ObjectReader;
use crate::common::ObjectKey;
use crate::error::SourceError;

// -- 🥄 read granularity from the underlying store
const FILL_SIZE: usize = 64 * 1024;

pub struct ObjectStream {
    key: ObjectKey,
    inner: ObjectReader,
    tape: Vec<u8>,
    position: usize,
    recording: bool,
    eof: bool,
}

impl std::fmt::Debug for ObjectStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStream")
            .field("key", &self.key)
            .field("buffered", &self.tape.len())
            .field("position", &self.position)
            .field("recording", &self.recording)
            .field("eof", &self.eof)
            .finish()
    }
}

impl ObjectStream {
    pub fn new(key: ObjectKey, inner: ObjectReader) -> Self {
        Self {
            key,
            inner,
            tape: Vec::new(),
            position: 0,
            recording: true,
            eof: false,
        }
    }

    pub fn key(&self) -> &ObjectKey {
        &self.key
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// 👀 Up to `n` upcoming bytes without consuming them. Shorter at EOF.
    pub async fn peek(&mut self, n: usize) -> Result<&[u8], SourceError> {
        while self.tape.len() - self.position < n && !self.eof {
            self.fill().await?;
        }
        let the_end = (self.position + n).min(self.tape.len());
        Ok(&self.tape[self.position..the_end])
    }

    /// 📖 Like `AsyncRead::read`: 0 means EOF.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, SourceError> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.position == self.tape.len() && !self.eof {
            self.fill().await?;
        }
        let the_available = &self.tape[self.position..];
        let the_count = the_available.len().min(buf.len());
        buf[..the_count].copy_from_slice(&the_available[..the_count]);
        self.position += the_count;
        Ok(the_count)
    }

    /// 📖 Everything from the current position to EOF.
    pub async fn read_to_end(&mut self) -> Result<Vec<u8>, SourceError> {
        while !self.eof {
            self.fill().await?;
        }
        let the_rest = self.tape[self.position..].to_vec();
        self.position = self.tape.len();
        Ok(the_rest)
    }

    /// ⏪ Back to byte 0. Only possible while recording.
    pub fn reset(&mut self) -> Result<(), SourceError> {
        if !self.recording {
            return Err(SourceError::object_read(
                &self.key,
                io::Error::new(
                    io::ErrorKind::Unsupported,
                    "stream stopped recording and cannot be rewound",
                ),
            ));
        }
        self.position = 0;
        Ok(())
    }

    /// ⏹️ Drop the consumed part of the tape and never rewind again.
    pub fn stop_recording(&mut self) {
        self.tape.drain(..self.position);
        self.position = 0;
        self.recording = false;
    }

    async fn fill(&mut self) -> Result<(), SourceError> {
        if !self.recording && self.position == self.tape.len() {
            self.tape.clear();
            self.position = 0;
        }
        let the_start = self.tape.len();
        self.tape.resize(the_start + FILL_SIZE, 0);
        let the_read = self.inner.read(&mut self.tape[the_start..]).await;
        match the_read {
            Ok(count) => {
                self.tape.truncate(the_start + count);
                if count == 0 {
                    self.eof = true;
                }
                Ok(())
            }
            Err(e) => {
                self.tape.truncate(the_start);
                Err(SourceError::object_read(&self.key, e))
            }
        }
    }
}
