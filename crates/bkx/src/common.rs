//! 📦 Common data structures — the building blocks of bkx
//!
//! ---
//!
//! 🎬 COLD OPEN — INT. OBJECT STORE — 3:47 AM
//!
//! A bucket. Eleven thousand objects. Somebody asked for "all of them, as bytes,
//! by morning". Each object gets an identity (`ObjectKey`), a passport
//! (`ObjectMetadata`), and eventually a ride down the channel in a `Chunk`.
//!
//! 🦆
//!
//! These structs carry the data. They do not ask where it is going.

use std::fmt;

use serde::{Deserialize, Serialize};

/// 🔑 The identity of an object within a run: `(bucket, name)`.
///
/// Object names are only unique inside a bucket, so the bucket rides along.
/// Displays as `bucket/name`, which is also the key the cache remembers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub bucket: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(bucket: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.name)
    }
}

/// 🏷️ What kind of store produced a chunk. Downstream consumers route on this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// 🧪 The in-memory store. Tests and demos.
    InMemory,
    /// 📂 A local directory pretending to be a bucket store.
    File,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InMemory => "in_memory",
            Self::File => "file",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 🪪 Who is running: the identity stamped on every chunk of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceIdentity {
    pub name: String,
    pub source_type: SourceType,
    pub source_id: i64,
    pub job_id: i64,
    /// ✅ Should downstream verify whatever it finds in these bytes?
    pub verify: bool,
}

/// 🧾 Structured object metadata attached to every chunk.
///
/// Timestamps are already strings here — the consumer gets RFC 3339 and
/// does not need to know which clock library we use.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    pub bucket: String,
    pub filename: String,
    pub link: String,
    /// 📧 The owner, usually an email in bucket stores that have owners.
    pub email: String,
    pub content_type: String,
    pub acls: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// 📦 A `Chunk` — one unit of work for whoever drains the output channel.
///
/// Built as a skeleton (metadata, empty `data`) before the object is read,
/// then cloned and filled by whoever ends up emitting bytes: the pipeline
/// (raw object) or a content handler (expanded pieces).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub source_name: String,
    pub source_type: SourceType,
    pub source_id: i64,
    pub job_id: i64,
    pub verify: bool,
    pub metadata: ObjectMetadata,
    /// 📦 The payload. Empty on a skeleton.
    #[serde(skip)]
    pub data: Vec<u8>,
}

impl Chunk {
    /// 🔑 The object this chunk came from.
    pub fn object_key(&self) -> ObjectKey {
        ObjectKey::new(&self.metadata.bucket, &self.metadata.filename)
    }

    /// 🧬 A copy of this skeleton carrying `data`.
    pub fn with_data(&self, data: Vec<u8>) -> Self {
        Self {
            data,
            ..self.clone()
        }
    }
}
