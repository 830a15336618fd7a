//! 🔌 Backends — where the real I/O happens.
//!
//! 🪣 An object store lists objects and hands out byte streams. That's the
//! whole contract. Credentials, include/exclude rules, retries against a
//! flaky cloud — all of that lives on the far side of this trait.
//!
//! 🎭 This module is the casting agency. Need objects from RAM? From a
//! directory that thinks it's a bucket store? We've got a backend for that.
//!
//! 🦆 The duck is here because every file must have one. This is law.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use tokio::io::AsyncRead;

use crate::app_config::StoreConfig;
use crate::common::{ObjectKey, SourceType};
use crate::error::SourceError;
use crate::resume::ResumeOffsets;

pub mod file;
pub mod in_mem;

pub use file::{FileStore, FileStoreConfig};
pub use in_mem::InMemoryStore;

/// 🧾 One listed object. Immutable once listed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreObject {
    pub bucket: String,
    pub name: String,
    pub size: u64,
    pub owner: String,
    pub content_type: String,
    pub acl: Vec<String>,
    pub link: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoreObject {
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(&self.bucket, &self.name)
    }
}

/// 📊 What the store reports before listing starts.
///
/// Counts cover only what is left to list once the resume offsets are applied,
/// so a resumed run's percentages are about the remaining work.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectStats {
    pub num_objects: u64,
    pub num_buckets: u64,
    pub bucket_objects: BTreeMap<String, u64>,
    pub total_bytes: u64,
}

impl ObjectStats {
    /// 🔢 Remaining objects in one bucket. Unknown buckets count as empty.
    pub fn bucket_total(&self, bucket: &str) -> u64 {
        self.bucket_objects.get(bucket).copied().unwrap_or(0)
    }
}

/// 🌊 The lazy listing. Ends when the store runs out of objects.
pub type ObjectListing = BoxStream<'static, Result<StoreObject, SourceError>>;

/// 📖 An open object. Boxed because every backend has its own reader type.
pub type ObjectReader = Box<dyn AsyncRead + Send + Unpin>;

/// 🪣 A bucket-style object store.
///
/// # Contract 📜
/// - `attributes` and `list_objects` honour the resume offsets: buckets marked
///   processed are skipped, and within a bucket only names the offset does not
///   cover are counted/listed. Ignoring them is allowed, it just means rework.
/// - Within a bucket, `list_objects` yields names in lexicographic order. The
///   resume offsets are only sound under that ordering.
/// - Across buckets, any order.
#[async_trait]
pub trait ObjectStore: std::fmt::Debug + Send + Sync {
    /// 📊 Count what is left to do. Failure here aborts the run.
    async fn attributes(&self, offsets: &ResumeOffsets) -> Result<ObjectStats, SourceError>;

    /// 🌊 Start listing.
    async fn list_objects(&self, offsets: &ResumeOffsets) -> Result<ObjectListing, SourceError>;

    /// 📖 Open one object's bytes.
    async fn open(&self, object: &StoreObject) -> Result<ObjectReader, SourceError>;

    /// 🏷️ Stamped on every chunk this store produces.
    fn source_type(&self) -> SourceType;
}

/// 🎭 The many faces of an object store — a polymorphic casting call.
///
/// The enum dispatches to the concrete store so the supervisor never needs to
/// know whether bytes come from RAM or disk.
#[derive(Debug)]
pub enum ObjectStoreBackend {
    InMemory(InMemoryStore),
    File(FileStore),
}

impl ObjectStoreBackend {
    /// 🏗️ Config in, ready-to-list store out.
    pub async fn from_config(config: &StoreConfig) -> Result<Self, SourceError> {
        match config {
            StoreConfig::InMemory => Ok(ObjectStoreBackend::InMemory(InMemoryStore::new())),
            StoreConfig::File(file_config) => Ok(ObjectStoreBackend::File(
                FileStore::new(file_config.clone()).await?,
            )),
        }
    }
}

#[async_trait]
impl ObjectStore for ObjectStoreBackend {
    async fn attributes(&self, offsets: &ResumeOffsets) -> Result<ObjectStats, SourceError> {
        match self {
            ObjectStoreBackend::InMemory(store) => store.attributes(offsets).await,
            ObjectStoreBackend::File(store) => store.attributes(offsets).await,
        }
    }

    async fn list_objects(&self, offsets: &ResumeOffsets) -> Result<ObjectListing, SourceError> {
        match self {
            ObjectStoreBackend::InMemory(store) => store.list_objects(offsets).await,
            ObjectStoreBackend::File(store) => store.list_objects(offsets).await,
        }
    }

    async fn open(&self, object: &StoreObject) -> Result<ObjectReader, SourceError> {
        match self {
            ObjectStoreBackend::InMemory(store) => store.open(object).await,
            ObjectStoreBackend::File(store) => store.open(object).await,
        }
    }

    fn source_type(&self) -> SourceType {
        match self {
            ObjectStoreBackend::InMemory(store) => store.source_type(),
            ObjectStoreBackend::File(store) => store.source_type(),
        }
    }
}

/// 🏷️ Best-effort content type from a file extension.
pub(crate) fn guess_content_type(name: &str) -> &'static str {
    let the_extension = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match the_extension.as_str() {
        "txt" | "log" => "text/plain",
        "json" => "application/json",
        "ndjson" | "jsonl" => "application/x-ndjson",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        "xml" => "application/xml",
        "gz" => "application/gzip",
        "zip" => "application/zip",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}
