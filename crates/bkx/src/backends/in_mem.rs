//! # Previously, on bkx...
//!
//! 🎬 The objects were trapped in RAM. No network. No disk. Just a couple of
//! `BTreeMap`s and a dream.
//!
//! `InMemoryStore` is the store tests reach for: buckets and objects are
//! inserted up front, listing is sorted for free, and any object can be told to
//! fail on open so the retry-on-resume path gets exercised.
//!
//! ⚠️ This is NOT for production. This is for tests and demos.

use std::collections::{BTreeMap, HashSet};
use std::io;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;

use crate::backends::{ObjectListing, ObjectReader, ObjectStats, ObjectStore, StoreObject, guess_content_type};
use crate::common::{ObjectKey, SourceType};
use crate::error::SourceError;
use crate::resume::ResumeOffsets;

/// 📦 One object living in RAM.
#[derive(Debug, Clone)]
pub struct InMemoryObject {
    pub data: Vec<u8>,
    pub owner: String,
    pub content_type: String,
    pub acl: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InMemoryObject {
    pub fn new(name: &str, data: Vec<u8>) -> Self {
        let the_now = Utc::now();
        Self {
            data,
            owner: String::new(),
            content_type: guess_content_type(name).to_string(),
            acl: Vec::new(),
            created_at: the_now,
            updated_at: the_now,
        }
    }
}

/// 🧪 A bucket store that lives and dies with the process.
#[derive(Debug, Default, Clone)]
pub struct InMemoryStore {
    buckets: BTreeMap<String, BTreeMap<String, InMemoryObject>>,
    /// 💥 Objects whose `open` fails, for exercising the "retry later" path.
    unreadable: HashSet<ObjectKey>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 🏗️ Builder-style insert, for tests that like chaining.
    pub fn with_object(
        mut self,
        bucket: impl Into<String>,
        name: impl Into<String>,
        data: impl Into<Vec<u8>>,
    ) -> Self {
        self.insert_object(bucket, name, data);
        self
    }

    pub fn insert_object(
        &mut self,
        bucket: impl Into<String>,
        name: impl Into<String>,
        data: impl Into<Vec<u8>>,
    ) {
        let the_name = name.into();
        let the_object = InMemoryObject::new(&the_name, data.into());
        self.buckets
            .entry(bucket.into())
            .or_default()
            .insert(the_name, the_object);
    }

    /// 💥 Make `open` fail for this object.
    pub fn fail_reads_for(mut self, key: ObjectKey) -> Self {
        self.unreadable.insert(key);
        self
    }

    /// 🩹 Let a previously broken object be read again.
    pub fn heal(&mut self, key: &ObjectKey) {
        self.unreadable.remove(key);
    }

    fn remaining_objects(&self, offsets: &ResumeOffsets) -> Vec<StoreObject> {
        let mut the_objects = Vec::new();
        for (bucket, objects) in &self.buckets {
            if offsets.skips_bucket(bucket) {
                continue;
            }
            for (name, object) in objects {
                let the_key = ObjectKey::new(bucket, name);
                if offsets.covers(&the_key) {
                    continue;
                }
                the_objects.push(StoreObject {
                    bucket: bucket.clone(),
                    name: name.clone(),
                    size: object.data.len() as u64,
                    owner: object.owner.clone(),
                    content_type: object.content_type.clone(),
                    acl: object.acl.clone(),
                    link: format!("mem://{bucket}/{name}"),
                    created_at: object.created_at,
                    updated_at: object.updated_at,
                });
            }
        }
        the_objects
    }
}

#[async_trait]
impl ObjectStore for InMemoryStore {
    async fn attributes(&self, offsets: &ResumeOffsets) -> Result<ObjectStats, SourceError> {
        let mut the_stats = ObjectStats::default();
        for object in self.remaining_objects(offsets) {
            the_stats.num_objects += 1;
            the_stats.total_bytes += object.size;
            *the_stats.bucket_objects.entry(object.bucket).or_default() += 1;
        }
        the_stats.num_buckets = the_stats.bucket_objects.len() as u64;
        Ok(the_stats)
    }

    async fn list_objects(&self, offsets: &ResumeOffsets) -> Result<ObjectListing, SourceError> {
        // 🧠 BTreeMaps all the way down, so per-bucket order is lexicographic for free
        let the_objects = self.remaining_objects(offsets);
        Ok(futures::stream::iter(the_objects.into_iter().map(Ok)).boxed())
    }

    async fn open(&self, object: &StoreObject) -> Result<ObjectReader, SourceError> {
        let the_key = object.key();
        if self.unreadable.contains(&the_key) {
            return Err(SourceError::object_read(
                &the_key,
                io::Error::other("simulated read failure"),
            ));
        }
        let the_object = self
            .buckets
            .get(&object.bucket)
            .and_then(|objects| objects.get(&object.name))
            .ok_or_else(|| {
                SourceError::object_read(
                    &the_key,
                    io::Error::new(io::ErrorKind::NotFound, "object vanished after listing"),
                )
            })?;
        Ok(Box::new(io::Cursor::new(the_object.data.clone())))
    }

    fn source_type(&self) -> SourceType {
        SourceType::InMemory
    }
}
