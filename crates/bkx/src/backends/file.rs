//! 📂 Previously, on "Things That Could Go Wrong With A Directory"...
//!
//! The disk was quiet. Too quiet. Someone pointed bkx at a folder and said
//! "pretend it's a bucket store". So we do: every sub-directory of `root` is a
//! bucket, and every file underneath it (recursively) is an object named by its
//! `/`-joined path relative to the bucket.
//!
//! 🚰 root/<bucket>/<a>/<b>.txt → object `a/b.txt` in bucket `<bucket>`
//! 💀 Root missing → `Configuration` error at construction, not three hours in
//! 🦆 (mandatory, no notes)

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Deserialize;
use tokio::fs;
use tracing::trace;

use crate::backends::{ObjectListing, ObjectReader, ObjectStats, ObjectStore, StoreObject, guess_content_type};
use crate::common::{ObjectKey, SourceType};
use crate::error::SourceError;
use crate::resume::ResumeOffsets;

// -- 📂 FileStoreConfig lives here, next to the store that uses it. 🎯
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct FileStoreConfig {
    /// 🏠 The directory whose children are buckets.
    pub root: PathBuf,
}

/// 📂 A directory tree wearing a bucket-store costume.
#[derive(Debug, Clone)]
pub struct FileStore {
    config: FileStoreConfig,
}

impl FileStore {
    /// 🚀 Checks that the root is a directory we can read. That's the whole handshake.
    pub async fn new(config: FileStoreConfig) -> Result<Self, SourceError> {
        let the_metadata = fs::metadata(&config.root).await.map_err(|e| {
            SourceError::Configuration(format!(
                "store root '{}' is not readable: {e}",
                config.root.display()
            ))
        })?;
        if !the_metadata.is_dir() {
            return Err(SourceError::Configuration(format!(
                "store root '{}' is not a directory",
                config.root.display()
            )));
        }
        Ok(Self { config })
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }
}

/// 🪣 Sorted bucket directory names under the root.
async fn bucket_names(root: &Path) -> Result<Vec<String>, SourceError> {
    let mut the_entries = fs::read_dir(root)
        .await
        .map_err(|e| SourceError::Enumeration(format!("listing '{}': {e}", root.display())))?;
    let mut the_names = Vec::new();
    while let Some(entry) = the_entries
        .next_entry()
        .await
        .map_err(|e| SourceError::Enumeration(format!("listing '{}': {e}", root.display())))?
    {
        let the_type = entry
            .file_type()
            .await
            .map_err(|e| SourceError::Enumeration(e.to_string()))?;
        if the_type.is_dir() {
            the_names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    the_names.sort();
    Ok(the_names)
}

/// 🔍 Every object in one bucket that the offsets leave for us, sorted by name.
async fn scan_bucket(
    root: &Path,
    bucket: &str,
    offsets: &ResumeOffsets,
) -> Result<Vec<StoreObject>, SourceError> {
    let the_bucket_dir = root.join(bucket);
    let mut the_pending_dirs = vec![the_bucket_dir.clone()];
    let mut the_objects = Vec::new();

    let enumeration = |path: &Path, e: io::Error| {
        SourceError::Enumeration(format!("scanning '{}': {e}", path.display()))
    };

    while let Some(dir) = the_pending_dirs.pop() {
        let mut the_entries = fs::read_dir(&dir).await.map_err(|e| enumeration(&dir, e))?;
        while let Some(entry) = the_entries
            .next_entry()
            .await
            .map_err(|e| enumeration(&dir, e))?
        {
            let the_path = entry.path();
            let the_metadata = entry.metadata().await.map_err(|e| enumeration(&the_path, e))?;
            if the_metadata.is_dir() {
                the_pending_dirs.push(the_path);
                continue;
            }
            if !the_metadata.is_file() {
                continue;
            }

            let Some(the_name) = object_name(&the_bucket_dir, &the_path) else {
                continue;
            };
            if offsets.covers(&ObjectKey::new(bucket, &the_name)) {
                continue;
            }

            let the_updated: DateTime<Utc> = the_metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            // -- 🕰️ not every filesystem remembers birthdays
            let the_created = the_metadata
                .created()
                .map(DateTime::<Utc>::from)
                .unwrap_or(the_updated);
            let the_acl = if the_metadata.permissions().readonly() {
                vec!["READER".to_string()]
            } else {
                vec!["OWNER".to_string()]
            };

            the_objects.push(StoreObject {
                bucket: bucket.to_string(),
                content_type: guess_content_type(&the_name).to_string(),
                name: the_name,
                size: the_metadata.len(),
                owner: String::new(),
                acl: the_acl,
                link: format!("file://{}", the_path.display()),
                created_at: the_created,
                updated_at: the_updated,
            });
        }
    }

    the_objects.sort_by(|a, b| a.name.cmp(&b.name));
    trace!("📂 bucket '{}' has {} objects left to list", bucket, the_objects.len());
    Ok(the_objects)
}

/// 🏷️ `bucket_dir/a/b.txt` → `a/b.txt`, always with forward slashes.
fn object_name(bucket_dir: &Path, path: &Path) -> Option<String> {
    let the_relative = path.strip_prefix(bucket_dir).ok()?;
    let the_parts: Vec<String> = the_relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if the_parts.is_empty() {
        None
    } else {
        Some(the_parts.join("/"))
    }
}

#[async_trait]
impl ObjectStore for FileStore {
    async fn attributes(&self, offsets: &ResumeOffsets) -> Result<ObjectStats, SourceError> {
        let mut the_stats = ObjectStats::default();
        for bucket in bucket_names(self.root()).await? {
            if offsets.skips_bucket(&bucket) {
                continue;
            }
            let the_objects = scan_bucket(self.root(), &bucket, offsets).await?;
            the_stats.num_objects += the_objects.len() as u64;
            the_stats.total_bytes += the_objects.iter().map(|o| o.size).sum::<u64>();
            if !the_objects.is_empty() {
                the_stats.num_buckets += 1;
                the_stats
                    .bucket_objects
                    .insert(bucket, the_objects.len() as u64);
            }
        }
        Ok(the_stats)
    }

    async fn list_objects(&self, offsets: &ResumeOffsets) -> Result<ObjectListing, SourceError> {
        let the_root = self.config.root.clone();
        let the_offsets = offsets.clone();
        let the_buckets: Vec<String> = bucket_names(&the_root)
            .await?
            .into_iter()
            .filter(|bucket| !offsets.skips_bucket(bucket))
            .collect();

        // 🌊 one bucket scanned at a time, as the consumer pulls
        let the_listing = futures::stream::iter(the_buckets)
            .then(move |bucket| {
                let the_root = the_root.clone();
                let the_offsets = the_offsets.clone();
                async move { scan_bucket(&the_root, &bucket, &the_offsets).await }
            })
            .flat_map(|scanned| match scanned {
                Ok(objects) => futures::stream::iter(objects.into_iter().map(Ok)).boxed(),
                Err(e) => futures::stream::once(async move { Err(e) }).boxed(),
            })
            .boxed();
        Ok(the_listing)
    }

    async fn open(&self, object: &StoreObject) -> Result<ObjectReader, SourceError> {
        let the_path = object
            .name
            .split('/')
            .fold(self.root().join(&object.bucket), |path, part| path.join(part));
        let the_file = fs::File::open(&the_path)
            .await
            .map_err(|e| SourceError::object_read(&object.key(), e))?;
        Ok(Box::new(the_file))
    }

    fn source_type(&self) -> SourceType {
        SourceType::File
    }
}

#[cfg(test)]
mod tests {
    use futures::TryStreamExt;
    use tokio::io::AsyncReadExt;

    use super::*;
    use crate::resume::OffsetInfo;

    fn write(root: &Path, relative: &str, contents: &str) {
        let the_path = root.join(relative);
        std::fs::create_dir_all(the_path.parent().expect("💀 parent dir"))
            .expect("💀 the filesystem said 'new phone who dis'");
        std::fs::write(&the_path, contents).expect("💀 write fixture");
    }

    fn a_tiny_bucket_farm() -> tempfile::TempDir {
        let the_dir = tempfile::tempdir().expect("💀 tempdir");
        write(the_dir.path(), "photos/2024/cat.png", "meow");
        write(the_dir.path(), "photos/2024/dog.png", "woof");
        write(the_dir.path(), "photos/readme.txt", "hi");
        write(the_dir.path(), "logs/app.log", "line1\nline2\n");
        // 🧹 stray files at the root are not buckets
        write(the_dir.path(), "not-a-bucket.txt", "ignored");
        the_dir
    }

    #[tokio::test]
    async fn the_one_where_a_missing_root_is_a_configuration_problem() {
        let the_result = FileStore::new(FileStoreConfig {
            root: PathBuf::from("/definitely/not/here/bkx"),
        })
        .await;
        assert!(matches!(the_result, Err(SourceError::Configuration(_))));
    }

    #[tokio::test]
    async fn the_one_where_directories_become_buckets() {
        let the_dir = a_tiny_bucket_farm();
        let the_store = FileStore::new(FileStoreConfig {
            root: the_dir.path().to_path_buf(),
        })
        .await
        .expect("💀 store");

        let the_stats = the_store
            .attributes(&ResumeOffsets::new())
            .await
            .expect("💀 stats");
        assert_eq!(the_stats.num_objects, 4);
        assert_eq!(the_stats.num_buckets, 2);
        assert_eq!(the_stats.bucket_total("photos"), 3);

        let the_keys: Vec<String> = the_store
            .list_objects(&ResumeOffsets::new())
            .await
            .expect("💀 listing")
            .map_ok(|o| o.key().to_string())
            .try_collect()
            .await
            .expect("💀 stream");
        assert_eq!(
            the_keys,
            vec![
                "logs/app.log",
                "photos/2024/cat.png",
                "photos/2024/dog.png",
                "photos/readme.txt",
            ]
        );
    }

    #[tokio::test]
    async fn the_one_where_the_listing_resumes_mid_bucket() {
        let the_dir = a_tiny_bucket_farm();
        let the_store = FileStore::new(FileStoreConfig {
            root: the_dir.path().to_path_buf(),
        })
        .await
        .expect("💀 store");

        let mut the_offsets = ResumeOffsets::new();
        the_offsets.insert("logs", OffsetInfo::BucketProcessed);
        the_offsets.insert("photos", OffsetInfo::ResumeAfter("2024/cat.png".into()));

        let the_stats = the_store.attributes(&the_offsets).await.expect("💀 stats");
        assert_eq!(the_stats.num_objects, 2);

        let the_listed: Vec<StoreObject> = the_store
            .list_objects(&the_offsets)
            .await
            .expect("💀 listing")
            .try_collect()
            .await
            .expect("💀 stream");
        let the_names: Vec<&str> = the_listed.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(the_names, vec!["2024/dog.png", "readme.txt"]);

        let mut the_reader = the_store.open(&the_listed[0]).await.expect("💀 open");
        let mut the_bytes = String::new();
        the_reader
            .read_to_string(&mut the_bytes)
            .await
            .expect("💀 read");
        assert_eq!(the_bytes, "woof");
        assert_eq!(the_listed[0].content_type, "image/png");
        assert!(the_listed[0].link.starts_with("file://"));
    }
}
