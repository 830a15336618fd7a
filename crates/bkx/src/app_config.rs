//! 🔧 App Configuration — the sacred TOML-to-struct pipeline.
//!
//! 📡 "Config not found: We looked everywhere. Under the couch. Behind the fridge.
//! In the junk drawer. Nothing." — every developer at 3am 🦆
//!
//! 🏗️ Powered by Figment, because manually parsing env vars is a form of
//! self-harm that even the borrow checker wouldn't approve of.
//!
//! 🧠 Knowledge graph:
//! - `source`: who we are, stamped on every chunk
//! - `store`: where the buckets live (backend-owned config, `[store.File]`)
//! - `handler`: who gets first look at each object's bytes
//! - `runtime`: how many workers, how deep the queues
//! - `resume`: where the CLI keeps the progress record between runs

use std::path::{Path, PathBuf};

use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use tracing::info;

use crate::backends::FileStoreConfig;
use crate::common::{SourceIdentity, SourceType};
use crate::error::SourceError;
use crate::handlers::HandlerConfig;

/// 📦 One struct to rule them all, one struct to find them,
/// one struct to bring them all, and in the Figment bind them.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub source: SourceIdentityConfig,
    pub store: StoreConfig,
    #[serde(default)]
    pub handler: HandlerConfig,
    #[serde(default, alias = "supervisor_config")]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub resume: ResumeConfig,
}

fn default_source_name() -> String {
    "bkx".to_string()
}

/// 🪪 The identity half of a chunk. The source type comes from the store.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct SourceIdentityConfig {
    #[serde(default = "default_source_name")]
    pub name: String,
    #[serde(default)]
    pub source_id: i64,
    #[serde(default)]
    pub job_id: i64,
    #[serde(default)]
    pub verify: bool,
}

impl Default for SourceIdentityConfig {
    fn default() -> Self {
        Self {
            name: default_source_name(),
            source_id: 0,
            job_id: 0,
            verify: false,
        }
    }
}

impl SourceIdentityConfig {
    pub fn identity(&self, source_type: SourceType) -> SourceIdentity {
        SourceIdentity {
            name: self.name.clone(),
            source_type,
            source_id: self.source_id,
            job_id: self.job_id,
            verify: self.verify,
        }
    }
}

/// 🪣 Where the buckets live. Each backend owns its config struct.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub enum StoreConfig {
    /// 🧪 An empty in-memory store. Only useful when objects are inserted in code.
    InMemory,
    File(FileStoreConfig),
}

fn default_concurrency() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    16
}

fn default_chunk_channel_capacity() -> usize {
    64
}

fn default_show_progress() -> bool {
    true
}

/// 🏎️ The knobs on the engine.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// 🧵 Objects read at the same time.
    #[serde(default = "default_concurrency", alias = "num_workers")]
    pub concurrency: usize,
    /// 📬 Listed-but-not-started objects allowed to pile up.
    #[serde(default = "default_queue_capacity", alias = "channel_size")]
    pub queue_capacity: usize,
    /// 📤 Chunk channel size when the CLI builds it. Library callers bring their own.
    #[serde(default = "default_chunk_channel_capacity")]
    pub chunk_channel_capacity: usize,
    #[serde(default = "default_show_progress")]
    pub show_progress: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            queue_capacity: default_queue_capacity(),
            chunk_channel_capacity: default_chunk_channel_capacity(),
            show_progress: default_show_progress(),
        }
    }
}

impl RuntimeConfig {
    /// 🚧 Zero workers or a zero-length queue would hang forever. Say so up front.
    pub fn validate(&self) -> Result<(), SourceError> {
        if self.concurrency == 0 {
            return Err(SourceError::Configuration(
                "runtime.concurrency must be at least 1".into(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(SourceError::Configuration(
                "runtime.queue_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// 💾 Where the progress record lives between runs. No file, no resume.
#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct ResumeConfig {
    #[serde(default)]
    pub state_file: Option<PathBuf>,
}

/// 🚀 Load the config — from a file, from env vars, or from the sheer power of hoping.
///
/// 🔧 Merges environment variables (`BKX_*`, `__` for nesting, so
/// `BKX_RUNTIME__CONCURRENCY=8`) with an optional TOML file. TOML wins on conflicts.
///
/// 💀 Returns an error if config is unparseable, with a message that says
/// where we looked.
pub fn load_config(config_file_name: Option<&Path>) -> anyhow::Result<AppConfig> {
    info!(
        "🔧 Loading configuration: {:#?}",
        config_file_name.unwrap_or(Path::new(""))
    );

    let config = Figment::new().merge(Env::prefixed("BKX_").split("__"));
    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment variables (BKX_*). \
             The file exists in our hearts, but apparently not on disk.",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (BKX_*). \
                 No file was provided — this one's all on the environment. Classic."
            .to_string(),
    };

    config.extract().context(context_msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::DEFAULT_MAX_CHUNK_SIZE_BYTES;

    fn write_test_config(dir: &tempfile::TempDir, contents: &str) -> PathBuf {
        let the_path = dir.path().join("bkx.toml");
        // 🧪 a real file, because Figment wants TOML from disk, like it's method acting
        std::fs::write(&the_path, contents)
            .expect("💀 Failed to write test config. The filesystem said 'new phone who dis'.");
        the_path
    }

    #[test]
    fn the_one_where_every_section_finds_its_struct() {
        let the_dir = tempfile::tempdir().expect("💀 tempdir");
        let the_path = write_test_config(
            &the_dir,
            r#"
            [source]
            name = "nightly-scan"
            source_id = 11
            job_id = 22
            verify = true

            [store.File]
            root = "/srv/buckets"

            [handler.Gzip]
            max_chunk_size_bytes = 4096

            [runtime]
            concurrency = 8
            queue_capacity = 32
            show_progress = false

            [resume]
            state_file = "/var/lib/bkx/progress.json"
            "#,
        );

        let the_config = load_config(Some(the_path.as_path()))
            .expect("💀 Full config should parse. The schema drift goblin does not get this win.");

        assert_eq!(the_config.source.name, "nightly-scan");
        assert_eq!(the_config.source.source_id, 11);
        assert!(the_config.source.verify);
        assert_eq!(
            the_config.store,
            StoreConfig::File(FileStoreConfig {
                root: PathBuf::from("/srv/buckets")
            })
        );
        match the_config.handler {
            HandlerConfig::Gzip(gzip) => assert_eq!(gzip.max_chunk_size_bytes, 4096),
            honestly_who_knows => panic!(
                "💀 Expected the gzip handler, but serde took us to {:?}. Plot twist energy.",
                honestly_who_knows
            ),
        }
        assert_eq!(the_config.runtime.concurrency, 8);
        assert_eq!(the_config.runtime.queue_capacity, 32);
        assert_eq!(the_config.runtime.chunk_channel_capacity, 64);
        assert!(!the_config.runtime.show_progress);
        assert_eq!(
            the_config.resume.state_file,
            Some(PathBuf::from("/var/lib/bkx/progress.json"))
        );
    }

    #[test]
    fn the_one_where_defaults_show_up_uninvited_but_helpful() {
        let the_config: AppConfig = Figment::new()
            .merge(Toml::string(
                r#"
                store = "InMemory"
                "#,
            ))
            .extract()
            .expect("💀 Defaults should fill everything but the store.");

        assert_eq!(the_config.store, StoreConfig::InMemory);
        assert_eq!(the_config.source, SourceIdentityConfig::default());
        assert_eq!(the_config.runtime, RuntimeConfig::default());
        assert_eq!(the_config.resume, ResumeConfig::default());
        match the_config.handler {
            HandlerConfig::Gzip(gzip) => {
                assert_eq!(gzip.max_chunk_size_bytes, DEFAULT_MAX_CHUNK_SIZE_BYTES)
            }
            other => panic!("💀 default handler should be gzip, got {other:?}"),
        }
    }

    #[test]
    fn the_one_where_runtime_accepts_its_former_stage_names() {
        let the_runtime: RuntimeConfig = toml::from_str(
            r#"
            channel_size = 12
            num_workers = 3
            "#,
        )
        .expect("💀 Runtime aliases should parse. The witness protection paperwork was valid.");
        assert_eq!(the_runtime.queue_capacity, 12);
        assert_eq!(the_runtime.concurrency, 3);
    }

    #[test]
    fn the_one_where_zero_workers_is_a_configuration_problem() {
        let the_runtime = RuntimeConfig {
            concurrency: 0,
            ..Default::default()
        };
        assert!(matches!(
            the_runtime.validate(),
            Err(SourceError::Configuration(_))
        ));
        assert!(RuntimeConfig::default().validate().is_ok());
    }

    #[test]
    fn the_one_where_the_store_decides_the_source_type() {
        let the_identity = SourceIdentityConfig::default().identity(SourceType::File);
        assert_eq!(the_identity.name, "bkx");
        assert_eq!(the_identity.source_type, SourceType::File);
    }
}
