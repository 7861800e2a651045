//! Archive configuration

use crate::codec::Format;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Where molecule and metadata records live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageMode {
    /// Records held in process memory
    #[default]
    InMemory,
    /// Records held in a memory-mapped store file
    Virtual,
}

impl std::str::FromStr for StorageMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "memory" | "in_memory" | "in-memory" => Ok(StorageMode::InMemory),
            "virtual" | "persisted" => Ok(StorageMode::Virtual),
            other => Err(Error::config(format!("unknown storage mode '{}'", other))),
        }
    }
}

/// Archive configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Storage backend
    pub mode: StorageMode,
    /// Directory for store files; defaults to the container's directory
    pub store_dir: Option<PathBuf>,
    /// Reopen an existing store in recovery mode instead of reloading it
    pub recover_existing_store: bool,
    /// Worker threads for parallel scans; defaults to available parallelism
    pub worker_threads: Option<usize>,
    /// Seed for molecule size sampling; random when unset
    pub sample_seed: Option<u64>,
    /// Molecules sampled when measuring the average record size
    pub sample_size: usize,
    /// Records written to the store per transaction while loading
    pub load_batch_size: usize,
    /// Encoding used when saving an archive that was never loaded from disk
    pub default_format: Format,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            mode: StorageMode::InMemory,
            store_dir: None,
            recover_existing_store: false,
            worker_threads: None,
            sample_seed: None,
            sample_size: 20,
            load_batch_size: 1000,
            default_format: Format::Binary,
        }
    }
}

impl ArchiveConfig {
    /// Defaults overlaid with `MARS_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with values from `lookup`
    ///
    /// Recognized keys: `MARS_MODE`, `MARS_STORE_DIR`, `MARS_RECOVER`,
    /// `MARS_WORKER_THREADS`, `MARS_SAMPLE_SEED`, `MARS_SAMPLE_SIZE`,
    /// `MARS_LOAD_BATCH_SIZE`, `MARS_FORMAT`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(mode) = lookup("MARS_MODE") {
            config.mode = mode.parse()?;
        }
        if let Some(dir) = lookup("MARS_STORE_DIR") {
            config.store_dir = Some(PathBuf::from(dir));
        }
        if let Some(recover) = lookup("MARS_RECOVER") {
            config.recover_existing_store = parse_var("MARS_RECOVER", &recover)?;
        }
        if let Some(threads) = lookup("MARS_WORKER_THREADS") {
            config.worker_threads = Some(parse_var("MARS_WORKER_THREADS", &threads)?);
        }
        if let Some(seed) = lookup("MARS_SAMPLE_SEED") {
            config.sample_seed = Some(parse_var("MARS_SAMPLE_SEED", &seed)?);
        }
        if let Some(size) = lookup("MARS_SAMPLE_SIZE") {
            config.sample_size = parse_var("MARS_SAMPLE_SIZE", &size)?;
        }
        if let Some(batch) = lookup("MARS_LOAD_BATCH_SIZE") {
            config.load_batch_size = parse_var("MARS_LOAD_BATCH_SIZE", &batch)?;
        }
        if let Some(format) = lookup("MARS_FORMAT") {
            config.default_format = format.parse()?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings no archive can run with
    pub fn validate(&self) -> Result<()> {
        if self.load_batch_size == 0 {
            return Err(Error::config("load_batch_size must be at least 1"));
        }
        if self.worker_threads == Some(0) {
            return Err(Error::config("worker_threads must be at least 1"));
        }
        Ok(())
    }

    /// Worker threads to use for parallel scans
    pub fn effective_worker_threads(&self) -> usize {
        self.worker_threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }

    /// Seed for the next size sample
    pub fn effective_sample_seed(&self) -> u64 {
        self.sample_seed.unwrap_or_else(rand::random)
    }

    /// Store file location for an archive named `name`
    ///
    /// `store_dir` wins; otherwise the store sits next to `container`, or in
    /// the system temp directory for archives with no file yet.
    pub fn store_path_for(&self, name: &str, container: Option<&Path>) -> PathBuf {
        let dir = match (&self.store_dir, container.and_then(Path::parent)) {
            (Some(dir), _) => dir.clone(),
            (None, Some(parent)) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => std::env::temp_dir(),
        };
        let stem = Path::new(name)
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .unwrap_or("archive");
        dir.join(format!("{}.store", stem))
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::config(format!("invalid value '{}' for {}", value, key)))
}
