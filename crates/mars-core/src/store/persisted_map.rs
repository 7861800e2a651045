//! Single-file LMDB map backing the persisted store
//!
//! The environment is opened with `NO_SUB_DIR`, so the store is one data
//! file plus an LMDB `-lock` file next to it. Besides the record table a
//! small `meta` table holds the clean-shutdown marker: it is cleared when
//! the map is opened and set again by [`PersistedMap::close`]. A map that is
//! dropped without closing (a crash, a killed process) keeps the cleared
//! marker and can only be reopened through [`PersistedMap::recover`].
//!
//! A store file is owned by at most one map per process. Every open claims
//! the file's path in a process-wide set and the claim is released when the
//! map is closed or dropped, so opening or re-creating a live store fails
//! with [`Error::StoreInUse`] instead of unlinking it.

use crate::{Error, Result};
use heed::types::*;
use heed::{Database, Env, EnvFlags, EnvOpenOptions, MdbError, RwTxn};
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Smallest map size handed to LMDB
pub const MIN_MAP_SIZE: usize = 1024 * 1024;

/// Largest map size chosen from an estimate; bigger stores grow past it
pub const MAX_INITIAL_MAP_SIZE: usize = 1 << 30;

/// Multiplier applied to the caller's size estimate
pub const BLOAT_FACTOR: f64 = 2.0;

const RECORDS_DB: &str = "records";
const META_DB: &str = "meta";
const CLEAN_KEY: &str = "clean";
const CLEAN: &[u8] = &[1];
const DIRTY: &[u8] = &[0];

/// Store paths currently owned by a live map
static OPEN_PATHS: LazyLock<Mutex<HashSet<PathBuf>>> = LazyLock::new(|| Mutex::new(HashSet::new()));

/// Ownership of one store path, released on drop
#[derive(Debug)]
struct PathClaim {
    key: PathBuf,
}

impl PathClaim {
    fn acquire(path: &Path) -> Result<Self> {
        let key = claim_key(path)?;
        if !OPEN_PATHS.lock().insert(key.clone()) {
            return Err(Error::StoreInUse(path.display().to_string()));
        }
        Ok(Self { key })
    }
}

impl Drop for PathClaim {
    fn drop(&mut self) {
        OPEN_PATHS.lock().remove(&self.key);
    }
}

/// Byte-keyed LMDB map with clean-shutdown tracking
///
/// Readers and writers hold the environment lock shared; only resizing the
/// memory map and closing take it exclusively, which is what LMDB needs to
/// guarantee no transaction is live while the map moves.
pub struct PersistedMap {
    path: PathBuf,
    env: RwLock<Option<Env>>,
    records: Database<Bytes, Bytes>,
    meta: Database<Str, Bytes>,
    claim: Mutex<Option<PathClaim>>,
}

impl std::fmt::Debug for PersistedMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistedMap")
            .field("path", &self.path)
            .field("open", &self.env.read().is_some())
            .finish()
    }
}

impl PersistedMap {
    /// Create a fresh map at `path`, deleting whatever was there
    ///
    /// The initial memory map is sized from `estimated_entries` values of
    /// `estimated_value_bytes` each; the map doubles whenever a write runs
    /// out of room. Fails with [`Error::StoreInUse`], leaving the files
    /// alone, when another map in this process owns `path`.
    pub fn create<P: AsRef<Path>>(
        path: P,
        estimated_entries: usize,
        estimated_value_bytes: usize,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let claim = PathClaim::acquire(&path)?;
        remove_files(&path)?;
        let estimate = estimated_entries.saturating_mul(estimated_value_bytes);
        let map = Self::open_env(path, initial_map_size(estimate), claim)?;
        map.mark(DIRTY)?;
        tracing::debug!("Created persisted map at {}", map.path.display());
        Ok(map)
    }

    /// Open a map that was closed cleanly
    ///
    /// Fails with [`Error::UncleanShutdown`] if the previous owner never
    /// called [`close`](Self::close).
    pub fn open_existing<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let claim = PathClaim::acquire(&path)?;
        let map = Self::open_env(path.clone(), existing_map_size(&path)?, claim)?;
        if !map.is_marked_clean()? {
            // dropped without close: the marker stays dirty
            return Err(Error::UncleanShutdown(path.display().to_string()));
        }
        map.mark(DIRTY)?;
        tracing::debug!("Opened persisted map at {}", map.path.display());
        Ok(map)
    }

    /// Force-open a map regardless of how it was last closed
    pub fn recover<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let claim = PathClaim::acquire(&path)?;
        let map = Self::open_env(path.clone(), existing_map_size(&path)?, claim)?;
        {
            let guard = map.env.read();
            if let Some(env) = guard.as_ref() {
                let stale = env.clear_stale_readers()?;
                if stale > 0 {
                    tracing::warn!(
                        "Cleared {} stale reader slot(s) in {}",
                        stale,
                        path.display()
                    );
                }
            }
        }
        if !map.is_marked_clean()? {
            tracing::warn!("Recovering store {} after unclean shutdown", path.display());
        }
        map.mark(DIRTY)?;
        Ok(map)
    }

    fn open_env(path: PathBuf, map_size: usize, claim: PathClaim) -> Result<Self> {
        let mut options = EnvOpenOptions::new();
        options.map_size(map_size).max_dbs(2);
        let env = unsafe {
            options.flags(EnvFlags::NO_SUB_DIR);
            options.open(&path)?
        };

        let mut wtxn = env.write_txn()?;
        let records: Database<Bytes, Bytes> = env.create_database(&mut wtxn, Some(RECORDS_DB))?;
        let meta: Database<Str, Bytes> = env.create_database(&mut wtxn, Some(META_DB))?;
        wtxn.commit()?;

        Ok(Self {
            path,
            env: RwLock::new(Some(env)),
            records,
            meta,
            claim: Mutex::new(Some(claim)),
        })
    }

    /// Location of the data file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current memory map size in bytes
    pub fn map_size(&self) -> Result<usize> {
        let guard = self.env.read();
        let env = guard.as_ref().ok_or(Error::StoreClosed)?;
        Ok(env.info().map_size)
    }

    /// Read a value
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let guard = self.env.read();
        let env = guard.as_ref().ok_or(Error::StoreClosed)?;
        let rtxn = env.read_txn()?;
        Ok(self.records.get(&rtxn, key)?.map(<[u8]>::to_vec))
    }

    /// Insert or replace a value
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.with_write(|wtxn, db| db.put(wtxn, key, value))
    }

    /// Insert or replace many values in one transaction
    pub fn put_many(&self, entries: &[(Vec<u8>, Vec<u8>)]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        self.with_write(|wtxn, db| {
            for (key, value) in entries {
                db.put(wtxn, key, value)?;
            }
            Ok(())
        })
    }

    /// Delete a value; returns whether it existed
    pub fn remove(&self, key: &[u8]) -> Result<bool> {
        self.with_write(|wtxn, db| db.delete(wtxn, key))
    }

    /// All keys in byte order
    pub fn keys(&self) -> Result<Vec<Vec<u8>>> {
        let guard = self.env.read();
        let env = guard.as_ref().ok_or(Error::StoreClosed)?;
        let rtxn = env.read_txn()?;
        let mut keys = Vec::new();
        for entry in self.records.iter(&rtxn)? {
            let (key, _) = entry?;
            keys.push(key.to_vec());
        }
        Ok(keys)
    }

    /// Number of stored entries
    pub fn len(&self) -> Result<u64> {
        let guard = self.env.read();
        let env = guard.as_ref().ok_or(Error::StoreClosed)?;
        let rtxn = env.read_txn()?;
        Ok(self.records.len(&rtxn)?)
    }

    /// Whether the map holds no entries
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Flush, mark clean and release the environment
    ///
    /// Closing twice is a no-op. Every other operation fails with
    /// [`Error::StoreClosed`] afterwards.
    pub fn close(&self) -> Result<()> {
        let mut guard = self.env.write();
        let Some(env) = guard.take() else {
            return Ok(());
        };
        let mut wtxn = env.write_txn()?;
        self.meta.put(&mut wtxn, CLEAN_KEY, CLEAN)?;
        wtxn.commit()?;
        env.force_sync()?;
        env.prepare_for_closing().wait();
        self.claim.lock().take();
        tracing::debug!("Closed persisted map at {}", self.path.display());
        Ok(())
    }

    fn with_write<T, F>(&self, mut op: F) -> Result<T>
    where
        F: FnMut(&mut RwTxn<'_>, Database<Bytes, Bytes>) -> heed::Result<T>,
    {
        loop {
            let attempt = {
                let guard = self.env.read();
                let env = guard.as_ref().ok_or(Error::StoreClosed)?;
                let mut wtxn = env.write_txn()?;
                match op(&mut wtxn, self.records) {
                    Ok(value) => wtxn.commit().map(|()| value),
                    Err(e) => Err(e),
                }
            };
            match attempt {
                Ok(value) => return Ok(value),
                Err(heed::Error::Mdb(MdbError::MapFull)) => self.grow()?,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn grow(&self) -> Result<()> {
        let guard = self.env.write();
        let env = guard.as_ref().ok_or(Error::StoreClosed)?;
        let current = env.info().map_size;
        let next = current
            .checked_mul(2)
            .ok_or_else(|| Error::Database(heed::Error::Mdb(MdbError::MapFull)))?;
        // exclusive lock: no transaction of ours is live
        unsafe { env.resize(next)? };
        tracing::debug!(
            "Grew map for {} from {} to {} bytes",
            self.path.display(),
            current,
            next
        );
        Ok(())
    }

    fn mark(&self, flag: &[u8]) -> Result<()> {
        let guard = self.env.read();
        let env = guard.as_ref().ok_or(Error::StoreClosed)?;
        let mut wtxn = env.write_txn()?;
        self.meta.put(&mut wtxn, CLEAN_KEY, flag)?;
        wtxn.commit()?;
        env.force_sync()?;
        Ok(())
    }

    fn is_marked_clean(&self) -> Result<bool> {
        let guard = self.env.read();
        let env = guard.as_ref().ok_or(Error::StoreClosed)?;
        let rtxn = env.read_txn()?;
        Ok(self.meta.get(&rtxn, CLEAN_KEY)? == Some(CLEAN))
    }
}

/// Create a fresh map at `path`, or at the first free sibling path
/// (`run1.store`, `run2.store`, ...) when another map in this process owns
/// it. [`PersistedMap::path`] tells where it landed.
pub fn create_unclaimed(
    path: &Path,
    estimated_entries: usize,
    estimated_value_bytes: usize,
) -> Result<PersistedMap> {
    let mut candidate = path.to_path_buf();
    let mut n = 0u32;
    loop {
        match PersistedMap::create(&candidate, estimated_entries, estimated_value_bytes) {
            Err(Error::StoreInUse(_)) => {
                n += 1;
                candidate = numbered_path(path, n);
                tracing::debug!("Store {} is in use, trying {}", path.display(), candidate.display());
            }
            other => return other,
        }
    }
}

/// `dir/run.store` with `n` appended to the stem, `dir/run3.store` for 3
fn numbered_path(path: &Path, n: u32) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{}{}.{}", stem, n, ext.to_string_lossy()),
        None => format!("{}{}", stem, n),
    };
    path.with_file_name(name)
}

/// Key a path by its canonical directory, creating the directory if needed
fn claim_key(path: &Path) -> Result<PathBuf> {
    let dir = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => parent,
        None => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;
    let dir = std::fs::canonicalize(dir)?;
    Ok(match path.file_name() {
        Some(name) => dir.join(name),
        None => dir,
    })
}

/// Path of the LMDB lock file belonging to `path`
pub fn lock_file_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push("-lock");
    PathBuf::from(name)
}

/// Delete a store's data and lock files if they exist
pub fn remove_files(path: &Path) -> Result<()> {
    for file in [path.to_path_buf(), lock_file_path(path)] {
        match std::fs::remove_file(&file) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn initial_map_size(estimated_bytes: usize) -> usize {
    bloated_map_size(estimated_bytes).min(MAX_INITIAL_MAP_SIZE)
}

fn bloated_map_size(bytes: usize) -> usize {
    let wanted = (bytes as f64 * BLOAT_FACTOR) as usize;
    round_to_mib(wanted.max(MIN_MAP_SIZE))
}

fn existing_map_size(path: &Path) -> Result<usize> {
    let metadata = std::fs::metadata(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => {
            Error::not_found(format!("store file {}", path.display()))
        }
        _ => Error::Io(e),
    })?;
    let len = usize::try_from(metadata.len()).unwrap_or(usize::MAX);
    Ok(bloated_map_size(len))
}

fn round_to_mib(size: usize) -> usize {
    size.div_ceil(MIN_MAP_SIZE).saturating_mul(MIN_MAP_SIZE)
}
