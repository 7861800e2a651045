//! The molecule archive
//!
//! `MoleculeArchive` coordinates one record store with the indices derived
//! from it:
//! - the molecule index, which fixes iteration and save order and is the
//!   authoritative membership set
//! - the metadata index
//! - the tag index, a rebuildable cache of each molecule's joined tags
//!
//! Index locks are held only while an index is mutated, never across store
//! I/O. `add_molecule` reserves the UID first and writes afterwards, rolling
//! the reservation back if the write fails, so two threads adding the same
//! UID can never both succeed.

use crate::codec::{self, Format};
use crate::config::{ArchiveConfig, StorageMode};
use crate::container::{self, Flow, RecordSink};
use crate::index::UidIndex;
use crate::properties::{self, ArchiveProperties};
use crate::record::{Metadata, Molecule};
use crate::store::{InMemoryStore, PersistedStore, RecordStore};
use crate::table::DataTable;
use crate::tags::TagIndex;
use crate::uid;
use crate::{Error, Result};
use parking_lot::RwLock;
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Column that splits a flat table into molecules
pub const MOLECULE_COLUMN: &str = "molecule";

/// Lifecycle of an archive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveState {
    /// Not yet populated
    Uninitialized,
    /// Being populated from a container or store
    Loading,
    /// Open for reads and writes
    Ready,
    /// Store released; every operation fails
    Destroyed,
}

/// Indexed collection of molecules and metadata records
pub struct MoleculeArchive {
    name: RwLock<String>,
    file: RwLock<Option<PathBuf>>,
    format: RwLock<Format>,
    state: RwLock<ArchiveState>,
    config: ArchiveConfig,
    properties: RwLock<ArchiveProperties>,
    molecule_index: UidIndex,
    metadata_index: UidIndex,
    tag_index: TagIndex,
    store: Box<dyn RecordStore>,
    pool: OnceLock<rayon::ThreadPool>,
}

impl std::fmt::Debug for MoleculeArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MoleculeArchive")
            .field("name", &*self.name.read())
            .field("state", &*self.state.read())
            .field("molecules", &self.molecule_index.len())
            .field("metadata", &self.metadata_index.len())
            .field("store", &self.store)
            .finish()
    }
}

impl MoleculeArchive {
    /// Create an empty in-memory archive
    pub fn new(name: impl Into<String>) -> Self {
        let archive = Self::assemble(
            name.into(),
            ArchiveConfig::default(),
            Box::new(InMemoryStore::new()),
        );
        archive.set_state(ArchiveState::Ready);
        archive
    }

    /// Create an empty archive with the backend chosen by `config`
    pub fn with_config(name: impl Into<String>, config: ArchiveConfig) -> Result<Self> {
        Self::create_empty(name.into(), config, 0, 0.0)
    }

    /// Create an empty virtual archive sized for `estimated_molecules`
    /// records of `average_size` bytes
    pub fn new_virtual(
        name: impl Into<String>,
        estimated_molecules: usize,
        average_size: f64,
        config: ArchiveConfig,
    ) -> Result<Self> {
        let config = ArchiveConfig {
            mode: StorageMode::Virtual,
            ..config
        };
        Self::create_empty(name.into(), config, estimated_molecules, average_size)
    }

    fn create_empty(
        name: String,
        config: ArchiveConfig,
        estimated_molecules: usize,
        average_size: f64,
    ) -> Result<Self> {
        config.validate()?;
        let store: Box<dyn RecordStore> = match config.mode {
            StorageMode::InMemory => Box::new(InMemoryStore::new()),
            StorageMode::Virtual => {
                let path = config.store_path_for(&name, None);
                Box::new(PersistedStore::create(
                    &path,
                    estimated_molecules,
                    properties::record_bytes(average_size),
                )?)
            }
        };
        let archive = Self::assemble(name, config, store);
        archive.set_state(ArchiveState::Ready);
        Ok(archive)
    }

    /// Load an archive from a container file
    pub fn open<P: AsRef<Path>>(path: P, config: ArchiveConfig) -> Result<Self> {
        let path = path.as_ref();
        let name = file_name(path);
        let file = std::fs::File::open(path)?;
        let archive = Self::load(name, Some(path), file, config)?;
        tracing::info!(
            "Opened archive {} ({} molecules, {} metadata, {})",
            path.display(),
            archive.molecule_count(),
            archive.metadata_count(),
            archive.format()
        );
        Ok(archive)
    }

    /// Load an archive from any container stream
    pub fn from_reader<R: Read>(name: impl Into<String>, reader: R, config: ArchiveConfig) -> Result<Self> {
        Self::load(name.into(), None, reader, config)
    }

    fn load<R: Read>(
        name: String,
        file: Option<&Path>,
        reader: R,
        config: ArchiveConfig,
    ) -> Result<Self> {
        config.validate()?;
        let store_path = config.store_path_for(&name, file);
        let mut loader = Loader::new(&config, store_path);
        let format = container::read_container(reader, &mut loader)?;
        let loaded = loader.finish()?;

        let archive = Self {
            molecule_index: loaded.molecules,
            metadata_index: loaded.metadata,
            tag_index: loaded.tags,
            ..Self::assemble(name, config, loaded.store)
        };
        *archive.file.write() = file.map(Path::to_path_buf);
        *archive.format.write() = format;
        *archive.properties.write() = loaded.properties;
        archive.set_state(ArchiveState::Loading);

        if loaded.recovered {
            archive.finish_recovery()?;
        } else {
            archive.refresh_counts();
        }
        archive.set_state(ArchiveState::Ready);
        Ok(archive)
    }

    /// Rebuild an archive directly from a store file, without a container
    ///
    /// With `force` the store is opened in recovery mode and may have been
    /// left behind by a crashed writer; without it the store must have been
    /// closed cleanly.
    pub fn open_store<P: AsRef<Path>>(
        name: impl Into<String>,
        store_path: P,
        config: ArchiveConfig,
        force: bool,
    ) -> Result<Self> {
        config.validate()?;
        let store = if force {
            PersistedStore::recover(store_path)?
        } else {
            PersistedStore::open_existing(store_path)?
        };
        let scan = store.scan()?;
        let config = ArchiveConfig {
            mode: StorageMode::Virtual,
            ..config
        };

        let archive = Self::assemble(name.into(), config, Box::new(store));
        archive.set_state(ArchiveState::Loading);
        archive.molecule_index.extend(scan.molecule_uids);
        archive.metadata_index.extend(scan.metadata_uids);
        if let Some(stored) = scan.properties {
            *archive.properties.write() = stored;
        }
        archive.finish_recovery()?;
        archive.set_state(ArchiveState::Ready);
        Ok(archive)
    }

    /// Split a flat table into molecules on its `molecule` column
    ///
    /// Each contiguous run of equal `molecule` values becomes one molecule
    /// owning the remaining columns for those rows. One metadata record is
    /// minted and every molecule is linked to it.
    pub fn from_table(name: impl Into<String>, table: &DataTable, config: ArchiveConfig) -> Result<Self> {
        let archive = Self::with_config(name, config)?;
        let groups = table.group_indices(MOLECULE_COLUMN)?;
        let columns: Vec<&str> = table
            .column_names()
            .into_iter()
            .filter(|c| *c != MOLECULE_COLUMN)
            .collect();

        let mut metadata = Metadata::new(uid::new_metadata_uid());
        metadata.add_log_message(&format!(
            "Built from a table of {} rows into {} molecules",
            table.row_count(),
            groups.len()
        ));
        let metadata_uid = metadata.uid.clone();
        archive.add_metadata(metadata)?;

        for group in groups {
            let mut molecule = Molecule::with_table(
                uid::new_uid(),
                table.slice_rows(&columns, group.start, group.end)?,
            );
            molecule.metadata_uid = Some(metadata_uid.clone());
            archive.add_molecule(molecule)?;
        }
        archive.update_properties()?;
        Ok(archive)
    }

    fn assemble(name: String, config: ArchiveConfig, store: Box<dyn RecordStore>) -> Self {
        let format = config.default_format;
        Self {
            name: RwLock::new(name),
            file: RwLock::new(None),
            format: RwLock::new(format),
            state: RwLock::new(ArchiveState::Uninitialized),
            config,
            properties: RwLock::new(ArchiveProperties::default()),
            molecule_index: UidIndex::new(),
            metadata_index: UidIndex::new(),
            tag_index: TagIndex::new(),
            store,
            pool: OnceLock::new(),
        }
    }

    fn finish_recovery(&self) -> Result<()> {
        self.molecule_index.sort_natural();
        self.metadata_index.sort_natural();
        self.refresh_counts();
        self.generate_tags()?;
        tracing::info!(
            "Recovered {} molecules and {} metadata records from {}",
            self.molecule_index.len(),
            self.metadata_index.len(),
            self.store_location()
                .map(|p| p.display().to_string())
                .unwrap_or_default()
        );
        Ok(())
    }

    // ---- lifecycle -------------------------------------------------------

    /// Current lifecycle state
    pub fn state(&self) -> ArchiveState {
        *self.state.read()
    }

    fn set_state(&self, state: ArchiveState) {
        *self.state.write() = state;
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.state() {
            ArchiveState::Ready => Ok(()),
            other => Err(Error::invalid_state(format!(
                "archive '{}' is {:?}",
                self.name(),
                other
            ))),
        }
    }

    /// Release the store; every later call fails with `InvalidState`
    ///
    /// The indices are emptied, so counts and membership checks report an
    /// empty archive. A virtual store is closed cleanly and left on disk.
    pub fn destroy(&self) -> Result<()> {
        {
            let mut state = self.state.write();
            if *state == ArchiveState::Destroyed {
                return Ok(());
            }
            *state = ArchiveState::Destroyed;
        }
        self.molecule_index.clear();
        self.metadata_index.clear();
        self.tag_index.clear();
        self.store.close()?;
        tracing::debug!("Destroyed archive '{}'", self.name());
        Ok(())
    }

    // ---- molecules -------------------------------------------------------

    /// Add a molecule
    ///
    /// Returns `Ok(false)` without touching the stored record when the UID
    /// is already present.
    pub fn add_molecule(&self, molecule: Molecule) -> Result<bool> {
        self.ensure_ready()?;
        if !self.molecule_index.insert(&molecule.uid) {
            tracing::warn!(
                "Archive '{}' already contains molecule {}",
                self.name(),
                molecule.uid
            );
            self.log_to_metadata(&format!(
                "The archive already contains the molecule {}.",
                molecule.uid
            ))?;
            return Ok(false);
        }

        let uid = molecule.uid.clone();
        self.tag_index.refresh(&molecule);
        if let Err(err) = self.store.put_molecule(molecule) {
            self.molecule_index.remove(&uid);
            self.tag_index.remove(&uid);
            return Err(err);
        }
        self.refresh_molecule_count();
        Ok(true)
    }

    /// Replace a stored molecule
    pub fn set_molecule(&self, molecule: Molecule) -> Result<()> {
        self.ensure_ready()?;
        if !self.molecule_index.contains(&molecule.uid) {
            return Err(Error::not_found(format!("molecule {}", molecule.uid)));
        }
        self.tag_index.refresh(&molecule);
        self.store.put_molecule(molecule)
    }

    /// Fetch a copy of a molecule
    pub fn get_molecule(&self, uid: &str) -> Result<Option<Molecule>> {
        self.ensure_ready()?;
        if !self.molecule_index.contains(uid) {
            return Ok(None);
        }
        self.store.get_molecule(uid)
    }

    /// Fetch the molecule at `index` in archive order
    pub fn molecule_at(&self, index: usize) -> Result<Molecule> {
        let uid = self.uid_at(index)?;
        self.store
            .get_molecule(&uid)?
            .ok_or_else(|| Error::not_found(format!("molecule {}", uid)))
    }

    /// Remove a molecule; returns whether it was present
    pub fn remove_molecule(&self, uid: &str) -> Result<bool> {
        self.ensure_ready()?;
        if !self.molecule_index.remove(uid) {
            return Ok(false);
        }
        self.tag_index.remove(uid);
        self.store.remove_molecule(uid)?;
        self.refresh_molecule_count();
        Ok(true)
    }

    /// Remove every molecule carrying `tag`; returns how many were removed
    pub fn delete_by_tag(&self, tag: &str) -> Result<usize> {
        self.ensure_ready()?;
        let uids = self.molecule_index.snapshot();
        let store = self.store.as_ref();
        let tags = &self.tag_index;

        let removed: Vec<Option<String>> = self.pool()?.install(|| {
            uids.par_iter()
                .map(|uid| -> Result<Option<String>> {
                    match store.get_molecule(uid)? {
                        Some(molecule) if molecule.has_tag(tag) => {
                            store.remove_molecule(uid)?;
                            tags.remove(uid);
                            Ok(Some(uid.clone()))
                        }
                        _ => Ok(None),
                    }
                })
                .collect::<Result<Vec<_>>>()
        })?;

        let removed: HashSet<String> = removed.into_iter().flatten().collect();
        self.molecule_index.retain(|uid| !removed.contains(uid));
        self.refresh_molecule_count();
        tracing::debug!(
            "Deleted {} molecules tagged '{}' from '{}'",
            removed.len(),
            tag,
            self.name()
        );
        Ok(removed.len())
    }

    /// Whether the archive holds `uid`
    pub fn contains_molecule(&self, uid: &str) -> bool {
        self.molecule_index.contains(uid)
    }

    /// Position of `uid` in archive order
    pub fn index_of(&self, uid: &str) -> Option<usize> {
        self.molecule_index.position(uid)
    }

    /// UID at `index` in archive order
    pub fn uid_at(&self, index: usize) -> Result<String> {
        self.ensure_ready()?;
        self.molecule_index
            .get(index)
            .ok_or(Error::IndexOutOfRange {
                index,
                len: self.molecule_index.len(),
            })
    }

    /// Snapshot of the molecule UIDs in archive order
    pub fn molecule_uids(&self) -> Vec<String> {
        self.molecule_index.snapshot()
    }

    /// Number of molecules
    pub fn molecule_count(&self) -> usize {
        self.molecule_index.len()
    }

    /// Sort the molecule index in natural order
    pub fn sort_molecule_index(&self) -> Result<()> {
        self.ensure_ready()?;
        self.molecule_index.sort_natural();
        Ok(())
    }

    /// Visit every molecule in archive order
    ///
    /// Molecules removed while the walk is running are skipped.
    pub fn for_each_molecule<F>(&self, mut visit: F) -> Result<()>
    where
        F: FnMut(Molecule) -> Result<()>,
    {
        self.ensure_ready()?;
        for uid in self.molecule_index.snapshot() {
            if let Some(molecule) = self.store.get_molecule(&uid)? {
                visit(molecule)?;
            }
        }
        Ok(())
    }

    /// UIDs of molecules carrying `tag`, in archive order
    pub fn uids_with_tag(&self, tag: &str) -> Result<Vec<String>> {
        let mut uids = Vec::new();
        self.for_each_molecule(|molecule| {
            if molecule.has_tag(tag) {
                uids.push(molecule.uid);
            }
            Ok(())
        })?;
        Ok(uids)
    }

    /// Number of molecules carrying each tag
    pub fn tag_histogram(&self) -> Result<BTreeMap<String, usize>> {
        let mut histogram = BTreeMap::new();
        self.for_each_molecule(|molecule| {
            for tag in molecule.tags {
                *histogram.entry(tag).or_insert(0) += 1;
            }
            Ok(())
        })?;
        Ok(histogram)
    }

    /// Union of the data-table columns of every molecule
    pub fn molecule_column_names(&self) -> Result<BTreeSet<String>> {
        let mut names = BTreeSet::new();
        self.for_each_molecule(|molecule| {
            names.extend(molecule.data_table.column_names().into_iter().map(str::to_string));
            Ok(())
        })?;
        Ok(names)
    }

    /// Union of the segment-table column pairs of every molecule
    pub fn segment_table_names(&self) -> Result<BTreeSet<(String, String)>> {
        let mut names = BTreeSet::new();
        self.for_each_molecule(|molecule| {
            names.extend(molecule.segment_table_names());
            Ok(())
        })?;
        Ok(names)
    }

    /// Molecules whose metadata reference does not resolve
    pub fn dangling_metadata_refs(&self) -> Result<Vec<String>> {
        let mut dangling = Vec::new();
        self.for_each_molecule(|molecule| {
            if let Some(meta) = &molecule.metadata_uid {
                if !self.metadata_index.contains(meta) {
                    dangling.push(molecule.uid);
                }
            }
            Ok(())
        })?;
        Ok(dangling)
    }

    // ---- tags ------------------------------------------------------------

    /// Joined tag list of a molecule, `None` when it has no tags
    pub fn get_tag_list(&self, uid: &str) -> Result<Option<String>> {
        self.ensure_ready()?;
        Ok(self.tag_index.get(uid))
    }

    /// Rebuild the tag index from the stored molecules
    pub fn generate_tag_index(&self) -> Result<()> {
        self.ensure_ready()?;
        self.generate_tags()
    }

    fn generate_tags(&self) -> Result<()> {
        let uids = self.molecule_index.snapshot();
        let store = self.store.as_ref();
        let tags = &self.tag_index;

        self.pool()?.install(|| {
            uids.par_iter().try_for_each(|uid| -> Result<()> {
                match store.get_molecule(uid)? {
                    Some(molecule) => tags.refresh(&molecule),
                    None => {
                        tags.remove(uid);
                    }
                }
                Ok(())
            })
        })?;

        let pruned = self.tag_index.retain(|uid| self.molecule_index.contains(uid));
        if pruned > 0 {
            tracing::warn!(
                "Pruned {} tag entries for molecules no longer in '{}'",
                pruned,
                self.name()
            );
        }
        Ok(())
    }

    fn pool(&self) -> Result<&rayon::ThreadPool> {
        if let Some(pool) = self.pool.get() {
            return Ok(pool);
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.effective_worker_threads())
            .thread_name(|i| format!("mars-worker-{}", i))
            .build()
            .map_err(|e| Error::config(format!("failed to start worker pool: {}", e)))?;
        Ok(self.pool.get_or_init(|| pool))
    }

    // ---- metadata --------------------------------------------------------

    /// Add a metadata record; returns `Ok(false)` if the UID is present
    pub fn add_metadata(&self, metadata: Metadata) -> Result<bool> {
        self.ensure_ready()?;
        if !self.metadata_index.insert(&metadata.uid) {
            tracing::warn!(
                "Archive '{}' already contains metadata {}",
                self.name(),
                metadata.uid
            );
            return Ok(false);
        }
        let uid = metadata.uid.clone();
        if let Err(err) = self.store.put_metadata(metadata) {
            self.metadata_index.remove(&uid);
            return Err(err);
        }
        self.refresh_metadata_count();
        Ok(true)
    }

    /// Insert or replace a metadata record
    pub fn set_metadata(&self, metadata: Metadata) -> Result<()> {
        self.ensure_ready()?;
        let uid = metadata.uid.clone();
        let inserted = self.metadata_index.insert(&uid);
        if let Err(err) = self.store.put_metadata(metadata) {
            if inserted {
                self.metadata_index.remove(&uid);
            }
            return Err(err);
        }
        self.refresh_metadata_count();
        Ok(())
    }

    /// Remove a metadata record; returns whether it was present
    pub fn remove_metadata(&self, uid: &str) -> Result<bool> {
        self.ensure_ready()?;
        if !self.metadata_index.remove(uid) {
            return Ok(false);
        }
        self.store.remove_metadata(uid)?;
        self.refresh_metadata_count();
        Ok(true)
    }

    /// Fetch a copy of a metadata record
    pub fn get_metadata(&self, uid: &str) -> Result<Option<Metadata>> {
        self.ensure_ready()?;
        if !self.metadata_index.contains(uid) {
            return Ok(None);
        }
        self.store.get_metadata(uid)
    }

    /// Fetch the metadata record at `index`
    pub fn metadata_at(&self, index: usize) -> Result<Metadata> {
        self.ensure_ready()?;
        let uid = self.metadata_index.get(index).ok_or(Error::IndexOutOfRange {
            index,
            len: self.metadata_index.len(),
        })?;
        self.store
            .get_metadata(&uid)?
            .ok_or_else(|| Error::not_found(format!("metadata {}", uid)))
    }

    /// Whether the archive holds metadata `uid`
    pub fn contains_metadata(&self, uid: &str) -> bool {
        self.metadata_index.contains(uid)
    }

    /// Snapshot of the metadata UIDs in archive order
    pub fn metadata_uids(&self) -> Vec<String> {
        self.metadata_index.snapshot()
    }

    /// Number of metadata records
    pub fn metadata_count(&self) -> usize {
        self.metadata_index.len()
    }

    /// Append `message` to the log of every metadata record
    pub fn add_log_message(&self, message: &str) -> Result<()> {
        self.ensure_ready()?;
        self.log_to_metadata(message)
    }

    fn log_to_metadata(&self, message: &str) -> Result<()> {
        for uid in self.metadata_index.snapshot() {
            if let Some(mut metadata) = self.store.get_metadata(&uid)? {
                metadata.add_log_message(message);
                self.store.put_metadata(metadata)?;
            }
        }
        Ok(())
    }

    // ---- properties ------------------------------------------------------

    /// Snapshot of the archive properties
    pub fn properties(&self) -> ArchiveProperties {
        self.properties.read().clone()
    }

    /// Recount records and resample the average molecule size
    ///
    /// In virtual mode the result is also written to the store.
    pub fn update_properties(&self) -> Result<ArchiveProperties> {
        self.ensure_ready()?;
        let uids = self.molecule_index.snapshot();
        let sample = properties::sample_indices(
            uids.len(),
            self.config.sample_size,
            self.config.effective_sample_seed(),
        );

        let mut sizes = Vec::with_capacity(sample.len());
        for index in sample {
            if let Some(molecule) = self.store.get_molecule(&uids[index])? {
                sizes.push(codec::encoded_len(&molecule, Format::Binary)?);
            }
        }

        let snapshot = {
            let mut props = self.properties.write();
            props.molecule_count = self.molecule_index.len() as u64;
            props.metadata_count = self.metadata_index.len() as u64;
            props.average_molecule_size = properties::mean_size(&sizes);
            props.clone()
        };
        if self.store.is_virtual() {
            self.store.put_properties(&snapshot)?;
        }
        Ok(snapshot)
    }

    /// Archive comments
    pub fn comments(&self) -> String {
        self.properties.read().comments.clone()
    }

    /// Replace the archive comments
    pub fn set_comments(&self, comments: impl Into<String>) -> Result<()> {
        self.ensure_ready()?;
        let snapshot = {
            let mut props = self.properties.write();
            props.comments = comments.into();
            props.clone()
        };
        if self.store.is_virtual() {
            self.store.put_properties(&snapshot)?;
        }
        Ok(())
    }

    fn refresh_counts(&self) {
        let mut props = self.properties.write();
        props.molecule_count = self.molecule_index.len() as u64;
        props.metadata_count = self.metadata_index.len() as u64;
    }

    fn refresh_molecule_count(&self) {
        self.properties.write().molecule_count = self.molecule_index.len() as u64;
    }

    fn refresh_metadata_count(&self) {
        self.properties.write().metadata_count = self.metadata_index.len() as u64;
    }

    // ---- identity --------------------------------------------------------

    /// Archive name
    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    /// Rename the archive
    pub fn set_name(&self, name: impl Into<String>) {
        *self.name.write() = name.into();
    }

    /// Container file this archive was loaded from or last saved to
    pub fn file(&self) -> Option<PathBuf> {
        self.file.read().clone()
    }

    /// Point the archive at a different container file
    pub fn set_file(&self, file: Option<PathBuf>) {
        *self.file.write() = file;
    }

    /// Encoding used by `save`
    pub fn format(&self) -> Format {
        *self.format.read()
    }

    /// Change the encoding used by `save`
    pub fn set_format(&self, format: Format) {
        *self.format.write() = format;
    }

    /// Whether records live in a persisted store
    pub fn is_virtual(&self) -> bool {
        self.store.is_virtual()
    }

    /// Persisted store file, for virtual archives
    pub fn store_location(&self) -> Option<PathBuf> {
        self.store.location().map(Path::to_path_buf)
    }

    /// Configuration the archive was built with
    pub fn config(&self) -> &ArchiveConfig {
        &self.config
    }

    // ---- persistence -----------------------------------------------------

    /// Write the archive back to its file
    pub fn save(&self) -> Result<()> {
        let file = self
            .file()
            .ok_or_else(|| Error::invalid_state("archive has no file; use save_as"))?;
        self.save_as(file).map(|_| ())
    }

    /// Write the archive to `path`, adding the `.yama` extension if missing
    ///
    /// The container is written to a temporary file in the same directory
    /// and renamed into place, so a failed save leaves any previous file
    /// untouched. Returns the path actually written.
    pub fn save_as<P: AsRef<Path>>(&self, path: P) -> Result<PathBuf> {
        self.ensure_ready()?;
        let path = container_path(path.as_ref());
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let mut temp = tempfile::NamedTempFile::new_in(&dir)?;
        {
            let mut writer = BufWriter::new(temp.as_file_mut());
            self.write_to(&mut writer, self.format())?;
            writer.flush()?;
        }
        temp.as_file().sync_all()?;
        temp.persist(&path).map_err(|e| Error::Io(e.error))?;

        *self.file.write() = Some(path.clone());
        self.set_name(file_name(&path));
        tracing::info!(
            "Saved archive '{}' to {} ({})",
            self.name(),
            path.display(),
            self.format()
        );
        Ok(path)
    }

    /// Stream the archive as a container in `format`
    pub fn write_to<W: Write>(&self, writer: W, format: Format) -> Result<()> {
        let properties = self.update_properties()?;
        let metadata = self.metadata_index.snapshot();
        let molecules = self.molecule_index.snapshot();
        container::write_container(
            writer,
            format,
            &properties,
            &metadata,
            &molecules,
            self.store.as_ref(),
        )
    }
}

/// Append the container extension unless `path` already has it
pub fn container_path(path: &Path) -> PathBuf {
    if path.extension().and_then(|e| e.to_str()) == Some(container::EXTENSION) {
        return path.to_path_buf();
    }
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(container::EXTENSION);
    PathBuf::from(name)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

struct Loaded {
    store: Box<dyn RecordStore>,
    molecules: UidIndex,
    metadata: UidIndex,
    tags: TagIndex,
    properties: ArchiveProperties,
    recovered: bool,
}

/// Streams container records into a fresh store
///
/// The store is created when the properties arrive, because a persisted
/// store is sized from the counts they carry. Records are written in
/// batches of `load_batch_size`.
struct Loader<'a> {
    config: &'a ArchiveConfig,
    store_path: PathBuf,
    store: Option<Box<dyn RecordStore>>,
    molecules: UidIndex,
    metadata: UidIndex,
    tags: TagIndex,
    properties: ArchiveProperties,
    molecule_batch: Vec<Molecule>,
    metadata_batch: Vec<Metadata>,
    recovered: bool,
}

impl<'a> Loader<'a> {
    fn new(config: &'a ArchiveConfig, store_path: PathBuf) -> Self {
        Self {
            config,
            store_path,
            store: None,
            molecules: UidIndex::new(),
            metadata: UidIndex::new(),
            tags: TagIndex::new(),
            properties: ArchiveProperties::default(),
            molecule_batch: Vec::new(),
            metadata_batch: Vec::new(),
            recovered: false,
        }
    }

    fn flush(&mut self) -> Result<()> {
        let store = self
            .store
            .as_deref()
            .ok_or_else(|| Error::invalid_state("records arrived before properties"))?;
        if !self.metadata_batch.is_empty() {
            store.put_metadata_batch(std::mem::take(&mut self.metadata_batch))?;
        }
        if !self.molecule_batch.is_empty() {
            let batch = std::mem::take(&mut self.molecule_batch);
            tracing::debug!("Loaded batch of {} molecules", batch.len());
            store.put_molecules(batch)?;
        }
        Ok(())
    }

    fn finish(mut self) -> Result<Loaded> {
        if self.store.is_some() {
            self.flush()?;
        }
        let store = self.store.ok_or(Error::MissingProperties)?;
        Ok(Loaded {
            store,
            molecules: self.molecules,
            metadata: self.metadata,
            tags: self.tags,
            properties: self.properties,
            recovered: self.recovered,
        })
    }

    fn recover_store(&mut self) -> Result<()> {
        tracing::info!("Recovering existing store {}", self.store_path.display());
        let store = PersistedStore::recover(&self.store_path)?;
        let scan = store.scan()?;
        self.molecules.extend(scan.molecule_uids);
        self.metadata.extend(scan.metadata_uids);
        if let Some(stored) = scan.properties {
            self.properties.comments = stored.comments;
        }
        self.store = Some(Box::new(store));
        self.recovered = true;
        Ok(())
    }
}

impl RecordSink for Loader<'_> {
    fn properties(&mut self, properties: ArchiveProperties) -> Result<Flow> {
        self.properties = properties;
        match self.config.mode {
            StorageMode::InMemory => {
                self.store = Some(Box::new(InMemoryStore::new()));
                Ok(Flow::Continue)
            }
            StorageMode::Virtual
                if self.config.recover_existing_store && self.store_path.exists() =>
            {
                self.recover_store()?;
                Ok(Flow::Stop)
            }
            StorageMode::Virtual => {
                let (entries, value_bytes) = self.properties.store_estimate();
                let store =
                    PersistedStore::create(&self.store_path, entries, value_bytes)?;
                store.put_properties(&self.properties)?;
                self.store = Some(Box::new(store));
                Ok(Flow::Continue)
            }
        }
    }

    fn metadata(&mut self, metadata: Metadata) -> Result<()> {
        if !self.metadata.insert(&metadata.uid) {
            tracing::warn!("Skipping duplicate metadata {} in container", metadata.uid);
            return Ok(());
        }
        self.metadata_batch.push(metadata);
        if self.metadata_batch.len() >= self.config.load_batch_size {
            self.flush()?;
        }
        Ok(())
    }

    fn molecule(&mut self, molecule: Molecule) -> Result<()> {
        if !self.molecules.insert(&molecule.uid) {
            tracing::warn!("Skipping duplicate molecule {} in container", molecule.uid);
            return Ok(());
        }
        self.tags.refresh(&molecule);
        self.molecule_batch.push(molecule);
        if self.molecule_batch.len() >= self.config.load_batch_size {
            self.flush()?;
        }
        Ok(())
    }
}
