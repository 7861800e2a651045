//! Record storage backends
//!
//! An archive keeps its records in exactly one [`RecordStore`]:
//! - [`InMemoryStore`]: concurrent hash maps in process memory
//! - [`PersistedStore`]: binary-encoded records in a single-file LMDB map
//!
//! Both hand out owned copies, so callers never alias stored state and a
//! `put` is always a full replacement.

pub mod memory;
pub mod persisted;
pub mod persisted_map;

pub use memory::InMemoryStore;
pub use persisted::{PersistedStore, RecordKey, StoreScan};
pub use persisted_map::PersistedMap;

use crate::Result;
use crate::properties::ArchiveProperties;
use crate::record::{Metadata, Molecule};
use std::path::Path;

/// Whole-record storage for molecules and metadata
pub trait RecordStore: Send + Sync + std::fmt::Debug {
    /// Fetch a molecule
    fn get_molecule(&self, uid: &str) -> Result<Option<Molecule>>;

    /// Insert or replace a molecule
    fn put_molecule(&self, molecule: Molecule) -> Result<()>;

    /// Insert or replace a batch of molecules
    fn put_molecules(&self, molecules: Vec<Molecule>) -> Result<()> {
        for molecule in molecules {
            self.put_molecule(molecule)?;
        }
        Ok(())
    }

    /// Delete a molecule; returns whether it existed
    fn remove_molecule(&self, uid: &str) -> Result<bool>;

    /// Fetch a metadata record
    fn get_metadata(&self, uid: &str) -> Result<Option<Metadata>>;

    /// Insert or replace a metadata record
    fn put_metadata(&self, metadata: Metadata) -> Result<()>;

    /// Insert or replace a batch of metadata records
    fn put_metadata_batch(&self, records: Vec<Metadata>) -> Result<()> {
        for metadata in records {
            self.put_metadata(metadata)?;
        }
        Ok(())
    }

    /// Delete a metadata record; returns whether it existed
    fn remove_metadata(&self, uid: &str) -> Result<bool>;

    /// Persist the archive properties, if the backend keeps them
    fn put_properties(&self, properties: &ArchiveProperties) -> Result<()>;

    /// Backing file, for stores that have one
    fn location(&self) -> Option<&Path>;

    /// Whether records live outside process memory
    fn is_virtual(&self) -> bool;

    /// Flush and release the backend
    fn close(&self) -> Result<()>;
}
