//! Heap-resident record store

use super::RecordStore;
use crate::Result;
use crate::properties::ArchiveProperties;
use crate::record::{Metadata, Molecule};
use dashmap::DashMap;
use std::path::Path;

/// Records held in concurrent hash maps
#[derive(Debug, Default)]
pub struct InMemoryStore {
    molecules: DashMap<String, Molecule>,
    metadata: DashMap<String, Metadata>,
}

impl InMemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored molecules
    pub fn molecule_count(&self) -> usize {
        self.molecules.len()
    }

    /// Number of stored metadata records
    pub fn metadata_count(&self) -> usize {
        self.metadata.len()
    }
}

impl RecordStore for InMemoryStore {
    fn get_molecule(&self, uid: &str) -> Result<Option<Molecule>> {
        Ok(self.molecules.get(uid).map(|entry| entry.value().clone()))
    }

    fn put_molecule(&self, molecule: Molecule) -> Result<()> {
        self.molecules.insert(molecule.uid.clone(), molecule);
        Ok(())
    }

    fn remove_molecule(&self, uid: &str) -> Result<bool> {
        Ok(self.molecules.remove(uid).is_some())
    }

    fn get_metadata(&self, uid: &str) -> Result<Option<Metadata>> {
        Ok(self.metadata.get(uid).map(|entry| entry.value().clone()))
    }

    fn put_metadata(&self, metadata: Metadata) -> Result<()> {
        self.metadata.insert(metadata.uid.clone(), metadata);
        Ok(())
    }

    fn remove_metadata(&self, uid: &str) -> Result<bool> {
        Ok(self.metadata.remove(uid).is_some())
    }

    fn put_properties(&self, _properties: &ArchiveProperties) -> Result<()> {
        Ok(())
    }

    fn location(&self) -> Option<&Path> {
        None
    }

    fn is_virtual(&self) -> bool {
        false
    }

    fn close(&self) -> Result<()> {
        self.molecules.clear();
        self.metadata.clear();
        Ok(())
    }
}
