//! LMDB-backed record store
//!
//! Every record is stored binary-encoded under a typed key: one prefix byte
//! naming the record kind followed by the UID. The archive properties sit
//! under the bare sentinel key `p`.

use super::RecordStore;
use super::persisted_map::{self, PersistedMap};
use crate::codec::{self, Format};
use crate::properties::ArchiveProperties;
use crate::record::{Metadata, Molecule};
use crate::{Error, Result};
use std::path::Path;

const PROPERTIES_PREFIX: u8 = b'p';
const METADATA_PREFIX: u8 = b'd';
const MOLECULE_PREFIX: u8 = b'm';

/// Key of one entry in a persisted store
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RecordKey {
    /// Archive properties sentinel
    Properties,
    /// Metadata record
    Metadata(String),
    /// Molecule record
    Molecule(String),
}

impl RecordKey {
    /// Byte form stored in the map
    pub fn encode(&self) -> Vec<u8> {
        match self {
            RecordKey::Properties => vec![PROPERTIES_PREFIX],
            RecordKey::Metadata(uid) => prefixed(METADATA_PREFIX, uid),
            RecordKey::Molecule(uid) => prefixed(MOLECULE_PREFIX, uid),
        }
    }

    /// Classify a stored key
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let Some((&prefix, rest)) = bytes.split_first() else {
            return Err(Error::recovery("empty key in store"));
        };
        let uid = || {
            std::str::from_utf8(rest)
                .map(str::to_string)
                .map_err(|_| Error::recovery(format!("key {:?} is not valid UTF-8", bytes)))
        };
        match prefix {
            PROPERTIES_PREFIX if rest.is_empty() => Ok(RecordKey::Properties),
            METADATA_PREFIX if !rest.is_empty() => Ok(RecordKey::Metadata(uid()?)),
            MOLECULE_PREFIX if !rest.is_empty() => Ok(RecordKey::Molecule(uid()?)),
            _ => Err(Error::recovery(format!(
                "unrecognized key {:?}",
                String::from_utf8_lossy(bytes)
            ))),
        }
    }
}

fn prefixed(prefix: u8, uid: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(uid.len() + 1);
    key.push(prefix);
    key.extend_from_slice(uid.as_bytes());
    key
}

/// Everything a key scan finds in a store
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreScan {
    /// Properties found under the sentinel key
    pub properties: Option<ArchiveProperties>,
    /// Molecule UIDs, in key order
    pub molecule_uids: Vec<String>,
    /// Metadata UIDs, in key order
    pub metadata_uids: Vec<String>,
}

/// Record store on top of a [`PersistedMap`]
#[derive(Debug)]
pub struct PersistedStore {
    map: PersistedMap,
}

impl PersistedStore {
    /// Create a fresh store at `path`, replacing any existing file
    ///
    /// When `path` is owned by another live store in this process the new
    /// store goes next to it under a numbered name; see [`location`].
    ///
    /// [`location`]: RecordStore::location
    pub fn create<P: AsRef<Path>>(
        path: P,
        estimated_entries: usize,
        estimated_value_bytes: usize,
    ) -> Result<Self> {
        Ok(Self {
            map: persisted_map::create_unclaimed(
                path.as_ref(),
                estimated_entries,
                estimated_value_bytes,
            )?,
        })
    }

    /// Open a cleanly closed store
    pub fn open_existing<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self {
            map: PersistedMap::open_existing(path)?,
        })
    }

    /// Force-open a store after a crash
    pub fn recover<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self {
            map: PersistedMap::recover(path)?,
        })
    }

    /// Underlying map
    pub fn map(&self) -> &PersistedMap {
        &self.map
    }

    /// Stored archive properties
    pub fn get_properties(&self) -> Result<Option<ArchiveProperties>> {
        self.get_record(&RecordKey::Properties)
    }

    /// Enumerate and classify every key
    ///
    /// Any key that is not a properties, metadata or molecule key fails the
    /// whole scan with [`Error::Recovery`].
    pub fn scan(&self) -> Result<StoreScan> {
        let mut scan = StoreScan::default();
        for key in self.map.keys()? {
            match RecordKey::decode(&key)? {
                RecordKey::Properties => scan.properties = self.get_properties()?,
                RecordKey::Metadata(uid) => scan.metadata_uids.push(uid),
                RecordKey::Molecule(uid) => scan.molecule_uids.push(uid),
            }
        }
        tracing::debug!(
            "Scanned {}: {} molecules, {} metadata",
            self.map.path().display(),
            scan.molecule_uids.len(),
            scan.metadata_uids.len()
        );
        Ok(scan)
    }

    fn get_record<T: serde::de::DeserializeOwned>(&self, key: &RecordKey) -> Result<Option<T>> {
        match self.map.get(&key.encode())? {
            Some(bytes) => Ok(Some(codec::decode(&bytes, Format::Binary)?)),
            None => Ok(None),
        }
    }

    fn put_record<T: serde::Serialize>(&self, key: &RecordKey, record: &T) -> Result<()> {
        let bytes = codec::encode(record, Format::Binary)?;
        self.map.put(&key.encode(), &bytes)
    }
}

impl RecordStore for PersistedStore {
    fn get_molecule(&self, uid: &str) -> Result<Option<Molecule>> {
        self.get_record(&RecordKey::Molecule(uid.to_string()))
    }

    fn put_molecule(&self, molecule: Molecule) -> Result<()> {
        self.put_record(&RecordKey::Molecule(molecule.uid.clone()), &molecule)
    }

    fn put_molecules(&self, molecules: Vec<Molecule>) -> Result<()> {
        let entries = molecules
            .iter()
            .map(|m| {
                let key = RecordKey::Molecule(m.uid.clone()).encode();
                Ok((key, codec::encode(m, Format::Binary)?))
            })
            .collect::<Result<Vec<_>>>()?;
        self.map.put_many(&entries)
    }

    fn remove_molecule(&self, uid: &str) -> Result<bool> {
        self.map
            .remove(&RecordKey::Molecule(uid.to_string()).encode())
    }

    fn get_metadata(&self, uid: &str) -> Result<Option<Metadata>> {
        self.get_record(&RecordKey::Metadata(uid.to_string()))
    }

    fn put_metadata(&self, metadata: Metadata) -> Result<()> {
        self.put_record(&RecordKey::Metadata(metadata.uid.clone()), &metadata)
    }

    fn put_metadata_batch(&self, records: Vec<Metadata>) -> Result<()> {
        let entries = records
            .iter()
            .map(|m| {
                let key = RecordKey::Metadata(m.uid.clone()).encode();
                Ok((key, codec::encode(m, Format::Binary)?))
            })
            .collect::<Result<Vec<_>>>()?;
        self.map.put_many(&entries)
    }

    fn remove_metadata(&self, uid: &str) -> Result<bool> {
        self.map
            .remove(&RecordKey::Metadata(uid.to_string()).encode())
    }

    fn put_properties(&self, properties: &ArchiveProperties) -> Result<()> {
        self.put_record(&RecordKey::Properties, properties)
    }

    fn location(&self) -> Option<&Path> {
        Some(self.map.path())
    }

    fn is_virtual(&self) -> bool {
        true
    }

    fn close(&self) -> Result<()> {
        self.map.close()
    }
}
