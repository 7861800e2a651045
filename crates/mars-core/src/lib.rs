//! Mars Core - Molecule Archive Storage Engine
//!
//! This crate stores large collections of single-molecule records and the
//! metadata of the acquisitions they came from:
//! - Record types (molecules, metadata, data tables) with UID generation
//! - Self-describing record codec (MessagePack binary or JSON text)
//! - Dual storage backend: concurrent in-memory maps or a single-file LMDB
//!   store for archives larger than RAM
//! - Streamed container format with format sniffing
//! - Crash recovery of persisted stores by key enumeration
//! - Ordered UID indices and a derived tag index rebuilt in parallel
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │        ArchiveRegistry / MoleculeArchive     │
//! │   (CRUD, tag index, properties, lifecycle)  │
//! └──────────────┬──────────────────────────────┘
//!                │
//! ┌──────────────┴──────────────────────────────┐
//! │             Container Layer                  │
//! │   (sniffing, streamed read/write, framing)  │
//! └──────────────┬──────────────────────────────┘
//!                │
//! ┌──────────────┴──────────────────────────────┐
//! │              Store Layer                     │
//! │  (InMemoryStore, PersistedStore over LMDB)  │
//! └──────────────┬──────────────────────────────┘
//!                │
//! ┌──────────────┴──────────────────────────────┐
//! │              Record Codec                    │
//! │        (MessagePack, JSON via serde)        │
//! └─────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod archive;
pub mod codec;
pub mod config;
pub mod container;
pub mod error;
pub mod index;
mod numbers;
pub mod properties;
pub mod record;
pub mod registry;
pub mod store;
pub mod table;
pub mod tags;
pub mod uid;

pub use archive::{ArchiveState, MoleculeArchive};
pub use codec::Format;
pub use config::{ArchiveConfig, StorageMode};
pub use error::{Error, Result};
pub use properties::ArchiveProperties;
pub use record::{Metadata, Molecule, SegmentTable, ViewSource};
pub use registry::ArchiveRegistry;
pub use table::DataTable;
