//! Archive-wide properties record
//!
//! The properties record is the first entry of every container and, in
//! virtual mode, lives under the store's sentinel key so a recovered store
//! still knows its comments.

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

/// Aggregate archive properties
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveProperties {
    /// Number of molecules
    pub molecule_count: u64,
    /// Number of metadata records
    pub metadata_count: u64,
    /// Mean binary-encoded molecule size in bytes, from a sample
    #[serde(with = "crate::numbers::value")]
    pub average_molecule_size: f64,
    /// Free-text archive comments
    pub comments: String,
}

impl ArchiveProperties {
    /// Record count and per-record byte size to size a new store with
    ///
    /// The counts come straight from a container, so they saturate instead
    /// of overflowing, and an average that is not a finite positive number
    /// counts as zero.
    pub fn store_estimate(&self) -> (usize, usize) {
        let records = self.molecule_count.saturating_add(self.metadata_count);
        let records = usize::try_from(records).unwrap_or(usize::MAX);
        (records, record_bytes(self.average_molecule_size))
    }
}

/// Whole bytes for an average record size; zero unless finite and positive
pub fn record_bytes(average: f64) -> usize {
    if average.is_finite() && average > 0.0 {
        // float-to-int casts saturate
        average.ceil() as usize
    } else {
        0
    }
}

/// Choose up to `n` distinct indices below `len`, in ascending order
///
/// Deterministic for a given seed. When `n >= len` every index is returned.
pub fn sample_indices(len: usize, n: usize, seed: u64) -> Vec<usize> {
    if n >= len {
        return (0..len).collect();
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let mut picked = rand::seq::index::sample(&mut rng, len, n).into_vec();
    picked.sort_unstable();
    picked
}

/// Arithmetic mean, zero for an empty slice
pub fn mean_size(sizes: &[usize]) -> f64 {
    if sizes.is_empty() {
        return 0.0;
    }
    sizes.iter().sum::<usize>() as f64 / sizes.len() as f64
}
