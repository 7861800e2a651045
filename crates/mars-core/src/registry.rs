//! Name-keyed collection of open archives

use crate::archive::MoleculeArchive;
use crate::container::EXTENSION;
use crate::{Error, Result};
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::sync::Arc;

/// Open archives keyed by unique name, in the order they were added
#[derive(Debug, Default)]
pub struct ArchiveRegistry {
    archives: RwLock<IndexMap<String, Arc<MoleculeArchive>>>,
}

impl ArchiveRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an archive, renaming it if its name is taken
    ///
    /// `run.yama` becomes `run1.yama`, then `run2.yama` and so on. Returns
    /// the name the archive was registered under.
    pub fn add(&self, archive: MoleculeArchive) -> String {
        let mut archives = self.archives.write();
        let name = unique_name(&archive.name(), |candidate| archives.contains_key(candidate));
        archive.set_name(name.clone());
        archives.insert(name.clone(), Arc::new(archive));
        name
    }

    /// Look up an archive by name
    pub fn get(&self, name: &str) -> Option<Arc<MoleculeArchive>> {
        self.archives.read().get(name).cloned()
    }

    /// Whether an archive is registered under `name`
    pub fn contains(&self, name: &str) -> bool {
        self.archives.read().contains_key(name)
    }

    /// Registered names in insertion order
    pub fn names(&self) -> Vec<String> {
        self.archives.read().keys().cloned().collect()
    }

    /// Number of registered archives
    pub fn len(&self) -> usize {
        self.archives.read().len()
    }

    /// Whether no archive is registered
    pub fn is_empty(&self) -> bool {
        self.archives.read().is_empty()
    }

    /// Rename an archive
    ///
    /// Returns `Ok(false)` and leaves everything unchanged when `new_name`
    /// is already taken.
    pub fn rename(&self, old_name: &str, new_name: &str) -> Result<bool> {
        let mut archives = self.archives.write();
        if archives.contains_key(new_name) {
            tracing::error!(
                "An archive is already open as '{}'; choose another name",
                new_name
            );
            return Ok(false);
        }
        let archive = archives
            .shift_remove(old_name)
            .ok_or_else(|| Error::not_found(format!("archive '{}'", old_name)))?;
        archive.set_name(new_name);
        archives.insert(new_name.to_string(), archive);
        Ok(true)
    }

    /// Unregister and destroy an archive; returns whether it was registered
    pub fn remove(&self, name: &str) -> Result<bool> {
        let removed = self.archives.write().shift_remove(name);
        match removed {
            Some(archive) => {
                archive.destroy()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Data-table columns across all archives
    ///
    /// Molecules within one archive share their columns, so only the first
    /// molecule of each archive is inspected. Empty archives are skipped.
    pub fn column_names(&self) -> Result<Vec<String>> {
        let mut columns: Vec<String> = Vec::new();
        for archive in self.snapshot() {
            let Some(first) = first_molecule(&archive)? else {
                continue;
            };
            for column in first.data_table.column_names() {
                if !columns.iter().any(|c| c == column) {
                    columns.push(column.to_string());
                }
            }
        }
        Ok(columns)
    }

    /// Segment-table column pairs across all archives
    ///
    /// Inspects the first molecule of each archive, like
    /// [`column_names`](Self::column_names).
    pub fn segment_table_names(&self) -> Result<Vec<(String, String)>> {
        let mut names: Vec<(String, String)> = Vec::new();
        for archive in self.snapshot() {
            let Some(first) = first_molecule(&archive)? else {
                continue;
            };
            for pair in first.segment_table_names() {
                if !names.contains(&pair) {
                    names.push(pair);
                }
            }
        }
        Ok(names)
    }

    fn snapshot(&self) -> Vec<Arc<MoleculeArchive>> {
        self.archives.read().values().cloned().collect()
    }
}

fn first_molecule(archive: &MoleculeArchive) -> Result<Option<crate::record::Molecule>> {
    if archive.molecule_count() == 0 {
        return Ok(None);
    }
    match archive.molecule_at(0) {
        Ok(molecule) => Ok(Some(molecule)),
        Err(Error::IndexOutOfRange { .. }) | Err(Error::NotFound(_)) => Ok(None),
        Err(err) => Err(err),
    }
}

/// First name derived from `name` that `taken` rejects
fn unique_name<F: Fn(&str) -> bool>(name: &str, taken: F) -> String {
    if !taken(name) {
        return name.to_string();
    }
    let suffix = format!(".{}", EXTENSION);
    let stem = name.strip_suffix(&suffix).unwrap_or(name);
    (1u64..)
        .map(|n| format!("{}{}{}", stem, n, suffix))
        .find(|candidate| !taken(candidate))
        .unwrap_or_else(|| name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Molecule;
    use crate::table::DataTable;

    #[test]
    fn test_unique_naming() {
        let registry = ArchiveRegistry::new();
        assert_eq!(registry.add(MoleculeArchive::new("run.yama")), "run.yama");
        assert_eq!(registry.add(MoleculeArchive::new("run.yama")), "run1.yama");
        assert_eq!(registry.add(MoleculeArchive::new("run.yama")), "run2.yama");
        assert_eq!(registry.add(MoleculeArchive::new("other")), "other");
        assert_eq!(registry.add(MoleculeArchive::new("other")), "other1.yama");

        assert_eq!(
            registry.names(),
            vec!["run.yama", "run1.yama", "run2.yama", "other", "other1.yama"]
        );
        assert_eq!(registry.get("run1.yama").unwrap().name(), "run1.yama");
    }

    #[test]
    fn test_rename() {
        let registry = ArchiveRegistry::new();
        registry.add(MoleculeArchive::new("a.yama"));
        registry.add(MoleculeArchive::new("b.yama"));

        assert!(!registry.rename("a.yama", "b.yama").unwrap());
        assert!(registry.rename("a.yama", "c.yama").unwrap());
        assert!(!registry.contains("a.yama"));
        assert_eq!(registry.get("c.yama").unwrap().name(), "c.yama");
        assert!(matches!(
            registry.rename("missing", "d.yama"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_remove_destroys() {
        let registry = ArchiveRegistry::new();
        registry.add(MoleculeArchive::new("a.yama"));
        let archive = registry.get("a.yama").unwrap();

        assert!(registry.remove("a.yama").unwrap());
        assert!(!registry.remove("a.yama").unwrap());
        assert!(registry.is_empty());
        assert!(archive.get_molecule("x").is_err());
    }

    #[test]
    fn test_column_aggregation() {
        let registry = ArchiveRegistry::new();

        let first = MoleculeArchive::new("one");
        let mut molecule = Molecule::with_table("m1", DataTable::with_columns(["time", "x"]));
        molecule.put_segment_table("time", "x", DataTable::new());
        first.add_molecule(molecule).unwrap();
        registry.add(first);

        let second = MoleculeArchive::new("two");
        second
            .add_molecule(Molecule::with_table("m2", DataTable::with_columns(["x", "y"])))
            .unwrap();
        registry.add(second);
        registry.add(MoleculeArchive::new("empty"));

        assert_eq!(registry.column_names().unwrap(), vec!["time", "x", "y"]);
        assert_eq!(
            registry.segment_table_names().unwrap(),
            vec![("time".to_string(), "x".to_string())]
        );
    }
}
