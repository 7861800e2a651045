//! Virtual archive tests: LMDB-backed stores, growth and crash recovery

use mars_core::store::PersistedStore;
use mars_core::{
    ArchiveConfig, ArchiveState, DataTable, Error, Format, Metadata, Molecule, MoleculeArchive,
    StorageMode,
};
use std::path::Path;
use tempfile::TempDir;

fn virtual_config(dir: &Path) -> ArchiveConfig {
    ArchiveConfig {
        mode: StorageMode::Virtual,
        store_dir: Some(dir.to_path_buf()),
        sample_seed: Some(7),
        worker_threads: Some(4),
        ..ArchiveConfig::default()
    }
}

fn trace(uid: &str, rows: usize) -> Molecule {
    let mut table = DataTable::with_columns(["time", "x", "y"]);
    for row in 0..rows {
        let t = row as f64;
        table.append_row(&[t, t * 0.5, t.sin()]).unwrap();
    }
    let mut molecule = Molecule::with_table(uid, table);
    molecule.add_tag(if rows % 2 == 0 { "even" } else { "odd" });
    molecule
}

#[test]
fn test_virtual_store_grows_beyond_estimate() {
    let dir = TempDir::new().unwrap();
    let archive = MoleculeArchive::new_virtual("grow", 1, 16.0, virtual_config(dir.path())).unwrap();
    assert!(archive.is_virtual());

    for i in 0..400 {
        archive.add_molecule(trace(&format!("m{}", i), 200)).unwrap();
    }
    assert_eq!(archive.molecule_count(), 400);
    assert_eq!(archive.molecule_at(399).unwrap(), trace("m399", 200));

    let props = archive.update_properties().unwrap();
    assert!(props.average_molecule_size > 1000.0);
    archive.destroy().unwrap();

    let store = PersistedStore::open_existing(dir.path().join("grow.store")).unwrap();
    assert!(store.map().map_size().unwrap() > 1 << 20);
    assert_eq!(store.scan().unwrap().molecule_uids.len(), 400);
    store.map().close().unwrap();
}

#[test]
fn test_recovery_after_abandoned_writer() {
    let dir = TempDir::new().unwrap();
    let config = virtual_config(dir.path());
    let written: Vec<Molecule> = (0..50).map(|i| trace(&format!("m{}", i), i + 1)).collect();

    {
        let archive = MoleculeArchive::with_config("crashy", config.clone()).unwrap();
        archive.add_metadata(Metadata::new("meta000001")).unwrap();
        for molecule in &written {
            archive.add_molecule(molecule.clone()).unwrap();
        }
        // dropped without destroy
    }

    let store_path = dir.path().join("crashy.store");
    assert!(matches!(
        MoleculeArchive::open_store("crashy", &store_path, config.clone(), false),
        Err(Error::UncleanShutdown(_))
    ));

    let recovered = MoleculeArchive::open_store("crashy", &store_path, config, true).unwrap();
    assert_eq!(recovered.state(), ArchiveState::Ready);
    let count = recovered.molecule_count();
    assert!((written.len() - 1..=written.len()).contains(&count));
    assert_eq!(recovered.metadata_uids(), vec!["meta000001"]);

    // natural order, not key order
    assert_eq!(recovered.uid_at(0).unwrap(), "m0");
    assert_eq!(recovered.uid_at(10).unwrap(), "m10");

    for uid in recovered.molecule_uids() {
        let index: usize = uid[1..].parse().unwrap();
        assert_eq!(recovered.get_molecule(&uid).unwrap().as_ref(), Some(&written[index]));
        assert!(recovered.get_tag_list(&uid).unwrap().is_some());
    }

    let container = recovered.save_as(dir.path().join("rescued")).unwrap();
    recovered.destroy().unwrap();

    let reloaded = MoleculeArchive::open(&container, ArchiveConfig::default()).unwrap();
    assert_eq!(reloaded.molecule_count(), count);
    assert_eq!(reloaded.format(), Format::Binary);
}

#[test]
fn test_virtual_round_trip_through_container() {
    let dir = TempDir::new().unwrap();
    let config = virtual_config(dir.path());

    let source = MoleculeArchive::new("source");
    for i in 0..30 {
        source.add_molecule(trace(&format!("m{}", i), i)).unwrap();
    }
    let container = source.save_as(dir.path().join("source")).unwrap();

    let loaded = MoleculeArchive::open(
        &container,
        ArchiveConfig {
            load_batch_size: 7,
            ..config
        },
    )
    .unwrap();
    assert!(loaded.is_virtual());
    assert_eq!(loaded.store_location(), Some(dir.path().join("source.store")));
    assert_eq!(loaded.molecule_uids(), source.molecule_uids());
    assert_eq!(loaded.uids_with_tag("even").unwrap().len(), 15);

    assert_eq!(loaded.delete_by_tag("odd").unwrap(), 15);
    loaded.save().unwrap();
    loaded.destroy().unwrap();

    let reloaded = MoleculeArchive::open(&container, ArchiveConfig::default()).unwrap();
    assert_eq!(reloaded.molecule_count(), 15);
    assert!(reloaded.uids_with_tag("odd").unwrap().is_empty());
}

#[test]
fn test_existing_store_is_replaced_without_recover_flag() {
    let dir = TempDir::new().unwrap();
    let config = virtual_config(dir.path());

    let source = MoleculeArchive::new("fresh");
    source.add_molecule(Molecule::new("m1")).unwrap();
    let container = source.save_as(dir.path().join("fresh")).unwrap();

    {
        let stale = MoleculeArchive::with_config("fresh", config.clone()).unwrap();
        stale.add_molecule(Molecule::new("stale")).unwrap();
        stale.destroy().unwrap();
    }

    let loaded = MoleculeArchive::open(&container, config).unwrap();
    assert_eq!(loaded.molecule_uids(), vec!["m1"]);
    assert!(!loaded.contains_molecule("stale"));
    loaded.destroy().unwrap();
}

#[test]
fn test_same_container_opened_twice() {
    let dir = TempDir::new().unwrap();
    let config = virtual_config(dir.path());

    let source = MoleculeArchive::new("run");
    for i in 0..10 {
        source.add_molecule(trace(&format!("m{}", i), i)).unwrap();
    }
    let container = source.save_as(dir.path().join("run")).unwrap();

    let first = MoleculeArchive::open(&container, config.clone()).unwrap();
    let second = MoleculeArchive::open(&container, config.clone()).unwrap();

    let first_store = first.store_location().unwrap();
    let second_store = second.store_location().unwrap();
    assert_eq!(first_store, dir.path().join("run.store"));
    assert_eq!(second_store, dir.path().join("run1.store"));
    assert!(first_store.exists());

    // the copies are independent
    assert_eq!(second.delete_by_tag("odd").unwrap(), 5);
    assert_eq!(first.molecule_count(), 10);
    assert_eq!(first.molecule_at(9).unwrap(), trace("m9", 9));
    assert_eq!(second.molecule_count(), 5);

    // a live store is never recovered out from under its owner
    let recovering = ArchiveConfig {
        recover_existing_store: true,
        ..config
    };
    assert!(matches!(
        MoleculeArchive::open(&container, recovering),
        Err(Error::StoreInUse(_))
    ));
    assert!(matches!(
        MoleculeArchive::open_store("run", &first_store, virtual_config(dir.path()), true),
        Err(Error::StoreInUse(_))
    ));

    first.destroy().unwrap();
    second.destroy().unwrap();
    let store = PersistedStore::open_existing(&first_store).unwrap();
    assert_eq!(store.scan().unwrap().molecule_uids.len(), 10);
    store.map().close().unwrap();
}

/// Large virtual archive, run with `cargo test --features slow-tests`
#[test]
#[cfg_attr(not(feature = "slow-tests"), ignore)]
fn test_large_virtual_archive_round_trip() {
    let dir = TempDir::new().unwrap();
    let config = ArchiveConfig {
        load_batch_size: 500,
        ..virtual_config(dir.path())
    };

    let archive = MoleculeArchive::new_virtual("large", 100, 512.0, config.clone()).unwrap();
    for i in 0..20_000 {
        archive.add_molecule(trace(&format!("m{}", i), i % 50)).unwrap();
    }
    let container = archive.save_as(dir.path().join("large")).unwrap();
    assert_eq!(archive.delete_by_tag("odd").unwrap(), 10_000);
    archive.destroy().unwrap();

    let reloaded = MoleculeArchive::open(&container, config).unwrap();
    assert_eq!(reloaded.molecule_count(), 20_000);
    assert_eq!(reloaded.uid_at(19_999).unwrap(), "m19999");
    reloaded.destroy().unwrap();
}
