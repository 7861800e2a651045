//! In-process tests of the `mars` commands

use clap::Parser;
use mars_cli::config::Config;
use mars_cli::{Cli, Commands};
use mars_core::{ArchiveConfig, Format, Metadata, Molecule, MoleculeArchive, StorageMode};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn write_config(dir: &Path, archive: ArchiveConfig) -> String {
    let path = dir.join("config.toml");
    Config {
        archive,
        assume_yes: false,
    }
    .save(Some(path.to_str().unwrap()))
    .unwrap();
    path.to_string_lossy().into_owned()
}

fn sample_archive(dir: &Path) -> PathBuf {
    let archive = MoleculeArchive::new("sample");
    archive.add_metadata(Metadata::new("meta000001")).unwrap();
    for i in 0..10 {
        let mut molecule = Molecule::new(format!("m{}", i));
        molecule.metadata_uid = Some("meta000001".to_string());
        molecule.add_tag(if i < 3 { "reject" } else { "good" });
        archive.add_molecule(molecule).unwrap();
    }
    archive.save_as(dir.join("sample")).unwrap()
}

fn run(args: &[&str]) -> anyhow::Result<()> {
    let cli = Cli::try_parse_from(args)?;
    mars_cli::run(cli)
}

#[test]
fn test_parse_global_flags() {
    let cli = Cli::try_parse_from(["mars", "--virtual", "--json", "info", "a.yama"]).unwrap();
    assert!(cli.virtual_store);
    assert!(cli.json);
    assert!(!cli.csv);
    assert!(matches!(cli.command, Commands::Info(_)));

    let cli = Cli::try_parse_from(["mars", "convert", "a.yama", "b", "--format", "text"]).unwrap();
    match cli.command {
        Commands::Convert(args) => assert_eq!(args.format, Format::Text),
        other => panic!("unexpected command {:?}", other),
    }

    assert!(Cli::try_parse_from(["mars", "convert", "a", "b", "--format", "xml"]).is_err());
    assert!(Cli::try_parse_from(["mars", "delete-tag", "a.yama"]).is_err());
}

#[test]
fn test_info_and_list() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), ArchiveConfig::default());
    let file = sample_archive(dir.path());
    let file = file.to_str().unwrap();

    run(&["mars", "--config", &config, "info", file]).unwrap();
    run(&["mars", "--config", &config, "--json", "info", file]).unwrap();
    run(&["mars", "--config", &config, "list", file, "--tag", "good"]).unwrap();
    run(&["mars", "--config", &config, "--csv", "list", file, "--limit", "2"]).unwrap();
}

#[test]
fn test_missing_archive_fails() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), ArchiveConfig::default());
    let missing = dir.path().join("missing.yama");
    assert!(run(&["mars", "--config", &config, "info", missing.to_str().unwrap()]).is_err());
}

#[test]
fn test_convert_to_text() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), ArchiveConfig::default());
    let file = sample_archive(dir.path());
    let out = dir.path().join("converted");

    run(&[
        "mars",
        "--config",
        &config,
        "convert",
        file.to_str().unwrap(),
        out.to_str().unwrap(),
        "--format",
        "text",
    ])
    .unwrap();

    let converted = MoleculeArchive::open(dir.path().join("converted.yama"), ArchiveConfig::default())
        .unwrap();
    assert_eq!(converted.format(), Format::Text);
    assert_eq!(converted.molecule_count(), 10);
}

#[test]
fn test_delete_tag_saves_in_place() {
    let dir = TempDir::new().unwrap();
    let config = write_config(
        dir.path(),
        ArchiveConfig {
            mode: StorageMode::Virtual,
            store_dir: Some(dir.path().to_path_buf()),
            ..ArchiveConfig::default()
        },
    );
    let file = sample_archive(dir.path());

    run(&[
        "mars",
        "--config",
        &config,
        "delete-tag",
        file.to_str().unwrap(),
        "reject",
        "--force",
    ])
    .unwrap();

    let reloaded = MoleculeArchive::open(&file, ArchiveConfig::default()).unwrap();
    assert_eq!(reloaded.molecule_count(), 7);
    assert!(reloaded.uids_with_tag("reject").unwrap().is_empty());
    let meta = reloaded.get_metadata("meta000001").unwrap().unwrap();
    assert!(meta.log.contains("Deleted 3 molecules tagged 'reject'"));
}

#[test]
fn test_recover_requires_force_for_unclean_store() {
    let dir = TempDir::new().unwrap();
    let archive_config = ArchiveConfig {
        mode: StorageMode::Virtual,
        store_dir: Some(dir.path().to_path_buf()),
        ..ArchiveConfig::default()
    };
    let config = write_config(dir.path(), archive_config.clone());

    {
        let archive = MoleculeArchive::with_config("lost.yama", archive_config).unwrap();
        archive.add_molecule(Molecule::new("m1")).unwrap();
        archive.add_molecule(Molecule::new("m2")).unwrap();
    }
    let target = dir.path().join("lost.yama");
    let target = target.to_str().unwrap();

    assert!(run(&["mars", "--config", &config, "recover", target]).is_err());
    run(&["mars", "--config", &config, "recover", target, "--force"]).unwrap();

    let recovered = MoleculeArchive::open(target, ArchiveConfig::default()).unwrap();
    assert_eq!(recovered.molecule_uids(), vec!["m1", "m2"]);

    // the store was closed cleanly by the recovery run
    run(&["mars", "--config", &config, "recover", target]).unwrap();
}

#[test]
fn test_recover_with_explicit_store() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), ArchiveConfig::default());
    let store_dir = dir.path().join("scratch");
    std::fs::create_dir_all(&store_dir).unwrap();

    let archive = MoleculeArchive::with_config(
        "elsewhere",
        ArchiveConfig {
            mode: StorageMode::Virtual,
            store_dir: Some(store_dir.clone()),
            ..ArchiveConfig::default()
        },
    )
    .unwrap();
    archive.add_molecule(Molecule::new("only")).unwrap();
    archive.destroy().unwrap();

    let store = store_dir.join("elsewhere.store");
    let target = dir.path().join("out.yama");
    run(&[
        "mars",
        "--config",
        &config,
        "recover",
        target.to_str().unwrap(),
        "--store",
        store.to_str().unwrap(),
    ])
    .unwrap();

    let recovered = MoleculeArchive::open(&target, ArchiveConfig::default()).unwrap();
    assert_eq!(recovered.molecule_uids(), vec!["only"]);
}
