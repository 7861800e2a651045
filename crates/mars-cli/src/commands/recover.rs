use anyhow::{Context, Result};
use clap::Args;
use mars_core::{ArchiveConfig, MoleculeArchive, StorageMode};
use std::path::PathBuf;

use super::OutputContext;

#[derive(Args, Debug)]
pub struct RecoverArgs {
    /// Container to write the recovered archive to
    pub file: PathBuf,

    /// Store file to recover; defaults to the store next to the container
    #[arg(long)]
    pub store: Option<PathBuf>,

    /// Open the store even if it was not closed cleanly
    #[arg(short, long)]
    pub force: bool,
}

pub fn execute(args: RecoverArgs, config: &ArchiveConfig, output: &OutputContext) -> Result<()> {
    let config = ArchiveConfig {
        mode: StorageMode::Virtual,
        ..config.clone()
    };
    let name = args
        .file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "recovered".to_string());
    let store_path = args
        .store
        .clone()
        .unwrap_or_else(|| config.store_path_for(&name, Some(&args.file)));

    if !store_path.exists() {
        anyhow::bail!("no store found at {}", store_path.display());
    }

    let archive = MoleculeArchive::open_store(&name, &store_path, config, args.force)
        .with_context(|| {
            if args.force {
                format!("failed to recover {}", store_path.display())
            } else {
                format!(
                    "failed to open {}; pass --force if the writer crashed",
                    store_path.display()
                )
            }
        })?;

    let dangling = archive.dangling_metadata_refs()?;
    if !dangling.is_empty() {
        output.print_error(&format!(
            "{} recovered molecules reference missing metadata",
            dangling.len()
        ));
    }

    archive.add_log_message(&format!("Recovered from store {}", store_path.display()))?;
    let written = archive.save_as(&args.file)?;

    if output.json {
        output.print_json(&serde_json::json!({
            "store": store_path,
            "output": written,
            "molecules": archive.molecule_count(),
            "metadata": archive.metadata_count(),
        }))?;
    } else {
        output.print_success(&format!(
            "Recovered {} molecules and {} metadata records into {}",
            archive.molecule_count(),
            archive.metadata_count(),
            written.display()
        ));
    }

    archive.destroy()?;
    Ok(())
}
