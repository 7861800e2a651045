use anyhow::Result;
use clap::Args;
use mars_core::ArchiveConfig;
use serde_json::json;
use std::path::PathBuf;

use super::{OutputContext, open_archive};

#[derive(Args, Debug)]
pub struct InfoArgs {
    /// Archive file
    pub file: PathBuf,
}

pub fn execute(args: InfoArgs, config: &ArchiveConfig, output: &OutputContext) -> Result<()> {
    let archive = open_archive(&args.file, config)?;
    let properties = archive.properties();
    let histogram = archive.tag_histogram()?;
    let columns = archive.molecule_column_names()?;
    let dangling = archive.dangling_metadata_refs()?;

    if output.json {
        output.print_json(&json!({
            "name": archive.name(),
            "format": archive.format().as_str(),
            "virtual": archive.is_virtual(),
            "store": archive.store_location(),
            "properties": properties,
            "tags": histogram,
            "columns": columns,
            "dangling_metadata_refs": dangling,
        }))?;
        archive.destroy()?;
        return Ok(());
    }

    println!("Archive Information");
    println!("===================");
    println!("Name:           {}", archive.name());
    println!("Format:         {}", archive.format());
    println!("Molecules:      {}", archive.molecule_count());
    println!("Metadata:       {}", archive.metadata_count());
    println!("Avg. size:      {:.0} bytes", properties.average_molecule_size);
    if let Some(store) = archive.store_location() {
        println!("Store:          {}", store.display());
    }
    if !properties.comments.is_empty() {
        println!("Comments:       {}", properties.comments);
    }
    if output.verbose {
        let names: Vec<&str> = columns.iter().map(String::as_str).collect();
        println!("Columns:        {}", names.join(", "));
    }

    if !histogram.is_empty() {
        println!();
        let rows: Vec<Vec<serde_json::Value>> = histogram
            .iter()
            .map(|(tag, count)| vec![json!(tag), json!(count)])
            .collect();
        output.print_table(&["tag", "molecules"], &rows)?;
    }

    if !dangling.is_empty() {
        output.print_error(&format!(
            "{} molecules reference missing metadata",
            dangling.len()
        ));
    }

    archive.destroy()?;
    Ok(())
}
