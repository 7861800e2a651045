use anyhow::Result;
use clap::Args;
use mars_core::ArchiveConfig;
use serde_json::{Value, json};
use std::path::PathBuf;

use super::{OutputContext, open_archive};

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Archive file
    pub file: PathBuf,

    /// Only list molecules carrying this tag
    #[arg(short, long)]
    pub tag: Option<String>,

    /// Maximum number of molecules to list
    #[arg(short, long)]
    pub limit: Option<usize>,
}

pub fn execute(args: ListArgs, config: &ArchiveConfig, output: &OutputContext) -> Result<()> {
    let archive = open_archive(&args.file, config)?;
    let limit = args.limit.unwrap_or(usize::MAX);

    let mut rows: Vec<Vec<Value>> = Vec::new();
    archive.for_each_molecule(|molecule| {
        if rows.len() >= limit {
            return Ok(());
        }
        if let Some(tag) = &args.tag {
            if !molecule.has_tag(tag) {
                return Ok(());
            }
        }
        let tags = archive.get_tag_list(&molecule.uid)?;
        rows.push(vec![
            json!(molecule.uid),
            json!(tags),
            json!(molecule.metadata_uid),
            json!(molecule.data_table.row_count()),
        ]);
        Ok(())
    })?;

    output.print_table(&["uid", "tags", "metadata", "rows"], &rows)?;
    if output.verbose {
        output.print_info(&format!(
            "{} of {} molecules listed",
            rows.len(),
            archive.molecule_count()
        ));
    }

    archive.destroy()?;
    Ok(())
}
