use anyhow::Result;
use clap::Args;
use mars_core::ArchiveConfig;
use std::path::PathBuf;

use super::{OutputContext, open_archive};

#[derive(Args, Debug)]
pub struct DeleteTagArgs {
    /// Archive file, rewritten in place
    pub file: PathBuf,

    /// Tag whose molecules are deleted
    pub tag: String,

    /// Skip confirmation
    #[arg(short, long)]
    pub force: bool,
}

pub fn execute(args: DeleteTagArgs, config: &ArchiveConfig, output: &OutputContext) -> Result<()> {
    let archive = open_archive(&args.file, config)?;
    let matching = archive.uids_with_tag(&args.tag)?.len();

    if matching == 0 {
        output.print_info(&format!("No molecules tagged '{}'", args.tag));
        archive.destroy()?;
        return Ok(());
    }

    if !args.force && !output.assume_yes {
        use colored::Colorize;
        use dialoguer::Confirm;

        println!(
            "{}",
            format!(
                "WARNING: This will delete {} of {} molecules from {}",
                matching,
                archive.molecule_count(),
                args.file.display()
            )
            .red()
            .bold()
        );

        let confirmed = Confirm::new()
            .with_prompt("Are you sure you want to continue?")
            .default(false)
            .interact()?;

        if !confirmed {
            output.print_info("Operation cancelled");
            archive.destroy()?;
            return Ok(());
        }
    }

    let removed = archive.delete_by_tag(&args.tag)?;
    archive.add_log_message(&format!(
        "Deleted {} molecules tagged '{}'",
        removed, args.tag
    ))?;
    archive.save()?;

    if output.json {
        output.print_json(&serde_json::json!({
            "tag": args.tag,
            "removed": removed,
            "remaining": archive.molecule_count(),
        }))?;
    } else {
        output.print_success(&format!(
            "Deleted {} molecules tagged '{}' ({} remaining)",
            removed,
            args.tag,
            archive.molecule_count()
        ));
    }

    archive.destroy()?;
    Ok(())
}
