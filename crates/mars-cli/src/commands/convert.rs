use anyhow::Result;
use clap::Args;
use mars_core::{ArchiveConfig, Format};
use std::path::PathBuf;

use super::{OutputContext, open_archive};

#[derive(Args, Debug)]
pub struct ConvertArgs {
    /// Archive to read
    pub input: PathBuf,

    /// Destination; `.yama` is appended when missing
    pub output: PathBuf,

    /// Encoding of the written archive (binary or text)
    #[arg(short, long, default_value = "binary", value_parser = parse_format)]
    pub format: Format,
}

fn parse_format(s: &str) -> std::result::Result<Format, String> {
    s.parse::<Format>().map_err(|e| e.to_string())
}

pub fn execute(args: ConvertArgs, config: &ArchiveConfig, output: &OutputContext) -> Result<()> {
    let archive = open_archive(&args.input, config)?;
    let source_format = archive.format();

    archive.set_format(args.format);
    let written = archive.save_as(&args.output)?;

    if output.json {
        output.print_json(&serde_json::json!({
            "input": args.input,
            "output": written,
            "from": source_format.as_str(),
            "to": args.format.as_str(),
            "molecules": archive.molecule_count(),
        }))?;
    } else {
        output.print_success(&format!(
            "Converted {} ({}) to {} ({}), {} molecules",
            args.input.display(),
            source_format,
            written.display(),
            args.format,
            archive.molecule_count()
        ));
    }

    archive.destroy()?;
    Ok(())
}
