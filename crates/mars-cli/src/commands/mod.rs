pub mod convert;
pub mod info;
pub mod list;
pub mod recover;
pub mod tags;

use anyhow::Result;
use comfy_table::{Table, presets::UTF8_FULL};
use mars_core::{ArchiveConfig, MoleculeArchive};
use serde_json::Value;
use std::path::Path;

#[derive(Debug, Clone, Default)]
pub struct OutputContext {
    pub json: bool,
    pub csv: bool,
    pub verbose: bool,
    pub assume_yes: bool,
}

impl OutputContext {
    pub fn print_table(&self, columns: &[&str], rows: &[Vec<Value>]) -> Result<()> {
        if self.json {
            let records: Vec<serde_json::Map<String, Value>> = rows
                .iter()
                .map(|row| {
                    columns
                        .iter()
                        .map(|c| c.to_string())
                        .zip(row.iter().cloned())
                        .collect()
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&records)?);
            return Ok(());
        }

        if self.csv {
            println!("{}", columns.join(","));
            for row in rows {
                let values: Vec<String> = row.iter().map(csv_field).collect();
                println!("{}", values.join(","));
            }
            return Ok(());
        }

        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_header(columns);

        for row in rows {
            let values: Vec<String> = row.iter().map(value_to_string).collect();
            table.add_row(values);
        }

        println!("{table}");
        Ok(())
    }

    pub fn print_json<T: serde::Serialize>(&self, data: &T) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(data)?);
        Ok(())
    }

    pub fn print_success(&self, message: &str) {
        use colored::Colorize;
        if !self.json {
            println!("{} {}", "✓".green(), message);
        }
    }

    pub fn print_error(&self, message: &str) {
        use colored::Colorize;
        eprintln!("{} {}", "✗".red(), message);
    }

    pub fn print_info(&self, message: &str) {
        use colored::Colorize;
        if !self.json {
            println!("{} {}", "ℹ".blue(), message);
        }
    }
}

/// Load a container with the CLI's archive settings
pub fn open_archive(path: &Path, config: &ArchiveConfig) -> Result<MoleculeArchive> {
    if !path.exists() {
        anyhow::bail!("archive {} does not exist", path.display());
    }
    Ok(MoleculeArchive::open(path, config.clone())?)
}

pub(crate) fn value_to_string(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Array(arr) => {
            let items: Vec<String> = arr.iter().map(value_to_string).collect();
            format!("[{}]", items.join(", "))
        }
        Value::Object(obj) => serde_json::to_string(obj).unwrap_or_default(),
    }
}

/// Quote a field when it would break a CSV row
pub(crate) fn csv_field(v: &Value) -> String {
    let raw = value_to_string(v);
    if raw.contains([',', '"', '\n']) {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_csv_field_quotes_tag_lists() {
        assert_eq!(csv_field(&json!("good, bright")), "\"good, bright\"");
        assert_eq!(csv_field(&json!("plain")), "plain");
        assert_eq!(csv_field(&json!("say \"hi\"")), "\"say \"\"hi\"\"\"");
        assert_eq!(csv_field(&Value::Null), "");
    }

    #[test]
    fn test_value_to_string() {
        assert_eq!(value_to_string(&json!(3)), "3");
        assert_eq!(value_to_string(&json!(["a", "b"])), "[a, b]");
    }
}
