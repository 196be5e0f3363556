use anyhow::Result;
use folio_core::Config;

use crate::output::{OutputFormat, print_json};

pub fn show_config(config: &Config, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(config)?,
        OutputFormat::Text => print!("{}", toml_string(config)?),
    }
    Ok(())
}

fn toml_string(config: &Config) -> Result<String> {
    Ok(toml::to_string_pretty(config)?)
}
