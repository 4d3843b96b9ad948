//! `mops config` -- show the resolved configuration.

use modelops_types::config::Config;

/// Print the resolved configuration as pretty JSON.
pub fn config_show(config: &Config) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}
