//! `docket config`: print the effective configuration

use anyhow::{Context, Result};
use docket_connection::PoolConfig;

pub fn run(config: &PoolConfig, json: bool) -> Result<()> {
    let rendered = if json {
        serde_json::to_string_pretty(config)?
    } else {
        config.to_toml_string().context("failed to render config")?
    };
    println!("{rendered}");
    Ok(())
}
