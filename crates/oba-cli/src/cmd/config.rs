use crate::output::print_json;
use anyhow::Context;
use clap::Subcommand;
use oba_core::config::{Config, WarnLevel};
use std::path::Path;

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Show the region and network settings
    Show,

    /// Validate the config for common mistakes
    Validate,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(root: &Path, subcmd: ConfigSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        ConfigSubcommand::Show => show(root, json),
        ConfigSubcommand::Validate => validate(root, json),
    }
}

// ---------------------------------------------------------------------------
// show
// ---------------------------------------------------------------------------

fn show(root: &Path, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;

    if json {
        let mut value = serde_json::to_value(&config)?;
        if let Some(key) = value.get_mut("api_key") {
            *key = serde_json::Value::String(mask(&config.api_key));
        }
        print_json(&value)?;
        return Ok(());
    }

    let region = &config.region;
    println!("Region:           {}", region.name);
    println!("REST server:      {}", region.rest_base_url);
    match &region.obaco_base_url {
        Some(url) => println!("Obaco server:     {url} (region {})", region.region_id),
        None => println!("Obaco server:     (none)"),
    }
    println!("API key:          {}", mask(&config.api_key));
    println!("App UID:          {}", config.app_uid);
    println!(
        "Network:          {}s timeout, {} concurrent requests",
        config.network.timeout_seconds, config.network.max_concurrent_requests
    );
    Ok(())
}

/// Keep the first four characters of a key.
fn mask(key: &str) -> String {
    if key.is_empty() {
        return "(unset)".to_string();
    }
    let visible: String = key.chars().take(4).collect();
    format!("{visible}…")
}

// ---------------------------------------------------------------------------
// validate
// ---------------------------------------------------------------------------

fn validate(root: &Path, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    let warnings = config.validate();

    if json {
        let value = serde_json::json!({
            "warnings": warnings,
        });
        print_json(&value)?;
    } else if warnings.is_empty() {
        println!("Config is valid. No warnings.");
    } else {
        for w in &warnings {
            let prefix = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            println!("[{prefix}] {}", w.message);
        }
    }

    if warnings.iter().any(|w| w.level == WarnLevel::Error) {
        anyhow::bail!("config validation found errors");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_hides_all_but_prefix() {
        assert_eq!(mask(""), "(unset)");
        assert_eq!(mask("abcdefgh"), "abcd…");
        assert_eq!(mask("ab"), "ab…");
    }
}
