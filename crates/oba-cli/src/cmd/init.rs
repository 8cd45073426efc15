use anyhow::Context;
use oba_core::{config::Config, io, paths, CoreError};
use std::path::Path;

pub struct InitArgs {
    pub name: String,
    pub rest_url: String,
    pub obaco_url: Option<String>,
    pub region_id: Option<String>,
    pub api_key: Option<String>,
    pub force: bool,
}

pub fn run(root: &Path, args: InitArgs) -> anyhow::Result<()> {
    let config_path = paths::config_path(root);
    if config_path.exists() && !args.force {
        return Err(CoreError::AlreadyInitialized(config_path).into());
    }

    io::ensure_dir(root).with_context(|| format!("failed to create {}", root.display()))?;

    let mut cfg = Config::new(args.name, args.rest_url);
    cfg.region.obaco_base_url = args.obaco_url;
    if let Some(id) = args.region_id {
        cfg.region.region_id = id;
    }
    if let Some(key) = args.api_key {
        cfg.api_key = key;
    }

    // Refuse to write a config that can never work; warnings are only shown.
    let warnings = cfg.validate();
    for w in &warnings {
        eprintln!("{:?}: {}", w.level, w.message);
    }
    if warnings
        .iter()
        .any(|w| w.level == oba_core::config::WarnLevel::Error)
    {
        anyhow::bail!("refusing to write an invalid config");
    }

    cfg.save(root).context("failed to write config.yaml")?;
    println!("Initialized {} for region '{}'", root.display(), cfg.region.name);
    println!("  created: {}", config_path.display());
    Ok(())
}
