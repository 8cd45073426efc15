use std::path::{Path, PathBuf};

/// Resolve the directory holding `config.yaml` and `preferences.json`.
///
/// Priority:
/// 1. `--root` flag / `OBA_ROOT` env var (passed in as `explicit`)
/// 2. `$HOME/.onebusaway`
pub fn resolve_root(explicit: Option<&Path>) -> anyhow::Result<PathBuf> {
    if let Some(p) = explicit {
        return Ok(p.to_path_buf());
    }
    Ok(oba_core::paths::default_root()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn explicit_root_wins() {
        let dir = TempDir::new().unwrap();
        let result = resolve_root(Some(dir.path())).unwrap();
        assert_eq!(result, dir.path());
    }
}
