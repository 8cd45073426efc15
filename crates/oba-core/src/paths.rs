use crate::error::{CoreError, Result};
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// File constants
// ---------------------------------------------------------------------------

/// Directory under `$HOME` used when no root is given.
pub const DEFAULT_ROOT_DIR: &str = ".onebusaway";

pub const CONFIG_FILE: &str = "config.yaml";
pub const PREFERENCES_FILE: &str = "preferences.json";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn preferences_path(root: &Path) -> PathBuf {
    root.join(PREFERENCES_FILE)
}

/// `$HOME/.onebusaway`
pub fn default_root() -> Result<PathBuf> {
    home::home_dir()
        .map(|h| h.join(DEFAULT_ROOT_DIR))
        .ok_or(CoreError::HomeNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn files_live_directly_under_root() {
        let root = Path::new("/tmp/oba");
        assert_eq!(config_path(root), PathBuf::from("/tmp/oba/config.yaml"));
        assert_eq!(
            preferences_path(root),
            PathBuf::from("/tmp/oba/preferences.json")
        );
    }
}
