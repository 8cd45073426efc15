//! Durable key-value storage for small user preferences.
//!
//! The alerts store reads its preferences once at construction and writes
//! through on every mutation. Only single-key atomicity is assumed.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tracing::warn;

use crate::error::{CoreError, Result};

/// Alert ids the user has acknowledged (array of strings).
pub const READ_AGENCY_ALERT_IDS: &str = "read_agency_alert_ids";

/// Whether to request the region's test alerts from Obaco (bool, default false).
pub const DISPLAY_REGIONAL_TEST_ALERTS: &str = "display_regional_test_alerts";

pub trait PreferenceStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&self, key: &str, value: Value) -> Result<()>;
}

/// Read a boolean, falling back to `default` when absent or mistyped.
pub fn get_bool(store: &dyn PreferenceStore, key: &str, default: bool) -> bool {
    match store.get(key) {
        Some(Value::Bool(b)) => b,
        Some(other) => {
            warn!(key, value = %other, "ignoring non-boolean preference");
            default
        }
        None => default,
    }
}

/// Read a list of strings; absent means empty.
pub fn get_strings(store: &dyn PreferenceStore, key: &str) -> Result<Vec<String>> {
    match store.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(value) => serde_json::from_value(value).map_err(|e| CoreError::Preference {
            key: key.to_string(),
            message: e.to_string(),
        }),
    }
}

// ---------------------------------------------------------------------------
// FilePreferences
// ---------------------------------------------------------------------------

/// Preferences kept as one JSON object on disk, rewritten atomically on set.
pub struct FilePreferences {
    path: PathBuf,
    values: Mutex<BTreeMap<String, Value>>,
}

impl FilePreferences {
    /// Open `path`, starting empty if it does not exist yet.
    pub fn open(path: &Path) -> Result<Self> {
        let values = if path.exists() {
            let data = std::fs::read_to_string(path)?;
            if data.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&data)?
            }
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path: path.to_path_buf(),
            values: Mutex::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Value>> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PreferenceStore for FilePreferences {
    fn get(&self, key: &str) -> Option<Value> {
        self.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        // Hold the lock across the write so concurrent sets cannot interleave
        // an older snapshot over a newer one. Memory changes only once the
        // file has been replaced.
        let mut values = self.lock();
        let mut next = values.clone();
        next.insert(key.to_string(), value);
        let data = serde_json::to_vec_pretty(&next)?;
        crate::io::atomic_write(&self.path, &data)?;
        *values = next;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryPreferences
// ---------------------------------------------------------------------------

/// In-process preferences for tests and throwaway sessions.
#[derive(Default)]
pub struct MemoryPreferences {
    values: Mutex<HashMap<String, Value>>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for MemoryPreferences {
    fn get(&self, key: &str) -> Option<Value> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn file_preferences_start_empty() {
        let dir = TempDir::new().unwrap();
        let prefs = FilePreferences::open(&dir.path().join("preferences.json")).unwrap();
        assert_eq!(prefs.get(READ_AGENCY_ALERT_IDS), None);
        assert!(!prefs.path().exists(), "nothing is written until a set");
    }

    #[test]
    fn file_preferences_persist_across_opens() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("preferences.json");
        {
            let prefs = FilePreferences::open(&path).unwrap();
            prefs.set(READ_AGENCY_ALERT_IDS, json!(["a", "b"])).unwrap();
            prefs.set(DISPLAY_REGIONAL_TEST_ALERTS, json!(true)).unwrap();
        }
        let prefs = FilePreferences::open(&path).unwrap();
        assert_eq!(
            get_strings(&prefs, READ_AGENCY_ALERT_IDS).unwrap(),
            vec!["a".to_string(), "b".to_string()]
        );
        assert!(get_bool(&prefs, DISPLAY_REGIONAL_TEST_ALERTS, false));
    }

    #[test]
    fn file_preferences_reject_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("preferences.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            FilePreferences::open(&path),
            Err(CoreError::Json(_))
        ));
    }

    #[test]
    fn failed_write_leaves_values_unchanged() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();
        let prefs = FilePreferences::open(&blocker.join("preferences.json")).unwrap();

        assert!(prefs.set(READ_AGENCY_ALERT_IDS, json!(["a"])).is_err());
        assert_eq!(prefs.get(READ_AGENCY_ALERT_IDS), None);
    }

    #[test]
    fn get_bool_defaults_when_missing_or_mistyped() {
        let prefs = MemoryPreferences::new();
        assert!(!get_bool(&prefs, DISPLAY_REGIONAL_TEST_ALERTS, false));
        prefs.set(DISPLAY_REGIONAL_TEST_ALERTS, json!("yes")).unwrap();
        assert!(get_bool(&prefs, DISPLAY_REGIONAL_TEST_ALERTS, true));
    }

    #[test]
    fn get_strings_rejects_wrong_shape() {
        let prefs = MemoryPreferences::new();
        prefs.set(READ_AGENCY_ALERT_IDS, json!({"a": 1})).unwrap();
        assert!(matches!(
            get_strings(&prefs, READ_AGENCY_ALERT_IDS),
            Err(CoreError::Preference { .. })
        ));
    }
}
