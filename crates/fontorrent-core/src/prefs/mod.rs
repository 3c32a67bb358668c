//! Key/value preference persistence.
//!
//! Preferences are small JSON values stored under namespaced keys
//! (`fontorrent.trackers`, ...). [`JsonPreferences`] keeps them in a single
//! JSON object on disk; [`MemoryPreferences`] keeps them in memory only.

use std::collections::BTreeMap;
use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::error::{Error, Result};

/// Storage for preference values.
pub trait PreferenceStore: Send + 'static {
    /// Read the value stored under `key`.
    fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Store `value` under `key`, replacing any previous value.
    fn set(&mut self, key: &str, value: Value) -> Result<()>;
}

/// Preferences persisted as one JSON object in a file.
#[derive(Debug, Clone)]
pub struct JsonPreferences {
    path: PathBuf,
}

impl JsonPreferences {
    /// Use the preferences file at `path` (created on first write).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Use the preferences file from the configuration.
    #[must_use]
    pub fn from_config(config: &crate::Config) -> Self {
        Self::new(config.preferences_path())
    }

    /// Path of the preferences file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, Value>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }

        let file = fs::File::open(&self.path).map_err(|e| {
            Error::PreferencesError(format!(
                "Failed to open preferences at {}: {}",
                self.path.display(),
                e
            ))
        })?;

        serde_json::from_reader(BufReader::new(file)).map_err(|e| {
            Error::PreferencesError(format!(
                "Failed to parse preferences at {}: {}",
                self.path.display(),
                e
            ))
        })
    }
}

impl PreferenceStore for JsonPreferences {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.read_all()?.remove(key))
    }

    fn set(&mut self, key: &str, value: Value) -> Result<()> {
        let mut values = self.read_all().unwrap_or_else(|e| {
            tracing::warn!("Discarding unreadable preferences: {}", e);
            BTreeMap::new()
        });
        values.insert(key.to_string(), value);

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                Error::PreferencesError(format!(
                    "Failed to create preferences directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let file = fs::File::create(&self.path).map_err(|e| {
            Error::PreferencesError(format!(
                "Failed to create preferences at {}: {}",
                self.path.display(),
                e
            ))
        })?;

        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &values).map_err(|e| {
            Error::PreferencesError(format!(
                "Failed to write preferences at {}: {}",
                self.path.display(),
                e
            ))
        })?;
        writer.flush()?;
        Ok(())
    }
}

/// Preferences held in memory for the life of the process.
#[derive(Debug, Clone, Default)]
pub struct MemoryPreferences {
    values: BTreeMap<String, Value>,
}

impl MemoryPreferences {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding one value.
    #[must_use]
    pub fn with(key: &str, value: Value) -> Self {
        let mut values = BTreeMap::new();
        values.insert(key.to_string(), value);
        Self { values }
    }
}

impl PreferenceStore for MemoryPreferences {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.values.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: Value) -> Result<()> {
        self.values.insert(key.to_string(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_json_preferences_roundtrip() {
        let tmp_dir = TempDir::new().unwrap();
        let path = tmp_dir.path().join("nested").join("preferences.json");

        let mut prefs = JsonPreferences::new(&path);
        assert!(prefs.get("fontorrent.trackers").unwrap().is_none());

        prefs
            .set("fontorrent.trackers", json!(["wss://a.example"]))
            .unwrap();
        prefs.set("fontorrent.theme", json!("dark")).unwrap();

        let reopened = JsonPreferences::new(&path);
        assert_eq!(
            reopened.get("fontorrent.trackers").unwrap(),
            Some(json!(["wss://a.example"]))
        );
        assert_eq!(
            reopened.get("fontorrent.theme").unwrap(),
            Some(json!("dark"))
        );
    }

    #[test]
    fn test_json_preferences_corrupt_file() {
        let tmp_dir = TempDir::new().unwrap();
        let path = tmp_dir.path().join("preferences.json");
        fs::write(&path, "{ not json").unwrap();

        let mut prefs = JsonPreferences::new(&path);
        assert!(prefs.get("fontorrent.trackers").is_err());

        prefs.set("fontorrent.trackers", json!([])).unwrap();
        assert_eq!(prefs.get("fontorrent.trackers").unwrap(), Some(json!([])));
    }

    #[test]
    fn test_json_preferences_unwritable() {
        let tmp_dir = TempDir::new().unwrap();
        let blocker = tmp_dir.path().join("blocker");
        fs::write(&blocker, "file, not a directory").unwrap();

        let mut prefs = JsonPreferences::new(blocker.join("preferences.json"));
        assert!(prefs.set("k", json!(1)).is_err());
    }

    #[test]
    fn test_memory_preferences() {
        let mut prefs = MemoryPreferences::with("k", json!(1));
        assert_eq!(prefs.get("k").unwrap(), Some(json!(1)));
        prefs.set("k", json!(2)).unwrap();
        assert_eq!(prefs.get("k").unwrap(), Some(json!(2)));
        assert!(prefs.get("missing").unwrap().is_none());
    }
}
