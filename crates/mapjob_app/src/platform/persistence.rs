use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use mapjob_core::{CoreSettings, KeyValueStore, StorageError};
use mapjob_engine::AtomicFileWriter;
use mapjob_logging::{job_info, job_warn};

/// Survives restarts; holds the pending job list.
pub const SESSION_SCOPE_FILE: &str = "session.ron";
/// Holds the single time-boxed outcome that bridges one run to the next.
pub const NAVIGATION_SCOPE_FILE: &str = "navigation.ron";
pub const CONFIG_FILE: &str = "config.ron";

/// A key-value scope kept as a RON map in one file.
///
/// Every `set` rewrites the whole file atomically.
#[derive(Debug, Clone)]
pub struct FileStore {
    writer: AtomicFileWriter,
    filename: String,
}

impl FileStore {
    pub fn new(dir: &Path, filename: &str) -> Self {
        Self {
            writer: AtomicFileWriter::new(dir.to_path_buf()),
            filename: filename.to_string(),
        }
    }

    fn path(&self) -> PathBuf {
        self.writer.dir().join(&self.filename)
    }

    fn load(&self) -> Result<BTreeMap<String, String>, StorageError> {
        let path = self.path();
        let content = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(err) => {
                return Err(StorageError::Unavailable(format!(
                    "read {}: {err}",
                    path.display()
                )))
            }
        };
        match ron::from_str(&content) {
            Ok(entries) => Ok(entries),
            Err(err) => {
                // A corrupt scope file is treated as empty and replaced on the next write.
                job_warn!("Ignoring unreadable scope file {:?}: {}", path, err);
                Ok(BTreeMap::new())
            }
        }
    }

    fn save(&self, entries: &BTreeMap<String, String>) -> Result<(), StorageError> {
        if entries.is_empty() {
            return self
                .writer
                .remove(&self.filename)
                .map_err(|err| StorageError::Unavailable(err.to_string()));
        }
        let pretty = ron::ser::PrettyConfig::new();
        let content = ron::ser::to_string_pretty(entries, pretty)
            .map_err(|err| StorageError::Unavailable(err.to_string()))?;
        self.writer
            .write(&self.filename, content.as_bytes())
            .map(|_| ())
            .map_err(|err| StorageError::QuotaExceeded(err.to_string()))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.load()?.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: Option<&str>) -> Result<(), StorageError> {
        let mut entries = self.load()?;
        match value {
            Some(value) => entries.insert(key.to_string(), value.to_string()),
            None => entries.remove(key),
        };
        self.save(&entries)
    }
}

/// Loads `config.ron` from `data_dir`; missing or invalid files yield defaults.
pub fn load_settings(data_dir: &Path) -> CoreSettings {
    let path = data_dir.join(CONFIG_FILE);
    let content = match fs::read_to_string(&path) {
        Ok(text) => text,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return CoreSettings::default(),
        Err(err) => {
            job_warn!("Failed to read {:?}: {}", path, err);
            return CoreSettings::default();
        }
    };
    match ron::from_str::<CoreSettings>(&content) {
        Ok(settings) => {
            job_info!("Loaded settings from {:?}", path);
            settings
        }
        Err(err) => {
            job_warn!("Failed to parse {:?}, using defaults: {}", path, err);
            CoreSettings::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn values_survive_a_new_store_instance() {
        let temp = TempDir::new().unwrap();
        let mut store = FileStore::new(temp.path(), SESSION_SCOPE_FILE);
        store.set("mapjob.pending_jobs", Some("[\"a\",\"b\"]")).unwrap();

        let reopened = FileStore::new(temp.path(), SESSION_SCOPE_FILE);
        assert_eq!(
            reopened.get("mapjob.pending_jobs").unwrap().as_deref(),
            Some("[\"a\",\"b\"]")
        );
    }

    #[test]
    fn removing_the_last_key_deletes_the_file() {
        let temp = TempDir::new().unwrap();
        let mut store = FileStore::new(temp.path(), NAVIGATION_SCOPE_FILE);
        store.set("k", Some("v")).unwrap();
        assert!(temp.path().join(NAVIGATION_SCOPE_FILE).exists());
        store.set("k", None).unwrap();
        assert!(!temp.path().join(NAVIGATION_SCOPE_FILE).exists());
        assert_eq!(store.get("k").unwrap(), None);
    }

    #[test]
    fn corrupt_file_reads_as_empty() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join(SESSION_SCOPE_FILE), "{{ nope").unwrap();
        let mut store = FileStore::new(temp.path(), SESSION_SCOPE_FILE);
        assert_eq!(store.get("k").unwrap(), None);
        store.set("k", Some("v")).unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn unwritable_directory_reports_an_error() {
        let temp = TempDir::new().unwrap();
        let blocker = temp.path().join("file");
        fs::write(&blocker, "x").unwrap();
        let mut store = FileStore::new(&blocker, SESSION_SCOPE_FILE);
        assert!(store.set("k", Some("v")).is_err());
    }

    #[test]
    fn partial_config_overrides_defaults() {
        let temp = TempDir::new().unwrap();
        fs::write(
            temp.path().join(CONFIG_FILE),
            "(snapshot_window_seconds: 120, estimator: (tick_interval_ms: 250))",
        )
        .unwrap();
        let settings = load_settings(temp.path());
        assert_eq!(settings.snapshot_window_seconds, 120);
        assert_eq!(settings.estimator.tick_interval_ms, 250);
        assert_eq!(settings.pending_job_cap, CoreSettings::default().pending_job_cap);
    }

    #[test]
    fn missing_config_uses_defaults() {
        let temp = TempDir::new().unwrap();
        assert_eq!(load_settings(temp.path()), CoreSettings::default());
    }
}
