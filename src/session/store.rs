//! Persistence of the last selected source.
//!
//! Stored as `{"lastSource": {...}}`. A missing file is created holding the
//! default source.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::{MostError, MostResult, SourceRecord};

use super::sources::default_source;

#[derive(Debug, Serialize, Deserialize)]
struct StoredSession {
    #[serde(rename = "lastSource")]
    last_source: SourceRecord,
}

#[derive(Debug, Clone)]
pub struct LastSourceStore {
    path: PathBuf,
}

impl LastSourceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the last source, creating the file with the default first.
    pub fn load(&self) -> MostResult<SourceRecord> {
        if !self.path.exists() {
            let source = default_source();
            self.save(&source)?;
            log::info!("Created source store at {}", self.path.display());
            return Ok(source);
        }
        let json = std::fs::read_to_string(&self.path).map_err(|e| {
            MostError::Config(format!("Failed to read {}: {e}", self.path.display()))
        })?;
        let stored: StoredSession = serde_json::from_str(&json).map_err(|e| {
            MostError::Config(format!("Failed to parse {}: {e}", self.path.display()))
        })?;
        Ok(stored.last_source)
    }

    pub fn save(&self, source: &SourceRecord) -> MostResult<()> {
        let stored = StoredSession {
            last_source: source.clone(),
        };
        let json = serde_json::to_string(&stored)
            .map_err(|e| MostError::Config(format!("Serialization error: {e}")))?;
        std::fs::write(&self.path, json).map_err(|e| {
            MostError::Config(format!("Failed to write {}: {e}", self.path.display()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::sources::find_source;

    #[test]
    fn missing_store_is_created_with_tuner() {
        let dir = tempfile::tempdir().unwrap();
        let store = LastSourceStore::new(dir.path().join("config-jlr.json"));
        assert_eq!(store.load().unwrap().name, "amFmTuner");
        assert!(store.path().exists());
    }

    #[test]
    fn saved_source_is_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let store = LastSourceStore::new(dir.path().join("config-jlr.json"));
        let usb = find_source("usbAudio").unwrap();
        store.save(&usb).unwrap();
        assert_eq!(store.load().unwrap(), usb);
    }

    #[test]
    fn file_uses_client_field_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = LastSourceStore::new(dir.path().join("config-jlr.json"));
        store.save(&find_source("auxIn").unwrap()).unwrap();
        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert!(raw.starts_with(r#"{"lastSource":{"fBlockID":36,"#));
        assert!(raw.contains(r#""shadow":161"#));
    }

    #[test]
    fn garbage_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = LastSourceStore::new(dir.path().join("config-jlr.json"));
        std::fs::write(store.path(), "[]").unwrap();
        assert!(matches!(store.load(), Err(MostError::Config(_))));
    }
}
