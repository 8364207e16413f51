use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::error::AppResult;

/// Per-entity stage-output documents.
///
/// Every stage persists its product so a resumed run can reload it
/// instead of recomputing. A document containing `null` represents
/// "nothing to process" and is distinct from an absent document,
/// which means the stage never ran.
#[derive(Debug, Clone)]
pub struct DumpStore {
    dir: PathBuf,
}

impl DumpStore {
    pub fn new(dir: &Path) -> AppResult<Self> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    fn path(&self, entity: &str, name: &str) -> PathBuf {
        self.dir.join(format!("{}_{}.json", entity, name))
    }

    pub fn store<T: Serialize>(&self, entity: &str, name: &str, data: &T) -> AppResult<()> {
        let text = serde_json::to_string_pretty(data)?;
        std::fs::write(self.path(entity, name), text)?;
        Ok(())
    }

    /// Records that a stage ran and produced nothing.
    pub fn store_empty(&self, entity: &str, name: &str) -> AppResult<()> {
        std::fs::write(self.path(entity, name), "null")?;
        Ok(())
    }

    pub fn exists(&self, entity: &str, name: &str) -> bool {
        self.path(entity, name).exists()
    }

    /// Loads a stage output. `Ok(None)` means the document exists but
    /// holds nothing (the stage found no work); an absent document is
    /// also `Ok(None)` here since resumption treats both as "no data".
    pub fn load<T: DeserializeOwned>(&self, entity: &str, name: &str) -> AppResult<Option<T>> {
        let path = self.path(entity, name);

        if !path.exists() {
            return Ok(None);
        }

        let text = std::fs::read_to_string(path)?;
        if text.trim() == "null" || text.trim().is_empty() {
            return Ok(None);
        }

        Ok(Some(serde_json::from_str(&text)?))
    }

    /// Deletes all stage-output documents; called when a run starts
    /// fresh or completed successfully.
    pub fn purge(&self) -> AppResult<()> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) => {
                warn!("Could not read dump folder: {}", err);
                return Ok(());
            }
        };

        for entry in entries.flatten() {
            if entry.path().is_file() {
                if let Err(err) = std::fs::remove_file(entry.path()) {
                    warn!("Could not delete '{}': {}", entry.path().display(), err);
                }
            }
        }

        Ok(())
    }
}
