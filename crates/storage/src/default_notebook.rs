//! The remembered default notebook: one slot, replaced on every write.

use chrono::Utc;
use folio_core::{DefaultRecord, Paths, Result};
use std::sync::Mutex;
use tracing::{debug, warn};

use crate::atomic::{read_json, remove_if_exists, write_json};

pub trait DefaultNotebookMemory: Send + Sync {
    fn get(&self) -> Option<DefaultRecord>;
    fn set(&self, id: &str, url: &str) -> Result<()>;
    fn forget(&self) -> Result<()>;
}

pub struct FileDefaultNotebook {
    paths: Paths,
}

impl FileDefaultNotebook {
    pub fn new(paths: Paths) -> Self {
        Self { paths }
    }
}

impl DefaultNotebookMemory for FileDefaultNotebook {
    fn get(&self) -> Option<DefaultRecord> {
        match read_json::<DefaultRecord>(&self.paths.default_notebook_file()) {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable default notebook record");
                None
            }
        }
    }

    fn set(&self, id: &str, url: &str) -> Result<()> {
        if let Some(current) = self.get() {
            if current.id == id && current.url == url {
                return Ok(());
            }
        }
        write_json(
            &self.paths.default_notebook_file(),
            &DefaultRecord {
                id: id.to_string(),
                url: url.to_string(),
                updated_at: Utc::now(),
            },
        )?;
        debug!(notebook_id = id, "Remembered default notebook");
        Ok(())
    }

    fn forget(&self) -> Result<()> {
        remove_if_exists(&self.paths.default_notebook_file())
    }
}

#[derive(Default)]
pub struct MemoryDefaultNotebook {
    slot: Mutex<Option<DefaultRecord>>,
    writes: Mutex<usize>,
}

impl MemoryDefaultNotebook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(id: &str, url: &str) -> Self {
        let memory = Self::default();
        *memory.slot.lock().unwrap_or_else(|p| p.into_inner()) = Some(DefaultRecord {
            id: id.to_string(),
            url: url.to_string(),
            updated_at: Utc::now(),
        });
        memory
    }

    /// Number of `set` calls that changed the slot.
    pub fn writes(&self) -> usize {
        *self.writes.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl DefaultNotebookMemory for MemoryDefaultNotebook {
    fn get(&self) -> Option<DefaultRecord> {
        self.slot.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn set(&self, id: &str, url: &str) -> Result<()> {
        let mut slot = self.slot.lock().unwrap_or_else(|p| p.into_inner());
        if matches!(&*slot, Some(r) if r.id == id && r.url == url) {
            return Ok(());
        }
        *slot = Some(DefaultRecord {
            id: id.to_string(),
            url: url.to_string(),
            updated_at: Utc::now(),
        });
        *self.writes.lock().unwrap_or_else(|p| p.into_inner()) += 1;
        Ok(())
    }

    fn forget(&self) -> Result<()> {
        *self.slot.lock().unwrap_or_else(|p| p.into_inner()) = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_set_twice_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let memory = FileDefaultNotebook::new(Paths::with_base(temp_dir.path().to_path_buf()));
        assert!(memory.get().is_none());

        memory.set("nb-42", "https://x/notebook/nb-42").unwrap();
        let first = memory.get().unwrap();
        memory.set("nb-42", "https://x/notebook/nb-42").unwrap();
        assert_eq!(memory.get().unwrap(), first);
    }

    #[test]
    fn test_set_replaces_wholesale() {
        let temp_dir = TempDir::new().unwrap();
        let memory = FileDefaultNotebook::new(Paths::with_base(temp_dir.path().to_path_buf()));
        memory.set("nb-1", "https://x/notebook/nb-1").unwrap();
        memory.set("nb-2", "https://x/notebook/nb-2").unwrap();

        let record = memory.get().unwrap();
        assert_eq!(record.id, "nb-2");
        assert_eq!(record.url, "https://x/notebook/nb-2");
    }

    #[test]
    fn test_corrupt_record_reads_as_empty() {
        let temp_dir = TempDir::new().unwrap();
        let paths = Paths::with_base(temp_dir.path().to_path_buf());
        std::fs::write(paths.default_notebook_file(), "garbage").unwrap();
        let memory = FileDefaultNotebook::new(paths);
        assert!(memory.get().is_none());
        memory.set("nb-1", "u").unwrap();
        assert_eq!(memory.get().unwrap().id, "nb-1");
    }

    #[test]
    fn test_forget() {
        let memory = MemoryDefaultNotebook::with_record("nb-1", "u1");
        memory.forget().unwrap();
        assert!(memory.get().is_none());
    }

    #[test]
    fn test_memory_counts_effective_writes() {
        let memory = MemoryDefaultNotebook::new();
        memory.set("a", "u").unwrap();
        memory.set("a", "u").unwrap();
        memory.set("b", "u2").unwrap();
        assert_eq!(memory.writes(), 2);
    }
}
