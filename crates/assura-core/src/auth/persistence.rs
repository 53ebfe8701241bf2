use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use super::SessionSnapshot;

/// Session file name in cache directory
const SESSION_FILE: &str = "session.json";

/// Durable key-value storage for the session snapshot.
pub trait SessionPersistence: Send + Sync {
    /// Load the last saved snapshot, if any.
    fn load(&self) -> Result<Option<SessionSnapshot>>;

    /// Replace the saved snapshot.
    fn save(&self, snapshot: &SessionSnapshot) -> Result<()>;
}

/// Stores the session as a JSON file in the cache directory.
pub struct FileSessionPersistence {
    path: PathBuf,
}

impl FileSessionPersistence {
    pub fn new(cache_dir: impl AsRef<Path>) -> Self {
        Self {
            path: cache_dir.as_ref().join(SESSION_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionPersistence for FileSessionPersistence {
    fn load(&self) -> Result<Option<SessionSnapshot>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&self.path)
            .context("Failed to read session file")?;
        let snapshot: SessionSnapshot = serde_json::from_str(&contents)
            .context("Failed to parse session file")?;
        Ok(Some(snapshot))
    }

    fn save(&self, snapshot: &SessionSnapshot) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .context("Failed to create session directory")?;
        }
        let contents = serde_json::to_string_pretty(snapshot)?;
        std::fs::write(&self.path, contents)
            .context("Failed to write session file")?;
        Ok(())
    }
}
