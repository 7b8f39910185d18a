//! Session persistence inside the workspace.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::debug;

use foreman_core::{layout, Session};

use crate::error::WorkerError;

/// Reads and writes `session.json`.
///
/// Writes go to a temporary file that is renamed into place, so a worker
/// killed mid-write leaves the previous snapshot intact.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
    tmp: PathBuf,
}

impl SessionStore {
    /// Store for the session file in `workspace`.
    pub fn new(workspace: &Path) -> Self {
        Self {
            path: workspace.join(layout::SESSION_FILE),
            tmp: workspace.join(layout::SESSION_TMP_FILE),
        }
    }

    /// Path of the session file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted session, if one exists.
    pub async fn load(&self) -> Result<Option<Session>, WorkerError> {
        match fs::read_to_string(&self.path).await {
            Ok(json) => Ok(Some(Session::from_json(&json)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Persist a snapshot.
    pub async fn save(&self, session: &Session) -> Result<(), WorkerError> {
        let json = session.to_json()?;
        fs::write(&self.tmp, json).await?;
        fs::rename(&self.tmp, &self.path).await?;
        debug!(turns = session.len(), "Session persisted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use foreman_core::Turn;

    #[tokio::test]
    async fn test_missing_session_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_and_reload_reproduces_history() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());

        let mut session = Session::new("t1");
        session.push(Turn::user("go"));
        session.push(Turn::assistant("{}", None));
        session.push(Turn::tool_result("malformed command: x", true));
        store.save(&session).await.unwrap();

        let reloaded = store.load().await.unwrap().unwrap();
        assert_eq!(reloaded.turns, session.turns);
        assert!(!dir.path().join("session.json.tmp").exists());
    }
}
