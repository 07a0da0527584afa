use super::lock::with_workspace_lock;
use super::SessionState;
use crate::errors::{Error, Result};
use crate::paths;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Pointer file naming the active session.
#[derive(Debug, Serialize, Deserialize)]
struct CurrentPointer {
    session_id: String,
}

/// Flat-file session store.
///
/// Directory layout:
/// ```text
/// <workspace>/.skillgate/
///   current.json          # {"session_id": "..."}
///   sessions/
///     <session_id>.json   # SessionState
///   .lock                 # advisory write lock
/// ```
///
/// The `current.json` pointer is replaced on each activation; session files
/// themselves are retained for audit.
pub struct SessionStore {
    state_dir: PathBuf,
}

impl SessionStore {
    pub fn new(workspace_root: &Path) -> Self {
        Self {
            state_dir: paths::workspace_state_dir(workspace_root),
        }
    }

    /// Create a store with an explicit state directory (for tests).
    #[allow(dead_code)]
    pub fn with_state_dir(state_dir: PathBuf) -> Self {
        Self { state_dir }
    }

    fn sessions_dir(&self) -> PathBuf {
        self.state_dir.join("sessions")
    }

    fn current_path(&self) -> PathBuf {
        self.state_dir.join("current.json")
    }

    fn session_path(&self, session_id: &str) -> PathBuf {
        self.sessions_dir().join(format!("{session_id}.json"))
    }

    /// Persist a new session and repoint `current.json` at it. At most one
    /// current session per workspace; the prior session file is retained.
    pub fn create(&self, state: &SessionState) -> Result<()> {
        Self::validate_id(&state.session_id)?;
        with_workspace_lock(&self.state_dir, || {
            let json = serde_json::to_string_pretty(state)
                .map_err(|e| Error::corrupt(&self.session_path(&state.session_id), e))?;
            write_atomic(&self.session_path(&state.session_id), json.as_bytes())?;
            let pointer = serde_json::to_string_pretty(&CurrentPointer {
                session_id: state.session_id.clone(),
            })
            .map_err(|e| Error::corrupt(&self.current_path(), e))?;
            write_atomic(&self.current_path(), pointer.as_bytes())
        })
    }

    pub fn load(&self, session_id: &str) -> Result<Option<SessionState>> {
        Self::validate_id(session_id)?;
        let path = self.session_path(session_id);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        let state: SessionState =
            serde_json::from_str(&content).map_err(|e| Error::corrupt(&path, e))?;
        Ok(Some(state))
    }

    /// Session id named by `current.json`, if any.
    pub fn current_session_id(&self) -> Result<Option<String>> {
        let path = self.current_path();
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        let pointer: CurrentPointer =
            serde_json::from_str(&content).map_err(|e| Error::corrupt(&path, e))?;
        Ok(Some(pointer.session_id))
    }

    pub fn load_current(&self) -> Result<Option<SessionState>> {
        match self.current_session_id()? {
            Some(id) => self.load(&id),
            None => Ok(None),
        }
    }

    /// Read-modify-write under the per-workspace lock. Readers need no lock
    /// but may observe either pre- or post-state.
    pub fn update(
        &self,
        session_id: &str,
        mutator: impl FnOnce(&mut SessionState),
    ) -> Result<SessionState> {
        Self::validate_id(session_id)?;
        with_workspace_lock(&self.state_dir, || {
            let path = self.session_path(session_id);
            let content = fs::read_to_string(&path)?;
            let mut state: SessionState =
                serde_json::from_str(&content).map_err(|e| Error::corrupt(&path, e))?;
            mutator(&mut state);
            let json = serde_json::to_string_pretty(&state)
                .map_err(|e| Error::corrupt(&path, e))?;
            write_atomic(&path, json.as_bytes())?;
            Ok(state)
        })
    }

    /// Remove the `current.json` pointer. The sessions directory is left
    /// intact for audit.
    pub fn clear(&self) -> Result<()> {
        let path = self.current_path();
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    /// All persisted sessions, newest first. Corrupt files are skipped with
    /// a warning rather than failing the listing.
    pub fn list(&self) -> Result<Vec<SessionState>> {
        let dir = self.sessions_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut sessions = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }
            let content = fs::read_to_string(&path)?;
            match serde_json::from_str::<SessionState>(&content) {
                Ok(state) => sessions.push(state),
                Err(e) => {
                    warn!("Skipping corrupt session file at {}: {}", path.display(), e);
                }
            }
        }
        sessions.sort_by(|a, b| b.activated_at.cmp(&a.activated_at));
        Ok(sessions)
    }

    fn validate_id(id: &str) -> Result<()> {
        if id.is_empty() || id.contains("..") || id.contains('/') || id.contains('\\') {
            return Err(Error::StateCorruption {
                path: id.to_string(),
                message: "session id contains invalid characters".to_string(),
            });
        }
        Ok(())
    }
}

/// Write-tempfile-then-rename in the target's directory, so the rename never
/// crosses filesystems and readers see either the old or the new content.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| Error::corrupt(path, "path has no parent directory"))?;
    fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.persist(path)
        .map_err(|e| Error::corrupt(path, e.error))?;
    Ok(())
}
