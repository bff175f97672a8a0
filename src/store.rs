//! Persisted daemon state - the last active session

use crate::session::SessionId;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::warn;

#[derive(Debug, Default, Serialize, Deserialize)]
struct StateData {
    current_session: Option<SessionId>,
    stored_at: Option<DateTime<Utc>>,
}

/// Small JSON state file remembering which session was current when the UI
/// last detached, so a recreated UI lands where the user left off.
pub struct StateStore {
    data: StateData,
    path: PathBuf,
}

impl StateStore {
    /// Load from the default cache location.
    pub fn load() -> Result<Self> {
        Self::load_from(Self::state_path())
    }

    /// Load from an explicit path. A corrupt file is reset rather than
    /// treated as fatal.
    pub fn load_from(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let data = if path.exists() {
            let content = fs::read_to_string(&path)?;
            match serde_json::from_str(&content) {
                Ok(d) => d,
                Err(err) => {
                    warn!(%err, path = %path.display(), "corrupt state file, resetting");
                    StateData::default()
                }
            }
        } else {
            StateData::default()
        };

        Ok(Self { data, path })
    }

    fn state_path() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("muxd")
            .join("state.json")
    }

    pub fn save(&self) -> Result<()> {
        let content = serde_json::to_string_pretty(&self.data)?;
        fs::write(&self.path, content)?;
        Ok(())
    }

    pub fn current_session(&self) -> Option<SessionId> {
        self.data.current_session
    }

    pub fn set_current_session(&mut self, id: Option<SessionId>) -> Result<()> {
        self.data.current_session = id;
        self.data.stored_at = Some(Utc::now());
        self.save()
    }
}
