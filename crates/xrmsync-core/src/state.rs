//! Remembered selections persisted in the XDG state directory
//!
//! `assembly update` can be run without a path once an assembly has been
//! registered or updated from a local file. The last path per environment and
//! assembly is kept in `state.json`:
//! - Unix: `$XDG_STATE_HOME/xrmsync/` (fallback: `~/.local/state/xrmsync/`)
//! - Windows: `%LOCALAPPDATA%\xrmsync\`

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::RecordId;

const STATE_FILE_NAME: &str = "state.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssemblySelection {
    pub path: PathBuf,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelectionState {
    /// Keyed by `<environment>/<assembly id>`
    #[serde(default)]
    pub assemblies: BTreeMap<String, AssemblySelection>,
}

#[derive(Debug, Clone)]
pub struct SelectionStore {
    state_path: PathBuf,
}

impl SelectionStore {
    pub fn default_state_dir() -> anyhow::Result<PathBuf> {
        let base = if cfg!(unix) {
            dirs::state_dir()
                .or_else(dirs::data_local_dir)
                .ok_or_else(|| anyhow::anyhow!("Cannot determine state directory"))?
        } else {
            dirs::data_local_dir()
                .ok_or_else(|| anyhow::anyhow!("Cannot determine local app data directory"))?
        };
        Ok(base.join("xrmsync"))
    }

    pub fn open_default() -> anyhow::Result<Self> {
        Ok(Self::new(Self::default_state_dir()?))
    }

    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        Self {
            state_path: state_dir.as_ref().join(STATE_FILE_NAME),
        }
    }

    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    fn key(environment: &str, assembly_id: &RecordId) -> String {
        format!("{}/{}", environment.to_lowercase(), assembly_id)
    }

    pub fn load(&self) -> anyhow::Result<SelectionState> {
        if !self.state_path.exists() {
            return Ok(SelectionState::default());
        }
        let bytes = fs::read(&self.state_path)
            .with_context(|| format!("Failed to read state file: {}", self.state_path.display()))?;
        serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse state file: {}", self.state_path.display()))
    }

    /// Save atomically (tmp + rename)
    pub fn save(&self, state: &SelectionState) -> anyhow::Result<()> {
        let dir = self
            .state_path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("State path has no parent directory"))?;
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create state directory: {}", dir.display()))?;

        let bytes = serde_json::to_vec_pretty(state).context("Failed to serialize state")?;
        let tmp_path = dir.join(format!("{}.{}.tmp", STATE_FILE_NAME, std::process::id()));
        fs::write(&tmp_path, bytes)
            .with_context(|| format!("Failed to write tmp state file: {}", tmp_path.display()))?;

        if self.state_path.exists() {
            fs::remove_file(&self.state_path).with_context(|| {
                format!(
                    "Failed to remove existing state file: {}",
                    self.state_path.display()
                )
            })?;
        }
        fs::rename(&tmp_path, &self.state_path)
            .with_context(|| format!("Failed to rename tmp state file: {}", tmp_path.display()))?;
        Ok(())
    }

    pub fn last_assembly_path(
        &self,
        environment: &str,
        assembly_id: &RecordId,
    ) -> anyhow::Result<Option<PathBuf>> {
        let state = self.load()?;
        Ok(state
            .assemblies
            .get(&Self::key(environment, assembly_id))
            .map(|s| s.path.clone()))
    }

    pub fn set_last_assembly_path(
        &self,
        environment: &str,
        assembly_id: &RecordId,
        path: &Path,
    ) -> anyhow::Result<()> {
        let mut state = self.load()?;
        state.assemblies.insert(
            Self::key(environment, assembly_id),
            AssemblySelection {
                path: path.to_path_buf(),
                updated_at: Utc::now(),
            },
        );
        self.save(&state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_unknown_selection_is_none() {
        let temp = TempDir::new().unwrap();
        let store = SelectionStore::new(temp.path());
        let id = RecordId::new("5a1c0f6e-0000-0000-0000-000000000001");
        assert!(store.last_assembly_path("dev", &id).unwrap().is_none());
    }

    #[test]
    fn test_remembers_path_per_environment() {
        let temp = TempDir::new().unwrap();
        let store = SelectionStore::new(temp.path().join("xrmsync"));
        let id = RecordId::new("{5A1C0F6E-0000-0000-0000-000000000001}");

        store
            .set_last_assembly_path("Dev", &id, Path::new("/build/Acme.Plugins.dll"))
            .unwrap();

        assert_eq!(
            store.last_assembly_path("dev", &id).unwrap(),
            Some(PathBuf::from("/build/Acme.Plugins.dll"))
        );
        assert!(store.last_assembly_path("prod", &id).unwrap().is_none());
    }

    #[test]
    fn test_overwrites_previous_path() {
        let temp = TempDir::new().unwrap();
        let store = SelectionStore::new(temp.path());
        let id = RecordId::new("5a1c0f6e-0000-0000-0000-000000000001");

        store.set_last_assembly_path("dev", &id, Path::new("a.dll")).unwrap();
        store.set_last_assembly_path("dev", &id, Path::new("b.dll")).unwrap();

        let state = store.load().unwrap();
        assert_eq!(state.assemblies.len(), 1);
        assert_eq!(
            store.last_assembly_path("dev", &id).unwrap(),
            Some(PathBuf::from("b.dll"))
        );
    }

    #[test]
    fn test_corrupt_state_is_an_error() {
        let temp = TempDir::new().unwrap();
        let store = SelectionStore::new(temp.path());
        std::fs::write(store.state_path(), "{not json").unwrap();
        assert!(store.load().is_err());
    }
}
