// Persisted repo-state map for the GitHub adapter. Lives in a JSON snapshot
// file so "have we already pushed this repo" survives process restarts.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{error, info};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepoState {
    pub stars: u64,
    pub release: String,
    pub pushed_at: String,
}

pub struct GithubStateStore {
    path: PathBuf,
}

impl GithubStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> HashMap<String, RepoState> {
        if !self.path.exists() {
            return HashMap::new();
        }
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(map) => map,
                Err(e) => {
                    error!(path = %self.path.display(), error = %e, "Failed to parse github state");
                    HashMap::new()
                }
            },
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "Failed to read github state");
                HashMap::new()
            }
        }
    }

    pub fn save(&self, state: &HashMap<String, RepoState>) {
        if let Some(parent) = self.path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match serde_json::to_string_pretty(state) {
            Ok(raw) => {
                if let Err(e) = std::fs::write(&self.path, raw) {
                    error!(path = %self.path.display(), error = %e, "Failed to write github state");
                } else {
                    info!(repos = state.len(), "GitHub state saved");
                }
            }
            Err(e) => error!(error = %e, "Failed to serialize github state"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn state_round_trips() {
        let dir = tempdir().unwrap();
        let store = GithubStateStore::new(dir.path().join("state.json"));
        assert!(store.load().is_empty());

        let mut map = HashMap::new();
        map.insert(
            "org/repo".to_string(),
            RepoState {
                stars: 1200,
                release: "v1.2.0".to_string(),
                pushed_at: "2024-05-01".to_string(),
            },
        );
        store.save(&map);

        let loaded = store.load();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded["org/repo"].stars, 1200);
        assert_eq!(loaded["org/repo"].release, "v1.2.0");
    }
}
