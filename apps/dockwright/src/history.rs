//! Deploy history: the last fingerprint deployed per (project, environment).
//!
//! Stored as `history.json` next to the config file. Only this binary
//! writes it, one command at a time.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use dockwright_vcs::RevisionFingerprint;
use serde::{Deserialize, Serialize};

pub const HISTORY_FILE: &str = "history.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub revision: RevisionFingerprint,
    pub deployed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    /// Keyed by `project/environment`.
    #[serde(default)]
    deploys: BTreeMap<String, HistoryEntry>,
}

impl History {
    pub fn get(&self, project: &str, environment: &str) -> Option<&HistoryEntry> {
        self.deploys.get(&key(project, environment))
    }

    pub fn previous(&self, project: &str, environment: &str) -> Option<RevisionFingerprint> {
        self.get(project, environment).map(|e| e.revision.clone())
    }

    pub fn record(&mut self, project: &str, environment: &str, revision: RevisionFingerprint) {
        self.deploys.insert(
            key(project, environment),
            HistoryEntry {
                revision,
                deployed_at: Utc::now(),
            },
        );
    }
}

fn key(project: &str, environment: &str) -> String {
    format!("{project}/{environment}")
}

/// File-backed [`History`].
#[derive(Debug, Clone)]
pub struct HistoryStore {
    path: PathBuf,
}

impl HistoryStore {
    /// Store that lives beside `config_path`.
    pub fn beside(config_path: &Path) -> Self {
        let dir = config_path.parent().unwrap_or_else(|| Path::new("."));
        Self {
            path: dir.join(HISTORY_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the history; a missing file is an empty history.
    pub fn load(&self) -> anyhow::Result<History> {
        if !self.path.exists() {
            return Ok(History::default());
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("reading history {}", self.path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("parsing history {}", self.path.display()))
    }

    /// Writes through a temporary file so a crash never leaves a torn file.
    pub fn save(&self, history: &History) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(history)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .with_context(|| format!("writing history {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("replacing history {}", self.path.display()))?;
        tracing::debug!(path = %self.path.display(), "history saved");
        Ok(())
    }
}
