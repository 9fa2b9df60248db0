//! Append-only log of completed exchanges, one JSON Lines file per session.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::fs_util::{ensure_private_dir, set_secure_file_permissions};

/// One completed turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeRecord {
    pub timestamp: DateTime<Utc>,
    pub user: String,
    pub assistant: String,
    pub extracted_facts: Vec<String>,
}

pub struct ConversationLog {
    path: PathBuf,
}

impl ConversationLog {
    /// Start a session file `conversation_YYYYMMDD_HHMMSS.jsonl` in `dir`.
    ///
    /// The file itself is created on the first append.
    pub fn start(dir: &Path) -> anyhow::Result<Self> {
        ensure_private_dir(dir)?;
        let name = format!(
            "conversation_{}.jsonl",
            Local::now().format("%Y%m%d_%H%M%S")
        );
        let path = dir.join(name);
        debug!(path = %path.display(), "conversation log started");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &ExchangeRecord) -> anyhow::Result<()> {
        let is_new = !self.path.exists();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| anyhow::anyhow!("failed to open {}: {e}", self.path.display()))?;
        if is_new {
            set_secure_file_permissions(&self.path)?;
        }
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        file.write_all(line.as_bytes())
            .map_err(|e| anyhow::anyhow!("failed to write {}: {e}", self.path.display()))
    }

    /// Every record written so far, in order.
    pub fn read_all(&self) -> anyhow::Result<Vec<ExchangeRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.path)
            .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", self.path.display()))?;
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(anyhow::Error::from))
            .collect()
    }
}
