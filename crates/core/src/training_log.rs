//! Append-only `fileId;category;filename` log consumed by retraining.

use crate::config::{keys, ConfigProvider};
use crate::error::{PipelineError, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainingLogEntry {
    pub file_id: String,
    pub category: String,
    pub file_name: String,
}

impl TrainingLogEntry {
    pub fn new(
        file_id: impl Into<String>,
        category: impl Into<String>,
        file_name: impl Into<String>,
    ) -> Self {
        Self {
            file_id: file_id.into(),
            category: category.into(),
            file_name: file_name.into(),
        }
    }

    /// Parses one log line. The file name is everything after the second `;`.
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.trim_end_matches(['\r', '\n']).splitn(3, ';');
        let file_id = parts.next()?.trim();
        let category = parts.next()?.trim();
        let file_name = parts.next()?.trim();
        if file_id.is_empty() || category.is_empty() || file_name.is_empty() {
            return None;
        }
        Some(Self::new(file_id, category, file_name))
    }
}

impl fmt::Display for TrainingLogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{};{};{}",
            single_line(&self.file_id).replace(';', "_"),
            single_line(&self.category).replace(';', "_"),
            single_line(&self.file_name)
        )
    }
}

fn single_line(s: &str) -> String {
    s.replace(['\r', '\n'], " ")
}

#[derive(Debug, Clone)]
pub struct TrainingLog {
    path: PathBuf,
}

impl TrainingLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn from_config(cfg: &dyn ConfigProvider) -> Result<Self> {
        let dir = cfg.require(keys::TRAINING_LOG_PATH)?;
        let name = cfg.require(keys::TRAINING_LOG_NAME)?;
        Ok(Self::new(Path::new(&dir).join(name)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends all entries with a single write. Existing lines are never
    /// touched.
    pub async fn append(&self, entries: &[TrainingLogEntry]) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let mut buf = String::new();
        for entry in entries {
            buf.push_str(&entry.to_string());
            buf.push('\n');
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(buf.as_bytes()).await?;
        file.flush().await?;
        debug!(path = %self.path.display(), lines = entries.len(), "training log appended");
        Ok(entries.len())
    }

    pub async fn read_all(&self) -> Result<Vec<TrainingLogEntry>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PipelineError::TrainingDataNotFound(self.path.clone()))
            }
            Err(e) => return Err(e.into()),
        };
        let mut entries = Vec::new();
        for (idx, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match TrainingLogEntry::parse(line) {
                Some(entry) => entries.push(entry),
                None => warn!(path = %self.path.display(), line = idx + 1, "skipping malformed training log line"),
            }
        }
        Ok(entries)
    }
}
