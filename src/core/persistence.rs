//! Per-turn history records and the stores that accept them.
//!
//! Stores are collaborators of the orchestrator; writes happen after the turn
//! has been answered and their failures never reach the user.

use std::error::Error as StdError;
use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::core::envelope::{Envelope, EnvelopeStatus};

/// One flattened document per turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnRecord {
    pub message: String,
    pub response: String,
    pub session_id: String,
    pub original_query: String,
    pub status: EnvelopeStatus,
    pub processing_timestamp: f64,
    pub formatted_content_concise: String,
    pub formatted_content_detailed: String,
    pub generated_images_count: usize,
    pub proof_sources: Vec<String>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

impl TurnRecord {
    pub fn from_turn(message: &str, envelope: &Envelope) -> Self {
        Self {
            message: message.to_string(),
            response: envelope.formatted_content.detailed.clone(),
            session_id: envelope.session_id.clone(),
            original_query: envelope.original_query.clone(),
            status: envelope.status,
            processing_timestamp: envelope.processing_timestamp,
            formatted_content_concise: envelope.formatted_content.concise.clone(),
            formatted_content_detailed: envelope.formatted_content.detailed.clone(),
            generated_images_count: envelope.images().len(),
            proof_sources: envelope.proof.clone(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug)]
pub enum PersistenceError {
    Io { path: PathBuf, source: std::io::Error },
    Serialize(serde_json::Error),
    Parse { line: usize, source: serde_json::Error },
}

impl fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersistenceError::Io { path, source } => {
                write!(f, "History file {}: {source}", path.display())
            }
            PersistenceError::Serialize(err) => write!(f, "Failed to encode turn record: {err}"),
            PersistenceError::Parse { line, source } => {
                write!(f, "History line {line} is not a turn record: {source}")
            }
        }
    }
}

impl StdError for PersistenceError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            PersistenceError::Io { source, .. } => Some(source),
            PersistenceError::Serialize(err) => Some(err),
            PersistenceError::Parse { source, .. } => Some(source),
        }
    }
}

#[async_trait]
pub trait TurnStore: Send + Sync {
    async fn save(&self, record: TurnRecord) -> Result<(), PersistenceError>;
}

/// Appends one JSON document per line.
pub struct JsonlTurnStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlTurnStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads every record back. A missing file is an empty history.
    pub async fn load_all(&self) -> Result<Vec<TurnRecord>, PersistenceError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(self.io_error(source)),
        };

        contents
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(index, line)| {
                serde_json::from_str(line).map_err(|source| PersistenceError::Parse {
                    line: index + 1,
                    source,
                })
            })
            .collect()
    }

    fn io_error(&self, source: std::io::Error) -> PersistenceError {
        PersistenceError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

#[async_trait]
impl TurnStore for JsonlTurnStore {
    async fn save(&self, record: TurnRecord) -> Result<(), PersistenceError> {
        let mut line = serde_json::to_string(&record).map_err(PersistenceError::Serialize)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| self.io_error(source))?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|source| self.io_error(source))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|source| self.io_error(source))?;
        file.flush().await.map_err(|source| self.io_error(source))
    }
}

/// Keeps records in memory; useful when history should not touch disk.
#[derive(Default)]
pub struct MemoryTurnStore {
    records: Mutex<Vec<TurnRecord>>,
}

impl MemoryTurnStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<TurnRecord> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl TurnStore for MemoryTurnStore {
    async fn save(&self, record: TurnRecord) -> Result<(), PersistenceError> {
        self.records.lock().await.push(record);
        Ok(())
    }
}
