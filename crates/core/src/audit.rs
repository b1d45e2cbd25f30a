//! Bounded audit log of processed and rejected deliveries.
//!
//! Entries are kept newest first and capped at [`MAX_ENTRIES`]. When backed
//! by a file the whole log is rewritten on every append, through a temporary
//! file in the same directory so a crash never leaves a truncated log.

use std::collections::VecDeque;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deployhook_origin::{EventKind, NormalizedEvent};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Mutex;

pub const MAX_ENTRIES: usize = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditStatus {
    ValidationError,
    ConfigurationError,
    Ignored,
    NotFound,
    ServerError,
    ExecutionAttempt,
    ExecutionSuccess,
    ExecutionFailure,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
    pub timestamp: DateTime<Utc>,
    pub status: AuditStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub committer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_kind: Option<EventKind>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Map<String, Value>>,
}

impl AuditLogEntry {
    pub fn new(status: AuditStatus, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            status,
            project_name: None,
            branch_name: None,
            committer: None,
            commit_hash: None,
            event_kind: None,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_event(mut self, event: &NormalizedEvent) -> Self {
        self.project_name = Some(event.project_name.clone());
        self.branch_name = Some(event.branch_name.clone());
        self.committer = Some(event.committer_name.clone());
        self.commit_hash = Some(event.commit_hash.clone());
        self.event_kind = Some(event.event_kind);
        self
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project_name = Some(project.into());
        self
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch_name = Some(branch.into());
        self
    }

    /// Attaches free-form details. Anything but a JSON object is ignored.
    pub fn with_details(mut self, details: Value) -> Self {
        if let Value::Object(map) = details {
            self.details = Some(map);
        }
        self
    }
}

/// Append-only destination for audit entries.
///
/// Appending never fails the caller, sinks report their own I/O problems.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, entry: AuditLogEntry);
}

pub struct AuditLog {
    entries: Mutex<VecDeque<AuditLogEntry>>,
    path: Option<PathBuf>,
}

impl AuditLog {
    pub fn in_memory() -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(MAX_ENTRIES + 1)),
            path: None,
        }
    }

    /// Opens the log persisted at `path`, starting empty when the file does
    /// not exist or cannot be parsed.
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut entries = match tokio::fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str::<VecDeque<AuditLogEntry>>(&content)
                .unwrap_or_else(|error| {
                    tracing::error!("Ignoring unparseable audit log {path:?}: {error}");
                    VecDeque::new()
                }),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => VecDeque::new(),
            Err(error) => {
                tracing::error!("Error reading audit log {path:?}: {error}");
                VecDeque::new()
            }
        };
        entries.truncate(MAX_ENTRIES);

        Self {
            entries: Mutex::new(entries),
            path: Some(path),
        }
    }

    /// Entries newest first, as stored.
    pub async fn entries(&self) -> Vec<AuditLogEntry> {
        self.entries.lock().await.iter().cloned().collect()
    }

    /// Entries oldest first, the order the log viewer displays them in.
    pub async fn chronological(&self) -> Vec<AuditLogEntry> {
        self.entries.lock().await.iter().rev().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[async_trait]
impl AuditSink for AuditLog {
    async fn append(&self, entry: AuditLogEntry) {
        // Held across the write so the file always reflects append order.
        let mut entries = self.entries.lock().await;
        entries.push_front(entry);
        entries.truncate(MAX_ENTRIES);

        let Some(path) = self.path.clone() else {
            return;
        };

        let content = match serde_json::to_vec_pretty(&*entries) {
            Ok(content) => content,
            Err(error) => {
                tracing::error!("Error serializing audit log: {error}");
                return;
            }
        };

        match tokio::task::spawn_blocking(move || write_atomically(&path, &content)).await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => tracing::error!("Error writing to audit log: {error}"),
            Err(error) => tracing::error!("Audit log writer panicked: {error}"),
        }
    }
}

fn write_atomically(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    file.write_all(content)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|error| error.error)?;
    Ok(())
}

#[cfg(test)]
#[path = "audit_tests.rs"]
mod tests;
