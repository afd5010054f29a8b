//! Structured audit trail of incident lifecycle transitions.
//!
//! Every stage an incident passes through (opened, analyzed, each remediation
//! attempt, resolution or escalation) is appended as one JSON line. Writes are
//! serialized through a `tokio::sync::Mutex` and flushed before `log` returns,
//! so the caller observes the record on disk before moving to the next stage.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::incident::{Incident, IncidentStatus};

// ---------------------------------------------------------------------------
// AuditStage
// ---------------------------------------------------------------------------

/// Lifecycle stages recorded in the audit trail.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditStage {
    /// An incident was created for a dequeued event.
    IncidentOpened,
    /// A hypothesis was produced for the incident.
    Analyzed,
    /// The analyzer failed or timed out and the rule-based fallback was used.
    AnalyzeFallback,
    /// One remediation attempt finished executing.
    RemediationAttempt,
    /// The verifier failed or timed out; counted as unhealthy.
    VerifyError,
    /// A resolved incident was stored in the similarity memory.
    Recorded,
    /// Verification succeeded and the incident is closed.
    Resolved,
    /// All attempts were exhausted and the incident was handed to a human.
    Escalated,
}

// ---------------------------------------------------------------------------
// AuditEntry
// ---------------------------------------------------------------------------

/// A single audit record. Fields irrelevant to a stage are `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// ISO 8601 timestamp.
    pub timestamp: String,
    pub stage: AuditStage,
    pub incident_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<IncidentStatus>,
    /// 1-based remediation attempt number.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hypothesis: Option<String>,
    /// Stage-specific payload, e.g. the executor report of an attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AuditEntry {
    pub fn new(stage: AuditStage, incident_id: Uuid) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            stage,
            incident_id,
            event_id: None,
            event_type: None,
            status: None,
            attempt: None,
            hypothesis: None,
            result: None,
            reason: None,
        }
    }

    /// Entry pre-filled with the incident's identity, event and status.
    pub fn for_incident(stage: AuditStage, incident: &Incident) -> Self {
        let mut entry = Self::new(stage, incident.id);
        entry.event_id = Some(incident.event.id);
        entry.event_type = Some(incident.event.event_type.to_string());
        entry.status = Some(incident.status);
        entry
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    pub fn with_hypothesis(mut self, hypothesis: impl Into<String>) -> Self {
        self.hypothesis = Some(hypothesis.into());
        self
    }

    pub fn with_result(mut self, result: serde_json::Value) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

// ---------------------------------------------------------------------------
// AuditLog
// ---------------------------------------------------------------------------

/// Append-only audit log backed by a JSON-lines file.
pub struct AuditLog {
    path: PathBuf,
    writer: Mutex<tokio::fs::File>,
}

impl AuditLog {
    /// Open (or create) the audit log file at `path` in append mode.
    pub async fn new(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.with_context(|| {
                    format!("failed to create audit log directory: {}", parent.display())
                })?;
            }
        }

        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("failed to open audit log: {}", path.display()))?;

        debug!(path = %path.display(), "audit log opened");

        Ok(Self {
            path,
            writer: Mutex::new(file),
        })
    }

    /// Append a single entry as a JSON line and flush it.
    pub async fn log(&self, entry: AuditEntry) -> Result<()> {
        let mut line = serde_json::to_string(&entry).context("failed to serialize audit entry")?;
        line.push('\n');

        let mut writer = self.writer.lock().await;
        writer
            .write_all(line.as_bytes())
            .await
            .with_context(|| format!("failed to write to audit log: {}", self.path.display()))?;
        writer
            .flush()
            .await
            .with_context(|| format!("failed to flush audit log: {}", self.path.display()))?;

        Ok(())
    }

    /// The last `n` records, oldest first. Lines that do not parse (for
    /// example a write still in flight) are skipped.
    pub async fn tail(&self, n: usize) -> Result<Vec<AuditEntry>> {
        tail_file(&self.path, n).await
    }
}

/// Read the last `n` records of an audit log without opening it for writing.
/// A missing file yields an empty list.
pub async fn tail_file(path: &Path, n: usize) -> Result<Vec<AuditEntry>> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(c) => c,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(e).with_context(|| format!("failed to read audit log: {}", path.display()))
        }
    };

    let lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(n);
    Ok(lines[start..]
        .iter()
        .filter_map(|line| match serde_json::from_str::<AuditEntry>(line) {
            Ok(entry) => Some(entry),
            Err(e) => {
                debug!(error = %e, "skipping malformed audit line");
                None
            }
        })
        .collect())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
