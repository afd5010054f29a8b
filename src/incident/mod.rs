//! Incident model and lifecycle state machine.

pub mod store;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::event::Event;

pub use self::store::IncidentStore;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IncidentError {
    #[error("illegal status transition {from} -> {to}")]
    InvalidTransition {
        from: IncidentStatus,
        to: IncidentStatus,
    },
    #[error("incident {0} not found")]
    NotFound(Uuid),
}

/// Lifecycle status. Transitions only move forward:
/// `open -> mitigating -> resolved | failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    Open,
    Mitigating,
    Resolved,
    Failed,
}

impl IncidentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, IncidentStatus::Resolved | IncidentStatus::Failed)
    }

    pub fn can_transition_to(&self, next: IncidentStatus) -> bool {
        matches!(
            (self, next),
            (IncidentStatus::Open, IncidentStatus::Mitigating)
                | (IncidentStatus::Mitigating, IncidentStatus::Resolved)
                | (IncidentStatus::Mitigating, IncidentStatus::Failed)
        )
    }
}

impl fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IncidentStatus::Open => write!(f, "open"),
            IncidentStatus::Mitigating => write!(f, "mitigating"),
            IncidentStatus::Resolved => write!(f, "resolved"),
            IncidentStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Well-known action kinds produced by the executor.
pub mod action {
    pub const RESTART_SERVICE: &str = "restart_service";
    pub const KILL_TOP_PROCESS: &str = "kill_top_process";
    pub const CLEAR_TEMP_LOGS: &str = "clear_temp_logs";
    pub const CHECK_HEALTH: &str = "check_health";
    pub const EXCEPTION: &str = "exception";
    pub const TIMEOUT: &str = "timeout";
}

/// Result of a single remediation sub-action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub action: String,
    pub ok: bool,
    #[serde(default)]
    pub details: Map<String, Value>,
}

impl ActionOutcome {
    pub fn new(action: impl Into<String>, ok: bool, details: Value) -> Self {
        let details = match details {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            action: action.into(),
            ok,
            details,
        }
    }

    /// Synthetic failure standing in for an executor fault.
    pub fn exception(error: impl fmt::Display) -> Self {
        Self::new(
            action::EXCEPTION,
            false,
            serde_json::json!({ "error": error.to_string() }),
        )
    }

    pub fn is_successful(&self, kind: &str) -> bool {
        self.ok && self.action == kind
    }
}

/// One event tracked through remediation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub id: Uuid,
    /// Creation order within this process; breaks `opened_at` ties.
    pub seq: u64,
    pub status: IncidentStatus,
    pub event: Event,
    pub hypothesis: Option<String>,
    pub remediation_attempts: u32,
    pub actions: Vec<ActionOutcome>,
    pub notes: Vec<String>,
    pub opened_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Incident {
    pub fn open(event: Event, seq: u64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            seq,
            status: IncidentStatus::Open,
            event,
            hypothesis: None,
            remediation_attempts: 0,
            actions: Vec::new(),
            notes: Vec::new(),
            opened_at: now,
            updated_at: now,
            closed_at: None,
        }
    }

    /// Move to `next`, stamping `closed_at` on entry to a terminal state.
    pub fn transition(&mut self, next: IncidentStatus) -> Result<(), IncidentError> {
        if !self.status.can_transition_to(next) {
            return Err(IncidentError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        let now = Utc::now();
        self.status = next;
        self.updated_at = now;
        if next.is_terminal() {
            self.closed_at = Some(now);
        }
        Ok(())
    }

    pub fn set_hypothesis(&mut self, hypothesis: String) {
        self.notes.push(format!("Hypothesis: {hypothesis}"));
        self.hypothesis = Some(hypothesis);
        self.touch();
    }

    pub fn begin_attempt(&mut self, attempt: u32) {
        self.remediation_attempts = attempt;
        self.touch();
    }

    pub fn record_actions(&mut self, outcomes: impl IntoIterator<Item = ActionOutcome>) {
        self.actions.extend(outcomes);
        self.touch();
    }

    pub fn note(&mut self, note: impl Into<String>) {
        self.notes.push(note.into());
        self.touch();
    }

    /// True if any recorded action of `kind` succeeded.
    pub fn has_successful(&self, kind: &str) -> bool {
        self.actions.iter().any(|a| a.is_successful(kind))
    }

    pub fn snapshot(&self) -> IncidentSnapshot {
        IncidentSnapshot {
            id: self.id,
            event: self.event.clone(),
            hypothesis: self.hypothesis.clone(),
            remediation_attempts: self.remediation_attempts,
            actions: self.actions.clone(),
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Read-only view handed to collaborators (executor, verifier).
#[derive(Debug, Clone, Serialize)]
pub struct IncidentSnapshot {
    pub id: Uuid,
    pub event: Event,
    pub hypothesis: Option<String>,
    pub remediation_attempts: u32,
    pub actions: Vec<ActionOutcome>,
}

impl IncidentSnapshot {
    pub fn has_successful(&self, kind: &str) -> bool {
        self.actions.iter().any(|a| a.is_successful(kind))
    }
}
