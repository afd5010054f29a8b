//! Remediation: the action-execution contract and the default playbook.
//!
//! An [`ActionExecutor`] performs one remediation attempt for an incident and
//! reports the discrete actions it ran. It never fails: faults inside an
//! attempt (errors or panics from the underlying [`Remediator`]) surface as a
//! synthetic `exception` outcome so the incident's retry loop keeps control.

pub mod simulated;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use crate::event::EventType;
use crate::incident::{action, ActionOutcome, IncidentSnapshot};

pub use self::simulated::SimulatedRemediator;

/// Actions produced by a single `execute` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub actions: Vec<ActionOutcome>,
    /// True iff at least one action ran and every action succeeded.
    pub all_ok: bool,
}

impl ExecutionReport {
    pub fn from_actions(actions: Vec<ActionOutcome>) -> Self {
        let all_ok = !actions.is_empty() && actions.iter().all(|a| a.ok);
        Self { actions, all_ok }
    }

    pub fn action_kinds(&self) -> Vec<&str> {
        self.actions.iter().map(|a| a.action.as_str()).collect()
    }
}

#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Run one remediation attempt. Returns only the actions of this attempt.
    async fn execute(&self, incident: &IncidentSnapshot) -> ExecutionReport;
}

/// The concrete side effects a playbook can invoke. `Ok(false)` is an
/// ordinary unsuccessful action; `Err` is a fault.
#[async_trait]
pub trait Remediator: Send + Sync {
    async fn restart_service(&self, service: &str) -> Result<bool>;
    async fn kill_top_process(&self, host: &str) -> Result<bool>;
    async fn clear_temp_logs(&self, host: &str) -> Result<bool>;
    async fn check_health(&self, service: &str) -> Result<bool>;
}

/// Which action a playbook picks for an incident.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybookStep {
    RestartService { service: String },
    KillTopProcess { host: String },
    ClearTempLogs { host: String },
    CheckHealth { service: String },
}

impl PlaybookStep {
    /// Choose a step from the hypothesis and event type.
    pub fn select(incident: &IncidentSnapshot) -> Self {
        let event = &incident.event;
        let hypothesis = incident
            .hypothesis
            .as_deref()
            .unwrap_or_default()
            .to_lowercase();
        let service = || event.payload_str("service").unwrap_or("app").to_string();
        let host = || event.payload_str("host").unwrap_or("app-1").to_string();

        if hypothesis.contains("restart") || event.event_type == EventType::ServiceDown {
            PlaybookStep::RestartService { service: service() }
        } else if event.is_cpu_anomaly() {
            PlaybookStep::KillTopProcess { host: host() }
        } else if event.event_type == EventType::DiskFull {
            PlaybookStep::ClearTempLogs { host: host() }
        } else {
            PlaybookStep::CheckHealth { service: service() }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PlaybookStep::RestartService { .. } => action::RESTART_SERVICE,
            PlaybookStep::KillTopProcess { .. } => action::KILL_TOP_PROCESS,
            PlaybookStep::ClearTempLogs { .. } => action::CLEAR_TEMP_LOGS,
            PlaybookStep::CheckHealth { .. } => action::CHECK_HEALTH,
        }
    }

    fn details(&self) -> serde_json::Value {
        match self {
            PlaybookStep::RestartService { service } | PlaybookStep::CheckHealth { service } => {
                json!({ "service": service })
            }
            PlaybookStep::KillTopProcess { host } | PlaybookStep::ClearTempLogs { host } => {
                json!({ "host": host })
            }
        }
    }

    async fn run(&self, remediator: &dyn Remediator) -> Result<bool> {
        match self {
            PlaybookStep::RestartService { service } => remediator.restart_service(service).await,
            PlaybookStep::KillTopProcess { host } => remediator.kill_top_process(host).await,
            PlaybookStep::ClearTempLogs { host } => remediator.clear_temp_logs(host).await,
            PlaybookStep::CheckHealth { service } => remediator.check_health(service).await,
        }
    }
}

/// Executor mapping incidents to a single playbook step per attempt.
pub struct PlaybookExecutor {
    remediator: Arc<dyn Remediator>,
}

impl PlaybookExecutor {
    pub fn new(remediator: Arc<dyn Remediator>) -> Self {
        Self { remediator }
    }
}

#[async_trait]
impl ActionExecutor for PlaybookExecutor {
    async fn execute(&self, incident: &IncidentSnapshot) -> ExecutionReport {
        let step = PlaybookStep::select(incident);
        debug!(incident_id = %incident.id, action = step.kind(), "executing playbook step");

        let outcome = match AssertUnwindSafe(step.run(self.remediator.as_ref()))
            .catch_unwind()
            .await
        {
            Ok(Ok(ok)) => ActionOutcome::new(step.kind(), ok, step.details()),
            Ok(Err(e)) => {
                warn!(incident_id = %incident.id, action = step.kind(), error = %e, "remediation action faulted");
                ActionOutcome::exception(format!("{e:#}"))
            }
            Err(panic) => {
                let msg = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "remediation panicked".to_string());
                warn!(incident_id = %incident.id, action = step.kind(), error = %msg, "remediation action panicked");
                ActionOutcome::exception(msg)
            }
        };

        ExecutionReport::from_actions(vec![outcome])
    }
}
