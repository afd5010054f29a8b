use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use super::Orchestrator;
use crate::analysis::rule_for;
use crate::audit::{AuditEntry, AuditStage};
use crate::incident::{action, ActionOutcome, Incident, IncidentError, IncidentSnapshot, IncidentStatus};
use crate::remediation::ExecutionReport;

impl Orchestrator {
    /// Run one incident from `open` to `resolved` or `failed`.
    pub(super) async fn drive(&self, incident: Incident) -> Result<Incident, IncidentError> {
        let id = incident.id;
        self.audit(AuditEntry::for_incident(AuditStage::IncidentOpened, &incident))
            .await;
        self.store.transition(id, IncidentStatus::Mitigating).await?;

        self.analyze(&incident).await?;

        let max_attempts = self.config.attempts_for(incident.event.event_type);
        for attempt in 1..=max_attempts {
            let snapshot = self
                .store
                .update(id, |inc| {
                    inc.begin_attempt(attempt);
                    inc.snapshot()
                })
                .await?;

            let report = self.execute(&snapshot, attempt).await;
            let current = self
                .store
                .update(id, |inc| {
                    inc.record_actions(report.actions.iter().cloned());
                    inc.clone()
                })
                .await?;
            self.audit(
                AuditEntry::for_incident(AuditStage::RemediationAttempt, &current)
                    .with_attempt(attempt)
                    .with_result(json!({ "actions": report.actions, "all_ok": report.all_ok })),
            )
            .await;

            if self.verify(&current, attempt).await {
                return self.resolve(current).await;
            }

            let note = if attempt < max_attempts {
                format!("Attempt {attempt} failed; retrying…")
            } else {
                format!("Attempt {attempt} failed.")
            };
            self.store.update(id, |inc| inc.note(note)).await?;
            info!(incident_id = %id, attempt, max_attempts, "remediation attempt failed");
        }

        self.escalate(id).await
    }

    /// Store a hypothesis, falling back to the deterministic rule when the
    /// analyzer errors or overruns its budget.
    async fn analyze(&self, incident: &Incident) -> Result<(), IncidentError> {
        let event = &incident.event;
        let budget = self.config.analyze_timeout();

        let (hypothesis, fallback) =
            match tokio::time::timeout(budget, self.collaborators.analyzer.analyze(event)).await {
                Ok(Ok(hypothesis)) => (hypothesis, None),
                Ok(Err(e)) => (rule_for(event), Some(format!("analyzer failed: {e:#}"))),
                Err(_) => (
                    rule_for(event),
                    Some(format!("analyzer timed out after {}ms", budget.as_millis())),
                ),
            };

        let current = self
            .store
            .update(incident.id, |inc| {
                inc.set_hypothesis(hypothesis.clone());
                if fallback.is_some() {
                    inc.note("Analyzer unavailable; using rule-based hypothesis.");
                }
                inc.clone()
            })
            .await?;

        if let Some(reason) = fallback {
            warn!(incident_id = %incident.id, %reason, "analysis fell back to rules");
            self.audit(AuditEntry::for_incident(AuditStage::AnalyzeFallback, &current).with_reason(reason))
                .await;
        }
        info!(incident_id = %incident.id, %hypothesis, "incident analyzed");
        self.audit(AuditEntry::for_incident(AuditStage::Analyzed, &current).with_hypothesis(hypothesis))
            .await;
        Ok(())
    }

    async fn execute(&self, snapshot: &IncidentSnapshot, attempt: u32) -> ExecutionReport {
        let budget = self.config.execute_timeout();
        match tokio::time::timeout(budget, self.collaborators.executor.execute(snapshot)).await {
            Ok(report) => report,
            Err(_) => {
                warn!(incident_id = %snapshot.id, attempt, "remediation attempt timed out");
                ExecutionReport::from_actions(vec![ActionOutcome::new(
                    action::TIMEOUT,
                    false,
                    json!({ "timeout_ms": budget.as_millis() as u64 }),
                )])
            }
        }
    }

    /// Verifier errors and timeouts count as unhealthy.
    async fn verify(&self, incident: &Incident, attempt: u32) -> bool {
        let budget = self.config.verify_timeout();
        let snapshot = incident.snapshot();
        let reason = match tokio::time::timeout(budget, self.collaborators.verifier.verify(&snapshot)).await {
            Ok(Ok(healthy)) => return healthy,
            Ok(Err(e)) => format!("verifier failed: {e:#}"),
            Err(_) => format!("verifier timed out after {}ms", budget.as_millis()),
        };

        warn!(incident_id = %incident.id, attempt, %reason, "verification error");
        self.audit(
            AuditEntry::for_incident(AuditStage::VerifyError, incident)
                .with_attempt(attempt)
                .with_reason(reason),
        )
        .await;
        false
    }

    async fn resolve(&self, incident: Incident) -> Result<Incident, IncidentError> {
        let resolved = self
            .store
            .update(incident.id, |inc| {
                inc.transition(IncidentStatus::Resolved)?;
                inc.note("Resolution verified.");
                Ok::<_, IncidentError>(inc.clone())
            })
            .await??;

        self.remember(&resolved).await;
        info!(
            incident_id = %resolved.id,
            attempts = resolved.remediation_attempts,
            "incident resolved"
        );
        self.audit(AuditEntry::for_incident(AuditStage::Resolved, &resolved).with_attempt(resolved.remediation_attempts))
            .await;
        self.settled.notify_waiters();
        Ok(resolved)
    }

    async fn escalate(&self, id: Uuid) -> Result<Incident, IncidentError> {
        let failed = self
            .store
            .update(id, |inc| {
                inc.transition(IncidentStatus::Failed)?;
                inc.note("Escalated to human on-call.");
                Ok::<_, IncidentError>(inc.clone())
            })
            .await??;

        warn!(
            incident_id = %id,
            event_type = %failed.event.event_type,
            attempts = failed.remediation_attempts,
            "incident escalated"
        );
        self.audit(AuditEntry::for_incident(AuditStage::Escalated, &failed).with_attempt(failed.remediation_attempts))
            .await;
        self.settled.notify_waiters();
        Ok(failed)
    }

    /// Record a resolved incident in memory. Failures only cost future
    /// similarity matches.
    async fn remember(&self, incident: &Incident) {
        let kinds: Vec<&str> = incident.actions.iter().map(|a| a.action.as_str()).collect();
        let summary = format!(
            "{} on {} resolved via {}",
            incident.event.event_type,
            incident.event.payload_text(),
            serde_json::to_string(&kinds).unwrap_or_default()
        );
        let metadata = json!({
            "hypothesis": incident.hypothesis,
            "actions": incident.actions,
            "ts": incident.closed_at,
        });
        match self.collaborators.memory.record(&summary, metadata.clone()).await {
            Ok(()) => {
                self.audit(
                    AuditEntry::for_incident(AuditStage::Recorded, incident)
                        .with_result(json!({ "summary": summary, "meta": metadata })),
                )
                .await;
            }
            Err(e) => {
                warn!(incident_id = %incident.id, error = %e, "failed to record incident in memory");
            }
        }
    }
}
