//! Post-attempt verification.
//!
//! Deterministic incident types are judged from the attempt's own actions;
//! CPU and latency incidents ask a [`HealthProbe`]. Anything without a rule
//! is never healthy, so it escalates once its attempts run out.

pub mod probe;

use std::sync::Arc;

use anyhow::Result;
use tracing::debug;

use crate::event::EventType;
use crate::incident::{action, IncidentSnapshot};

pub use self::probe::{HealthProbe, SimulatedHealthProbe};

pub struct Verifier {
    probe: Arc<dyn HealthProbe>,
}

impl Verifier {
    pub fn new(probe: Arc<dyn HealthProbe>) -> Self {
        Self { probe }
    }

    /// Whether the system looks healthy after the incident's latest attempt.
    ///
    /// Probe errors are returned to the caller.
    pub async fn verify(&self, incident: &IncidentSnapshot) -> Result<bool> {
        let event = &incident.event;
        let healthy = match event.event_type {
            EventType::ServiceDown => incident.has_successful(action::RESTART_SERVICE),
            EventType::DiskFull => incident.has_successful(action::CLEAR_TEMP_LOGS),
            EventType::MetricAnomaly if event.is_cpu_anomaly() => {
                let host = event.payload_str("host").unwrap_or("app-1");
                self.probe.cpu_recovered(host).await?
            }
            EventType::ApiLatencyHigh => {
                let service = event.payload_str("service").unwrap_or("api");
                self.probe.latency_recovered(service).await?
            }
            _ => false,
        };
        debug!(incident_id = %incident.id, event_type = %event.event_type, healthy, "verified");
        Ok(healthy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use crate::incident::{ActionOutcome, Incident};
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct FixedProbe(bool);

    #[async_trait]
    impl HealthProbe for FixedProbe {
        async fn cpu_recovered(&self, _host: &str) -> Result<bool> {
            Ok(self.0)
        }
        async fn latency_recovered(&self, _service: &str) -> Result<bool> {
            Ok(self.0)
        }
    }

    struct FailingProbe;

    #[async_trait]
    impl HealthProbe for FailingProbe {
        async fn cpu_recovered(&self, _host: &str) -> Result<bool> {
            anyhow::bail!("metrics backend unreachable")
        }
        async fn latency_recovered(&self, _service: &str) -> Result<bool> {
            anyhow::bail!("metrics backend unreachable")
        }
    }

    fn snapshot(t: EventType, payload: Value, actions: Vec<ActionOutcome>) -> IncidentSnapshot {
        let mut inc = Incident::open(Event::with_json(t, "test", payload), 1);
        inc.record_actions(actions);
        inc.snapshot()
    }

    #[tokio::test]
    async fn test_action_based_rules() {
        let v = Verifier::new(Arc::new(FixedProbe(true)));

        let restarted = snapshot(
            EventType::ServiceDown,
            json!({}),
            vec![ActionOutcome::new(action::RESTART_SERVICE, true, json!({}))],
        );
        assert!(v.verify(&restarted).await.unwrap());

        let restart_failed = snapshot(
            EventType::ServiceDown,
            json!({}),
            vec![ActionOutcome::new(action::RESTART_SERVICE, false, json!({}))],
        );
        assert!(!v.verify(&restart_failed).await.unwrap());

        let wrong_action = snapshot(
            EventType::DiskFull,
            json!({}),
            vec![ActionOutcome::new(action::CHECK_HEALTH, true, json!({}))],
        );
        assert!(!v.verify(&wrong_action).await.unwrap());

        let cleared = snapshot(
            EventType::DiskFull,
            json!({}),
            vec![ActionOutcome::new(action::CLEAR_TEMP_LOGS, true, json!({}))],
        );
        assert!(v.verify(&cleared).await.unwrap());
    }

    #[tokio::test]
    async fn test_probe_rules() {
        let up = Verifier::new(Arc::new(FixedProbe(true)));
        let down = Verifier::new(Arc::new(FixedProbe(false)));
        let cpu = snapshot(EventType::MetricAnomaly, json!({"metric": "cpu"}), vec![]);
        let latency = snapshot(EventType::ApiLatencyHigh, json!({}), vec![]);

        assert!(up.verify(&cpu).await.unwrap());
        assert!(up.verify(&latency).await.unwrap());
        assert!(!down.verify(&cpu).await.unwrap());
        assert!(!down.verify(&latency).await.unwrap());
    }

    #[tokio::test]
    async fn test_unruled_types_never_healthy() {
        let v = Verifier::new(Arc::new(FixedProbe(true)));
        let ok = vec![ActionOutcome::new(action::CHECK_HEALTH, true, json!({}))];
        let custom = snapshot(EventType::CustomAlert, json!({}), ok.clone());
        let mem = snapshot(EventType::MetricAnomaly, json!({"metric": "mem"}), ok);
        assert!(!v.verify(&custom).await.unwrap());
        assert!(!v.verify(&mem).await.unwrap());
    }

    #[tokio::test]
    async fn test_probe_error_propagates() {
        let v = Verifier::new(Arc::new(FailingProbe));
        let cpu = snapshot(EventType::MetricAnomaly, json!({"metric": "cpu"}), vec![]);
        assert!(v.verify(&cpu).await.is_err());

        // Deterministic types never touch the probe.
        let disk = snapshot(EventType::DiskFull, json!({}), vec![]);
        assert!(!v.verify(&disk).await.unwrap());
    }
}
