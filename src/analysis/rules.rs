use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, warn};

use super::HypothesisGenerator;
use crate::event::{Event, EventType};
use crate::storage::{IncidentMemory, SimilarIncident};

/// CPU utilisation at or above which a runaway process is assumed.
const RUNAWAY_CPU_PERCENT: f64 = 95.0;

/// Deterministic per-type hypothesis, without memory enrichment.
pub fn rule_for(event: &Event) -> String {
    match event.event_type {
        EventType::MetricAnomaly if event.is_cpu_anomaly() => {
            let value = event.payload_f64("value").unwrap_or(0.0);
            let host = event.payload_str("host").unwrap_or("host");
            if value >= RUNAWAY_CPU_PERCENT {
                format!("CPU {value}% on {host}. Likely runaway process. Kill top CPU proc and restart service.")
            } else {
                format!("CPU spike on {host}. Consider throttling heavy jobs or scaling.")
            }
        }
        EventType::ServiceDown => {
            let svc = event.payload_str("service").unwrap_or("app");
            format!("{svc} is down, likely bad deploy. Attempt restart, check health, consider rollback.")
        }
        EventType::ApiLatencyHigh => {
            let svc = event.payload_str("service").unwrap_or("api");
            format!("{svc} latency high, possible DB lock or upstream slowdown. Inspect slow queries and dependencies.")
        }
        EventType::DiskFull => {
            let host = event.payload_str("host").unwrap_or("host");
            format!("Disk nearly full on {host}. Rotate logs, clear temp, or expand volume.")
        }
        _ => "No clear hypothesis; request human triage.".to_string(),
    }
}

/// Query used to look up similar past incidents for `event`.
pub fn similarity_query(event: &Event) -> String {
    format!("{} {}", event.event_type, event.payload_text())
}

/// Per-type rules enriched with the closest past incident.
pub struct RuleBasedAnalyzer {
    memory: Arc<dyn IncidentMemory>,
    similar_k: usize,
}

impl RuleBasedAnalyzer {
    pub fn new(memory: Arc<dyn IncidentMemory>, similar_k: usize) -> Self {
        Self { memory, similar_k }
    }
}

/// Look up similar incidents; a failing memory degrades to no matches.
pub(crate) async fn similar_incidents(
    memory: &dyn IncidentMemory,
    event: &Event,
    k: usize,
) -> Vec<SimilarIncident> {
    if k == 0 {
        return Vec::new();
    }
    match memory.search(&similarity_query(event), k).await {
        Ok(hits) => hits,
        Err(e) => {
            warn!(event_id = %event.id, error = %e, "incident memory search failed");
            Vec::new()
        }
    }
}

#[async_trait]
impl HypothesisGenerator for RuleBasedAnalyzer {
    async fn analyze(&self, event: &Event) -> Result<String> {
        let rule = rule_for(event);
        let similar = similar_incidents(self.memory.as_ref(), event, self.similar_k).await;
        debug!(event_id = %event.id, matches = similar.len(), "rule-based analysis");

        Ok(match similar.first() {
            Some(top) => format!("{rule} Similar past: {}", top.text),
            None => rule,
        })
    }
}
