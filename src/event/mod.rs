//! Typed infrastructure events and the queue that carries them.

pub mod queue;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

pub use self::queue::{EventQueue, QueueError, Subscription};

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown event type '{0}'")]
pub struct UnknownEventType(pub String);

/// Closed set of event kinds the orchestrator understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "metric.anomaly")]
    MetricAnomaly,
    #[serde(rename = "service.down")]
    ServiceDown,
    #[serde(rename = "api.latency.high")]
    ApiLatencyHigh,
    #[serde(rename = "disk.full")]
    DiskFull,
    #[serde(rename = "custom.alert")]
    CustomAlert,
}

impl EventType {
    pub const ALL: [EventType; 5] = [
        EventType::MetricAnomaly,
        EventType::ServiceDown,
        EventType::ApiLatencyHigh,
        EventType::DiskFull,
        EventType::CustomAlert,
    ];

    /// Dotted wire name, e.g. `service.down`.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::MetricAnomaly => "metric.anomaly",
            EventType::ServiceDown => "service.down",
            EventType::ApiLatencyHigh => "api.latency.high",
            EventType::DiskFull => "disk.full",
            EventType::CustomAlert => "custom.alert",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = UnknownEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownEventType(s.to_string()))
    }
}

/// An immutable observation about the world.
///
/// Events are created once by a producer and then only ever read. Every
/// component downstream of the queue receives either a clone or a shared
/// reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub source: String,
    #[serde(default)]
    pub payload: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(event_type: EventType, source: impl Into<String>, payload: Map<String, Value>) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type,
            source: source.into(),
            payload,
            timestamp: Utc::now(),
        }
    }

    /// Build an event from a `serde_json::json!({...})` literal. Non-object
    /// values produce an empty payload.
    pub fn with_json(event_type: EventType, source: impl Into<String>, payload: Value) -> Self {
        let payload = match payload {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self::new(event_type, source, payload)
    }

    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    pub fn payload_f64(&self, key: &str) -> Option<f64> {
        self.payload.get(key).and_then(Value::as_f64)
    }

    /// True for CPU metric anomalies, the only metric with a remediation path.
    pub fn is_cpu_anomaly(&self) -> bool {
        self.event_type == EventType::MetricAnomaly && self.payload_str("metric") == Some("cpu")
    }

    /// Compact `{"k":v}` rendering of the payload used in summaries and
    /// similarity queries.
    pub fn payload_text(&self) -> String {
        Value::Object(self.payload.clone()).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_type_wire_names() {
        for t in EventType::ALL {
            let encoded = serde_json::to_string(&t).unwrap();
            assert_eq!(encoded, format!("\"{}\"", t.as_str()));
            assert_eq!(t.as_str().parse::<EventType>().unwrap(), t);
        }
    }

    #[test]
    fn test_unknown_event_type_rejected() {
        let err = "printer.on.fire".parse::<EventType>().unwrap_err();
        assert_eq!(err, UnknownEventType("printer.on.fire".to_string()));
        assert!(serde_json::from_str::<EventType>("\"printer.on.fire\"").is_err());
    }

    #[test]
    fn test_event_serializes_type_field() {
        let evt = Event::with_json(EventType::DiskFull, "simulate", json!({"host": "db-1"}));
        let value = serde_json::to_value(&evt).unwrap();
        assert_eq!(value["type"], "disk.full");
        assert_eq!(value["payload"]["host"], "db-1");
        assert_eq!(value["source"], "simulate");
    }

    #[test]
    fn test_cpu_anomaly_detection() {
        let cpu = Event::with_json(EventType::MetricAnomaly, "m", json!({"metric": "cpu", "value": 97}));
        let mem = Event::with_json(EventType::MetricAnomaly, "m", json!({"metric": "mem"}));
        assert!(cpu.is_cpu_anomaly());
        assert!(!mem.is_cpu_anomaly());
        assert_eq!(cpu.payload_f64("value"), Some(97.0));
    }

    #[test]
    fn test_ids_are_unique() {
        let a = Event::with_json(EventType::CustomAlert, "x", json!({}));
        let b = Event::with_json(EventType::CustomAlert, "x", json!({}));
        assert_ne!(a.id, b.id);
    }
}
