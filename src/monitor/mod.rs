//! Synthetic CPU monitor.
//!
//! Stands in for a metrics pipeline: on every tick it may publish a CPU
//! anomaly for the configured host.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::MonitorConfig;
use crate::event::{Event, EventQueue, EventType};

pub const MONITOR_SOURCE: &str = "monitor.cpu";

pub struct Monitor {
    config: MonitorConfig,
    queue: EventQueue,
    rng: StdRng,
}

impl Monitor {
    pub fn new(config: MonitorConfig, queue: EventQueue) -> Self {
        Self {
            config,
            queue,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// One tick: maybe build an anomaly event.
    fn sample(&mut self) -> Option<Event> {
        let p = self.config.fire_probability.clamp(0.0, 1.0);
        if !self.rng.gen_bool(p) {
            return None;
        }
        let value: u32 = self.rng.gen_range(90..=100);
        Some(Event::with_json(
            EventType::MetricAnomaly,
            MONITOR_SOURCE,
            json!({ "host": self.config.host, "metric": "cpu", "value": value }),
        ))
    }

    /// Tick until `cancel` fires or the queue stops accepting events.
    pub async fn run(mut self, cancel: CancellationToken) {
        if !self.config.enabled {
            info!("monitor disabled");
            return;
        }

        let period = Duration::from_millis(self.config.interval_ms.max(1));
        info!(interval_ms = period.as_millis() as u64, host = %self.config.host, "monitor started");
        let mut interval = tokio::time::interval(period);
        // The first tick of a tokio interval completes immediately.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            let Some(event) = self.sample() else {
                continue;
            };
            debug!(event_id = %event.id, "monitor firing cpu anomaly");
            if let Err(e) = self.queue.publish(event) {
                warn!(error = %e, "monitor stopping");
                break;
            }
        }
        info!("monitor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(fire_probability: f64) -> MonitorConfig {
        MonitorConfig {
            enabled: true,
            interval_ms: 10,
            fire_probability,
            host: "app-1".to_string(),
        }
    }

    #[test]
    fn test_sample_payload() {
        let mut monitor = Monitor::new(config(1.0), EventQueue::new()).with_seed(3);
        for _ in 0..20 {
            let event = monitor.sample().unwrap();
            assert_eq!(event.event_type, EventType::MetricAnomaly);
            assert_eq!(event.source, MONITOR_SOURCE);
            assert!(event.is_cpu_anomaly());
            assert_eq!(event.payload_str("host"), Some("app-1"));
            let value = event.payload_f64("value").unwrap();
            assert!((90.0..=100.0).contains(&value));
        }
    }

    #[test]
    fn test_never_fires_at_zero_probability() {
        let mut monitor = Monitor::new(config(0.0), EventQueue::new());
        assert!((0..50).all(|_| monitor.sample().is_none()));
    }

    #[tokio::test]
    async fn test_publishes_until_cancelled() {
        let queue = EventQueue::new();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Monitor::new(config(1.0), queue.clone()).run(cancel.clone()));

        let mut sub = queue.subscribe();
        let event = tokio::time::timeout(Duration::from_secs(2), sub.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.source, MONITOR_SOURCE);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_disabled_returns_immediately() {
        let mut cfg = config(1.0);
        cfg.enabled = false;
        let queue = EventQueue::new();
        Monitor::new(cfg, queue.clone()).run(CancellationToken::new()).await;
        let mut sub = queue.subscribe();
        assert!(tokio::time::timeout(Duration::from_millis(30), sub.next()).await.is_err());
    }
}
