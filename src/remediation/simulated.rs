use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use super::Remediator;
use crate::config::ExecutorConfig;

/// Stand-in for real infrastructure calls: sleeps, logs, and reports success
/// for everything except killing the top process, which succeeds with
/// `kill_success_rate`.
pub struct SimulatedRemediator {
    action_latency: Duration,
    health_check_latency: Duration,
    kill_success_rate: f64,
    rng: Mutex<StdRng>,
}

impl SimulatedRemediator {
    pub fn new(config: &ExecutorConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            action_latency: Duration::from_millis(config.action_latency_ms),
            health_check_latency: Duration::from_millis(config.health_check_latency_ms),
            kill_success_rate: config.kill_success_rate.clamp(0.0, 1.0),
            rng: Mutex::new(rng),
        }
    }

    fn roll(&self, probability: f64) -> bool {
        match self.rng.lock() {
            Ok(mut rng) => rng.gen_bool(probability),
            Err(poisoned) => poisoned.into_inner().gen_bool(probability),
        }
    }
}

#[async_trait]
impl Remediator for SimulatedRemediator {
    async fn restart_service(&self, service: &str) -> Result<bool> {
        tokio::time::sleep(self.action_latency).await;
        info!(%service, "restarted service");
        Ok(true)
    }

    async fn kill_top_process(&self, host: &str) -> Result<bool> {
        tokio::time::sleep(self.action_latency).await;
        let ok = self.roll(self.kill_success_rate);
        info!(%host, ok, "killed top cpu process");
        Ok(ok)
    }

    async fn clear_temp_logs(&self, host: &str) -> Result<bool> {
        tokio::time::sleep(self.action_latency).await;
        info!(%host, "cleared temp logs");
        Ok(true)
    }

    async fn check_health(&self, service: &str) -> Result<bool> {
        tokio::time::sleep(self.health_check_latency).await;
        info!(%service, "health check passed");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast(kill_success_rate: f64) -> SimulatedRemediator {
        SimulatedRemediator::new(&ExecutorConfig {
            action_latency_ms: 0,
            health_check_latency_ms: 0,
            kill_success_rate,
            seed: Some(7),
        })
    }

    #[tokio::test]
    async fn test_deterministic_actions_succeed() {
        let r = fast(0.0);
        assert!(r.restart_service("payments-api").await.unwrap());
        assert!(r.clear_temp_logs("db-1").await.unwrap());
        assert!(r.check_health("app").await.unwrap());
    }

    #[tokio::test]
    async fn test_kill_follows_success_rate() {
        let always = fast(1.0);
        let never = fast(0.0);
        for _ in 0..10 {
            assert!(always.kill_top_process("app-1").await.unwrap());
            assert!(!never.kill_top_process("app-1").await.unwrap());
        }
    }
}
