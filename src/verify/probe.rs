use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::config::VerifierConfig;

/// Post-remediation health checks that cannot be decided from the actions alone.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Whether CPU on `host` is back under control.
    async fn cpu_recovered(&self, host: &str) -> Result<bool>;

    /// Whether request latency of `service` is back within bounds.
    async fn latency_recovered(&self, service: &str) -> Result<bool>;
}

/// Probe that recovers with a configured probability after a short delay.
pub struct SimulatedHealthProbe {
    cpu_recovery_rate: f64,
    latency_recovery_rate: f64,
    latency: Duration,
    rng: Mutex<StdRng>,
}

impl SimulatedHealthProbe {
    pub fn new(config: &VerifierConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            cpu_recovery_rate: config.cpu_recovery_rate.clamp(0.0, 1.0),
            latency_recovery_rate: config.latency_recovery_rate.clamp(0.0, 1.0),
            latency: Duration::from_millis(config.latency_ms),
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
impl HealthProbe for SimulatedHealthProbe {
    async fn cpu_recovered(&self, host: &str) -> Result<bool> {
        tokio::time::sleep(self.latency).await;
        let ok = self.roll(self.cpu_recovery_rate);
        debug!(%host, ok, "cpu probe");
        Ok(ok)
    }

    async fn latency_recovered(&self, service: &str) -> Result<bool> {
        tokio::time::sleep(self.latency).await;
        let ok = self.roll(self.latency_recovery_rate);
        debug!(%service, ok, "latency probe");
        Ok(ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe(cpu: f64, latency: f64, seed: u64) -> SimulatedHealthProbe {
        SimulatedHealthProbe::new(&VerifierConfig {
            cpu_recovery_rate: cpu,
            latency_recovery_rate: latency,
            latency_ms: 0,
            seed: Some(seed),
        })
    }

    #[tokio::test]
    async fn test_rates_at_bounds() {
        let p = probe(1.0, 0.0, 1);
        for _ in 0..10 {
            assert!(p.cpu_recovered("app-1").await.unwrap());
            assert!(!p.latency_recovered("orders-api").await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_seed_is_reproducible() {
        let a = probe(0.5, 0.5, 42);
        let b = probe(0.5, 0.5, 42);
        for _ in 0..20 {
            assert_eq!(
                a.cpu_recovered("h").await.unwrap(),
                b.cpu_recovered("h").await.unwrap()
            );
        }
    }
}
