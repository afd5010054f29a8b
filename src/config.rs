//! TOML configuration for healops.
//!
//! Layered model: an explicit path (CLI flag) wins, then the `HEALOPS_CONFIG`
//! environment variable, then `/etc/healops/healops.toml`, then compiled-in
//! defaults. Every section and field is optional in the file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::event::EventType;

const ENV_CONFIG_PATH: &str = "HEALOPS_CONFIG";
const SYSTEM_CONFIG_PATH: &str = "/etc/healops/healops.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealopsConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub verifier: VerifierConfig,
    #[serde(default)]
    pub analyzer: AnalyzerConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl HealopsConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config = Self::from_toml(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded healops configuration");
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve the configuration. An explicit path must load; the fallbacks
    /// only warn.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        Ok(Self::load_or_default())
    }

    /// Try, in order: `HEALOPS_CONFIG`, the system path, compiled defaults.
    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var(ENV_CONFIG_PATH) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "HEALOPS_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new(SYSTEM_CONFIG_PATH);
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.orchestrator.max_attempts >= 1,
            "orchestrator.max_attempts must be at least 1"
        );
        for (kind, attempts) in &self.orchestrator.attempts_by_type {
            kind.parse::<EventType>()
                .with_context(|| format!("orchestrator.attempts_by_type has unknown key '{kind}'"))?;
            anyhow::ensure!(
                *attempts >= 1,
                "orchestrator.attempts_by_type.{kind} must be at least 1"
            );
        }
        for (name, p) in [
            ("monitor.fire_probability", self.monitor.fire_probability),
            ("executor.kill_success_rate", self.executor.kill_success_rate),
            ("verifier.cpu_recovery_rate", self.verifier.cpu_recovery_rate),
            ("verifier.latency_recovery_rate", self.verifier.latency_recovery_rate),
        ] {
            anyhow::ensure!((0.0..=1.0).contains(&p), "{name} must be within 0.0..=1.0, got {p}");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// API
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Address the HTTP API binds to.
    pub bind: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Retry policy and collaborator time budgets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Remediation attempts before an incident escalates.
    pub max_attempts: u32,
    pub analyze_timeout_ms: u64,
    pub execute_timeout_ms: u64,
    pub verify_timeout_ms: u64,
    /// How long shutdown waits for in-flight incidents.
    pub shutdown_grace_ms: u64,
    /// Per event type override of `max_attempts`, keyed by wire name
    /// (e.g. `"disk.full" = 3`).
    pub attempts_by_type: HashMap<String, u32>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            analyze_timeout_ms: 30_000,
            execute_timeout_ms: 60_000,
            verify_timeout_ms: 30_000,
            shutdown_grace_ms: 10_000,
            attempts_by_type: HashMap::new(),
        }
    }
}

impl OrchestratorConfig {
    pub fn attempts_for(&self, event_type: EventType) -> u32 {
        self.attempts_by_type
            .get(event_type.as_str())
            .copied()
            .unwrap_or(self.max_attempts)
            .max(1)
    }

    pub fn analyze_timeout(&self) -> Duration {
        Duration::from_millis(self.analyze_timeout_ms)
    }

    pub fn execute_timeout(&self) -> Duration {
        Duration::from_millis(self.execute_timeout_ms)
    }

    pub fn verify_timeout(&self) -> Duration {
        Duration::from_millis(self.verify_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

// ---------------------------------------------------------------------------
// Monitor
// ---------------------------------------------------------------------------

/// Synthetic CPU anomaly producer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub enabled: bool,
    pub interval_ms: u64,
    /// Chance that a tick publishes an event.
    pub fire_probability: f64,
    pub host: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 4_000,
            fire_probability: 0.35,
            host: "app-1".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// Simulated remediation side effects.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub action_latency_ms: u64,
    pub health_check_latency_ms: u64,
    pub kill_success_rate: f64,
    /// Fixed RNG seed for reproducible runs; random when absent.
    pub seed: Option<u64>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            action_latency_ms: 400,
            health_check_latency_ms: 200,
            kill_success_rate: 0.8,
            seed: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Verifier
// ---------------------------------------------------------------------------

/// Simulated health probes backing the non-deterministic checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifierConfig {
    pub cpu_recovery_rate: f64,
    pub latency_recovery_rate: f64,
    /// Simulated probe round-trip.
    pub latency_ms: u64,
    /// Fixed RNG seed for reproducible runs; random when absent.
    pub seed: Option<u64>,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            cpu_recovery_rate: 0.7,
            latency_recovery_rate: 0.6,
            latency_ms: 400,
            seed: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Analyzer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyzerKind {
    Rules,
    Llm,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub kind: AnalyzerKind,
    pub model: String,
    /// Base URL of an OpenAI-compatible API.
    pub api_base: String,
    /// Falls back to `OPENAI_API_KEY` when unset.
    pub api_key: Option<String>,
    pub temperature: f32,
    /// Similar past incidents fed into each hypothesis.
    pub similar_k: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            kind: AnalyzerKind::Rules,
            model: "gpt-4o-mini".to_string(),
            api_base: "https://api.openai.com/v1".to_string(),
            api_key: None,
            temperature: 0.2,
            similar_k: 3,
        }
    }
}

// ---------------------------------------------------------------------------
// Memory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// SQLite file holding resolved incident summaries.
    pub db_path: PathBuf,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/healops.db"),
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default tracing filter when `RUST_LOG` is unset.
    pub level: String,
    /// Emit diagnostics as JSON instead of human-readable text.
    pub json: bool,
    /// Append-only JSON-lines audit trail of incident lifecycles.
    pub audit_log_path: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            audit_log_path: PathBuf::from("data/incident_logs.jsonl"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
