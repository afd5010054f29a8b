//! Healops -- self-healing incident orchestration.
//!
//! Events land on a queue, each one opens an incident, and the orchestrator
//! drives that incident through analysis, bounded remediation attempts and
//! verification until it is resolved or escalated to a human.

pub mod analysis;
pub mod api;
pub mod audit;
pub mod config;
pub mod event;
pub mod incident;
pub mod monitor;
pub mod orchestrator;
pub mod remediation;
pub mod storage;
pub mod verify;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::api::state::AppState;
use crate::audit::AuditLog;
use crate::config::{HealopsConfig, LoggingConfig};
use crate::event::{Event, EventQueue};
use crate::incident::{Incident, IncidentStore};
use crate::monitor::Monitor;
use crate::orchestrator::{Collaborators, Orchestrator};
use crate::remediation::{PlaybookExecutor, SimulatedRemediator};
use crate::storage::{IncidentMemory, SqliteMemory};
use crate::verify::{SimulatedHealthProbe, Verifier};

/// Install the global tracing subscriber. `RUST_LOG` overrides the configured
/// level. Diagnostics go to stderr so command output on stdout stays parseable.
pub fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    // A subscriber may already be installed (tests, embedding).
    let _ = if logging.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

/// Every long-lived component, wired together.
pub struct Pipeline {
    pub queue: EventQueue,
    pub store: Arc<IncidentStore>,
    pub audit: Arc<AuditLog>,
    pub orchestrator: Orchestrator,
}

impl Pipeline {
    /// Wire the default collaborators selected by `config`.
    pub async fn build(config: &HealopsConfig) -> Result<Self> {
        tracing::info!(db_path = %config.memory.db_path.display(), "opening incident memory");
        let memory: Arc<dyn IncidentMemory> = Arc::new(
            SqliteMemory::open(&config.memory.db_path).context("failed to open incident memory")?,
        );
        let analyzer = analysis::build_analyzer(&config.analyzer, Arc::clone(&memory))?;
        let executor = Arc::new(PlaybookExecutor::new(Arc::new(SimulatedRemediator::new(
            &config.executor,
        ))));
        let verifier = Arc::new(Verifier::new(Arc::new(SimulatedHealthProbe::new(&config.verifier))));

        Self::with_collaborators(
            config,
            Collaborators {
                analyzer,
                executor,
                verifier,
                memory,
            },
        )
        .await
    }

    /// Wire the pipeline around caller-supplied collaborators.
    pub async fn with_collaborators(config: &HealopsConfig, collaborators: Collaborators) -> Result<Self> {
        let audit = Arc::new(AuditLog::new(config.logging.audit_log_path.clone()).await?);
        let queue = EventQueue::new();
        let store = Arc::new(IncidentStore::new());
        let orchestrator = Orchestrator::new(
            config.orchestrator.clone(),
            queue.clone(),
            Arc::clone(&store),
            Arc::clone(&audit),
            collaborators,
        );
        Ok(Self {
            queue,
            store,
            audit,
            orchestrator,
        })
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            queue: self.queue.clone(),
            store: Arc::clone(&self.store),
            audit: Arc::clone(&self.audit),
            orchestrator: self.orchestrator.clone(),
        }
    }
}

/// Start the daemon: orchestrator, synthetic monitor and HTTP API.
pub async fn serve(config: HealopsConfig) -> Result<()> {
    let addr: SocketAddr = config
        .api
        .bind
        .parse()
        .with_context(|| format!("invalid bind address: {}", config.api.bind))?;
    let pipeline = Pipeline::build(&config).await?;
    let cancel = CancellationToken::new();

    let orchestrator = pipeline.orchestrator.clone();
    let dequeue = tokio::spawn({
        let cancel = cancel.clone();
        async move { orchestrator.run(cancel).await }
    });
    let monitor = tokio::spawn(Monitor::new(config.monitor.clone(), pipeline.queue.clone()).run(cancel.clone()));

    let app = api::router(pipeline.app_state());
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "healops listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await
        .context("HTTP server failed")?;

    cancel.cancel();
    for (name, task) in [("orchestrator", dequeue), ("monitor", monitor)] {
        if let Err(e) = task.await {
            tracing::error!(task = name, error = %e, "background task failed");
        }
    }
    pipeline.orchestrator.shutdown().await;
    tracing::info!("healops stopped");
    Ok(())
}

/// Process a single event end to end, without the API or monitor, and
/// return the settled incident.
pub async fn run_once(config: &HealopsConfig, event: Event) -> Result<Incident> {
    let pipeline = Pipeline::build(config).await?;
    let cancel = CancellationToken::new();
    let orchestrator = pipeline.orchestrator.clone();
    let dequeue = tokio::spawn({
        let cancel = cancel.clone();
        async move { orchestrator.run(cancel).await }
    });

    let accepted = pipeline.queue.publish(event)?;
    let budget = lifecycle_budget(config, &accepted);
    let settled = tokio::time::timeout(budget, pipeline.orchestrator.wait_settled(accepted.id)).await;

    cancel.cancel();
    if let Err(e) = dequeue.await {
        tracing::error!(error = %e, "orchestrator task failed");
    }
    pipeline.orchestrator.shutdown().await;

    settled.with_context(|| format!("incident for event {} did not settle within {budget:?}", accepted.id))
}

/// Upper bound on how long one incident can take with the configured timeouts.
fn lifecycle_budget(config: &HealopsConfig, event: &Event) -> Duration {
    let orch = &config.orchestrator;
    let attempts = orch.attempts_for(event.event_type);
    orch.execute_timeout()
        .checked_add(orch.verify_timeout())
        .and_then(|per_attempt| per_attempt.checked_mul(attempts))
        .and_then(|remediation| remediation.checked_add(orch.analyze_timeout()))
        .and_then(|total| total.checked_add(Duration::from_secs(5)))
        .unwrap_or(Duration::MAX)
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
        _ = cancel.cancelled() => {}
    }
    tracing::info!("shutdown requested");
    cancel.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventType;
    use serde_json::json;

    #[test]
    fn test_lifecycle_budget_covers_every_attempt() {
        let mut config = HealopsConfig::default();
        config.orchestrator.analyze_timeout_ms = 1_000;
        config.orchestrator.execute_timeout_ms = 2_000;
        config.orchestrator.verify_timeout_ms = 3_000;
        config.orchestrator.max_attempts = 3;
        let event = Event::with_json(EventType::DiskFull, "test", json!({}));

        assert_eq!(lifecycle_budget(&config, &event), Duration::from_secs(1 + 5 * 3 + 5));
    }

    #[test]
    fn test_lifecycle_budget_saturates() {
        let mut config = HealopsConfig::default();
        config.orchestrator.execute_timeout_ms = u64::MAX;
        config.orchestrator.verify_timeout_ms = u64::MAX;
        config.orchestrator.max_attempts = u32::MAX;
        let event = Event::with_json(EventType::ServiceDown, "test", json!({}));

        assert_eq!(lifecycle_budget(&config, &event), Duration::MAX);
    }
}
