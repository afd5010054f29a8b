//! Incident orchestration.
//!
//! A single dequeue loop takes events off the [`EventQueue`], opens one
//! incident per event and hands it to its own lifecycle task. Lifecycle tasks
//! are tracked so shutdown can wait for in-flight incidents; a panic in one
//! task is contained to that incident.

mod lifecycle;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::analysis::HypothesisGenerator;
use crate::audit::{AuditEntry, AuditLog};
use crate::config::OrchestratorConfig;
use crate::event::{Event, EventQueue};
use crate::incident::{Incident, IncidentError, IncidentStore};
use crate::remediation::ActionExecutor;
use crate::storage::IncidentMemory;
use crate::verify::Verifier;

/// The pluggable parts of the pipeline.
#[derive(Clone)]
pub struct Collaborators {
    pub analyzer: Arc<dyn HypothesisGenerator>,
    pub executor: Arc<dyn ActionExecutor>,
    pub verifier: Arc<Verifier>,
    pub memory: Arc<dyn IncidentMemory>,
}

#[derive(Clone)]
pub struct Orchestrator {
    config: OrchestratorConfig,
    queue: EventQueue,
    store: Arc<IncidentStore>,
    audit: Arc<AuditLog>,
    collaborators: Collaborators,
    tracker: TaskTracker,
    settled: Arc<Notify>,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        queue: EventQueue,
        store: Arc<IncidentStore>,
        audit: Arc<AuditLog>,
        collaborators: Collaborators,
    ) -> Self {
        Self {
            config,
            queue,
            store,
            audit,
            collaborators,
            tracker: TaskTracker::new(),
            settled: Arc::new(Notify::new()),
        }
    }

    pub fn store(&self) -> &Arc<IncidentStore> {
        &self.store
    }

    /// Lifecycle tasks still running.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Dequeue events until `cancel` fires or the queue is closed and drained.
    ///
    /// Closes the queue on exit so late publishers get an error instead of
    /// queueing events nobody will read.
    pub async fn run(&self, cancel: CancellationToken) {
        info!("orchestrator started");
        let mut subscription = self.queue.subscribe();

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                next = subscription.next() => match next {
                    Some(event) => event,
                    None => break,
                },
            };
            self.dispatch(event).await;
        }

        drop(subscription);
        self.queue.close().await;
        info!("orchestrator stopped accepting events");
    }

    /// Open an incident for `event` and start its lifecycle in the background.
    pub async fn dispatch(&self, event: Event) -> Incident {
        let incident = self.store.open(event).await;
        info!(
            incident_id = %incident.id,
            event_id = %incident.event.id,
            event_type = %incident.event.event_type,
            "incident opened"
        );

        let this = self.clone();
        let opened = incident.clone();
        self.tracker.spawn(async move {
            let id = opened.id;
            match AssertUnwindSafe(this.drive(opened)).catch_unwind().await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => error!(incident_id = %id, error = %e, "incident lifecycle aborted"),
                Err(_) => error!(incident_id = %id, "incident lifecycle panicked"),
            }
        });

        incident
    }

    /// Open an incident for `event` and drive it to a terminal state inline.
    pub async fn handle(&self, event: Event) -> Result<Incident, IncidentError> {
        let incident = self.store.open(event).await;
        self.drive(incident).await
    }

    /// Wait until the incident opened for `event_id` reaches a terminal state.
    ///
    /// Never returns if no such incident settles; callers bound it with a
    /// timeout.
    pub async fn wait_settled(&self, event_id: Uuid) -> Incident {
        loop {
            let notified = self.settled.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(incident) = self.store.find_by_event(event_id).await {
                if incident.status.is_terminal() {
                    return incident;
                }
            }
            notified.await;
        }
    }

    /// Stop tracking new work and wait for in-flight incidents, bounded by the
    /// configured grace period. Returns `false` if the grace period ran out.
    pub async fn shutdown(&self) -> bool {
        self.tracker.close();
        let grace = self.config.shutdown_grace();
        match tokio::time::timeout(grace, self.tracker.wait()).await {
            Ok(()) => {
                info!("all incidents settled");
                true
            }
            Err(_) => {
                warn!(
                    in_flight = self.tracker.len(),
                    grace_ms = grace.as_millis() as u64,
                    "shutdown grace period elapsed with incidents in flight"
                );
                false
            }
        }
    }

    async fn audit(&self, entry: AuditEntry) {
        let stage = entry.stage;
        let incident_id = entry.incident_id;
        if let Err(e) = self.audit.log(entry).await {
            warn!(%incident_id, ?stage, error = %e, "failed to write audit entry");
        }
    }
}
