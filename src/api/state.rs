use std::sync::Arc;

use crate::audit::AuditLog;
use crate::event::EventQueue;
use crate::incident::IncidentStore;
use crate::orchestrator::Orchestrator;

/// Shared handles passed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub queue: EventQueue,
    pub store: Arc<IncidentStore>,
    pub audit: Arc<AuditLog>,
    pub orchestrator: Orchestrator,
}
