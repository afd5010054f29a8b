//! API route definitions.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use super::error::ApiError;
use super::state::AppState;
use crate::event::{Event, EventType};

const DEFAULT_TAIL: usize = 50;
const DEFAULT_STALE_AGE_SECS: u64 = 300;
/// Source tag for events published over HTTP without one.
const DEFAULT_SOURCE: &str = "external";
const SIMULATION_SOURCE: &str = "simulate";

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/events", post(publish_event))
        .route("/incidents", get(list_incidents))
        .route("/incidents/stale", get(stale_incidents))
        .route("/incidents/{id}", get(get_incident))
        .route("/logs/tail", get(tail_log))
        .route("/simulate/high-cpu", post(simulate_high_cpu))
        .route("/simulate/service-down", post(simulate_service_down))
        .route("/simulate/api-latency", post(simulate_api_latency))
        .route("/simulate/disk-full", post(simulate_disk_full))
}

fn envelope(data: Value, meta: Value) -> Json<Value> {
    Json(json!({ "data": data, "meta": meta }))
}

fn to_data<T: serde::Serialize>(value: &T) -> Result<Value, ApiError> {
    serde_json::to_value(value).map_err(|e| ApiError::Internal(e.into()))
}

/// Parse an optional JSON body; an empty body yields `T::default()`.
fn optional_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("invalid JSON body: {e}")))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    envelope(
        json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "incidents": state.store.len().await,
            "in_flight": state.orchestrator.in_flight(),
            "accepting_events": !state.queue.is_closed(),
        }),
        json!({
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "version": env!("CARGO_PKG_VERSION"),
        }),
    )
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct PublishRequest {
    #[serde(rename = "type")]
    event_type: String,
    source: Option<String>,
    #[serde(default)]
    payload: Map<String, Value>,
}

async fn publish_event(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let request: PublishRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid event: {e}")))?;
    let event_type: EventType = request.event_type.parse()?;
    let source = request.source.unwrap_or_else(|| DEFAULT_SOURCE.to_string());
    publish(&state, Event::new(event_type, source, request.payload))
}

fn publish(state: &AppState, event: Event) -> Result<(StatusCode, Json<Value>), ApiError> {
    let accepted = state.queue.publish(event)?;
    Ok((
        StatusCode::ACCEPTED,
        envelope(to_data(&accepted)?, json!({ "queued": true })),
    ))
}

// ---------------------------------------------------------------------------
// Incidents
// ---------------------------------------------------------------------------

async fn list_incidents(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let incidents = state.store.list().await;
    let total = incidents.len();
    Ok(envelope(to_data(&incidents)?, json!({ "total": total })))
}

async fn get_incident(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let incident = state
        .store
        .get(id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("incident {id} not found")))?;
    Ok(envelope(to_data(&incident)?, json!({})))
}

#[derive(Debug, Deserialize)]
struct StaleQuery {
    max_age_sec: Option<u64>,
}

async fn stale_incidents(
    State(state): State<AppState>,
    Query(query): Query<StaleQuery>,
) -> Result<Json<Value>, ApiError> {
    let max_age_sec = query.max_age_sec.unwrap_or(DEFAULT_STALE_AGE_SECS);
    let max_age = i64::try_from(max_age_sec)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .ok_or_else(|| ApiError::BadRequest(format!("max_age_sec out of range: {max_age_sec}")))?;
    let stale = state.store.stale(max_age).await;
    let total = stale.len();
    Ok(envelope(
        to_data(&stale)?,
        json!({ "total": total, "max_age_sec": max_age_sec }),
    ))
}

// ---------------------------------------------------------------------------
// Audit log
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TailQuery {
    n: Option<usize>,
}

async fn tail_log(
    State(state): State<AppState>,
    Query(query): Query<TailQuery>,
) -> Result<Json<Value>, ApiError> {
    let n = query.n.unwrap_or(DEFAULT_TAIL);
    let entries = state.audit.tail(n).await?;
    let total = entries.len();
    Ok(envelope(to_data(&entries)?, json!({ "total": total })))
}

// ---------------------------------------------------------------------------
// Simulation
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct HighCpu {
    host: Option<String>,
    value: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServiceDown {
    service: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiLatency {
    service: Option<String>,
    p95_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct DiskFull {
    host: Option<String>,
    used_pct: Option<u64>,
}

async fn simulate_high_cpu(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let req: HighCpu = optional_body(&body)?;
    let payload = json!({
        "host": req.host.as_deref().unwrap_or("app-1"),
        "metric": "cpu",
        "value": req.value.unwrap_or(97.0),
    });
    publish(&state, Event::with_json(EventType::MetricAnomaly, SIMULATION_SOURCE, payload))
}

async fn simulate_service_down(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let req: ServiceDown = optional_body(&body)?;
    let payload = json!({ "service": req.service.as_deref().unwrap_or("payments-api") });
    publish(&state, Event::with_json(EventType::ServiceDown, SIMULATION_SOURCE, payload))
}

async fn simulate_api_latency(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let req: ApiLatency = optional_body(&body)?;
    let payload = json!({
        "service": req.service.as_deref().unwrap_or("orders-api"),
        "p95_ms": req.p95_ms.unwrap_or(1200),
    });
    publish(&state, Event::with_json(EventType::ApiLatencyHigh, SIMULATION_SOURCE, payload))
}

async fn simulate_disk_full(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let req: DiskFull = optional_body(&body)?;
    let payload = json!({
        "host": req.host.as_deref().unwrap_or("db-1"),
        "used_pct": req.used_pct.unwrap_or(92),
    });
    publish(&state, Event::with_json(EventType::DiskFull, SIMULATION_SOURCE, payload))
}
