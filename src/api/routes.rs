//! API route definitions.
//!
//! The ingestion endpoint is a validate-and-forward sink: a schema-valid
//! sample fans out to the window store and the archive, an invalid one is
//! rejected back to the producer with the reason and dropped.

use crate::api::state::AppState;
use crate::ingest::Sample;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;
use uuid::Uuid;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/ingest", post(ingest))
        .route("/incidents", get(list_incidents))
        .route("/incidents/{id}", get(get_incident))
        .route("/health", get(health))
}

async fn ingest(
    State(state): State<AppState>,
    Json(sample): Json<Sample>,
) -> (StatusCode, Json<Value>) {
    if let Err(reason) = sample.validate(Utc::now(), state.retention_secs) {
        warn!(endpoint = %sample.endpoint, "Sample rejected: {reason}");
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "status": "rejected", "reason": reason.to_string() })),
        );
    }

    // Fan-out write: live window for detection, archive for baselines
    state.window.record(sample.clone());
    if let Err(e) = state.archive.append(&sample) {
        // The archive is the source of truth; an ack here would be a lie
        warn!("Archive append failed: {e:#}");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "status": "error", "reason": "archive write failed" })),
        );
    }

    (StatusCode::ACCEPTED, Json(json!({ "status": "ok" })))
}

#[derive(Deserialize)]
struct ListParams {
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    20
}

async fn list_incidents(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> (StatusCode, Json<Value>) {
    match state.incidents.list_recent(params.limit.min(200)) {
        Ok(incidents) => {
            let total = incidents.len();
            (
                StatusCode::OK,
                Json(json!({ "data": incidents, "meta": { "total": total } })),
            )
        }
        Err(e) => {
            warn!("Incident listing failed: {e:#}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "incident query failed" })),
            )
        }
    }
}

async fn get_incident(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> (StatusCode, Json<Value>) {
    match state.incidents.get(id) {
        Ok(Some(incident)) => (StatusCode::OK, Json(json!({ "data": incident }))),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "no such incident" })),
        ),
        Err(e) => {
            warn!(%id, "Incident lookup failed: {e:#}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "incident query failed" })),
            )
        }
    }
}

/// Health: did the last detector poll succeed, and how stale is the
/// baseline table.
async fn health(State(state): State<AppState>) -> Json<Value> {
    let poll = state.detector.health();
    let staleness_secs = state
        .baseline
        .staleness(Utc::now())
        .map(|d| d.num_seconds());

    Json(json!({
        "data": {
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "detector": {
                "last_poll_at": poll.last_poll_at,
                "last_poll_ok": poll.last_poll_ok,
            },
            "baseline": {
                "staleness_secs": staleness_secs,
            },
        },
        "meta": {
            "timestamp": Utc::now().to_rfc3339(),
        }
    }))
}
