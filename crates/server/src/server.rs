//! HTTP server for tracker webhooks and the operator API.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{delete, get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use tracker_sync::discovery::{discover_mappings, validate_configuration};
use tracker_sync::models::{JobKind, SyncJob};
use tracker_sync::store::{FindingStore, LinkStore};
use tracker_sync::webhooks::{
    key_matches_prefix, validate_webhook_timestamp, verify_webhook_signature, WebhookPayload,
};
use tracker_sync::{
    ConfigError, ConfigStore, NoteSynchronizer, SyncError, SyncScheduler, TrackerClient,
    TrackerConfiguration,
};

use crate::config::Config;
use crate::executor::{CommentPayload, PushPayload};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Service configuration.
    pub config: Config,
    /// Tracker configurations and project links.
    pub configs: Arc<dyn ConfigStore>,
    /// Findings.
    pub findings: Arc<dyn FindingStore>,
    /// Finding/issue links.
    pub links: Arc<dyn LinkStore>,
    /// Note mirroring, shared with the executor's store.
    pub notes: Arc<NoteSynchronizer>,
    /// The work queue.
    pub scheduler: SyncScheduler,
}

/// Build the HTTP router for the sync service.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Webhook endpoint
        .route("/webhooks/tracker", post(tracker_webhook_handler))
        // Finding mutation ingress
        .route("/findings/{id}/changed", post(finding_changed_handler))
        .route("/findings/{id}/sla-breach", post(sla_breach_handler))
        // Operator API
        .route("/findings/{id}/push", post(push_finding_handler))
        .route("/configurations/validate", post(validate_handler))
        .route("/configurations/discover", post(discover_handler))
        .route("/links/errors", get(link_errors_handler))
        .route("/links/{finding_id}", delete(unlink_handler))
        .route("/jobs/failed", get(failed_jobs_handler))
        // Health check
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

/// Readiness check endpoint.
async fn readiness_check(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    if !state.config.enabled {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }
    Ok(Json(json!({ "status": "ready" })))
}

/// Handle incoming tracker webhooks.
///
/// This handler:
/// 1. Verifies the webhook signature (if a secret is configured)
/// 2. Validates timestamp freshness
/// 3. Checks the issue key against the project link's prefix
/// 4. Enqueues a pull-apply job; nothing is applied inline
pub async fn tracker_webhook_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, StatusCode> {
    if !state.config.enabled {
        debug!("Synchronization is disabled, ignoring webhook");
        return Ok(Json(json!({
            "status": "ignored",
            "reason": "sync_disabled"
        })));
    }

    if let Some(secret) = &state.config.webhook_secret {
        let Some(signature) = headers.get("tracker-signature").and_then(|v| v.to_str().ok())
        else {
            warn!("Missing Tracker-Signature header");
            return Err(StatusCode::UNAUTHORIZED);
        };

        if !verify_webhook_signature(&body, signature, secret) {
            warn!("Invalid webhook signature");
            return Err(StatusCode::UNAUTHORIZED);
        }
        debug!("Webhook signature verified");
    }

    let payload: WebhookPayload = serde_json::from_slice(&body).map_err(|e| {
        error!("Failed to parse webhook payload: {e}");
        StatusCode::BAD_REQUEST
    })?;

    if !validate_webhook_timestamp(payload.timestamp, state.config.max_timestamp_age_ms) {
        warn!(timestamp = %payload.timestamp, "Webhook timestamp is stale");
        return Err(StatusCode::BAD_REQUEST);
    }

    let issue_key = payload.issue_key.clone();
    let Some(event) = payload.into_event() else {
        debug!(issue_key = %issue_key, "Ignoring unknown webhook event type");
        return Ok(Json(json!({
            "status": "ignored",
            "reason": "unknown_event_type"
        })));
    };

    // The tracker may serve unrelated uses; events for keys we never
    // linked are ignored, not rejected.
    let Some(link) = state.links.link_for_issue(&event.issue_key).await else {
        debug!(issue_key = %event.issue_key, "No link for issue key");
        return Ok(Json(json!({
            "status": "ignored",
            "reason": "unlinked_issue"
        })));
    };

    let Some(project) = state.configs.project_link(&link.project_scope) else {
        warn!(scope = %link.project_scope, "Linked scope has no project link");
        return Ok(Json(json!({
            "status": "ignored",
            "reason": "no_project_link"
        })));
    };

    if !key_matches_prefix(&event.issue_key, &project.issue_key_prefix) {
        debug!(
            issue_key = %event.issue_key,
            prefix = %project.issue_key_prefix,
            "Issue key outside the linked prefix"
        );
        return Ok(Json(json!({
            "status": "ignored",
            "reason": "foreign_prefix"
        })));
    }

    info!(
        issue_key = %event.issue_key,
        kind = ?event.kind,
        "Enqueuing tracker event"
    );

    let job = SyncJob::new(
        JobKind::PullApply,
        event.issue_key.clone(),
        project.config_name,
        serde_json::to_value(&event).map_err(|e| {
            error!("Failed to serialize event payload: {e}");
            StatusCode::INTERNAL_SERVER_ERROR
        })?,
    );
    let job_id = job.id;
    state.scheduler.enqueue(job).await;

    Ok(Json(json!({
        "status": "accepted",
        "issue_key": event.issue_key,
        "job_id": job_id
    })))
}

/// Enqueue a push job for a finding under a named configuration.
///
/// Unlinked findings serialize on a synthetic key until the first push
/// assigns a real one.
async fn enqueue_push(
    state: &AppState,
    finding_id: Uuid,
    config_name: String,
) -> Result<(Uuid, String), StatusCode> {
    let target_key = match state.links.link_for_finding(finding_id).await {
        Some(link) => link.issue_key,
        None => format!("finding-{finding_id}"),
    };

    let job = SyncJob::new(
        JobKind::Push,
        target_key.clone(),
        config_name,
        serde_json::to_value(PushPayload { finding_id })
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?,
    );
    let job_id = job.id;
    state.scheduler.enqueue(job).await;
    Ok((job_id, target_key))
}

/// Explicitly push one finding to its tracker.
///
/// Always allowed, independent of `auto_sync_enabled`.
async fn push_finding_handler(
    State(state): State<AppState>,
    Path(finding_id): Path<Uuid>,
) -> Result<Json<Value>, StatusCode> {
    let finding = state.findings.read_finding(finding_id).await.map_err(|e| {
        debug!(finding_id = %finding_id, error = %e, "Finding not found");
        StatusCode::NOT_FOUND
    })?;

    let Some(project) = state.configs.project_link(&finding.project_scope) else {
        return Ok(Json(json!({
            "status": "error",
            "error": format!("no project link for scope '{}'", finding.project_scope)
        })));
    };
    if !project.active {
        return Ok(Json(json!({
            "status": "error",
            "error": format!("project link for scope '{}' is inactive", finding.project_scope)
        })));
    }

    let (job_id, target_key) = enqueue_push(&state, finding_id, project.config_name).await?;

    Ok(Json(json!({
        "status": "accepted",
        "finding_id": finding_id,
        "target_issue_key": target_key,
        "job_id": job_id
    })))
}

/// Notification that a finding was created or mutated.
///
/// Enqueues an automatic push unless the scope's configuration has
/// `auto_sync_enabled` off, in which case nothing happens until an
/// explicit push.
async fn finding_changed_handler(
    State(state): State<AppState>,
    Path(finding_id): Path<Uuid>,
) -> Result<Json<Value>, StatusCode> {
    let scope = state
        .findings
        .read_project_scope(finding_id)
        .await
        .map_err(|e| {
            debug!(finding_id = %finding_id, error = %e, "Finding not found");
            StatusCode::NOT_FOUND
        })?;

    let Some(project) = state.configs.project_link(&scope) else {
        debug!(scope = %scope, "No project link, finding change ignored");
        return Ok(Json(json!({
            "status": "ignored",
            "reason": "no_project_link"
        })));
    };
    if !project.active {
        return Ok(Json(json!({
            "status": "ignored",
            "reason": "inactive_link"
        })));
    }
    let Some(config) = state.configs.get_by_name(&project.config_name) else {
        warn!(config = %project.config_name, "Project link names unknown configuration");
        return Ok(Json(json!({
            "status": "ignored",
            "reason": "unknown_configuration"
        })));
    };

    if !config.auto_sync_enabled {
        debug!(
            finding_id = %finding_id,
            config = %config.name,
            "Automatic sync disabled, awaiting explicit push"
        );
        return Ok(Json(json!({
            "status": "ignored",
            "reason": "auto_sync_disabled"
        })));
    }

    let (job_id, target_key) = enqueue_push(&state, finding_id, project.config_name).await?;
    info!(finding_id = %finding_id, issue_key = %target_key, "Finding change enqueued");

    Ok(Json(json!({
        "status": "accepted",
        "finding_id": finding_id,
        "target_issue_key": target_key,
        "job_id": job_id
    })))
}

/// Report an SLA breach on a finding.
///
/// Records a local note and enqueues its delivery as a tracker comment
/// when `sla_comment_enabled` is set; otherwise nothing is persisted.
async fn sla_breach_handler(
    State(state): State<AppState>,
    Path(finding_id): Path<Uuid>,
) -> Result<Json<Value>, StatusCode> {
    let finding = state.findings.read_finding(finding_id).await.map_err(|e| {
        debug!(finding_id = %finding_id, error = %e, "Finding not found");
        StatusCode::NOT_FOUND
    })?;

    let Some(project) = state.configs.project_link(&finding.project_scope) else {
        return Ok(Json(json!({
            "status": "ignored",
            "reason": "no_project_link"
        })));
    };
    let Some(config) = state.configs.get_by_name(&project.config_name) else {
        return Ok(Json(json!({
            "status": "ignored",
            "reason": "unknown_configuration"
        })));
    };

    if !config.sla_comment_enabled {
        debug!(finding_id = %finding_id, "SLA comments disabled for configuration");
        return Ok(Json(json!({
            "status": "ignored",
            "reason": "sla_comments_disabled"
        })));
    }

    let note = state.notes.record_sla_breach(&finding).await.map_err(|e| {
        error!(finding_id = %finding_id, error = %e, "Failed to record breach note");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    // Delivery needs an issue; an unlinked finding keeps the note pending
    // until its first push.
    let Some(link) = state.links.link_for_finding(finding_id).await else {
        return Ok(Json(json!({
            "status": "recorded",
            "note_id": note.id,
            "delivery": "deferred_until_linked"
        })));
    };

    let job = SyncJob::new(
        JobKind::CommentSync,
        link.issue_key.clone(),
        project.config_name,
        serde_json::to_value(CommentPayload { note_id: note.id })
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?,
    );
    let job_id = job.id;
    state.scheduler.enqueue(job).await;
    info!(finding_id = %finding_id, issue_key = %link.issue_key, "SLA breach comment enqueued");

    Ok(Json(json!({
        "status": "accepted",
        "note_id": note.id,
        "issue_key": link.issue_key,
        "job_id": job_id
    })))
}

/// Explicitly unlink a finding from its tracker issue.
async fn unlink_handler(
    State(state): State<AppState>,
    Path(finding_id): Path<Uuid>,
) -> Result<Json<Value>, StatusCode> {
    state.links.unlink(finding_id).await.map_err(|e| match e {
        SyncError::NotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    })?;
    info!(finding_id = %finding_id, "Finding unlinked");
    Ok(Json(json!({
        "status": "unlinked",
        "finding_id": finding_id
    })))
}

/// Jobs that ended in a terminal error, including first pushes that
/// never produced a link record.
async fn failed_jobs_handler(State(state): State<AppState>) -> Json<Value> {
    let jobs = state.scheduler.failed_jobs().await;
    Json(json!({ "jobs": jobs }))
}

/// Validate a configuration: structural completeness plus credential probe.
async fn validate_handler(
    State(_state): State<AppState>,
    Json(config): Json<TrackerConfiguration>,
) -> Json<Value> {
    let errors = match TrackerClient::new(&config) {
        Ok(client) => validate_configuration(&client, &config).await,
        Err(e) => {
            let mut errors = config.completeness_errors();
            errors.push(ConfigError::CredentialRejected(e.to_string()));
            errors
        }
    };

    let blocking = errors.iter().any(ConfigError::blocks_activation);
    Json(json!({
        "config": config.name,
        "valid": !blocking,
        "errors": errors
    }))
}

/// Body of an express-mode discovery request.
#[derive(Debug, Deserialize)]
struct DiscoverRequest {
    config: TrackerConfiguration,
    #[serde(default)]
    probe_issue_key: Option<String>,
}

/// Express-mode auto-discovery of optional mappings.
async fn discover_handler(
    State(_state): State<AppState>,
    Json(request): Json<DiscoverRequest>,
) -> Result<Json<Value>, StatusCode> {
    let client = TrackerClient::new(&request.config).map_err(|e| {
        warn!(error = %e, "Cannot build tracker client for discovery");
        StatusCode::BAD_REQUEST
    })?;

    let discovered = discover_mappings(&client, request.probe_issue_key.as_deref()).await;
    Ok(Json(json!({
        "reopen_transition_id": discovered.reopen_transition_id,
        "close_transition_id": discovered.close_transition_id,
        "epic_name_field_id": discovered.epic_name_field_id,
        "issue_types": discovered.issue_types
    })))
}

/// Query parameters for the link error list.
#[derive(Debug, Deserialize)]
struct ErrorsQuery {
    scope: String,
}

/// Links in the terminal error state for a project scope.
async fn link_errors_handler(
    State(state): State<AppState>,
    Query(query): Query<ErrorsQuery>,
) -> Json<Value> {
    let errors = state.links.errors_for_scope(&query.scope).await;
    Json(json!({
        "scope": query.scope,
        "errors": errors
    }))
}
