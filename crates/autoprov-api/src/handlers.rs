//! REST API handlers.
//!
//! Definitions go into the cache mirror, which drives the aggregator
//! and the count generator through their callbacks. Responses are JSON.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use tracing::{debug, info};

use autoprov_core::{Alert, App, AppKey, AppZoneKey, AutoProvPolicy, ClusterInst, PolicyKey, ZoneKey};
use autoprov_trigger::{TriggerError, TriggerSink};

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

// ── Apps ───────────────────────────────────────────────────────

/// GET /api/v1/apps
pub async fn list_apps(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.caches.apps.list())
}

/// PUT /api/v1/apps
pub async fn put_app(State(state): State<ApiState>, Json(app): Json<App>) -> impl IntoResponse {
    info!(app = %app.key, policies = ?app.auto_prov_policies, "app updated");
    state.caches.apps.update(app.clone());
    ApiResponse::ok(app)
}

/// DELETE /api/v1/apps/:org/:name/:version
pub async fn delete_app(
    State(state): State<ApiState>,
    Path((org, name, version)): Path<(String, String, String)>,
) -> impl IntoResponse {
    let key = AppKey::new(&org, &name, &version);
    if state.caches.apps.delete(&key).is_none() {
        return error_response("app not found", StatusCode::NOT_FOUND).into_response();
    }
    match state.store.delete_counts_for_app(&key) {
        Ok(removed) => {
            info!(app = %key, removed, "app deleted");
            ApiResponse::ok("deleted").into_response()
        }
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

// ── Policies ───────────────────────────────────────────────────

/// GET /api/v1/policies
pub async fn list_policies(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.caches.policies.list())
}

/// PUT /api/v1/policies
pub async fn put_policy(
    State(state): State<ApiState>,
    Json(policy): Json<AutoProvPolicy>,
) -> impl IntoResponse {
    if policy.zones.is_empty() {
        return error_response("policy must name at least one zone", StatusCode::BAD_REQUEST)
            .into_response();
    }
    info!(
        policy = %policy.key,
        deploy_client_count = policy.deploy_client_count,
        deploy_interval_count = policy.deploy_interval_count,
        zones = policy.zones.len(),
        "policy updated"
    );
    state.caches.policies.update(policy.clone());
    ApiResponse::ok(policy).into_response()
}

/// DELETE /api/v1/policies/:org/:name
pub async fn delete_policy(
    State(state): State<ApiState>,
    Path((org, name)): Path<(String, String)>,
) -> impl IntoResponse {
    let key = PolicyKey::new(&org, &name);
    match state.caches.policies.delete(&key) {
        Some(_) => {
            info!(policy = %key, "policy deleted");
            ApiResponse::ok("deleted").into_response()
        }
        None => error_response("policy not found", StatusCode::NOT_FOUND).into_response(),
    }
}

// ── App instances ──────────────────────────────────────────────

/// GET /api/v1/appinsts
pub async fn list_app_insts(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.caches.app_insts.list())
}

/// DELETE /api/v1/appinsts/:org/:name/:version/:zoneorg/:zone
pub async fn delete_app_inst(
    State(state): State<ApiState>,
    Path((org, name, version, zone_org, zone)): Path<(String, String, String, String, String)>,
) -> impl IntoResponse {
    let app_key = AppKey::new(&org, &name, &version);
    let zone_key = ZoneKey::new(&zone_org, &zone);
    match state.sink.delete_app_inst(&app_key, &zone_key).await {
        Ok(()) => ApiResponse::ok("deleted").into_response(),
        Err(TriggerError::NotFound(_)) => {
            error_response("app instance not found", StatusCode::NOT_FOUND).into_response()
        }
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

// ── Cluster instances ──────────────────────────────────────────

/// GET /api/v1/clusterinsts
pub async fn list_cluster_insts(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.caches.cluster_insts.list())
}

/// PUT /api/v1/clusterinsts
pub async fn put_cluster_inst(
    State(state): State<ApiState>,
    Json(cluster): Json<ClusterInst>,
) -> impl IntoResponse {
    debug!(cluster = %cluster.key, num_nodes = cluster.num_nodes, "cluster instance updated");
    state.caches.cluster_insts.update(cluster.clone());
    ApiResponse::ok(cluster)
}

// ── Alerts ─────────────────────────────────────────────────────

/// GET /api/v1/alerts
pub async fn list_alerts(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.caches.alerts.list())
}

/// PUT /api/v1/alerts
pub async fn put_alert(State(state): State<ApiState>, Json(alert): Json<Alert>) -> impl IntoResponse {
    debug!(alert = %alert.key(), state = %alert.state, value = alert.value, "alert updated");
    state.caches.alerts.update(alert.clone());
    ApiResponse::ok(alert)
}

// ── Client events ──────────────────────────────────────────────

/// A qualifying client event: a client of `app_key` was served by, or
/// asked for, `zone_key`.
#[derive(Debug, serde::Deserialize)]
pub struct ClientEvent {
    pub app_key: AppKey,
    pub zone_key: ZoneKey,
}

/// POST /api/v1/events
pub async fn record_event(
    State(state): State<ApiState>,
    Json(event): Json<ClientEvent>,
) -> impl IntoResponse {
    if !state.caches.apps.contains(&event.app_key) {
        return error_response("app not found", StatusCode::NOT_FOUND).into_response();
    }
    if !state
        .stats
        .record(&state.caches, &event.app_key, &event.zone_key)
        .await
    {
        return error_response(
            &format!("no auto-prov policy of {} covers {}", event.app_key, event.zone_key),
            StatusCode::BAD_REQUEST,
        )
        .into_response();
    }
    let key = AppZoneKey::new(event.app_key, event.zone_key);
    let count = state.stats.current_count(&key).unwrap_or(0);
    ApiResponse::ok(serde_json::json!({
        "app_key": key.app_key,
        "zone_key": key.zone_key,
        "count": count,
    }))
    .into_response()
}

// ── Demand ─────────────────────────────────────────────────────

/// GET /api/v1/demand
pub async fn get_demand(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok((state.demand)())
}

/// GET /api/v1/counts
pub async fn list_counts(State(state): State<ApiState>) -> impl IntoResponse {
    match state.store.list_count_totals() {
        Ok(totals) => ApiResponse::ok(totals).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

// ── Prometheus ─────────────────────────────────────────────────

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    let totals = state.store.list_count_totals().unwrap_or_default();
    let body = autoprov_metrics::render_prometheus(&totals);
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}
