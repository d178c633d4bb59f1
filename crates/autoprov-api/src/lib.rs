//! autoprov-api — REST API for a standalone auto-provisioning node.
//!
//! Feeds the cache mirror (apps, policies, cluster instances, alerts),
//! records client events into the count generator, and exposes the
//! aggregator's tracking state and the demand totals.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/apps` | List apps |
//! | PUT | `/api/v1/apps` | Create or update an app |
//! | DELETE | `/api/v1/apps/{org}/{name}/{version}` | Delete an app |
//! | GET | `/api/v1/policies` | List auto-prov policies |
//! | PUT | `/api/v1/policies` | Create or update a policy |
//! | DELETE | `/api/v1/policies/{org}/{name}` | Delete a policy |
//! | GET | `/api/v1/appinsts` | List app instances |
//! | DELETE | `/api/v1/appinsts/{org}/{name}/{version}/{zoneorg}/{zone}` | Delete an app instance |
//! | GET | `/api/v1/clusterinsts` | List cluster instances |
//! | PUT | `/api/v1/clusterinsts` | Create or update a cluster instance |
//! | GET | `/api/v1/alerts` | List alerts |
//! | PUT | `/api/v1/alerts` | Raise or update an alert |
//! | POST | `/api/v1/events` | Record a client event |
//! | GET | `/api/v1/demand` | Aggregator tracking state |
//! | GET | `/api/v1/counts` | Cumulative demand per (app, zone) |
//! | GET | `/metrics` | Prometheus exposition |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post};

use autoprov_aggr::AppDemandReport;
use autoprov_state::{CacheData, StateStore};
use autoprov_stats::AutoProvStats;
use autoprov_trigger::StoreSink;

/// Snapshot of the aggregator's tracking state.
pub type DemandFn = Arc<dyn Fn() -> Vec<AppDemandReport> + Send + Sync>;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: StateStore,
    pub caches: Arc<CacheData>,
    pub stats: Arc<AutoProvStats>,
    pub sink: StoreSink,
    pub demand: DemandFn,
}

/// Build the complete API router (REST + metrics).
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/apps", get(handlers::list_apps).put(handlers::put_app))
        .route("/apps/{org}/{name}/{version}", delete(handlers::delete_app))
        .route("/policies", get(handlers::list_policies).put(handlers::put_policy))
        .route("/policies/{org}/{name}", delete(handlers::delete_policy))
        .route("/appinsts", get(handlers::list_app_insts))
        .route(
            "/appinsts/{org}/{name}/{version}/{zoneorg}/{zone}",
            delete(handlers::delete_app_inst),
        )
        .route(
            "/clusterinsts",
            get(handlers::list_cluster_insts).put(handlers::put_cluster_inst),
        )
        .route("/alerts", get(handlers::list_alerts).put(handlers::put_alert))
        .route("/events", post(handlers::record_event))
        .route("/demand", get(handlers::get_demand))
        .route("/counts", get(handlers::list_counts))
        .with_state(state.clone());

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::prometheus_metrics).with_state(state))
}
