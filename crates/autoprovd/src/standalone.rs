//! Standalone mode: generator, aggregator and API in one process.
//!
//! Counts exported by the generator are written straight into the
//! local store, which the aggregator reads back as its metrics store.
//! Instances it decides to create are recorded through the store sink.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{info, warn};

use autoprov_aggr::{AggrTiming, AutoProvAggr, ClusterAutoScaler};
use autoprov_api::{ApiState, DemandFn};
use autoprov_core::{AutoProvConfig, AutoProvCounts};
use autoprov_metrics::CountIngest;
use autoprov_state::{CacheData, StateStore};
use autoprov_stats::{AutoProvStats, BoxFuture, SendCallback};
use autoprov_trigger::StoreSink;

/// Run the standalone node until Ctrl-C.
pub async fn run_standalone(config: AutoProvConfig) -> anyhow::Result<()> {
    info!(node = %config.node_name, "auto-prov daemon starting in standalone mode");

    // Ensure data directory exists.
    std::fs::create_dir_all(&config.data_dir)?;
    let db_path = config.data_dir.join("autoprov.redb");

    // ── Initialize subsystems ──────────────────────────────────

    // Count store.
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "count store opened");

    // Cache mirror, seeded with instances from a previous run.
    let caches = Arc::new(CacheData::new());
    let insts = store.list_app_insts()?;
    let restored = insts.len();
    for inst in insts {
        caches.app_insts.update(inst);
    }
    info!(restored, "app instances restored");

    // Aggregator.
    let sink = StoreSink::new(store.clone(), caches.clone());
    let aggr = Arc::new(AutoProvAggr::new(
        caches.clone(),
        store.clone(),
        sink.clone(),
        AggrTiming {
            interval_sec: config.aggregator.interval_sec,
            offset_sec: config.aggregator.offset_sec,
        },
    ));
    aggr.register_callbacks();

    // Cluster autoscale.
    let scaler = Arc::new(ClusterAutoScaler::new(caches.clone(), sink.clone()));
    scaler.register_callbacks();

    // Count generator, exporting into the store.
    let ingest = CountIngest::new(store.clone()).with_process_now(aggr.process_now_callback());
    let stats = Arc::new(AutoProvStats::new(
        config.stats.interval_sec,
        config.stats.offset_sec,
        config.stats.shards,
        &config.node_name,
        ingest_callback(ingest),
    ));
    stats.register_cache_callbacks(&caches);
    info!(shards = stats.num_shards(), "count generator initialized");

    // ── Start background tasks ─────────────────────────────────

    aggr.start();
    stats.start();

    // ── Start API server ───────────────────────────────────────

    let demand: DemandFn = {
        let aggr = aggr.clone();
        Arc::new(move || aggr.snapshot())
    };
    let router = autoprov_api::build_router(ApiState {
        store,
        caches,
        stats: stats.clone(),
        sink,
        demand,
    });
    let addr = SocketAddr::from(([0, 0, 0, 0], config.api_port));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl-C");
        }
        info!("shutdown signal received");
    });

    server.await?;

    // Final export so the store holds the latest counts.
    stats.stop().await;
    let exported = stats.export().await;
    aggr.stop().await;

    info!(exported, "auto-prov daemon stopped");
    Ok(())
}

/// Send callback that writes export batches into the local store.
fn ingest_callback(ingest: CountIngest) -> SendCallback {
    Arc::new(move |counts: AutoProvCounts| -> BoxFuture {
        let ingest = ingest.clone();
        Box::pin(async move {
            match ingest.ingest(&counts) {
                Ok(_) => true,
                Err(e) => {
                    warn!(node = %counts.node_name, error = %e, "count export not stored");
                    false
                }
            }
        })
    })
}
