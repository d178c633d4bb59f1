//! Sink traits and the store-backed sink.

use std::future::Future;
use std::sync::Arc;

use tracing::info;

use autoprov_core::{AppInst, AppInstState, AppKey, AppZoneKey, ClusterInstKey, ZoneKey, epoch_millis};
use autoprov_state::{CacheData, StateStore};

use crate::error::{TriggerError, TriggerResult};

/// Creates and deletes application instances.
///
/// `create_app_inst` must reject a request for a pair that already has
/// a live instance, so a repeated decision never deploys twice.
pub trait TriggerSink: Send + Sync + 'static {
    fn create_app_inst(
        &self,
        app_key: &AppKey,
        zone_key: &ZoneKey,
    ) -> impl Future<Output = TriggerResult<()>> + Send;

    fn delete_app_inst(
        &self,
        app_key: &AppKey,
        zone_key: &ZoneKey,
    ) -> impl Future<Output = TriggerResult<()>> + Send;
}

/// Changes the node count of a cluster instance.
pub trait ClusterScaleSink: Send + Sync + 'static {
    fn scale_cluster_inst(
        &self,
        key: &ClusterInstKey,
        num_nodes: u32,
    ) -> impl Future<Output = TriggerResult<()>> + Send;
}

impl<S: TriggerSink> TriggerSink for Arc<S> {
    fn create_app_inst(
        &self,
        app_key: &AppKey,
        zone_key: &ZoneKey,
    ) -> impl Future<Output = TriggerResult<()>> + Send {
        self.as_ref().create_app_inst(app_key, zone_key)
    }

    fn delete_app_inst(
        &self,
        app_key: &AppKey,
        zone_key: &ZoneKey,
    ) -> impl Future<Output = TriggerResult<()>> + Send {
        self.as_ref().delete_app_inst(app_key, zone_key)
    }
}

impl<S: ClusterScaleSink> ClusterScaleSink for Arc<S> {
    fn scale_cluster_inst(
        &self,
        key: &ClusterInstKey,
        num_nodes: u32,
    ) -> impl Future<Output = TriggerResult<()>> + Send {
        self.as_ref().scale_cluster_inst(key, num_nodes)
    }
}

/// Sink that applies decisions to the local store and caches.
#[derive(Clone)]
pub struct StoreSink {
    store: StateStore,
    caches: Arc<CacheData>,
}

impl StoreSink {
    pub fn new(store: StateStore, caches: Arc<CacheData>) -> Self {
        Self { store, caches }
    }

    fn create(&self, app_key: &AppKey, zone_key: &ZoneKey) -> TriggerResult<()> {
        let key = AppZoneKey::new(app_key.clone(), zone_key.clone());
        if !self.caches.apps.contains(app_key) {
            return Err(TriggerError::AppNotFound(app_key.to_string()));
        }
        if self.caches.has_live_app_inst(&key) {
            return Err(TriggerError::AlreadyExists(key.to_string()));
        }

        let inst = AppInst {
            app_key: app_key.clone(),
            zone_key: zone_key.clone(),
            state: AppInstState::Ready,
            auto_provisioned: true,
            created_at: epoch_millis(),
        };
        self.store.put_app_inst(&inst)?;
        self.caches.app_insts.update(inst);
        info!(app = %app_key, zone = %zone_key, "auto-provisioned app instance created");
        Ok(())
    }

    fn delete(&self, app_key: &AppKey, zone_key: &ZoneKey) -> TriggerResult<()> {
        let key = AppZoneKey::new(app_key.clone(), zone_key.clone());
        let stored = self.store.delete_app_inst(app_key, zone_key)?;
        let cached = self.caches.app_insts.delete(&key).is_some();
        if !stored && !cached {
            return Err(TriggerError::NotFound(key.to_string()));
        }
        info!(app = %app_key, zone = %zone_key, "app instance deleted");
        Ok(())
    }

    fn scale(&self, key: &ClusterInstKey, num_nodes: u32) -> TriggerResult<()> {
        let mut cluster = self
            .caches
            .cluster_insts
            .get(key)
            .ok_or_else(|| TriggerError::ClusterNotFound(key.to_string()))?;
        let previous = cluster.num_nodes;
        cluster.num_nodes = num_nodes;
        self.caches.cluster_insts.update(cluster);
        info!(cluster = %key, from = previous, to = num_nodes, "cluster instance scaled");
        Ok(())
    }
}

impl TriggerSink for StoreSink {
    async fn create_app_inst(&self, app_key: &AppKey, zone_key: &ZoneKey) -> TriggerResult<()> {
        self.create(app_key, zone_key)
    }

    async fn delete_app_inst(&self, app_key: &AppKey, zone_key: &ZoneKey) -> TriggerResult<()> {
        self.delete(app_key, zone_key)
    }
}

impl ClusterScaleSink for StoreSink {
    async fn scale_cluster_inst(&self, key: &ClusterInstKey, num_nodes: u32) -> TriggerResult<()> {
        self.scale(key, num_nodes)
    }
}
