//! Cluster auto-scaling driven by monitoring alerts.
//!
//! A firing `ClusterAutoScale` alert names a cluster instance in its
//! labels and carries the desired node count as its value. When that
//! differs from the cluster's current size, the cluster is scaled.

use std::sync::Arc;

use tracing::{debug, info, warn};

use autoprov_core::{ALERT_CLUSTER_AUTO_SCALE, Alert, ClusterInstKey};
use autoprov_state::CacheData;
use autoprov_trigger::ClusterScaleSink;

use crate::error::AggrResult;

pub struct ClusterAutoScaler<S> {
    caches: Arc<CacheData>,
    sink: S,
}

impl<S: ClusterScaleSink> ClusterAutoScaler<S> {
    pub fn new(caches: Arc<CacheData>, sink: S) -> Self {
        Self { caches, sink }
    }

    /// The cluster and node count an alert asks for, or `None` if the
    /// alert is not an actionable scale request.
    pub fn scale_for_alert(&self, alert: &Alert) -> Option<(ClusterInstKey, u32)> {
        if alert.name != ALERT_CLUSTER_AUTO_SCALE || !alert.is_firing() {
            return None;
        }
        let Some(key) = alert.cluster_inst_key() else {
            debug!(alert = %alert.key(), "scale alert missing cluster labels");
            return None;
        };
        let Some(cluster) = self.caches.cluster_insts.get(&key) else {
            debug!(cluster = %key, "scale alert for unknown cluster instance");
            return None;
        };
        if !alert.value.is_finite() || alert.value < 1.0 || alert.value > f64::from(u32::MAX) {
            warn!(cluster = %key, value = alert.value, "scale alert with invalid node count");
            return None;
        }
        let target = alert.value.round() as u32;
        if target == cluster.num_nodes {
            return None;
        }
        Some((key, target))
    }

    /// Scale the cluster an alert names. Returns the new node count if
    /// a scale was applied.
    pub async fn handle_alert(&self, alert: &Alert) -> AggrResult<Option<u32>> {
        let Some((key, target)) = self.scale_for_alert(alert) else {
            return Ok(None);
        };
        info!(cluster = %key, num_nodes = target, "scaling cluster instance");
        self.sink.scale_cluster_inst(&key, target).await?;
        Ok(Some(target))
    }

    /// Act on alert updates as they arrive in the cache.
    pub fn register_callbacks(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.caches.alerts.on_updated(move |_, alert| {
            let Some(scaler) = weak.upgrade() else {
                return;
            };
            let Ok(handle) = tokio::runtime::Handle::try_current() else {
                warn!(alert = %alert.key(), "no runtime to handle scale alert");
                return;
            };
            let alert = alert.clone();
            handle.spawn(async move {
                if let Err(e) = scaler.handle_alert(&alert).await {
                    warn!(alert = %alert.key(), error = %e, "cluster auto-scale failed");
                }
            });
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::time::Duration;

    use autoprov_core::{
        ALERT_STATE_FIRING, ClusterInst, LABEL_CLUSTER, LABEL_CLUSTER_ORG, LABEL_ZONE,
        LABEL_ZONE_ORG, ZoneKey,
    };
    use autoprov_state::StateStore;
    use autoprov_trigger::StoreSink;

    fn cluster_key() -> ClusterInstKey {
        ClusterInstKey {
            organization: "acme".into(),
            name: "c1".into(),
            zone_key: ZoneKey::new("op", "west"),
        }
    }

    fn alert(value: f64) -> Alert {
        let labels = BTreeMap::from([
            (LABEL_CLUSTER_ORG.to_string(), "acme".to_string()),
            (LABEL_CLUSTER.to_string(), "c1".to_string()),
            (LABEL_ZONE_ORG.to_string(), "op".to_string()),
            (LABEL_ZONE.to_string(), "west".to_string()),
        ]);
        Alert {
            name: ALERT_CLUSTER_AUTO_SCALE.into(),
            labels,
            state: ALERT_STATE_FIRING.into(),
            value,
        }
    }

    fn setup(num_nodes: u32) -> (Arc<CacheData>, Arc<ClusterAutoScaler<StoreSink>>) {
        let caches = Arc::new(CacheData::new());
        caches.cluster_insts.update(ClusterInst {
            key: cluster_key(),
            num_nodes,
        });
        let store = StateStore::open_in_memory().unwrap();
        let sink = StoreSink::new(store, caches.clone());
        (caches.clone(), Arc::new(ClusterAutoScaler::new(caches, sink)))
    }

    fn num_nodes(caches: &CacheData) -> u32 {
        caches.cluster_insts.get(&cluster_key()).unwrap().num_nodes
    }

    #[tokio::test]
    async fn scale_up_and_down() {
        let (caches, scaler) = setup(2);

        assert_eq!(scaler.handle_alert(&alert(3.0)).await.unwrap(), Some(3));
        assert_eq!(num_nodes(&caches), 3);

        assert_eq!(scaler.handle_alert(&alert(2.0)).await.unwrap(), Some(2));
        assert_eq!(num_nodes(&caches), 2);
    }

    #[test]
    fn ignores_non_actionable_alerts() {
        let (_caches, scaler) = setup(2);

        assert!(scaler.scale_for_alert(&alert(2.0)).is_none());
        assert!(scaler.scale_for_alert(&alert(0.0)).is_none());
        assert!(scaler.scale_for_alert(&alert(f64::NAN)).is_none());

        let mut other = alert(3.0);
        other.name = "HighCpu".into();
        assert!(scaler.scale_for_alert(&other).is_none());

        let mut pending = alert(3.0);
        pending.state = "pending".into();
        assert!(scaler.scale_for_alert(&pending).is_none());

        let mut partial = alert(3.0);
        partial.labels.remove(LABEL_ZONE);
        assert!(scaler.scale_for_alert(&partial).is_none());

        let mut unknown = alert(3.0);
        unknown.labels.insert(LABEL_CLUSTER.into(), "c9".into());
        assert!(scaler.scale_for_alert(&unknown).is_none());
    }

    #[test]
    fn rounds_value() {
        let (_caches, scaler) = setup(2);
        let (key, target) = scaler.scale_for_alert(&alert(3.4)).unwrap();
        assert_eq!(key, cluster_key());
        assert_eq!(target, 3);
    }

    #[tokio::test]
    async fn alert_callback_scales_cluster() {
        let (caches, scaler) = setup(1);
        scaler.register_callbacks();

        caches.alerts.update(alert(2.0));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(num_nodes(&caches), 2);
    }
}
