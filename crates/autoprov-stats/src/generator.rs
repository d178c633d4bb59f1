//! Sharded demand counters and the export loop.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::pin::Pin;
use std::sync::{Arc, Mutex, RwLock};
use std::time::SystemTime;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use autoprov_core::{
    AppKey, AppZoneKey, AutoProvCount, AutoProvCounts, AutoProvPolicy, TimingError, ZoneKey,
    check_timing, epoch_millis, wait_time,
};
use autoprov_state::CacheData;

use crate::policy::governing_policy;

/// Callback used to hand a batch of counts to the metrics pipeline.
///
/// Resolves to false if the batch could not be delivered. Undelivered
/// batches are not retried; the next export carries the newer
/// cumulative count anyway.
pub type SendCallback = Arc<dyn Fn(AutoProvCounts) -> BoxFuture + Send + Sync>;

pub type BoxFuture = Pin<Box<dyn Future<Output = bool> + Send>>;

#[derive(Debug, Default, Clone, Copy)]
struct Counter {
    /// Qualifying events since the process started.
    count: u64,
    /// Value of `count` at the previous export.
    last_count: u64,
}

type Shard = Mutex<HashMap<AppZoneKey, Counter>>;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Timing {
    interval_sec: f64,
    offset_sec: f64,
}

struct StatsInner {
    shards: Vec<Shard>,
    timing: RwLock<Timing>,
    node_name: String,
    send: SendCallback,
}

struct ExportTask {
    handle: JoinHandle<()>,
    stop_tx: watch::Sender<bool>,
}

/// Shard a counter key lands on. Stable for the life of the process.
pub fn shard_index(key: &AppZoneKey, num_shards: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % num_shards.max(1) as u64) as usize
}

/// Per-process demand counters for auto-provisioning.
pub struct AutoProvStats {
    inner: Arc<StatsInner>,
    task: Mutex<Option<ExportTask>>,
}

impl AutoProvStats {
    pub fn new(
        interval_sec: f64,
        offset_sec: f64,
        num_shards: usize,
        node_name: &str,
        send: SendCallback,
    ) -> Self {
        let shards = (0..num_shards.max(1))
            .map(|_| Mutex::new(HashMap::new()))
            .collect();
        Self {
            inner: Arc::new(StatsInner {
                shards,
                timing: RwLock::new(Timing {
                    interval_sec,
                    offset_sec,
                }),
                node_name: node_name.to_string(),
                send,
            }),
            task: Mutex::new(None),
        }
    }

    pub fn num_shards(&self) -> usize {
        self.inner.shards.len()
    }

    pub fn node_name(&self) -> &str {
        &self.inner.node_name
    }

    pub fn interval_sec(&self) -> f64 {
        self.inner.timing.read().expect("stats timing lock").interval_sec
    }

    /// Start the export loop. Does nothing if it is already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut task = self.task.lock().expect("stats task lock");
        if task.is_some() {
            return;
        }
        let (stop_tx, stop_rx) = watch::channel(false);
        let inner = self.inner.clone();
        let handle = tokio::spawn(inner.run(stop_rx));
        *task = Some(ExportTask { handle, stop_tx });

        let timing = *self.inner.timing.read().expect("stats timing lock");
        info!(
            node = %self.inner.node_name,
            interval_sec = timing.interval_sec,
            offset_sec = timing.offset_sec,
            shards = self.inner.shards.len(),
            "auto-prov stats started"
        );
    }

    /// Stop the export loop and wait for it to exit. Does nothing if
    /// it is not running.
    pub async fn stop(&self) {
        let task = self.task.lock().expect("stats task lock").take();
        let Some(task) = task else {
            return;
        };
        let _ = task.stop_tx.send(true);
        if let Err(e) = task.handle.await {
            warn!(error = %e, "auto-prov stats export task ended abnormally");
        }
        info!(node = %self.inner.node_name, "auto-prov stats stopped");
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().expect("stats task lock").is_some()
    }

    /// Change the export interval. The loop is restarted only if the
    /// value changed and it was running; counters are kept.
    pub async fn update_settings(&self, interval_sec: f64) -> Result<(), TimingError> {
        let offset_sec = self.inner.timing.read().expect("stats timing lock").offset_sec;
        check_timing(interval_sec, offset_sec)?;
        if self.interval_sec() == interval_sec {
            return Ok(());
        }
        let restart = self.is_running();
        if restart {
            self.stop().await;
        }
        self.inner.timing.write().expect("stats timing lock").interval_sec = interval_sec;
        if restart {
            self.start();
        }
        debug!(interval_sec, restart, "auto-prov stats settings updated");
        Ok(())
    }

    /// Count one qualifying client event for (app, zone).
    ///
    /// `policy` is the policy governing the pair. When it deploys after
    /// a single interval and the events since the last export already
    /// reach its client count, an immediate `process_now` message is
    /// sent carrying the cumulative count.
    pub async fn increment(&self, app_key: &AppKey, zone_key: &ZoneKey, policy: &AutoProvPolicy) {
        let key = AppZoneKey::new(app_key.clone(), zone_key.clone());
        let idx = shard_index(&key, self.inner.shards.len());

        let immediate = {
            let mut shard = self.inner.shards[idx].lock().expect("stats shard lock");
            let counter = shard.entry(key.clone()).or_default();
            counter.count += 1;
            trace!(
                %key,
                idx,
                count = counter.count,
                last_count = counter.last_count,
                "auto-prov stats increment"
            );
            let pending = counter.count - counter.last_count;
            if policy.is_single_interval() && pending >= u64::from(policy.deploy_client_count) {
                Some(AutoProvCounts {
                    node_name: self.inner.node_name.clone(),
                    timestamp: epoch_millis(),
                    counts: vec![AutoProvCount {
                        app_key: app_key.clone(),
                        zone_key: zone_key.clone(),
                        count: counter.count,
                        process_now: true,
                    }],
                })
            } else {
                None
            }
        };

        if let Some(msg) = immediate {
            debug!(%key, policy = %policy.key, "sending immediate auto-prov count");
            if !(self.inner.send)(msg).await {
                warn!(%key, "immediate auto-prov count not delivered");
            }
        }
    }

    /// Count an event using the policy that governs (app, zone) in the
    /// caches. Returns false if no policy of the app covers the zone.
    pub async fn record(&self, caches: &CacheData, app_key: &AppKey, zone_key: &ZoneKey) -> bool {
        match governing_policy(caches, app_key, zone_key) {
            Some(policy) => {
                self.increment(app_key, zone_key, &policy).await;
                true
            }
            None => false,
        }
    }

    /// Export every counter that changed since the previous export.
    /// Returns the number of entries sent.
    pub async fn export(&self) -> usize {
        self.inner.export().await
    }

    /// Drop every counter for an app.
    pub fn clear(&self, app_key: &AppKey) -> usize {
        self.inner.retain(|key| key.app_key != *app_key)
    }

    /// Drop counters for apps not in `live_apps`.
    pub fn prune(&self, live_apps: &HashSet<AppKey>) -> usize {
        self.inner.retain(|key| live_apps.contains(&key.app_key))
    }

    /// Cumulative count for (app, zone), if counted at all.
    pub fn current_count(&self, key: &AppZoneKey) -> Option<u64> {
        let idx = shard_index(key, self.inner.shards.len());
        let shard = self.inner.shards[idx].lock().expect("stats shard lock");
        shard.get(key).map(|c| c.count)
    }

    /// Number of live counters across all shards.
    pub fn len(&self) -> usize {
        self.inner
            .shards
            .iter()
            .map(|s| s.lock().expect("stats shard lock").len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop counters for apps the caches no longer hold, or that no
    /// longer use any policy. Run after a full cache resync.
    pub fn sync_with_caches(&self, caches: &CacheData) -> usize {
        let live: HashSet<AppKey> = caches
            .apps
            .filter(|app| !app.auto_prov_policies.is_empty())
            .into_iter()
            .map(|app| app.key)
            .collect();
        let removed = self.prune(&live);
        if removed > 0 {
            debug!(removed, live_apps = live.len(), "stale counters pruned");
        }
        removed
    }

    /// Drop counters when their app is deleted or stops using policies,
    /// then prune against what the caches already hold.
    pub fn register_cache_callbacks(self: &Arc<Self>, caches: &CacheData) {
        let weak = Arc::downgrade(self);
        caches.apps.on_deleted(move |app| {
            if let Some(stats) = weak.upgrade() {
                let removed = stats.clear(&app.key);
                debug!(app = %app.key, removed, "app deleted, counters cleared");
            }
        });

        let weak = Arc::downgrade(self);
        caches.apps.on_updated(move |old, new| {
            let had_policies = old.is_some_and(|o| !o.auto_prov_policies.is_empty());
            if had_policies && new.auto_prov_policies.is_empty() {
                if let Some(stats) = weak.upgrade() {
                    let removed = stats.clear(&new.key);
                    debug!(app = %new.key, removed, "policies removed, counters cleared");
                }
            }
        });

        self.sync_with_caches(caches);
    }
}

impl StatsInner {
    async fn run(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        loop {
            let timing = *self.timing.read().expect("stats timing lock");
            let wait = wait_time(SystemTime::now(), timing.interval_sec, timing.offset_sec);
            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    let sent = self.export().await;
                    trace!(sent, "auto-prov stats export");
                }
                _ = stop.changed() => {
                    break;
                }
            }
        }
    }

    async fn export(&self) -> usize {
        // Stamped before any shard is read: an immediate message built
        // after a read is never older than this batch.
        let timestamp = epoch_millis();
        let mut counts = Vec::new();
        for shard in &self.shards {
            let mut shard = shard.lock().expect("stats shard lock");
            for (key, counter) in shard.iter_mut() {
                if counter.count == counter.last_count {
                    continue;
                }
                counter.last_count = counter.count;
                counts.push(AutoProvCount {
                    app_key: key.app_key.clone(),
                    zone_key: key.zone_key.clone(),
                    count: counter.count,
                    process_now: false,
                });
            }
        }
        if counts.is_empty() {
            return 0;
        }

        let sent = counts.len();
        let batch = AutoProvCounts {
            node_name: self.node_name.clone(),
            timestamp,
            counts,
        };
        debug!(node = %self.node_name, entries = sent, "exporting auto-prov counts");
        if !(self.send)(batch).await {
            warn!(node = %self.node_name, entries = sent, "auto-prov count export not delivered");
        }
        sent
    }

    fn retain(&self, keep: impl Fn(&AppZoneKey) -> bool) -> usize {
        let mut removed = 0;
        for shard in &self.shards {
            let mut shard = shard.lock().expect("stats shard lock");
            let before = shard.len();
            shard.retain(|key, _| keep(key));
            removed += before - shard.len();
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{OnceLock, Weak};
    use std::time::Duration;

    use autoprov_core::{App, PolicyKey};
    use autoprov_state::StateStore;

    type Sent = Arc<Mutex<Vec<AutoProvCounts>>>;

    fn collector() -> (SendCallback, Sent) {
        let sent: Sent = Arc::new(Mutex::new(Vec::new()));
        let sink = sent.clone();
        let cb: SendCallback = Arc::new(move |counts: AutoProvCounts| -> BoxFuture {
            sink.lock().unwrap().push(counts);
            Box::pin(async { true })
        });
        (cb, sent)
    }

    fn policy(clients: u32, intervals: u32) -> AutoProvPolicy {
        AutoProvPolicy {
            key: PolicyKey::new("acme", "burst"),
            deploy_client_count: clients,
            deploy_interval_count: intervals,
            undeploy_client_count: 0,
            undeploy_interval_count: 0,
            zones: vec![ZoneKey::new("op", "west")],
        }
    }

    fn app() -> AppKey {
        AppKey::new("acme", "game", "1.0")
    }

    fn zone(name: &str) -> ZoneKey {
        ZoneKey::new("op", name)
    }

    fn stats(send: SendCallback) -> AutoProvStats {
        AutoProvStats::new(300.0, 0.0, 10, "dme-1", send)
    }

    #[test]
    fn shard_index_is_stable_and_in_range() {
        for n in [1usize, 3, 10] {
            for i in 0..50 {
                let key = AppZoneKey::new(app(), zone(&format!("z{i}")));
                let idx = shard_index(&key, n);
                assert!(idx < n);
                assert_eq!(idx, shard_index(&key.clone(), n));
            }
        }
        // A zero shard count is treated as one shard.
        assert_eq!(shard_index(&AppZoneKey::new(app(), zone("west")), 0), 0);
    }

    #[tokio::test]
    async fn increment_counts_without_sending() {
        let (cb, sent) = collector();
        let stats = stats(cb);
        let p = policy(5, 3);

        for _ in 0..10 {
            stats.increment(&app(), &zone("west"), &p).await;
        }
        stats.increment(&app(), &zone("east"), &p).await;

        let key = AppZoneKey::new(app(), zone("west"));
        assert_eq!(stats.current_count(&key), Some(10));
        assert_eq!(stats.len(), 2);
        // Multi-interval policy never uses the fast path.
        assert!(sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn fast_path_sends_once_threshold_reached() {
        let (cb, sent) = collector();
        let stats = stats(cb);
        let p = policy(3, 1);

        stats.increment(&app(), &zone("west"), &p).await;
        stats.increment(&app(), &zone("west"), &p).await;
        assert!(sent.lock().unwrap().is_empty());

        stats.increment(&app(), &zone("west"), &p).await;
        let msgs = sent.lock().unwrap().clone();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].node_name, "dme-1");
        assert_eq!(msgs[0].counts.len(), 1);
        assert_eq!(msgs[0].counts[0].count, 3);
        assert!(msgs[0].counts[0].process_now);
    }

    #[tokio::test]
    async fn fast_path_does_not_advance_export_baseline() {
        let (cb, sent) = collector();
        let stats = stats(cb);
        let p = policy(2, 1);

        stats.increment(&app(), &zone("west"), &p).await;
        stats.increment(&app(), &zone("west"), &p).await;
        assert_eq!(sent.lock().unwrap().len(), 1);

        // The periodic export still reports the counter.
        assert_eq!(stats.export().await, 1);
        let msgs = sent.lock().unwrap().clone();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[1].counts[0].count, 2);
        assert!(!msgs[1].counts[0].process_now);

        // After the export the next increment is below threshold again.
        stats.increment(&app(), &zone("west"), &p).await;
        assert_eq!(sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn export_skips_unchanged_and_empty() {
        let (cb, sent) = collector();
        let stats = stats(cb);
        let p = policy(100, 2);

        assert_eq!(stats.export().await, 0);
        assert!(sent.lock().unwrap().is_empty());

        stats.increment(&app(), &zone("west"), &p).await;
        stats.increment(&app(), &zone("east"), &p).await;
        assert_eq!(stats.export().await, 2);

        // Nothing changed since the last export.
        assert_eq!(stats.export().await, 0);

        stats.increment(&app(), &zone("east"), &p).await;
        assert_eq!(stats.export().await, 1);

        let msgs = sent.lock().unwrap().clone();
        assert_eq!(msgs.len(), 2);
        let east = &msgs[1].counts[0];
        assert_eq!(east.zone_key, zone("east"));
        // Exports carry the cumulative count, not the delta.
        assert_eq!(east.count, 2);
    }

    #[tokio::test]
    async fn clear_and_prune() {
        let (cb, _sent) = collector();
        let stats = stats(cb);
        let p = policy(100, 2);
        let other = AppKey::new("acme", "chat", "2.0");

        stats.increment(&app(), &zone("west"), &p).await;
        stats.increment(&app(), &zone("east"), &p).await;
        stats.increment(&other, &zone("west"), &p).await;

        assert_eq!(stats.clear(&app()), 2);
        assert_eq!(stats.len(), 1);

        stats.increment(&app(), &zone("west"), &p).await;
        let live: HashSet<AppKey> = [app()].into_iter().collect();
        assert_eq!(stats.prune(&live), 1);
        assert!(stats.current_count(&AppZoneKey::new(other, zone("west"))).is_none());
        assert_eq!(stats.len(), 1);
    }

    #[tokio::test]
    async fn start_stop_idempotent_and_exports() {
        let (cb, sent) = collector();
        let stats = AutoProvStats::new(0.05, 0.0, 4, "dme-1", cb);
        let p = policy(100, 2);

        stats.stop().await;
        stats.start();
        stats.start();
        assert!(stats.is_running());

        stats.increment(&app(), &zone("west"), &p).await;
        tokio::time::sleep(Duration::from_millis(200)).await;

        stats.stop().await;
        stats.stop().await;
        assert!(!stats.is_running());

        let msgs = sent.lock().unwrap().clone();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].counts[0].count, 1);
    }

    #[tokio::test]
    async fn update_settings_restarts_running_loop() {
        let (cb, _sent) = collector();
        let stats = stats(cb);
        let p = policy(100, 2);
        stats.increment(&app(), &zone("west"), &p).await;

        stats.update_settings(300.0).await.unwrap();
        assert!(!stats.is_running());

        stats.start();
        stats.update_settings(60.0).await.unwrap();
        assert!(stats.is_running());
        assert_eq!(stats.interval_sec(), 60.0);
        // Counters survive the restart.
        assert_eq!(stats.current_count(&AppZoneKey::new(app(), zone("west"))), Some(1));
        stats.stop().await;
    }

    #[tokio::test]
    async fn update_settings_rejects_bad_interval() {
        let (cb, _sent) = collector();
        let stats = stats(cb);
        stats.start();

        assert_eq!(
            stats.update_settings(0.0).await,
            Err(TimingError::Interval(0.0))
        );
        assert!(stats.update_settings(-5.0).await.is_err());
        assert!(stats.update_settings(f64::NAN).await.is_err());
        assert!(stats.update_settings(f64::INFINITY).await.is_err());

        // The running loop and its interval are untouched.
        assert!(stats.is_running());
        assert_eq!(stats.interval_sec(), 300.0);
        stats.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_increments_are_all_counted() {
        let (cb, sent) = collector();
        let stats = Arc::new(AutoProvStats::new(300.0, 0.0, 4, "dme-1", cb));
        let p = policy(1_000_000, 2);
        let zones = ["west", "east", "north"];
        let tasks = 16;
        let per_task = 250;

        let mut handles = Vec::new();
        for t in 0..tasks {
            let stats = stats.clone();
            let p = p.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..per_task {
                    // Every task hits west; the others are spread around.
                    stats.increment(&app(), &zone("west"), &p).await;
                    let other = zones[1 + (t + i) % 2];
                    stats.increment(&app(), &zone(other), &p).await;
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let total = (tasks * per_task) as u64;
        let count = |name: &str| stats.current_count(&AppZoneKey::new(app(), zone(name)));
        assert_eq!(count("west"), Some(total));
        assert_eq!(count("east"), Some(total / 2));
        assert_eq!(count("north"), Some(total / 2));

        assert_eq!(stats.export().await, 3);
        let msgs = sent.lock().unwrap().clone();
        assert_eq!(msgs.len(), 1);
        let mut exported: Vec<(String, u64)> = msgs[0]
            .counts
            .iter()
            .map(|c| (c.zone_key.name.clone(), c.count))
            .collect();
        exported.sort();
        assert_eq!(
            exported,
            vec![
                ("east".to_string(), total / 2),
                ("north".to_string(), total / 2),
                ("west".to_string(), total),
            ]
        );
    }

    #[tokio::test]
    async fn immediate_message_after_export_read_is_not_a_restart() {
        let sent: Sent = Arc::new(Mutex::new(Vec::new()));
        let handle: Arc<OnceLock<Weak<AutoProvStats>>> = Arc::new(OnceLock::new());
        let cb: SendCallback = {
            let sent = sent.clone();
            let handle = handle.clone();
            Arc::new(move |counts: AutoProvCounts| -> BoxFuture {
                let exported = counts.counts.iter().all(|c| !c.process_now);
                let first = sent.lock().unwrap().is_empty();
                sent.lock().unwrap().push(counts);
                let stats = handle.get().and_then(Weak::upgrade);
                Box::pin(async move {
                    // One more event lands after the export read its shard.
                    if let (true, true, Some(stats)) = (exported, first, stats) {
                        stats.increment(&app(), &zone("west"), &policy(1, 1)).await;
                    }
                    true
                })
            })
        };
        let stats = Arc::new(stats(cb));
        handle.set(Arc::downgrade(&stats)).unwrap();

        for _ in 0..1000 {
            stats.increment(&app(), &zone("west"), &policy(100_000, 1)).await;
        }
        assert_eq!(stats.export().await, 1);

        let msgs = sent.lock().unwrap().clone();
        assert_eq!(msgs.len(), 2);
        let (export, immediate) = (&msgs[0], &msgs[1]);
        assert_eq!(export.counts[0].count, 1000);
        assert_eq!(immediate.counts[0].count, 1001);
        assert!(immediate.counts[0].process_now);
        assert!(immediate.timestamp >= export.timestamp);

        // The store sees the immediate message first.
        let store = StateStore::open_in_memory().unwrap();
        assert_eq!(store.put_counts(immediate).unwrap(), 1);
        assert_eq!(store.put_counts(export).unwrap(), 0);
        assert_eq!(store.get_count(&app(), &zone("west")).unwrap(), 1001);
    }

    #[tokio::test]
    async fn sync_with_caches_prunes_stale_apps() {
        let (cb, _sent) = collector();
        let stats = Arc::new(stats(cb));
        let p = policy(100, 2);
        let other = AppKey::new("acme", "chat", "2.0");
        let idle = AppKey::new("acme", "idle", "1.0");
        stats.increment(&app(), &zone("west"), &p).await;
        stats.increment(&other, &zone("west"), &p).await;
        stats.increment(&idle, &zone("west"), &p).await;

        let caches = CacheData::new();
        caches.apps.update(App {
            key: app(),
            auto_prov_policies: vec!["burst".to_string()],
        });
        caches.apps.update(App {
            key: idle.clone(),
            auto_prov_policies: Vec::new(),
        });

        // Registering resyncs against the caches: `other` is unknown and
        // `idle` uses no policy.
        stats.register_cache_callbacks(&caches);
        assert_eq!(stats.len(), 1);
        assert_eq!(stats.current_count(&AppZoneKey::new(app(), zone("west"))), Some(1));
        assert_eq!(stats.sync_with_caches(&caches), 0);

        caches.apps.update(App {
            key: other.clone(),
            auto_prov_policies: vec!["burst".to_string()],
        });
        stats.increment(&other, &zone("west"), &p).await;
        assert_eq!(stats.len(), 2);
    }

    #[tokio::test]
    async fn record_uses_governing_policy() {
        let (cb, sent) = collector();
        let stats = stats(cb);
        let caches = CacheData::new();
        caches.policies.update(policy(1, 1));
        caches.apps.update(App {
            key: app(),
            auto_prov_policies: vec!["burst".to_string()],
        });

        assert!(stats.record(&caches, &app(), &zone("west")).await);
        assert_eq!(sent.lock().unwrap().len(), 1);

        // No policy covers this zone.
        assert!(!stats.record(&caches, &app(), &zone("east")).await);
        assert!(stats.current_count(&AppZoneKey::new(app(), zone("east"))).is_none());
    }

    #[tokio::test]
    async fn cache_callbacks_clear_counters() {
        let (cb, _sent) = collector();
        let stats = Arc::new(stats(cb));
        let caches = CacheData::new();
        stats.register_cache_callbacks(&caches);
        let p = policy(100, 2);

        let with_policy = App {
            key: app(),
            auto_prov_policies: vec!["burst".to_string()],
        };
        caches.apps.update(with_policy.clone());
        stats.increment(&app(), &zone("west"), &p).await;

        caches.apps.update(App {
            auto_prov_policies: Vec::new(),
            ..with_policy.clone()
        });
        assert!(stats.is_empty());

        caches.apps.update(with_policy);
        stats.increment(&app(), &zone("west"), &p).await;
        caches.apps.delete(&app());
        assert!(stats.is_empty());
    }
}
