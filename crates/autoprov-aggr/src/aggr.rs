//! The aggregator: evaluation loop, fast path, and cache reactions.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use serde::Serialize;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use autoprov_core::{AppKey, AppZoneKey, PolicyKey, ZoneKey, check_timing, wait_time};
use autoprov_metrics::{CountSource, ProcessNowCallback};
use autoprov_state::CacheData;
use autoprov_trigger::TriggerSink;

use crate::error::AggrResult;
use crate::reconcile::{reconcile_all, reconcile_app};
use crate::tracker::AppDemandState;

/// Evaluation loop timing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggrTiming {
    pub interval_sec: f64,
    pub offset_sec: f64,
}

impl AggrTiming {
    fn validate(&self) -> AggrResult<()> {
        Ok(check_timing(self.interval_sec, self.offset_sec)?)
    }
}

/// Counters describing one evaluation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IterSummary {
    /// (app, zone) pairs queried.
    pub queried: usize,
    pub query_failures: usize,
    /// Zones that only established a baseline.
    pub baselined: usize,
    /// Zone trackers whose deploy run completed.
    pub satisfied: usize,
    /// Completed runs skipped because a live instance already exists.
    pub already_live: usize,
    pub created: usize,
    pub create_failures: usize,
}

#[derive(Default)]
struct AggrState {
    apps: BTreeMap<AppKey, AppDemandState>,
}

impl AggrState {
    /// Every (app, zone) some policy tracks.
    fn targets(&self) -> Vec<AppZoneKey> {
        self.apps
            .iter()
            .flat_map(|(app_key, state)| {
                state
                    .tracked_zones()
                    .into_iter()
                    .map(move |zone| AppZoneKey::new(app_key.clone(), zone))
            })
            .collect()
    }
}

struct AggrInner<M, T> {
    caches: Arc<CacheData>,
    source: M,
    sink: T,
    state: Mutex<AggrState>,
    /// Serializes evaluation passes.
    iter_lock: tokio::sync::Mutex<()>,
    timing: watch::Sender<AggrTiming>,
    /// Pairs with an outstanding fast-path request.
    pending: Mutex<BTreeSet<AppZoneKey>>,
    wake: Notify,
}

struct LoopTask {
    handle: JoinHandle<()>,
    stop_tx: watch::Sender<bool>,
}

/// Region-level demand aggregator.
pub struct AutoProvAggr<M, T> {
    inner: Arc<AggrInner<M, T>>,
    task: Mutex<Option<LoopTask>>,
}

impl<M: CountSource, T: TriggerSink> AutoProvAggr<M, T> {
    pub fn new(caches: Arc<CacheData>, source: M, sink: T, timing: AggrTiming) -> Self {
        let (timing_tx, _) = watch::channel(timing);
        Self {
            inner: Arc::new(AggrInner {
                caches,
                source,
                sink,
                state: Mutex::new(AggrState::default()),
                iter_lock: tokio::sync::Mutex::new(()),
                timing: timing_tx,
                pending: Mutex::new(BTreeSet::new()),
                wake: Notify::new(),
            }),
            task: Mutex::new(None),
        }
    }

    /// Follow app and policy changes in the caches, then reconcile
    /// against what the caches already hold.
    pub fn register_callbacks(&self) {
        let caches = &self.inner.caches;

        let weak = Arc::downgrade(&self.inner);
        caches.apps.on_updated(move |_, app| {
            if let Some(inner) = weak.upgrade() {
                inner.reconcile(&app.key);
            }
        });
        let weak = Arc::downgrade(&self.inner);
        caches.apps.on_deleted(move |app| {
            if let Some(inner) = weak.upgrade() {
                inner.reconcile(&app.key);
            }
        });
        let weak = Arc::downgrade(&self.inner);
        caches.policies.on_updated(move |_, policy| {
            if let Some(inner) = weak.upgrade() {
                inner.reconcile_policy_users(&policy.key);
            }
        });
        let weak = Arc::downgrade(&self.inner);
        caches.policies.on_deleted(move |policy| {
            if let Some(inner) = weak.upgrade() {
                inner.reconcile_policy_users(&policy.key);
            }
        });

        let tracked = {
            let mut state = self.inner.state.lock().expect("aggr state lock");
            reconcile_all(&mut state.apps, caches)
        };
        debug!(tracked, "aggregator cache callbacks registered");
    }

    /// Start the evaluation loop. Does nothing if already running.
    ///
    /// The first pass runs immediately and only sets baselines.
    pub fn start(&self) {
        let mut task = self.task.lock().expect("aggr task lock");
        if task.is_some() {
            return;
        }
        let (stop_tx, stop_rx) = watch::channel(false);
        let inner = self.inner.clone();
        let handle = tokio::spawn(inner.run(stop_rx));
        *task = Some(LoopTask { handle, stop_tx });

        let timing = self.timing();
        info!(
            interval_sec = timing.interval_sec,
            offset_sec = timing.offset_sec,
            "auto-prov aggregator started"
        );
    }

    /// Stop the evaluation loop and wait for it to exit.
    pub async fn stop(&self) {
        let task = self.task.lock().expect("aggr task lock").take();
        let Some(task) = task else {
            return;
        };
        let _ = task.stop_tx.send(true);
        if let Err(e) = task.handle.await {
            warn!(error = %e, "auto-prov aggregator task ended abnormally");
        }
        info!("auto-prov aggregator stopped");
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().expect("aggr task lock").is_some()
    }

    pub fn timing(&self) -> AggrTiming {
        *self.inner.timing.borrow()
    }

    /// Change the evaluation period and offset. A running loop picks
    /// the new timing up for its next wait; tracking state is kept.
    pub fn update_settings(&self, interval_sec: f64, offset_sec: f64) -> AggrResult<()> {
        let timing = AggrTiming {
            interval_sec,
            offset_sec,
        };
        timing.validate()?;
        let old = self.inner.timing.send_replace(timing);
        if old != timing {
            info!(interval_sec, offset_sec, "auto-prov aggregator settings updated");
        }
        Ok(())
    }

    /// Run one evaluation pass. `init` only re-establishes baselines.
    pub async fn run_iter(&self, init: bool) -> IterSummary {
        self.inner.run_iter(init).await
    }

    /// Ask for an early evaluation of (app, zone) on behalf of a
    /// fast-path message. Cheap; safe to call from any thread.
    pub fn process_now(&self, key: AppZoneKey) {
        self.inner.process_now(key);
    }

    /// Evaluate outstanding fast-path requests now.
    pub async fn run_fast_path(&self) -> IterSummary {
        self.inner.run_fast_path().await
    }

    /// A callback handing fast-path requests to this aggregator.
    pub fn process_now_callback(&self) -> ProcessNowCallback {
        let weak = Arc::downgrade(&self.inner);
        Arc::new(move |key| {
            if let Some(inner) = weak.upgrade() {
                inner.process_now(key);
            }
        })
    }

    /// Copy of the tracking state for one app.
    pub fn app_state(&self, app_key: &AppKey) -> Option<AppDemandState> {
        let state = self.inner.state.lock().expect("aggr state lock");
        state.apps.get(app_key).cloned()
    }

    pub fn is_tracking(&self, app_key: &AppKey) -> bool {
        let state = self.inner.state.lock().expect("aggr state lock");
        state.apps.contains_key(app_key)
    }

    pub fn tracked_apps(&self) -> Vec<AppKey> {
        let state = self.inner.state.lock().expect("aggr state lock");
        state.apps.keys().cloned().collect()
    }

    /// Current progress of one policy in one zone.
    pub fn deploy_intervals_met(&self, app_key: &AppKey, policy: &str, zone: &ZoneKey) -> Option<u32> {
        let state = self.inner.state.lock().expect("aggr state lock");
        state
            .apps
            .get(app_key)?
            .policies
            .get(policy)?
            .zone_trackers
            .get(zone)
            .map(|t| t.deploy_intervals_met)
    }

    /// Serializable view of everything being tracked.
    pub fn snapshot(&self) -> Vec<AppDemandReport> {
        let state = self.inner.state.lock().expect("aggr state lock");
        state
            .apps
            .iter()
            .map(|(key, app)| AppDemandReport::new(key, app))
            .collect()
    }
}

impl<M: CountSource, T: TriggerSink> AggrInner<M, T> {
    async fn run(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        let mut timing_rx = self.timing.subscribe();
        let summary = self.run_iter(true).await;
        debug!(baselined = summary.baselined, "aggregator init pass done");

        loop {
            let timing = *timing_rx.borrow_and_update();
            let wait = wait_time(SystemTime::now(), timing.interval_sec, timing.offset_sec);
            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    let summary = self.run_iter(false).await;
                    debug!(?summary, "aggregator pass done");
                }
                _ = self.wake.notified() => {
                    let summary = self.run_fast_path().await;
                    debug!(?summary, "aggregator fast-path pass done");
                }
                _ = timing_rx.changed() => {
                    debug!("aggregator timing changed");
                }
                _ = stop.changed() => {
                    break;
                }
            }
        }
    }

    fn reconcile(&self, app_key: &AppKey) {
        let mut state = self.state.lock().expect("aggr state lock");
        reconcile_app(&mut state.apps, &self.caches, app_key);
    }

    fn reconcile_policy_users(&self, policy_key: &PolicyKey) {
        let users = self.caches.apps_using_policy(policy_key);
        let mut state = self.state.lock().expect("aggr state lock");
        for app in &users {
            reconcile_app(&mut state.apps, &self.caches, &app.key);
        }
        debug!(policy = %policy_key, apps = users.len(), "policy change reconciled");
    }

    fn process_now(&self, key: AppZoneKey) {
        let inserted = self.pending.lock().expect("aggr pending lock").insert(key);
        if inserted {
            self.wake.notify_one();
        }
    }

    async fn query(&self, key: &AppZoneKey) -> AggrResult<u64> {
        Ok(self.source.get_count(&key.app_key, &key.zone_key).await?)
    }

    /// Read the current cumulative count of every target. Pairs whose
    /// query fails are left out of this pass.
    async fn read_counts(
        &self,
        targets: Vec<AppZoneKey>,
        summary: &mut IterSummary,
    ) -> Vec<(AppZoneKey, u64)> {
        let mut readings = Vec::with_capacity(targets.len());
        for key in targets {
            summary.queried += 1;
            match self.query(&key).await {
                Ok(count) => readings.push((key, count)),
                Err(e) => {
                    summary.query_failures += 1;
                    warn!(
                        app = %key.app_key,
                        zone = %key.zone_key,
                        error = %e,
                        "count query failed, zone skipped this pass"
                    );
                }
            }
        }
        readings
    }

    async fn run_iter(&self, init: bool) -> IterSummary {
        let _iter = self.iter_lock.lock().await;
        let mut summary = IterSummary::default();

        let targets = self.state.lock().expect("aggr state lock").targets();
        let readings = self.read_counts(targets, &mut summary).await;

        let creates = {
            let mut state = self.state.lock().expect("aggr state lock");
            self.apply_counts(&mut state, readings, init, &mut summary)
        };
        for key in creates {
            self.trigger(&key, &mut summary).await;
        }
        summary
    }

    fn apply_counts(
        &self,
        state: &mut AggrState,
        readings: Vec<(AppZoneKey, u64)>,
        init: bool,
        summary: &mut IterSummary,
    ) -> Vec<AppZoneKey> {
        let mut creates: Vec<AppZoneKey> = Vec::new();
        for (key, count) in readings {
            // The app or zone may have been dropped while querying.
            let Some(app) = state.apps.get_mut(&key.app_key) else {
                continue;
            };
            if !app.tracks_zone(&key.zone_key) {
                continue;
            }

            let stats = app.zones.entry(key.zone_key.clone()).or_default();
            if init {
                stats.rebaseline(count);
                summary.baselined += 1;
                continue;
            }
            let Some(delta) = stats.observe(count) else {
                summary.baselined += 1;
                continue;
            };

            for (name, policy) in app.policies.iter_mut() {
                let th = policy.thresholds;
                let Some(tracker) = policy.zone_trackers.get_mut(&key.zone_key) else {
                    continue;
                };
                let outcome = tracker.evaluate(delta, &th);
                if outcome.undeploy {
                    debug!(
                        app = %key.app_key,
                        zone = %key.zone_key,
                        policy = %name,
                        intervals = tracker.undeploy_intervals_met,
                        "undeploy threshold reached"
                    );
                }
                if !outcome.deploy {
                    continue;
                }
                summary.satisfied += 1;
                info!(
                    app = %key.app_key,
                    zone = %key.zone_key,
                    policy = %name,
                    intervals = tracker.deploy_intervals_met,
                    delta,
                    "deploy threshold met"
                );
                if self.caches.has_live_app_inst(&key) {
                    summary.already_live += 1;
                    debug!(app = %key.app_key, zone = %key.zone_key, "app instance already live");
                } else if !creates.contains(&key) {
                    creates.push(key.clone());
                }
            }
        }
        creates
    }

    async fn run_fast_path(&self) -> IterSummary {
        let _iter = self.iter_lock.lock().await;
        let mut summary = IterSummary::default();

        let requested = std::mem::take(&mut *self.pending.lock().expect("aggr pending lock"));
        let targets: Vec<AppZoneKey> = {
            let state = self.state.lock().expect("aggr state lock");
            requested
                .into_iter()
                .filter(|key| {
                    state
                        .apps
                        .get(&key.app_key)
                        .is_some_and(|app| app.has_fast_path(&key.zone_key))
                })
                .collect()
        };
        if targets.is_empty() {
            return summary;
        }
        let readings = self.read_counts(targets, &mut summary).await;

        let creates = {
            let mut state = self.state.lock().expect("aggr state lock");
            self.apply_fast_path(&mut state, readings, &mut summary)
        };
        for key in creates {
            self.trigger(&key, &mut summary).await;
        }
        summary
    }

    fn apply_fast_path(
        &self,
        state: &mut AggrState,
        readings: Vec<(AppZoneKey, u64)>,
        summary: &mut IterSummary,
    ) -> Vec<AppZoneKey> {
        let mut creates = Vec::new();
        for (key, count) in readings {
            let Some(app) = state.apps.get_mut(&key.app_key) else {
                continue;
            };
            // Not yet baselined by a periodic pass.
            let Some(pending) = app.zones.get(&key.zone_key).and_then(|s| s.pending(count)) else {
                continue;
            };
            if self.caches.has_live_app_inst(&key) {
                summary.already_live += 1;
                continue;
            }
            for (name, policy) in app.policies.iter_mut() {
                let th = policy.thresholds;
                let Some(tracker) = policy.zone_trackers.get_mut(&key.zone_key) else {
                    continue;
                };
                if tracker.evaluate_fast_path(pending, &th) {
                    summary.satisfied += 1;
                    info!(
                        app = %key.app_key,
                        zone = %key.zone_key,
                        policy = %name,
                        pending,
                        "fast-path deploy threshold met"
                    );
                    if !creates.contains(&key) {
                        creates.push(key.clone());
                    }
                }
            }
        }
        creates
    }

    async fn trigger(&self, key: &AppZoneKey, summary: &mut IterSummary) {
        info!(app = %key.app_key, zone = %key.zone_key, "auto-provisioning app instance");
        match self.sink.create_app_inst(&key.app_key, &key.zone_key).await {
            Ok(()) => summary.created += 1,
            Err(e) => {
                summary.create_failures += 1;
                warn!(
                    app = %key.app_key,
                    zone = %key.zone_key,
                    error = %e,
                    "auto-provision create failed"
                );
            }
        }
    }
}

/// Tracking state of one app, for the API.
#[derive(Debug, Clone, Serialize)]
pub struct AppDemandReport {
    pub app_key: AppKey,
    pub zones: Vec<ZoneReport>,
    pub policies: Vec<PolicyReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ZoneReport {
    pub zone_key: ZoneKey,
    pub count: u64,
    pub last_count: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PolicyReport {
    pub name: String,
    pub deploy_client_count: u32,
    pub deploy_interval_count: u32,
    pub undeploy_client_count: u32,
    pub undeploy_interval_count: u32,
    pub zones: Vec<ZoneTrackerReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ZoneTrackerReport {
    pub zone_key: ZoneKey,
    pub deploy_intervals_met: u32,
    pub undeploy_intervals_met: u32,
}

impl AppDemandReport {
    fn new(app_key: &AppKey, state: &AppDemandState) -> Self {
        Self {
            app_key: app_key.clone(),
            zones: state
                .zones
                .iter()
                .map(|(zone, stats)| ZoneReport {
                    zone_key: zone.clone(),
                    count: stats.count,
                    last_count: stats.last_count,
                })
                .collect(),
            policies: state
                .policies
                .iter()
                .map(|(name, policy)| PolicyReport {
                    name: name.clone(),
                    deploy_client_count: policy.thresholds.deploy_client_count,
                    deploy_interval_count: policy.thresholds.deploy_interval_count,
                    undeploy_client_count: policy.thresholds.undeploy_client_count,
                    undeploy_interval_count: policy.thresholds.undeploy_interval_count,
                    zones: policy
                        .zone_trackers
                        .iter()
                        .map(|(zone, t)| ZoneTrackerReport {
                            zone_key: zone.clone(),
                            deploy_intervals_met: t.deploy_intervals_met,
                            undeploy_intervals_met: t.undeploy_intervals_met,
                        })
                        .collect(),
                })
                .collect(),
        }
    }
}
