//! Reconcile tracking state against the cache mirror.
//!
//! All app and policy changes funnel into [`reconcile_app`], which
//! derives the desired tracking for one app from the caches and diffs it
//! into the current state. Callers hold the aggregator state lock.

use std::collections::BTreeMap;

use tracing::debug;

use autoprov_core::{App, AppKey, AutoProvPolicy};
use autoprov_state::CacheData;

use crate::tracker::{AppDemandState, PolicyTracker};

/// What reconciliation did to an app's tracking state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Added,
    Updated,
    Removed,
    Untracked,
}

/// Policies an app should be tracked with, or `None` if it should not
/// be tracked: it uses no policy, or one of its policies is unknown.
pub fn desired_policies(caches: &CacheData, app: &App) -> Option<Vec<AutoProvPolicy>> {
    if app.auto_prov_policies.is_empty() {
        return None;
    }
    app.policy_keys()
        .iter()
        .map(|key| caches.policies.get(key))
        .collect()
}

/// Bring the tracking state of one app in line with the caches.
pub fn reconcile_app(
    apps: &mut BTreeMap<AppKey, AppDemandState>,
    caches: &CacheData,
    app_key: &AppKey,
) -> SyncOutcome {
    let desired = caches
        .apps
        .get(app_key)
        .and_then(|app| desired_policies(caches, &app));

    let Some(policies) = desired else {
        return match apps.remove(app_key) {
            Some(_) => {
                debug!(app = %app_key, "app no longer tracked");
                SyncOutcome::Removed
            }
            None => SyncOutcome::Untracked,
        };
    };

    let added = !apps.contains_key(app_key);
    let state = apps.entry(app_key.clone()).or_default();
    state
        .policies
        .retain(|name, _| policies.iter().any(|p| p.key.name == *name));
    for policy in &policies {
        state
            .policies
            .entry(policy.key.name.clone())
            .and_modify(|tracker| tracker.sync(policy))
            .or_insert_with(|| PolicyTracker::from_policy(policy));
    }
    let pruned = state.prune_zones();

    debug!(
        app = %app_key,
        policies = state.policies.len(),
        pruned_zones = pruned,
        added,
        "app tracking reconciled"
    );
    if added {
        SyncOutcome::Added
    } else {
        SyncOutcome::Updated
    }
}

/// Reconcile every app in the caches and drop state for apps that are
/// gone. Returns the number of tracked apps.
pub fn reconcile_all(apps: &mut BTreeMap<AppKey, AppDemandState>, caches: &CacheData) -> usize {
    let stale: Vec<AppKey> = apps
        .keys()
        .filter(|key| !caches.apps.contains(key))
        .cloned()
        .collect();
    for key in stale {
        reconcile_app(apps, caches, &key);
    }
    for app in caches.apps.list() {
        reconcile_app(apps, caches, &app.key);
    }
    apps.len()
}
