//! Policy lookup for counting.

use autoprov_core::{AppKey, AutoProvPolicy, ZoneKey};
use autoprov_state::CacheData;

/// The policy that decides fast-path behavior for (app, zone).
///
/// Among the app's policies covering the zone, the one that deploys
/// soonest wins: fewest intervals, then fewest clients.
pub fn governing_policy(
    caches: &CacheData,
    app_key: &AppKey,
    zone_key: &ZoneKey,
) -> Option<AutoProvPolicy> {
    let app = caches.apps.get(app_key)?;
    app.policy_keys()
        .iter()
        .filter_map(|key| caches.policies.get(key))
        .filter(|policy| policy.covers(zone_key))
        .min_by_key(|policy| (policy.deploy_interval_count.max(1), policy.deploy_client_count))
}
