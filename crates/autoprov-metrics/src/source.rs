//! Read side of the metrics store.

use std::future::Future;
use std::sync::Arc;

use autoprov_core::{AppKey, ZoneKey};
use autoprov_state::StateStore;

use crate::error::MetricsResult;

/// Answers "what is the cumulative demand for (app, zone) now?".
///
/// Implementations must return a non-decreasing value for a given
/// pair, and 0 for a pair nobody has reported yet.
pub trait CountSource: Send + Sync + 'static {
    fn get_count(
        &self,
        app_key: &AppKey,
        zone_key: &ZoneKey,
    ) -> impl Future<Output = MetricsResult<u64>> + Send;
}

impl CountSource for StateStore {
    async fn get_count(&self, app_key: &AppKey, zone_key: &ZoneKey) -> MetricsResult<u64> {
        Ok(StateStore::get_count(self, app_key, zone_key)?)
    }
}

impl<T: CountSource> CountSource for Arc<T> {
    fn get_count(
        &self,
        app_key: &AppKey,
        zone_key: &ZoneKey,
    ) -> impl Future<Output = MetricsResult<u64>> + Send {
        self.as_ref().get_count(app_key, zone_key)
    }
}
