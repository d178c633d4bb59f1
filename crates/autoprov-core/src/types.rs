//! Shared types used across the auto-provisioning crates.
//!
//! Identity keys are immutable tuples used as map keys. Domain objects
//! (`App`, `AutoProvPolicy`, `AppInst`, ...) mirror the definitions that
//! the cache mirror replicates. Count messages are what the count
//! generator exports to the metrics pipeline.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Alert name that requests a cluster node count change.
pub const ALERT_CLUSTER_AUTO_SCALE: &str = "ClusterAutoScale";

/// Alert state for an active alert.
pub const ALERT_STATE_FIRING: &str = "firing";

/// Alert label carrying the cluster organization.
pub const LABEL_CLUSTER_ORG: &str = "clusterorg";
/// Alert label carrying the cluster name.
pub const LABEL_CLUSTER: &str = "cluster";
/// Alert label carrying the zone organization.
pub const LABEL_ZONE_ORG: &str = "zoneorg";
/// Alert label carrying the zone name.
pub const LABEL_ZONE: &str = "zone";

// ── Keys ──────────────────────────────────────────────────────────

/// Identity of an application definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AppKey {
    pub organization: String,
    pub name: String,
    pub version: String,
}

impl AppKey {
    pub fn new(organization: &str, name: &str, version: &str) -> Self {
        Self {
            organization: organization.to_string(),
            name: name.to_string(),
            version: version.to_string(),
        }
    }
}

impl fmt::Display for AppKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.organization, self.name, self.version)
    }
}

/// Identity of a deployment zone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ZoneKey {
    pub organization: String,
    pub name: String,
}

impl ZoneKey {
    pub fn new(organization: &str, name: &str) -> Self {
        Self {
            organization: organization.to_string(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for ZoneKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.organization, self.name)
    }
}

/// An (application, zone) pair, the unit demand is counted for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AppZoneKey {
    pub app_key: AppKey,
    pub zone_key: ZoneKey,
}

impl AppZoneKey {
    pub fn new(app_key: AppKey, zone_key: ZoneKey) -> Self {
        Self { app_key, zone_key }
    }
}

impl fmt::Display for AppZoneKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.app_key, self.zone_key)
    }
}

/// Identity of an auto-provisioning policy.
///
/// Apps reference policies by name; the organization is the app's.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PolicyKey {
    pub organization: String,
    pub name: String,
}

impl PolicyKey {
    pub fn new(organization: &str, name: &str) -> Self {
        Self {
            organization: organization.to_string(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for PolicyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.organization, self.name)
    }
}

// ── Definitions ───────────────────────────────────────────────────

/// Thresholds and target zones for automatic deployment of an app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoProvPolicy {
    pub key: PolicyKey,
    /// New clients per interval needed for the interval to qualify.
    pub deploy_client_count: u32,
    /// Consecutive qualifying intervals needed to deploy.
    pub deploy_interval_count: u32,
    /// Clients per interval at or below which an interval counts towards undeploy.
    #[serde(default)]
    pub undeploy_client_count: u32,
    /// Consecutive low-demand intervals before undeploy would be considered.
    #[serde(default)]
    pub undeploy_interval_count: u32,
    /// Zones the policy applies to.
    #[serde(default)]
    pub zones: Vec<ZoneKey>,
}

impl AutoProvPolicy {
    /// Whether the policy applies to the given zone.
    pub fn covers(&self, zone: &ZoneKey) -> bool {
        self.zones.iter().any(|z| z == zone)
    }

    /// Whether a single qualifying interval is enough to deploy.
    pub fn is_single_interval(&self) -> bool {
        self.deploy_interval_count <= 1
    }
}

/// An application definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct App {
    pub key: AppKey,
    /// Names of the auto-provisioning policies the app uses.
    #[serde(default)]
    pub auto_prov_policies: Vec<String>,
}

impl App {
    /// Resolve the app's policy names into policy keys.
    pub fn policy_keys(&self) -> Vec<PolicyKey> {
        self.auto_prov_policies
            .iter()
            .map(|name| PolicyKey::new(&self.key.organization, name))
            .collect()
    }

    /// Whether the app references the given policy.
    pub fn uses_policy(&self, key: &PolicyKey) -> bool {
        self.key.organization == key.organization
            && self.auto_prov_policies.iter().any(|p| *p == key.name)
    }
}

/// Lifecycle state of an application instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppInstState {
    Creating,
    Ready,
    Deleting,
    Error,
}

/// An application instance running in a zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppInst {
    pub app_key: AppKey,
    pub zone_key: ZoneKey,
    pub state: AppInstState,
    /// Whether the instance was created by auto-provisioning.
    #[serde(default)]
    pub auto_provisioned: bool,
    /// Unix timestamp (milliseconds) of creation.
    #[serde(default)]
    pub created_at: u64,
}

impl AppInst {
    pub fn key(&self) -> AppZoneKey {
        AppZoneKey::new(self.app_key.clone(), self.zone_key.clone())
    }

    /// A live instance is one being created or serving.
    pub fn is_live(&self) -> bool {
        matches!(self.state, AppInstState::Creating | AppInstState::Ready)
    }
}

/// Identity of a cluster instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClusterInstKey {
    pub organization: String,
    pub name: String,
    pub zone_key: ZoneKey,
}

impl fmt::Display for ClusterInstKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.organization, self.name, self.zone_key)
    }
}

/// A cluster instance, scaled by alerts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterInst {
    pub key: ClusterInstKey,
    pub num_nodes: u32,
}

/// An alert raised by the monitoring pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub state: String,
    #[serde(default)]
    pub value: f64,
}

impl Alert {
    /// Alerts are identified by name plus their full label set.
    pub fn key(&self) -> String {
        let labels: Vec<String> = self
            .labels
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        format!("{}{{{}}}", self.name, labels.join(","))
    }

    pub fn is_firing(&self) -> bool {
        self.state == ALERT_STATE_FIRING
    }

    /// The cluster instance named by the alert's labels, if complete.
    pub fn cluster_inst_key(&self) -> Option<ClusterInstKey> {
        Some(ClusterInstKey {
            organization: self.labels.get(LABEL_CLUSTER_ORG)?.clone(),
            name: self.labels.get(LABEL_CLUSTER)?.clone(),
            zone_key: ZoneKey {
                organization: self.labels.get(LABEL_ZONE_ORG)?.clone(),
                name: self.labels.get(LABEL_ZONE)?.clone(),
            },
        })
    }
}

// ── Count messages ────────────────────────────────────────────────

/// Cumulative demand for one (app, zone) as seen by one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoProvCount {
    pub app_key: AppKey,
    pub zone_key: ZoneKey,
    /// Cumulative count since the reporting node started.
    pub count: u64,
    /// Set on fast-path messages that ask for an early evaluation.
    #[serde(default)]
    pub process_now: bool,
}

impl AutoProvCount {
    pub fn key(&self) -> AppZoneKey {
        AppZoneKey::new(self.app_key.clone(), self.zone_key.clone())
    }
}

/// A batch of counts exported by one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoProvCounts {
    /// Name of the node that produced the counts.
    pub node_name: String,
    /// Unix timestamp (milliseconds) when the batch was built.
    pub timestamp: u64,
    pub counts: Vec<AutoProvCount>,
}
