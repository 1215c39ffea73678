//! ManagedCluster Custom Resource Definition
//!
//! A ManagedCluster is the hub's record of a remote cluster. The registration
//! agent keeps its status up to date; this controller only reads the status
//! and manages one finalizer.

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, ConditionStatus};
use crate::bundle::CrdSchema;
use crate::teardown::{ReachabilityOracle, Reachability};
use crate::{KLUSTERLET_DEPLOY_MODE_ANNOTATION, MANIFEST_WORK_FINALIZER};

/// Condition type the registration agent uses for cluster availability
pub const CONDITION_AVAILABLE: &str = "ManagedClusterConditionAvailable";

/// Oldest Kubernetes version that serves `apiextensions.k8s.io/v1`
const APIEXTENSIONS_V1_MIN: (u64, u64, u64) = (1, 16, 0);

/// Specification for a ManagedCluster
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "cluster.open-cluster-management.io",
    version = "v1",
    kind = "ManagedCluster",
    plural = "managedclusters",
    status = "ManagedClusterStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ManagedClusterSpec {
    /// Whether the hub accepts the cluster's registration
    #[serde(default)]
    pub hub_accepts_client: bool,

    /// Lease duration the registration agent renews within
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_duration_seconds: Option<i32>,
}

/// Status reported by the registration agent
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManagedClusterStatus {
    /// Current conditions
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Version information of the managed cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<ManagedClusterVersion>,
}

/// Version information of the managed cluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ManagedClusterVersion {
    /// Kubernetes version, e.g. `v1.29.3+k3s1`
    #[serde(default)]
    pub kubernetes: String,
}

/// How the klusterlet is deployed for a cluster
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum KlusterletDeployMode {
    /// Klusterlet runs on the managed cluster itself
    #[default]
    Default,
    /// Klusterlet runs on a separate hosting cluster
    Hosted,
}

impl ManagedCluster {
    /// Look up a status condition by type
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.status
            .as_ref()
            .and_then(|s| s.conditions.iter().find(|c| c.type_ == type_))
    }

    /// Reported Kubernetes version, if the agent has published one
    pub fn kubernetes_version(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.version.as_ref())
            .map(|v| v.kubernetes.as_str())
            .filter(|v| !v.is_empty())
    }

    /// Whether deletion has been requested
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Whether the manifest-work cleanup finalizer is present
    pub fn has_manifest_work_finalizer(&self) -> bool {
        self.finalizers()
            .iter()
            .any(|f| f == MANIFEST_WORK_FINALIZER)
    }

    /// Klusterlet deploy mode from the cluster annotation
    ///
    /// Anything other than `Hosted` is treated as `Default`.
    pub fn deploy_mode(&self) -> KlusterletDeployMode {
        match self.annotations().get(KLUSTERLET_DEPLOY_MODE_ANNOTATION) {
            Some(mode) if mode.eq_ignore_ascii_case("hosted") => KlusterletDeployMode::Hosted,
            _ => KlusterletDeployMode::Default,
        }
    }

    /// CRD schema the cluster can serve
    ///
    /// Clusters reporting a version older than 1.16 only understand
    /// `apiextensions.k8s.io/v1beta1`. Unknown or unparseable versions get v1.
    pub fn crd_schema(&self) -> CrdSchema {
        match self.kubernetes_version().and_then(parse_kube_version) {
            Some(v) if v < APIEXTENSIONS_V1_MIN => CrdSchema::V1beta1,
            _ => CrdSchema::V1,
        }
    }
}

impl ReachabilityOracle for ManagedCluster {
    /// A cluster is unavailable when its availability condition is False or
    /// Unknown. A cluster that never reported the condition is not considered
    /// unavailable.
    fn is_unavailable(&self) -> bool {
        matches!(
            self.condition(CONDITION_AVAILABLE).map(|c| &c.status),
            Some(ConditionStatus::False) | Some(ConditionStatus::Unknown)
        )
    }
}

impl ManagedCluster {
    /// Reachability verdict derived from the availability condition
    pub fn reachability(&self) -> Reachability {
        if self.is_unavailable() {
            Reachability::Unavailable
        } else {
            Reachability::Available
        }
    }
}

/// Parse `v1.15.3+abc` / `1.21.1-gke.1` into its numeric triple.
///
/// Pre-release and build suffixes are ignored; only the numbers decide
/// which schema a cluster serves.
fn parse_kube_version(raw: &str) -> Option<(u64, u64, u64)> {
    let trimmed = raw.trim().trim_start_matches('v');
    let version = semver::Version::parse(trimmed).ok()?;
    Some((version.major, version.minor, version.patch))
}
