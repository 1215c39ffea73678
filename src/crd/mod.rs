//! Custom resources this controller works with
//!
//! None of these CRDs are owned by this controller; they are modelled here so
//! the kube client can read and write them with typed APIs.

mod addon;
mod managed_cluster;
mod manifest_work;
mod types;

pub use addon::{ManagedClusterAddOn, ManagedClusterAddOnSpec};
pub use managed_cluster::{
    KlusterletDeployMode, ManagedCluster, ManagedClusterSpec, ManagedClusterStatus,
    ManagedClusterVersion, CONDITION_AVAILABLE,
};
pub use manifest_work::{
    DeleteOption, DeletePropagationPolicy, ManifestWork, ManifestWorkSpec, ManifestsTemplate,
};
pub use types::{Condition, ConditionStatus};
