//! ManagedCluster reconciliation
//!
//! The reconcile entry point plus the kube-backed implementations of the
//! collaborator traits it drives.

mod clients;
mod manifest_work;

pub use clients::{
    ClusterClient, KubeAddonRetirer, KubeClusterClient, KubeSecretSource, ManifestWorkStore,
    SecretPayloadSource,
};
pub use manifest_work::{error_policy, reconcile, Context, ContextBuilder};
