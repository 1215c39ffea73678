//! Klusterlet Works - hub-side lifecycle of the klusterlet ManifestWorks
//!
//! Every managed cluster gets two ManifestWorks in its namespace on the hub:
//! one carrying the klusterlet CRDs and one carrying the klusterlet install
//! manifests. Both are built from the cluster's import secret. When the
//! managed cluster is deleted, the works have to be retired in a strict order
//! so the agent on the remote side can clean up after itself.
//!
//! # Modules
//!
//! - [`crd`] - Typed custom resources (ManifestWork, ManagedCluster, ManagedClusterAddOn)
//! - [`bundle`] - Manifest bundles, the import-secret builder, and name classification
//! - [`teardown`] - Staged deletion decision and execution, including the force path
//! - [`controller`] - Reconcile entry point and kube-backed collaborators
//! - [`events`] - Kubernetes Event publishing
//! - [`config`] - Controller tuning knobs
//! - [`yaml`] - YAML document decoding into structured JSON
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod bundle;
pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod events;
pub mod teardown;
pub mod yaml;

pub use error::Error;

// =============================================================================
// Well-known names
// =============================================================================
// These must match existing hub deployments exactly.

/// Suffix of the ManifestWork carrying the klusterlet CRDs
pub const CRDS_SUFFIX: &str = "crds";

/// Suffix of the ManifestWork carrying the klusterlet install manifests
pub const KLUSTERLET_SUFFIX: &str = "klusterlet";

/// Suffix of the per-cluster import secret
pub const IMPORT_SECRET_SUFFIX: &str = "import";

/// Label marking the two core klusterlet ManifestWorks
pub const KLUSTERLET_WORKS_LABEL: &str = "import.open-cluster-management.io/klusterlet-works";

/// Label selector for the core klusterlet ManifestWorks
pub const KLUSTERLET_WORKS_SELECTOR: &str =
    "import.open-cluster-management.io/klusterlet-works=true";

/// Finalizer kept on a ManagedCluster while it still has ManifestWorks
pub const MANIFEST_WORK_FINALIZER: &str =
    "cluster.open-cluster-management.io/manifest-work-cleanup";

/// Annotation selecting how the klusterlet is deployed for a cluster
pub const KLUSTERLET_DEPLOY_MODE_ANNOTATION: &str =
    "import.open-cluster-management.io/klusterlet-deploy-mode";

/// Controller name used as field manager and event reporter
pub const CONTROLLER_NAME: &str = "klusterlet-works-controller";
