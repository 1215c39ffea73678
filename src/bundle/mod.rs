//! Manifest bundles
//!
//! A [`ManifestBundle`] is the controller's view of one ManifestWork: a named
//! list of manifests in a cluster namespace plus the delete propagation policy.
//! The core logic works on bundles only; conversion to and from the
//! ManifestWork resource happens at the store boundary.

mod builder;
mod selector;

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;

use crate::crd::{
    DeleteOption, DeletePropagationPolicy, ManifestWork, ManifestWorkSpec, ManifestsTemplate,
};
use crate::{CRDS_SUFFIX, IMPORT_SECRET_SUFFIX, KLUSTERLET_SUFFIX, KLUSTERLET_WORKS_LABEL};

pub use builder::{build_bundles, CrdSchema, ImportPayload, KlusterletBundles};
pub use selector::{classify, BundleClass};

/// One unit of declarative work applied to a managed cluster
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ManifestBundle {
    /// Bundle name, unique within the namespace
    pub name: String,
    /// Namespace, equal to the managed cluster name
    pub namespace: String,
    /// Labels on the stored object
    pub labels: BTreeMap<String, String>,
    /// Manifests in apply order
    pub payload: Vec<serde_json::Value>,
    /// What happens to applied resources when the bundle is deleted
    pub delete_propagation: DeletePropagationPolicy,
    /// Finalizers on the stored object
    pub finalizers: Vec<String>,
    /// Whether the stored object already has a deletion timestamp
    pub deleting: bool,
}

impl ManifestBundle {
    /// Create an empty bundle with the given name and namespace
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    /// Whether the bundle carries the core klusterlet works label
    pub fn is_core(&self) -> bool {
        self.labels
            .get(KLUSTERLET_WORKS_LABEL)
            .is_some_and(|v| v == "true")
    }

    /// Classify this bundle relative to the target it belongs to
    pub fn class(&self, target: &str) -> BundleClass {
        classify(target, &self.namespace, &self.name)
    }

    /// Render the bundle as a ManifestWork for the API server
    ///
    /// Foreground propagation is the API default, so only Orphan is written.
    pub fn to_manifest_work(&self) -> ManifestWork {
        let delete_option = match self.delete_propagation {
            DeletePropagationPolicy::Foreground => None,
            policy => Some(DeleteOption {
                propagation_policy: policy,
            }),
        };

        ManifestWork {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                namespace: Some(self.namespace.clone()),
                labels: (!self.labels.is_empty()).then(|| self.labels.clone()),
                ..Default::default()
            },
            spec: ManifestWorkSpec {
                workload: ManifestsTemplate {
                    manifests: self.payload.clone(),
                },
                delete_option,
            },
        }
    }
}

impl From<ManifestWork> for ManifestBundle {
    fn from(work: ManifestWork) -> Self {
        let name = work.name_any();
        let namespace = work.namespace().unwrap_or_default();
        let labels = work.labels().clone();
        let finalizers = work.finalizers().to_vec();
        let deleting = work.metadata.deletion_timestamp.is_some();
        let delete_propagation = work
            .spec
            .delete_option
            .map(|o| o.propagation_policy)
            .unwrap_or_default();

        Self {
            name,
            namespace,
            labels,
            payload: work.spec.workload.manifests,
            delete_propagation,
            finalizers,
            deleting,
        }
    }
}

/// Name of the bundle carrying the klusterlet CRDs: `<cluster>-crds`
pub fn crds_bundle_name(cluster: &str) -> String {
    format!("{}-{}", cluster, CRDS_SUFFIX)
}

/// Name of the bundle carrying the klusterlet install manifests: `<cluster>-klusterlet`
pub fn klusterlet_bundle_name(cluster: &str) -> String {
    format!("{}-{}", cluster, KLUSTERLET_SUFFIX)
}

/// Name of the import secret in the cluster namespace: `<cluster>-import`
pub fn import_secret_name(cluster: &str) -> String {
    format!("{}-{}", cluster, IMPORT_SECRET_SUFFIX)
}

/// Labels carried by both core bundles
pub(crate) fn core_labels() -> BTreeMap<String, String> {
    BTreeMap::from([(KLUSTERLET_WORKS_LABEL.to_string(), "true".to_string())])
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

    #[test]
    fn test_well_known_names() {
        assert_eq!(crds_bundle_name("t1"), "t1-crds");
        assert_eq!(klusterlet_bundle_name("t1"), "t1-klusterlet");
        assert_eq!(import_secret_name("t1"), "t1-import");
    }

    #[test]
    fn test_orphan_bundle_survives_manifest_work_conversion() {
        let bundle = ManifestBundle {
            name: "t1-klusterlet".to_string(),
            namespace: "t1".to_string(),
            labels: core_labels(),
            payload: vec![serde_json::json!({"kind": "Namespace"})],
            delete_propagation: DeletePropagationPolicy::Orphan,
            ..Default::default()
        };

        let work = bundle.to_manifest_work();
        assert_eq!(work.metadata.namespace.as_deref(), Some("t1"));
        assert_eq!(
            work.spec.delete_option.as_ref().map(|o| o.propagation_policy),
            Some(DeletePropagationPolicy::Orphan)
        );

        assert_eq!(ManifestBundle::from(work), bundle);
    }

    #[test]
    fn test_foreground_bundle_has_no_delete_option() {
        let bundle = ManifestBundle::new("t1-crds", "t1");
        let work = bundle.to_manifest_work();
        assert!(work.spec.delete_option.is_none());
        assert!(work.metadata.labels.is_none());
    }

    #[test]
    fn test_stored_state_is_captured() {
        let mut work = ManifestBundle::new("addon-foo-deploy", "t1").to_manifest_work();
        work.metadata.finalizers = Some(vec!["cluster.open-cluster-management.io/manifest-work-cleanup".to_string()]);
        work.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));

        let bundle = ManifestBundle::from(work);
        assert!(bundle.deleting);
        assert_eq!(bundle.finalizers.len(), 1);
        assert!(!bundle.is_core());
    }

    #[test]
    fn test_core_label_detection() {
        let mut bundle = ManifestBundle::new("t1-crds", "t1");
        assert!(!bundle.is_core());
        bundle.labels = core_labels();
        assert!(bundle.is_core());
    }
}
