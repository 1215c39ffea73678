//! ManifestWork Custom Resource Definition
//!
//! A ManifestWork lives in a managed cluster's namespace on the hub and lists
//! the manifests the work agent applies on that cluster. Only the fields this
//! controller reads or writes are modelled.

use kube::CustomResource;
use schemars::gen::SchemaGenerator;
use schemars::schema::Schema;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Specification for a ManifestWork
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "work.open-cluster-management.io",
    version = "v1",
    kind = "ManifestWork",
    plural = "manifestworks",
    namespaced,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ManifestWorkSpec {
    /// Manifests to apply on the managed cluster
    #[serde(default)]
    pub workload: ManifestsTemplate,

    /// How applied resources are treated when this work is deleted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_option: Option<DeleteOption>,
}

/// The manifests carried by a ManifestWork
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ManifestsTemplate {
    /// Raw manifest objects, in apply order
    #[serde(default)]
    #[schemars(schema_with = "manifest_list_schema")]
    pub manifests: Vec<serde_json::Value>,
}

/// Delete behaviour for resources applied from a ManifestWork
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeleteOption {
    /// Propagation policy applied when the work is deleted
    pub propagation_policy: DeletePropagationPolicy,
}

/// Propagation policy for applied resources
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum DeletePropagationPolicy {
    /// Applied resources are deleted with the work
    #[default]
    Foreground,
    /// Applied resources are left running on the managed cluster
    Orphan,
    /// Only selected resources are orphaned
    SelectivelyOrphan,
}

impl std::fmt::Display for DeletePropagationPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Foreground => write!(f, "Foreground"),
            Self::Orphan => write!(f, "Orphan"),
            Self::SelectivelyOrphan => write!(f, "SelectivelyOrphan"),
        }
    }
}

/// Manifests are arbitrary Kubernetes objects, so the schema keeps unknown fields.
fn manifest_list_schema(_: &mut SchemaGenerator) -> Schema {
    serde_json::from_value(serde_json::json!({
        "type": "array",
        "items": {
            "type": "object",
            "x-kubernetes-preserve-unknown-fields": true
        }
    }))
    .unwrap_or(Schema::Bool(true))
}
