//! Build the two klusterlet bundles from an import secret
//!
//! The import secret holds the klusterlet CRDs in two schema versions and the
//! klusterlet install manifests as one multi-document YAML. Building is a pure
//! transformation; creating the resulting ManifestWorks is the caller's job.

use k8s_openapi::api::core::v1::Secret;
use tracing::debug;

use super::{core_labels, crds_bundle_name, klusterlet_bundle_name, ManifestBundle};
use crate::crd::DeletePropagationPolicy;
use crate::yaml;
use crate::Error;

/// Secret key holding the `apiextensions.k8s.io/v1` CRDs
pub const CRDS_V1_KEY: &str = "crdsv1.yaml";

/// Secret key holding the `apiextensions.k8s.io/v1beta1` CRDs
pub const CRDS_V1BETA1_KEY: &str = "crdsv1beta1.yaml";

/// Secret key holding the klusterlet install manifests
pub const IMPORT_KEY: &str = "import.yaml";

/// CustomResourceDefinition schema version a managed cluster can serve
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CrdSchema {
    /// `apiextensions.k8s.io/v1` (Kubernetes 1.16+)
    #[default]
    V1,
    /// `apiextensions.k8s.io/v1beta1` (older clusters)
    V1beta1,
}

impl CrdSchema {
    /// Import secret key holding the CRDs for this schema
    pub fn secret_key(self) -> &'static str {
        match self {
            Self::V1 => CRDS_V1_KEY,
            Self::V1beta1 => CRDS_V1BETA1_KEY,
        }
    }
}

/// Raw documents extracted from an import secret
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImportPayload {
    /// CRDs as `apiextensions.k8s.io/v1`
    pub crds_v1: Vec<u8>,
    /// CRDs as `apiextensions.k8s.io/v1beta1`
    pub crds_v1beta1: Vec<u8>,
    /// Klusterlet install manifests, possibly several documents
    pub import: Vec<u8>,
}

impl ImportPayload {
    /// Extract and validate the payload from an import secret
    ///
    /// All three keys must be present and non-empty.
    pub fn from_secret(secret: &Secret) -> Result<Self, Error> {
        let data = secret.data.as_ref();
        let field = |key: &str| -> Result<Vec<u8>, Error> {
            data.and_then(|d| d.get(key))
                .map(|v| v.0.clone())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| {
                    Error::validation(format!(
                        "import secret {} is missing {}",
                        secret.metadata.name.as_deref().unwrap_or("<unnamed>"),
                        key
                    ))
                })
        };

        Ok(Self {
            crds_v1: field(CRDS_V1_KEY)?,
            crds_v1beta1: field(CRDS_V1BETA1_KEY)?,
            import: field(IMPORT_KEY)?,
        })
    }

    /// CRD document for the given schema
    pub fn crds(&self, schema: CrdSchema) -> &[u8] {
        match schema {
            CrdSchema::V1 => &self.crds_v1,
            CrdSchema::V1beta1 => &self.crds_v1beta1,
        }
    }
}

/// The two core bundles for a managed cluster
#[derive(Clone, Debug, PartialEq)]
pub struct KlusterletBundles {
    /// `<cluster>-crds`
    pub crds: ManifestBundle,
    /// `<cluster>-klusterlet`, orphaned on delete
    pub klusterlet: ManifestBundle,
}

impl KlusterletBundles {
    /// Both bundles, CRDs first
    pub fn into_vec(self) -> Vec<ManifestBundle> {
        vec![self.crds, self.klusterlet]
    }
}

/// Build the CRD bundle and the install bundle for `cluster`
///
/// The install bundle is orphaned on delete: removing it from the hub must
/// not tear down the agent it already started on the managed cluster.
pub fn build_bundles(
    cluster: &str,
    schema: CrdSchema,
    payload: &ImportPayload,
) -> Result<KlusterletBundles, Error> {
    let crds_name = crds_bundle_name(cluster);
    let klusterlet_name = klusterlet_bundle_name(cluster);

    if schema == CrdSchema::V1beta1 {
        debug!(cluster = %cluster, "cluster does not serve CRD v1, using v1beta1 definitions");
    }

    let crd_doc = yaml::decode_single(payload.crds(schema))
        .map_err(|e| Error::payload_decode(&crds_name, e.to_string()))?;

    let install_docs = yaml::decode_documents(&payload.import)
        .map_err(|e| Error::payload_decode(&klusterlet_name, e.to_string()))?;
    if install_docs.is_empty() {
        return Err(Error::payload_decode(
            &klusterlet_name,
            "install document contains no manifests",
        ));
    }

    let crds = ManifestBundle {
        labels: core_labels(),
        payload: vec![crd_doc],
        ..ManifestBundle::new(crds_name, cluster)
    };

    let klusterlet = ManifestBundle {
        labels: core_labels(),
        payload: install_docs,
        delete_propagation: DeletePropagationPolicy::Orphan,
        ..ManifestBundle::new(klusterlet_name, cluster)
    };

    Ok(KlusterletBundles { crds, klusterlet })
}
