//! Kubernetes-backed collaborators
//!
//! Thin adapters from the collaborator traits onto kube-rs typed APIs.
//! Everything here is namespaced by managed cluster name.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::Client;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::bundle::{ImportPayload, ManifestBundle};
use crate::crd::{ManagedCluster, ManagedClusterAddOn, ManifestWork};
use crate::teardown::{AddonRetirer, BundleStore};
use crate::{Error, CONTROLLER_NAME};

/// Reads the import payload for a managed cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SecretPayloadSource: Send + Sync {
    /// Read and validate the import secret `name` in `namespace`
    ///
    /// `Ok(None)` means the secret has not been generated yet.
    async fn import_payload(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ImportPayload>, Error>;
}

/// Finalizer bookkeeping on ManagedCluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Add a finalizer to a ManagedCluster, no-op if present
    async fn add_finalizer(&self, cluster_name: &str, finalizer: &str) -> Result<(), Error>;

    /// Remove a finalizer from a ManagedCluster, no-op if absent
    async fn remove_finalizer(&self, cluster_name: &str, finalizer: &str) -> Result<(), Error>;
}

fn is_status(e: &kube::Error, code: u16) -> bool {
    matches!(e, kube::Error::Api(ae) if ae.code == code)
}

/// ManifestWork-backed bundle store
pub struct ManifestWorkStore {
    client: Client,
}

impl ManifestWorkStore {
    /// Create a new ManifestWorkStore wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<ManifestWork> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl BundleStore for ManifestWorkStore {
    async fn list(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<ManifestBundle>, Error> {
        let mut params = ListParams::default();
        if !label_selector.is_empty() {
            params = params.labels(label_selector);
        }
        let works = self.api(namespace).list(&params).await?;
        Ok(works.items.into_iter().map(ManifestBundle::from).collect())
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<Option<ManifestBundle>, Error> {
        Ok(self.api(namespace).get_opt(name).await?.map(ManifestBundle::from))
    }

    async fn create(&self, bundle: &ManifestBundle) -> Result<(), Error> {
        let params = PostParams {
            field_manager: Some(CONTROLLER_NAME.to_string()),
            ..Default::default()
        };
        match self
            .api(&bundle.namespace)
            .create(&params, &bundle.to_manifest_work())
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_status(&e, 409) => {
                debug!(bundle = %bundle.name, "ManifestWork already exists");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), Error> {
        match self.api(namespace).delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) if is_status(&e, 404) => Err(Error::not_found("ManifestWork", name)),
            Err(e) => Err(e.into()),
        }
    }

    async fn force_delete(&self, namespace: &str, name: &str) -> Result<(), Error> {
        self.delete(namespace, name).await?;

        // the work agent is not around to clear its finalizer
        let patch = serde_json::json!({
            "metadata": {
                "finalizers": null
            }
        });
        match self
            .api(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_status(&e, 404) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Retires ManagedClusterAddOns in the cluster namespace
pub struct KubeAddonRetirer {
    client: Client,
}

impl KubeAddonRetirer {
    /// Create a new KubeAddonRetirer wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AddonRetirer for KubeAddonRetirer {
    async fn retire_all(&self, cluster: &str) -> Result<(), Error> {
        let api: Api<ManagedClusterAddOn> = Api::namespaced(self.client.clone(), cluster);
        match api
            .delete_collection(&DeleteParams::default(), &ListParams::default())
            .await
        {
            Ok(_) => Ok(()),
            // addon CRD not installed on this hub
            Err(e) if is_status(&e, 404) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn none_remaining(&self, cluster: &str) -> Result<bool, Error> {
        let api: Api<ManagedClusterAddOn> = Api::namespaced(self.client.clone(), cluster);
        match api.list(&ListParams::default().limit(1)).await {
            Ok(addons) => Ok(addons.items.is_empty()),
            Err(e) if is_status(&e, 404) => Ok(true),
            Err(e) => Err(e.into()),
        }
    }
}

/// Reads import secrets through the kube API
pub struct KubeSecretSource {
    client: Client,
}

impl KubeSecretSource {
    /// Create a new KubeSecretSource wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SecretPayloadSource for KubeSecretSource {
    async fn import_payload(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ImportPayload>, Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name)
            .await?
            .map(|secret| ImportPayload::from_secret(&secret))
            .transpose()
    }
}

/// Patches finalizers on ManagedClusters
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    /// Create a new KubeClusterClient wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn add_finalizer(&self, cluster_name: &str, finalizer: &str) -> Result<(), Error> {
        let api: Api<ManagedCluster> = Api::all(self.client.clone());

        let cluster = api.get(cluster_name).await?;
        let mut finalizers = cluster.metadata.finalizers.unwrap_or_default();
        if finalizers.iter().any(|f| f == finalizer) {
            return Ok(());
        }
        finalizers.push(finalizer.to_string());

        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers
            }
        });
        api.patch(
            cluster_name,
            &PatchParams::apply(CONTROLLER_NAME),
            &Patch::Merge(&patch),
        )
        .await?;
        Ok(())
    }

    async fn remove_finalizer(&self, cluster_name: &str, finalizer: &str) -> Result<(), Error> {
        let api: Api<ManagedCluster> = Api::all(self.client.clone());

        let Some(cluster) = api.get_opt(cluster_name).await? else {
            return Ok(());
        };
        let current = cluster.metadata.finalizers.unwrap_or_default();
        if !current.iter().any(|f| f == finalizer) {
            return Ok(());
        }
        let finalizers: Vec<String> = current.into_iter().filter(|f| f != finalizer).collect();

        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers
            }
        });
        api.patch(
            cluster_name,
            &PatchParams::apply(CONTROLLER_NAME),
            &Patch::Merge(&patch),
        )
        .await?;
        Ok(())
    }
}
