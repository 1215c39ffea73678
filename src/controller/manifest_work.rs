//! Klusterlet ManifestWork controller
//!
//! Reconciles one ManagedCluster at a time: creates the two klusterlet works
//! from the import secret while the cluster lives, keeps the manifest-work
//! cleanup finalizer in step with the works in the cluster namespace, and runs
//! the staged teardown once the cluster is deleted.

use std::sync::Arc;

use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Client, Resource, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use super::clients::{
    ClusterClient, KubeAddonRetirer, KubeClusterClient, KubeSecretSource, ManifestWorkStore,
    SecretPayloadSource,
};
use crate::bundle::{build_bundles, import_secret_name, ManifestBundle};
use crate::config::ControllerConfig;
use crate::crd::{KlusterletDeployMode, ManagedCluster};
use crate::events::{actions, reasons, EventPublisher, KubeEventPublisher};
use crate::teardown::{AddonRetirer, BundleStore, StagedTeardown, Target};
use crate::{Error, CONTROLLER_NAME, MANIFEST_WORK_FINALIZER};

/// Shared state for the reconciler
///
/// Use [`Context::builder`] to construct:
/// ```ignore
/// let ctx = Context::builder(client)
///     .config(ControllerConfig::default())
///     .build();
/// ```
pub struct Context {
    /// ManifestWork storage
    pub store: Arc<dyn BundleStore>,
    /// Import secret reader
    pub secrets: Arc<dyn SecretPayloadSource>,
    /// ManagedCluster finalizer bookkeeping
    pub clusters: Arc<dyn ClusterClient>,
    /// Event sink
    pub events: Arc<dyn EventPublisher>,
    /// Teardown wired to the store, the addon retirer and the event sink
    pub teardown: StagedTeardown,
    /// Timing configuration
    pub config: ControllerConfig,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(client: Client) -> ContextBuilder {
        ContextBuilder::new(client)
    }

    /// Create a context for testing with custom mock collaborators
    #[cfg(test)]
    pub fn for_testing(
        store: Arc<dyn BundleStore>,
        addons: Arc<dyn AddonRetirer>,
        secrets: Arc<dyn SecretPayloadSource>,
        clusters: Arc<dyn ClusterClient>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self::assemble(store, addons, secrets, clusters, events, ControllerConfig::default())
    }

    fn assemble(
        store: Arc<dyn BundleStore>,
        addons: Arc<dyn AddonRetirer>,
        secrets: Arc<dyn SecretPayloadSource>,
        clusters: Arc<dyn ClusterClient>,
        events: Arc<dyn EventPublisher>,
        config: ControllerConfig,
    ) -> Self {
        let teardown = StagedTeardown::new(store.clone(), addons, events.clone())
            .with_convergence_delay(config.convergence_delay);
        Self {
            store,
            secrets,
            clusters,
            events,
            teardown,
            config,
        }
    }
}

/// Builder for [`Context`]
///
/// Every collaborator defaults to the kube-backed implementation.
pub struct ContextBuilder {
    client: Client,
    store: Option<Arc<dyn BundleStore>>,
    addons: Option<Arc<dyn AddonRetirer>>,
    secrets: Option<Arc<dyn SecretPayloadSource>>,
    clusters: Option<Arc<dyn ClusterClient>>,
    events: Option<Arc<dyn EventPublisher>>,
    config: ControllerConfig,
}

impl ContextBuilder {
    fn new(client: Client) -> Self {
        Self {
            client,
            store: None,
            addons: None,
            secrets: None,
            clusters: None,
            events: None,
            config: ControllerConfig::default(),
        }
    }

    /// Set the timing configuration
    pub fn config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    /// Override the bundle store
    pub fn store(mut self, store: Arc<dyn BundleStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Override the addon retirer
    pub fn addons(mut self, addons: Arc<dyn AddonRetirer>) -> Self {
        self.addons = Some(addons);
        self
    }

    /// Override the import secret reader
    pub fn secrets(mut self, secrets: Arc<dyn SecretPayloadSource>) -> Self {
        self.secrets = Some(secrets);
        self
    }

    /// Override the ManagedCluster client
    pub fn clusters(mut self, clusters: Arc<dyn ClusterClient>) -> Self {
        self.clusters = Some(clusters);
        self
    }

    /// Override the event publisher
    pub fn events(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = Some(events);
        self
    }

    /// Build the Context
    pub fn build(self) -> Context {
        let client = self.client;
        Context::assemble(
            self.store
                .unwrap_or_else(|| Arc::new(ManifestWorkStore::new(client.clone()))),
            self.addons
                .unwrap_or_else(|| Arc::new(KubeAddonRetirer::new(client.clone()))),
            self.secrets
                .unwrap_or_else(|| Arc::new(KubeSecretSource::new(client.clone()))),
            self.clusters
                .unwrap_or_else(|| Arc::new(KubeClusterClient::new(client.clone()))),
            self.events
                .unwrap_or_else(|| Arc::new(KubeEventPublisher::new(client.clone(), CONTROLLER_NAME))),
            self.config,
        )
    }
}

/// Reconcile the klusterlet works of a ManagedCluster
///
/// Hosted clusters are skipped. While the cluster lives, missing core works
/// are created from the import secret. Once it is deleted, one teardown pass
/// runs and its requeue hint becomes the returned action.
#[instrument(skip(cluster, ctx), fields(cluster = %cluster.name_any()))]
pub async fn reconcile(cluster: Arc<ManagedCluster>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = cluster.name_any();

    if cluster.deploy_mode() != KlusterletDeployMode::Default {
        debug!("klusterlet is hosted, skipping");
        return Ok(Action::await_change());
    }

    let bundles = ctx.store.list(&name, "").await?;
    debug!(works = bundles.len(), deleting = cluster.is_deleting(), "reconciling cluster");

    if cluster.is_deleting() {
        if bundles.is_empty() {
            if cluster.has_manifest_work_finalizer() {
                info!("all ManifestWorks are gone, removing finalizer");
                ctx.clusters
                    .remove_finalizer(&name, MANIFEST_WORK_FINALIZER)
                    .await?;
            }
            return Ok(Action::await_change());
        }

        let target = Target::from_cluster(&cluster);
        let outcome = ctx.teardown.run(&target, &bundles).await?;
        return Ok(match outcome.requeue_after {
            Some(after) => Action::requeue(after),
            None => Action::await_change(),
        });
    }

    // stored works need the finalizer whatever state the import secret is in
    let mut has_finalizer = cluster.has_manifest_work_finalizer();
    if !bundles.is_empty() && !has_finalizer {
        ctx.clusters
            .add_finalizer(&name, MANIFEST_WORK_FINALIZER)
            .await?;
        has_finalizer = true;
    }

    let missing = missing_bundles(&cluster, &ctx).await?;

    if bundles.is_empty() && missing.is_empty() {
        if has_finalizer {
            ctx.clusters
                .remove_finalizer(&name, MANIFEST_WORK_FINALIZER)
                .await?;
        }
        return Ok(Action::await_change());
    }

    if !has_finalizer {
        ctx.clusters
            .add_finalizer(&name, MANIFEST_WORK_FINALIZER)
            .await?;
    }

    if !missing.is_empty() {
        for bundle in &missing {
            ctx.store.create(bundle).await?;
        }
        let names: Vec<&str> = missing.iter().map(|b| b.name.as_str()).collect();
        info!(works = ?names, "created klusterlet works");
        ctx.events
            .publish(
                &cluster.object_ref(&()),
                EventType::Normal,
                reasons::WORKS_CREATED,
                actions::APPLY,
                Some(format!("created ManifestWorks {}", names.join(", "))),
            )
            .await;
    }

    Ok(Action::await_change())
}

/// Core works built from the import secret that are not stored yet
async fn missing_bundles(
    cluster: &ManagedCluster,
    ctx: &Context,
) -> Result<Vec<ManifestBundle>, Error> {
    let name = cluster.name_any();
    let secret_name = import_secret_name(&name);

    let built = match ctx.secrets.import_payload(&name, &secret_name).await {
        Ok(Some(payload)) => build_bundles(&name, cluster.crd_schema(), &payload),
        Ok(None) => {
            debug!(secret = %secret_name, "import secret not generated yet");
            return Ok(Vec::new());
        }
        Err(e) => Err(e),
    };

    let built = match built {
        Ok(built) => built,
        Err(e) => {
            if !e.is_retryable() {
                ctx.events
                    .publish(
                        &cluster.object_ref(&()),
                        EventType::Warning,
                        reasons::IMPORT_SECRET_INVALID,
                        actions::APPLY,
                        Some(e.to_string()),
                    )
                    .await;
            }
            return Err(e);
        }
    };

    let mut missing = Vec::new();
    for bundle in built.into_vec() {
        if ctx.store.get(&bundle.namespace, &bundle.name).await?.is_none() {
            missing.push(bundle);
        }
    }
    Ok(missing)
}

/// Requeue retryable errors after a short delay, otherwise wait for the
/// ManagedCluster or its import secret to change
pub fn error_policy(cluster: Arc<ManagedCluster>, error: &Error, ctx: Arc<Context>) -> Action {
    if error.is_retryable() {
        warn!(
            ?error,
            cluster = %cluster.name_any(),
            "reconciliation failed, retrying"
        );
        Action::requeue(ctx.config.error_requeue)
    } else {
        error!(
            ?error,
            cluster = %cluster.name_any(),
            "reconciliation failed, waiting for a change"
        );
        Action::await_change()
    }
}
