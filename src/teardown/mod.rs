//! Staged teardown of a managed cluster's ManifestWorks
//!
//! When a managed cluster is deleted its works are retired in a fixed order:
//! addon works and addon objects first, then the klusterlet install work, then
//! the klusterlet CRDs work. Works the controller does not own block the
//! sequence until someone else removes them. If the cluster is unreachable
//! nothing on the remote side can react to the order, so every work is force
//! deleted at once.
//!
//! Each pass recomputes the next step from the current bundle set, so the
//! caller can simply re-run it after any failure.

mod decision;
mod force;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use tracing::{debug, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use crate::bundle::{crds_bundle_name, klusterlet_bundle_name, BundleClass, ManifestBundle};
use crate::crd::{ManagedCluster, ManagedClusterAddOn};
use crate::error::DeletionFailure;
use crate::events::{actions, reasons, EventPublisher};
use crate::Error;

pub use decision::{decide, pending_work, PendingWork, TeardownDecision};
pub use force::{delete_all, delete_bundle, force_delete_all, Deleted};

/// Default delay before re-checking addon convergence
pub const CONVERGENCE_DELAY: Duration = Duration::from_secs(10);

/// Externally computed reachability of a managed cluster
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Reachability {
    /// Reachable, or not yet known to be unreachable
    #[default]
    Available,
    /// The cluster stopped reporting; nothing on it will react to hub changes
    Unavailable,
}

/// Source of the reachability verdict for a target
pub trait ReachabilityOracle {
    /// Whether the target is known to be unreachable
    fn is_unavailable(&self) -> bool;
}

/// The managed cluster being onboarded or retired
#[derive(Clone, Debug, PartialEq)]
pub struct Target {
    /// Cluster name, also the namespace holding its works
    pub name: String,
    /// Reachability verdict
    pub reachability: Reachability,
    /// Whether removal has been requested
    pub deleting: bool,
    /// Object events are reported on
    pub object_ref: ObjectReference,
}

impl Target {
    /// Build a target by hand
    pub fn new(name: impl Into<String>, reachability: Reachability, deleting: bool) -> Self {
        let name = name.into();
        let object_ref = ObjectReference {
            api_version: Some(ManagedCluster::api_version(&()).to_string()),
            kind: Some(ManagedCluster::kind(&()).to_string()),
            name: Some(name.clone()),
            ..Default::default()
        };
        Self {
            name,
            reachability,
            deleting,
            object_ref,
        }
    }

    /// Derive the target from a ManagedCluster
    pub fn from_cluster(cluster: &ManagedCluster) -> Self {
        Self {
            name: cluster.name_any(),
            reachability: cluster.reachability(),
            deleting: cluster.is_deleting(),
            object_ref: cluster.object_ref(&()),
        }
    }
}

/// Storage of manifest bundles, one namespace per managed cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BundleStore: Send + Sync {
    /// List bundles in `namespace` matching `label_selector` (empty for all)
    async fn list(&self, namespace: &str, label_selector: &str)
        -> Result<Vec<ManifestBundle>, Error>;

    /// Fetch one bundle, `None` when it does not exist
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<ManifestBundle>, Error>;

    /// Create a bundle
    async fn create(&self, bundle: &ManifestBundle) -> Result<(), Error>;

    /// Request deletion of a bundle
    async fn delete(&self, namespace: &str, name: &str) -> Result<(), Error>;

    /// Delete a bundle and strip its finalizers so it goes away without the
    /// remote agent
    async fn force_delete(&self, namespace: &str, name: &str) -> Result<(), Error>;
}

/// Retirement of addon objects belonging to a managed cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AddonRetirer: Send + Sync {
    /// Request deletion of every addon object of `cluster`
    async fn retire_all(&self, cluster: &str) -> Result<(), Error>;

    /// Whether every addon object of `cluster` is gone
    async fn none_remaining(&self, cluster: &str) -> Result<bool, Error>;
}

/// Result of one teardown pass
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TeardownOutcome {
    /// Step that was taken
    pub decision: TeardownDecision,
    /// When the caller should run the teardown again, if on a timer
    pub requeue_after: Option<Duration>,
}

impl TeardownOutcome {
    fn new(decision: TeardownDecision) -> Self {
        Self {
            decision,
            requeue_after: None,
        }
    }

    fn requeue(decision: TeardownDecision, after: Duration) -> Self {
        Self {
            decision,
            requeue_after: Some(after),
        }
    }
}

/// Executes teardown decisions against the bundle store
pub struct StagedTeardown {
    store: Arc<dyn BundleStore>,
    addons: Arc<dyn AddonRetirer>,
    events: Arc<dyn EventPublisher>,
    convergence_delay: Duration,
}

impl StagedTeardown {
    /// Create a teardown with the default convergence delay
    pub fn new(
        store: Arc<dyn BundleStore>,
        addons: Arc<dyn AddonRetirer>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            store,
            addons,
            events,
            convergence_delay: CONVERGENCE_DELAY,
        }
    }

    /// Override the delay between addon convergence checks
    pub fn with_convergence_delay(mut self, delay: Duration) -> Self {
        self.convergence_delay = delay;
        self
    }

    /// Run one teardown pass for `target` given its current bundles.
    ///
    /// Store errors are returned as-is and nothing is retried here; the
    /// caller runs the pass again on its next trigger.
    #[instrument(skip(self, target, bundles), fields(cluster = %target.name, bundles = bundles.len()))]
    pub async fn run(
        &self,
        target: &Target,
        bundles: &[ManifestBundle],
    ) -> Result<TeardownOutcome, Error> {
        let addons_remaining = self.addons_remaining(target, bundles).await?;
        let decision = decide(target, bundles, addons_remaining, self.convergence_delay);
        debug!(decision = %decision, addons_remaining, "teardown decision");

        match decision {
            TeardownDecision::NoOp => Ok(TeardownOutcome::new(decision)),

            TeardownDecision::ForceDeleteAll => {
                let deleted = force_delete_all(self.store.as_ref(), bundles).await?;
                info!(deleted, "cluster unavailable, force deleted all works");
                self.publish(
                    target,
                    EventType::Warning,
                    reasons::WORKS_FORCE_DELETED,
                    actions::DELETE,
                    format!("cluster is unavailable, force deleted {deleted} ManifestWorks"),
                )
                .await;
                Ok(TeardownOutcome::new(decision))
            }

            TeardownDecision::DeleteNonCore => {
                // addon works are deleted even when the retirement request fails
                let retired = self.addons.retire_all(&target.name).await;

                let addon_bundles: Vec<ManifestBundle> = bundles
                    .iter()
                    .filter(|b| b.class(&target.name) == BundleClass::AddonBundle)
                    .cloned()
                    .collect();
                let deleted = delete_all(self.store.as_ref(), &addon_bundles).await;

                let mut failures = Vec::new();
                if let Err(e) = retired {
                    warn!(error = %e, "failed to retire addons");
                    failures.push(DeletionFailure {
                        name: format!("{}/{}", target.name, ManagedClusterAddOn::plural(&())),
                        message: e.to_string(),
                    });
                }
                let deleted = match deleted {
                    Ok(deleted) => deleted,
                    Err(Error::PartialDeletion { failures: batch }) => {
                        failures.extend(batch);
                        0
                    }
                    Err(e) => return Err(e),
                };
                Error::from_failures(failures)?;

                info!(deleted, "retiring addons");
                self.publish(
                    target,
                    EventType::Normal,
                    reasons::ADDONS_RETIRING,
                    actions::DELETE,
                    format!("deleting {deleted} addon ManifestWorks"),
                )
                .await;
                Ok(TeardownOutcome::requeue(decision, self.convergence_delay))
            }

            TeardownDecision::WaitForAddons(delay) => {
                self.addons.retire_all(&target.name).await?;
                debug!(?delay, "waiting for addons to be removed");
                Ok(TeardownOutcome::requeue(decision, delay))
            }

            TeardownDecision::WaitForOtherWork => {
                let others: Vec<&str> = bundles
                    .iter()
                    .filter(|b| b.class(&target.name) == BundleClass::Other)
                    .map(|b| b.name.as_str())
                    .collect();
                info!(works = ?others, "waiting for other ManifestWorks to be deleted");
                self.publish(
                    target,
                    EventType::Normal,
                    reasons::WAITING_FOR_WORKS,
                    actions::WAIT,
                    format!("waiting for ManifestWorks to be deleted: {}", others.join(", ")),
                )
                .await;
                Ok(TeardownOutcome::new(decision))
            }

            TeardownDecision::DeleteInstallBundle => {
                let name = klusterlet_bundle_name(&target.name);
                delete_bundle(self.store.as_ref(), &target.name, &name).await?;
                info!(bundle = %name, "deleted klusterlet install work");
                self.publish(
                    target,
                    EventType::Normal,
                    reasons::KLUSTERLET_WORK_DELETED,
                    actions::DELETE,
                    format!("deleted ManifestWork {name}"),
                )
                .await;
                Ok(TeardownOutcome::new(decision))
            }

            TeardownDecision::DeleteDefinitionsBundle => {
                let name = crds_bundle_name(&target.name);
                delete_bundle(self.store.as_ref(), &target.name, &name).await?;
                info!(bundle = %name, "deleted klusterlet CRDs work");
                self.publish(
                    target,
                    EventType::Normal,
                    reasons::CRDS_WORK_DELETED,
                    actions::DELETE,
                    format!("deleted ManifestWork {name}"),
                )
                .await;
                Ok(TeardownOutcome::new(decision))
            }
        }
    }

    /// Ask the addon retirer only when the answer can change the decision
    async fn addons_remaining(
        &self,
        target: &Target,
        bundles: &[ManifestBundle],
    ) -> Result<bool, Error> {
        let relevant = target.deleting
            && target.reachability == Reachability::Available
            && !bundles.is_empty()
            && pending_work(&target.name, bundles, false) != Some(PendingWork::AddonBundles);
        if !relevant {
            return Ok(false);
        }
        Ok(!self.addons.none_remaining(&target.name).await?)
    }

    async fn publish(
        &self,
        target: &Target,
        type_: EventType,
        reason: &str,
        action: &str,
        note: String,
    ) {
        self.events
            .publish(&target.object_ref, type_, reason, action, Some(note))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoopEventPublisher;
    use std::sync::Mutex;

    /// Records which bundles each delete call touched
    #[derive(Clone, Default)]
    struct DeleteCapture {
        deleted: Arc<Mutex<Vec<String>>>,
        forced: Arc<Mutex<Vec<String>>>,
    }

    impl DeleteCapture {
        fn deleted(&self) -> Vec<String> {
            let mut v = self.deleted.lock().unwrap().clone();
            v.sort();
            v
        }

        fn forced(&self) -> Vec<String> {
            let mut v = self.forced.lock().unwrap().clone();
            v.sort();
            v
        }
    }

    fn capturing_store() -> (MockBundleStore, DeleteCapture) {
        let capture = DeleteCapture::default();
        let mut store = MockBundleStore::new();

        let deleted = capture.deleted.clone();
        store.expect_delete().returning(move |_, name| {
            deleted.lock().unwrap().push(name.to_string());
            Ok(())
        });
        let forced = capture.forced.clone();
        store.expect_force_delete().returning(move |_, name| {
            forced.lock().unwrap().push(name.to_string());
            Ok(())
        });

        (store, capture)
    }

    fn addons(none_remaining: bool) -> MockAddonRetirer {
        let mut addons = MockAddonRetirer::new();
        addons.expect_retire_all().returning(|_| Ok(()));
        addons
            .expect_none_remaining()
            .returning(move |_| Ok(none_remaining));
        addons
    }

    fn teardown(store: MockBundleStore, addons: MockAddonRetirer) -> StagedTeardown {
        StagedTeardown::new(Arc::new(store), Arc::new(addons), Arc::new(NoopEventPublisher))
    }

    fn bundles(names: &[&str]) -> Vec<ManifestBundle> {
        names.iter().map(|n| ManifestBundle::new(*n, "t1")).collect()
    }

    fn reachable() -> Target {
        Target::new("t1", Reachability::Available, true)
    }

    fn unreachable() -> Target {
        Target::new("t1", Reachability::Unavailable, true)
    }

    mod ordered_path {
        use super::*;

        /// Story: addon works go first, core works stay until addons converge
        #[tokio::test]
        async fn story_addon_works_are_retired_before_core_works() {
            let (store, capture) = capturing_store();
            let mut retirer = MockAddonRetirer::new();
            retirer.expect_retire_all().times(1).returning(|_| Ok(()));
            retirer.expect_none_remaining().never();

            let set = bundles(&["t1-klusterlet-addon-foo", "t1-crds", "t1-klusterlet"]);
            let outcome = teardown(store, retirer).run(&reachable(), &set).await.unwrap();

            assert_eq!(outcome.decision, TeardownDecision::DeleteNonCore);
            assert_eq!(outcome.requeue_after, Some(CONVERGENCE_DELAY));
            assert_eq!(capture.deleted(), vec!["t1-klusterlet-addon-foo"]);
            assert!(capture.forced().is_empty());
        }

        #[tokio::test]
        async fn test_addon_objects_still_present_waits() {
            let (store, capture) = capturing_store();
            let outcome = teardown(store, addons(false))
                .with_convergence_delay(Duration::from_secs(3))
                .run(&reachable(), &bundles(&["t1-crds", "t1-klusterlet"]))
                .await
                .unwrap();

            assert_eq!(
                outcome.decision,
                TeardownDecision::WaitForAddons(Duration::from_secs(3))
            );
            assert_eq!(outcome.requeue_after, Some(Duration::from_secs(3)));
            assert!(capture.deleted().is_empty());
        }

        /// Story: only the install work is left, so it goes
        #[tokio::test]
        async fn story_install_work_is_deleted_once_addons_are_gone() {
            let (store, capture) = capturing_store();
            let outcome = teardown(store, addons(true))
                .run(&reachable(), &bundles(&["t1-klusterlet"]))
                .await
                .unwrap();

            assert_eq!(outcome.decision, TeardownDecision::DeleteInstallBundle);
            assert_eq!(outcome.requeue_after, None);
            assert_eq!(capture.deleted(), vec!["t1-klusterlet"]);
        }

        #[tokio::test]
        async fn test_install_goes_before_crds() {
            let (store, capture) = capturing_store();
            let outcome = teardown(store, addons(true))
                .run(&reachable(), &bundles(&["t1-crds", "t1-klusterlet"]))
                .await
                .unwrap();

            assert_eq!(outcome.decision, TeardownDecision::DeleteInstallBundle);
            assert_eq!(capture.deleted(), vec!["t1-klusterlet"]);
        }

        /// Story: a previous pass removed the install work, finish with the CRDs
        #[tokio::test]
        async fn story_lone_crds_work_self_heals() {
            let (store, capture) = capturing_store();
            let outcome = teardown(store, addons(true))
                .run(&reachable(), &bundles(&["t1-crds"]))
                .await
                .unwrap();

            assert_eq!(outcome.decision, TeardownDecision::DeleteDefinitionsBundle);
            assert_eq!(capture.deleted(), vec!["t1-crds"]);
        }

        /// Story: a user-created work blocks teardown without an error
        #[tokio::test]
        async fn story_foreign_work_blocks_silently() {
            let (store, capture) = capturing_store();
            let outcome = teardown(store, addons(true))
                .run(&reachable(), &bundles(&["t1-crds", "t1-klusterlet", "foo-other"]))
                .await
                .unwrap();

            assert_eq!(outcome.decision, TeardownDecision::WaitForOtherWork);
            assert_eq!(outcome.requeue_after, None);
            assert!(capture.deleted().is_empty());
            assert!(capture.forced().is_empty());
        }

        #[tokio::test]
        async fn test_second_pass_on_same_state_is_safe() {
            let mut store = MockBundleStore::new();
            let mut calls = 0;
            store.expect_delete().times(2).returning(move |_, name| {
                calls += 1;
                if calls == 1 {
                    Ok(())
                } else {
                    Err(Error::not_found("ManifestWork", name))
                }
            });
            let teardown = teardown(store, addons(true));
            let set = bundles(&["t1-klusterlet"]);

            let first = teardown.run(&reachable(), &set).await.unwrap();
            let second = teardown.run(&reachable(), &set).await.unwrap();
            assert_eq!(first, second);
        }
    }

    mod force_path {
        use super::*;

        /// Story: the cluster is gone for good, everything is force deleted
        #[tokio::test]
        async fn story_unreachable_cluster_loses_every_work() {
            let (store, capture) = capturing_store();
            let mut retirer = MockAddonRetirer::new();
            retirer.expect_retire_all().never();
            retirer.expect_none_remaining().never();

            let set = bundles(&["t1-crds", "t1-klusterlet", "foo-other"]);
            let outcome = teardown(store, retirer).run(&unreachable(), &set).await.unwrap();

            assert_eq!(outcome.decision, TeardownDecision::ForceDeleteAll);
            assert_eq!(capture.forced(), vec!["foo-other", "t1-crds", "t1-klusterlet"]);
            assert!(capture.deleted().is_empty());
        }

        #[tokio::test]
        async fn test_partial_failure_is_reported_once() {
            let mut store = MockBundleStore::new();
            store.expect_force_delete().returning(|_, name| {
                if name == "t1-crds" {
                    Err(Error::internal("boom"))
                } else {
                    Ok(())
                }
            });
            let err = teardown(store, addons(true))
                .run(&unreachable(), &bundles(&["t1-crds", "t1-klusterlet"]))
                .await
                .unwrap_err();
            assert!(matches!(err, Error::PartialDeletion { ref failures } if failures.len() == 1));
        }
    }

    mod no_op {
        use super::*;

        #[tokio::test]
        async fn test_cluster_not_deleting_touches_nothing() {
            let store = MockBundleStore::new();
            let mut retirer = MockAddonRetirer::new();
            retirer.expect_none_remaining().never();
            let target = Target::new("t1", Reachability::Available, false);

            let outcome = teardown(store, retirer)
                .run(&target, &bundles(&["t1-crds", "t1-klusterlet-addon-foo"]))
                .await
                .unwrap();
            assert_eq!(outcome.decision, TeardownDecision::NoOp);
        }

        #[tokio::test]
        async fn test_nothing_left_is_done() {
            let outcome = teardown(MockBundleStore::new(), MockAddonRetirer::new())
                .run(&reachable(), &[])
                .await
                .unwrap();
            assert_eq!(outcome, TeardownOutcome::new(TeardownDecision::NoOp));
        }
    }

    mod failures {
        use super::*;

        #[tokio::test]
        async fn test_addon_status_error_surfaces() {
            let mut retirer = MockAddonRetirer::new();
            retirer
                .expect_none_remaining()
                .returning(|_| Err(Error::internal("addon list failed")));
            let err = teardown(MockBundleStore::new(), retirer)
                .run(&reachable(), &bundles(&["t1-klusterlet"]))
                .await
                .unwrap_err();
            assert!(err.is_retryable());
        }

        /// Story: addon retirement is refused, addon works still go
        #[tokio::test]
        async fn story_retire_error_does_not_block_addon_work_deletion() {
            let (store, capture) = capturing_store();
            let mut retirer = MockAddonRetirer::new();
            retirer
                .expect_retire_all()
                .times(1)
                .returning(|_| Err(Error::internal("forbidden")));

            let err = teardown(store, retirer)
                .run(&reachable(), &bundles(&["t1-klusterlet-addon-foo", "t1-crds"]))
                .await
                .unwrap_err();

            assert_eq!(capture.deleted(), vec!["t1-klusterlet-addon-foo"]);
            match err {
                Error::PartialDeletion { failures } => {
                    assert_eq!(failures.len(), 1);
                    assert_eq!(failures[0].name, "t1/managedclusteraddons");
                    assert!(failures[0].message.contains("forbidden"));
                }
                other => panic!("expected PartialDeletion, got {other:?}"),
            }
        }

        #[tokio::test]
        async fn test_retire_and_delete_failures_are_reported_together() {
            let mut store = MockBundleStore::new();
            store
                .expect_delete()
                .times(2)
                .returning(|_, name| {
                    if name == "addon-a-deploy" {
                        Err(Error::internal("timeout"))
                    } else {
                        Ok(())
                    }
                });
            let mut retirer = MockAddonRetirer::new();
            retirer
                .expect_retire_all()
                .returning(|_| Err(Error::internal("forbidden")));

            let err = teardown(store, retirer)
                .run(
                    &reachable(),
                    &bundles(&["addon-a-deploy", "addon-b-pre-delete", "t1-crds"]),
                )
                .await
                .unwrap_err();

            let Error::PartialDeletion { failures } = err else {
                panic!("expected PartialDeletion");
            };
            let mut names: Vec<_> = failures.iter().map(|f| f.name.as_str()).collect();
            names.sort();
            assert_eq!(names, vec!["addon-a-deploy", "t1/managedclusteraddons"]);
        }

        #[tokio::test]
        async fn test_install_delete_error_is_not_wrapped() {
            let mut store = MockBundleStore::new();
            store
                .expect_delete()
                .returning(|_, _| Err(Error::internal("timeout")));
            let err = teardown(store, addons(true))
                .run(&reachable(), &bundles(&["t1-klusterlet"]))
                .await
                .unwrap_err();
            assert!(matches!(err, Error::Internal { .. }));
        }
    }

    #[test]
    fn test_target_from_cluster() {
        use crate::crd::{
            Condition, ConditionStatus, ManagedClusterSpec, ManagedClusterStatus,
            CONDITION_AVAILABLE,
        };
        use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};

        let cluster = ManagedCluster {
            metadata: ObjectMeta {
                name: Some("t1".to_string()),
                deletion_timestamp: Some(Time(chrono::Utc::now())),
                ..Default::default()
            },
            spec: ManagedClusterSpec::default(),
            status: Some(ManagedClusterStatus {
                conditions: vec![Condition::new(
                    CONDITION_AVAILABLE,
                    ConditionStatus::Unknown,
                    "ManagedClusterLeaseUpdateStopped",
                    "lease not updated",
                )],
                version: None,
            }),
        };

        let target = Target::from_cluster(&cluster);
        assert_eq!(target.name, "t1");
        assert!(target.deleting);
        assert_eq!(target.reachability, Reachability::Unavailable);
        assert_eq!(target.object_ref.kind.as_deref(), Some("ManagedCluster"));
    }
}
