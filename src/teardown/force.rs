//! Bulk and single deletes against the bundle store
//!
//! Used by the force path when the managed cluster is unreachable, and by the
//! ordered teardown for the addon batch. "Already gone" counts as success.

use futures::future::join_all;
use tracing::{debug, warn};

use super::BundleStore;
use crate::bundle::ManifestBundle;
use crate::error::DeletionFailure;
use crate::Error;

/// How a delete request was resolved
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Deleted {
    /// The store accepted the delete
    Requested,
    /// The bundle no longer existed
    AlreadyGone,
}

/// Delete one bundle, treating NotFound as success
pub async fn delete_bundle(
    store: &dyn BundleStore,
    namespace: &str,
    name: &str,
) -> Result<Deleted, Error> {
    match store.delete(namespace, name).await {
        Ok(()) => Ok(Deleted::Requested),
        Err(e) if e.is_not_found() => {
            debug!(namespace = %namespace, bundle = %name, "bundle already gone");
            Ok(Deleted::AlreadyGone)
        }
        Err(e) => Err(e),
    }
}

/// Delete every bundle in `bundles`, concurrently, without stopping at the
/// first failure.
///
/// Returns how many deletes took effect. Every failure ends up in a single
/// [`Error::PartialDeletion`].
pub async fn delete_all(store: &dyn BundleStore, bundles: &[ManifestBundle]) -> Result<usize, Error> {
    let results = join_all(
        bundles
            .iter()
            .map(|b| delete_bundle(store, &b.namespace, &b.name)),
    )
    .await;
    collect(bundles, results)
}

/// Force path: remove every bundle regardless of classification.
///
/// Each bundle is deleted and then stripped of finalizers, since the work
/// agent that would normally clear them cannot reach the hub.
pub async fn force_delete_all(
    store: &dyn BundleStore,
    bundles: &[ManifestBundle],
) -> Result<usize, Error> {
    let results = join_all(bundles.iter().map(|b| async move {
        match store.force_delete(&b.namespace, &b.name).await {
            Ok(()) => Ok(Deleted::Requested),
            Err(e) if e.is_not_found() => Ok(Deleted::AlreadyGone),
            Err(e) => Err(e),
        }
    }))
    .await;
    collect(bundles, results)
}

fn collect(
    bundles: &[ManifestBundle],
    results: Vec<Result<Deleted, Error>>,
) -> Result<usize, Error> {
    let mut failures = Vec::new();
    let mut deleted = 0;

    for (bundle, result) in bundles.iter().zip(results) {
        match result {
            Ok(_) => deleted += 1,
            Err(e) => {
                warn!(bundle = %bundle.name, error = %e, "failed to delete bundle");
                failures.push(DeletionFailure {
                    name: bundle.name.clone(),
                    message: e.to_string(),
                });
            }
        }
    }

    Error::from_failures(failures)?;
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::teardown::MockBundleStore;
    use std::sync::{Arc, Mutex};

    fn bundles(names: &[&str]) -> Vec<ManifestBundle> {
        names.iter().map(|n| ManifestBundle::new(*n, "t1")).collect()
    }

    fn server_error() -> Error {
        Error::internal("etcd timeout")
    }

    /// Story: the cluster went dark, every work goes regardless of its role
    #[tokio::test]
    async fn story_force_path_removes_everything() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();

        let mut store = MockBundleStore::new();
        store.expect_force_delete().times(3).returning(move |_, name| {
            seen_clone.lock().unwrap().push(name.to_string());
            Ok(())
        });
        store.expect_delete().never();

        let set = bundles(&["t1-crds", "t1-klusterlet", "foo-other"]);
        let deleted = force_delete_all(&store, &set).await.unwrap();

        assert_eq!(deleted, 3);
        let mut seen = seen.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, vec!["foo-other", "t1-crds", "t1-klusterlet"]);
    }

    #[tokio::test]
    async fn test_force_path_keeps_going_after_failures() {
        let mut store = MockBundleStore::new();
        store.expect_force_delete().times(3).returning(|_, name| {
            if name == "t1-klusterlet" {
                Err(server_error())
            } else {
                Ok(())
            }
        });

        let set = bundles(&["t1-crds", "t1-klusterlet", "foo-other"]);
        let err = force_delete_all(&store, &set).await.unwrap_err();

        match err {
            Error::PartialDeletion { failures } => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].name, "t1-klusterlet");
            }
            other => panic!("expected PartialDeletion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_already_gone_counts_as_deleted() {
        let mut store = MockBundleStore::new();
        store
            .expect_delete()
            .returning(|_, name| Err(Error::not_found("ManifestWork", name)));

        let result = delete_bundle(&store, "t1", "t1-crds").await.unwrap();
        assert_eq!(result, Deleted::AlreadyGone);

        let set = bundles(&["addon-a-deploy", "addon-b-pre-delete"]);
        assert_eq!(delete_all(&store, &set).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_single_delete_surfaces_store_errors_unchanged() {
        let mut store = MockBundleStore::new();
        store.expect_delete().returning(|_, _| Err(server_error()));

        let err = delete_bundle(&store, "t1", "t1-klusterlet").await.unwrap_err();
        assert!(matches!(err, Error::Internal { .. }));
    }

    #[tokio::test]
    async fn test_empty_set_deletes_nothing() {
        let store = MockBundleStore::new();
        assert_eq!(force_delete_all(&store, &[]).await.unwrap(), 0);
        assert_eq!(delete_all(&store, &[]).await.unwrap(), 0);
    }
}
