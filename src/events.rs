//! Kubernetes Event recording
//!
//! Provides a trait-based abstraction over `kube::runtime::events::Recorder`
//! so the teardown and the reconciler report what they did on the
//! ManagedCluster, visible via `kubectl describe managedcluster`.
//!
//! Events are **fire-and-forget**: failures are logged as warnings and never
//! propagate errors.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

#[cfg(test)]
use mockall::automock;

/// Trait for publishing Kubernetes Events.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a Kubernetes Event on the given resource.
    ///
    /// # Arguments
    ///
    /// * `resource_ref` - The Kubernetes object this event is about
    /// * `type_` - Normal or Warning
    /// * `reason` - Machine-readable reason string (see [`reasons`])
    /// * `action` - What action was taken (see [`actions`])
    /// * `note` - Optional human-readable message
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Production implementation wrapping `kube::runtime::events::Recorder`.
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Create a new publisher reporting as `controller_name`.
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(reason, action, error = %e, "failed to publish Kubernetes event");
        }
    }
}

/// No-op implementation for tests and dry runs.
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
    }
}

/// Well-known event reason strings.
pub mod reasons {
    /// Both klusterlet works were created from the import secret
    pub const WORKS_CREATED: &str = "KlusterletWorksCreated";
    /// Cluster unreachable, every ManifestWork was force deleted
    pub const WORKS_FORCE_DELETED: &str = "ManifestWorksForceDeleted";
    /// Addons and addon works are being retired
    pub const ADDONS_RETIRING: &str = "AddonsRetiring";
    /// Waiting for ManifestWorks this controller does not own
    pub const WAITING_FOR_WORKS: &str = "WaitingForManifestWorks";
    /// The klusterlet install work was deleted
    pub const KLUSTERLET_WORK_DELETED: &str = "KlusterletWorkDeleted";
    /// The klusterlet CRDs work was deleted
    pub const CRDS_WORK_DELETED: &str = "KlusterletCRDsWorkDeleted";
    /// The import secret could not be turned into works
    pub const IMPORT_SECRET_INVALID: &str = "ImportSecretInvalid";
}

/// Well-known event action strings.
pub mod actions {
    /// Creating ManifestWorks
    pub const APPLY: &str = "Apply";
    /// Deleting ManifestWorks or addons
    pub const DELETE: &str = "Delete";
    /// Waiting without acting
    pub const WAIT: &str = "Wait";
}
