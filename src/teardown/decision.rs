//! Teardown decision
//!
//! Pure functions: given the target, the bundles currently in its namespace
//! and whether addon objects still exist, pick the next step. Nothing here
//! touches the store.

use std::time::Duration;

use super::{Reachability, Target};
use crate::bundle::{BundleClass, ManifestBundle};

/// What a teardown pass does
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TeardownDecision {
    /// Nothing to do (not deleting, or no bundles left)
    NoOp,
    /// Target unreachable: delete every bundle, ignoring classification
    ForceDeleteAll,
    /// Retire addon objects and delete every addon bundle
    DeleteNonCore,
    /// Addon bundles are gone but addon objects are not; check again later
    WaitForAddons(Duration),
    /// Only foreign bundles block progress; wait for someone else to remove them
    WaitForOtherWork,
    /// Delete `<cluster>-klusterlet`
    DeleteInstallBundle,
    /// Delete `<cluster>-crds`
    DeleteDefinitionsBundle,
}

impl TeardownDecision {
    /// Short name for logs and events
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoOp => "NoOp",
            Self::ForceDeleteAll => "ForceDeleteAll",
            Self::DeleteNonCore => "DeleteNonCore",
            Self::WaitForAddons(_) => "WaitForAddons",
            Self::WaitForOtherWork => "WaitForOtherWork",
            Self::DeleteInstallBundle => "DeleteInstallBundle",
            Self::DeleteDefinitionsBundle => "DeleteDefinitionsBundle",
        }
    }
}

impl std::fmt::Display for TeardownDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Non-core work still standing between the target and core bundle removal
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PendingWork {
    /// Addon bundles are still in the namespace
    AddonBundles,
    /// Addon objects have not finished deleting
    AddonObjects,
    /// Bundles this controller does not own are still in the namespace
    ForeignBundles,
}

/// Report the first kind of non-core work that is still outstanding.
///
/// `None` means only the definitions and install bundles (or nothing) remain.
pub fn pending_work(
    cluster: &str,
    bundles: &[ManifestBundle],
    addons_remaining: bool,
) -> Option<PendingWork> {
    let has = |class: BundleClass| bundles.iter().any(|b| b.class(cluster) == class);

    if has(BundleClass::AddonBundle) {
        Some(PendingWork::AddonBundles)
    } else if addons_remaining {
        Some(PendingWork::AddonObjects)
    } else if has(BundleClass::Other) {
        Some(PendingWork::ForeignBundles)
    } else {
        None
    }
}

/// Decide the next teardown step.
///
/// Evaluation order: not deleting, nothing left, unreachable, outstanding
/// non-core work, then install before definitions.
pub fn decide(
    target: &Target,
    bundles: &[ManifestBundle],
    addons_remaining: bool,
    convergence_delay: Duration,
) -> TeardownDecision {
    if !target.deleting || bundles.is_empty() {
        return TeardownDecision::NoOp;
    }

    if target.reachability == Reachability::Unavailable {
        return TeardownDecision::ForceDeleteAll;
    }

    match pending_work(&target.name, bundles, addons_remaining) {
        Some(PendingWork::AddonBundles) => TeardownDecision::DeleteNonCore,
        Some(PendingWork::AddonObjects) => TeardownDecision::WaitForAddons(convergence_delay),
        Some(PendingWork::ForeignBundles) => TeardownDecision::WaitForOtherWork,
        None => {
            let has = |class| bundles.iter().any(|b| b.class(&target.name) == class);
            if has(BundleClass::InstallBundle) {
                TeardownDecision::DeleteInstallBundle
            } else if has(BundleClass::DefinitionsBundle) {
                TeardownDecision::DeleteDefinitionsBundle
            } else {
                TeardownDecision::NoOp
            }
        }
    }
}
