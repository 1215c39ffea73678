//! Classification of bundles by name
//!
//! Teardown ordering is keyed on this classification. Each variant has
//! exactly one matching rule and the rules are checked in declaration order,
//! so exact core names win over the addon prefixes.

use super::{crds_bundle_name, klusterlet_bundle_name};

/// Role of a bundle in a managed cluster namespace
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BundleClass {
    /// Exactly `<cluster>-crds`
    DefinitionsBundle,
    /// Exactly `<cluster>-klusterlet`
    InstallBundle,
    /// `<namespace>-klusterlet-addon*`, `addon-*-deploy` or `addon-*-pre-delete`
    AddonBundle,
    /// Anything else; never deleted by the ordered teardown
    Other,
}

impl BundleClass {
    /// Definitions or install bundle
    pub fn is_core(self) -> bool {
        matches!(self, Self::DefinitionsBundle | Self::InstallBundle)
    }
}

/// Classify bundle `name` in `namespace` for the managed cluster `cluster`
pub fn classify(cluster: &str, namespace: &str, name: &str) -> BundleClass {
    if name == crds_bundle_name(cluster) {
        BundleClass::DefinitionsBundle
    } else if name == klusterlet_bundle_name(cluster) {
        BundleClass::InstallBundle
    } else if is_addon_name(namespace, name) {
        BundleClass::AddonBundle
    } else {
        BundleClass::Other
    }
}

fn is_addon_name(namespace: &str, name: &str) -> bool {
    if name.starts_with(&format!("{namespace}-klusterlet-addon")) {
        return true;
    }
    // prefix and suffix may overlap, so "addon-deploy" counts
    name.starts_with("addon-") && (name.ends_with("-deploy") || name.ends_with("-pre-delete"))
}
