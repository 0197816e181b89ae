//! Custom Resource Definitions for the Marketplace Registry Operator

mod catalog_source_config;

pub use catalog_source_config::*;

use std::collections::BTreeMap;

use kube::CustomResourceExt;

/// Kind of the custom resource a registry is provisioned on behalf of.
///
/// Ownership is expressed through labels on the managed objects rather than
/// ownerReferences, so registries can outlive a cross-namespace owner.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OwnerKind {
    /// An OperatorSource owns the registry
    OperatorSource,
    /// A CatalogSourceConfig owns the registry
    CatalogSourceConfig,
}

impl OwnerKind {
    /// Labels identifying the owning resource on a managed object
    pub fn owner_labels(&self, name: &str, namespace: &str) -> BTreeMap<String, String> {
        let (name_key, namespace_key) = match self {
            OwnerKind::OperatorSource => ("opsrc-owner-name", "opsrc-owner-namespace"),
            OwnerKind::CatalogSourceConfig => ("csc-owner-name", "csc-owner-namespace"),
        };
        let mut labels = BTreeMap::new();
        labels.insert(name_key.to_string(), name.to_string());
        labels.insert(namespace_key.to_string(), namespace.to_string());
        labels
    }
}

/// Generate CRD YAML manifests for all custom resources
pub fn generate_crds() -> Vec<String> {
    vec![serde_yaml::to_string(&CatalogSourceConfig::crd()).unwrap()]
}
