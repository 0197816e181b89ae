//! Builders for the Kubernetes resources backing a registry

pub mod deployment_builder;
pub mod rbac_builder;
pub mod service_builder;

use std::collections::BTreeMap;

/// Container port the registry server listens on
pub const GRPC_PORT: i32 = 50051;

/// Name of the grpc port on the container and Service
pub const GRPC_PORT_NAME: &str = "grpc";

/// Label matched between the Deployment selector, the pod template and the
/// Service selector
pub const SELECTOR_LABEL: &str = "marketplace.catalogSourceConfig";

/// Selector labels shared by the registry Deployment and Service
pub fn selector_labels(name: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(SELECTOR_LABEL.to_string(), name.to_string());
    labels
}
