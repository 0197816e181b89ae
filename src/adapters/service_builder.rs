//! Kubernetes Service builder for registry access

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::adapters::{selector_labels, GRPC_PORT, GRPC_PORT_NAME};
use crate::crd::OwnerKind;
use crate::reconcilers::registry::RegistryKey;

/// Build a Service fronting the registry Deployment
pub fn build_service(key: &RegistryKey, owner: OwnerKind) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(key.name.clone()),
            namespace: Some(key.namespace.clone()),
            labels: Some(owner.owner_labels(&key.name, &key.namespace)),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            ports: Some(vec![ServicePort {
                name: Some(GRPC_PORT_NAME.to_string()),
                port: GRPC_PORT,
                target_port: Some(IntOrString::Int(GRPC_PORT)),
                ..Default::default()
            }]),
            selector: Some(selector_labels(&key.name)),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Derive the `host:port` address of a registry Service from its assigned
/// cluster IP and first port. Returns None until the cluster has assigned an
/// IP.
pub fn service_address(service: &Service) -> Option<String> {
    let spec = service.spec.as_ref()?;
    let cluster_ip = spec.cluster_ip.as_deref().filter(|ip| !ip.is_empty())?;
    let port = spec.ports.as_ref()?.first()?.port;
    Some(format!("{}:{}", cluster_ip, port))
}
