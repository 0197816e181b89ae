//! Kubernetes Deployment builder for registry pods

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, ExecAction, PodSpec, PodTemplateSpec, Probe,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};

use crate::adapters::{selector_labels, GRPC_PORT, GRPC_PORT_NAME};
use crate::crd::OwnerKind;
use crate::reconcilers::registry::RegistryKey;

/// Pod template annotation carrying a checksum of the registry command
pub const COMMAND_CHECKSUM_ANNOTATION: &str = "marketplace.operators.io/command-checksum";

/// Pod template annotation refreshed on every reconciliation to force a
/// rollout even when the spec is otherwise unchanged
pub const UPDATE_HASH_ANNOTATION: &str = "marketplace.operators.io/update-hash";

const HEALTH_PROBE_COMMAND: [&str; 2] = ["grpc_health_probe", "-addr=localhost:50051"];
const PROBE_INITIAL_DELAY_SECONDS: i32 = 5;
const PROBE_FAILURE_THRESHOLD: i32 = 30;

/// Build a Deployment running the registry server
pub fn build_deployment(
    key: &RegistryKey,
    image: &str,
    command: &[String],
    command_checksum: &str,
    update_hash: &str,
    need_service_account: bool,
    owner: OwnerKind,
) -> Deployment {
    let mut template = build_pod_template(key, image, command, need_service_account);
    let annotations = template
        .metadata
        .get_or_insert_with(Default::default)
        .annotations
        .get_or_insert_with(Default::default);
    annotations.insert(
        COMMAND_CHECKSUM_ANNOTATION.to_string(),
        command_checksum.to_string(),
    );
    annotations.insert(UPDATE_HASH_ANNOTATION.to_string(), update_hash.to_string());

    Deployment {
        metadata: ObjectMeta {
            name: Some(key.name.clone()),
            namespace: Some(key.namespace.clone()),
            labels: Some(owner.owner_labels(&key.name, &key.namespace)),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(selector_labels(&key.name)),
                ..Default::default()
            },
            template,
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Build the pod template running the registry server container
pub fn build_pod_template(
    key: &RegistryKey,
    image: &str,
    command: &[String],
    need_service_account: bool,
) -> PodTemplateSpec {
    let mut pod_spec = PodSpec {
        containers: vec![Container {
            name: key.name.clone(),
            image: Some(image.to_string()),
            command: Some(command.to_vec()),
            ports: Some(vec![ContainerPort {
                name: Some(GRPC_PORT_NAME.to_string()),
                container_port: GRPC_PORT,
                ..Default::default()
            }]),
            readiness_probe: Some(health_probe()),
            liveness_probe: Some(health_probe()),
            ..Default::default()
        }],
        ..Default::default()
    };
    if need_service_account {
        pod_spec.service_account_name = Some(key.name.clone());
    }

    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            name: Some(key.name.clone()),
            namespace: Some(key.namespace.clone()),
            labels: Some(selector_labels(&key.name)),
            ..Default::default()
        }),
        spec: Some(pod_spec),
    }
}

fn health_probe() -> Probe {
    Probe {
        exec: Some(ExecAction {
            command: Some(HEALTH_PROBE_COMMAND.iter().map(|s| s.to_string()).collect()),
        }),
        initial_delay_seconds: Some(PROBE_INITIAL_DELAY_SECONDS),
        failure_threshold: Some(PROBE_FAILURE_THRESHOLD),
        ..Default::default()
    }
}
