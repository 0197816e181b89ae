//! Integration tests for the registry reconciler logic
//!
//! These tests exercise the pure parts of the reconciliation: spec
//! validation, app registry resolution, registry command construction, and
//! the resource builders.

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use marketplace_registry_operator::adapters::{
    deployment_builder, rbac_builder, service_builder, GRPC_PORT, GRPC_PORT_NAME, SELECTOR_LABEL,
};
use marketplace_registry_operator::crd::{
    valid_package_list, CatalogSourceConfig, CatalogSourceConfigSpec, OwnerKind,
};
use marketplace_registry_operator::datastore::{MemoryDatastore, PackageMetadata, Reader};
use marketplace_registry_operator::reconcilers::catalog_source_config;
use marketplace_registry_operator::reconcilers::registry::{
    app_registries, registry_command, RegistryKey,
};

// ============================================================================
// Test Helpers
// ============================================================================

const SOURCE: &str = "community";

fn public_package(endpoint: &str, namespace: &str) -> PackageMetadata {
    PackageMetadata {
        endpoint: endpoint.to_string(),
        registry_namespace: namespace.to_string(),
        secret_namespaced_name: None,
    }
}

fn private_package(endpoint: &str, namespace: &str, secret: &str) -> PackageMetadata {
    PackageMetadata {
        endpoint: endpoint.to_string(),
        registry_namespace: namespace.to_string(),
        secret_namespaced_name: Some(secret.to_string()),
    }
}

fn seeded_datastore() -> MemoryDatastore {
    let datastore = MemoryDatastore::new();
    datastore.write(SOURCE, "etcd", public_package("https://quay.io/cnr", "community"));
    datastore.write(
        SOURCE,
        "prometheus",
        public_package("https://quay.io/cnr", "community"),
    );
    datastore.write(
        SOURCE,
        "jaeger",
        private_package("https://quay.io/cnr", "community", "marketplace/quay-token"),
    );
    datastore
}

fn registry_key() -> RegistryKey {
    RegistryKey::new("test-registry", "marketplace")
}

fn valid_csc_spec() -> CatalogSourceConfigSpec {
    CatalogSourceConfigSpec {
        target_namespace: "marketplace".to_string(),
        source: SOURCE.to_string(),
        packages: "etcd,prometheus".to_string(),
        display_name: None,
        publisher: None,
    }
}

fn create_csc(spec: CatalogSourceConfigSpec) -> CatalogSourceConfig {
    CatalogSourceConfig {
        metadata: ObjectMeta {
            name: Some("test-csc".to_string()),
            namespace: Some("marketplace".to_string()),
            ..Default::default()
        },
        spec,
        status: None,
    }
}

// ============================================================================
// Spec Validation Tests
// ============================================================================

#[test]
fn csc_valid_spec_passes_validation() {
    let csc = create_csc(valid_csc_spec());
    let result = catalog_source_config::validate(&csc);
    if let Err(e) = &result {
        panic!("Validation failed unexpectedly: {:?}", e);
    }
    assert!(result.is_ok());
}

#[test]
fn csc_empty_target_namespace_fails_validation() {
    let mut spec = valid_csc_spec();
    spec.target_namespace = "  ".to_string();

    let csc = create_csc(spec);
    let result = catalog_source_config::validate(&csc);

    assert!(result.is_err());
    assert!(result
        .unwrap_err()
        .to_string()
        .to_lowercase()
        .contains("targetnamespace"));
}

#[test]
fn csc_empty_source_fails_validation() {
    let mut spec = valid_csc_spec();
    spec.source = String::new();

    let csc = create_csc(spec);
    let result = catalog_source_config::validate(&csc);

    assert!(result.is_err());
    assert!(result
        .unwrap_err()
        .to_string()
        .to_lowercase()
        .contains("source"));
}

#[test]
fn csc_blank_packages_fails_validation() {
    let mut spec = valid_csc_spec();
    spec.packages = " , ,".to_string();

    let csc = create_csc(spec);
    let result = catalog_source_config::validate(&csc);

    assert!(result.is_err());
    assert!(result
        .unwrap_err()
        .to_string()
        .to_lowercase()
        .contains("package"));
}

// ============================================================================
// Package List Parsing Tests
// ============================================================================

#[test]
fn package_list_splits_on_commas() {
    assert_eq!(valid_package_list("etcd,prometheus"), vec!["etcd", "prometheus"]);
}

#[test]
fn package_list_trims_whitespace_and_drops_empties() {
    assert_eq!(
        valid_package_list(" etcd , , prometheus ,"),
        vec!["etcd", "prometheus"]
    );
    assert!(valid_package_list("").is_empty());
    assert!(valid_package_list(" , ").is_empty());
}

// ============================================================================
// App Registry Resolution Tests
// ============================================================================

#[test]
fn public_packages_need_no_secret() {
    let datastore = seeded_datastore();
    let (references, secret_present) = app_registries(&datastore, SOURCE, "etcd,prometheus");

    assert!(!secret_present);
    assert_eq!(references, vec!["https://quay.io/cnr|community"]);
}

#[test]
fn private_package_sets_secret_flag() {
    let datastore = seeded_datastore();
    let (references, secret_present) = app_registries(&datastore, SOURCE, "jaeger");

    assert!(secret_present);
    assert_eq!(
        references,
        vec!["https://quay.io/cnr|community|marketplace/quay-token"]
    );
}

#[test]
fn public_and_private_references_stay_distinct() {
    // etcd and jaeger share endpoint and namespace, but only jaeger carries
    // a secret; the references must not merge
    let datastore = seeded_datastore();
    let (references, secret_present) = app_registries(&datastore, SOURCE, "etcd,jaeger");

    assert!(secret_present);
    assert_eq!(
        references,
        vec![
            "https://quay.io/cnr|community",
            "https://quay.io/cnr|community|marketplace/quay-token",
        ]
    );
}

#[test]
fn references_are_deduplicated_in_first_seen_order() {
    let datastore = seeded_datastore();
    datastore.write(SOURCE, "cockroachdb", public_package("https://example.com/cnr", "certified"));

    let (references, _) = app_registries(&datastore, SOURCE, "etcd,cockroachdb,prometheus");

    assert_eq!(
        references,
        vec![
            "https://quay.io/cnr|community",
            "https://example.com/cnr|certified",
        ]
    );
}

#[test]
fn unknown_packages_are_skipped() {
    let datastore = seeded_datastore();
    let (references, secret_present) = app_registries(&datastore, SOURCE, "etcd,no-such-package");

    assert!(!secret_present);
    assert_eq!(references, vec!["https://quay.io/cnr|community"]);
}

#[test]
fn empty_secret_reference_is_treated_as_public() {
    let datastore = MemoryDatastore::new();
    datastore.write(
        SOURCE,
        "etcd",
        private_package("https://quay.io/cnr", "community", ""),
    );

    let (references, secret_present) = app_registries(&datastore, SOURCE, "etcd");

    assert!(!secret_present);
    assert_eq!(references, vec!["https://quay.io/cnr|community"]);
}

// ============================================================================
// Registry Command Tests
// ============================================================================

#[test]
fn command_ends_with_package_list() {
    let references = vec!["https://quay.io/cnr|community".to_string()];
    let command = registry_command("etcd,prometheus", &references);

    assert_eq!(
        command,
        vec![
            "appregistry-server",
            "-r",
            "https://quay.io/cnr|community",
            "-o",
            "etcd,prometheus",
        ]
    );
}

#[test]
fn command_repeats_registry_flag_per_reference() {
    let references = vec![
        "https://quay.io/cnr|community".to_string(),
        "https://quay.io/cnr|community|marketplace/quay-token".to_string(),
    ];
    let command = registry_command("etcd,jaeger", &references);

    assert_eq!(command.iter().filter(|arg| *arg == "-r").count(), 2);
    assert_eq!(command[2], references[0]);
    assert_eq!(command[4], references[1]);
    assert_eq!(command[command.len() - 2], "-o");
    assert_eq!(command[command.len() - 1], "etcd,jaeger");
}

#[test]
fn command_without_references_still_names_packages() {
    let command = registry_command("etcd", &[]);
    assert_eq!(command, vec!["appregistry-server", "-o", "etcd"]);
}

// ============================================================================
// Deployment Builder Tests
// ============================================================================

#[test]
fn deployment_runs_registry_server_container() {
    let key = registry_key();
    let command = registry_command("etcd", &["https://quay.io/cnr|community".to_string()]);
    let deployment = deployment_builder::build_deployment(
        &key,
        "quay.io/openshift/origin-operator-registry",
        &command,
        "abc123",
        "feed5eed",
        false,
        OwnerKind::CatalogSourceConfig,
    );

    assert_eq!(deployment.metadata.name.as_deref(), Some("test-registry"));
    assert_eq!(deployment.metadata.namespace.as_deref(), Some("marketplace"));

    let spec = deployment.spec.expect("deployment spec");
    assert_eq!(spec.replicas, Some(1));
    assert_eq!(
        spec.selector.match_labels.as_ref().and_then(|l| l.get(SELECTOR_LABEL)),
        Some(&"test-registry".to_string())
    );

    let pod_spec = spec.template.spec.expect("pod spec");
    let container = &pod_spec.containers[0];
    assert_eq!(container.name, "test-registry");
    assert_eq!(
        container.image.as_deref(),
        Some("quay.io/openshift/origin-operator-registry")
    );
    assert_eq!(container.command.as_ref(), Some(&command));
    assert!(pod_spec.service_account_name.is_none());

    let port = &container.ports.as_ref().expect("ports")[0];
    assert_eq!(port.container_port, GRPC_PORT);
    assert_eq!(port.name.as_deref(), Some(GRPC_PORT_NAME));
}

#[test]
fn deployment_probes_use_grpc_health_probe() {
    let key = registry_key();
    let deployment = deployment_builder::build_deployment(
        &key,
        "image",
        &registry_command("etcd", &[]),
        "abc123",
        "feed5eed",
        false,
        OwnerKind::CatalogSourceConfig,
    );

    let pod_spec = deployment.spec.unwrap().template.spec.unwrap();
    let container = &pod_spec.containers[0];

    for probe in [
        container.readiness_probe.as_ref().expect("readiness probe"),
        container.liveness_probe.as_ref().expect("liveness probe"),
    ] {
        let exec = probe.exec.as_ref().expect("exec action");
        assert_eq!(
            exec.command.as_ref().expect("probe command"),
            &vec![
                "grpc_health_probe".to_string(),
                "-addr=localhost:50051".to_string()
            ]
        );
        assert_eq!(probe.initial_delay_seconds, Some(5));
        assert_eq!(probe.failure_threshold, Some(30));
    }
}

#[test]
fn deployment_binds_service_account_for_private_registries() {
    let key = registry_key();
    let deployment = deployment_builder::build_deployment(
        &key,
        "image",
        &registry_command("jaeger", &[]),
        "abc123",
        "feed5eed",
        true,
        OwnerKind::CatalogSourceConfig,
    );

    let pod_spec = deployment.spec.unwrap().template.spec.unwrap();
    assert_eq!(pod_spec.service_account_name.as_deref(), Some("test-registry"));
}

#[test]
fn deployment_template_carries_rollout_annotations() {
    let key = registry_key();
    let deployment = deployment_builder::build_deployment(
        &key,
        "image",
        &registry_command("etcd", &[]),
        "abc123",
        "feed5eed",
        false,
        OwnerKind::CatalogSourceConfig,
    );

    let annotations = deployment
        .spec
        .unwrap()
        .template
        .metadata
        .unwrap()
        .annotations
        .expect("template annotations");
    assert_eq!(
        annotations
            .get(deployment_builder::COMMAND_CHECKSUM_ANNOTATION)
            .map(String::as_str),
        Some("abc123")
    );
    assert_eq!(
        annotations
            .get(deployment_builder::UPDATE_HASH_ANNOTATION)
            .map(String::as_str),
        Some("feed5eed")
    );
}

// ============================================================================
// Service Builder Tests
// ============================================================================

#[test]
fn service_fronts_grpc_port() {
    let key = registry_key();
    let service = service_builder::build_service(&key, OwnerKind::CatalogSourceConfig);

    assert_eq!(service.metadata.name.as_deref(), Some("test-registry"));
    assert_eq!(service.metadata.namespace.as_deref(), Some("marketplace"));

    let spec = service.spec.expect("service spec");
    assert_eq!(
        spec.selector.as_ref().and_then(|s| s.get(SELECTOR_LABEL)),
        Some(&"test-registry".to_string())
    );

    let port = &spec.ports.expect("ports")[0];
    assert_eq!(port.port, GRPC_PORT);
    assert_eq!(port.name.as_deref(), Some(GRPC_PORT_NAME));
}

#[test]
fn service_address_joins_cluster_ip_and_port() {
    let service = Service {
        metadata: ObjectMeta::default(),
        spec: Some(ServiceSpec {
            cluster_ip: Some("10.3.5.81".to_string()),
            ports: Some(vec![ServicePort {
                port: GRPC_PORT,
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    };

    assert_eq!(
        service_builder::service_address(&service).as_deref(),
        Some("10.3.5.81:50051")
    );
}

#[test]
fn service_address_requires_an_assigned_cluster_ip() {
    let mut service = Service::default();
    assert!(service_builder::service_address(&service).is_none());

    service.spec = Some(ServiceSpec {
        cluster_ip: Some(String::new()),
        ports: Some(vec![ServicePort {
            port: GRPC_PORT,
            ..Default::default()
        }]),
        ..Default::default()
    });
    assert!(service_builder::service_address(&service).is_none());
}

// ============================================================================
// RBAC Builder Tests
// ============================================================================

#[test]
fn role_grants_read_access_to_secrets() {
    let key = registry_key();
    let role = rbac_builder::build_role(&key, OwnerKind::CatalogSourceConfig);

    assert_eq!(role.metadata.name.as_deref(), Some("test-registry"));

    let rules = role.rules.expect("rules");
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].verbs, vec!["get"]);
    assert_eq!(rules[0].resources.as_ref().expect("resources"), &vec!["secrets".to_string()]);
}

#[test]
fn role_binding_targets_registry_service_account() {
    let key = registry_key();
    let role_binding = rbac_builder::build_role_binding(&key, OwnerKind::CatalogSourceConfig);

    assert_eq!(role_binding.role_ref.kind, "Role");
    assert_eq!(role_binding.role_ref.name, "test-registry");

    let subjects = role_binding.subjects.expect("subjects");
    assert_eq!(subjects.len(), 1);
    assert_eq!(subjects[0].kind, "ServiceAccount");
    assert_eq!(subjects[0].name, "test-registry");
    assert_eq!(subjects[0].namespace.as_deref(), Some("marketplace"));
}

#[test]
fn owner_labels_follow_the_owning_kind() {
    let key = registry_key();

    let csc_owned =
        rbac_builder::build_service_account(&key, OwnerKind::CatalogSourceConfig);
    let labels = csc_owned.metadata.labels.expect("labels");
    assert_eq!(labels.get("csc-owner-name").map(String::as_str), Some("test-registry"));
    assert_eq!(labels.get("csc-owner-namespace").map(String::as_str), Some("marketplace"));

    let opsrc_owned = rbac_builder::build_service_account(&key, OwnerKind::OperatorSource);
    let labels = opsrc_owned.metadata.labels.expect("labels");
    assert_eq!(labels.get("opsrc-owner-name").map(String::as_str), Some("test-registry"));
    assert_eq!(labels.get("opsrc-owner-namespace").map(String::as_str), Some("marketplace"));
}

// ============================================================================
// Datastore Tests
// ============================================================================

#[test]
fn datastore_read_returns_written_metadata() {
    let datastore = seeded_datastore();
    let metadata = datastore.read(SOURCE, "jaeger").expect("read jaeger");

    assert_eq!(metadata.endpoint, "https://quay.io/cnr");
    assert_eq!(metadata.registry_namespace, "community");
    assert_eq!(metadata.secret_namespaced_name.as_deref(), Some("marketplace/quay-token"));
}

#[test]
fn datastore_read_unknown_package_errors() {
    let datastore = seeded_datastore();
    assert!(datastore.read(SOURCE, "no-such-package").is_err());
    assert!(datastore.read("no-such-source", "etcd").is_err());
}

#[test]
fn datastore_seeds_from_yaml_file() {
    use std::io::Write as _;

    let yaml = r#"
community:
  etcd:
    endpoint: https://quay.io/cnr
    registryNamespace: community
  jaeger:
    endpoint: https://quay.io/cnr
    registryNamespace: community
    secretNamespacedName: marketplace/quay-token
"#;

    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    write!(file, "{}", yaml).expect("write seed file");

    let contents = std::fs::read_to_string(file.path()).expect("read seed file");
    let datastore = MemoryDatastore::from_yaml(&contents).expect("parse seed file");

    let (references, secret_present) = app_registries(&datastore, "community", "etcd,jaeger");
    assert!(secret_present);
    assert_eq!(
        references,
        vec![
            "https://quay.io/cnr|community",
            "https://quay.io/cnr|community|marketplace/quay-token",
        ]
    );
}

#[test]
fn datastore_rejects_malformed_yaml() {
    assert!(MemoryDatastore::from_yaml("not: [valid").is_err());
}
