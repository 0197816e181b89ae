//! RBAC builders for private registry access
//!
//! A registry pod serving packages from a private app registry reads the
//! pull secret at startup, which requires a ServiceAccount bound to a Role
//! granting `get` on secrets.

use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{PolicyRule, Role, RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::crd::OwnerKind;
use crate::reconcilers::registry::RegistryKey;

/// Build the ServiceAccount the registry pod runs as
pub fn build_service_account(key: &RegistryKey, owner: OwnerKind) -> ServiceAccount {
    ServiceAccount {
        metadata: object_meta(key, owner),
        ..Default::default()
    }
}

/// Build the Role granting the registry pod read access to secrets
pub fn build_role(key: &RegistryKey, owner: OwnerKind) -> Role {
    Role {
        metadata: object_meta(key, owner),
        rules: Some(secret_access_rules()),
    }
}

/// Build the RoleBinding binding the registry ServiceAccount to its Role
pub fn build_role_binding(key: &RegistryKey, owner: OwnerKind) -> RoleBinding {
    RoleBinding {
        metadata: object_meta(key, owner),
        role_ref: role_ref(&key.name),
        subjects: Some(subjects(key)),
    }
}

/// The canonical policy for the registry Role: read-only secret access
pub fn secret_access_rules() -> Vec<PolicyRule> {
    vec![PolicyRule {
        api_groups: Some(vec![String::new()]),
        resources: Some(vec!["secrets".to_string()]),
        verbs: vec!["get".to_string()],
        ..Default::default()
    }]
}

/// Reference to the registry Role for use in its RoleBinding
pub fn role_ref(role_name: &str) -> RoleRef {
    RoleRef {
        api_group: "rbac.authorization.k8s.io".to_string(),
        kind: "Role".to_string(),
        name: role_name.to_string(),
    }
}

fn subjects(key: &RegistryKey) -> Vec<Subject> {
    vec![Subject {
        kind: "ServiceAccount".to_string(),
        name: key.name.clone(),
        namespace: Some(key.namespace.clone()),
        ..Default::default()
    }]
}

fn object_meta(key: &RegistryKey, owner: OwnerKind) -> ObjectMeta {
    ObjectMeta {
        name: Some(key.name.clone()),
        namespace: Some(key.namespace.clone()),
        labels: Some(owner.owner_labels(&key.name, &key.namespace)),
        ..Default::default()
    }
}
