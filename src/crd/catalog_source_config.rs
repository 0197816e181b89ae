//! CatalogSourceConfig Custom Resource Definition

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// CatalogSourceConfig resource specification
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "operators.marketplace.io",
    version = "v2",
    kind = "CatalogSourceConfig",
    plural = "catalogsourceconfigs",
    singular = "catalogsourceconfig",
    shortname = "csc",
    namespaced,
    status = "CatalogSourceConfigStatus",
    printcolumn = r#"{"name": "Phase", "type": "string", "jsonPath": ".status.phase"}"#,
    printcolumn = r#"{"name": "Address", "type": "string", "jsonPath": ".status.registryAddress"}"#,
    printcolumn = r#"{"name": "Packages", "type": "string", "jsonPath": ".spec.packages"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CatalogSourceConfigSpec {
    /// Namespace the registry Deployment and Service are created in
    pub target_namespace: String,

    /// Datastore source the packages are resolved against
    pub source: String,

    /// Comma-separated list of package identifiers to serve
    pub packages: String,

    /// Display name surfaced on the downstream catalog source
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    /// Publisher surfaced on the downstream catalog source
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
}

/// CatalogSourceConfig status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CatalogSourceConfigStatus {
    /// Current phase (Configuring, Succeeded, Failed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    /// Human-readable message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// host:port address of the registry Service
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry_address: Option<String>,

    /// Observed generation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Last update time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<DateTime<Utc>>,

    /// Status conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// Status condition
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type (SpecValid, RegistryReady)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status (True, False, Unknown)
    pub status: String,

    /// Last transition time
    pub last_transition_time: DateTime<Utc>,

    /// Reason for the condition
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Split a comma-separated package string into the valid package identifiers,
/// trimming whitespace and dropping empty entries.
pub fn valid_package_list(packages: &str) -> Vec<String> {
    packages
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}
