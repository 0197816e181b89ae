//! Validation and status handling for CatalogSourceConfig resources

use chrono::Utc;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, ResourceExt};
use tracing::info;

use crate::crd::{
    valid_package_list, CatalogSourceConfig, CatalogSourceConfigStatus, Condition,
};
use crate::{Error, Result};

/// Validate a CatalogSourceConfig spec
pub fn validate(csc: &CatalogSourceConfig) -> Result<()> {
    let spec = &csc.spec;

    if spec.target_namespace.trim().is_empty() {
        return Err(Error::ValidationError(
            "targetNamespace cannot be empty".to_string(),
        ));
    }

    if spec.source.trim().is_empty() {
        return Err(Error::ValidationError("source cannot be empty".to_string()));
    }

    if valid_package_list(&spec.packages).is_empty() {
        return Err(Error::ValidationError(
            "packages must contain at least one package identifier".to_string(),
        ));
    }

    Ok(())
}

/// Update the status of a CatalogSourceConfig after a reconciliation pass
pub async fn update_status(
    csc: &CatalogSourceConfig,
    client: &Client,
    namespace: &str,
    registry_address: Option<&str>,
) -> Result<()> {
    let name = csc.name_any();

    let phase = if registry_address.is_some() {
        "Succeeded"
    } else {
        "Configuring"
    };

    let mut conditions = Vec::new();
    let now = Utc::now();

    conditions.push(Condition {
        type_: "SpecValid".to_string(),
        status: "True".to_string(),
        last_transition_time: now,
        reason: Some("SpecValidated".to_string()),
        message: Some("Spec is valid".to_string()),
    });

    conditions.push(Condition {
        type_: "RegistryReady".to_string(),
        status: if registry_address.is_some() {
            "True"
        } else {
            "False"
        }
        .to_string(),
        last_transition_time: now,
        reason: Some(
            if registry_address.is_some() {
                "AddressAssigned"
            } else {
                "AddressPending"
            }
            .to_string(),
        ),
        message: registry_address
            .map(|address| format!("Registry serving at {}", address))
            .or_else(|| Some("Waiting for the registry Service address".to_string())),
    });

    let status = CatalogSourceConfigStatus {
        phase: Some(phase.to_string()),
        message: Some(match registry_address {
            Some(address) => format!("The registry was configured at {}", address),
            None => "The registry Service has no address yet".to_string(),
        }),
        registry_address: registry_address.map(str::to_string),
        observed_generation: csc.metadata.generation,
        last_update_time: Some(now),
        conditions,
    };

    let cscs: Api<CatalogSourceConfig> = Api::namespaced(client.clone(), namespace);
    let patch = serde_json::json!({
        "status": status
    });

    cscs.patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
        .await
        .map_err(|e| Error::KubeError(format!("Failed to update status: {}", e)))?;

    info!("Updated status for {}/{}: phase={}", namespace, name, phase);

    Ok(())
}
