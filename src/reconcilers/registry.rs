//! Registry reconciliation for catalog sources
//!
//! A registry is the set of cluster resources serving the grpc package
//! interface for one catalog source: a Deployment running the registry
//! server, a Service fronting it, and, when a private app registry is
//! referenced, a ServiceAccount/Role/RoleBinding granting the pod read
//! access to pull secrets. All five share the same name and namespace.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, DeleteParams, PostParams};
use kube::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};

use crate::adapters::deployment_builder::{
    COMMAND_CHECKSUM_ANNOTATION, UPDATE_HASH_ANNOTATION,
};
use crate::adapters::{deployment_builder, rbac_builder, service_builder};
use crate::crd::{valid_package_list, OwnerKind};
use crate::datastore::Reader;
use crate::metrics::RESOURCES_ENSURED;
use crate::{Error, Result};

/// Registry server image used in the absence of configuration
pub const DEFAULT_SERVER_IMAGE: &str = "quay.io/openshift/origin-operator-registry";

const SERVER_BINARY: &str = "appregistry-server";

const SCALE_DOWN_INTERVAL: Duration = Duration::from_secs(1);
const SCALE_DOWN_TIMEOUT: Duration = Duration::from_secs(60);

/// Name and namespace shared by every resource backing one registry
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegistryKey {
    /// Resource name, also used as the selector label value
    pub name: String,
    /// Namespace the resources are created in
    pub namespace: String,
}

impl RegistryKey {
    /// Create a key from a name and namespace
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

/// One registry reconciliation task
///
/// Holds the inputs for a single invocation; `ensure` converges the cluster
/// to the desired state and records the resulting Service address.
pub struct Registry {
    client: Client,
    reader: Arc<dyn Reader>,
    key: RegistryKey,
    source: String,
    packages: String,
    image: String,
    owner: OwnerKind,
    address: Option<String>,
}

impl Registry {
    /// Create a registry task for the given catalog source
    pub fn new(
        client: Client,
        reader: Arc<dyn Reader>,
        key: RegistryKey,
        source: impl Into<String>,
        packages: impl Into<String>,
        image: impl Into<String>,
        owner: OwnerKind,
    ) -> Self {
        Self {
            client,
            reader,
            key,
            source: source.into(),
            packages: packages.into(),
            image: image.into(),
            owner,
            address: None,
        }
    }

    /// Ensure the registry Deployment and its associated resources exist.
    ///
    /// Resources are converged strictly sequentially; the first fatal API
    /// error aborts the remainder. On success the Service address is
    /// available through [`Registry::address`].
    pub async fn ensure(&mut self) -> Result<()> {
        let (app_registries, secret_present) =
            app_registries(self.reader.as_ref(), &self.source, &self.packages);

        // RBAC is provisioned only when the registry pod must read a pull
        // secret for a private app registry
        if secret_present {
            self.ensure_service_account().await?;
            self.ensure_role().await?;
            self.ensure_role_binding().await?;
        }

        self.ensure_deployment(&app_registries, secret_present).await?;
        self.ensure_service().await?;
        Ok(())
    }

    /// The `host:port` address of the registry Service, populated by a
    /// successful [`Registry::ensure`]
    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    /// Tear down the registry: scale the Deployment to zero, wait for its
    /// pods to drain, then delete every managed resource.
    pub async fn delete(&self) -> Result<()> {
        let deployments: Api<Deployment> =
            Api::namespaced(self.client.clone(), &self.key.namespace);
        let existing = deployments.get_opt(&self.key.name).await.map_err(|e| {
            Error::KubeError(format!(
                "Failed to get Deployment {}: {}",
                self.key.name, e
            ))
        })?;
        if let Some(mut deployment) = existing {
            deployment.spec.get_or_insert_with(Default::default).replicas = Some(0);
            deployments
                .replace(&self.key.name, &PostParams::default(), &deployment)
                .await
                .map_err(|e| {
                    Error::KubeError(format!(
                        "Failed to scale down Deployment {}: {}",
                        self.key.name, e
                    ))
                })?;
            if let Err(e) = self
                .wait_for_scale_down(SCALE_DOWN_INTERVAL, SCALE_DOWN_TIMEOUT)
                .await
            {
                warn!("Proceeding with deletion of {}: {}", self.key.name, e);
            }
        }

        self.delete_resource::<Service>("Service").await?;
        self.delete_resource::<Deployment>("Deployment").await?;
        self.delete_resource::<RoleBinding>("RoleBinding").await?;
        self.delete_resource::<Role>("Role").await?;
        self.delete_resource::<ServiceAccount>("ServiceAccount")
            .await?;
        Ok(())
    }

    /// Poll the Deployment until its available replica count reaches zero or
    /// the timeout elapses. A failed Get aborts the poll with the error.
    pub async fn wait_for_scale_down(
        &self,
        retry_interval: Duration,
        timeout: Duration,
    ) -> Result<Deployment> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), &self.key.namespace);
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let deployment = api.get(&self.key.name).await.map_err(|e| {
                error!("Deployment {} not found: {}", self.key.name, e);
                Error::KubeError(format!(
                    "Failed to get Deployment {}: {}",
                    self.key.name, e
                ))
            })?;

            let available = deployment
                .status
                .as_ref()
                .and_then(|s| s.available_replicas)
                .unwrap_or_default();
            if available == 0 {
                info!("Deployment {} has scaled down", self.key.name);
                return Ok(deployment);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::ScaleDownTimeout(self.key.name.clone()));
            }
            info!(
                "Waiting for scale down of Deployment {} ({}/0)",
                self.key.name, available
            );
            tokio::time::sleep(retry_interval).await;
        }
    }

    /// Ensure the ServiceAccount the registry pod runs as is present.
    /// Presence alone is sufficient; an existing ServiceAccount is never
    /// updated.
    async fn ensure_service_account(&self) -> Result<()> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), &self.key.namespace);
        match self.get_existing(&api, "ServiceAccount").await? {
            None => {
                let service_account = rbac_builder::build_service_account(&self.key, self.owner);
                self.create_resource(&api, "ServiceAccount", &service_account)
                    .await?;
            }
            Some(_) => info!("ServiceAccount {} is present", self.key.name),
        }
        Ok(())
    }

    /// Ensure the Role granting secret access is present, overwriting the
    /// rule set of an existing Role with the canonical policy.
    async fn ensure_role(&self) -> Result<()> {
        let api: Api<Role> = Api::namespaced(self.client.clone(), &self.key.namespace);
        match self.get_existing(&api, "Role").await? {
            None => {
                let role = rbac_builder::build_role(&self.key, self.owner);
                self.create_resource(&api, "Role", &role).await?;
            }
            Some(mut role) => {
                role.rules = Some(rbac_builder::secret_access_rules());
                self.replace_resource(&api, "Role", &role).await?;
            }
        }
        Ok(())
    }

    /// Ensure the RoleBinding for the registry ServiceAccount is present,
    /// overwriting the role reference of an existing binding.
    async fn ensure_role_binding(&self) -> Result<()> {
        let api: Api<RoleBinding> = Api::namespaced(self.client.clone(), &self.key.namespace);
        match self.get_existing(&api, "RoleBinding").await? {
            None => {
                let role_binding = rbac_builder::build_role_binding(&self.key, self.owner);
                self.create_resource(&api, "RoleBinding", &role_binding)
                    .await?;
            }
            Some(mut role_binding) => {
                role_binding.role_ref = rbac_builder::role_ref(&self.key.name);
                self.replace_resource(&api, "RoleBinding", &role_binding)
                    .await?;
            }
        }
        Ok(())
    }

    /// Ensure the registry Deployment is present and serving the current
    /// package list. An existing Deployment has its container command
    /// rewritten, its service-account binding added when newly required, and
    /// its update-hash annotation refreshed so the registry pod re-pulls
    /// package content even when the spec is otherwise unchanged.
    async fn ensure_deployment(
        &self,
        app_registries: &[String],
        need_service_account: bool,
    ) -> Result<()> {
        let command = registry_command(&self.packages, app_registries);
        let checksum = command_checksum(&command);
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), &self.key.namespace);

        match self.get_existing(&api, "Deployment").await? {
            None => {
                let deployment = deployment_builder::build_deployment(
                    &self.key,
                    &self.image,
                    &command,
                    &checksum,
                    &update_hash(),
                    need_service_account,
                    self.owner,
                );
                match api.create(&PostParams::default(), &deployment).await {
                    Ok(_) => {
                        RESOURCES_ENSURED.with_label_values(&["Deployment"]).inc();
                        info!(
                            "Created Deployment {} with registry command: {}",
                            self.key.name,
                            command.join(" ")
                        );
                    }
                    Err(e) if is_already_exists(&e) => {
                        info!("Deployment {} already exists", self.key.name);
                    }
                    Err(e) => {
                        error!("Failed to create Deployment {}: {}", self.key.name, e);
                        return Err(Error::KubeError(format!(
                            "Failed to create Deployment {}: {}",
                            self.key.name, e
                        )));
                    }
                }
            }
            Some(mut deployment) => {
                let spec = deployment.spec.get_or_insert_with(Default::default);
                let rebuild = spec
                    .template
                    .spec
                    .as_ref()
                    .map_or(true, |ps| ps.containers.is_empty());
                if rebuild {
                    spec.template = deployment_builder::build_pod_template(
                        &self.key,
                        &self.image,
                        &command,
                        need_service_account,
                    );
                } else if let Some(pod_spec) = spec.template.spec.as_mut() {
                    // Rewrite the command to account for packages added to or
                    // removed from the catalog source
                    if let Some(container) = pod_spec.containers.first_mut() {
                        container.command = Some(command.clone());
                    }
                    // A private app registry may have been added since the
                    // Deployment was created; adding the service account in
                    // other cases is harmless
                    if need_service_account {
                        pod_spec.service_account_name = Some(self.key.name.clone());
                    }
                }
                let annotations = spec
                    .template
                    .metadata
                    .get_or_insert_with(Default::default)
                    .annotations
                    .get_or_insert_with(Default::default);
                annotations.insert(COMMAND_CHECKSUM_ANNOTATION.to_string(), checksum);
                annotations.insert(UPDATE_HASH_ANNOTATION.to_string(), update_hash());

                api.replace(&self.key.name, &PostParams::default(), &deployment)
                    .await
                    .map_err(|e| {
                        error!("Failed to update Deployment {}: {}", self.key.name, e);
                        Error::KubeError(format!(
                            "Failed to update Deployment {}: {}",
                            self.key.name, e
                        ))
                    })?;
                RESOURCES_ENSURED.with_label_values(&["Deployment"]).inc();
                info!(
                    "Updated Deployment {} with registry command: {}",
                    self.key.name,
                    command.join(" ")
                );
            }
        }
        Ok(())
    }

    /// Ensure the registry Service is present. An existing Service is
    /// deleted first so the recreation is assigned a fresh cluster IP; the
    /// deletion is best effort.
    async fn ensure_service(&mut self) -> Result<()> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), &self.key.namespace);
        if self.get_existing(&api, "Service").await?.is_some() {
            info!("Service {} is present", self.key.name);
            match api.delete(&self.key.name, &DeleteParams::default()).await {
                Ok(_) => info!("Deleted Service {}", self.key.name),
                Err(e) => warn!("Failed to delete Service {}: {}", self.key.name, e),
            }
        }

        let service = service_builder::build_service(&self.key, self.owner);
        let created = match api.create(&PostParams::default(), &service).await {
            Ok(created) => {
                info!("Created Service {}", self.key.name);
                RESOURCES_ENSURED.with_label_values(&["Service"]).inc();
                created
            }
            Err(e) if is_already_exists(&e) => {
                info!("Service {} already exists", self.key.name);
                api.get(&self.key.name).await.map_err(|err| {
                    Error::KubeError(format!(
                        "Failed to get Service {}: {}",
                        self.key.name, err
                    ))
                })?
            }
            Err(e) => {
                error!("Failed to create Service {}: {}", self.key.name, e);
                return Err(Error::KubeError(format!(
                    "Failed to create Service {}: {}",
                    self.key.name, e
                )));
            }
        };

        self.address = service_builder::service_address(&created);
        Ok(())
    }

    async fn get_existing<K>(&self, api: &Api<K>, kind: &str) -> Result<Option<K>>
    where
        K: kube::Resource + Clone + DeserializeOwned + Debug,
    {
        api.get_opt(&self.key.name).await.map_err(|e| {
            Error::KubeError(format!("Failed to get {} {}: {}", kind, self.key.name, e))
        })
    }

    async fn create_resource<K>(&self, api: &Api<K>, kind: &str, desired: &K) -> Result<()>
    where
        K: kube::Resource + Clone + DeserializeOwned + Serialize + Debug,
    {
        match api.create(&PostParams::default(), desired).await {
            Ok(_) => {
                info!("Created {} {}", kind, self.key.name);
                RESOURCES_ENSURED.with_label_values(&[kind]).inc();
                Ok(())
            }
            Err(e) if is_already_exists(&e) => {
                info!("{} {} already exists", kind, self.key.name);
                Ok(())
            }
            Err(e) => {
                error!("Failed to create {} {}: {}", kind, self.key.name, e);
                Err(Error::KubeError(format!(
                    "Failed to create {} {}: {}",
                    kind, self.key.name, e
                )))
            }
        }
    }

    async fn replace_resource<K>(&self, api: &Api<K>, kind: &str, desired: &K) -> Result<()>
    where
        K: kube::Resource + Clone + DeserializeOwned + Serialize + Debug,
    {
        match api
            .replace(&self.key.name, &PostParams::default(), desired)
            .await
        {
            Ok(_) => {
                info!("Updated {} {}", kind, self.key.name);
                RESOURCES_ENSURED.with_label_values(&[kind]).inc();
                Ok(())
            }
            Err(e) => {
                error!("Failed to update {} {}: {}", kind, self.key.name, e);
                Err(Error::KubeError(format!(
                    "Failed to update {} {}: {}",
                    kind, self.key.name, e
                )))
            }
        }
    }

    async fn delete_resource<K>(&self, kind: &str) -> Result<()>
    where
        K: kube::Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        <K as kube::Resource>::DynamicType: Default,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), &self.key.namespace);
        match api.delete(&self.key.name, &DeleteParams::default()).await {
            Ok(_) => info!("Deleted {} {}", kind, self.key.name),
            Err(e) if is_not_found(&e) => {}
            Err(e) => {
                return Err(Error::KubeError(format!(
                    "Failed to delete {} {}: {}",
                    kind, self.key.name, e
                )))
            }
        }
        Ok(())
    }
}

/// Resolve the catalog source's packages into app registry references in the
/// format `{endpoint}|{registry namespace}` or, for private registries,
/// `{endpoint}|{registry namespace}|{secret namespace/name}`.
///
/// References are deduplicated by exact string match in first-seen order, so
/// a public and a private reference to the same endpoint and namespace stay
/// distinct. Lookup failures for individual packages are logged and skipped.
/// The second return value reports whether any reference carries a secret.
pub fn app_registries(reader: &dyn Reader, source: &str, packages: &str) -> (Vec<String>, bool) {
    let mut references: Vec<String> = Vec::new();
    let mut secret_present = false;
    for package_id in valid_package_list(packages) {
        let metadata = match reader.read(source, &package_id) {
            Ok(metadata) => metadata,
            Err(e) => {
                error!("Error {} reading package {}", e, package_id);
                continue;
            }
        };
        let mut reference = format!("{}|{}", metadata.endpoint, metadata.registry_namespace);
        if let Some(secret) = metadata
            .secret_namespaced_name
            .as_deref()
            .filter(|s| !s.is_empty())
        {
            reference.push('|');
            reference.push_str(secret);
            secret_present = true;
        }
        if !references.contains(&reference) {
            references.push(reference);
        }
    }
    (references, secret_present)
}

/// Build the command line launching the registry server:
/// `appregistry-server -r <ref> .. -o <packages>`
pub fn registry_command(packages: &str, app_registries: &[String]) -> Vec<String> {
    let mut command = vec![SERVER_BINARY.to_string()];
    for registry in app_registries {
        command.push("-r".to_string());
        command.push(registry.clone());
    }
    command.push("-o".to_string());
    command.push(packages.to_string());
    command
}

fn command_checksum(command: &[String]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(command.join("\n").as_bytes());
    format!("{:x}", hasher.finalize())[..16].to_string()
}

fn update_hash() -> String {
    format!("{:x}", Utc::now().timestamp_nanos_opt().unwrap_or_default())
}

fn is_already_exists(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 409)
}

fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}
