//! Package metadata datastore
//!
//! The registry reconciler resolves each package identifier against a
//! datastore to find the app registry it is served from. Population of the
//! datastore (syncing remote app registries) happens outside this operator;
//! here it is an in-memory map, optionally seeded from a YAML file at
//! startup.

use std::collections::BTreeMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// App registry metadata recorded for a single package
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageMetadata {
    /// Base URL of the app registry serving the package
    pub endpoint: String,

    /// Namespace within the app registry
    pub registry_namespace: String,

    /// `namespace/name` of the pull secret, for private registries only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_namespaced_name: Option<String>,
}

/// Read access to package metadata, keyed by (source, package identifier)
pub trait Reader: Send + Sync {
    /// Look up the metadata recorded for a package within a source
    fn read(&self, source: &str, package_id: &str) -> Result<PackageMetadata>;
}

/// In-memory datastore, keyed by source then package identifier
#[derive(Debug, Default)]
pub struct MemoryDatastore {
    sources: RwLock<BTreeMap<String, BTreeMap<String, PackageMetadata>>>,
}

impl MemoryDatastore {
    /// Create an empty datastore
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a datastore from its YAML representation: a mapping of source
    /// name to package identifier to metadata
    pub fn from_yaml(contents: &str) -> Result<Self> {
        let sources: BTreeMap<String, BTreeMap<String, PackageMetadata>> =
            serde_yaml::from_str(contents)
                .map_err(|e| Error::DatastoreError(format!("Failed to parse seed file: {}", e)))?;
        Ok(Self {
            sources: RwLock::new(sources),
        })
    }

    /// Record metadata for a package within a source, replacing any previous
    /// entry
    pub fn write(&self, source: &str, package_id: &str, metadata: PackageMetadata) {
        let mut sources = self.sources.write().expect("datastore lock poisoned");
        sources
            .entry(source.to_string())
            .or_default()
            .insert(package_id.to_string(), metadata);
    }
}

impl Reader for MemoryDatastore {
    fn read(&self, source: &str, package_id: &str) -> Result<PackageMetadata> {
        let sources = self.sources.read().expect("datastore lock poisoned");
        sources
            .get(source)
            .and_then(|packages| packages.get(package_id))
            .cloned()
            .ok_or_else(|| {
                Error::DatastoreError(format!(
                    "package {} not found in source {}",
                    package_id, source
                ))
            })
    }
}
