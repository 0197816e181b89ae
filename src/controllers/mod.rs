//! Controller implementations for watching and reconciling resources

pub mod registry_controller;

use kube::Client;
use std::sync::Arc;

use crate::datastore::Reader;

/// Shared context for controllers
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Package metadata datastore
    pub reader: Arc<dyn Reader>,
    /// Image the registry server pods run
    pub server_image: String,
}

impl Context {
    /// Create a new context
    pub fn new(client: Client, reader: Arc<dyn Reader>, server_image: String) -> Arc<Self> {
        Arc::new(Self {
            client,
            reader,
            server_image,
        })
    }
}
