//! Controller for CatalogSourceConfig resources

use futures::StreamExt;
use kube::{
    runtime::{
        controller::{Action, Controller},
        finalizer::{finalizer, Event},
        watcher::Config,
    },
    Api, ResourceExt,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument};

use crate::controllers::Context;
use crate::crd::{CatalogSourceConfig, OwnerKind};
use crate::metrics::prometheus::{RECONCILE_DURATION, RECONCILIATIONS, RECONCILIATION_ERRORS};
use crate::reconcilers::catalog_source_config;
use crate::reconcilers::registry::{Registry, RegistryKey};
use crate::Error;

/// Finalizer name for cleanup
pub const FINALIZER: &str = "operators.marketplace.io/registry-finalizer";

/// Run the registry controller
pub async fn run(ctx: Arc<Context>) {
    let client = ctx.client.clone();
    let cscs: Api<CatalogSourceConfig> = Api::all(client.clone());

    info!("Starting CatalogSourceConfig controller");

    Controller::new(cscs, Config::default().any_semantic())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok(o) => info!("Reconciled {:?}", o),
                Err(e) => error!("Reconcile failed: {:?}", e),
            }
        })
        .await;

    info!("CatalogSourceConfig controller stopped");
}

/// Reconcile a CatalogSourceConfig resource
#[instrument(skip(csc, ctx), fields(name = %csc.name_any(), namespace = csc.namespace().unwrap_or_default()))]
async fn reconcile(csc: Arc<CatalogSourceConfig>, ctx: Arc<Context>) -> Result<Action, Error> {
    let start = std::time::Instant::now();
    let ns = csc.namespace().unwrap_or_default();
    let name = csc.name_any();

    RECONCILIATIONS
        .with_label_values(&["CatalogSourceConfig"])
        .inc();

    let cscs: Api<CatalogSourceConfig> = Api::namespaced(ctx.client.clone(), &ns);

    let result = finalizer(&cscs, FINALIZER, csc, |event| async {
        match event {
            Event::Apply(csc) => apply(&csc, &ctx).await,
            Event::Cleanup(csc) => cleanup(&csc, &ctx).await,
        }
    })
    .await;

    let duration = start.elapsed().as_secs_f64();
    RECONCILE_DURATION
        .with_label_values(&["CatalogSourceConfig"])
        .observe(duration);

    match &result {
        Ok(_) => info!("Successfully reconciled {}/{} in {:.2}s", ns, name, duration),
        Err(e) => {
            RECONCILIATION_ERRORS
                .with_label_values(&["CatalogSourceConfig"])
                .inc();
            error!("Failed to reconcile {}/{}: {:?}", ns, name, e);
        }
    }

    Ok(result?)
}

/// Apply changes for a CatalogSourceConfig
async fn apply(csc: &CatalogSourceConfig, ctx: &Context) -> Result<Action, Error> {
    let ns = csc.namespace().unwrap_or_default();
    let name = csc.name_any();

    info!("Applying CatalogSourceConfig {}/{}", ns, name);

    // Validate the spec
    catalog_source_config::validate(csc)?;

    // Converge the registry resources in the target namespace
    let mut registry = registry_for(csc, ctx);
    registry.ensure().await?;

    // Update status with the freshly assigned Service address
    catalog_source_config::update_status(csc, &ctx.client, &ns, registry.address()).await?;

    // Requeue so registry content is re-pulled even without spec changes
    Ok(Action::requeue(Duration::from_secs(900)))
}

/// Cleanup registry resources when a CatalogSourceConfig is deleted
async fn cleanup(csc: &CatalogSourceConfig, ctx: &Context) -> Result<Action, Error> {
    let ns = csc.namespace().unwrap_or_default();
    let name = csc.name_any();

    info!("Cleaning up CatalogSourceConfig {}/{}", ns, name);

    // The managed resources carry owner labels, not ownerReferences, so they
    // are torn down explicitly
    registry_for(csc, ctx).delete().await?;

    Ok(Action::await_change())
}

fn registry_for(csc: &CatalogSourceConfig, ctx: &Context) -> Registry {
    let key = RegistryKey::new(csc.name_any(), csc.spec.target_namespace.clone());
    Registry::new(
        ctx.client.clone(),
        ctx.reader.clone(),
        key,
        &csc.spec.source,
        &csc.spec.packages,
        &ctx.server_image,
        OwnerKind::CatalogSourceConfig,
    )
}

/// Error policy for the controller
fn error_policy(csc: Arc<CatalogSourceConfig>, err: &Error, _ctx: Arc<Context>) -> Action {
    let ns = csc.namespace().unwrap_or_default();
    let name = csc.name_any();

    error!("Reconciliation error for {}/{}: {:?}", ns, name, err);

    // Requeue with backoff based on error type
    match err {
        Error::KubeError(_) => Action::requeue(Duration::from_secs(30)),
        Error::ValidationError(_) | Error::DatastoreError(_) => {
            Action::requeue(Duration::from_secs(300))
        }
        _ => Action::requeue(Duration::from_secs(60)),
    }
}
