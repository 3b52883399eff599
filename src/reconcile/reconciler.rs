use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use super::{affected_forwards, node_ports_changed, ServiceEvent, ServiceSpec};
use crate::router::{Forward, RetryPolicy, RouterBackend, RouterError};

/// A failed event, naming the service it was for
#[derive(Error, Debug)]
#[error("service {namespace}/{name}: {source}")]
pub struct ReconcileError {
    pub namespace: String,
    pub name: String,
    pub source: RouterError,
}

impl ReconcileError {
    fn new(service: &ServiceSpec, source: RouterError) -> Self {
        Self {
            namespace: service.namespace.clone(),
            name: service.name.clone(),
            source,
        }
    }
}

/// Applies service events to a router, one event at a time.
///
/// This is the only caller of the backend's mutating operations.
pub struct Reconciler<B> {
    backend: Arc<B>,
    device_name: String,
    retry: RetryPolicy,
}

impl<B: RouterBackend> Reconciler<B> {
    pub fn new(backend: Arc<B>, device_name: impl Into<String>) -> Self {
        Self {
            backend,
            device_name: device_name.into(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub async fn handle(&self, event: &ServiceEvent) -> Result<(), ReconcileError> {
        match event {
            ServiceEvent::Added(service) => self.handle_add(service).await,
            ServiceEvent::Updated { old, new } => self.handle_update(old, new).await,
            ServiceEvent::Deleted(service) => self.handle_delete(service).await,
        }
    }

    /// Add one forward per exposed port. The first failure ends the event;
    /// forwards already added stay.
    pub async fn handle_add(&self, service: &ServiceSpec) -> Result<(), ReconcileError> {
        let forwards = affected_forwards(&self.device_name, service);
        if forwards.is_empty() {
            debug!(namespace = %service.namespace, name = %service.name, "No node ports exposed");
            return Ok(());
        }

        self.login(service).await?;

        for forward in &forwards {
            self.retry
                .run("add forward", || self.backend.add_forward(forward))
                .await
                .map_err(|e| ReconcileError::new(service, e))?;

            info!(
                namespace = %service.namespace,
                name = %service.name,
                "Added NodePort {} -> {}",
                forward.device_port,
                forward.ports
            );
        }
        Ok(())
    }

    /// Replace the old spec's forwards with the new spec's.
    ///
    /// Deleting the old forwards is best effort: a leftover rule on the
    /// router does less harm than a missing one, so delete failures are
    /// logged and the adds still run. Add failures end the event.
    pub async fn handle_update(
        &self,
        old: &ServiceSpec,
        new: &ServiceSpec,
    ) -> Result<(), ReconcileError> {
        if !node_ports_changed(old, new) {
            debug!(
                namespace = %new.namespace,
                name = %new.name,
                "NodePort values did not change"
            );
            return Ok(());
        }
        info!(namespace = %new.namespace, name = %new.name, "NodePort changed");

        let old_forwards = affected_forwards(&self.device_name, old);
        let new_forwards = affected_forwards(&self.device_name, new);

        self.login(new).await?;

        for forward in &old_forwards {
            if let Err(e) = self.delete(forward).await {
                warn!(
                    namespace = %old.namespace,
                    name = %old.name,
                    service_name = %forward.service_name,
                    "Error deleting old forward: {}",
                    e
                );
            }
        }

        for forward in &new_forwards {
            self.retry
                .run("add forward", || self.backend.add_forward(forward))
                .await
                .map_err(|e| ReconcileError::new(new, e))?;

            info!(
                namespace = %new.namespace,
                name = %new.name,
                "Updated NodePort {} -> {}",
                forward.device_port,
                forward.ports
            );
        }
        Ok(())
    }

    /// Remove every forward of the service's last known spec. The first
    /// failure ends the event.
    pub async fn handle_delete(&self, service: &ServiceSpec) -> Result<(), ReconcileError> {
        let forwards = affected_forwards(&self.device_name, service);
        if forwards.is_empty() {
            return Ok(());
        }
        info!(
            namespace = %service.namespace,
            name = %service.name,
            "Service deleted, removing port forwards"
        );

        self.login(service).await?;

        for forward in &forwards {
            self.delete(forward)
                .await
                .map_err(|e| ReconcileError::new(service, e))?;

            info!(
                namespace = %service.namespace,
                name = %service.name,
                "Removed NodePort {} -> {}",
                forward.device_port,
                forward.ports
            );
        }
        Ok(())
    }

    /// Delete with retries. Once an attempt has failed transiently the POST
    /// may still have landed, so a later `NotFound` counts as done.
    async fn delete(&self, forward: &Forward) -> Result<(), RouterError> {
        let interrupted = AtomicBool::new(false);
        let interrupted = &interrupted;
        let backend = &self.backend;

        self.retry
            .run("delete forward", move || async move {
                match backend.delete_forward(forward).await {
                    Err(RouterError::NotFound(_)) if interrupted.load(Ordering::Relaxed) => {
                        debug!(
                            service_name = %forward.service_name,
                            "Forward gone after an interrupted delete"
                        );
                        Ok(())
                    }
                    Err(e) => {
                        if e.is_transient() {
                            interrupted.store(true, Ordering::Relaxed);
                        }
                        Err(e)
                    }
                    Ok(()) => Ok(()),
                }
            })
            .await
    }

    async fn login(&self, service: &ServiceSpec) -> Result<(), ReconcileError> {
        self.retry
            .run("login", || self.backend.ensure_logged_in())
            .await
            .map_err(|e| ReconcileError::new(service, e))
    }
}
