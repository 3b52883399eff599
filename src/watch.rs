//! Kubernetes service watcher
//!
//! Turns the raw `Service` watch stream into [`ServiceEvent`]s and feeds them
//! to the reconciler one at a time. The watch stream only says "this object
//! now looks like X", so a cache of last known specs is kept to recover the
//! previous spec for updates and deletes.

use std::collections::{HashMap, HashSet};

use futures::StreamExt;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::runtime::watcher::{self, Event};
use kube::runtime::WatchStreamExt;
use kube::{Api, Client, ResourceExt};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::reconcile::{Reconciler, ServiceEvent, ServicePort, ServiceSpec};
use crate::router::RouterBackend;

const NODE_PORT: &str = "NodePort";

#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Kubernetes client error: {0}")]
    Client(#[from] kube::Error),

    #[error("Failed to sync service cache: {0}")]
    Sync(#[from] watcher::Error),

    #[error("Service watch stream ended")]
    Closed,
}

// ============================================================================
// SBIO: Pure conversion (no I/O)
// ============================================================================

fn service_key(service: &Service) -> String {
    format!(
        "{}/{}",
        service.namespace().unwrap_or_default(),
        service.name_any()
    )
}

/// Reduce a cluster service to what the reconciler needs.
///
/// Returns `None` for anything but NodePort services.
pub fn service_spec(service: &Service) -> Option<ServiceSpec> {
    let spec = service.spec.as_ref()?;
    if spec.type_.as_deref() != Some(NODE_PORT) {
        return None;
    }

    let ports = spec
        .ports
        .iter()
        .flatten()
        .map(|p| ServicePort {
            name: p.name.clone(),
            port: p.port,
            // Named target ports fall back to the declared port
            target_port: match &p.target_port {
                Some(IntOrString::Int(port)) => Some(*port),
                _ => None,
            },
            node_port: p.node_port,
        })
        .collect();

    Some(ServiceSpec {
        namespace: service.namespace().unwrap_or_default(),
        name: service.name_any(),
        ports,
    })
}

/// Last known spec of every NodePort service seen so far.
#[derive(Debug, Default)]
pub struct ServiceCache {
    known: HashMap<String, ServiceSpec>,
    /// Keys seen since the current relist started
    relisting: Option<HashSet<String>>,
}

impl ServiceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&ServiceSpec> {
        self.known.get(key)
    }

    /// Fold one watch event into the cache, returning the lifecycle events
    /// it implies.
    pub fn observe(&mut self, event: Event<Service>) -> Vec<ServiceEvent> {
        match event {
            Event::Init => {
                self.relisting = Some(HashSet::new());
                Vec::new()
            }
            Event::InitApply(service) => {
                if let Some(seen) = self.relisting.as_mut() {
                    seen.insert(service_key(&service));
                }
                self.apply(&service).into_iter().collect()
            }
            Event::InitDone => {
                // Anything not relisted disappeared while we were not watching
                let Some(seen) = self.relisting.take() else {
                    return Vec::new();
                };
                let gone: Vec<String> = self
                    .known
                    .keys()
                    .filter(|key| !seen.contains(*key))
                    .cloned()
                    .collect();
                gone.into_iter()
                    .filter_map(|key| self.known.remove(&key))
                    .map(ServiceEvent::Deleted)
                    .collect()
            }
            Event::Apply(service) => self.apply(&service).into_iter().collect(),
            Event::Delete(service) => {
                let last_known = self
                    .known
                    .remove(&service_key(&service))
                    .or_else(|| service_spec(&service));
                last_known.map(ServiceEvent::Deleted).into_iter().collect()
            }
        }
    }

    fn apply(&mut self, service: &Service) -> Option<ServiceEvent> {
        let key = service_key(service);
        match service_spec(service) {
            Some(new) => match self.known.insert(key, new.clone()) {
                Some(old) => Some(ServiceEvent::Updated { old, new }),
                None => Some(ServiceEvent::Added(new)),
            },
            // No longer a NodePort service: its forwards have to go
            None => self.known.remove(&key).map(ServiceEvent::Deleted),
        }
    }
}

// ============================================================================
// I/O boundary
// ============================================================================

/// Build a cluster client from the in-cluster environment or kubeconfig.
pub async fn connect() -> Result<Client, WatchError> {
    Ok(Client::try_default().await?)
}

/// Watch services in all namespaces until `cancel` fires.
///
/// Failures of individual events are logged and the loop moves on. A watch
/// failure before the initial listing completes is returned, since nothing
/// can be reconciled without it.
pub async fn run<B: RouterBackend>(
    client: Client,
    reconciler: &Reconciler<B>,
    cancel: CancellationToken,
) -> Result<(), WatchError> {
    let api: Api<Service> = Api::all(client);
    let mut stream = watcher::watcher(api, watcher::Config::default())
        .default_backoff()
        .boxed();

    let mut cache = ServiceCache::new();
    let mut synced = false;
    info!("Waiting for service cache to sync...");

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Service watcher stopped");
                return Ok(());
            }
            next = stream.next() => next,
        };

        let event = match next {
            Some(Ok(event)) => event,
            Some(Err(e)) if synced => {
                warn!("Service watch error, relisting: {}", e);
                continue;
            }
            Some(Err(e)) => return Err(WatchError::Sync(e)),
            None => return Err(WatchError::Closed),
        };

        let init_done = matches!(event, Event::InitDone);
        for service_event in cache.observe(event) {
            let service = service_event.service();
            debug!(namespace = %service.namespace, name = %service.name, "Handling {:?}", service_event);
            if let Err(e) = reconciler.handle(&service_event).await {
                error!(
                    namespace = %e.namespace,
                    name = %e.name,
                    "Error syncing service: {}",
                    e.source
                );
            }
        }

        if init_done && !synced {
            synced = true;
            info!(
                "Started watching Services for NodePort changes ({} known)",
                cache.len()
            );
        }
    }
}
