//! Service → forward reconciliation
//!
//! Cluster services are reduced to a [`ServiceSpec`] at the boundary (only
//! NodePort services get this far). From a service spec the engine derives one
//! desired [`Forward`] per exposed port and drives a
//! [`RouterBackend`](crate::router::RouterBackend) to match.

mod reconciler;

pub use reconciler::{ReconcileError, Reconciler};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::router::Forward;

// ============================================================================
// SBIO: Pure data structures
// ============================================================================

/// One port entry of a NodePort service
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePort {
    pub name: Option<String>,
    /// Declared service port
    pub port: i32,
    /// Numeric target port, if the service declares one
    pub target_port: Option<i32>,
    pub node_port: Option<i32>,
}

impl ServicePort {
    /// Port traffic lands on inside the cluster: the target port when set,
    /// otherwise the declared port.
    pub fn effective_port(&self) -> i32 {
        match self.target_port {
            Some(target) if target != 0 => target,
            _ => self.port,
        }
    }

    /// The node port, when one is actually allocated.
    pub fn exposed_node_port(&self) -> Option<i32> {
        self.node_port.filter(|p| *p != 0)
    }
}

/// What the reconciler needs to know about a NodePort service
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub namespace: String,
    pub name: String,
    pub ports: Vec<ServicePort>,
}

impl ServiceSpec {
    /// Cache key, `namespace/name`
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// A service lifecycle event, in delivery order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceEvent {
    Added(ServiceSpec),
    Updated { old: ServiceSpec, new: ServiceSpec },
    /// Carries the last known spec of the service
    Deleted(ServiceSpec),
}

impl ServiceEvent {
    /// The spec that names this event in logs
    pub fn service(&self) -> &ServiceSpec {
        match self {
            ServiceEvent::Added(spec) | ServiceEvent::Deleted(spec) => spec,
            ServiceEvent::Updated { new, .. } => new,
        }
    }
}

// ============================================================================
// SBIO: Pure functions (no I/O)
// ============================================================================

/// Rule label for one port of a service: `{namespace}-{name}-{port}-{nodePort}`.
pub fn forward_name(service: &ServiceSpec, port: i32, node_port: i32) -> String {
    format!("{}-{}-{}-{}", service.namespace, service.name, port, node_port)
}

/// One desired forward per port with a nonzero node port.
///
/// The WAN port is the port traffic lands on in the cluster (target port,
/// or declared port without one); the device port is the node port.
pub fn affected_forwards(device_name: &str, service: &ServiceSpec) -> Vec<Forward> {
    service
        .ports
        .iter()
        .filter_map(|port| {
            let node_port = port.exposed_node_port()?;
            let effective = port.effective_port();
            Some(Forward::desired(
                device_name,
                forward_name(service, effective, node_port),
                effective.to_string(),
                node_port.to_string(),
            ))
        })
        .collect()
}

/// `port name → (node port, effective port)` for every exposed port.
fn exposed_ports(service: &ServiceSpec) -> BTreeMap<String, (i32, i32)> {
    service
        .ports
        .iter()
        .filter_map(|port| {
            let node_port = port.exposed_node_port()?;
            Some((
                port.name.clone().unwrap_or_default(),
                (node_port, port.effective_port()),
            ))
        })
        .collect()
}

/// Whether an update changes anything the router cares about.
pub fn node_ports_changed(old: &ServiceSpec, new: &ServiceSpec) -> bool {
    exposed_ports(old) != exposed_ports(new)
}
