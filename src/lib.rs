//! Keep a consumer router's port-forwarding table in sync with the NodePort
//! services of a Kubernetes cluster.
//!
//! - [`router`]: the router console client (session, scraping, mutations)
//! - [`reconcile`]: service specs → forwards, and the event handlers
//! - [`watch`]: the Kubernetes service watch feeding the reconciler

pub mod cli;
pub mod config;
pub mod reconcile;
pub mod router;
pub mod watch;
