//! Router backends
//!
//! A router backend is anything that can hold a port-forwarding table:
//! - `login` / `ensure_logged_in` to keep an authenticated session
//! - `list_forwards` to read the current table (plus the page nonce)
//! - `add_forward` / `delete_forward` to mutate it
//!
//! The only production backend is the Arris NVG443B administration console
//! ([`ArrisClient`]), which is scraped over HTML forms.

pub mod arris;
pub mod retry;
pub mod scraping;
pub mod session;

#[cfg(test)]
pub mod mock;

pub use arris::{ArrisClient, ArrisConfig};
pub use retry::RetryPolicy;
pub use session::SessionState;

use async_trait::async_trait;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Data structures (pure, no I/O)
// ============================================================================

/// One port-forwarding rule, either computed from a service or scraped from
/// the router's listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Forward {
    /// Internal host the traffic is forwarded to
    pub device_name: String,
    /// Rule label, also the key used to match desired and observed rules
    pub service_name: String,
    /// External (WAN) port
    pub ports: String,
    /// Internal port on the device
    pub device_port: String,
    /// Informational only
    pub public_ip: String,
    /// Form field name of the row's delete button (observed rules only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delete_id: Option<String>,
}

impl Forward {
    /// Build a desired forward for `device_name`.
    pub fn desired(
        device_name: impl Into<String>,
        service_name: impl Into<String>,
        ports: impl Into<String>,
        device_port: impl Into<String>,
    ) -> Self {
        Self {
            device_name: device_name.into(),
            service_name: service_name.into(),
            ports: ports.into(),
            device_port: device_port.into(),
            public_ip: String::new(),
            delete_id: None,
        }
    }

    /// Whether `other` describes the same rule.
    ///
    /// The service name and external port must be equal. The device port is
    /// only compared when both sides carry one, since the listing does not
    /// always render it.
    pub fn matches(&self, other: &Forward) -> bool {
        if self.service_name != other.service_name || self.ports != other.ports {
            return false;
        }
        self.device_port.is_empty()
            || other.device_port.is_empty()
            || self.device_port == other.device_port
    }
}

/// The router's current table together with the nonce of the page it was
/// read from. The nonce is single use and only valid for that page render.
#[derive(Debug, Clone, Default)]
pub struct Listing {
    pub forwards: Vec<Forward>,
    pub nonce: String,
}

impl Listing {
    /// Find an observed forward by service name.
    pub fn find(&self, service_name: &str) -> Option<&Forward> {
        self.forwards.iter().find(|f| f.service_name == service_name)
    }
}

/// What to do when an add targets a service name the router already has.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum ExistingRulePolicy {
    /// Any row with the same service name satisfies the add
    Skip,
    /// Same-value rows satisfy the add, stale rows are deleted and re-added
    #[default]
    Replace,
}

/// What to do when a delete targets a service name the router does not have.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum MissingRulePolicy {
    /// Report `RouterError::NotFound`
    #[default]
    Fail,
    /// Treat the delete as already done
    Ignore,
}

#[derive(Error, Debug)]
pub enum RouterError {
    /// `transient` is set when the login failed on the network rather than
    /// on the console's answer.
    #[error("Authentication failed: {message}")]
    Auth { message: String, transient: bool },

    #[error("Unexpected page content: {0}")]
    Parse(String),

    #[error("Forward '{0}' not found on router")]
    NotFound(String),

    #[error("Router rejected the request: {0}")]
    Rejected(String),

    #[error("HTTP error: {0}")]
    Transport(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Request cancelled")]
    Cancelled,
}

impl RouterError {
    /// Errors worth retrying: network failures and timeouts. Everything else
    /// is a statement from the router (or about its pages) that a retry
    /// would not change.
    pub fn is_transient(&self) -> bool {
        match self {
            RouterError::Transport(_) | RouterError::Timeout(_) => true,
            RouterError::Auth { transient, .. } => *transient,
            _ => false,
        }
    }

    pub(crate) fn auth(message: impl Into<String>) -> Self {
        RouterError::Auth {
            message: message.into(),
            transient: false,
        }
    }
}

impl From<reqwest::Error> for RouterError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RouterError::Timeout(e.to_string())
        } else {
            RouterError::Transport(e.to_string())
        }
    }
}

// ============================================================================
// SBIO: Trait for abstraction (allows mocking in tests)
// ============================================================================

#[async_trait]
pub trait RouterBackend: Send + Sync {
    /// Authenticate a new session unconditionally.
    async fn login(&self) -> Result<(), RouterError>;

    /// Authenticate only if the current session is missing or stale.
    async fn ensure_logged_in(&self) -> Result<(), RouterError>;

    /// Read the current forwarding table.
    async fn list_forwards(&self) -> Result<Listing, RouterError>;

    async fn add_forward(&self, forward: &Forward) -> Result<(), RouterError>;

    async fn delete_forward(&self, forward: &Forward) -> Result<(), RouterError>;
}
