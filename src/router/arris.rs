//! Arris NVG443B administration console client
//!
//! The console has no API. Everything happens through two CGI pages:
//! - `/cgi-bin/login.ha` renders a login form with a nonce
//! - `/cgi-bin/apphosting.ha` renders the forward table, the add form and
//!   one delete button per row, all sharing a single-use nonce
//!
//! Every mutating POST answers with a meta-refresh placeholder, so the
//! outcome is read from a follow-up GET of the same page: an error banner
//! means the router refused, anything else counts as success.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ORIGIN, REFERER};
use reqwest::{redirect, Client, RequestBuilder};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::scraping;
use super::session::{SessionState, DEFAULT_SESSION_TTL};
use super::{
    ExistingRulePolicy, Forward, Listing, MissingRulePolicy, RouterBackend, RouterError,
};

pub const LOGIN_PAGE: &str = "/cgi-bin/login.ha";
pub const APPHOSTING_PAGE: &str = "/cgi-bin/apphosting.ha";

/// Connection settings for the console
#[derive(Debug, Clone)]
pub struct ArrisConfig {
    /// Console base URL (e.g., "http://192.168.1.254")
    pub base_url: String,
    pub username: String,
    pub password: String,
    /// Upper bound for any single HTTP exchange
    pub request_timeout: Duration,
    /// Re-login once the session is older than this
    pub session_ttl: Duration,
    pub existing_rule: ExistingRulePolicy,
    pub missing_rule: MissingRulePolicy,
}

impl ArrisConfig {
    pub fn new(
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            username: username.into(),
            password: password.into(),
            request_timeout: Duration::from_secs(30),
            session_ttl: DEFAULT_SESSION_TTL,
            existing_rule: ExistingRulePolicy::default(),
            missing_rule: MissingRulePolicy::default(),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    pub fn with_existing_rule(mut self, policy: ExistingRulePolicy) -> Self {
        self.existing_rule = policy;
        self
    }

    pub fn with_missing_rule(mut self, policy: MissingRulePolicy) -> Self {
        self.missing_rule = policy;
        self
    }
}

// ============================================================================
// Form bodies (field order and names are what the firmware expects)
// ============================================================================

#[derive(Serialize)]
struct LoginForm<'a> {
    username: &'a str,
    password: &'a str,
    nonce: &'a str,
}

#[derive(Serialize)]
struct AddForm<'a> {
    nonce: &'a str,
    device_select: &'a str,
    device_manual: &'a str,
    #[serde(rename = "serviceName")]
    service_name: &'a str,
    service: &'static str,
    protocol: &'static str,
    #[serde(rename = "extMinPort")]
    ext_min_port: &'a str,
    #[serde(rename = "extMaxPort")]
    ext_max_port: &'static str,
    #[serde(rename = "intStartPort")]
    int_start_port: &'a str,
    publicip: &'static str,
    #[serde(rename = "Add")]
    add: &'static str,
}

impl<'a> AddForm<'a> {
    fn new(nonce: &'a str, forward: &'a Forward) -> Self {
        Self {
            nonce,
            device_select: &forward.device_name,
            device_manual: &forward.device_name,
            service_name: &forward.service_name,
            service: "custom",
            protocol: "both",
            ext_min_port: &forward.ports,
            ext_max_port: "",
            int_start_port: &forward.device_port,
            publicip: "",
            add: "Add",
        }
    }
}

// ============================================================================
// SBIO: I/O implementation (real HTTP client)
// ============================================================================

pub struct ArrisClient {
    http: Client,
    config: ArrisConfig,
    session: Mutex<SessionState>,
    cancel: CancellationToken,
}

impl ArrisClient {
    /// Create a client. Nothing is sent until the first call.
    ///
    /// Cancelling `cancel` aborts any in-flight exchange with
    /// `RouterError::Cancelled`.
    pub fn new(config: ArrisConfig, cancel: CancellationToken) -> Result<Self, RouterError> {
        // The console answers with redirects we must not follow on our own
        let http = Client::builder()
            .cookie_store(true)
            .redirect(redirect::Policy::none())
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| RouterError::Transport(format!("building HTTP client: {}", e)))?;

        let session = Mutex::new(SessionState::new(config.session_ttl));
        Ok(Self {
            http,
            config,
            session,
            cancel,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// Snapshot of the current session state.
    pub async fn session(&self) -> SessionState {
        self.session.lock().await.clone()
    }

    fn url(&self, page: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), page)
    }

    fn post(&self, url: &str) -> RequestBuilder {
        self.http
            .post(url)
            .header(ORIGIN, self.config.base_url.trim_end_matches('/'))
            .header(REFERER, url)
    }

    /// Run one HTTP exchange and return the body, whatever the status.
    async fn send(&self, request: RequestBuilder) -> Result<String, RouterError> {
        let exchange = async {
            let response = request.send().await?;
            response.text().await
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(RouterError::Cancelled),
            body = exchange => body.map_err(RouterError::from),
        }
    }

    /// Log in while the caller holds the session lock.
    async fn login_locked(&self, state: &mut SessionState) -> Result<(), RouterError> {
        let login_url = self.url(LOGIN_PAGE);

        let page = self
            .send(self.http.get(&login_url))
            .await
            .map_err(|e| auth_error("fetching login page", e))?;

        let nonce = scraping::extract_nonce(&page)
            .ok_or_else(|| RouterError::auth("could not find nonce in login page"))?;

        let form = LoginForm {
            username: &self.config.username,
            password: &self.config.password,
            nonce: &nonce,
        };
        self.send(self.post(&login_url).form(&form))
            .await
            .map_err(|e| auth_error("submitting login", e))?;

        // The console does not tell us whether the credentials worked. A bad
        // session shows up as a missing forward table on the next listing.
        state.mark_authenticated();
        info!("Authenticated to {}", self.config.base_url);
        Ok(())
    }

    fn parse_listing(page: &str) -> Result<Listing, RouterError> {
        let forwards = scraping::parse_forward_table(page)?;
        let nonce = scraping::extract_nonce(page).ok_or_else(|| {
            RouterError::Parse("could not find nonce in apphosting page".to_string())
        })?;
        Ok(Listing { forwards, nonce })
    }

    /// POST a form to the apphosting page, then read the real result page.
    async fn submit<T: Serialize + ?Sized>(&self, form: &T) -> Result<(), RouterError> {
        let url = self.url(APPHOSTING_PAGE);

        // Only a meta-refresh placeholder comes back from the POST itself
        self.send(self.post(&url).form(form)).await?;

        let result = self.send(self.http.get(&url)).await?;
        match scraping::extract_error_banner(&result) {
            Some(message) => Err(RouterError::Rejected(message)),
            None => Ok(()),
        }
    }

    async fn delete_row(&self, observed: &Forward, nonce: &str) -> Result<(), RouterError> {
        let field = observed.delete_id.as_deref().ok_or_else(|| {
            RouterError::Parse(format!(
                "row for '{}' has no delete control",
                observed.service_name
            ))
        })?;
        let form = [("nonce", nonce), (field, "Delete")];
        self.submit(&form[..]).await
    }
}

fn auth_error(step: &str, e: RouterError) -> RouterError {
    match e {
        RouterError::Cancelled => RouterError::Cancelled,
        other => RouterError::Auth {
            transient: other.is_transient(),
            message: format!("{}: {}", step, other),
        },
    }
}

#[async_trait]
impl RouterBackend for ArrisClient {
    async fn login(&self) -> Result<(), RouterError> {
        let mut state = self.session.lock().await;
        self.login_locked(&mut state).await
    }

    async fn ensure_logged_in(&self) -> Result<(), RouterError> {
        let mut state = self.session.lock().await;
        if state.is_fresh() {
            return Ok(());
        }
        debug!("Router session is stale, logging in again");
        self.login_locked(&mut state).await
    }

    async fn list_forwards(&self) -> Result<Listing, RouterError> {
        let page = self.send(self.http.get(self.url(APPHOSTING_PAGE))).await?;

        match Self::parse_listing(&page) {
            Ok(listing) => Ok(listing),
            Err(e) => {
                if matches!(e, RouterError::Parse(_)) {
                    // Most likely logged out: make the next check log in again
                    self.session.lock().await.invalidate();
                }
                Err(e)
            }
        }
    }

    async fn add_forward(&self, forward: &Forward) -> Result<(), RouterError> {
        let listing = self.list_forwards().await?;
        let mut nonce = listing.nonce.clone();

        if let Some(existing) = listing.find(&forward.service_name) {
            match self.config.existing_rule {
                ExistingRulePolicy::Skip => {
                    debug!(
                        service_name = %forward.service_name,
                        "Forward already present, skipping"
                    );
                    return Ok(());
                }
                ExistingRulePolicy::Replace if existing.matches(forward) => {
                    debug!(
                        service_name = %forward.service_name,
                        "Forward already present with the same ports"
                    );
                    return Ok(());
                }
                ExistingRulePolicy::Replace => {
                    warn!(
                        service_name = %forward.service_name,
                        "Replacing forward {} -> {} with {} -> {}",
                        existing.ports,
                        existing.device_port,
                        forward.ports,
                        forward.device_port
                    );
                    self.delete_row(existing, &nonce).await?;
                    // The nonce was consumed by the delete
                    nonce = self.list_forwards().await?.nonce;
                }
            }
        }

        self.submit(&AddForm::new(&nonce, forward)).await
    }

    async fn delete_forward(&self, forward: &Forward) -> Result<(), RouterError> {
        let listing = self.list_forwards().await?;

        match listing.find(&forward.service_name) {
            Some(observed) => self.delete_row(observed, &listing.nonce).await,
            None => match self.config.missing_rule {
                MissingRulePolicy::Fail => {
                    Err(RouterError::NotFound(forward.service_name.clone()))
                }
                MissingRulePolicy::Ignore => {
                    debug!(
                        service_name = %forward.service_name,
                        "Forward already absent"
                    );
                    Ok(())
                }
            },
        }
    }
}
