//! Thin HTTP server emulating the router's administration console
//!
//! Mimics the parts of the firmware the client depends on: cookie sessions,
//! single-use nonces, meta-refresh answers to POSTs and the error banner on
//! the follow-up page.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::header::{CONTENT_TYPE, COOKIE, ORIGIN, REFERER, SET_COOKIE};
use axum::http::{HeaderMap, HeaderName};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Form, Router};

pub const USERNAME: &str = "admin";
pub const PASSWORD: &str = "hunter2";

const META_REFRESH: &str = r#"<html><head><meta http-equiv="refresh" content="0; url=/cgi-bin/apphosting.ha"></head><body></body></html>"#;

/// One rule as the console stores it
#[derive(Debug, Clone)]
pub struct Rule {
    pub device: String,
    pub service_name: String,
    pub ports: String,
    pub device_port: String,
    pub delete_field: String,
}

/// Headers of a POST, for wire-format checks
#[derive(Debug, Clone, Default)]
pub struct PostHeaders {
    pub origin: Option<String>,
    pub referer: Option<String>,
    pub content_type: Option<String>,
}

#[derive(Debug, Default)]
pub struct ConsoleState {
    pub rules: Vec<Rule>,
    next_rule: u32,
    next_session: u32,
    authenticated: HashSet<String>,
    login_nonce: Option<String>,
    page_nonce: Option<String>,
    next_nonce: u32,
    pending_error: Option<String>,

    /// Successful logins
    pub logins: u32,
    /// Every login form posted, in order
    pub login_forms: Vec<HashMap<String, String>>,
    pub login_headers: Vec<PostHeaders>,
    /// Every apphosting form posted, in order
    pub forms: Vec<HashMap<String, String>>,
    pub form_headers: Vec<PostHeaders>,

    /// Render the login page without a nonce field
    pub omit_login_nonce: bool,
    /// Render the ports column without the internal port
    pub hide_device_port: bool,
    /// Reject the next add with this message
    pub reject_next_add: Option<String>,
    /// Delay every apphosting GET
    pub delay: Option<Duration>,
    /// Delay only the result page that follows a successful delete
    pub delay_after_delete: Option<Duration>,
    pending_delay: Option<Duration>,
}

impl ConsoleState {
    pub fn seed(&mut self, device: &str, service_name: &str, ports: &str, device_port: &str) {
        let delete_field = format!("delete_{}", self.next_rule);
        self.next_rule += 1;
        self.rules.push(Rule {
            device: device.to_string(),
            service_name: service_name.to_string(),
            ports: ports.to_string(),
            device_port: device_port.to_string(),
            delete_field,
        });
    }

    /// Drop every session, as a router reboot or idle timeout would.
    pub fn expire_sessions(&mut self) {
        self.authenticated.clear();
    }

    fn fresh_nonce(&mut self) -> String {
        self.next_nonce += 1;
        format!("{:08x}", 0x5eed_0000u32 + self.next_nonce)
    }

    fn render_listing(&mut self) -> String {
        let nonce = self.fresh_nonce();
        self.page_nonce = Some(nonce.clone());

        let banner = match self.pending_error.take() {
            Some(message) => format!(
                r#"<div class="error"><img id="error-message-icon" src="/images/icon_error.png" alt="">
                   <span id="error-message-text">{}</span></div>"#,
                message
            ),
            None => String::new(),
        };

        let rows: String = self
            .rules
            .iter()
            .map(|rule| {
                let ports = if self.hide_device_port {
                    rule.ports.clone()
                } else {
                    format!("{} -&gt; {}", rule.ports, rule.device_port)
                };
                format!(
                    r#"<tr><td>{}</td><td>All</td><td>{}</td><td>{}</td>
                       <td><input type="submit" name="{}" value="Delete"></td></tr>"#,
                    rule.device, rule.service_name, ports, rule.delete_field
                )
            })
            .collect();

        format!(
            r#"<!DOCTYPE html><html><head><title>Application Hosting</title></head><body>
            {banner}
            <form method="post" action="/cgi-bin/apphosting.ha">
            <input type="hidden" name="nonce" value="{nonce}">
            <table class="grid table100">
              <tr><th>Device</th><th>Public IP</th><th>Service</th><th>Ports</th><th>Delete</th></tr>
              {rows}
            </table>
            </form></body></html>"#
        )
    }

    fn render_login(&mut self) -> String {
        let nonce = self.fresh_nonce();
        self.login_nonce = Some(nonce.clone());
        let nonce_field = if self.omit_login_nonce {
            String::new()
        } else {
            format!(r#"<input type="hidden" name="nonce" value="{}">"#, nonce)
        };
        format!(
            r#"<html><body><form method="post" action="/cgi-bin/login.ha">
            {}<input name="username"><input type="password" name="password">
            </form></body></html>"#,
            nonce_field
        )
    }
}

pub type Console = Arc<Mutex<ConsoleState>>;

fn session_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(COOKIE)?
        .to_str()
        .ok()?
        .split(';')
        .filter_map(|pair| pair.trim().strip_prefix("SessionID="))
        .map(str::to_string)
        .next()
}

fn post_headers(headers: &HeaderMap) -> PostHeaders {
    let value = |name: HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    PostHeaders {
        origin: value(ORIGIN),
        referer: value(REFERER),
        content_type: value(CONTENT_TYPE),
    }
}

async fn login_page(State(console): State<Console>) -> Response {
    let mut state = console.lock().unwrap();
    state.next_session += 1;
    let cookie = format!("SessionID=s{}; Path=/", state.next_session);
    let body = state.render_login();
    ([(SET_COOKIE, cookie)], Html(body)).into_response()
}

async fn login_submit(
    State(console): State<Console>,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> Html<&'static str> {
    let mut state = console.lock().unwrap();
    state.login_headers.push(post_headers(&headers));
    state.login_forms.push(form.clone());

    let nonce_ok = state.login_nonce.take().as_deref() == form.get("nonce").map(String::as_str);
    let creds_ok = form.get("username").map(String::as_str) == Some(USERNAME)
        && form.get("password").map(String::as_str) == Some(PASSWORD);

    if let (true, true, Some(session)) = (nonce_ok, creds_ok, session_id(&headers)) {
        state.authenticated.insert(session);
        state.logins += 1;
    }
    Html(META_REFRESH)
}

async fn apphosting_page(State(console): State<Console>, headers: HeaderMap) -> Html<String> {
    let delay = {
        let mut state = console.lock().unwrap();
        state.pending_delay.take().or(state.delay)
    };
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }

    let mut state = console.lock().unwrap();
    let authenticated = session_id(&headers)
        .map(|s| state.authenticated.contains(&s))
        .unwrap_or(false);
    if authenticated {
        Html(state.render_listing())
    } else {
        Html(state.render_login())
    }
}

async fn apphosting_submit(
    State(console): State<Console>,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> Html<&'static str> {
    let mut state = console.lock().unwrap();
    let authenticated = session_id(&headers)
        .map(|s| state.authenticated.contains(&s))
        .unwrap_or(false);
    if !authenticated {
        return Html(META_REFRESH);
    }

    state.form_headers.push(post_headers(&headers));
    state.forms.push(form.clone());

    let nonce_ok = state.page_nonce.take().as_deref() == form.get("nonce").map(String::as_str);
    if !nonce_ok {
        state.pending_error = Some("The page has expired, please try again".to_string());
        return Html(META_REFRESH);
    }

    if form.contains_key("Add") {
        if let Some(message) = state.reject_next_add.take() {
            state.pending_error = Some(message);
            return Html(META_REFRESH);
        }
        let get = |key: &str| form.get(key).cloned().unwrap_or_default();
        let device = get("device_manual");
        let service_name = get("serviceName");
        let ports = get("extMinPort");
        let device_port = get("intStartPort");
        state.seed(&device, &service_name, &ports, &device_port);
    } else if let Some(field) = form
        .iter()
        .find(|(_, value)| value.as_str() == "Delete")
        .map(|(key, _)| key.clone())
    {
        let before = state.rules.len();
        state.rules.retain(|rule| rule.delete_field != field);
        if state.rules.len() == before {
            state.pending_error = Some("Entry not found".to_string());
        } else {
            state.pending_delay = state.delay_after_delete;
        }
    }

    Html(META_REFRESH)
}

/// Start a console on an ephemeral port. Returns its base URL.
pub async fn start_console() -> (String, Console) {
    let console: Console = Arc::new(Mutex::new(ConsoleState::default()));

    let app = Router::new()
        .route("/cgi-bin/login.ha", get(login_page).post(login_submit))
        .route(
            "/cgi-bin/apphosting.ha",
            get(apphosting_page).post(apphosting_submit),
        )
        .with_state(console.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind console server");
    let addr = listener.local_addr().expect("Failed to get local address");

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}", addr), console)
}

/// Start a server that accepts connections and never answers. Returns its
/// base URL and a count of accepted connections.
pub async fn start_hung_console() -> (String, Arc<AtomicUsize>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind hung server");
    let addr = listener.local_addr().expect("Failed to get local address");
    let connections = Arc::new(AtomicUsize::new(0));

    let accepted = connections.clone();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            accepted.fetch_add(1, Ordering::SeqCst);
            held.push(socket);
        }
    });

    (format!("http://{}", addr), connections)
}
