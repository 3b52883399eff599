use clap::{ArgAction, Parser};
use std::path::PathBuf;

use crate::router::{ExistingRulePolicy, MissingRulePolicy};

#[derive(Parser, Debug)]
#[command(name = "nodeport-router")]
#[command(about = "Mirror Kubernetes NodePort services into a router's port forwards")]
#[command(version)]
pub struct Args {
    /// Router device name traffic is forwarded to (the cluster entrypoint)
    #[arg(long, env = "K8S_HOST", value_name = "DEVICE")]
    pub device_name: Option<String>,

    /// Router administration console base URL
    #[arg(long, env = "ROUTER_BASE", value_name = "URL")]
    pub router_base: Option<String>,

    /// Router admin username
    #[arg(long, env = "ROUTER_ADMIN", value_name = "USER")]
    pub router_admin: Option<String>,

    /// Router admin password
    #[arg(long, env = "ROUTER_PASS", value_name = "PASSWORD", hide_env_values = true)]
    pub router_pass: Option<String>,

    /// Path to a .env file (default: ./.env if present)
    #[arg(long, value_name = "FILE")]
    pub env_file: Option<PathBuf>,

    /// Timeout for a single router request, in seconds
    #[arg(long, default_value = "30", value_name = "SECS")]
    pub request_timeout: u64,

    /// Log in again once the session is older than this, in seconds
    #[arg(long, default_value = "300", value_name = "SECS")]
    pub session_ttl: u64,

    /// Attempts per router call on network errors (1 disables retries)
    #[arg(long, default_value = "3")]
    pub retry_attempts: u32,

    /// What to do when a forward to delete is not on the router
    #[arg(long, value_enum, default_value = "fail")]
    pub missing_rule: MissingRulePolicy,

    /// What to do when a forward to add already exists on the router
    #[arg(long, value_enum, default_value = "replace")]
    pub existing_rule: ExistingRulePolicy,

    /// Enable verbose logging output (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl Args {
    /// Default log directive for the verbosity count
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}
