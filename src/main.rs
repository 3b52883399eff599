use std::process;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use nodeport_router::cli::Args;
use nodeport_router::config::{load_env_file, Config};
use nodeport_router::reconcile::Reconciler;
use nodeport_router::router::{ArrisClient, RouterBackend};
use nodeport_router::watch;

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(args.log_filter())),
        )
        .init();

    // Load .env, then parse again so its variables reach the env fallbacks
    match load_env_file(args.env_file.as_deref()) {
        Ok(Some(path)) => info!("Loaded environment from {}", path.display()),
        Ok(None) => {}
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    }
    let args = Args::parse();

    let config = match Config::from_args(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    };

    let cancel = CancellationToken::new();
    let router = match ArrisClient::new(config.router.clone(), cancel.clone()) {
        Ok(router) => Arc::new(router),
        Err(e) => {
            error!("Error creating router client: {}", e);
            process::exit(1);
        }
    };

    info!("Authenticating to {}", router.base_url());
    if let Err(e) = router.login().await {
        error!("Error logging in to router: {}", e);
        process::exit(1);
    }

    let client = match watch::connect().await {
        Ok(client) => client,
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    };

    let reconciler = Reconciler::new(router, config.device_name).with_retry(config.retry);

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            shutdown.cancel();
        }
    });

    if let Err(e) = watch::run(client, &reconciler, cancel).await {
        error!("Error running controller: {}", e);
        process::exit(1);
    }
}
