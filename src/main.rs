use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use push_notifier::{
    cfg::Config,
    logger::setup_tracing,
    notification::svc::Notifier,
    server::{AppState, Server},
    store,
    transport::WebPushTransport,
};
use tokio::{net::TcpListener, sync::oneshot};
use tracing::{error, info};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    setup_tracing();

    let config = Config::from_env().context("invalid configuration")?;
    let client = reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .context("failed to build http client")?;

    let repository = store::from_config(&config.store, client.clone());
    let transport = Arc::new(WebPushTransport::new(
        client,
        &config.vapid,
        config.push_ttl_seconds,
    ));
    let notifier = Notifier::new(
        repository.clone(),
        transport,
        config.max_concurrent_deliveries,
    );
    let state = Arc::new(AppState {
        repository,
        notifier,
        vapid_public_key: config.vapid.public_key.clone(),
    });
    info!(
        store = config.store.kind(),
        max_concurrent_deliveries = config.max_concurrent_deliveries,
        "push notifier configured"
    );

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                let _ = shutdown_tx.send(());
            }
            Err(e) => error!(error = %e, "failed to listen for shutdown signal"),
        }
    });

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    Server::start(listener, state, shutdown_rx).await
}
