use anyhow::{Context, Result};
use spiral_webhook_receiver::{
    cache::{CacheRevalidator, TagRevalidator},
    config::Config,
    http_server::{self, AppState, ReceiverSettings},
    logging,
    provider::SquareClient,
    queue::WebhookQueue,
    router::EventRouter,
    store::ListStore,
    upstash::UpstashStore,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    logging::init(&config.log_level);

    info!(
        app_env = %config.app_env,
        square_environment = %config.square_environment,
        signature_scheme = ?config.signature_scheme,
        "Starting Square webhook receiver"
    );

    let queue = build_queue(&config)?;

    let provider = SquareClient::new(&config.square_config())
        .context("Failed to build Square client")?;
    if config.square_access_token.is_none() {
        warn!("SQUARE_ACCESS_TOKEN is not set; inventory and catalog refreshes will fail");
    }

    let cache = Arc::new(match config.revalidate_url.as_deref() {
        Some(url) if !url.trim().is_empty() => {
            TagRevalidator::with_hook(url, config.revalidate_secret.clone())
                .context("Failed to build revalidation hook client")?
        }
        _ => TagRevalidator::new(),
    });

    let router = EventRouter::new(
        Arc::new(provider),
        cache.clone() as Arc<dyn CacheRevalidator>,
        config.retry_options(),
    );

    let state = AppState::new(
        ReceiverSettings::from_config(&config),
        queue,
        Arc::new(router),
        cache,
    );

    let addr = config.server_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind HTTP server on {addr}"))?;

    http_server::serve(listener, http_server::router(state), shutdown_signal()).await?;
    Ok(())
}

fn build_queue(config: &Config) -> Result<WebhookQueue> {
    let namespace = config.queue_namespace();
    let Some((url, token)) = config.queue_store_credentials() else {
        warn!("UPSTASH_REDIS_REST_URL/UPSTASH_REDIS_REST_TOKEN not set; webhook queue disabled");
        return Ok(WebhookQueue::new(None, namespace));
    };

    let store: Arc<dyn ListStore> =
        Arc::new(UpstashStore::new(url, token).context("Failed to build queue store client")?);
    let queue = WebhookQueue::new(Some(store), namespace);
    info!(live_key = queue.live_key(), dead_letter_key = queue.dead_letter_key(), "Webhook queue enabled");
    Ok(queue)
}

/// Waits for CTRL+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received CTRL+C, starting graceful shutdown"),
        () = terminate => info!("Received SIGTERM, starting graceful shutdown"),
    }
}
