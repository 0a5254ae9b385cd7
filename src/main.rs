use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use action_runner::config::ServerConfig;
use action_runner::dispatch::Registry;
use action_runner::github::{WorkflowLauncher, build_client};
use action_runner::server::{AppState, build_router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "action_runner=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env().context("loading configuration")?;
    tracing::debug!(?config, "Loaded configuration");

    let github =
        build_client(config.github_token.clone(), None).context("building GitHub client")?;
    let registry = Arc::new(Registry::new(
        WorkflowLauncher::new(github),
        config.registry_config(),
    ));
    let app = build_router(AppState::new(Arc::clone(&registry)));

    let listener = TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("binding {}", config.bind))?;
    tracing::info!(
        addr = %config.bind,
        callback = %config.callback_url_template(),
        "listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutting down");
            registry.shutdown();
        })
        .await
        .context("serving")?;
    Ok(())
}
