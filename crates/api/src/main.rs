use anyhow::Context;

use authgate_api::app::{self, AppState};
use authgate_api::config::ApiConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    authgate_observability::init();

    let config = ApiConfig::from_env().context("reading configuration")?;
    let (services, sessions) = app::services::build_services(&config).await?;

    let app = app::build_app(AppState {
        services,
        sessions: sessions.clone(),
        base_path: config.base_path.clone(),
    });

    let addr = config.listen_addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!(
        addr = %listener.local_addr()?,
        base_path = %config.base_path,
        "listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    sessions.shutdown_all().await;
    tracing::info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "could not listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
