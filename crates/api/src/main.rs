use std::sync::Arc;

use anyhow::Context;

use neuroviz_infra::config::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    neuroviz_observability::init();

    let settings = Settings::from_env().context("invalid configuration")?;
    if settings.jwt_secret_is_default {
        tracing::warn!("JWT_SECRET not set; using insecure dev default");
    }

    let services = Arc::new(neuroviz_api::app::services::build_services(&settings).await?);
    let app = neuroviz_api::app::build_app(services.clone(), settings.jwt_secret.clone());

    let listener = tokio::net::TcpListener::bind(settings.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", settings.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("draining in-flight jobs");
    services.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
