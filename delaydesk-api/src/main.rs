use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use delaydesk_api::{app, AppState, AuthConfig};
use delaydesk_order::DelayDesk;
use delaydesk_store::{app_config::Config, DbClient, PgDelayRepository};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "delaydesk_api=debug,delaydesk_order=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting delaydesk API on port {}", config.server.port);

    let db = DbClient::new(&config.database)
        .await
        .context("Failed to connect to Postgres")?;
    db.migrate().await.context("Failed to run migrations")?;

    let repo = PgDelayRepository::new(db.pool.clone(), config.workflow.lock_timeout_ms);
    let desk = DelayDesk::new(Arc::new(repo), config.workflow.clone());

    let app_state = AppState {
        desk: Arc::new(desk),
        auth: AuthConfig {
            secret: config.auth.jwt_secret.clone(),
        },
    };

    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
