use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tourbook_api::{app, AppState, AuthConfig, RetryPolicy};
use tourbook_core::{MockPaymentGateway, ReservationCoordinator};
use tourbook_store::{Config, DbClient, PgStore};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tourbook_api=debug,tourbook_core=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::debug!(?config, "configuration loaded");
    tracing::info!("Starting Tourbook API on port {}", config.server.port);

    let db = DbClient::new(&config.database)
        .await
        .context("Failed to connect to database")?;
    db.migrate().await.context("Failed to run migrations")?;

    let store = Arc::new(PgStore::new(db.pool.clone(), config.database.lock_timeout()));
    let coordinator = Arc::new(ReservationCoordinator::new(store, config.booking.max_party_size));

    tracing::warn!("No live payment gateway configured; using the mock gateway");

    let app_state = AppState {
        coordinator,
        gateway: Arc::new(MockPaymentGateway),
        auth: AuthConfig {
            secret: config.auth.jwt_secret.clone(),
            expiration: config.auth.jwt_expiration_seconds,
        },
        retry: RetryPolicy::from(&config.retry),
        currency: config.booking.currency.clone(),
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
