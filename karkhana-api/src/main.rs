use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use karkhana_api::{app, AppState};
use karkhana_core::WorkshopService;
use karkhana_store::{Config, DbClient, StoreKarigarRepository, StoreStoneRepository, StoreWorkOrderRepository};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "karkhana_api=debug,tower_http=debug,axum::rejection=trace".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting Karkhana API on port {}", config.server.port);

    let db = DbClient::new(&config.database.url, config.database.max_connections)
        .await
        .context("Failed to connect to database")?;
    db.migrate().await.context("Failed to run migrations")?;

    let rules = db
        .fetch_business_rules(config.business_rules.clone())
        .await
        .context("Failed to load business rules")?;
    tracing::info!("Business rules: {:?}", rules);

    let (events, _) = broadcast::channel(config.events.buffer);
    let workshop = WorkshopService::new(
        Arc::new(StoreWorkOrderRepository::new(db.pool.clone())),
        Arc::new(StoreKarigarRepository::new(db.pool.clone())),
        Arc::new(StoreStoneRepository::new(db.pool.clone())),
        rules,
        events,
    );

    let app_state = AppState::new(workshop).context("Failed to register metrics")?;
    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
