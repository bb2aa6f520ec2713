use axum::{extract::State, response::Json, routing::get, Router};
use std::net::SocketAddr;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rule_governance::catalog::CatalogService;
use rule_governance::config::AppConfig;
use rule_governance::database::Database;
use rule_governance::storage;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rule_governance=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting rule governance service");

    let config = AppConfig::load()?;
    info!(environment = %config.environment, region = %config.region, "Configuration loaded");

    let database = Database::new(&config.database.url).await?;
    database.run_migrations().await?;
    info!("Database ready");

    let catalog = CatalogService::new(database.clone());
    let seeded = catalog.seed_standard_fields("system").await?;
    if seeded > 0 {
        info!(seeded, "Standard field catalog installed");
    }

    // Fail fast on a misconfigured object-storage backend.
    storage::build_store(&config.storage)?;

    let addr = SocketAddr::new(config.server.host.parse()?, config.server.port);

    let app = Router::new()
        .route("/health", get(health_check))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .into_inner(),
        )
        .with_state((config, database));

    info!("Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check(
    State((config, database)): State<(AppConfig, Database)>,
) -> Json<serde_json::Value> {
    let database_healthy = database.check_health().await.unwrap_or(false);
    Json(serde_json::json!({
        "status": if database_healthy { "healthy" } else { "degraded" },
        "service": "rule-governance",
        "environment": config.environment,
        "region": config.region,
        "database": database_healthy,
        "timestamp": chrono::Utc::now(),
    }))
}
