use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use db_pool::create_pool;
use ingest_service::config::Settings;
use ingest_service::handlers::{admin, events, privacy};
use ingest_service::metrics::IngestMetrics;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[actix_web::main]
async fn main() -> Result<()> {
    if cfg!(debug_assertions) {
        dotenvy::dotenv().ok();
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,ingest_service=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting ingest-service");

    let settings = Settings::load().context("Failed to load settings")?;
    settings.database.log_config();

    let pool = create_pool(settings.database.clone())
        .await
        .context("Failed to create database pool")?;

    // The ingest service is the schema owner: migrations run here, once,
    // behind sqlx's migration lock. Other components only assert presence.
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    tracing::info!("Migrations completed successfully");

    let metrics = IngestMetrics::new();
    let port = settings.server.port;

    tracing::info!("Starting HTTP server on 0.0.0.0:{}", port);

    let settings_data = web::Data::new(settings);
    let pool_data = web::Data::new(pool);
    let metrics_data = web::Data::new(metrics);

    HttpServer::new(move || {
        App::new()
            .app_data(pool_data.clone())
            .app_data(settings_data.clone())
            .app_data(metrics_data.clone())
            .route("/health", web::get().to(admin::health))
            .route("/ready", web::get().to(admin::ready))
            .route("/metrics", web::get().to(admin::metrics))
            .route("/v1/events", web::post().to(events::ingest_events))
            .route("/v1/opt-out", web::post().to(privacy::opt_out))
            .route("/v1/privacy/delete", web::post().to(privacy::privacy_delete))
    })
    .bind(("0.0.0.0", port))
    .context("Failed to bind HTTP server")?
    .run()
    .await
    .context("HTTP server error")
}
