use actix_web::{web, App, HttpResponse, HttpServer};
use anyhow::{Context, Result};
use db_pool::{assert_schema_ready, create_pool, DbConfig};
use event_processor::config::ProcessorSettings;
use event_processor::consumer::QueueWorker;
use event_processor::dispatch::{Dispatcher, QueueRole};
use event_processor::metrics::ProcessorMetrics;
use idempotent_consumer::ProcessedLedger;
use prometheus::{Encoder, TextEncoder};
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[actix_web::main]
async fn main() -> Result<()> {
    if cfg!(debug_assertions) {
        dotenvy::dotenv().ok();
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,event_processor=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting event-processor");

    let settings = ProcessorSettings::from_env();
    let db_config =
        DbConfig::from_env("event-processor").context("database configuration invalid")?;
    db_config.log_config();

    let pool = create_pool(db_config)
        .await
        .context("Failed to create database pool")?;
    assert_schema_ready(
        &pool,
        &[
            "processed_events",
            "device_hourly_presence",
            "user_hourly_presence",
            "license_state",
            "customer_360",
            "h3_cells",
        ],
    )
    .await
    .context("Schema not ready")?;

    // Assert broker topology before consuming; inability to declare is fatal.
    {
        let connection = event_bus::connect(&settings.amqp_url)
            .await
            .context("Failed to connect to broker")?;
        let channel = event_bus::create_confirmed_channel(&connection)
            .await
            .context("Failed to open channel")?;
        event_bus::declare_topology(&channel)
            .await
            .context("Failed to assert broker topology")?;
    }

    let ledger = ProcessedLedger::new(pool.clone(), settings.ledger_retention);
    let dispatcher = Dispatcher::new(pool.clone(), ledger.clone());
    let metrics = ProcessorMetrics::new();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut worker_tasks = Vec::new();
    for role in QueueRole::all() {
        let worker = QueueWorker::new(
            role,
            settings.clone(),
            dispatcher.clone(),
            metrics.clone(),
        );
        let rx = shutdown_rx.clone();
        worker_tasks.push(tokio::spawn(async move {
            worker.run(rx).await;
        }));
    }

    // Ledger hygiene: trim entries past the redelivery horizon once an hour.
    let cleanup_task = {
        let ledger = ledger.clone();
        let mut rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(3600));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match ledger.cleanup_old_entries().await {
                            Ok(deleted) if deleted > 0 => {
                                tracing::info!(deleted, "Ledger cleanup pass complete");
                            }
                            Ok(_) => {}
                            Err(e) => tracing::warn!(error = %e, "Ledger cleanup failed"),
                        }
                    }
                    _ = rx.changed() => break,
                }
            }
        })
    };

    tracing::info!(
        "Starting admin HTTP server on 0.0.0.0:{}",
        settings.http_port
    );

    HttpServer::new(|| {
        App::new()
            .route("/health", web::get().to(|| async { "OK" }))
            .route("/ready", web::get().to(|| async { "READY" }))
            .route("/metrics", web::get().to(metrics_endpoint))
    })
    .bind(("0.0.0.0", settings.http_port))
    .context("Failed to bind admin HTTP server")?
    .run()
    .await
    .context("Admin HTTP server error")?;

    // actix has handled SIGINT/SIGTERM; drain workers before exiting.
    tracing::info!("Shutting down queue workers");
    let _ = shutdown_tx.send(true);
    for task in worker_tasks {
        let _ = task.await;
    }
    let _ = cleanup_task.await;

    Ok(())
}

async fn metrics_endpoint() -> HttpResponse {
    let encoder = TextEncoder::new();
    let families = prometheus::default_registry().gather();
    let mut buffer = Vec::new();
    if encoder.encode(&families, &mut buffer).is_err() {
        return HttpResponse::InternalServerError().finish();
    }
    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}
