//! Outbox publisher: the only producer to the `sb.events` exchange.
//!
//! Leases pending outbox rows and publishes them with confirms; exposes an
//! admin HTTP surface for health, metrics and operational replay.

use actix_web::{web, App, HttpResponse, HttpServer};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use db_pool::{assert_schema_ready, create_pool, DbConfig};
use prometheus::{Encoder, TextEncoder};
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transactional_outbox::{OutboxRelay, OutboxRepository, RelayConfig};

#[actix_web::main]
async fn main() -> Result<()> {
    if cfg!(debug_assertions) {
        dotenvy::dotenv().ok();
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,outbox_publisher=debug,transactional_outbox=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting outbox-publisher");

    let relay_config = RelayConfig::from_env();
    let db_config =
        DbConfig::from_env("outbox-publisher").context("database configuration invalid")?;
    db_config.log_config();

    let pool = create_pool(db_config)
        .await
        .context("Failed to create database pool")?;
    assert_schema_ready(&pool, &["outbox_events"])
        .await
        .context("Schema not ready")?;

    // Authoritative topology declaration. A broker that rejects the topology
    // is a fatal startup error; transient outages during the run are handled
    // by the relay's reconnect loop.
    {
        let connection = event_bus::connect(&relay_config.amqp_url)
            .await
            .context("Failed to connect to broker")?;
        let channel = event_bus::create_confirmed_channel(&connection)
            .await
            .context("Failed to open channel")?;
        event_bus::declare_topology(&channel)
            .await
            .context("Failed to declare broker topology")?;
    }

    let relay = Arc::new(OutboxRelay::new(
        OutboxRepository::new(pool.clone()),
        relay_config,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let relay_task = {
        let relay = Arc::clone(&relay);
        tokio::spawn(async move {
            relay.run(shutdown_rx).await;
        })
    };

    let http_port: u16 = std::env::var("HTTP_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8081);

    tracing::info!("Starting admin HTTP server on 0.0.0.0:{}", http_port);

    let relay_data = web::Data::new(Arc::clone(&relay));
    HttpServer::new(move || {
        App::new()
            .app_data(relay_data.clone())
            .route("/health", web::get().to(|| async { "OK" }))
            .route("/ready", web::get().to(|| async { "READY" }))
            .route("/metrics", web::get().to(metrics))
            .route("/admin/outbox/stats", web::get().to(outbox_stats))
            .route(
                "/admin/outbox/replay_since",
                web::post().to(outbox_replay_since),
            )
    })
    .bind(("0.0.0.0", http_port))
    .context("Failed to bind admin HTTP server")?
    .run()
    .await
    .context("Admin HTTP server error")?;

    // actix has handled SIGINT/SIGTERM; drain the relay before exiting.
    tracing::info!("Shutting down outbox relay");
    let _ = shutdown_tx.send(true);
    let _ = relay_task.await;

    Ok(())
}

async fn metrics() -> HttpResponse {
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

async fn outbox_stats(relay: web::Data<Arc<OutboxRelay>>) -> HttpResponse {
    match relay.repository().pending_stats().await {
        Ok((pending, age)) => HttpResponse::Ok().json(serde_json::json!({
            "pending_count": pending,
            "oldest_pending_age_seconds": age,
            "published_total": relay.metrics.published.get(),
            "failed_total": relay.metrics.failed.get(),
        })),
        Err(e) => HttpResponse::InternalServerError().body(format!("error: {}", e)),
    }
}

#[derive(serde::Deserialize)]
struct ReplaySinceQuery {
    ts: String,
}

async fn outbox_replay_since(
    relay: web::Data<Arc<OutboxRelay>>,
    query: web::Query<ReplaySinceQuery>,
) -> HttpResponse {
    match DateTime::parse_from_rfc3339(&query.ts).map(|dt| dt.with_timezone(&Utc)) {
        Ok(ts) => match relay.repository().replay_since(ts).await {
            Ok(count) => HttpResponse::Ok().json(serde_json::json!({
                "replayed": count,
                "since": query.ts,
            })),
            Err(e) => HttpResponse::InternalServerError().body(format!("error: {}", e)),
        },
        Err(e) => HttpResponse::BadRequest().body(format!("invalid ts: {}", e)),
    }
}
