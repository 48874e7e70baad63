//! Health and metrics endpoints.

use actix_web::HttpResponse;
use prometheus::{Encoder, TextEncoder};

pub async fn health() -> &'static str {
    "OK"
}

pub async fn ready() -> &'static str {
    "READY"
}

pub async fn metrics() -> HttpResponse {
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
