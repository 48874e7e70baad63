//! `POST /v1/events`: batch event acceptance.

use actix_web::{web, HttpRequest, HttpResponse};
use event_schema::{Envelope, EnvelopeMode, IngestResponse, RejectedItem};
use serde_json::Value;
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

use crate::auth::authorize;
use crate::config::Settings;
use crate::error::Result;
use crate::metrics::IngestMetrics;
use crate::services::IngestService;

/// Accept a batch of envelopes.
///
/// Per-item semantics: validation failures and opted-out identifiers reject
/// the item, everything else commits one transaction (raw event + outbox
/// rows) and is reported accepted, with `deduped` flagging re-submissions.
/// A database failure aborts the whole batch with a 5xx so producers retry.
pub async fn ingest_events(
    req: HttpRequest,
    pool: web::Data<PgPool>,
    settings: web::Data<Settings>,
    metrics: web::Data<IngestMetrics>,
    body: web::Json<Vec<Value>>,
) -> Result<HttpResponse> {
    authorize(&req, &settings.auth)?;

    let mode = settings.ingest.envelope_mode;
    let header_trace: Option<Uuid> = req
        .headers()
        .get(settings.ingest.trace_id_header.as_str())
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok());

    let service = IngestService::new(pool.get_ref().clone());
    let mut response = IngestResponse::new();

    for (index, mut document) in body.into_inner().into_iter().enumerate() {
        // Lax producers may rely on the transport header for tracing.
        if mode == EnvelopeMode::Lax {
            if let (Some(trace), Some(obj)) = (header_trace, document.as_object_mut()) {
                obj.entry("trace_id")
                    .or_insert_with(|| Value::String(trace.to_string()));
            }
        }

        let normalized = match Envelope::decode(mode, &document).and_then(|e| e.normalize()) {
            Ok(event) => event,
            Err(e) => {
                metrics.rejected.inc();
                response.rejected.push(RejectedItem {
                    index,
                    code: e.code().to_string(),
                    message: e.to_string(),
                });
                continue;
            }
        };

        if service
            .is_opted_out(normalized.app_uuid, &normalized.anon_user_id)
            .await?
        {
            if settings.ingest.reject_opted_out {
                metrics.rejected.inc();
                response.rejected.push(RejectedItem {
                    index,
                    code: "opted_out".to_string(),
                    message: "identifier has opted out of collection".to_string(),
                });
            } else {
                // Silent-accept mode: acknowledge without storing.
                response.accepted += 1;
                response.deduped.push(false);
            }
            continue;
        }

        let deduped = service.ingest_one(&normalized, &document).await?;
        response.accepted += 1;
        response.deduped.push(deduped);
        metrics.accepted.inc();
        if deduped {
            metrics.deduped.inc();
        }
    }

    // In strict mode a batch where every envelope failed is a contract
    // violation on the producer side, not a partial accept.
    if mode == EnvelopeMode::Strict && response.accepted == 0 && !response.rejected.is_empty() {
        warn!(
            rejected = response.rejected.len(),
            "Strict batch rejected in full"
        );
        return Ok(HttpResponse::UnprocessableEntity().json(response));
    }

    Ok(HttpResponse::Ok().json(response))
}
