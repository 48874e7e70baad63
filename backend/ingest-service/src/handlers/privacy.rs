//! `POST /v1/opt-out` and `POST /v1/privacy/delete`.

use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::authorize;
use crate::config::Settings;
use crate::error::Result;
use crate::services::PrivacyService;

#[derive(Deserialize)]
pub struct OptOutRequest {
    pub app_uuid: Uuid,
    pub anon_user_id: String,
}

pub async fn opt_out(
    req: HttpRequest,
    pool: web::Data<PgPool>,
    settings: web::Data<Settings>,
    body: web::Json<OptOutRequest>,
) -> Result<HttpResponse> {
    authorize(&req, &settings.auth)?;

    let service = PrivacyService::new(pool.get_ref().clone());
    service.opt_out(body.app_uuid, &body.anon_user_id).await?;

    Ok(HttpResponse::Ok().json(json!({ "status": "ok" })))
}

#[derive(Deserialize)]
pub struct PrivacyDeleteRequest {
    pub app_uuid: Uuid,
    pub anon_user_id: String,
    #[serde(default)]
    pub delete_opt_out: bool,
}

pub async fn privacy_delete(
    req: HttpRequest,
    pool: web::Data<PgPool>,
    settings: web::Data<Settings>,
    body: web::Json<PrivacyDeleteRequest>,
) -> Result<HttpResponse> {
    authorize(&req, &settings.auth)?;

    let service = PrivacyService::new(pool.get_ref().clone());
    let report = service
        .delete_user_data(body.app_uuid, &body.anon_user_id, body.delete_opt_out)
        .await?;

    Ok(HttpResponse::Ok().json(json!({ "deleted": report })))
}
