use std::sync::Arc;

use axum::{Json, Router, http::StatusCode, routing::get};
use serde::Serialize;

use crate::application::services::business::BusinessService;

#[derive(Debug, Serialize)]
pub struct HealthResp {
    pub status: &'static str,
    pub message: &'static str,
}

pub async fn health_check() -> (StatusCode, Json<HealthResp>) {
    (
        StatusCode::OK,
        Json(HealthResp {
            status: "OK",
            message: "Service is healthy",
        }),
    )
}

pub fn routes(service: Arc<dyn BusinessService>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .with_state(service)
}
