use actix_web::{HttpResponse, Result};
use serde::Serialize;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub message: String,
}

/// Liveness check
///
/// # Errors
///
/// Returns an error if health status cannot be determined
pub async fn health() -> Result<HttpResponse> {
    let response = HealthResponse {
        status: "ok".to_string(),
        message: "Passkey ceremony service is running".to_string(),
    };
    Ok(HttpResponse::Ok().json(response))
}
