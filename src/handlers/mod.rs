// HTTP request handlers for the passkey ceremony service
pub mod health;
pub mod passkey;

use actix_web::error::InternalError;
use actix_web::{web, HttpResponse};
use serde_json::json;

// Re-export the main handler functions
pub use health::health;
pub use passkey::{
    finish_authentication, finish_registration, start_authentication, start_registration,
};

/// Register every route of the service
///
/// Request bodies that fail to deserialize get a JSON 400 instead of actix's
/// plain-text default.
pub fn configure_services(cfg: &mut web::ServiceConfig) {
    let json_config = web::JsonConfig::default().error_handler(|err, _req| {
        log::debug!("Rejected request body: {err}");
        InternalError::from_response(
            err,
            HttpResponse::BadRequest().json(json!({ "error": "invalid_request" })),
        )
        .into()
    });

    cfg.app_data(json_config)
        .route("/api/register/start", web::post().to(start_registration))
        .route("/api/register/finish", web::post().to(finish_registration))
        .route("/api/login/start", web::post().to(start_authentication))
        .route("/api/login/finish", web::post().to(finish_authentication))
        // Health endpoint
        .route("/ping", web::get().to(health));
}
