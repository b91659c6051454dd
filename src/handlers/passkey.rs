//! Passkey request handlers
//!
//! Thin JSON adapters over [`CeremonyEngine`]. Every rejected ceremony gets
//! the same generic response body; the precise reason only goes to the log.

use actix_web::http::header;
use actix_web::{web, HttpRequest, HttpResponse, Result};
use serde::Deserialize;
use serde_json::json;

use crate::webauthn::{
    AuthenticationSubmission, CeremonyEngine, CeremonyError, RegistrationSubmission, UserHandle,
};

/// Body of the `start` endpoints
#[derive(Deserialize)]
pub struct StartRequest {
    pub username: String,
}

/// Body of `/api/register/finish`
#[derive(Deserialize)]
pub struct FinishRegistrationRequest {
    pub username: String,
    #[serde(flatten)]
    pub submission: RegistrationSubmission,
}

/// Body of `/api/login/finish`
#[derive(Deserialize)]
pub struct FinishAuthenticationRequest {
    pub username: String,
    #[serde(flatten)]
    pub submission: AuthenticationSubmission,
}

/// Convert `CeremonyError` to HTTP response
fn error_to_response(error: &CeremonyError) -> HttpResponse {
    match error {
        CeremonyError::InvalidUserHandle(_) => HttpResponse::BadRequest().json(json!({
            "error": "invalid_username"
        })),
        err if err.is_internal() => internal_error_response(),
        _ => HttpResponse::BadRequest().json(json!({
            "error": "ceremony_failed"
        })),
    }
}

fn internal_error_response() -> HttpResponse {
    HttpResponse::InternalServerError().json(json!({
        "error": "internal_error",
        "message": "An internal error occurred"
    }))
}

fn observed_origin(req: &HttpRequest) -> Option<String> {
    req.headers()
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
}

fn parse_user(raw: &str) -> std::result::Result<UserHandle, HttpResponse> {
    UserHandle::parse(raw).map_err(|err| error_to_response(&err))
}

/// Start passkey registration
///
/// # Errors
///
/// Never returns `Err`; failures are rendered as JSON error responses.
pub async fn start_registration(
    engine: web::Data<CeremonyEngine>,
    data: web::Json<StartRequest>,
) -> Result<HttpResponse> {
    let user = match parse_user(&data.username) {
        Ok(user) => user,
        Err(response) => return Ok(response),
    };

    match engine.begin_registration(&user) {
        Ok(payload) => Ok(HttpResponse::Ok().json(payload)),
        Err(e) => Ok(error_to_response(&e)),
    }
}

/// Complete passkey registration
///
/// # Errors
///
/// Never returns `Err`; failures are rendered as JSON error responses.
pub async fn finish_registration(
    req: HttpRequest,
    engine: web::Data<CeremonyEngine>,
    data: web::Json<FinishRegistrationRequest>,
) -> Result<HttpResponse> {
    let user = match parse_user(&data.username) {
        Ok(user) => user,
        Err(response) => return Ok(response),
    };

    // Verification and the credential write block, so keep them off the worker
    let origin = observed_origin(&req);
    let request = data.into_inner();
    let outcome = web::block(move || {
        engine.finish_registration(&user, &request.submission, origin.as_deref())
    })
    .await;

    match outcome {
        Ok(Ok(registered)) => Ok(HttpResponse::Ok().json(json!({
            "status": "ok",
            "username": registered.user,
            "credential_id": registered.credential_id,
        }))),
        Ok(Err(e)) => Ok(error_to_response(&e)),
        Err(e) => {
            log::error!("Registration task failed: {e}");
            Ok(internal_error_response())
        }
    }
}

/// Start passkey authentication
///
/// # Errors
///
/// Never returns `Err`; failures are rendered as JSON error responses.
pub async fn start_authentication(
    engine: web::Data<CeremonyEngine>,
    data: web::Json<StartRequest>,
) -> Result<HttpResponse> {
    let user = match parse_user(&data.username) {
        Ok(user) => user,
        Err(response) => return Ok(response),
    };

    match engine.begin_authentication(&user) {
        Ok(payload) => Ok(HttpResponse::Ok().json(payload)),
        Err(e) => Ok(error_to_response(&e)),
    }
}

/// Complete passkey authentication
///
/// # Errors
///
/// Never returns `Err`; failures are rendered as JSON error responses.
pub async fn finish_authentication(
    req: HttpRequest,
    engine: web::Data<CeremonyEngine>,
    data: web::Json<FinishAuthenticationRequest>,
) -> Result<HttpResponse> {
    let user = match parse_user(&data.username) {
        Ok(user) => user,
        Err(response) => return Ok(response),
    };

    let origin = observed_origin(&req);
    let request = data.into_inner();
    let outcome = web::block(move || {
        engine.finish_authentication(&user, &request.submission, origin.as_deref())
    })
    .await;

    match outcome {
        Ok(Ok(authenticated)) => Ok(HttpResponse::Ok().json(json!({
            "status": "ok",
            "username": authenticated.user,
            "credential_id": authenticated.credential_id,
            "signature_counter": authenticated.signature_counter,
            "authenticated_at": authenticated.authenticated_at,
        }))),
        Ok(Err(e)) => Ok(error_to_response(&e)),
        Err(e) => {
            log::error!("Authentication task failed: {e}");
            Ok(internal_error_response())
        }
    }
}
