use actix_web::{HttpResponse, error, web};

use crate::controllers::{
    health_controller::health, session_controller::SessionController,
    verification_controller::VerificationController,
};

/// Answer malformed JSON bodies in the same shape as every other failure.
fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err, _req| {
        let body = serde_json::json!({
            "success": false,
            "error": err.to_string()
        });
        error::InternalError::from_response(err, HttpResponse::BadRequest().json(body)).into()
    })
}

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.app_data(json_config())
        .route("/health", web::get().to(health))
        .route(
            "/api/validate-domain",
            web::post().to(VerificationController::validate_domain),
        )
        .route(
            "/api/validate-email",
            web::post().to(VerificationController::validate_email),
        )
        .route(
            "/api/verify-otp",
            web::post().to(VerificationController::verify_otp),
        )
        .route("/api/session", web::get().to(SessionController::current))
        .route(
            "/api/session/refresh",
            web::post().to(SessionController::refresh),
        )
        .route(
            "/api/session/logout",
            web::post().to(SessionController::logout),
        )
        .route(
            "/api/auth/callback",
            web::get().to(SessionController::callback),
        );
}
