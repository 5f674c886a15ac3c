use std::sync::Arc;

use actix_web::{HttpResponse, web};
use serde::Deserialize;
use tracing::{info, warn};

use crate::controllers::session_controller::SessionCookies;
use crate::errors::VerificationError;
use crate::models::identity::Session;
use crate::service::verification_service::VerificationService;

pub struct VerificationController {
    pub verification_service: Arc<VerificationService>,
    pub cookies: SessionCookies,
}

#[derive(Deserialize)]
pub struct ValidateDomainRequest {
    #[serde(default)]
    pub domain: String,
}

#[derive(Deserialize)]
pub struct ValidateEmailRequest {
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub email: String,
}

#[derive(Deserialize)]
pub struct VerifyOtpRequest {
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub otp: String,
}

fn log_failure(step: &str, err: &VerificationError) {
    if err.is_client_error() {
        info!(step, error = %err, "verification step refused");
    } else {
        warn!(step, error = ?err, "verification step failed");
    }
}

impl VerificationController {
    pub fn new(verification_service: Arc<VerificationService>, cookies: SessionCookies) -> Self {
        Self {
            verification_service,
            cookies,
        }
    }

    pub async fn validate_domain(
        controller: web::Data<Self>,
        request: web::Json<ValidateDomainRequest>,
    ) -> Result<HttpResponse, VerificationError> {
        controller
            .verification_service
            .check_domain(&request.domain)
            .inspect_err(|err| log_failure("validate-domain", err))?;

        Ok(HttpResponse::Ok().json(serde_json::json!({
            "success": true,
            "message": "Domain validated successfully"
        })))
    }

    pub async fn validate_email(
        controller: web::Data<Self>,
        request: web::Json<ValidateEmailRequest>,
    ) -> Result<HttpResponse, VerificationError> {
        let receipt = controller
            .verification_service
            .request_code(&request.email, &request.domain)
            .await
            .inspect_err(|err| log_failure("validate-email", err))?;

        Ok(HttpResponse::Ok().json(serde_json::json!({
            "success": true,
            "otpSent": receipt.otp_sent,
            "expiresAt": receipt.expires_at,
            "message": "OTP sent successfully"
        })))
    }

    pub async fn verify_otp(
        controller: web::Data<Self>,
        request: web::Json<VerifyOtpRequest>,
    ) -> Result<HttpResponse, VerificationError> {
        let session = controller
            .verification_service
            .complete(&request.email, &request.domain, &request.otp)
            .await
            .inspect_err(|err| log_failure("verify-otp", err))?;

        let response = match session {
            Session::Token {
                token,
                expires_at,
                refresh_token,
            } => {
                let mut response = HttpResponse::Ok();
                for cookie in controller.cookies.issue(token, expires_at, refresh_token) {
                    response.cookie(cookie);
                }
                response.json(serde_json::json!({
                    "success": true,
                    "message": "OTP verified successfully"
                }))
            }
            Session::Redirect { location } => HttpResponse::Ok().json(serde_json::json!({
                "success": true,
                "message": "OTP verified successfully",
                "redirect": location
            })),
        };
        Ok(response)
    }
}
