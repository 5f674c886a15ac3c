use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use thiserror::Error;

use crate::service::{
    email_service::DispatchError, otp_store::StoreError, session::SessionError,
};

/// Everything that can go wrong while proving ownership of a domain.
///
/// Validation kinds are reported as 400 and never retried. Collaborator
/// failures are reported as 500 with the detail kept in the logs.
#[derive(Debug, Error)]
pub enum VerificationError {
    #[error("{0}")]
    MissingField(&'static str),

    #[error("Invalid domain format")]
    InvalidDomainFormat,

    #[error("Email must be associated with {0}")]
    EmailDomainMismatch(String),

    #[error("No OTP found for this email and domain")]
    NoChallengePending,

    #[error("OTP has expired. Please request a new one")]
    ChallengeExpired,

    #[error("Invalid OTP")]
    CodeMismatch,

    #[error("Too many failed attempts. Please request a new code")]
    TooManyAttempts,

    #[error("Failed to send OTP")]
    DispatchFailed(#[source] DispatchError),

    #[error("Failed to establish session")]
    SessionEstablishmentFailed(#[source] SessionError),

    #[error("Internal server error")]
    Store(#[from] StoreError),
}

impl VerificationError {
    /// True for the kinds caused by what the caller submitted.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::MissingField(_)
                | Self::InvalidDomainFormat
                | Self::EmailDomainMismatch(_)
                | Self::NoChallengePending
                | Self::ChallengeExpired
                | Self::CodeMismatch
                | Self::TooManyAttempts
        )
    }
}

impl ResponseError for VerificationError {
    fn status_code(&self) -> StatusCode {
        if self.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(serde_json::json!({
            "success": false,
            "error": self.to_string(),
        }))
    }
}
