pub mod email_service;
pub mod otp_store;
pub mod session;
pub mod validation;
pub mod verification_service;
