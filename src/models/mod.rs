pub mod identity;
pub mod otp_codes;
