pub mod health_controller;
pub mod session_controller;
pub mod verification_controller;
