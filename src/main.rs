mod config;
mod controllers;
mod errors;
mod models;
mod service;
#[cfg(test)]
mod tests;

use std::sync::Arc;

use actix_web::{App, HttpServer, middleware::Logger, web};
use color_eyre::Result;
use eyre::WrapErr;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::config::{AuthSettings, Config, MailSettings};
use crate::config::crypto::CryptoService;
use crate::config::routes::routes;
use crate::controllers::{
    session_controller::{SessionController, SessionCookies},
    verification_controller::VerificationController,
};
use crate::service::email_service::{EmailService, LogNotificationSender, NotificationSender};
use crate::service::otp_store::InMemoryVerificationStore;
use crate::service::session::{HostedLogin, ManagedAuth, SessionEstablisher, TokenSessions};
use crate::service::verification_service::VerificationService;

fn notification_sender(config: &Config) -> Result<Arc<dyn NotificationSender>> {
    let sender: Arc<dyn NotificationSender> = match config.mail_settings()? {
        MailSettings::Log => Arc::new(LogNotificationSender),
        MailSettings::Smtp(smtp) => Arc::new(
            EmailService::new(smtp, &config.platform_name, config.otp_ttl_minutes)
                .wrap_err("Creating SMTP transport")?,
        ),
    };
    Ok(sender)
}

fn session_establisher(config: &Config) -> Result<Arc<dyn SessionEstablisher>> {
    let client = reqwest::Client::builder()
        .timeout(config.dispatch_timeout())
        .build()
        .wrap_err("Creating HTTP client")?;

    let sessions: Arc<dyn SessionEstablisher> = match config.auth_settings()? {
        AuthSettings::Token { secret, ttl } => {
            let crypto = CryptoService::new(secret).wrap_err("Loading session secret")?;
            Arc::new(TokenSessions::new(crypto, ttl))
        }
        AuthSettings::Managed {
            base_url,
            service_key,
        } => Arc::new(ManagedAuth::new(client, &base_url, &service_key)),
        AuthSettings::Hosted(settings) => Arc::new(
            HostedLogin::new(client, settings).wrap_err("Parsing hosted login domain")?,
        ),
    };
    Ok(sessions)
}

#[actix_web::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;
    let sessions = session_establisher(&config)?;
    info!(provider = sessions.name(), "session provider selected");

    // the store lives exactly as long as the server
    let store = Arc::new(InMemoryVerificationStore::new());
    let verification_service = Arc::new(VerificationService::new(
        store,
        notification_sender(&config)?,
        sessions.clone(),
        config.verification_policy()?,
    ));

    let cookies = SessionCookies::new(config.cookie_secure);
    if !config.cookie_secure {
        warn!("session cookies are not marked Secure");
    }
    let verification_controller =
        web::Data::new(VerificationController::new(verification_service, cookies));
    let session_controller = web::Data::new(SessionController::new(sessions, cookies));

    info!(host = %config.host, port = config.port, "starting server");
    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .app_data(verification_controller.clone())
            .app_data(session_controller.clone())
            .configure(routes)
    })
    .bind((config.host.as_str(), config.port))
    .wrap_err("Binding server address")?
    .run()
    .await?;

    Ok(())
}
