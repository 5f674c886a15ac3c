use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{MultiPart, SinglePart, header::ContentType},
    transport::smtp::{
        authentication::Credentials,
        client::{Tls, TlsParameters},
    },
};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{info, instrument};

const HTML_TEMPLATE: &str = include_str!("../../templates/otp_email.html");
const TEXT_TEMPLATE: &str = include_str!("../../templates/otp_email.txt");
const SUBJECT: &str = "Your domain verification code";

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("failed to send email: {0}")]
    SendFailed(String),

    #[error("invalid mail configuration: {0}")]
    InvalidConfig(String),

    #[error("dispatch timed out after {0}s")]
    Timeout(u64),
}

/// Delivers a one-time code to the person who asked for it.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, email: &str, code: &str) -> Result<(), DispatchError>;
}

/// Values substituted into the `{{key}}` placeholders of the templates.
fn template_data(email: &str, code: &str, platform_name: &str, ttl_minutes: i64) -> Value {
    let domain = email.rsplit('@').next().unwrap_or_default();
    json!({
        "platformName": platform_name,
        "domain": domain,
        "otp": code,
        "ttlMinutes": ttl_minutes.to_string(),
    })
}

fn render(template: &str, data: &Value) -> String {
    let mut body = template.to_string();
    if let Some(fields) = data.as_object() {
        for (key, value) in fields {
            let placeholder = format!("{{{{{key}}}}}");
            body = body.replace(&placeholder, value.as_str().unwrap_or_default());
        }
    }
    body
}

pub struct EmailService {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from_address: String,
    platform_name: String,
    ttl_minutes: i64,
}

pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub use_tls: bool,
    pub from_address: String,
}

impl EmailService {
    pub fn new(
        settings: SmtpSettings,
        platform_name: &str,
        ttl_minutes: i64,
    ) -> Result<Self, DispatchError> {
        let SmtpSettings {
            host,
            port,
            username,
            password,
            use_tls,
            from_address,
        } = settings;

        let mut builder = if use_tls {
            let tls = TlsParameters::new(host.clone())
                .map_err(|e| DispatchError::InvalidConfig(format!("TLS configuration: {e}")))?;
            // 465 is implicit TLS, everything else upgrades with STARTTLS
            if port == 465 {
                AsyncSmtpTransport::<Tokio1Executor>::relay(&host)
                    .map_err(|e| DispatchError::InvalidConfig(format!("SMTP relay: {e}")))?
                    .port(port)
                    .tls(Tls::Wrapper(tls))
            } else {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&host)
                    .map_err(|e| DispatchError::InvalidConfig(format!("SMTP relay: {e}")))?
                    .port(port)
                    .tls(Tls::Required(tls))
            }
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&host).port(port)
        };

        if let (Some(user), Some(pass)) = (username, password) {
            builder = builder.credentials(Credentials::new(user, pass));
        }

        Ok(Self {
            mailer: builder.build(),
            from_address,
            platform_name: platform_name.to_string(),
            ttl_minutes,
        })
    }

    fn build_message(&self, to: &str, code: &str) -> Result<Message, DispatchError> {
        let data = template_data(to, code, &self.platform_name, self.ttl_minutes);
        let from = format!("{} <{}>", self.platform_name, self.from_address);

        Message::builder()
            .from(
                from.parse()
                    .map_err(|e| DispatchError::InvalidConfig(format!("from address: {e}")))?,
            )
            .to(to
                .parse()
                .map_err(|e| DispatchError::SendFailed(format!("recipient address: {e}")))?)
            .subject(SUBJECT)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(render(TEXT_TEMPLATE, &data)),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(render(HTML_TEMPLATE, &data)),
                    ),
            )
            .map_err(|e| DispatchError::SendFailed(e.to_string()))
    }
}

#[async_trait]
impl NotificationSender for EmailService {
    #[instrument(skip(self, code))]
    async fn send(&self, email: &str, code: &str) -> Result<(), DispatchError> {
        let message = self.build_message(email, code)?;
        self.mailer
            .send(message)
            .await
            .map_err(|e| DispatchError::SendFailed(e.to_string()))?;
        info!("verification email sent");
        Ok(())
    }
}

/// Writes the code to the log instead of mailing it. For local development.
pub struct LogNotificationSender;

#[async_trait]
impl NotificationSender for LogNotificationSender {
    async fn send(&self, email: &str, code: &str) -> Result<(), DispatchError> {
        info!(%email, %code, "verification code issued (log transport)");
        Ok(())
    }
}
