use std::time::Duration;

use color_eyre::Result;
use dotenv::dotenv;
use eyre::{WrapErr, eyre};
use serde::Deserialize;
use tracing::info;

use crate::service::email_service::SmtpSettings;
use crate::service::session::HostedLoginSettings;
use crate::service::verification_service::VerificationPolicy;

pub const ENV_PREFIX: &str = "DOMAIN_VERIFY";

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_platform_name() -> String {
    "Domain Verify".to_string()
}
fn default_otp_ttl_minutes() -> i64 {
    10
}
fn default_otp_max_attempts() -> u32 {
    5
}
fn default_dispatch_timeout_secs() -> u64 {
    10
}
fn default_mail_transport() -> String {
    "log".to_string()
}
fn default_smtp_port() -> u16 {
    587
}
fn default_true() -> bool {
    true
}
fn default_auth_provider() -> String {
    "token".to_string()
}
fn default_session_ttl_minutes() -> i64 {
    60
}

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_platform_name")]
    pub platform_name: String,

    #[serde(default = "default_otp_ttl_minutes")]
    pub otp_ttl_minutes: i64,
    #[serde(default = "default_otp_max_attempts")]
    pub otp_max_attempts: u32,
    #[serde(default = "default_dispatch_timeout_secs")]
    pub dispatch_timeout_secs: u64,

    #[serde(default = "default_mail_transport")]
    pub mail_transport: String,
    pub smtp_host: Option<String>,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    #[serde(default = "default_true")]
    pub smtp_use_tls: bool,
    pub mail_from: Option<String>,

    #[serde(default = "default_auth_provider")]
    pub auth_provider: String,
    pub session_secret: Option<String>,
    #[serde(default = "default_session_ttl_minutes")]
    pub session_ttl_minutes: i64,
    /// Mark session cookies `Secure`. Turn off only for plain-http development.
    #[serde(default = "default_true")]
    pub cookie_secure: bool,
    pub managed_auth_url: Option<String>,
    pub managed_auth_key: Option<String>,
    pub hosted_domain: Option<String>,
    pub hosted_client_id: Option<String>,
    pub hosted_client_secret: Option<String>,
    pub hosted_redirect_uri: Option<String>,
    pub hosted_logout_uri: Option<String>,
}

pub enum MailSettings {
    Log,
    Smtp(SmtpSettings),
}

pub enum AuthSettings {
    Token {
        secret: String,
        ttl: chrono::Duration,
    },
    Managed {
        base_url: String,
        service_key: String,
    },
    Hosted(HostedLoginSettings),
}

/// A positive lifetime in minutes that can be added to the current time.
fn lifetime_minutes(minutes: i64, key: &str) -> Result<chrono::Duration> {
    chrono::Duration::try_minutes(minutes)
        .filter(|ttl| *ttl > chrono::Duration::zero())
        .filter(|ttl| chrono::Utc::now().checked_add_signed(*ttl).is_some())
        .ok_or_else(|| eyre!("{ENV_PREFIX}_{} must be a positive number of minutes in range", key.to_uppercase()))
}

fn required(value: &Option<String>, key: &str, selected_by: &str) -> Result<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| eyre!("{ENV_PREFIX}_{} is required when {selected_by}", key.to_uppercase()))
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        info!("Initializing configuration");
        let settings = ::config::Config::builder()
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .try_parsing(true),
            )
            .build()
            .wrap_err("Building configuration")?;

        Self::from_settings(settings)
    }

    pub fn from_settings(settings: ::config::Config) -> Result<Self> {
        settings
            .try_deserialize()
            .wrap_err("loading configuration from environment")
    }

    pub fn verification_policy(&self) -> Result<VerificationPolicy> {
        Ok(VerificationPolicy {
            otp_ttl: lifetime_minutes(self.otp_ttl_minutes, "otp_ttl_minutes")?,
            max_attempts: self.otp_max_attempts,
            dispatch_timeout: self.dispatch_timeout(),
        })
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch_timeout_secs.max(1))
    }

    pub fn mail_settings(&self) -> Result<MailSettings> {
        match self.mail_transport.to_lowercase().as_str() {
            "log" => Ok(MailSettings::Log),
            "smtp" => {
                let selected_by = "mail_transport=smtp";
                Ok(MailSettings::Smtp(SmtpSettings {
                    host: required(&self.smtp_host, "smtp_host", selected_by)?,
                    port: self.smtp_port,
                    username: self.smtp_username.clone(),
                    password: self.smtp_password.clone(),
                    use_tls: self.smtp_use_tls,
                    from_address: required(&self.mail_from, "mail_from", selected_by)?,
                }))
            }
            other => Err(eyre!("unknown mail transport '{other}', expected 'log' or 'smtp'")),
        }
    }

    pub fn auth_settings(&self) -> Result<AuthSettings> {
        match self.auth_provider.to_lowercase().as_str() {
            "token" => Ok(AuthSettings::Token {
                secret: required(&self.session_secret, "session_secret", "auth_provider=token")?,
                ttl: lifetime_minutes(self.session_ttl_minutes, "session_ttl_minutes")?,
            }),
            "managed" => {
                let selected_by = "auth_provider=managed";
                Ok(AuthSettings::Managed {
                    base_url: required(&self.managed_auth_url, "managed_auth_url", selected_by)?,
                    service_key: required(&self.managed_auth_key, "managed_auth_key", selected_by)?,
                })
            }
            "hosted" => {
                let selected_by = "auth_provider=hosted";
                let redirect_uri =
                    required(&self.hosted_redirect_uri, "hosted_redirect_uri", selected_by)?;
                Ok(AuthSettings::Hosted(HostedLoginSettings {
                    domain: required(&self.hosted_domain, "hosted_domain", selected_by)?,
                    client_id: required(&self.hosted_client_id, "hosted_client_id", selected_by)?,
                    client_secret: self.hosted_client_secret.clone(),
                    logout_uri: self
                        .hosted_logout_uri
                        .clone()
                        .unwrap_or_else(|| redirect_uri.clone()),
                    redirect_uri,
                }))
            }
            other => Err(eyre!(
                "unknown auth provider '{other}', expected 'token', 'managed' or 'hosted'"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(pairs: &[(&str, &str)]) -> ::config::Config {
        let mut builder = ::config::Config::builder();
        for (key, value) in pairs {
            builder = builder.set_override(*key, *value).unwrap();
        }
        builder.build().unwrap()
    }

    #[test]
    fn defaults_fill_missing_keys() {
        let config = Config::from_settings(settings(&[])).unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 8080);

        let policy = config.verification_policy().unwrap();
        assert_eq!(policy.otp_ttl, chrono::Duration::minutes(10));
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.dispatch_timeout, Duration::from_secs(10));
        assert!(matches!(config.mail_settings().unwrap(), MailSettings::Log));
    }

    #[test]
    fn numeric_values_parse_from_strings() {
        let config = Config::from_settings(settings(&[
            ("port", "9090"),
            ("otp_max_attempts", "0"),
            ("smtp_use_tls", "false"),
        ]))
        .unwrap();
        assert_eq!(config.port, 9090);
        assert_eq!(config.otp_max_attempts, 0);
        assert!(!config.smtp_use_tls);
    }

    #[test]
    fn token_provider_needs_a_secret() {
        let config = Config::from_settings(settings(&[])).unwrap();
        let err = config.auth_settings().err().unwrap();
        assert!(err.to_string().contains("DOMAIN_VERIFY_SESSION_SECRET"));

        let config = Config::from_settings(settings(&[(
            "session_secret",
            "0123456789abcdef0123456789abcdef",
        )]))
        .unwrap();
        assert!(matches!(config.auth_settings().unwrap(), AuthSettings::Token { .. }));
    }

    #[test]
    fn hosted_provider_defaults_logout_to_redirect() {
        let config = Config::from_settings(settings(&[
            ("auth_provider", "hosted"),
            ("hosted_domain", "auth.example.com"),
            ("hosted_client_id", "client-1"),
            ("hosted_redirect_uri", "https://app.example.com/api/auth/callback"),
        ]))
        .unwrap();
        let AuthSettings::Hosted(hosted) = config.auth_settings().unwrap() else {
            panic!("expected hosted settings");
        };
        assert_eq!(hosted.logout_uri, "https://app.example.com/api/auth/callback");
    }

    #[test]
    fn lifetimes_out_of_range_are_config_errors() {
        for ttl in ["0", "-5", "9223372036854775807"] {
            let config = Config::from_settings(settings(&[("otp_ttl_minutes", ttl)])).unwrap();
            let err = config.verification_policy().err().unwrap();
            assert!(err.to_string().contains("DOMAIN_VERIFY_OTP_TTL_MINUTES"), "{ttl}");
        }

        let config = Config::from_settings(settings(&[
            ("session_secret", "0123456789abcdef0123456789abcdef"),
            ("session_ttl_minutes", "9223372036854775807"),
        ]))
        .unwrap();
        assert!(config.auth_settings().is_err());
    }

    #[test]
    fn cookies_are_secure_unless_disabled() {
        let config = Config::from_settings(settings(&[])).unwrap();
        assert!(config.cookie_secure);

        let config = Config::from_settings(settings(&[("cookie_secure", "false")])).unwrap();
        assert!(!config.cookie_secure);
    }

    #[test]
    fn smtp_transport_needs_host_and_sender() {
        let config = Config::from_settings(settings(&[("mail_transport", "smtp")])).unwrap();
        assert!(config.mail_settings().is_err());

        let config = Config::from_settings(settings(&[("auth_provider", "ldap")])).unwrap();
        assert!(config.auth_settings().is_err());
    }
}
