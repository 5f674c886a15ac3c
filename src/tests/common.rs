//! Shared fixtures for the crate-level tests.
//!
//! - A notification sender that records what it was asked to send
//! - A manually advanced clock
//! - A session establisher that counts calls and can be told to fail
//! - A throwaway HTTP server standing in for external providers, and a
//!   hosted login provider to serve on it

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use actix_web::{App, HttpRequest, HttpResponse, HttpServer, web};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::identity::{Identity, Session};
use crate::service::email_service::{DispatchError, NotificationSender};
use crate::service::otp_store::InMemoryVerificationStore;
use crate::service::session::{SessionError, SessionEstablisher};
use crate::service::verification_service::{Clock, VerificationPolicy, VerificationService};

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum SendMode {
    Deliver,
    Fail,
    Hang,
}

pub struct RecordingSender {
    pub sent: Mutex<Vec<(String, String)>>,
    mode: Mutex<SendMode>,
}

impl RecordingSender {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            mode: Mutex::new(SendMode::Deliver),
        }
    }

    pub fn set_mode(&self, mode: SendMode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn last_code(&self) -> String {
        self.sent.lock().unwrap().last().expect("no code sent").1.clone()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl NotificationSender for RecordingSender {
    async fn send(&self, email: &str, code: &str) -> Result<(), DispatchError> {
        let mode = *self.mode.lock().unwrap();
        self.sent
            .lock()
            .unwrap()
            .push((email.to_string(), code.to_string()));
        match mode {
            SendMode::Deliver => Ok(()),
            SendMode::Fail => Err(DispatchError::SendFailed("mailbox unavailable".into())),
            SendMode::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
        }
    }
}

pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Utc::now()),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap();
        *now = *now + by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

pub struct CountingSessions {
    pub calls: AtomicUsize,
    pub fail: bool,
}

impl CountingSessions {
    pub fn new(fail: bool) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionEstablisher for CountingSessions {
    fn name(&self) -> &'static str {
        "counting"
    }

    async fn establish(&self, identity: &Identity) -> Result<Session, SessionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(SessionError::Rejected("user pool unavailable".into()));
        }
        Ok(Session::Token {
            token: format!("session-for-{}", identity.email),
            expires_at: Utc::now() + chrono::Duration::hours(1),
            refresh_token: Some(format!("refresh-for-{}", identity.email)),
        })
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Session, SessionError> {
        let Some(email) = refresh_token.strip_prefix("refresh-for-") else {
            return Err(SessionError::Rejected("refresh token revoked".into()));
        };
        Ok(Session::Token {
            token: format!("session-for-{email}"),
            expires_at: Utc::now() + chrono::Duration::hours(1),
            refresh_token: None,
        })
    }

    async fn current_identity(&self, token: &str) -> Result<Option<Identity>, SessionError> {
        Ok(token.strip_prefix("session-for-").map(|email| {
            let domain = email.rsplit('@').next().unwrap_or_default();
            Identity::new(email, domain)
        }))
    }
}

pub struct Harness {
    pub service: Arc<VerificationService>,
    pub store: Arc<InMemoryVerificationStore>,
    pub sender: Arc<RecordingSender>,
    pub clock: Arc<ManualClock>,
    pub sessions: Arc<CountingSessions>,
}

pub fn harness() -> Harness {
    harness_with(VerificationPolicy::default(), false)
}

pub fn harness_with(policy: VerificationPolicy, failing_sessions: bool) -> Harness {
    let store = Arc::new(InMemoryVerificationStore::new());
    let sender = Arc::new(RecordingSender::new());
    let clock = Arc::new(ManualClock::new());
    let sessions = Arc::new(CountingSessions::new(failing_sessions));
    let service = VerificationService::new(store.clone(), sender.clone(), sessions.clone(), policy)
        .with_clock(clock.clone());
    Harness {
        service: Arc::new(service),
        store,
        sender,
        clock,
        sessions,
    }
}

/// Serve `configure` on an ephemeral local port and return its base URL.
pub async fn spawn_provider<F>(configure: F) -> String
where
    F: Fn(&mut web::ServiceConfig) + Send + Clone + 'static,
{
    let server = HttpServer::new(move || App::new().configure(configure.clone()))
        .workers(1)
        .bind(("127.0.0.1", 0))
        .expect("bind test provider");
    let addr = server.addrs()[0];
    actix_web::rt::spawn(server.run());
    format!("http://{addr}")
}

/// The `state` query parameter of a hosted login URL.
pub fn login_state(location: &str) -> String {
    url::Url::parse(location)
        .expect("login url")
        .query_pairs()
        .find(|(key, _)| key == "state")
        .map(|(_, value)| value.into_owned())
        .expect("state parameter")
}

/// Hosted OpenID Connect provider with two accounts. `bob-code` logs in
/// bob@acme.com and `eve-code` logs in eve@evil.org. `rt-bob` refreshes bob.
pub fn hosted_provider(cfg: &mut web::ServiceConfig) {
    cfg.route(
        "/oauth2/token",
        web::post().to(|form: web::Form<HashMap<String, String>>| async move {
            let grant = form.get("grant_type").map(String::as_str);
            let access_token = match grant {
                Some("authorization_code") => match form.get("code").map(String::as_str) {
                    Some("bob-code") => "at-bob",
                    Some("eve-code") => "at-eve",
                    _ => "",
                },
                Some("refresh_token") => match form.get("refresh_token").map(String::as_str) {
                    Some("rt-bob") => "at-bob",
                    _ => "",
                },
                _ => "",
            };
            if access_token.is_empty() {
                return HttpResponse::BadRequest().json(serde_json::json!({"error": "invalid_grant"}));
            }
            let mut body = serde_json::json!({
                "access_token": access_token,
                "id_token": "hosted-id",
                "token_type": "Bearer",
                "expires_in": 3600,
            });
            if grant == Some("authorization_code") {
                body["refresh_token"] = serde_json::json!("rt-bob");
            }
            HttpResponse::Ok().json(body)
        }),
    )
    .route(
        "/oauth2/userInfo",
        web::get().to(|req: HttpRequest| async move {
            let token = req
                .headers()
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default();
            match token {
                "Bearer at-bob" => {
                    HttpResponse::Ok().json(serde_json::json!({"sub": "u-1", "email": "Bob@Acme.com"}))
                }
                "Bearer at-eve" => {
                    HttpResponse::Ok().json(serde_json::json!({"sub": "u-2", "email": "eve@evil.org"}))
                }
                _ => HttpResponse::Unauthorized().finish(),
            }
        }),
    );
}
