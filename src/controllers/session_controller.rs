use std::sync::Arc;

use actix_web::{
    HttpRequest, HttpResponse,
    cookie::{Cookie, SameSite},
    http::header,
    web,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use time::Duration;
use tracing::{info, warn};

use crate::models::identity::Session;
use crate::service::session::{SessionError, SessionEstablisher};

pub const SESSION_COOKIE: &str = "session_token";
pub const REFRESH_COOKIE: &str = "refresh_token";
/// Only the session endpoints ever see the refresh token.
const REFRESH_COOKIE_PATH: &str = "/api/session";
const REFRESH_COOKIE_DAYS: i64 = 7;
const LOGIN_LANDING: &str = "/dashboard";
const LOGIN_FAILED: &str = "/?auth=failed";

/// Builds the cookies that carry a session to and from the browser.
#[derive(Debug, Clone, Copy)]
pub struct SessionCookies {
    secure: bool,
}

impl SessionCookies {
    pub fn new(secure: bool) -> Self {
        Self { secure }
    }

    fn build(&self, name: &'static str, value: String, path: &'static str, max_age: Duration) -> Cookie<'static> {
        Cookie::build(name, value)
            .path(path)
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Lax)
            .max_age(max_age)
            .finish()
    }

    /// Access cookie for `token`, plus the refresh cookie when there is one.
    pub fn issue(
        &self,
        token: String,
        expires_at: DateTime<Utc>,
        refresh_token: Option<String>,
    ) -> Vec<Cookie<'static>> {
        let seconds = (expires_at - Utc::now()).num_seconds().max(0);
        let mut cookies = vec![self.build(SESSION_COOKIE, token, "/", Duration::seconds(seconds))];
        if let Some(refresh_token) = refresh_token {
            cookies.push(self.build(
                REFRESH_COOKIE,
                refresh_token,
                REFRESH_COOKIE_PATH,
                Duration::days(REFRESH_COOKIE_DAYS),
            ));
        }
        cookies
    }

    pub fn removal(&self) -> [Cookie<'static>; 2] {
        [
            self.build(SESSION_COOKIE, String::new(), "/", Duration::ZERO),
            self.build(REFRESH_COOKIE, String::new(), REFRESH_COOKIE_PATH, Duration::ZERO),
        ]
    }
}

fn provider_failure(err: SessionError) -> HttpResponse {
    warn!(error = %err, "identity provider call failed");
    HttpResponse::InternalServerError().json(serde_json::json!({
        "success": false,
        "error": "Identity provider unavailable"
    }))
}

fn redirect(location: &str) -> HttpResponse {
    HttpResponse::SeeOther()
        .insert_header((header::LOCATION, location))
        .finish()
}

#[derive(Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

pub struct SessionController {
    pub sessions: Arc<dyn SessionEstablisher>,
    pub cookies: SessionCookies,
}

impl SessionController {
    pub fn new(sessions: Arc<dyn SessionEstablisher>, cookies: SessionCookies) -> Self {
        Self { sessions, cookies }
    }

    pub async fn current(controller: web::Data<Self>, req: HttpRequest) -> HttpResponse {
        let Some(cookie) = req.cookie(SESSION_COOKIE) else {
            return HttpResponse::Ok().json(serde_json::json!({
                "authenticated": false,
                "user": null
            }));
        };

        match controller.sessions.current_identity(cookie.value()).await {
            Ok(user) => HttpResponse::Ok().json(serde_json::json!({
                "authenticated": user.is_some(),
                "user": user
            })),
            Err(err) => provider_failure(err),
        }
    }

    pub async fn refresh(controller: web::Data<Self>, req: HttpRequest) -> HttpResponse {
        let Some(cookie) = req.cookie(REFRESH_COOKIE) else {
            return HttpResponse::Unauthorized().json(serde_json::json!({
                "success": false,
                "error": "No refresh token"
            }));
        };

        match controller.sessions.refresh(cookie.value()).await {
            Ok(Session::Token {
                token,
                expires_at,
                refresh_token,
            }) => {
                let mut response = HttpResponse::Ok();
                for cookie in controller.cookies.issue(token, expires_at, refresh_token) {
                    response.cookie(cookie);
                }
                response.json(serde_json::json!({
                    "success": true,
                    "expiresAt": expires_at
                }))
            }
            Ok(Session::Redirect { location }) => HttpResponse::Ok().json(serde_json::json!({
                "success": true,
                "redirect": location
            })),
            Err(SessionError::Unsupported(provider)) => {
                HttpResponse::BadRequest().json(serde_json::json!({
                    "success": false,
                    "error": format!("Session refresh is not supported by the {provider} provider")
                }))
            }
            Err(SessionError::Rejected(reason)) => {
                info!(%reason, "refresh token refused");
                let mut response = HttpResponse::Unauthorized();
                for cookie in controller.cookies.removal() {
                    response.cookie(cookie);
                }
                response.json(serde_json::json!({
                    "success": false,
                    "error": "Session expired"
                }))
            }
            Err(err) => provider_failure(err),
        }
    }

    pub async fn logout(controller: web::Data<Self>, req: HttpRequest) -> HttpResponse {
        let redirect = match req.cookie(SESSION_COOKIE) {
            Some(cookie) => match controller.sessions.end_session(cookie.value()).await {
                Ok(redirect) => redirect,
                Err(err) => return provider_failure(err),
            },
            None => None,
        };

        let mut response = HttpResponse::Ok();
        for cookie in controller.cookies.removal() {
            response.cookie(cookie);
        }
        response.json(serde_json::json!({
            "success": true,
            "redirect": redirect
        }))
    }

    pub async fn callback(
        controller: web::Data<Self>,
        query: web::Query<CallbackQuery>,
    ) -> HttpResponse {
        if let Some(error) = &query.error {
            warn!(%error, "identity provider returned an error");
            return redirect(LOGIN_FAILED);
        }
        let Some(code) = query.code.as_deref().filter(|c| !c.is_empty()) else {
            warn!("login callback without authorization code");
            return redirect(LOGIN_FAILED);
        };
        let Some(state) = query.state.as_deref().filter(|s| !s.is_empty()) else {
            warn!("login callback without state");
            return redirect(LOGIN_FAILED);
        };

        match controller.sessions.complete_login(code, state).await {
            Ok(Session::Token {
                token,
                expires_at,
                refresh_token,
            }) => {
                let mut response = HttpResponse::SeeOther();
                response.insert_header((header::LOCATION, LOGIN_LANDING));
                for cookie in controller.cookies.issue(token, expires_at, refresh_token) {
                    response.cookie(cookie);
                }
                response.finish()
            }
            Ok(Session::Redirect { location }) => redirect(&location),
            Err(err) => {
                warn!(error = %err, provider = controller.sessions.name(), "login callback failed");
                redirect(LOGIN_FAILED)
            }
        }
    }
}
