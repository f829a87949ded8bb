use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Result, bail};
use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::header::{COOKIE, LOCATION, SET_COOKIE};
use axum::http::{Request, StatusCode};
use chrono::Utc;
use guildgate_auth::{MemoryTokenStore, SessionKeys, SessionUser, TokenStore};
use guildgate_common::Config;
use guildgate_discord::{
    AccessToken, Connection, Directory, DiscordUser, GuildMember, RoleCheck, UserGuild,
};
use guildgate_web::{AppState, router};
use tower::ServiceExt;
use url::Url;

const SECRET: &str = "integration-test-secret";

/// In-process stand-in for the Discord API. The role flag can be flipped
/// after login to simulate revocation between issuance and expiry.
struct FakeDirectory {
    member_present: AtomicBool,
    role_present: AtomicBool,
}

impl FakeDirectory {
    fn new(member_present: bool, role_present: bool) -> Self {
        Self {
            member_present: AtomicBool::new(member_present),
            role_present: AtomicBool::new(role_present),
        }
    }
}

#[async_trait]
impl Directory for FakeDirectory {
    async fn exchange_code(&self, code: &str) -> Result<AccessToken> {
        if code == "abc123" {
            Ok(AccessToken {
                access_token: "mock-access-token".to_string(),
            })
        } else {
            bail!("invalid authorization code")
        }
    }

    async fn fetch_user(&self, _access_token: &str) -> Result<DiscordUser> {
        Ok(DiscordUser {
            id: "42".to_string(),
            username: "nelly".to_string(),
            discriminator: "1337".to_string(),
            email: Some("nelly@example.com".to_string()),
            avatar: Some("a1b2c3".to_string()),
            premium_type: Some(2),
            locale: Some("en-US".to_string()),
            mfa_enabled: true,
            verified: true,
        })
    }

    async fn fetch_connections(&self, _access_token: &str) -> Result<Vec<Connection>> {
        Ok(vec![Connection {
            kind: "steam".to_string(),
        }])
    }

    async fn fetch_user_guilds(&self, _access_token: &str) -> Result<Vec<UserGuild>> {
        Ok(vec![UserGuild {
            id: "7".to_string(),
            name: "Test Guild".to_string(),
        }])
    }

    async fn check_role(&self, _user_id: &str) -> Result<RoleCheck> {
        if !self.member_present.load(Ordering::SeqCst) {
            return Ok(RoleCheck {
                member: None,
                role_names: Vec::new(),
                has_required: false,
            });
        }
        Ok(RoleCheck {
            member: Some(GuildMember {
                nick: Some("Nel".to_string()),
                joined_at: Some("2021-03-04T12:00:00Z".to_string()),
                roles: vec!["9000".to_string()],
            }),
            role_names: vec!["member".to_string()],
            has_required: self.role_present.load(Ordering::SeqCst),
        })
    }

    async fn send_log(&self, _message: &str) -> Result<()> {
        Ok(())
    }
}

fn test_config() -> Config {
    Config {
        bot_token: "bot-token".to_string(),
        signing_secret: SECRET.to_string(),
        guild_id: 7,
        role_id: 9000,
        client_id: "client".to_string(),
        client_secret: "client-secret".to_string(),
        redirect_uri: Url::parse("https://gate.example.com/auth/discord/callback").unwrap(),
        logging_channel_id: None,
        port: 0,
        log_level: "info".to_string(),
        dashboard_origins: vec![
            "https://gate.example.com".to_string(),
            "https://dash.example.com".to_string(),
        ],
    }
}

struct Harness {
    app: Router,
    directory: Arc<FakeDirectory>,
    tokens: Arc<MemoryTokenStore>,
}

fn harness(member_present: bool, role_present: bool) -> Harness {
    let directory = Arc::new(FakeDirectory::new(member_present, role_present));
    let tokens = Arc::new(MemoryTokenStore::new());
    let state = AppState::new(
        test_config(),
        Arc::clone(&directory) as Arc<dyn Directory>,
        Arc::clone(&tokens) as Arc<dyn TokenStore>,
    );
    Harness {
        app: router(state),
        directory,
        tokens,
    }
}

async fn get(app: &Router, uri: &str) -> axum::response::Response {
    app.clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn get_with_cookie(app: &Router, uri: &str, cookie: &str) -> axum::response::Response {
    app.clone()
        .oneshot(
            Request::builder()
                .uri(uri)
                .header(COOKIE, format!("auth_token={cookie}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn location(response: &axum::response::Response) -> &str {
    response
        .headers()
        .get(LOCATION)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
}

/// Logs in through the mocked callback and returns the session JWT.
async fn login(app: &Router) -> String {
    let response = get(app, "/auth/discord/callback?code=abc123").await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), "/dashboard");
    let cookie = response
        .headers()
        .get(SET_COOKIE)
        .and_then(|value| value.to_str().ok())
        .expect("auth cookie set");
    assert!(cookie.starts_with("auth_token="));
    assert!(cookie.contains("HttpOnly"));
    assert!(cookie.contains("Secure"));
    assert!(cookie.contains("SameSite=None"));
    assert!(cookie.contains("Max-Age=86400"));
    cookie
        .trim_start_matches("auth_token=")
        .split(';')
        .next()
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn callback_with_role_redirects_to_dashboard_with_cookie() {
    let h = harness(true, true);
    login(&h.app).await;
}

#[tokio::test]
async fn callback_without_role_redirects_to_auth_failed() {
    let h = harness(true, false);
    let response = get(&h.app, "/auth/discord/callback?code=abc123").await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), "/auth-failed");
    assert!(response.headers().get(SET_COOKIE).is_none());
}

#[tokio::test]
async fn callback_for_non_member_redirects_to_auth_failed() {
    let h = harness(false, false);
    let response = get(&h.app, "/auth/discord/callback?code=abc123").await;
    assert_eq!(location(&response), "/auth-failed");
}

#[tokio::test]
async fn callback_exchange_failure_degrades_to_auth_failed() {
    let h = harness(true, true);
    let response = get(&h.app, "/auth/discord/callback?code=wrong").await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), "/auth-failed");

    let response = get(&h.app, "/auth/discord/callback").await;
    assert_eq!(location(&response), "/auth-failed");
}

#[tokio::test]
async fn api_user_returns_snapshot_for_valid_session() {
    let h = harness(true, true);
    let jwt = login(&h.app).await;
    let response = get_with_cookie(&h.app, "/api/user", &jwt).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["id"], "42");
    assert_eq!(body["username"], "nelly");
    assert_eq!(body["nickname"], "Nel");
    assert_eq!(body["roles"], serde_json::json!(["member"]));
    assert_eq!(body["nitro"], true);
    assert_eq!(body["connections"], serde_json::json!(["steam"]));
    assert_eq!(body["guilds"], serde_json::json!(["Test Guild"]));
    assert_eq!(
        body["avatar"],
        "https://cdn.discordapp.com/avatars/42/a1b2c3.png"
    );
}

#[tokio::test]
async fn api_user_accepts_token_query_parameter() {
    let h = harness(true, true);
    let jwt = login(&h.app).await;
    let response = get(&h.app, &format!("/api/user?token={jwt}")).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn api_user_without_token_is_unauthorized() {
    let h = harness(true, true);
    let response = get(&h.app, "/api/user").await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"], "No token provided");
}

#[tokio::test]
async fn api_user_with_expired_token_reports_expiry() {
    let h = harness(true, true);
    let keys = SessionKeys::from_secret(SECRET);
    let expired = keys
        .sign_expiring_at(&snapshot_user(), Utc::now().timestamp() - 60)
        .unwrap();
    let response = get_with_cookie(&h.app, "/api/user", &expired).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"], "Token has expired");
}

#[tokio::test]
async fn api_user_with_tampered_token_reports_invalid() {
    let h = harness(true, true);
    let jwt = login(&h.app).await;
    let mut tampered = jwt.into_bytes();
    let last = tampered.len() - 1;
    tampered[last] = if tampered[last] == b'A' { b'B' } else { b'A' };
    let tampered = String::from_utf8(tampered).unwrap();

    let response = get_with_cookie(&h.app, "/api/user", &tampered).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"], "Invalid token");
}

#[tokio::test]
async fn api_user_denies_after_live_role_revocation() {
    let h = harness(true, true);
    let jwt = login(&h.app).await;

    // The credential is still valid and unexpired, but the live re-check
    // must win over the snapshot.
    h.directory.role_present.store(false, Ordering::SeqCst);
    let response = get_with_cookie(&h.app, "/api/user", &jwt).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    h.directory.member_present.store(false, Ordering::SeqCst);
    let response = get_with_cookie(&h.app, "/api/user", &jwt).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn validate_token_consumes_exactly_once() {
    let h = harness(true, true);

    let response = get(&h.app, "/api/validate_token/xyzzy").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "false");

    let issued = h.tokens.issue();
    let response = get(&h.app, &format!("/api/validate_token/{issued}")).await;
    assert_eq!(body_json(response).await["status"], "true");

    let response = get(&h.app, &format!("/api/validate_token/{issued}")).await;
    assert_eq!(body_json(response).await["status"], "false");
}

#[tokio::test]
async fn dashboard_requires_a_browser_session() {
    let h = harness(true, true);

    let response = get(&h.app, "/dashboard").await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), "/");

    let jwt = login(&h.app).await;
    let response = get_with_cookie(&h.app, "/dashboard", &jwt).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn index_redirects_sessions_to_dashboard() {
    let h = harness(true, true);

    let response = get(&h.app, "/").await;
    assert_eq!(response.status(), StatusCode::OK);

    let jwt = login(&h.app).await;
    let response = get_with_cookie(&h.app, "/", &jwt).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), "/dashboard");
}

#[tokio::test]
async fn logout_clears_the_cookie() {
    let h = harness(true, true);
    let response = get(&h.app, "/logout").await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), "/");
    let cookie = response
        .headers()
        .get(SET_COOKIE)
        .and_then(|value| value.to_str().ok())
        .unwrap();
    assert!(cookie.starts_with("auth_token=;"));
    assert!(cookie.contains("Max-Age=0"));
}

#[tokio::test]
async fn preflight_is_answered_for_allowed_origins_only() {
    let h = harness(true, true);

    let response = h
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("OPTIONS")
                .uri("/api/user")
                .header("origin", "https://dash.example.com")
                .header("access-control-request-method", "GET")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .and_then(|value| value.to_str().ok()),
        Some("https://dash.example.com")
    );
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-credentials")
            .and_then(|value| value.to_str().ok()),
        Some("true")
    );

    let response = h
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("OPTIONS")
                .uri("/api/user")
                .header("origin", "https://evil.example.com")
                .header("access-control-request-method", "GET")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert!(
        response
            .headers()
            .get("access-control-allow-origin")
            .is_none()
    );
}

fn snapshot_user() -> SessionUser {
    SessionUser {
        id: "42".to_string(),
        username: "nelly".to_string(),
        discriminator: "1337".to_string(),
        email: Some("nelly@example.com".to_string()),
        avatar: "https://cdn.discordapp.com/avatars/42/a1b2c3.png".to_string(),
        joined_at: Some("2021-03-04T12:00:00Z".to_string()),
        nickname: Some("Nel".to_string()),
        roles: vec!["member".to_string()],
        nitro: true,
        connections: vec!["steam".to_string()],
        guilds: vec!["Test Guild".to_string()],
        locale: Some("en-US".to_string()),
        mfa_enabled: true,
        verified: true,
    }
}
