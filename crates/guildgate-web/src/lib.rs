use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, COOKIE, LOCATION, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use guildgate_auth::{SessionError, SessionKeys, SessionUser, TokenStore};
use guildgate_common::Config;
use guildgate_discord::{Connection, Directory, DiscordUser, GuildMember, UserGuild};
use serde::Deserialize;
use tower_http::cors::CorsLayer;

pub mod error;
mod pages;

pub use error::AuthError;

const AUTH_COOKIE: &str = "auth_token";

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub directory: Arc<dyn Directory>,
    pub keys: SessionKeys,
    pub tokens: Arc<dyn TokenStore>,
}

impl AppState {
    pub fn new(
        config: Config,
        directory: Arc<dyn Directory>,
        tokens: Arc<dyn TokenStore>,
    ) -> Self {
        let keys = SessionKeys::from_secret(&config.signing_secret);
        Self {
            config,
            directory,
            keys,
            tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

pub fn router(state: AppState) -> Router {
    let origins: Vec<HeaderValue> = state
        .config
        .dashboard_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    // Credentials are only released to the configured dashboard origins;
    // preflight requests are answered by the layer itself.
    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([ACCEPT, AUTHORIZATION, CONTENT_TYPE]);

    let api = Router::new()
        .route("/api/user", get(api_user))
        .route("/api/validate_token/{token}", get(api_validate_token))
        .layer(cors);

    Router::new()
        .route("/", get(index))
        .route("/auth/discord", get(auth_discord))
        .route("/auth/discord/callback", get(auth_discord_callback))
        .route("/dashboard", get(dashboard))
        .route("/logout", get(logout))
        .route("/auth-failed", get(auth_failed))
        .merge(api)
        .with_state(state)
}

pub async fn serve(state: AppState) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], state.config.port));
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!("web boundary listening on {addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn index(State(state): State<AppState>, headers: HeaderMap) -> Response {
    match browser_session(&state, &headers) {
        Some(_) => found("/dashboard"),
        None => Html(pages::LANDING).into_response(),
    }
}

async fn auth_discord(State(state): State<AppState>) -> Response {
    found(&state.config.authorize_url())
}

async fn auth_discord_callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> Response {
    let Some(code) = query.code.filter(|code| !code.is_empty()) else {
        return found("/auth-failed");
    };

    // Upstream failures during the exchange degrade to the auth-failed page
    // instead of surfacing a raw error to the browser.
    match complete_login(&state, &code).await {
        Ok(LoginOutcome::Authorized { user, jwt }) => {
            report(
                &state,
                &format!(
                    "User {}#{} authenticated successfully.",
                    user.username, user.discriminator
                ),
            )
            .await;
            let mut response = found("/dashboard");
            if let Ok(cookie) = HeaderValue::from_str(&format!(
                "{AUTH_COOKIE}={jwt}; Path=/; Max-Age=86400; HttpOnly; Secure; SameSite=None"
            )) {
                response.headers_mut().append(SET_COOKIE, cookie);
            }
            response
        }
        Ok(LoginOutcome::Denied { username }) => {
            report(
                &state,
                &format!("Authentication failed for user {username}"),
            )
            .await;
            found("/auth-failed")
        }
        Err(err) => {
            tracing::warn!("oauth callback failed: {err:#}");
            found("/auth-failed")
        }
    }
}

enum LoginOutcome {
    Authorized { user: SessionUser, jwt: String },
    Denied { username: String },
}

async fn complete_login(state: &AppState, code: &str) -> Result<LoginOutcome> {
    let token = state.directory.exchange_code(code).await?;
    let user = state.directory.fetch_user(&token.access_token).await?;
    let check = state.directory.check_role(&user.id).await?;

    let denied_name = format!("{}#{}", user.username, user.discriminator);
    let Some(member) = check.member else {
        return Ok(LoginOutcome::Denied {
            username: denied_name,
        });
    };
    if !check.has_required {
        return Ok(LoginOutcome::Denied {
            username: denied_name,
        });
    }

    let connections = state
        .directory
        .fetch_connections(&token.access_token)
        .await?;
    let guilds = state.directory.fetch_user_guilds(&token.access_token).await?;

    let snapshot = assemble_snapshot(&user, &member, check.role_names, connections, guilds);
    let jwt = state
        .keys
        .sign(&snapshot)
        .map_err(|err| anyhow!("failed to sign session credential: {err}"))?;
    Ok(LoginOutcome::Authorized {
        user: snapshot,
        jwt,
    })
}

fn assemble_snapshot(
    user: &DiscordUser,
    member: &GuildMember,
    role_names: Vec<String>,
    connections: Vec<Connection>,
    guilds: Vec<UserGuild>,
) -> SessionUser {
    SessionUser {
        id: user.id.clone(),
        username: user.username.clone(),
        discriminator: user.discriminator.clone(),
        email: user.email.clone(),
        avatar: user.avatar_url(),
        joined_at: member.joined_at.clone(),
        nickname: member.nick.clone(),
        roles: role_names,
        nitro: user.premium_type.is_some_and(|kind| kind != 0),
        connections: connections.into_iter().map(|c| c.kind).collect(),
        guilds: guilds.into_iter().map(|g| g.name).collect(),
        locale: user.locale.clone(),
        mfa_enabled: user.mfa_enabled,
        verified: user.verified,
    }
}

/// `/api/user`: verify the credential, then re-derive authorization from the
/// live role check. The snapshot is returned only when the member still
/// holds the required role right now.
async fn api_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
) -> Result<Json<SessionUser>, AuthError> {
    let token = cookie_value(&headers, AUTH_COOKIE)
        .or(query.token)
        .ok_or(AuthError::MissingToken)?;
    let user = state.keys.verify(&token).map_err(|err| match err {
        SessionError::Expired => AuthError::Expired,
        SessionError::Invalid => AuthError::Invalid,
    })?;

    let check = state.directory.check_role(&user.id).await?;
    if check.member.is_none() || !check.has_required {
        return Err(AuthError::RoleRevoked);
    }
    Ok(Json(user))
}

async fn api_validate_token(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Json<serde_json::Value> {
    let status = if state.tokens.redeem(&token) {
        "true"
    } else {
        "false"
    };
    Json(serde_json::json!({ "status": status }))
}

async fn dashboard(State(state): State<AppState>, headers: HeaderMap) -> Response {
    match browser_session(&state, &headers) {
        Some(_) => Html(pages::DASHBOARD).into_response(),
        None => found("/"),
    }
}

async fn logout(State(_state): State<AppState>) -> Response {
    let mut response = found("/");
    if let Ok(cookie) = HeaderValue::from_str(&format!(
        "{AUTH_COOKIE}=; Path=/; Max-Age=0; HttpOnly; Secure; SameSite=None"
    )) {
        response.headers_mut().append(SET_COOKIE, cookie);
    }
    response
}

async fn auth_failed() -> Html<&'static str> {
    Html(pages::AUTH_FAILED)
}

fn browser_session(state: &AppState, headers: &HeaderMap) -> Option<SessionUser> {
    let token = cookie_value(headers, AUTH_COOKIE)?;
    state.keys.verify(&token).ok()
}

/// Plain `302 Found` redirect; the axum helper emits 303 for GET.
fn found(location: &str) -> Response {
    let mut response = StatusCode::FOUND.into_response();
    if let Ok(value) = HeaderValue::from_str(location) {
        response.headers_mut().insert(LOCATION, value);
    }
    response
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let raw = headers.get(COOKIE)?.to_str().ok()?;
    raw.split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}

async fn report(state: &AppState, message: &str) {
    if let Err(err) = state.directory.send_log(message).await {
        tracing::debug!("failed to post log embed: {err:#}");
    }
}
