use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use guildgate_common::{Config, OAUTH_SCOPES};
use reqwest::header::{AUTHORIZATION, RETRY_AFTER};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

const DISCORD_API_BASE: &str = "https://discord.com/api/v10";
const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// Slash commands the bot serves. Single source for gateway registration
/// and the CLI's REST-based sync.
pub const COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        name: "api",
        description: "Check the API status",
    },
    CommandSpec {
        name: "checkbot",
        description: "Check the bot status",
    },
    CommandSpec {
        name: "help",
        description: "Get the list of available commands",
    },
    CommandSpec {
        name: "params",
        description: "Show details of collected user parameters",
    },
    CommandSpec {
        name: "generatetoken",
        description: "Generate a one-time mobile login token",
    },
];

#[derive(Debug, Clone, Copy, Serialize)]
pub struct CommandSpec {
    pub name: &'static str,
    pub description: &'static str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscordUser {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub discriminator: String,
    pub email: Option<String>,
    pub avatar: Option<String>,
    pub premium_type: Option<u8>,
    pub locale: Option<String>,
    #[serde(default)]
    pub mfa_enabled: bool,
    #[serde(default)]
    pub verified: bool,
}

impl DiscordUser {
    pub fn avatar_url(&self) -> String {
        match &self.avatar {
            Some(hash) => format!(
                "https://cdn.discordapp.com/avatars/{}/{}.png",
                self.id, hash
            ),
            None => "https://cdn.discordapp.com/embed/avatars/0.png".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Connection {
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserGuild {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Guild {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GuildMember {
    pub nick: Option<String>,
    pub joined_at: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GuildRole {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct GuildCommand {
    id: String,
    name: String,
}

/// Result of the live membership re-check against the configured guild.
#[derive(Debug, Clone)]
pub struct RoleCheck {
    pub member: Option<GuildMember>,
    /// Names of the roles the member currently holds.
    pub role_names: Vec<String>,
    pub has_required: bool,
}

/// Identity-provider surface the web layer depends on. Production uses
/// [`DiscordApi`]; router tests substitute an in-process fake.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn exchange_code(&self, code: &str) -> Result<AccessToken>;
    async fn fetch_user(&self, access_token: &str) -> Result<DiscordUser>;
    async fn fetch_connections(&self, access_token: &str) -> Result<Vec<Connection>>;
    async fn fetch_user_guilds(&self, access_token: &str) -> Result<Vec<UserGuild>>;
    async fn check_role(&self, user_id: &str) -> Result<RoleCheck>;
    async fn send_log(&self, message: &str) -> Result<()>;
}

/// Typed client over the Discord REST API with a bounded request timeout.
/// HTTP 429 backs off once for the provider-specified duration, then gives
/// up; no other retry.
#[derive(Debug, Clone)]
pub struct DiscordApi {
    client: Client,
    config: Config,
}

impl DiscordApi {
    pub fn new(config: Config) -> Result<Self> {
        if config.bot_token.trim().is_empty() {
            bail!("discord bot token is empty");
        }
        let client = Client::builder()
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .build()
            .with_context(|| "failed to build discord HTTP client")?;
        Ok(Self { client, config })
    }

    fn bot_get(&self, path: &str) -> RequestBuilder {
        self.client
            .get(format!("{DISCORD_API_BASE}{path}"))
            .header(AUTHORIZATION, format!("Bot {}", self.config.bot_token))
    }

    fn bearer_get(&self, path: &str, access_token: &str) -> RequestBuilder {
        self.client
            .get(format!("{DISCORD_API_BASE}{path}"))
            .bearer_auth(access_token)
    }

    async fn send_with_backoff(&self, request: RequestBuilder, what: &str) -> Result<Response> {
        let retry = request.try_clone();
        let response = request
            .send()
            .await
            .with_context(|| format!("failed to call {what}"))?;
        if response.status() != StatusCode::TOO_MANY_REQUESTS {
            return Ok(response);
        }
        let Some(retry_request) = retry else {
            return Ok(response);
        };
        let wait_secs = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<f64>().ok())
            .unwrap_or(5.0);
        tracing::warn!("rate limited on {what}, retrying after {wait_secs}s");
        tokio::time::sleep(Duration::from_secs_f64(wait_secs)).await;
        retry_request
            .send()
            .await
            .with_context(|| format!("failed to retry {what}"))
    }

    async fn read_json<T: DeserializeOwned>(response: Response, what: &str) -> Result<T> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("{what} failed: {} {}", status.as_u16(), body);
        }
        response
            .json::<T>()
            .await
            .with_context(|| format!("failed to parse {what} response"))
    }

    pub async fn get_guild(&self) -> Result<Guild> {
        let path = format!("/guilds/{}", self.config.guild_id);
        let response = self
            .send_with_backoff(self.bot_get(&path), "guild fetch")
            .await?;
        Self::read_json(response, "guild fetch").await
    }

    /// `Ok(None)` when the user is not a member of the configured guild.
    pub async fn get_guild_member(&self, user_id: &str) -> Result<Option<GuildMember>> {
        let path = format!("/guilds/{}/members/{user_id}", self.config.guild_id);
        let response = self
            .send_with_backoff(self.bot_get(&path), "guild member fetch")
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(Self::read_json(response, "guild member fetch").await?))
    }

    pub async fn get_guild_roles(&self) -> Result<Vec<GuildRole>> {
        let path = format!("/guilds/{}/roles", self.config.guild_id);
        let response = self
            .send_with_backoff(self.bot_get(&path), "guild roles fetch")
            .await?;
        Self::read_json(response, "guild roles fetch").await
    }

    /// Replaces the guild's registered slash commands with [`COMMANDS`].
    pub async fn sync_guild_commands(&self) -> Result<()> {
        let path = format!(
            "/applications/{}/guilds/{}/commands",
            self.config.client_id, self.config.guild_id
        );
        let request = self
            .client
            .put(format!("{DISCORD_API_BASE}{path}"))
            .header(AUTHORIZATION, format!("Bot {}", self.config.bot_token))
            .json(COMMANDS);
        let response = self.send_with_backoff(request, "command sync").await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("command sync failed: {} {}", status.as_u16(), body);
        }
        Ok(())
    }

    /// Deletes every slash command registered for the guild. Returns how
    /// many were removed.
    pub async fn clear_guild_commands(&self) -> Result<usize> {
        let path = format!(
            "/applications/{}/guilds/{}/commands",
            self.config.client_id, self.config.guild_id
        );
        let response = self
            .send_with_backoff(self.bot_get(&path), "command list")
            .await?;
        let commands: Vec<GuildCommand> = Self::read_json(response, "command list").await?;

        let mut removed = 0;
        for command in &commands {
            let request = self
                .client
                .delete(format!("{DISCORD_API_BASE}{path}/{}", command.id))
                .header(AUTHORIZATION, format!("Bot {}", self.config.bot_token));
            let response = self
                .send_with_backoff(request, "command delete")
                .await?;
            if response.status() == StatusCode::NO_CONTENT {
                tracing::info!("removed command {}", command.name);
                removed += 1;
            } else {
                tracing::warn!(
                    "failed to remove command {}: {}",
                    command.name,
                    response.status()
                );
            }
        }
        Ok(removed)
    }
}

#[async_trait]
impl Directory for DiscordApi {
    async fn exchange_code(&self, code: &str) -> Result<AccessToken> {
        let form = [
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("scope", OAUTH_SCOPES),
        ];
        let request = self
            .client
            .post(format!("{DISCORD_API_BASE}/oauth2/token"))
            .form(&form);
        let response = self.send_with_backoff(request, "token exchange").await?;
        Self::read_json(response, "token exchange").await
    }

    async fn fetch_user(&self, access_token: &str) -> Result<DiscordUser> {
        let response = self
            .send_with_backoff(self.bearer_get("/users/@me", access_token), "user fetch")
            .await?;
        Self::read_json(response, "user fetch").await
    }

    async fn fetch_connections(&self, access_token: &str) -> Result<Vec<Connection>> {
        let response = self
            .send_with_backoff(
                self.bearer_get("/users/@me/connections", access_token),
                "connections fetch",
            )
            .await?;
        Self::read_json(response, "connections fetch").await
    }

    async fn fetch_user_guilds(&self, access_token: &str) -> Result<Vec<UserGuild>> {
        let response = self
            .send_with_backoff(
                self.bearer_get("/users/@me/guilds", access_token),
                "user guilds fetch",
            )
            .await?;
        Self::read_json(response, "user guilds fetch").await
    }

    /// Membership and role possession are fetched fresh on every call; there
    /// is no cache, so a revoked role is seen immediately.
    async fn check_role(&self, user_id: &str) -> Result<RoleCheck> {
        let Some(member) = self.get_guild_member(user_id).await? else {
            return Ok(RoleCheck {
                member: None,
                role_names: Vec::new(),
                has_required: false,
            });
        };
        let guild_roles = self.get_guild_roles().await?;
        let role_names = guild_roles
            .iter()
            .filter(|role| member.roles.contains(&role.id))
            .map(|role| role.name.clone())
            .collect();
        let has_required = member.roles.contains(&self.config.role_id.to_string());
        Ok(RoleCheck {
            member: Some(member),
            role_names,
            has_required,
        })
    }

    /// Best-effort embed post to the configured logging channel.
    async fn send_log(&self, message: &str) -> Result<()> {
        let Some(channel_id) = self.config.logging_channel_id else {
            return Ok(());
        };
        let request = self
            .client
            .post(format!("{DISCORD_API_BASE}/channels/{channel_id}/messages"))
            .header(AUTHORIZATION, format!("Bot {}", self.config.bot_token))
            .json(&serde_json::json!({
                "embeds": [{
                    "title": "Log Message",
                    "description": message,
                    "color": 3_447_003,
                }],
                "allowed_mentions": { "parse": [] }
            }));
        let response = self.send_with_backoff(request, "log message").await?;
        if !response.status().is_success() {
            let status = response.status();
            bail!("log message failed: {}", status.as_u16());
        }
        Ok(())
    }
}
