use std::env;

use thiserror::Error;
use url::Url;

/// OAuth2 scopes requested from Discord during login.
pub const OAUTH_SCOPES: &str = "identify guilds.join email connections";

/// Process configuration, read from the environment exactly once at startup.
///
/// Every required value is validated before any listener binds; a missing or
/// malformed variable aborts the process with a [`ConfigError`].
#[derive(Debug, Clone)]
pub struct Config {
    pub bot_token: String,
    pub signing_secret: String,
    pub guild_id: u64,
    pub role_id: u64,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: Url,
    pub logging_channel_id: Option<u64>,
    pub port: u16,
    pub log_level: String,
    /// Origins allowed to read API responses with credentials. Falls back to
    /// the public origin derived from `redirect_uri` when unset.
    pub dashboard_origins: Vec<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {key}")]
    Missing { key: &'static str },
    #[error("environment variable {key} has invalid value: {reason}")]
    Invalid { key: &'static str, reason: String },
}

fn required(key: &'static str) -> Result<String, ConfigError> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        _ => Err(ConfigError::Missing { key }),
    }
}

fn optional(key: &'static str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required_u64(key: &'static str) -> Result<u64, ConfigError> {
    required(key)?
        .parse::<u64>()
        .map_err(|err| ConfigError::Invalid {
            key,
            reason: err.to_string(),
        })
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let redirect_uri = required("REDIRECT_URI")?;
        let redirect_uri = Url::parse(&redirect_uri).map_err(|err| ConfigError::Invalid {
            key: "REDIRECT_URI",
            reason: err.to_string(),
        })?;
        if redirect_uri.host_str().is_none() {
            return Err(ConfigError::Invalid {
                key: "REDIRECT_URI",
                reason: "must be an absolute URL".to_string(),
            });
        }

        let logging_channel_id = match optional("LOGGING_CHANNEL_ID") {
            Some(raw) => Some(raw.parse::<u64>().map_err(|err| ConfigError::Invalid {
                key: "LOGGING_CHANNEL_ID",
                reason: err.to_string(),
            })?),
            None => None,
        };

        let port = required("PORT")?
            .parse::<u16>()
            .map_err(|err| ConfigError::Invalid {
                key: "PORT",
                reason: err.to_string(),
            })?;

        let config = Self {
            bot_token: required("DISCORD_BOT_TOKEN")?,
            signing_secret: required("SECRET_KEY")?,
            guild_id: required_u64("GUILD_ID")?,
            role_id: required_u64("ROLE_ID")?,
            client_id: required("DISCORD_CLIENT_ID")?,
            client_secret: required("DISCORD_CLIENT_SECRET")?,
            logging_channel_id,
            port,
            log_level: optional("GUILDGATE_LOG").unwrap_or_else(|| "info".to_string()),
            dashboard_origins: Vec::new(),
            redirect_uri,
        };

        let dashboard_origins = match optional("DASHBOARD_ORIGINS") {
            Some(raw) => raw
                .split(',')
                .map(|origin| origin.trim().trim_end_matches('/').to_string())
                .filter(|origin| !origin.is_empty())
                .collect(),
            None => vec![config.public_origin()],
        };

        Ok(Self {
            dashboard_origins,
            ..config
        })
    }

    /// Public origin of the deployment, derived from the OAuth redirect URI.
    pub fn public_origin(&self) -> String {
        let scheme = self.redirect_uri.scheme();
        let host = self.redirect_uri.host_str().unwrap_or_default();
        match self.redirect_uri.port() {
            Some(port) => format!("{scheme}://{host}:{port}"),
            None => format!("{scheme}://{host}"),
        }
    }

    /// Discord authorize URL the login route redirects to.
    pub fn authorize_url(&self) -> String {
        let mut url = Url::parse("https://discord.com/api/oauth2/authorize").expect("static url");
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", self.redirect_uri.as_str())
            .append_pair("response_type", "code")
            .append_pair("scope", OAUTH_SCOPES);
        url.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config {
            bot_token: "bot-token".to_string(),
            signing_secret: "signing-secret".to_string(),
            guild_id: 1,
            role_id: 2,
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            redirect_uri: Url::parse("https://gate.example.com/auth/discord/callback").unwrap(),
            logging_channel_id: None,
            port: 3000,
            log_level: "info".to_string(),
            dashboard_origins: vec!["https://gate.example.com".to_string()],
        }
    }

    #[test]
    fn public_origin_drops_path_and_keeps_port() {
        let mut config = test_config();
        assert_eq!(config.public_origin(), "https://gate.example.com");

        config.redirect_uri = Url::parse("http://localhost:3000/auth/discord/callback").unwrap();
        assert_eq!(config.public_origin(), "http://localhost:3000");
    }

    #[test]
    fn authorize_url_carries_client_and_scopes() {
        let url = test_config().authorize_url();
        assert!(url.starts_with("https://discord.com/api/oauth2/authorize?"));
        assert!(url.contains("client_id=client"));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("scope=identify+guilds.join+email+connections"));
    }
}
