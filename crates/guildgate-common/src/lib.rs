pub mod config;
pub mod logging;

pub const APP_NAME: &str = "guildgate";

pub use config::{Config, ConfigError, OAUTH_SCOPES};
