use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use guildgate_auth::{MemoryTokenStore, TokenStore};
use guildgate_common::{Config, logging};
use guildgate_discord::DiscordApi;
use guildgate_web::AppState;

#[derive(Debug, Parser)]
#[command(
    name = "guildgate",
    about = "Discord community bot with an OAuth2 member dashboard",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the bot and the web boundary (default).
    Run,
    /// Validate configuration and exit.
    Doctor,
    /// Slash-command registration maintenance.
    Commands {
        #[command(subcommand)]
        command: CommandsCommand,
    },
}

#[derive(Debug, Subcommand)]
enum CommandsCommand {
    /// Replace the guild's registered slash commands with the current set.
    Sync,
    /// Remove every slash command registered for the guild.
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run().await,
        Command::Doctor => doctor(),
        Command::Commands { command } => commands(command).await,
    }
}

async fn run() -> Result<()> {
    // Misconfiguration aborts here, before any listener binds.
    let config = Config::from_env()?;
    logging::init(&config.log_level);

    let directory = DiscordApi::new(config.clone())?;
    let tokens: Arc<dyn TokenStore> = Arc::new(MemoryTokenStore::new());
    let state = AppState::new(config.clone(), Arc::new(directory), Arc::clone(&tokens));

    // Two long-lived tasks sharing the token store: the gateway client and
    // the HTTP boundary. The process ends when either one does.
    let bot = tokio::spawn(guildgate_bot::run(config, Arc::clone(&tokens)));
    let web = tokio::spawn(guildgate_web::serve(state));

    tokio::select! {
        result = bot => result.context("bot task panicked")??,
        result = web => result.context("web task panicked")??,
    }
    Ok(())
}

fn doctor() -> Result<()> {
    let config = Config::from_env()?;
    println!("configuration OK");
    println!("  guild_id:         {}", config.guild_id);
    println!("  role_id:          {}", config.role_id);
    println!("  client_id:        {}", config.client_id);
    println!("  redirect_uri:     {}", config.redirect_uri);
    println!("  public origin:    {}", config.public_origin());
    println!("  port:             {}", config.port);
    println!(
        "  logging channel:  {}",
        config
            .logging_channel_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "disabled".to_string())
    );
    println!(
        "  dashboard origins: {}",
        config.dashboard_origins.join(", ")
    );
    Ok(())
}

async fn commands(command: CommandsCommand) -> Result<()> {
    let config = Config::from_env()?;
    logging::init(&config.log_level);
    let api = DiscordApi::new(config)?;
    match command {
        CommandsCommand::Sync => {
            api.sync_guild_commands().await?;
            println!("slash commands synchronized");
        }
        CommandsCommand::Clear => {
            let removed = api.clear_guild_commands().await?;
            println!("removed {removed} slash commands");
        }
    }
    Ok(())
}
