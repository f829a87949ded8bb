use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use guildgate_auth::TokenStore;
use guildgate_common::Config;
use guildgate_discord::COMMANDS;
use serenity::all::{
    ActivityData, Client, Colour, CommandInteraction, Context, CreateCommand, CreateEmbed,
    CreateInteractionResponse, CreateInteractionResponseMessage, EventHandler, GatewayIntents,
    GuildId, Interaction, OnlineStatus, Ready, RoleId,
};
use serenity::async_trait;

const RESYNC_INTERVAL: Duration = Duration::from_secs(3600);
const STATUS_CHECK_TIMEOUT_MS: u64 = 10_000;

struct Handler {
    config: Config,
    tokens: Arc<dyn TokenStore>,
    http: reqwest::Client,
}

impl Handler {
    fn new(config: Config, tokens: Arc<dyn TokenStore>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(STATUS_CHECK_TIMEOUT_MS))
            .build()
            .with_context(|| "failed to build status-check HTTP client")?;
        Ok(Self {
            config,
            tokens,
            http,
        })
    }
}

fn build_commands() -> Vec<CreateCommand> {
    COMMANDS
        .iter()
        .map(|spec| CreateCommand::new(spec.name).description(spec.description))
        .collect()
}

/// Service endpoints probed by `/api`, derived from the deployment origin.
fn status_endpoints(origin: &str) -> Vec<(String, &'static str)> {
    vec![
        (format!("{origin}/"), "Index"),
        (format!("{origin}/auth/discord"), "Auth Discord"),
        (format!("{origin}/api/user"), "API User"),
    ]
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        tracing::info!("{} is connected to Discord", ready.user.name);

        ctx.set_presence(
            Some(ActivityData::watching("community security")),
            OnlineStatus::DoNotDisturb,
        );

        let guild_id = GuildId::new(self.config.guild_id);
        if let Err(err) = guild_id.set_commands(&ctx.http, build_commands()).await {
            tracing::warn!("initial command registration failed: {err}");
        }

        // Hourly re-sync keeps registration healthy; a failed tick is
        // swallowed and the next one self-heals.
        let http = ctx.http.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(RESYNC_INTERVAL);
            interval.tick().await;
            loop {
                interval.tick().await;
                if let Err(err) = guild_id.set_commands(&http, build_commands()).await {
                    tracing::warn!("hourly command re-sync failed: {err}");
                }
            }
        });
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        let Interaction::Command(command) = interaction else {
            return;
        };
        match command.data.name.as_str() {
            "api" => self.handle_api(&ctx, &command).await,
            "checkbot" => self.handle_checkbot(&ctx, &command).await,
            "help" => self.handle_help(&ctx, &command).await,
            "params" => self.handle_params(&ctx, &command).await,
            "generatetoken" => self.handle_generate_token(&ctx, &command).await,
            other => tracing::warn!("unknown command invoked: {other}"),
        }
    }
}

impl Handler {
    async fn handle_api(&self, ctx: &Context, command: &CommandInteraction) {
        let mut statuses = Vec::new();
        let mut all_ok = true;
        for (url, name) in status_endpoints(&self.config.public_origin()) {
            let line = match self.http.get(&url).send().await {
                Ok(response) if response.status().as_u16() == 200 => {
                    format!("{name} - 200 - OK")
                }
                Ok(response) => {
                    all_ok = false;
                    format!("{name} - {} - FAIL", response.status().as_u16())
                }
                Err(err) => {
                    all_ok = false;
                    format!("{name} - ERROR - {err}")
                }
            };
            statuses.push(line);
        }

        let embed = CreateEmbed::new()
            .title("API Status")
            .description(statuses.join("\n"))
            .colour(if all_ok { Colour::DARK_GREEN } else { Colour::RED });
        respond(ctx, command, embed, false).await;
    }

    async fn handle_checkbot(&self, ctx: &Context, command: &CommandInteraction) {
        let in_guild = ctx.cache.guild(GuildId::new(self.config.guild_id)).is_some();
        let (status, colour) = if in_guild {
            ("Bot status: OK", Colour::DARK_GREEN)
        } else {
            ("Bot status: FAIL - Not in guild", Colour::RED)
        };
        let embed = CreateEmbed::new()
            .title("Bot Status")
            .description(status)
            .colour(colour);
        respond(ctx, command, embed, false).await;
    }

    async fn handle_help(&self, ctx: &Context, command: &CommandInteraction) {
        let listing = COMMANDS
            .iter()
            .map(|spec| format!("/{}", spec.name))
            .collect::<Vec<_>>()
            .join(", ");
        let embed = CreateEmbed::new()
            .title("Help Menu")
            .description(format!("Available commands: {listing}"))
            .colour(Colour::BLUE);
        respond(ctx, command, embed, false).await;
    }

    async fn handle_params(&self, ctx: &Context, command: &CommandInteraction) {
        let embed = CreateEmbed::new()
            .title("Collected User Parameters")
            .description(PARAMS_DESCRIPTION)
            .colour(Colour::BLURPLE);
        respond(ctx, command, embed, false).await;
    }

    /// Role-gated: replies with a fresh one-time token, visible only to the
    /// invoker.
    async fn handle_generate_token(&self, ctx: &Context, command: &CommandInteraction) {
        let required = RoleId::new(self.config.role_id);
        let authorized = command
            .member
            .as_ref()
            .is_some_and(|member| member.roles.contains(&required));

        if !authorized {
            let embed = CreateEmbed::new()
                .title("Not authorized")
                .description("You need the required role to generate a login token.")
                .colour(Colour::RED);
            respond(ctx, command, embed, true).await;
            return;
        }

        let token = self.tokens.issue();
        let embed = CreateEmbed::new()
            .title("One-Time Login Token")
            .description(format!(
                "Your token is **{token}**. It can be redeemed exactly once."
            ))
            .colour(Colour::DARK_GREEN);
        respond(ctx, command, embed, true).await;
    }
}

const PARAMS_DESCRIPTION: &str = "\
**id**: User ID
**username**: Discord username
**discriminator**: Discord discriminator
**email**: User email
**avatar**: User avatar URL
**joined_at**: Guild join date
**nickname**: Guild nickname
**roles**: Guild roles
**nitro**: Has Nitro subscription
**connections**: Connected accounts
**guilds**: Guilds visible to the user
**locale**: User locale
**mfa_enabled**: MFA enabled
**verified**: Email verified";

async fn respond(ctx: &Context, command: &CommandInteraction, embed: CreateEmbed, ephemeral: bool) {
    let message = CreateInteractionResponseMessage::new()
        .embed(embed)
        .ephemeral(ephemeral);
    if let Err(err) = command
        .create_response(&ctx.http, CreateInteractionResponse::Message(message))
        .await
    {
        tracing::warn!("failed to respond to {}: {err}", command.data.name);
    }
}

/// Starts the gateway client; blocks until the connection shuts down, so
/// call it from its own task.
pub async fn run(config: Config, tokens: Arc<dyn TokenStore>) -> Result<()> {
    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_MEMBERS;
    let handler = Handler::new(config.clone(), tokens)?;

    let mut client = Client::builder(&config.bot_token, intents)
        .event_handler(handler)
        .await
        .with_context(|| "failed to build discord client")?;

    tracing::info!("starting discord bot");
    client
        .start()
        .await
        .with_context(|| "discord client exited with error")?;
    Ok(())
}
