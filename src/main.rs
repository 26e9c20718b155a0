use std::sync::Arc;

use anyhow::Result;
use serenity::{
    all::{
        Command as AppCommand, Context as SerenityContext, GatewayIntents, Interaction,
        Permissions, Ready,
    },
    async_trait,
};
use songbird::{Config as VoiceConfig, Songbird, serenity::SerenityInit};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

mod api;
mod audio;
mod commands;
mod env;
mod metrics;
mod player;
mod voice;
mod web;

use audio::MixRecommender;
use metrics::METRICS;
use player::{Orchestrator, OrchestratorKey};
use voice::SongbirdNode;

struct Handler;

#[async_trait]
impl serenity::prelude::EventHandler for Handler {
    async fn ready(&self, ctx: SerenityContext, ready: Ready) {
        info!("Logged in as {}", ready.user.name);

        // Log an invite URL with minimal required voice permissions
        let perms = Permissions::CONNECT | Permissions::SPEAK;
        if let Ok(app) = ctx.http.get_current_application_info().await {
            let invite = format!(
                "https://discord.com/api/oauth2/authorize?client_id={}&permissions={}&scope=bot%20applications.commands",
                app.id,
                perms.bits()
            );
            info!(
                "Invite this bot: {} (app_id={}, user_id={})",
                invite, app.id, ready.user.id
            );
        }

        // Register global slash commands
        for def in [
            commands::join::definition(),
            commands::play::definition(),
            commands::pause::definition(),
            commands::resume::definition(),
            commands::skip::definition(),
            commands::queue::definition(),
            commands::clear::definition(),
            commands::volume::definition(),
            commands::leave::definition(),
        ] {
            if let Err(e) = AppCommand::create_global_command(&ctx.http, def).await {
                error!("failed to register global command: {e:?}");
            }
        }

        METRICS.set_ready(true);
    }

    async fn interaction_create(&self, ctx: SerenityContext, interaction: Interaction) {
        if let Interaction::Command(cmd) = interaction {
            let outcome = match cmd.data.name.as_str() {
                "join" => commands::join::handle(&ctx, &cmd).await,
                "play" => commands::play::handle(&ctx, &cmd).await,
                "pause" => commands::pause::handle(&ctx, &cmd).await,
                "resume" => commands::resume::handle(&ctx, &cmd).await,
                "skip" => commands::skip::handle(&ctx, &cmd).await,
                "queue" => commands::queue::handle(&ctx, &cmd).await,
                "clear" => commands::clear::handle(&ctx, &cmd).await,
                "volume" => commands::volume::handle(&ctx, &cmd).await,
                "leave" => commands::leave::handle(&ctx, &cmd).await,
                _ => Ok(()),
            };
            if let Err(why) = outcome {
                error!("/{} failed: {why:?}", cmd.data.name);
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let token = env::read_discord_token()?;

    let intents = GatewayIntents::non_privileged() | GatewayIntents::GUILD_VOICE_STATES;
    let voice_cfg = VoiceConfig::default()
        .preallocated_tracks(2)
        .use_softclip(false)
        .mix_mode(env::mix_mode());
    let manager = Songbird::serenity_from_config(voice_cfg);

    let (node, mut node_events) = SongbirdNode::new(manager.clone());
    let orchestrator = Orchestrator::new(node, Arc::new(MixRecommender), env::connect_timeout());

    let client = serenity::Client::builder(token, intents)
        .event_handler(Handler)
        .register_songbird_with(manager)
        .await?;

    {
        let mut data = client.data.write().await;
        data.insert::<OrchestratorKey>(orchestrator.clone());
    }

    // Post session announcements to each session's bound text channel.
    {
        let http = client.http.clone();
        let mut events = orchestrator.subscribe();
        tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                };
                let Some(line) = event.announcement() else {
                    continue;
                };
                if let Err(e) = event.channel_id.say(&http, line).await {
                    warn!(channel = %event.channel_id, error = %e, "failed to post announcement");
                }
            }
        });
    }

    // Pump audio-node callbacks into the orchestrator.
    {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            while let Some((guild, event)) = node_events.recv().await {
                orchestrator.handle_node_event(guild, event).await;
            }
        });
    }

    // Companion HTTP surface: probes, metrics, session views, event stream.
    {
        let orchestrator = orchestrator.clone();
        let bind = env::http_bind();
        tokio::spawn(async move {
            if let Err(e) = web::run_http(bind, orchestrator).await {
                error!("http server error: {e:?}");
            }
        });
    }

    info!(
        "Commands: /join, /play url:<link>, /pause, /resume, /skip, /queue, /clear, /volume, /leave"
    );
    info!(
        "Tunables: CHORUS_MIX_MODE=mono|stereo, CHORUS_BITRATE=16000..192000, CHORUS_CONNECT_TIMEOUT_MS=1000..60000, CHORUS_HTTP_BIND=addr, DOWNLOAD_FOLDER=path"
    );

    let mut client = client;
    if let Err(why) = client.start_autosharded().await {
        error!("Client error: {why:?}");
    }
    Ok(())
}
