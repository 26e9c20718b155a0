pub mod clear;
pub mod join;
pub mod leave;
pub mod pause;
pub mod play;
pub mod queue;
pub mod resume;
pub mod skip;
pub mod volume;

use std::sync::Arc;

use anyhow::{Result, anyhow};
use serenity::all::{
    ChannelType, CommandInteraction, Context as SerenityContext, CreateInteractionResponse,
    CreateInteractionResponseMessage, EditInteractionResponse,
};

use crate::player::{CommandContext, CommandResult, Orchestrator, OrchestratorKey};

pub(crate) async fn orchestrator(ctx: &SerenityContext) -> Result<Arc<Orchestrator>> {
    ctx.data
        .read()
        .await
        .get::<OrchestratorKey>()
        .cloned()
        .ok_or_else(|| anyhow!("orchestrator not initialised"))
}

/// Builds the admission-control view of an interaction: who invoked it,
/// where, and which voice channel they sit in (from the gateway cache).
pub(crate) fn invocation_context(
    ctx: &SerenityContext,
    cmd: &CommandInteraction,
) -> CommandContext {
    let guild_id = cmd.guild_id;
    let voice_channel = match guild_id {
        Some(guild) => ctx.cache.guild(guild).and_then(|g| {
            g.voice_states
                .get(&cmd.user.id)
                .and_then(|vs| vs.channel_id)
        }),
        None => None,
    };
    let channel_is_text = cmd
        .channel
        .as_ref()
        .map(|c| {
            matches!(
                c.kind,
                ChannelType::Text
                    | ChannelType::News
                    | ChannelType::PublicThread
                    | ChannelType::PrivateThread
            )
        })
        .unwrap_or(false);
    CommandContext {
        invoker: cmd.user.id,
        guild_id,
        channel_id: cmd.channel_id,
        channel_is_text,
        voice_channel,
    }
}

pub(crate) async fn defer(ctx: &SerenityContext, cmd: &CommandInteraction) {
    cmd.create_response(
        &ctx.http,
        CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
    )
    .await
    .ok();
}

/// Renders a command outcome into the deferred response.
pub(crate) async fn respond(
    ctx: &SerenityContext,
    cmd: &CommandInteraction,
    result: &CommandResult,
) -> Result<()> {
    let text = {
        let s = result.to_string();
        if s.is_empty() { "Done.".to_string() } else { s }
    };
    cmd.edit_response(&ctx.http, EditInteractionResponse::new().content(text))
        .await?;
    Ok(())
}
