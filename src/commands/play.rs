use anyhow::{Result, anyhow};
use serenity::all::{
    CommandDataOptionValue, CommandInteraction, CommandOptionType, Context as SerenityContext,
    CreateCommand, CreateCommandOption, EditInteractionResponse,
};

use crate::audio::{FetchProgress, spawn_resolve};
use crate::player::{Category, CommandResult, FailureCause};

pub fn definition() -> CreateCommand {
    let opt =
        CreateCommandOption::new(CommandOptionType::String, "url", "URL to play").required(true);
    CreateCommand::new("play")
        .description("Play audio from a URL, or queue it behind the current track")
        .add_option(opt)
}

pub async fn handle(ctx: &SerenityContext, cmd: &CommandInteraction) -> Result<()> {
    let url = cmd
        .data
        .options
        .iter()
        .find(|o| o.name == "url")
        .and_then(|o| match &o.value {
            CommandDataOptionValue::String(s) => Some(s.as_str()),
            _ => None,
        })
        .ok_or_else(|| anyhow!("missing url"))?;

    super::defer(ctx, cmd).await;

    let orch = super::orchestrator(ctx).await?;
    let cctx = super::invocation_context(ctx, cmd);

    // Resolution is slow; settle the cheap refusals before spending on it.
    if let Some(denied) = orch.admission_denied(Category::Playback, &cctx) {
        return super::respond(ctx, cmd, &denied).await;
    }
    if let Some(guild) = cctx.guild_id
        && !orch.has_session(guild).await
    {
        let result = CommandResult::failure(FailureCause::NoActiveSession);
        return super::respond(ctx, cmd, &result).await;
    }
    if url::Url::parse(url).is_err() {
        let result = CommandResult::rejected("that does not look like a URL");
        return super::respond(ctx, cmd, &result).await;
    }

    // Stream download progress into the deferred message while we resolve.
    let (mut rx, handle) = spawn_resolve(url.to_string(), cmd.user.id);
    while let Some(FetchProgress { percent }) = rx.recv().await {
        let bar = text_bar(percent);
        let _ = cmd
            .edit_response(
                &ctx.http,
                EditInteractionResponse::new().content(format!("Downloading… {bar} {percent}%")),
            )
            .await;
    }

    let result = match handle.await? {
        Ok(track) => orch.play(&cctx, track).await,
        Err(e) => CommandResult::rejected(format!("could not resolve that URL: {e}")),
    };
    super::respond(ctx, cmd, &result).await
}

fn text_bar(percent: u8) -> String {
    // 20-wide bar
    let total = 20u8;
    let filled = ((percent as u16 * total as u16) / 100) as u8;
    let mut s = String::with_capacity((total as usize) + 2);
    s.push('[');
    for i in 0..total {
        if i < filled {
            s.push('█');
        } else {
            s.push(' ');
        }
    }
    s.push(']');
    s
}
