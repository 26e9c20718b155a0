use anyhow::Result;
use serenity::all::{
    CommandInteraction, Context as SerenityContext, CreateCommand, CreateEmbed,
    EditInteractionResponse,
};

use crate::player::SessionSnapshot;

pub fn definition() -> CreateCommand {
    CreateCommand::new("queue").description("Show the current track and the queue")
}

pub async fn handle(ctx: &SerenityContext, cmd: &CommandInteraction) -> Result<()> {
    super::defer(ctx, cmd).await;
    let orch = super::orchestrator(ctx).await?;
    let cctx = super::invocation_context(ctx, cmd);

    let result = orch.queue(&cctx).await;
    if result.is_failure() {
        return super::respond(ctx, cmd, &result).await;
    }
    let Some(snapshot) = result
        .data
        .and_then(|data| serde_json::from_value::<SessionSnapshot>(data).ok())
    else {
        return super::respond(ctx, cmd, &crate::player::CommandResult::ok()).await;
    };

    let mut lines = Vec::new();
    match &snapshot.current {
        Some(track) => lines.push(format!("Now playing: **{}**", track.display())),
        None => lines.push("Nothing is playing.".to_string()),
    }
    for (i, entry) in snapshot.queue.iter().enumerate() {
        lines.push(format!(
            "{}. {} (requested by <@{}>)",
            i + 1,
            entry.track.display(),
            entry.track.requested_by
        ));
    }
    if snapshot.queue.is_empty() {
        lines.push("The queue is empty.".to_string());
    }

    let embed = CreateEmbed::new()
        .title("🎶 Queue")
        .description(lines.join("\n"))
        .colour(0x00FF7F); // Spring green

    cmd.edit_response(
        &ctx.http,
        EditInteractionResponse::new().embeds(vec![embed]),
    )
    .await
    .ok();
    Ok(())
}
