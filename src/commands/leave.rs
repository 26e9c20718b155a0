use anyhow::Result;
use serenity::all::{CommandInteraction, Context as SerenityContext, CreateCommand};

pub fn definition() -> CreateCommand {
    CreateCommand::new("leave").description("Stop playback and leave the voice channel")
}

pub async fn handle(ctx: &SerenityContext, cmd: &CommandInteraction) -> Result<()> {
    super::defer(ctx, cmd).await;
    let orch = super::orchestrator(ctx).await?;
    let cctx = super::invocation_context(ctx, cmd);
    let result = orch.leave(&cctx).await;
    super::respond(ctx, cmd, &result).await
}
