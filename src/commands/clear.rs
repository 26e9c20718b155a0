use anyhow::Result;
use serenity::all::{CommandInteraction, Context as SerenityContext, CreateCommand};

pub fn definition() -> CreateCommand {
    CreateCommand::new("clear").description("Empty the queue without stopping the current track")
}

pub async fn handle(ctx: &SerenityContext, cmd: &CommandInteraction) -> Result<()> {
    super::defer(ctx, cmd).await;
    let orch = super::orchestrator(ctx).await?;
    let cctx = super::invocation_context(ctx, cmd);
    let result = orch.clear(&cctx).await;
    super::respond(ctx, cmd, &result).await
}
