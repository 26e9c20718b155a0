use anyhow::Result;
use serenity::all::{
    CommandDataOptionValue, CommandInteraction, CommandOptionType, Context as SerenityContext,
    CreateCommand, CreateCommandOption,
};

use crate::player::PlayerOptions;

pub fn definition() -> CreateCommand {
    let opt = CreateCommandOption::new(
        CommandOptionType::Boolean,
        "autoplay",
        "Keep playing related tracks when the queue runs out",
    )
    .required(false);
    CreateCommand::new("join")
        .description("Join your voice channel and open a player session")
        .add_option(opt)
}

pub async fn handle(ctx: &SerenityContext, cmd: &CommandInteraction) -> Result<()> {
    super::defer(ctx, cmd).await;

    let autoplay = cmd
        .data
        .options
        .iter()
        .find(|o| o.name == "autoplay")
        .and_then(|o| match o.value {
            CommandDataOptionValue::Boolean(b) => Some(b),
            _ => None,
        })
        .unwrap_or(false);

    let orch = super::orchestrator(ctx).await?;
    let cctx = super::invocation_context(ctx, cmd);
    let options = PlayerOptions {
        autoplay,
        text_channel: cmd.channel_id,
    };
    let result = orch.join(&cctx, options).await;
    super::respond(ctx, cmd, &result).await
}
