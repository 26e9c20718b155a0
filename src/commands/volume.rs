use anyhow::Result;
use serenity::all::{
    CommandDataOptionValue, CommandInteraction, CommandOptionType, Context as SerenityContext,
    CreateCommand, CreateCommandOption,
};

pub fn definition() -> CreateCommand {
    let opt = CreateCommandOption::new(
        CommandOptionType::Integer,
        "percent",
        "Playback volume, 0-200",
    )
    .min_int_value(0)
    .max_int_value(200)
    .required(true);
    CreateCommand::new("volume")
        .description("Set the playback volume")
        .add_option(opt)
}

pub async fn handle(ctx: &SerenityContext, cmd: &CommandInteraction) -> Result<()> {
    super::defer(ctx, cmd).await;

    let percent = cmd
        .data
        .options
        .iter()
        .find(|o| o.name == "percent")
        .and_then(|o| match o.value {
            CommandDataOptionValue::Integer(v) => Some(v),
            _ => None,
        })
        .unwrap_or(50);

    let orch = super::orchestrator(ctx).await?;
    let cctx = super::invocation_context(ctx, cmd);
    let result = orch.set_volume(&cctx, percent as f32 / 100.0).await;
    super::respond(ctx, cmd, &result).await
}
