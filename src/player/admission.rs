use serenity::all::{ChannelId, GuildId, UserId};

use crate::player::result::FailureCause;

/// Everything a precondition may look at: who invoked the command and where.
/// Built by the interaction glue, consumed read-only here.
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub invoker: UserId,
    pub guild_id: Option<GuildId>,
    pub channel_id: ChannelId,
    pub channel_is_text: bool,
    /// Voice channel the invoker is currently in, if any.
    pub voice_channel: Option<ChannelId>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Admission {
    Allow,
    Deny(FailureCause),
}

/// A pure, side-effect-free check run before a command reaches the session.
/// Implementations are stateless and shared across commands.
pub trait Precondition: Send + Sync {
    fn evaluate(&self, ctx: &CommandContext) -> Admission;
}

pub struct RequiresGuildContext;

impl Precondition for RequiresGuildContext {
    fn evaluate(&self, ctx: &CommandContext) -> Admission {
        if ctx.guild_id.is_some() {
            Admission::Allow
        } else {
            Admission::Deny(FailureCause::MissingGuildContext)
        }
    }
}

pub struct RequiresTextChannelContext;

impl Precondition for RequiresTextChannelContext {
    fn evaluate(&self, ctx: &CommandContext) -> Admission {
        if ctx.channel_is_text {
            Admission::Allow
        } else {
            Admission::Deny(FailureCause::WrongChannelType)
        }
    }
}

pub struct RequiresInvokerInVoiceChannel;

impl Precondition for RequiresInvokerInVoiceChannel {
    fn evaluate(&self, ctx: &CommandContext) -> Admission {
        if ctx.voice_channel.is_some() {
            Admission::Allow
        } else {
            Admission::Deny(FailureCause::NotInVoiceChannel)
        }
    }
}

/// Command categories, each with a fixed evaluation order of checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    /// Open a new session (`/join`).
    Join,
    /// Start or extend playback (`/play`).
    Playback,
    /// Control an existing session (pause, resume, skip, clear, volume, leave).
    Control,
    /// Read-only views (`/queue`).
    Query,
}

static FULL_CHECKS: &[&dyn Precondition] = &[
    &RequiresGuildContext,
    &RequiresTextChannelContext,
    &RequiresInvokerInVoiceChannel,
];

static QUERY_CHECKS: &[&dyn Precondition] =
    &[&RequiresGuildContext, &RequiresTextChannelContext];

pub fn checks_for(category: Category) -> &'static [&'static dyn Precondition] {
    match category {
        Category::Join | Category::Playback | Category::Control => FULL_CHECKS,
        Category::Query => QUERY_CHECKS,
    }
}

/// Evaluate a category's checks in declaration order; the first Deny wins.
pub fn evaluate(category: Category, ctx: &CommandContext) -> Admission {
    for check in checks_for(category) {
        if let Admission::Deny(cause) = check.evaluate(ctx) {
            return Admission::Deny(cause);
        }
    }
    Admission::Allow
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> CommandContext {
        CommandContext {
            invoker: UserId::new(1),
            guild_id: Some(GuildId::new(10)),
            channel_id: ChannelId::new(20),
            channel_is_text: true,
            voice_channel: Some(ChannelId::new(30)),
        }
    }

    #[test]
    fn fully_qualified_context_is_admitted_everywhere() {
        let ctx = ctx();
        for cat in [
            Category::Join,
            Category::Playback,
            Category::Control,
            Category::Query,
        ] {
            assert_eq!(evaluate(cat, &ctx), Admission::Allow);
        }
    }

    #[test]
    fn direct_message_is_denied_first() {
        let mut ctx = ctx();
        ctx.guild_id = None;
        ctx.voice_channel = None;
        // Guild check is declared first, so its reason wins over the voice one.
        assert_eq!(
            evaluate(Category::Playback, &ctx),
            Admission::Deny(FailureCause::MissingGuildContext)
        );
    }

    #[test]
    fn non_text_channel_is_denied() {
        let mut ctx = ctx();
        ctx.channel_is_text = false;
        assert_eq!(
            evaluate(Category::Query, &ctx),
            Admission::Deny(FailureCause::WrongChannelType)
        );
    }

    #[test]
    fn missing_voice_membership_denies_playback_but_not_queries() {
        let mut ctx = ctx();
        ctx.voice_channel = None;
        assert_eq!(
            evaluate(Category::Playback, &ctx),
            Admission::Deny(FailureCause::NotInVoiceChannel)
        );
        assert_eq!(evaluate(Category::Query, &ctx), Admission::Allow);
    }
}
