use anyhow::Result;
use serenity::all::{ChannelId, GuildId};
use serenity::async_trait;

use crate::player::track::Track;

/// Why the current track stopped, as reported by the audio node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    Finished,
    Errored(String),
}

/// Asynchronous callbacks from the audio node. The node is the source of
/// truth for whether audio is actually flowing; the orchestrator only reacts.
#[derive(Debug, Clone)]
pub enum NodeEvent {
    Connected,
    ConnectFailed { reason: String },
    TrackStarted,
    TrackEnded { reason: EndReason },
    /// Voice connection dropped outside our control (kicked, channel deleted).
    ConnectionLost,
    /// Unrecoverable driver fault; the session cannot continue.
    Fatal { reason: String },
}

/// High-level directives to the audio subsystem. Implementations report
/// lifecycle changes back through the [`NodeEvent`] channel they were built
/// with; directive errors are infrastructure faults, not business failures.
#[async_trait]
pub trait AudioNode: Send + Sync {
    async fn connect(&self, guild: GuildId, channel: ChannelId) -> Result<()>;
    async fn play(&self, guild: GuildId, track: &Track) -> Result<()>;
    async fn pause(&self, guild: GuildId) -> Result<()>;
    async fn resume(&self, guild: GuildId) -> Result<()>;
    async fn stop(&self, guild: GuildId) -> Result<()>;
    async fn set_volume(&self, guild: GuildId, volume: f32) -> Result<()>;
    async fn disconnect(&self, guild: GuildId) -> Result<()>;
}
