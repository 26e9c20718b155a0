use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Result, anyhow};
use serenity::all::{ChannelId, GuildId};
use serenity::async_trait;
use songbird::{
    CoreEvent, Event as VoiceEvent, EventContext, EventHandler as VoiceEventHandler, Songbird,
    TrackEvent, driver::Bitrate, input::File as FileInput, tracks::TrackHandle,
};
use tokio::sync::{Mutex, mpsc};
use tracing::{info, warn};

use crate::env;
use crate::player::{AudioNode, EndReason, NodeEvent, Track};

const MAX_JOIN_ATTEMPTS: u32 = 3;

struct CurrentTrack {
    /// Play token, bumped on every start. End events carry the token they
    /// were registered with; a mismatch means the end is stale (skip or
    /// disconnect already replaced the track) and must not be forwarded.
    token: u64,
    handle: TrackHandle,
}

/// Audio node backed by songbird. Directives act on the guild's `Call`;
/// lifecycle changes flow back as [`NodeEvent`]s over the channel handed out
/// by [`SongbirdNode::new`].
pub struct SongbirdNode {
    manager: Arc<Songbird>,
    events: mpsc::UnboundedSender<(GuildId, NodeEvent)>,
    current: Arc<Mutex<HashMap<GuildId, CurrentTrack>>>,
    volumes: Mutex<HashMap<GuildId, f32>>,
    next_token: AtomicU64,
}

impl SongbirdNode {
    pub fn new(
        manager: Arc<Songbird>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<(GuildId, NodeEvent)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                manager,
                events: tx,
                current: Arc::new(Mutex::new(HashMap::new())),
                volumes: Mutex::new(HashMap::new()),
                next_token: AtomicU64::new(0),
            }),
            rx,
        )
    }

    fn emit(&self, guild: GuildId, event: NodeEvent) {
        let _ = self.events.send((guild, event));
    }
}

#[async_trait]
impl AudioNode for SongbirdNode {
    /// Joins with bounded exponential backoff; transient voice gateway
    /// hiccups are common enough to warrant a few retries.
    async fn connect(&self, guild: GuildId, channel: ChannelId) -> Result<()> {
        let mut attempts = 0;
        loop {
            info!(
                "joining voice channel {} in guild {} (attempt {}/{})",
                channel,
                guild,
                attempts + 1,
                MAX_JOIN_ATTEMPTS
            );
            match self.manager.join(guild, channel).await {
                Ok(call_lock) => {
                    {
                        let mut call = call_lock.lock().await;
                        call.set_bitrate(Bitrate::BitsPerSecond(env::bitrate() as i32));
                        call.add_global_event(
                            VoiceEvent::Core(CoreEvent::DriverDisconnect),
                            DisconnectNotifier {
                                guild,
                                events: self.events.clone(),
                            },
                        );
                    }
                    self.emit(guild, NodeEvent::Connected);
                    return Ok(());
                }
                Err(e) => {
                    attempts += 1;
                    if attempts >= MAX_JOIN_ATTEMPTS {
                        self.emit(
                            guild,
                            NodeEvent::ConnectFailed {
                                reason: e.to_string(),
                            },
                        );
                        return Err(anyhow!(
                            "failed to join voice channel after {} attempts: {}",
                            MAX_JOIN_ATTEMPTS,
                            e
                        ));
                    }
                    let delay_ms = std::cmp::min(5000, 1000 * 2_u64.pow(attempts - 1));
                    warn!(
                        "voice join attempt {} failed: {}. Retrying in {}ms",
                        attempts, e, delay_ms
                    );
                    tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
                }
            }
        }
    }

    async fn play(&self, guild: GuildId, track: &Track) -> Result<()> {
        let call_lock = self
            .manager
            .get(guild)
            .ok_or_else(|| anyhow!("no voice call for guild {guild}"))?;
        let source = FileInput::new(PathBuf::from(&track.media));

        let mut call = call_lock.lock().await;
        let handle = call.play_input(source.into());
        drop(call);

        let volume = self
            .volumes
            .lock()
            .await
            .get(&guild)
            .copied()
            .unwrap_or(0.5);
        let _ = handle.set_volume(volume);

        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        handle
            .add_event(
                VoiceEvent::Track(TrackEvent::End),
                TrackEndNotifier {
                    guild,
                    token,
                    current: self.current.clone(),
                    events: self.events.clone(),
                },
            )
            .map_err(|e| anyhow!("failed to attach end handler: {e}"))?;

        self.current
            .lock()
            .await
            .insert(guild, CurrentTrack { token, handle });
        self.emit(guild, NodeEvent::TrackStarted);
        Ok(())
    }

    async fn pause(&self, guild: GuildId) -> Result<()> {
        let current = self.current.lock().await;
        let entry = current
            .get(&guild)
            .ok_or_else(|| anyhow!("no current track for guild {guild}"))?;
        entry.handle.pause().map_err(|e| anyhow!("pause failed: {e}"))
    }

    async fn resume(&self, guild: GuildId) -> Result<()> {
        let current = self.current.lock().await;
        let entry = current
            .get(&guild)
            .ok_or_else(|| anyhow!("no current track for guild {guild}"))?;
        entry.handle.play().map_err(|e| anyhow!("resume failed: {e}"))
    }

    async fn stop(&self, guild: GuildId) -> Result<()> {
        // Vacate the slot first so the resulting end event is stale by the
        // time it fires.
        if let Some(entry) = self.current.lock().await.remove(&guild) {
            let _ = entry.handle.stop();
        }
        Ok(())
    }

    async fn set_volume(&self, guild: GuildId, volume: f32) -> Result<()> {
        self.volumes.lock().await.insert(guild, volume);
        if let Some(entry) = self.current.lock().await.get(&guild) {
            entry
                .handle
                .set_volume(volume)
                .map_err(|e| anyhow!("set_volume failed: {e}"))?;
        }
        Ok(())
    }

    async fn disconnect(&self, guild: GuildId) -> Result<()> {
        if let Some(entry) = self.current.lock().await.remove(&guild) {
            let _ = entry.handle.stop();
        }
        self.volumes.lock().await.remove(&guild);
        self.manager
            .remove(guild)
            .await
            .map_err(|e| anyhow!("leaving voice channel failed: {e}"))
    }
}

/// Forwards a track end only if the ended play is still this guild's current
/// one.
struct TrackEndNotifier {
    guild: GuildId,
    token: u64,
    current: Arc<Mutex<HashMap<GuildId, CurrentTrack>>>,
    events: mpsc::UnboundedSender<(GuildId, NodeEvent)>,
}

impl TrackEndNotifier {
    /// Vacates the slot and forwards the end if this play is still current.
    /// A token mismatch means skip or disconnect already replaced the track;
    /// the map stays untouched and nothing is forwarded.
    async fn on_track_end(&self) {
        {
            let mut current = self.current.lock().await;
            match current.get(&self.guild) {
                Some(entry) if entry.token == self.token => {
                    current.remove(&self.guild);
                }
                _ => return,
            }
        }
        let _ = self.events.send((
            self.guild,
            NodeEvent::TrackEnded {
                reason: EndReason::Finished,
            },
        ));
    }
}

#[async_trait]
impl VoiceEventHandler for TrackEndNotifier {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<VoiceEvent> {
        if let EventContext::Track(_) = ctx {
            self.on_track_end().await;
        }
        None
    }
}

struct DisconnectNotifier {
    guild: GuildId,
    events: mpsc::UnboundedSender<(GuildId, NodeEvent)>,
}

#[async_trait]
impl VoiceEventHandler for DisconnectNotifier {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<VoiceEvent> {
        if let EventContext::DriverDisconnect(_) = ctx {
            let _ = self.events.send((self.guild, NodeEvent::ConnectionLost));
        }
        None
    }
}
