use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serenity::all::{ChannelId, GuildId};
use tokio::sync::{Mutex, MutexGuard, watch};

use crate::player::queue::TrackQueue;
use crate::player::result::FailureCause;
use crate::player::track::Track;

/// Lifecycle of one guild's voice session. `Idle` is represented by absence
/// from the session table; `Disconnected` is terminal and only ever observed
/// during teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Connecting,
    Ready,
    Playing,
    Paused,
    Disconnected,
}

/// Options fixed at session creation. Reconfiguring requires a fresh session.
#[derive(Debug, Clone, Copy)]
pub struct PlayerOptions {
    pub autoplay: bool,
    /// Text channel notifications for this session are addressed to.
    pub text_channel: ChannelId,
}

/// Outcome of the voice join handshake, settled exactly once per session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectPhase {
    Pending,
    Ready,
    Failed(String),
}

/// Mutable session body. Guarded by the per-session mutex in [`Session`];
/// holding that lock is what serializes commands and node callbacks for one
/// guild.
#[derive(Debug)]
pub struct SessionInner {
    pub state: SessionState,
    pub voice_channel: ChannelId,
    pub current: Option<Track>,
    pub queue: TrackQueue,
    pub options: PlayerOptions,
    pub volume: f32,
    /// Seed for autoplay once the queue drains.
    pub last_played: Option<Track>,
    pub created_at: DateTime<Utc>,
}

pub struct Session {
    pub guild_id: GuildId,
    inner: Mutex<SessionInner>,
    connect: watch::Sender<ConnectPhase>,
}

impl Session {
    pub fn new(guild_id: GuildId, voice_channel: ChannelId, options: PlayerOptions) -> Arc<Self> {
        let (connect, _) = watch::channel(ConnectPhase::Pending);
        Arc::new(Self {
            guild_id,
            inner: Mutex::new(SessionInner {
                state: SessionState::Connecting,
                voice_channel,
                current: None,
                queue: TrackQueue::new(),
                options,
                volume: 0.5,
                last_played: None,
                created_at: Utc::now(),
            }),
            connect,
        })
    }

    pub async fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().await
    }

    /// Records the join handshake outcome. `send_replace` stores the value
    /// even when nobody subscribed yet, so a settlement that lands before the
    /// join command starts waiting is not lost.
    pub fn settle(&self, phase: ConnectPhase) {
        self.connect.send_replace(phase);
    }

    /// Waits until the join handshake settles, or the timeout elapses.
    /// Commands issued while `Connecting` queue up here and proceed (or fail)
    /// once the in-flight attempt resolves.
    pub async fn wait_connected(&self, timeout: Duration) -> Result<(), FailureCause> {
        let mut rx = self.connect.subscribe();
        let settled = tokio::time::timeout(
            timeout,
            rx.wait_for(|phase| *phase != ConnectPhase::Pending),
        )
        .await;
        match settled {
            Ok(Ok(phase)) => match &*phase {
                ConnectPhase::Ready => Ok(()),
                ConnectPhase::Failed(reason) => Err(FailureCause::ConnectFailed(reason.clone())),
                ConnectPhase::Pending => Err(FailureCause::ConnectTimeout),
            },
            // Sender dropped mid-handshake means the session is being torn down.
            Ok(Err(_)) => Err(FailureCause::NoActiveSession),
            Err(_) => Err(FailureCause::ConnectTimeout),
        }
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let inner = self.inner.lock().await;
        SessionSnapshot {
            guild_id: self.guild_id,
            state: inner.state,
            voice_channel: inner.voice_channel,
            text_channel: inner.options.text_channel,
            current: inner.current.clone(),
            queue: inner.queue.entries().cloned().collect(),
            autoplay: inner.options.autoplay,
            volume: inner.volume,
            created_at: inner.created_at,
        }
    }
}

/// Read-only view served to the HTTP surface and the `/queue` command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub guild_id: GuildId,
    pub state: SessionState,
    pub voice_channel: ChannelId,
    pub text_channel: ChannelId,
    pub current: Option<Track>,
    pub queue: Vec<crate::player::queue::QueueEntry>,
    pub autoplay: bool,
    pub volume: f32,
    pub created_at: DateTime<Utc>,
}
