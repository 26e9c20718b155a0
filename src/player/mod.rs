pub mod admission;
pub mod node;
pub mod notify;
pub mod queue;
pub mod result;
pub mod session;
pub mod track;

pub use admission::{Category, CommandContext};
pub use node::{AudioNode, EndReason, NodeEvent};
pub use notify::{Notification, NotificationBus, NotificationKind};
pub use queue::{NoRecommendations, Recommender};
pub use result::{CommandResult, FailureCause};
pub use session::{PlayerOptions, SessionSnapshot, SessionState};
pub use track::Track;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serenity::all::{ChannelId, GuildId};
use serenity::prelude::TypeMapKey;
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, warn};

use crate::metrics::METRICS;
use admission::Admission;
use session::{ConnectPhase, Session, SessionInner};

/// Single entry point for everything that may mutate a voice session. Runs
/// admission control, applies the state transition under the per-guild lock,
/// and reports through [`CommandResult`] while the bus carries notifications.
pub struct Orchestrator {
    sessions: RwLock<HashMap<GuildId, Arc<Session>>>,
    node: Arc<dyn AudioNode>,
    recommender: Arc<dyn Recommender>,
    bus: NotificationBus,
    connect_timeout: Duration,
}

/// Shares the orchestrator through the serenity data map.
pub struct OrchestratorKey;

impl TypeMapKey for OrchestratorKey {
    type Value = Arc<Orchestrator>;
}

impl Orchestrator {
    pub fn new(
        node: Arc<dyn AudioNode>,
        recommender: Arc<dyn Recommender>,
        connect_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
            node,
            recommender,
            bus: NotificationBus::default(),
            connect_timeout,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.bus.subscribe()
    }

    /// Runs a category's preconditions. `Some` carries the ready-made Failure
    /// for the first Deny; the session is untouched in that case. Public so
    /// expensive glue (track resolution) can check before doing work.
    pub fn admission_denied(
        &self,
        category: Category,
        ctx: &CommandContext,
    ) -> Option<CommandResult> {
        match admission::evaluate(category, ctx) {
            Admission::Allow => None,
            Admission::Deny(cause) => {
                METRICS.inc_denied();
                Some(CommandResult::failure(cause))
            }
        }
    }

    pub async fn has_session(&self, guild: GuildId) -> bool {
        self.sessions.read().await.contains_key(&guild)
    }

    pub async fn snapshot(&self, guild: GuildId) -> Option<SessionSnapshot> {
        let session = self.sessions.read().await.get(&guild).cloned()?;
        Some(session.snapshot().await)
    }

    pub async fn snapshots(&self) -> Vec<SessionSnapshot> {
        let sessions: Vec<_> = self.sessions.read().await.values().cloned().collect();
        let mut out = Vec::with_capacity(sessions.len());
        for session in sessions {
            out.push(session.snapshot().await);
        }
        out
    }

    /// Opens a session and joins the invoker's voice channel. The command
    /// completes only once the audio node confirms (or refuses) the
    /// connection, bounded by the configured timeout.
    pub async fn join(&self, ctx: &CommandContext, options: PlayerOptions) -> CommandResult {
        if let Some(denied) = self.admission_denied(Category::Join, ctx) {
            return denied;
        }
        let Some(guild) = ctx.guild_id else {
            return CommandResult::failure(FailureCause::MissingGuildContext);
        };
        let Some(voice) = ctx.voice_channel else {
            return CommandResult::failure(FailureCause::NotInVoiceChannel);
        };

        // The table entry exists from this point, so a concurrent second join
        // observes it and the one-session-per-guild invariant holds. The
        // session gauge tracks table membership; every removal decrements it.
        let session = {
            let mut sessions = self.sessions.write().await;
            if sessions.contains_key(&guild) {
                return CommandResult::failure(FailureCause::AlreadyConnected);
            }
            let session = Session::new(guild, voice, options);
            sessions.insert(guild, session.clone());
            METRICS.inc_sessions();
            session
        };

        if let Err(e) = self.node.connect(guild, voice).await {
            session.settle(ConnectPhase::Failed(e.to_string()));
            return self
                .abort_connect(
                    guild,
                    options.text_channel,
                    FailureCause::ConnectFailed(e.to_string()),
                )
                .await;
        }

        match session.wait_connected(self.connect_timeout).await {
            Ok(()) => {
                self.bus.publish(
                    guild,
                    options.text_channel,
                    NotificationKind::SessionStarted,
                    Some(format!("joined voice channel {voice}")),
                );
                CommandResult::ok_with("Joined your voice channel")
            }
            Err(cause) => self.abort_connect(guild, options.text_channel, cause).await,
        }
    }

    /// Starts the track if the session is idle, otherwise appends it to the
    /// queue. The track arrives fully resolved from the caller.
    pub async fn play(&self, ctx: &CommandContext, track: Track) -> CommandResult {
        if let Some(denied) = self.admission_denied(Category::Playback, ctx) {
            return denied;
        }
        let Some(guild) = ctx.guild_id else {
            return CommandResult::failure(FailureCause::MissingGuildContext);
        };
        let session = match self.live_session(guild).await {
            Ok(session) => session,
            Err(cause) => return CommandResult::failure(cause),
        };

        let mut inner = session.lock().await;
        match inner.state {
            SessionState::Ready => {
                if let Err(e) = self.start_track(guild, &mut inner, track.clone()).await {
                    drop(inner);
                    return self.fail_session(guild, e.to_string()).await;
                }
                CommandResult::ok_with(format!("Now playing {}", track.display()))
                    .with_track(track)
            }
            SessionState::Playing | SessionState::Paused => {
                let seq = inner.queue.enqueue(track.clone());
                let position = inner.queue.len();
                METRICS.inc_queued();
                CommandResult::ok_with(format!(
                    "Queued {} at position {position}",
                    track.display()
                ))
                .with_track(track)
                .with_data(serde_json::json!({ "position": position, "seq": seq }))
            }
            SessionState::Connecting | SessionState::Disconnected => {
                CommandResult::failure(FailureCause::NoActiveSession)
            }
        }
    }

    pub async fn pause(&self, ctx: &CommandContext) -> CommandResult {
        if let Some(denied) = self.admission_denied(Category::Control, ctx) {
            return denied;
        }
        let Some(guild) = ctx.guild_id else {
            return CommandResult::failure(FailureCause::MissingGuildContext);
        };
        let session = match self.live_session(guild).await {
            Ok(session) => session,
            Err(cause) => return CommandResult::failure(cause),
        };

        let mut inner = session.lock().await;
        if inner.state != SessionState::Playing {
            return CommandResult::failure(FailureCause::InvalidTransition(
                "pause only applies while something is playing".into(),
            ));
        }
        if let Err(e) = self.node.pause(guild).await {
            drop(inner);
            return self.fail_session(guild, e.to_string()).await;
        }
        inner.state = SessionState::Paused;
        let message = inner.current.as_ref().map(Track::display);
        self.bus
            .publish(guild, inner.options.text_channel, NotificationKind::Paused, message);
        CommandResult::ok_with("Paused")
    }

    pub async fn resume(&self, ctx: &CommandContext) -> CommandResult {
        if let Some(denied) = self.admission_denied(Category::Control, ctx) {
            return denied;
        }
        let Some(guild) = ctx.guild_id else {
            return CommandResult::failure(FailureCause::MissingGuildContext);
        };
        let session = match self.live_session(guild).await {
            Ok(session) => session,
            Err(cause) => return CommandResult::failure(cause),
        };

        let mut inner = session.lock().await;
        if inner.state != SessionState::Paused {
            return CommandResult::failure(FailureCause::InvalidTransition(
                "resume only applies while paused".into(),
            ));
        }
        if let Err(e) = self.node.resume(guild).await {
            drop(inner);
            return self.fail_session(guild, e.to_string()).await;
        }
        inner.state = SessionState::Playing;
        let message = inner.current.as_ref().map(Track::display);
        self.bus
            .publish(guild, inner.options.text_channel, NotificationKind::Resumed, message);
        CommandResult::ok_with("Resumed")
    }

    /// Forces the current track to end now, then advances like a natural end.
    pub async fn skip(&self, ctx: &CommandContext) -> CommandResult {
        if let Some(denied) = self.admission_denied(Category::Control, ctx) {
            return denied;
        }
        let Some(guild) = ctx.guild_id else {
            return CommandResult::failure(FailureCause::MissingGuildContext);
        };
        let session = match self.live_session(guild).await {
            Ok(session) => session,
            Err(cause) => return CommandResult::failure(cause),
        };

        let mut inner = session.lock().await;
        let Some(ended) = inner.current.take() else {
            return CommandResult::failure(FailureCause::NothingPlaying);
        };
        inner.last_played = Some(ended.clone());
        if let Err(e) = self.node.stop(guild).await {
            drop(inner);
            return self.fail_session(guild, e.to_string()).await;
        }
        self.bus.publish(
            guild,
            inner.options.text_channel,
            NotificationKind::TrackEnded,
            Some(ended.display()),
        );
        if let Err(e) = self.advance(guild, &mut inner).await {
            drop(inner);
            return self.fail_session(guild, e.to_string()).await;
        }
        let reply = match &inner.current {
            Some(next) => format!("Skipped {}. Now playing {}", ended.display(), next.display()),
            None => format!("Skipped {}. The queue is empty", ended.display()),
        };
        CommandResult::ok_with(reply).with_track(ended)
    }

    /// Empties the backlog without touching the currently playing track.
    pub async fn clear(&self, ctx: &CommandContext) -> CommandResult {
        if let Some(denied) = self.admission_denied(Category::Control, ctx) {
            return denied;
        }
        let Some(guild) = ctx.guild_id else {
            return CommandResult::failure(FailureCause::MissingGuildContext);
        };
        let session = match self.live_session(guild).await {
            Ok(session) => session,
            Err(cause) => return CommandResult::failure(cause),
        };

        let mut inner = session.lock().await;
        let dropped = inner.queue.clear();
        CommandResult::ok_with(format!("Cleared {dropped} queued track(s)"))
    }

    pub async fn set_volume(&self, ctx: &CommandContext, volume: f32) -> CommandResult {
        if let Some(denied) = self.admission_denied(Category::Control, ctx) {
            return denied;
        }
        let Some(guild) = ctx.guild_id else {
            return CommandResult::failure(FailureCause::MissingGuildContext);
        };
        let session = match self.live_session(guild).await {
            Ok(session) => session,
            Err(cause) => return CommandResult::failure(cause),
        };

        let volume = volume.clamp(0.0, 2.0);
        let mut inner = session.lock().await;
        if let Err(e) = self.node.set_volume(guild, volume).await {
            drop(inner);
            return self.fail_session(guild, e.to_string()).await;
        }
        inner.volume = volume;
        CommandResult::ok_with(format!("Volume set to {:.0}%", volume * 100.0))
    }

    /// Read-only queue view; the snapshot rides in the result's data payload.
    pub async fn queue(&self, ctx: &CommandContext) -> CommandResult {
        if let Some(denied) = self.admission_denied(Category::Query, ctx) {
            return denied;
        }
        let Some(guild) = ctx.guild_id else {
            return CommandResult::failure(FailureCause::MissingGuildContext);
        };
        let Some(session) = self.sessions.read().await.get(&guild).cloned() else {
            return CommandResult::failure(FailureCause::NoActiveSession);
        };
        let snapshot = session.snapshot().await;
        match serde_json::to_value(&snapshot) {
            Ok(data) => CommandResult::ok().with_data(data),
            Err(e) => CommandResult::failure(FailureCause::Fatal(e.to_string())),
        }
    }

    /// Tears the session down. Removal from the table happens first, so any
    /// operation queued behind this one fails with "no active session".
    pub async fn leave(&self, ctx: &CommandContext) -> CommandResult {
        if let Some(denied) = self.admission_denied(Category::Control, ctx) {
            return denied;
        }
        let Some(guild) = ctx.guild_id else {
            return CommandResult::failure(FailureCause::MissingGuildContext);
        };
        if !self.has_session(guild).await {
            return CommandResult::failure(FailureCause::NoActiveSession);
        }
        self.teardown(guild, None).await;
        if let Err(e) = self.node.disconnect(guild).await {
            warn!(guild = %guild, error = %e, "disconnect directive failed");
        }
        CommandResult::ok_with("Left the voice channel")
    }

    /// Entry point for audio-node callbacks. Events for guilds without a
    /// session (stale ends after teardown, disconnect echoes) are dropped.
    pub async fn handle_node_event(&self, guild: GuildId, event: NodeEvent) {
        let Some(session) = self.sessions.read().await.get(&guild).cloned() else {
            debug!(guild = %guild, ?event, "node event for guild without a session");
            return;
        };
        match event {
            NodeEvent::Connected => {
                let mut inner = session.lock().await;
                if inner.state == SessionState::Connecting {
                    inner.state = SessionState::Ready;
                }
                drop(inner);
                session.settle(ConnectPhase::Ready);
            }
            NodeEvent::ConnectFailed { reason } => {
                // The join command owns cleanup; it is waiting on this settle.
                session.settle(ConnectPhase::Failed(reason));
            }
            NodeEvent::TrackStarted => {
                debug!(guild = %guild, "audio node confirmed track start");
            }
            NodeEvent::TrackEnded { reason } => {
                let mut inner = session.lock().await;
                if !matches!(inner.state, SessionState::Playing | SessionState::Paused) {
                    return;
                }
                let ended = inner.current.take();
                if let Some(track) = &ended {
                    inner.last_played = Some(track.clone());
                }
                let message = match (&ended, &reason) {
                    (Some(track), EndReason::Errored(e)) => {
                        Some(format!("{} ({e})", track.display()))
                    }
                    (Some(track), _) => Some(track.display()),
                    (None, _) => None,
                };
                self.bus.publish(
                    guild,
                    inner.options.text_channel,
                    NotificationKind::TrackEnded,
                    message,
                );
                if let Err(e) = self.advance(guild, &mut inner).await {
                    drop(inner);
                    let _ = self.fail_session(guild, e.to_string()).await;
                }
            }
            NodeEvent::ConnectionLost => {
                self.teardown(guild, Some("voice connection lost".into()))
                    .await;
            }
            NodeEvent::Fatal { reason } => {
                let _ = self.fail_session(guild, reason).await;
            }
        }
    }

    async fn live_session(&self, guild: GuildId) -> Result<Arc<Session>, FailureCause> {
        let session = self
            .sessions
            .read()
            .await
            .get(&guild)
            .cloned()
            .ok_or(FailureCause::NoActiveSession)?;
        // Queue behind an in-flight connect; fast path once settled.
        session.wait_connected(self.connect_timeout).await?;
        Ok(session)
    }

    async fn start_track(
        &self,
        guild: GuildId,
        inner: &mut SessionInner,
        track: Track,
    ) -> Result<()> {
        self.node.play(guild, &track).await?;
        inner.current = Some(track.clone());
        inner.state = SessionState::Playing;
        METRICS.inc_played();
        self.bus.publish(
            guild,
            inner.options.text_channel,
            NotificationKind::TrackStarted,
            Some(track.display()),
        );
        Ok(())
    }

    /// What plays next: queue head, else one autoplay suggestion, else Ready
    /// with a QueueEmpty notification. Caller holds the session lock.
    async fn advance(&self, guild: GuildId, inner: &mut SessionInner) -> Result<()> {
        if let Some(entry) = inner.queue.pop() {
            return self.start_track(guild, inner, entry.track).await;
        }
        if inner.options.autoplay
            && let Some(seed) = inner.last_played.clone()
        {
            match self.recommender.related(&seed).await {
                Ok(Some(found)) => {
                    inner.queue.enqueue(found);
                    if let Some(entry) = inner.queue.pop() {
                        return self.start_track(guild, inner, entry.track).await;
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(guild = %guild, error = %e, "autoplay lookup failed"),
            }
        }
        inner.current = None;
        inner.state = SessionState::Ready;
        self.bus
            .publish(guild, inner.options.text_channel, NotificationKind::QueueEmpty, None);
        Ok(())
    }

    async fn abort_connect(
        &self,
        guild: GuildId,
        text: ChannelId,
        cause: FailureCause,
    ) -> CommandResult {
        if self.sessions.write().await.remove(&guild).is_some() {
            METRICS.dec_sessions();
            let _ = self.node.disconnect(guild).await;
            self.bus.publish(
                guild,
                text,
                NotificationKind::Error {
                    cause: cause.to_string(),
                },
                None,
            );
        }
        CommandResult::failure(cause)
    }

    async fn teardown(&self, guild: GuildId, error: Option<String>) {
        let Some(session) = self.sessions.write().await.remove(&guild) else {
            return;
        };
        METRICS.dec_sessions();
        let text = {
            let mut inner = session.lock().await;
            inner.state = SessionState::Disconnected;
            inner.current = None;
            inner.queue.clear();
            inner.options.text_channel
        };
        // Unblock anything still waiting on the join handshake.
        session.settle(ConnectPhase::Failed("session ended".into()));
        if let Some(cause) = error {
            self.bus
                .publish(guild, text, NotificationKind::Error { cause }, None);
        }
        self.bus
            .publish(guild, text, NotificationKind::SessionEnded, None);
    }

    async fn fail_session(&self, guild: GuildId, reason: String) -> CommandResult {
        self.teardown(guild, Some(reason.clone())).await;
        let _ = self.node.disconnect(guild).await;
        CommandResult::failure(FailureCause::Fatal(reason))
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use serenity::all::{ChannelId, UserId};
    use serenity::async_trait;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::mpsc;

    #[derive(Debug, Clone, PartialEq)]
    pub enum Directive {
        Connect(GuildId, ChannelId),
        Play(GuildId, String),
        Pause(GuildId),
        Resume(GuildId),
        Stop(GuildId),
        SetVolume(GuildId, u32),
        Disconnect(GuildId),
    }

    /// Records directives and scripts callbacks over the same mpsc pump the
    /// production node uses.
    pub struct MockNode {
        directives: StdMutex<Vec<Directive>>,
        events: mpsc::UnboundedSender<(GuildId, NodeEvent)>,
        pub refuse_connect: AtomicBool,
        pub silent_connect: AtomicBool,
        pub fail_play: AtomicBool,
    }

    impl MockNode {
        pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<(GuildId, NodeEvent)>) {
            let (tx, rx) = mpsc::unbounded_channel();
            (
                Arc::new(Self {
                    directives: StdMutex::new(Vec::new()),
                    events: tx,
                    refuse_connect: AtomicBool::new(false),
                    silent_connect: AtomicBool::new(false),
                    fail_play: AtomicBool::new(false),
                }),
                rx,
            )
        }

        fn record(&self, directive: Directive) {
            self.directives.lock().unwrap().push(directive);
        }

        pub fn directives(&self) -> Vec<Directive> {
            self.directives.lock().unwrap().clone()
        }

        pub fn emit(&self, guild: GuildId, event: NodeEvent) {
            let _ = self.events.send((guild, event));
        }
    }

    #[async_trait]
    impl AudioNode for MockNode {
        async fn connect(&self, guild: GuildId, channel: ChannelId) -> Result<()> {
            self.record(Directive::Connect(guild, channel));
            if self.refuse_connect.load(Ordering::SeqCst) {
                self.emit(
                    guild,
                    NodeEvent::ConnectFailed {
                        reason: "rejected by voice server".into(),
                    },
                );
            } else if !self.silent_connect.load(Ordering::SeqCst) {
                self.emit(guild, NodeEvent::Connected);
            }
            Ok(())
        }

        async fn play(&self, guild: GuildId, track: &Track) -> Result<()> {
            if self.fail_play.load(Ordering::SeqCst) {
                anyhow::bail!("driver gone");
            }
            self.record(Directive::Play(guild, track.title.clone()));
            Ok(())
        }

        async fn pause(&self, guild: GuildId) -> Result<()> {
            self.record(Directive::Pause(guild));
            Ok(())
        }

        async fn resume(&self, guild: GuildId) -> Result<()> {
            self.record(Directive::Resume(guild));
            Ok(())
        }

        async fn stop(&self, guild: GuildId) -> Result<()> {
            self.record(Directive::Stop(guild));
            Ok(())
        }

        async fn set_volume(&self, guild: GuildId, volume: f32) -> Result<()> {
            self.record(Directive::SetVolume(guild, (volume * 100.0) as u32));
            Ok(())
        }

        async fn disconnect(&self, guild: GuildId) -> Result<()> {
            self.record(Directive::Disconnect(guild));
            Ok(())
        }
    }

    /// Hands out at most one scripted suggestion.
    pub struct StaticRecommender {
        next: StdMutex<Option<Track>>,
    }

    impl StaticRecommender {
        pub fn with(track: Option<Track>) -> Arc<Self> {
            Arc::new(Self {
                next: StdMutex::new(track),
            })
        }
    }

    #[async_trait]
    impl Recommender for StaticRecommender {
        async fn related(&self, _seed: &Track) -> Result<Option<Track>> {
            Ok(self.next.lock().unwrap().take())
        }
    }

    pub fn track(title: &str) -> Track {
        Track {
            source_id: title.to_lowercase(),
            url: format!("https://example.com/watch?v={title}"),
            media: format!("/tmp/{title}.mp3"),
            title: title.into(),
            duration_secs: Some(120),
            requested_by: UserId::new(500),
        }
    }

    pub fn voice_ctx(guild: u64, user: u64) -> CommandContext {
        CommandContext {
            invoker: UserId::new(user),
            guild_id: Some(GuildId::new(guild)),
            channel_id: ChannelId::new(900),
            channel_is_text: true,
            voice_channel: Some(ChannelId::new(901)),
        }
    }

    pub fn no_voice_ctx(guild: u64, user: u64) -> CommandContext {
        CommandContext {
            voice_channel: None,
            ..voice_ctx(guild, user)
        }
    }

    /// Orchestrator wired to a mock node through the production event pump.
    pub fn rig(
        recommender: Arc<dyn Recommender>,
        connect_timeout: Duration,
    ) -> (Arc<Orchestrator>, Arc<MockNode>) {
        let (node, mut rx) = MockNode::new();
        let orch = Orchestrator::new(node.clone(), recommender, connect_timeout);
        let pump = orch.clone();
        tokio::spawn(async move {
            while let Some((guild, event)) = rx.recv().await {
                pump.handle_node_event(guild, event).await;
            }
        });
        (orch, node)
    }

    pub fn default_rig() -> (Arc<Orchestrator>, Arc<MockNode>) {
        rig(Arc::new(NoRecommendations), Duration::from_millis(500))
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::*;
    use super::*;
    use std::sync::atomic::Ordering;
    use tokio::sync::broadcast::error::TryRecvError;

    const GUILD: u64 = 77;

    fn options() -> PlayerOptions {
        PlayerOptions {
            autoplay: false,
            text_channel: serenity::all::ChannelId::new(900),
        }
    }

    fn autoplay_options() -> PlayerOptions {
        PlayerOptions {
            autoplay: true,
            ..options()
        }
    }

    async fn joined(
        orch: &Arc<Orchestrator>,
        opts: PlayerOptions,
    ) -> broadcast::Receiver<Notification> {
        let mut rx = orch.subscribe();
        let res = orch.join(&voice_ctx(GUILD, 1), opts).await;
        assert!(res.success, "join failed: {res}");
        // Drain the SessionStarted published by the successful join.
        assert_eq!(
            rx.recv().await.unwrap().kind,
            NotificationKind::SessionStarted
        );
        rx
    }

    fn kinds(rx: &mut broadcast::Receiver<Notification>) -> Vec<NotificationKind> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event.kind);
        }
        out
    }

    #[tokio::test]
    async fn join_opens_session_and_publishes_session_started() {
        let (orch, node) = default_rig();
        let mut rx = orch.subscribe();

        let res = orch.join(&voice_ctx(GUILD, 1), options()).await;
        assert!(res.success);
        assert_eq!(
            rx.recv().await.unwrap().kind,
            NotificationKind::SessionStarted
        );

        let snap = orch.snapshot(GuildId::new(GUILD)).await.unwrap();
        assert_eq!(snap.state, SessionState::Ready);
        assert!(matches!(node.directives()[0], Directive::Connect(..)));
    }

    #[tokio::test]
    async fn at_most_one_session_per_guild() {
        let (orch, _node) = default_rig();
        let _rx = joined(&orch, options()).await;

        let res = orch.join(&voice_ctx(GUILD, 2), options()).await;
        assert_eq!(res.cause, Some(FailureCause::AlreadyConnected));
        assert_eq!(orch.snapshots().await.len(), 1);
    }

    #[tokio::test]
    async fn refused_connect_discards_the_session_and_reports() {
        let (orch, node) = default_rig();
        node.refuse_connect.store(true, Ordering::SeqCst);
        let mut rx = orch.subscribe();

        let res = orch.join(&voice_ctx(GUILD, 1), options()).await;
        assert!(res.is_failure());
        assert!(matches!(res.cause, Some(FailureCause::ConnectFailed(_))));
        assert!(!orch.has_session(GuildId::new(GUILD)).await);
        assert!(matches!(
            rx.recv().await.unwrap().kind,
            NotificationKind::Error { .. }
        ));
    }

    #[tokio::test]
    async fn stuck_connect_times_out_and_aborts() {
        let (orch, node) = rig(Arc::new(NoRecommendations), Duration::from_millis(30));
        node.silent_connect.store(true, Ordering::SeqCst);

        let res = orch.join(&voice_ctx(GUILD, 1), options()).await;
        assert_eq!(res.cause, Some(FailureCause::ConnectTimeout));
        assert!(!orch.has_session(GuildId::new(GUILD)).await);
    }

    #[tokio::test]
    async fn play_without_session_fails() {
        let (orch, _node) = default_rig();
        let res = orch.play(&voice_ctx(GUILD, 1), track("A")).await;
        assert_eq!(res.cause, Some(FailureCause::NoActiveSession));
    }

    #[tokio::test]
    async fn play_starts_immediately_when_ready() {
        let (orch, node) = default_rig();
        let mut rx = joined(&orch, options()).await;

        let res = orch.play(&voice_ctx(GUILD, 1), track("A")).await;
        assert!(res.success);
        assert_eq!(res.track.as_ref().map(|t| t.title.as_str()), Some("A"));

        let snap = orch.snapshot(GuildId::new(GUILD)).await.unwrap();
        assert_eq!(snap.state, SessionState::Playing);
        assert_eq!(snap.current.map(|t| t.title), Some("A".to_string()));
        assert_eq!(kinds(&mut rx), vec![NotificationKind::TrackStarted]);
        assert!(
            node.directives()
                .contains(&Directive::Play(GuildId::new(GUILD), "A".into()))
        );
    }

    #[tokio::test]
    async fn play_while_playing_queues_behind() {
        let (orch, _node) = default_rig();
        let _rx = joined(&orch, options()).await;
        orch.play(&voice_ctx(GUILD, 1), track("A")).await;

        let res = orch.play(&voice_ctx(GUILD, 2), track("B")).await;
        assert!(res.success);
        assert_eq!(res.data.unwrap()["position"], 1);

        let snap = orch.snapshot(GuildId::new(GUILD)).await.unwrap();
        assert_eq!(snap.queue.len(), 1);
        assert_eq!(snap.current.map(|t| t.title), Some("A".to_string()));
    }

    #[tokio::test]
    async fn denied_command_never_mutates_or_notifies() {
        let (orch, node) = default_rig();
        let _rx = joined(&orch, options()).await;
        orch.play(&voice_ctx(GUILD, 1), track("A")).await;
        let before = node.directives().len();
        let mut rx = orch.subscribe();

        let res = orch.play(&no_voice_ctx(GUILD, 9), track("B")).await;
        assert_eq!(res.cause, Some(FailureCause::NotInVoiceChannel));
        assert_eq!(rx.try_recv().unwrap_err(), TryRecvError::Empty);
        assert_eq!(node.directives().len(), before);
        let snap = orch.snapshot(GuildId::new(GUILD)).await.unwrap();
        assert!(snap.queue.is_empty());
        assert_eq!(snap.current.map(|t| t.title), Some("A".to_string()));
    }

    #[tokio::test]
    async fn pause_resume_round_trip_keeps_the_track() {
        let (orch, _node) = default_rig();
        let mut rx = joined(&orch, options()).await;
        orch.play(&voice_ctx(GUILD, 1), track("A")).await;

        assert!(orch.pause(&voice_ctx(GUILD, 1)).await.success);
        let snap = orch.snapshot(GuildId::new(GUILD)).await.unwrap();
        assert_eq!(snap.state, SessionState::Paused);

        assert!(orch.resume(&voice_ctx(GUILD, 1)).await.success);
        let snap = orch.snapshot(GuildId::new(GUILD)).await.unwrap();
        assert_eq!(snap.state, SessionState::Playing);
        assert_eq!(snap.current.map(|t| t.title), Some("A".to_string()));
        assert_eq!(
            kinds(&mut rx),
            vec![
                NotificationKind::TrackStarted,
                NotificationKind::Paused,
                NotificationKind::Resumed
            ]
        );
    }

    #[tokio::test]
    async fn pause_outside_playing_is_a_failed_no_op() {
        let (orch, _node) = default_rig();
        let _rx = joined(&orch, options()).await;
        orch.play(&voice_ctx(GUILD, 1), track("A")).await;
        orch.pause(&voice_ctx(GUILD, 1)).await;

        // Repeat invocation: still Paused, still the same track, still Failure.
        for _ in 0..2 {
            let res = orch.pause(&voice_ctx(GUILD, 1)).await;
            assert!(matches!(
                res.cause,
                Some(FailureCause::InvalidTransition(_))
            ));
            let snap = orch.snapshot(GuildId::new(GUILD)).await.unwrap();
            assert_eq!(snap.state, SessionState::Paused);
            assert_eq!(snap.current.as_ref().map(|t| t.title.as_str()), Some("A"));
        }
    }

    #[tokio::test]
    async fn resume_while_playing_is_a_failed_no_op() {
        let (orch, _node) = default_rig();
        let _rx = joined(&orch, options()).await;
        orch.play(&voice_ctx(GUILD, 1), track("A")).await;

        let res = orch.resume(&voice_ctx(GUILD, 1)).await;
        assert!(matches!(res.cause, Some(FailureCause::InvalidTransition(_))));
        let snap = orch.snapshot(GuildId::new(GUILD)).await.unwrap();
        assert_eq!(snap.state, SessionState::Playing);
    }

    #[tokio::test]
    async fn drain_property_lands_in_ready_with_queue_empty() {
        let (orch, _node) = default_rig();
        let mut rx = joined(&orch, options()).await;
        let guild = GuildId::new(GUILD);

        orch.play(&voice_ctx(GUILD, 1), track("A")).await;
        orch.play(&voice_ctx(GUILD, 1), track("B")).await;
        orch.play(&voice_ctx(GUILD, 1), track("C")).await;

        for _ in 0..3 {
            orch.handle_node_event(
                guild,
                NodeEvent::TrackEnded {
                    reason: EndReason::Finished,
                },
            )
            .await;
        }

        let snap = orch.snapshot(guild).await.unwrap();
        assert_eq!(snap.state, SessionState::Ready);
        assert!(snap.queue.is_empty());
        assert!(snap.current.is_none());
        assert_eq!(
            kinds(&mut rx),
            vec![
                NotificationKind::TrackStarted, // A
                NotificationKind::TrackEnded,
                NotificationKind::TrackStarted, // B
                NotificationKind::TrackEnded,
                NotificationKind::TrackStarted, // C
                NotificationKind::TrackEnded,
                NotificationKind::QueueEmpty,
            ]
        );
    }

    #[tokio::test]
    async fn autoplay_pulls_exactly_one_related_track() {
        let (orch, node) = rig(
            StaticRecommender::with(Some(track("Related"))),
            Duration::from_millis(500),
        );
        let _rx = joined(&orch, autoplay_options()).await;
        let guild = GuildId::new(GUILD);
        orch.play(&voice_ctx(GUILD, 1), track("A")).await;

        orch.handle_node_event(
            guild,
            NodeEvent::TrackEnded {
                reason: EndReason::Finished,
            },
        )
        .await;

        let snap = orch.snapshot(guild).await.unwrap();
        assert_eq!(snap.state, SessionState::Playing);
        assert_eq!(snap.current.map(|t| t.title), Some("Related".to_string()));
        assert!(
            node.directives()
                .contains(&Directive::Play(guild, "Related".into()))
        );
    }

    #[tokio::test]
    async fn exhausted_autoplay_settles_in_ready_not_a_fault() {
        let (orch, _node) = rig(StaticRecommender::with(None), Duration::from_millis(500));
        let mut rx = joined(&orch, autoplay_options()).await;
        let guild = GuildId::new(GUILD);
        orch.play(&voice_ctx(GUILD, 1), track("A")).await;

        orch.handle_node_event(
            guild,
            NodeEvent::TrackEnded {
                reason: EndReason::Finished,
            },
        )
        .await;

        let snap = orch.snapshot(guild).await.unwrap();
        assert_eq!(snap.state, SessionState::Ready);
        assert_eq!(
            kinds(&mut rx),
            vec![
                NotificationKind::TrackStarted,
                NotificationKind::TrackEnded,
                NotificationKind::QueueEmpty,
            ]
        );
    }

    #[tokio::test]
    async fn skip_with_nothing_playing_fails() {
        let (orch, _node) = default_rig();
        let _rx = joined(&orch, options()).await;
        let res = orch.skip(&voice_ctx(GUILD, 1)).await;
        assert_eq!(res.cause, Some(FailureCause::NothingPlaying));
    }

    #[tokio::test]
    async fn skip_stops_current_and_advances() {
        let (orch, node) = default_rig();
        let _rx = joined(&orch, options()).await;
        let guild = GuildId::new(GUILD);
        orch.play(&voice_ctx(GUILD, 1), track("A")).await;
        orch.play(&voice_ctx(GUILD, 1), track("B")).await;

        let res = orch.skip(&voice_ctx(GUILD, 1)).await;
        assert!(res.success);
        assert!(node.directives().contains(&Directive::Stop(guild)));

        let snap = orch.snapshot(guild).await.unwrap();
        assert_eq!(snap.state, SessionState::Playing);
        assert_eq!(snap.current.map(|t| t.title), Some("B".to_string()));
        assert!(snap.queue.is_empty());
    }

    #[tokio::test]
    async fn clear_drops_backlog_but_keeps_current() {
        let (orch, _node) = default_rig();
        let _rx = joined(&orch, options()).await;
        orch.play(&voice_ctx(GUILD, 1), track("A")).await;
        orch.play(&voice_ctx(GUILD, 1), track("B")).await;

        let res = orch.clear(&voice_ctx(GUILD, 1)).await;
        assert!(res.success);
        let snap = orch.snapshot(GuildId::new(GUILD)).await.unwrap();
        assert!(snap.queue.is_empty());
        assert_eq!(snap.current.map(|t| t.title), Some("A".to_string()));
        assert_eq!(snap.state, SessionState::Playing);
    }

    #[tokio::test]
    async fn volume_is_clamped_and_forwarded() {
        let (orch, node) = default_rig();
        let _rx = joined(&orch, options()).await;

        let res = orch.set_volume(&voice_ctx(GUILD, 1), 5.0).await;
        assert!(res.success);
        assert!(
            node.directives()
                .contains(&Directive::SetVolume(GuildId::new(GUILD), 200))
        );
        let snap = orch.snapshot(GuildId::new(GUILD)).await.unwrap();
        assert!((snap.volume - 2.0).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn leave_tears_down_and_later_commands_find_no_session() {
        let (orch, node) = default_rig();
        let mut rx = joined(&orch, options()).await;
        orch.play(&voice_ctx(GUILD, 1), track("A")).await;

        let res = orch.leave(&voice_ctx(GUILD, 1)).await;
        assert!(res.success);
        assert!(
            node.directives()
                .contains(&Directive::Disconnect(GuildId::new(GUILD)))
        );
        assert_eq!(
            kinds(&mut rx),
            vec![
                NotificationKind::TrackStarted,
                NotificationKind::SessionEnded
            ]
        );

        let res = orch.pause(&voice_ctx(GUILD, 1)).await;
        assert_eq!(res.cause, Some(FailureCause::NoActiveSession));
    }

    #[tokio::test]
    async fn fatal_node_event_force_disconnects() {
        let (orch, _node) = default_rig();
        let mut rx = joined(&orch, options()).await;
        let guild = GuildId::new(GUILD);
        orch.play(&voice_ctx(GUILD, 1), track("A")).await;

        orch.handle_node_event(
            guild,
            NodeEvent::Fatal {
                reason: "udp channel died".into(),
            },
        )
        .await;

        assert!(!orch.has_session(guild).await);
        let seen = kinds(&mut rx);
        assert_eq!(
            seen,
            vec![
                NotificationKind::TrackStarted,
                NotificationKind::Error {
                    cause: "udp channel died".into()
                },
                NotificationKind::SessionEnded,
            ]
        );
    }

    #[tokio::test]
    async fn failing_play_directive_is_fatal_for_the_session() {
        let (orch, node) = default_rig();
        let _rx = joined(&orch, options()).await;
        node.fail_play.store(true, Ordering::SeqCst);

        let res = orch.play(&voice_ctx(GUILD, 1), track("A")).await;
        assert!(matches!(res.cause, Some(FailureCause::Fatal(_))));
        assert!(!orch.has_session(GuildId::new(GUILD)).await);
    }

    #[tokio::test]
    async fn notifications_carry_the_bound_text_channel() {
        let (orch, _node) = default_rig();
        let mut rx = orch.subscribe();
        orch.join(&voice_ctx(GUILD, 1), options()).await;
        orch.play(&voice_ctx(GUILD, 1), track("A")).await;

        // SessionStarted, then TrackStarted; both addressed to the channel
        // fixed at join time.
        for _ in 0..2 {
            let event = rx.recv().await.unwrap();
            assert_eq!(event.channel_id, ChannelId::new(900));
        }
    }

    #[tokio::test]
    async fn connection_lost_mid_connect_aborts_the_join() {
        let (orch, node) = default_rig();
        node.silent_connect.store(true, Ordering::SeqCst);
        let guild = GuildId::new(GUILD);

        let join = {
            let orch = orch.clone();
            tokio::spawn(async move { orch.join(&voice_ctx(GUILD, 1), options()).await })
        };
        // Let the join reach its handshake wait before the drop arrives.
        tokio::time::sleep(Duration::from_millis(10)).await;
        node.emit(guild, NodeEvent::ConnectionLost);

        let res = join.await.unwrap();
        assert!(matches!(res.cause, Some(FailureCause::ConnectFailed(_))));
        assert!(!orch.has_session(guild).await);
    }

    #[tokio::test]
    async fn connection_lost_ends_the_session() {
        let (orch, _node) = default_rig();
        let mut rx = joined(&orch, options()).await;
        let guild = GuildId::new(GUILD);

        orch.handle_node_event(guild, NodeEvent::ConnectionLost).await;
        assert!(!orch.has_session(guild).await);
        let seen = kinds(&mut rx);
        assert!(matches!(seen[0], NotificationKind::Error { .. }));
        assert_eq!(seen[1], NotificationKind::SessionEnded);
    }

    #[tokio::test]
    async fn queue_view_reports_the_snapshot() {
        let (orch, _node) = default_rig();
        let _rx = joined(&orch, options()).await;
        orch.play(&voice_ctx(GUILD, 1), track("A")).await;
        orch.play(&voice_ctx(GUILD, 1), track("B")).await;

        // The view only needs guild and text context, not voice membership.
        let res = orch.queue(&no_voice_ctx(GUILD, 9)).await;
        assert!(res.success);
        let snap: SessionSnapshot = serde_json::from_value(res.data.unwrap()).unwrap();
        assert_eq!(snap.queue.len(), 1);
        assert_eq!(snap.queue[0].track.title, "B");
    }

    #[tokio::test]
    async fn guilds_are_isolated() {
        let (orch, _node) = default_rig();
        let _rx = joined(&orch, options()).await;
        orch.play(&voice_ctx(GUILD, 1), track("A")).await;

        let other = voice_ctx(GUILD + 1, 2);
        assert!(orch.join(&other, options()).await.success);
        orch.play(&other, track("X")).await;

        orch.handle_node_event(
            GuildId::new(GUILD + 1),
            NodeEvent::TrackEnded {
                reason: EndReason::Finished,
            },
        )
        .await;

        let snap = orch.snapshot(GuildId::new(GUILD)).await.unwrap();
        assert_eq!(snap.state, SessionState::Playing);
        let snap = orch.snapshot(GuildId::new(GUILD + 1)).await.unwrap();
        assert_eq!(snap.state, SessionState::Ready);
    }
}
