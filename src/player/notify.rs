use chrono::{DateTime, Utc};
use serde::Serialize;
use serenity::all::{ChannelId, GuildId};
use tokio::sync::broadcast;
use tracing::debug;

/// Closed set of session/queue lifecycle events.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotificationKind {
    SessionStarted,
    SessionEnded,
    TrackStarted,
    TrackEnded,
    QueueEmpty,
    Paused,
    Resumed,
    Error { cause: String },
}

/// One published event. Immutable once published; subscribers see per-guild
/// publish order but no replay of history.
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub guild_id: GuildId,
    /// Text channel the session is bound to; announcements go here.
    pub channel_id: ChannelId,
    #[serde(flatten)]
    pub kind: NotificationKind,
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    /// Chat line for the bound text channel, or `None` for kinds the command
    /// reply already covers.
    pub fn announcement(&self) -> Option<String> {
        match &self.kind {
            NotificationKind::TrackStarted => Some(format!(
                "Now playing: **{}**",
                self.message.as_deref().unwrap_or("unknown")
            )),
            NotificationKind::QueueEmpty => Some("Queue finished.".to_string()),
            NotificationKind::Error { cause } => Some(format!("Player error: {cause}")),
            _ => None,
        }
    }
}

/// Fan-out of session events to external subscribers (event stream, logging).
/// Publishing never blocks and never fails the command path: a send error
/// just means nobody is listening right now.
pub struct NotificationBus {
    tx: broadcast::Sender<Notification>,
}

impl NotificationBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    pub fn publish(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        kind: NotificationKind,
        message: Option<String>,
    ) {
        let event = Notification {
            guild_id,
            channel_id,
            kind,
            message,
            timestamp: Utc::now(),
        };
        debug!(guild = %guild_id, event = ?event.kind, "notification");
        let _ = self.tx.send(event);
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHANNEL: ChannelId = ChannelId::new(42);

    #[tokio::test]
    async fn publish_without_subscribers_is_harmless() {
        let bus = NotificationBus::new(8);
        bus.publish(GuildId::new(1), CHANNEL, NotificationKind::QueueEmpty, None);
    }

    #[tokio::test]
    async fn subscribers_see_publish_order_and_the_bound_channel() {
        let bus = NotificationBus::new(8);
        let mut rx = bus.subscribe();
        bus.publish(GuildId::new(1), CHANNEL, NotificationKind::TrackEnded, None);
        bus.publish(GuildId::new(1), CHANNEL, NotificationKind::QueueEmpty, None);

        let first = rx.try_recv().unwrap();
        assert_eq!(first.kind, NotificationKind::TrackEnded);
        assert_eq!(first.channel_id, CHANNEL);
        assert_eq!(rx.try_recv().unwrap().kind, NotificationKind::QueueEmpty);
    }

    #[tokio::test]
    async fn late_subscriber_gets_no_replay() {
        let bus = NotificationBus::new(8);
        bus.publish(
            GuildId::new(1),
            CHANNEL,
            NotificationKind::SessionStarted,
            None,
        );
        let mut rx = bus.subscribe();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn announcements_cover_only_chat_worthy_kinds() {
        let event = |kind| Notification {
            guild_id: GuildId::new(1),
            channel_id: CHANNEL,
            kind,
            message: Some("A Song".into()),
            timestamp: Utc::now(),
        };
        assert_eq!(
            event(NotificationKind::TrackStarted).announcement(),
            Some("Now playing: **A Song**".into())
        );
        assert_eq!(
            event(NotificationKind::QueueEmpty).announcement(),
            Some("Queue finished.".into())
        );
        assert_eq!(
            event(NotificationKind::Error {
                cause: "driver gone".into()
            })
            .announcement(),
            Some("Player error: driver gone".into())
        );
        // Command replies already cover these.
        assert_eq!(event(NotificationKind::Paused).announcement(), None);
        assert_eq!(event(NotificationKind::SessionStarted).announcement(), None);
    }
}
