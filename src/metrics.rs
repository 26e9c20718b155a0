use std::{
    sync::Arc,
    sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    time::Instant,
};

use once_cell::sync::Lazy;

pub static METRICS: Lazy<Arc<Metrics>> = Lazy::new(|| Arc::new(Metrics::new()));

#[derive(Debug)]
pub struct Metrics {
    start: Instant,
    ready: AtomicBool,
    active_sessions: AtomicUsize,
    tracks_played: AtomicU64,
    tracks_queued: AtomicU64,
    commands_denied: AtomicU64,
}

impl Metrics {
    fn new() -> Self {
        Self {
            start: Instant::now(),
            ready: AtomicBool::new(false),
            active_sessions: AtomicUsize::new(0),
            tracks_played: AtomicU64::new(0),
            tracks_queued: AtomicU64::new(0),
            commands_denied: AtomicU64::new(0),
        }
    }

    pub fn set_ready(&self, v: bool) {
        self.ready.store(v, Ordering::Relaxed);
    }
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    pub fn inc_sessions(&self) {
        self.active_sessions.fetch_add(1, Ordering::Relaxed);
    }
    pub fn dec_sessions(&self) {
        let _ = self
            .active_sessions
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |x| {
                Some(x.saturating_sub(1))
            });
    }

    pub fn inc_played(&self) {
        self.tracks_played.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_queued(&self) {
        self.tracks_queued.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_denied(&self) {
        self.commands_denied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.start.elapsed().as_secs(),
            ready: self.is_ready(),
            active_sessions: self.active_sessions.load(Ordering::Relaxed),
            tracks_played: self.tracks_played.load(Ordering::Relaxed),
            tracks_queued: self.tracks_queued.load(Ordering::Relaxed),
            commands_denied: self.commands_denied.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub ready: bool,
    pub active_sessions: usize,
    pub tracks_played: u64,
    pub tracks_queued: u64,
    pub commands_denied: u64,
}
