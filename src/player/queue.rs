use std::collections::VecDeque;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serenity::async_trait;

use crate::player::track::Track;

/// A track tagged with its enqueue order. The sequence number is per-session
/// and strictly increasing, so FIFO order has no ties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub seq: u64,
    pub track: Track,
}

/// Strict FIFO backlog. No reordering, no priorities; any richer policy
/// belongs above this layer.
#[derive(Debug, Default)]
pub struct TrackQueue {
    entries: VecDeque<QueueEntry>,
    next_seq: u64,
}

impl TrackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends and returns the assigned sequence number. O(1) amortized.
    pub fn enqueue(&mut self, track: Track) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push_back(QueueEntry { seq, track });
        seq
    }

    pub fn pop(&mut self) -> Option<QueueEntry> {
        self.entries.pop_front()
    }

    /// Drops the backlog. The currently playing track is not this queue's
    /// concern and stays untouched.
    pub fn clear(&mut self) -> usize {
        let n = self.entries.len();
        self.entries.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &QueueEntry> {
        self.entries.iter()
    }
}

/// External recommendation source consulted by autoplay when the queue runs
/// dry. Asked for exactly one related track per drain.
#[async_trait]
pub trait Recommender: Send + Sync {
    async fn related(&self, seed: &Track) -> Result<Option<Track>>;
}

/// Null object for sessions/deployments without a recommendation source.
pub struct NoRecommendations;

#[async_trait]
impl Recommender for NoRecommendations {
    async fn related(&self, _seed: &Track) -> Result<Option<Track>> {
        Ok(None)
    }
}
