//! Tiered Matchmaking
//!
//! One FIFO queue per tier. A queue that reaches four entries forms a room
//! at once. Otherwise the first real player arms a backfill timer that adds
//! one bot per tick until the room fills.
//!
//! [`TierQueues`] holds the queue rules with no I/O; [`Matchmaker`] wraps it
//! with timers, status messages and room formation.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::game::state::{PlayerId, PlayerIdentity, RoomId, Tier, SEATS_PER_ROOM};
use crate::network::protocol::{ErrorCode, QueueStatus, ServerMessage};
use crate::network::session::RoomRegistry;

/// Matchmaking configuration.
#[derive(Debug, Clone, Copy)]
pub struct MatchmakingConfig {
    /// Period between bot additions to a waiting queue.
    pub backfill_interval: Duration,
}

impl Default for MatchmakingConfig {
    fn default() -> Self {
        Self { backfill_interval: Duration::from_secs(5) }
    }
}

impl MatchmakingConfig {
    /// Read `BACKFILL_INTERVAL_MS`, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(ms) = std::env::var("BACKFILL_INTERVAL_MS").ok().and_then(|v| v.parse().ok()) {
            config.backfill_interval = Duration::from_millis(ms);
        }
        config
    }
}

/// A queued seat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEntry {
    /// A waiting player.
    Player(PlayerId),
    /// A backfill bot.
    Bot,
}

impl QueueEntry {
    /// Player id, if this is a real entry.
    pub fn player_id(&self) -> Option<&PlayerId> {
        match self {
            QueueEntry::Player(id) => Some(id),
            QueueEntry::Bot => None,
        }
    }
}

/// Matchmaking errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MatchmakingError {
    /// The player is already waiting.
    #[error("player {player_id} is already queued for {tier}")]
    AlreadyQueued {
        /// Player asking to queue.
        player_id: PlayerId,
        /// Tier they already wait in.
        tier: Tier,
    },

    /// The player is already playing.
    #[error("player {player_id} is already seated in room {room_id}")]
    AlreadySeated {
        /// Player asking to queue.
        player_id: PlayerId,
        /// Room they sit in.
        room_id: RoomId,
    },
}

impl MatchmakingError {
    /// Wire error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            MatchmakingError::AlreadyQueued { .. } => ErrorCode::AlreadyQueued,
            MatchmakingError::AlreadySeated { .. } => ErrorCode::AlreadyInRoom,
        }
    }
}

/// Result of one backfill tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackfillTick {
    /// A bot joined; the queue now holds `size` entries.
    Added {
        /// Entries now queued.
        size: usize,
    },
    /// The queue filled; these entries form a room.
    Formed(Vec<QueueEntry>),
    /// The timer is no longer current for this tier.
    Stopped,
}

// =============================================================================
// QUEUE STATE
// =============================================================================

/// Per-tier queues and backfill timer bookkeeping.
///
/// A tier's timer is identified by a generation number. Disarming or
/// re-arming bumps it, so a tick from an older timer sees [`BackfillTick::Stopped`].
#[derive(Debug, Default)]
pub struct TierQueues {
    queues: BTreeMap<Tier, VecDeque<QueueEntry>>,
    timers: BTreeMap<Tier, u64>,
    generation: u64,
}

impl TierQueues {
    /// Empty queues.
    pub fn new() -> Self {
        Self::default()
    }

    /// Tier the player is waiting in.
    pub fn tier_of(&self, player_id: &PlayerId) -> Option<Tier> {
        self.queues.iter()
            .find(|(_, queue)| queue.iter().any(|e| e.player_id() == Some(player_id)))
            .map(|(tier, _)| *tier)
    }

    /// Entries waiting in a tier.
    pub fn len(&self, tier: Tier) -> usize {
        self.queues.get(&tier).map_or(0, VecDeque::len)
    }

    /// Is every queue empty.
    pub fn is_empty(&self) -> bool {
        self.queues.values().all(VecDeque::is_empty)
    }

    /// Does the tier have a live backfill timer.
    pub fn is_armed(&self, tier: Tier) -> bool {
        self.timers.contains_key(&tier)
    }

    /// Append a player. Returns the room's entries when the queue fills.
    pub fn enqueue(&mut self, player_id: PlayerId, tier: Tier) -> Result<Option<Vec<QueueEntry>>, MatchmakingError> {
        if let Some(tier) = self.tier_of(&player_id) {
            return Err(MatchmakingError::AlreadyQueued { player_id, tier });
        }

        self.queues.entry(tier).or_default().push_back(QueueEntry::Player(player_id));
        Ok(self.take_full(tier))
    }

    /// Arm the tier's timer unless one is running. Returns the new generation.
    pub fn arm(&mut self, tier: Tier) -> Option<u64> {
        if self.is_armed(tier) || self.len(tier) == 0 {
            return None;
        }
        self.generation += 1;
        self.timers.insert(tier, self.generation);
        Some(self.generation)
    }

    /// Remove a waiting player. Returns the tier they left.
    ///
    /// A queue left with only bots is cleared and its timer disarmed.
    pub fn dequeue(&mut self, player_id: &PlayerId) -> Option<Tier> {
        let tier = self.tier_of(player_id)?;
        let queue = self.queues.entry(tier).or_default();
        queue.retain(|e| e.player_id() != Some(player_id));

        if !queue.iter().any(|e| e.player_id().is_some()) {
            queue.clear();
            self.timers.remove(&tier);
        }
        Some(tier)
    }

    /// Add one bot for the timer `generation` of `tier`.
    pub fn backfill_tick(&mut self, tier: Tier, generation: u64) -> BackfillTick {
        if self.timers.get(&tier) != Some(&generation) {
            return BackfillTick::Stopped;
        }

        let queue = self.queues.entry(tier).or_default();
        if queue.is_empty() {
            self.timers.remove(&tier);
            return BackfillTick::Stopped;
        }
        queue.push_back(QueueEntry::Bot);

        match self.take_full(tier) {
            Some(entries) => BackfillTick::Formed(entries),
            None => BackfillTick::Added { size: self.len(tier) },
        }
    }

    /// Queue status for each real player in the tier.
    pub fn statuses(&self, tier: Tier) -> Vec<(PlayerId, QueueStatus)> {
        let Some(queue) = self.queues.get(&tier) else {
            return Vec::new();
        };
        let size = queue.len();
        queue.iter()
            .enumerate()
            .filter_map(|(i, e)| {
                e.player_id().map(|id| (id.clone(), QueueStatus { tier, position: i + 1, size }))
            })
            .collect()
    }

    fn take_full(&mut self, tier: Tier) -> Option<Vec<QueueEntry>> {
        let queue = self.queues.get_mut(&tier)?;
        if queue.len() < SEATS_PER_ROOM {
            return None;
        }
        let entries: Vec<QueueEntry> = queue.drain(..SEATS_PER_ROOM).collect();
        if queue.is_empty() {
            self.timers.remove(&tier);
        }
        Some(entries)
    }
}

// =============================================================================
// MATCHMAKER
// =============================================================================

/// Async front of [`TierQueues`].
#[derive(Debug, Clone)]
pub struct Matchmaker {
    queues: Arc<Mutex<TierQueues>>,
    rooms: Arc<RoomRegistry>,
    config: MatchmakingConfig,
}

impl Matchmaker {
    /// Matchmaker that forms rooms in `rooms`.
    pub fn new(rooms: Arc<RoomRegistry>, config: MatchmakingConfig) -> Self {
        Self {
            queues: Arc::new(Mutex::new(TierQueues::new())),
            rooms,
            config,
        }
    }

    /// Queue a player for their tier.
    ///
    /// The queue lock is held until a filled room has registered its seats,
    /// so no player is ever both queued and seated.
    pub async fn enqueue(&self, identity: &PlayerIdentity) -> Result<(), MatchmakingError> {
        let tier = identity.tier;
        let generation = {
            let mut queues = self.queues.lock().await;
            if let Some(room_id) = self.rooms.room_of(&identity.id).await {
                return Err(MatchmakingError::AlreadySeated { player_id: identity.id.clone(), room_id });
            }

            let full = queues.enqueue(identity.id.clone(), tier)?;
            info!(player_id = %identity.id, %tier, "player queued");
            match full {
                Some(entries) => {
                    self.form(tier, entries).await;
                    None
                }
                None => queues.arm(tier),
            }
        };

        if let Some(generation) = generation {
            self.spawn_backfill(tier, generation);
        }
        self.announce(tier).await;
        Ok(())
    }

    /// Remove a waiting player, if queued.
    pub async fn dequeue(&self, player_id: &PlayerId) -> Option<Tier> {
        let tier = self.queues.lock().await.dequeue(player_id)?;
        debug!(%player_id, %tier, "player left queue");
        self.announce(tier).await;
        Some(tier)
    }

    /// Current queue status of a waiting player.
    pub async fn queue_status(&self, player_id: &PlayerId) -> Option<QueueStatus> {
        let queues = self.queues.lock().await;
        let tier = queues.tier_of(player_id)?;
        queues.statuses(tier)
            .into_iter()
            .find(|(id, _)| id == player_id)
            .map(|(_, status)| status)
    }

    /// Tier a player is waiting in.
    pub async fn queued_tier(&self, player_id: &PlayerId) -> Option<Tier> {
        self.queues.lock().await.tier_of(player_id)
    }

    /// Entries waiting in a tier.
    pub async fn queue_len(&self, tier: Tier) -> usize {
        self.queues.lock().await.len(tier)
    }

    fn spawn_backfill(&self, tier: Tier, generation: u64) {
        let period = self.config.backfill_interval.max(Duration::from_millis(1));
        let matchmaker = self.clone();

        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let formed = {
                    let mut queues = matchmaker.queues.lock().await;
                    match queues.backfill_tick(tier, generation) {
                        BackfillTick::Added { size } => {
                            debug!(%tier, size, "bot added");
                            false
                        }
                        BackfillTick::Formed(entries) => {
                            matchmaker.form(tier, entries).await;
                            true
                        }
                        BackfillTick::Stopped => break,
                    }
                };

                matchmaker.announce(tier).await;
                if formed {
                    break;
                }
            }
        });
    }

    async fn form(&self, tier: Tier, entries: Vec<QueueEntry>) {
        match self.rooms.form_room(tier, entries).await {
            Ok(room_id) => info!(%room_id, %tier, "room formed"),
            Err(e) => warn!(%tier, error = %e, "room not formed"),
        }
    }

    async fn announce(&self, tier: Tier) {
        let statuses = self.queues.lock().await.statuses(tier);
        for (player_id, status) in statuses {
            self.rooms.clients().send(&player_id, ServerMessage::Queue(status)).await;
        }
    }
}
