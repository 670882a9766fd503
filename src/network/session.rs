//! Room Session Management
//!
//! Everything between a formed room and the sockets of its players:
//!
//! - [`ClientDirectory`]: who is connected, and on which channel
//! - [`ActionSlot`]: the single open roll/move window of a room
//! - [`RoomRegistry`]: running rooms, player-to-room routing, snapshots
//! - the room loop that drives a [`GameRoom`] turn by turn
//!
//! Room state is owned by its loop task. Everyone else sees the published
//! [`RoomSnapshot`].

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::core::rng::{DiceRng, DiceSource};
use crate::game::board::Color;
use crate::game::state::{GameRoom, ParticipantKind, PlayerId, PlayerIdentity, RoomId, Tier, SEATS_PER_ROOM};
use crate::game::turn::{InputWindow, MoveChoice, RollOutcome, TurnTimings};
use crate::network::matchmaking::QueueEntry;
use crate::network::protocol::{ClientMessage, RoomSnapshot, ServerMessage};

/// Outbound buffer per connection.
pub const CLIENT_CHANNEL_CAPACITY: usize = 64;

/// Session errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// Wrong number of queue entries for a room.
    #[error("a room needs 4 seats, got {0}")]
    SeatCount(usize),

    /// Every queued player left before the room formed.
    #[error("no connected players to seat")]
    NoConnectedPlayers,
}

// =============================================================================
// CLIENT DIRECTORY
// =============================================================================

/// A live connection bound to a player.
#[derive(Debug)]
pub struct ClientHandle {
    /// Authenticated identity.
    pub identity: PlayerIdentity,
    /// Connection that currently owns the binding.
    pub connection_id: u64,
    sender: mpsc::Sender<ServerMessage>,
    displaced: Option<oneshot::Sender<()>>,
}

/// A fresh binding from [`ClientDirectory::bind`].
#[derive(Debug)]
pub struct Binding {
    /// Id of the bound connection.
    pub connection_id: u64,
    /// Fires when a newer connection takes over the player.
    pub displaced: oneshot::Receiver<()>,
}

/// Player id to live connection.
///
/// Senders are looked up at send time, so a reconnecting player picks up
/// room traffic on the new socket straight away.
#[derive(Debug, Default)]
pub struct ClientDirectory {
    clients: RwLock<BTreeMap<PlayerId, ClientHandle>>,
    next_connection: AtomicU64,
}

impl ClientDirectory {
    /// Empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a player to a connection, replacing any earlier binding.
    /// Returns the new connection id.
    pub async fn register(&self, identity: PlayerIdentity, sender: mpsc::Sender<ServerMessage>) -> u64 {
        self.bind(identity, sender).await.connection_id
    }

    /// Like [`register`](Self::register), also handing back the signal that
    /// fires when a later connection displaces this one.
    pub async fn bind(&self, identity: PlayerIdentity, sender: mpsc::Sender<ServerMessage>) -> Binding {
        let connection_id = self.next_connection.fetch_add(1, Ordering::Relaxed) + 1;
        let player_id = identity.id.clone();
        let (displaced_tx, displaced) = oneshot::channel();

        let previous = {
            let mut clients = self.clients.write().await;
            clients.insert(player_id.clone(), ClientHandle {
                identity,
                connection_id,
                sender,
                displaced: Some(displaced_tx),
            })
        };

        if let Some(mut previous) = previous {
            debug!(%player_id, old = previous.connection_id, new = connection_id, "connection rebound");
            let _ = previous.sender.try_send(ServerMessage::Status("connected from another session".into()));
            if let Some(displaced) = previous.displaced.take() {
                let _ = displaced.send(());
            }
        }

        Binding { connection_id, displaced }
    }

    /// Remove the binding if `connection_id` still owns it.
    pub async fn unregister(&self, player_id: &PlayerId, connection_id: u64) -> bool {
        let mut clients = self.clients.write().await;
        match clients.get(player_id) {
            Some(handle) if handle.connection_id == connection_id => {
                clients.remove(player_id);
                true
            }
            _ => false,
        }
    }

    /// Is the player connected.
    pub async fn is_connected(&self, player_id: &PlayerId) -> bool {
        self.clients.read().await.contains_key(player_id)
    }

    /// Identity of a connected player.
    pub async fn identity(&self, player_id: &PlayerId) -> Option<PlayerIdentity> {
        self.clients.read().await.get(player_id).map(|h| h.identity.clone())
    }

    /// Connected player count.
    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Is nobody connected.
    pub async fn is_empty(&self) -> bool {
        self.clients.read().await.is_empty()
    }

    /// Send to one player. Missing connections are logged and skipped.
    pub async fn send(&self, player_id: &PlayerId, message: ServerMessage) -> bool {
        let sender = self.clients.read().await.get(player_id).map(|h| h.sender.clone());
        match sender {
            Some(sender) => sender.send(message).await.is_ok(),
            None => {
                warn!(%player_id, event = message.event_name(), "no connection for player");
                false
            }
        }
    }

    /// Send to every listed player.
    pub async fn broadcast(&self, player_ids: &[PlayerId], message: &ServerMessage) {
        let senders: Vec<(&PlayerId, Option<mpsc::Sender<ServerMessage>>)> = {
            let clients = self.clients.read().await;
            player_ids.iter()
                .map(|id| (id, clients.get(id).map(|h| h.sender.clone())))
                .collect()
        };

        for (player_id, sender) in senders {
            match sender {
                Some(sender) => {
                    if sender.send(message.clone()).await.is_err() {
                        debug!(%player_id, "connection closed mid-send");
                    }
                }
                None => warn!(%player_id, event = message.event_name(), "no connection for player"),
            }
        }
    }
}

// =============================================================================
// ACTION SLOT
// =============================================================================

/// Kind of input a window accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    /// A roll for the window's seat.
    Roll,
    /// A piece choice.
    Move,
}

/// Action delivered to the room loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerAction {
    /// Roll now.
    Roll,
    /// Move this piece.
    Move {
        /// Piece name as sent by the client.
        piece: String,
    },
}

#[derive(Debug)]
struct OpenWindow {
    kind: ActionKind,
    seat: Color,
    player_id: PlayerId,
    tx: mpsc::UnboundedSender<PlayerAction>,
}

/// At most one pending roll-or-move request per room.
///
/// Actions outside an open, matching window are rejected. A roll closes the
/// window on arrival; move windows stay open until the loop closes them, so
/// an illegal pick can be followed by a legal one.
#[derive(Debug, Default)]
pub struct ActionSlot {
    window: Mutex<Option<OpenWindow>>,
}

impl ActionSlot {
    /// Open a window for `player_id` at `seat`, replacing any open one.
    pub async fn open(&self, kind: ActionKind, seat: Color, player_id: PlayerId) -> mpsc::UnboundedReceiver<PlayerAction> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.window.lock().await = Some(OpenWindow { kind, seat, player_id, tx });
        rx
    }

    /// Close the window.
    pub async fn close(&self) {
        self.window.lock().await.take();
    }

    /// Is a window open.
    pub async fn is_open(&self) -> bool {
        self.window.lock().await.is_some()
    }

    /// Offer a client action. Returns whether the open window took it.
    pub async fn submit(&self, player_id: &PlayerId, message: &ClientMessage) -> bool {
        let mut slot = self.window.lock().await;
        let Some(window) = slot.as_ref() else {
            return false;
        };
        if &window.player_id != player_id {
            return false;
        }

        match (window.kind, message) {
            (ActionKind::Roll, ClientMessage::Roll { color }) if *color == window.seat => {
                let accepted = window.tx.send(PlayerAction::Roll).is_ok();
                slot.take();
                accepted
            }
            (ActionKind::Move, ClientMessage::Move { piece }) => {
                window.tx.send(PlayerAction::Move { piece: piece.clone() }).is_ok()
            }
            _ => false,
        }
    }
}

// =============================================================================
// ROOM REGISTRY
// =============================================================================

/// Why a room stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomEnd {
    /// A seat brought all four pieces home.
    Won(Color),
    /// No real participant was connected at the start of a turn.
    Abandoned,
    /// The server is shutting down.
    Shutdown,
}

#[derive(Debug)]
struct RoomHandle {
    tier: Tier,
    seats: Vec<(PlayerId, Color)>,
    slot: Arc<ActionSlot>,
    snapshot: watch::Receiver<RoomSnapshot>,
}

/// Running rooms and the players seated in them.
#[derive(Debug)]
pub struct RoomRegistry {
    rooms: RwLock<BTreeMap<RoomId, RoomHandle>>,
    player_rooms: RwLock<BTreeMap<PlayerId, RoomId>>,
    clients: Arc<ClientDirectory>,
    timings: TurnTimings,
    shutdown_tx: broadcast::Sender<()>,
}

impl RoomRegistry {
    /// Create a registry that plays rooms with `timings`.
    pub fn new(clients: Arc<ClientDirectory>, timings: TurnTimings) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            rooms: RwLock::new(BTreeMap::new()),
            player_rooms: RwLock::new(BTreeMap::new()),
            clients,
            timings,
            shutdown_tx,
        }
    }

    /// Connection directory used for room traffic.
    pub fn clients(&self) -> &Arc<ClientDirectory> {
        &self.clients
    }

    /// Seat queue entries in order and start the room with fresh dice.
    ///
    /// Player entries without a live connection are seated as bots.
    pub async fn form_room(self: &Arc<Self>, tier: Tier, entries: Vec<QueueEntry>) -> Result<RoomId, SessionError> {
        let mut seats = Vec::with_capacity(SEATS_PER_ROOM);
        let mut bots = 0;

        for entry in entries {
            let identity = match entry {
                QueueEntry::Player(id) => self.clients.identity(&id).await,
                QueueEntry::Bot => None,
            };
            match identity {
                Some(identity) => seats.push(ParticipantKind::Real(identity)),
                None => {
                    bots += 1;
                    seats.push(ParticipantKind::bot(bots));
                }
            }
        }

        let count = seats.len();
        let seats: [ParticipantKind; SEATS_PER_ROOM] = seats.try_into()
            .map_err(|_| SessionError::SeatCount(count))?;
        if bots == SEATS_PER_ROOM {
            return Err(SessionError::NoConnectedPlayers);
        }

        let room = GameRoom::new(Uuid::new_v4(), tier, seats);
        let room_id = room.id;
        self.start_room(room, Box::new(DiceRng::from_entropy())).await;
        Ok(room_id)
    }

    /// Register a room, greet its players and spawn its loop.
    pub async fn start_room(self: &Arc<Self>, room: GameRoom, dice: Box<dyn DiceSource>) -> JoinHandle<RoomEnd> {
        let room_id = room.id;
        let tier = room.tier;
        let snapshot = RoomSnapshot::from(&room);
        let (snapshot_tx, snapshot_rx) = watch::channel(snapshot.clone());
        let slot = Arc::new(ActionSlot::default());

        let seats: Vec<(PlayerId, Color)> = room.participants().iter()
            .filter_map(|p| p.player_id().map(|id| (id.clone(), p.color)))
            .collect();

        {
            let mut rooms = self.rooms.write().await;
            rooms.insert(room_id, RoomHandle {
                tier,
                seats: seats.clone(),
                slot: slot.clone(),
                snapshot: snapshot_rx,
            });
        }
        {
            let mut player_rooms = self.player_rooms.write().await;
            for (player_id, _) in &seats {
                player_rooms.insert(player_id.clone(), room_id);
            }
        }

        info!(%room_id, %tier, players = seats.len(), "room started");

        for (player_id, color) in &seats {
            self.clients.send(player_id, ServerMessage::MyColor(*color)).await;
            self.clients.send(player_id, ServerMessage::Status("starting game".into())).await;
            self.clients.send(player_id, ServerMessage::RoomStart(snapshot.clone())).await;
        }

        let runner = RoomRunner {
            room,
            dice,
            slot,
            clients: self.clients.clone(),
            snapshot: snapshot_tx,
            timings: self.timings,
            players: seats.into_iter().map(|(id, _)| id).collect(),
            unattended_since: None,
        };
        let shutdown_rx = self.shutdown_tx.subscribe();
        let registry = Arc::clone(self);

        tokio::spawn(async move {
            let end = runner.run(shutdown_rx).await;
            registry.remove_room(&room_id).await;
            info!(%room_id, ?end, "room closed");
            end
        })
    }

    /// Drop a room and free its players.
    pub async fn remove_room(&self, room_id: &RoomId) -> bool {
        let Some(handle) = self.rooms.write().await.remove(room_id) else {
            return false;
        };

        let mut player_rooms = self.player_rooms.write().await;
        for (player_id, _) in &handle.seats {
            if player_rooms.get(player_id) == Some(room_id) {
                player_rooms.remove(player_id);
            }
        }
        true
    }

    /// Room a player is seated in.
    pub async fn room_of(&self, player_id: &PlayerId) -> Option<RoomId> {
        self.player_rooms.read().await.get(player_id).copied()
    }

    /// Running room count.
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Running rooms in a tier.
    pub async fn rooms_in_tier(&self, tier: Tier) -> usize {
        self.rooms.read().await.values().filter(|h| h.tier == tier).count()
    }

    /// Latest snapshot of a room.
    pub async fn snapshot(&self, room_id: &RoomId) -> Option<RoomSnapshot> {
        self.rooms.read().await.get(room_id).map(|h| h.snapshot.borrow().clone())
    }

    /// Seat and current snapshot for a seated player.
    pub async fn rejoin(&self, player_id: &PlayerId) -> Option<(Color, RoomSnapshot)> {
        let room_id = self.room_of(player_id).await?;
        let rooms = self.rooms.read().await;
        let handle = rooms.get(&room_id)?;
        let color = handle.seats.iter()
            .find(|(id, _)| id == player_id)
            .map(|(_, color)| *color)?;
        let snapshot = handle.snapshot.borrow().clone();
        Some((color, snapshot))
    }

    /// Route a roll or move to the player's room.
    pub async fn submit(&self, player_id: &PlayerId, message: &ClientMessage) -> bool {
        let Some(room_id) = self.room_of(player_id).await else {
            return false;
        };
        let slot = self.rooms.read().await.get(&room_id).map(|h| h.slot.clone());
        match slot {
            Some(slot) => slot.submit(player_id, message).await,
            None => false,
        }
    }

    /// Stop every room.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

// =============================================================================
// ROOM LOOP
// =============================================================================

struct RoomRunner {
    room: GameRoom,
    dice: Box<dyn DiceSource>,
    slot: Arc<ActionSlot>,
    clients: Arc<ClientDirectory>,
    snapshot: watch::Sender<RoomSnapshot>,
    timings: TurnTimings,
    players: Vec<PlayerId>,
    unattended_since: Option<Instant>,
}

impl RoomRunner {
    #[instrument(skip_all, fields(room_id = %self.room.id))]
    async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> RoomEnd {
        loop {
            let end = tokio::select! {
                _ = shutdown.recv() => Some(RoomEnd::Shutdown),
                end = self.play_turn() => end,
            };

            if let Some(end) = end {
                self.slot.close().await;
                if end == RoomEnd::Shutdown {
                    let message = ServerMessage::Shutdown { reason: "server shutting down".into() };
                    self.clients.broadcast(&self.players, &message).await;
                }
                return end;
            }
        }
    }

    /// One full turn. Returns `Some` when the room is over.
    async fn play_turn(&mut self) -> Option<RoomEnd> {
        if self.any_connected().await {
            self.unattended_since = None;
        } else {
            let since = *self.unattended_since.get_or_insert_with(Instant::now);
            if since.elapsed() >= self.timings.abandon_after {
                info!("no players connected, abandoning room");
                return Some(RoomEnd::Abandoned);
            }
        }

        let seat = match self.room.begin_turn() {
            Ok(seat) => seat,
            Err(_) => return Some(self.room.winner().map_or(RoomEnd::Abandoned, RoomEnd::Won)),
        };
        self.flush().await;

        let (roll_window, move_window, owner) = {
            let participant = self.room.participant(seat);
            (
                participant.roll_window(&self.timings),
                participant.move_window(&self.timings),
                participant.player_id().cloned(),
            )
        };

        self.await_roll(seat, roll_window, owner.as_ref()).await;
        let dice = self.dice.roll();
        let outcome = match self.room.resolve_roll(dice) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(%seat, dice, error = %e, "roll rejected");
                return Some(RoomEnd::Abandoned);
            }
        };
        debug!(%seat, dice, ?outcome, "rolled");
        self.flush().await;

        if let RollOutcome::MustMove { .. } = outcome {
            let choice = self.await_move(seat, move_window, owner.as_ref()).await;
            let resolution = match self.room.resolve_move(choice) {
                Ok(resolution) => resolution,
                Err(e) => {
                    warn!(%seat, error = %e, "move rejected, picking automatically");
                    match self.room.resolve_move(MoveChoice::Auto) {
                        Ok(resolution) => resolution,
                        Err(e) => {
                            warn!(%seat, error = %e, "no move possible");
                            return Some(RoomEnd::Abandoned);
                        }
                    }
                }
            };
            self.flush().await;

            if let Some(winner) = resolution.winner {
                info!(%winner, "game won");
                return Some(RoomEnd::Won(winner));
            }
        }

        if !self.timings.turn_pause.is_zero() {
            sleep(self.timings.turn_pause).await;
        }
        None
    }

    async fn await_roll(&self, seat: Color, window: InputWindow, owner: Option<&PlayerId>) {
        match (window, owner) {
            (InputWindow::Listen(timeout), Some(owner)) => {
                let deadline = Instant::now() + timeout;
                let mut actions = self.slot.open(ActionKind::Roll, seat, owner.clone()).await;
                tokio::select! {
                    Some(PlayerAction::Roll) = actions.recv() => debug!(%seat, "roll requested"),
                    _ = sleep_until(deadline) => debug!(%seat, "roll timed out"),
                }
                self.slot.close().await;
            }
            (InputWindow::Delay(delay), _) => sleep(delay).await,
            _ => {}
        }
    }

    async fn await_move(&self, seat: Color, window: InputWindow, owner: Option<&PlayerId>) -> MoveChoice {
        match (window, owner) {
            (InputWindow::Listen(timeout), Some(owner)) => {
                let deadline = Instant::now() + timeout;
                let mut actions = self.slot.open(ActionKind::Move, seat, owner.clone()).await;
                let choice = loop {
                    tokio::select! {
                        action = actions.recv() => match action {
                            Some(PlayerAction::Move { piece }) => match self.room.check_choice(&piece) {
                                Ok(()) => break MoveChoice::Piece(piece),
                                Err(e) => debug!(%seat, %piece, error = %e, "ignoring move"),
                            },
                            Some(PlayerAction::Roll) => {}
                            None => {
                                sleep_until(deadline).await;
                                break MoveChoice::Auto;
                            }
                        },
                        _ = sleep_until(deadline) => {
                            debug!(%seat, "move timed out");
                            break MoveChoice::Auto;
                        }
                    }
                };
                self.slot.close().await;
                choice
            }
            (InputWindow::Delay(delay), _) => {
                sleep(delay).await;
                MoveChoice::Auto
            }
            _ => MoveChoice::Auto,
        }
    }

    /// Broadcast pending events in order and publish a fresh snapshot.
    async fn flush(&mut self) {
        let events = self.room.take_events();
        for event in &events {
            if let Some(message) = ServerMessage::from_event(event, &self.room) {
                self.clients.broadcast(&self.players, &message).await;
            }
        }
        self.snapshot.send_replace(RoomSnapshot::from(&self.room));
    }

    async fn any_connected(&self) -> bool {
        for player_id in &self.players {
            if self.clients.is_connected(player_id).await {
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::board::FINISH_LINE;
    use crate::game::state::Piece;
    use std::collections::VecDeque;
    use std::time::Duration;

    struct ScriptedDice(VecDeque<u8>);

    impl DiceSource for ScriptedDice {
        fn roll(&mut self) -> u8 {
            self.0.pop_front().unwrap_or(1)
        }
    }

    fn identity(id: &str) -> PlayerIdentity {
        PlayerIdentity {
            id: PlayerId::new(id),
            username: id.to_string(),
            tier: Tier::Bronze,
            balance: 0.0,
        }
    }

    fn registry() -> Arc<RoomRegistry> {
        let clients = Arc::new(ClientDirectory::new());
        Arc::new(RoomRegistry::new(clients, TurnTimings::default().without_pause()))
    }

    async fn connect(registry: &RoomRegistry, id: &str) -> mpsc::Receiver<ServerMessage> {
        let (tx, rx) = mpsc::channel(CLIENT_CHANNEL_CAPACITY);
        registry.clients().register(identity(id), tx).await;
        rx
    }

    async fn next_turn(rx: &mut mpsc::Receiver<ServerMessage>) -> Color {
        loop {
            match rx.recv().await {
                Some(ServerMessage::Turn(color)) => return color,
                Some(_) => continue,
                None => panic!("channel closed"),
            }
        }
    }

    async fn submit_when_open(registry: &RoomRegistry, player: &str, message: ClientMessage) {
        let id = PlayerId::new(player);
        while !registry.submit(&id, &message).await {
            tokio::task::yield_now().await;
        }
    }

    fn one_player_room(id: &str) -> GameRoom {
        GameRoom::new(
            Uuid::new_v4(),
            Tier::Bronze,
            [
                ParticipantKind::Real(identity(id)),
                ParticipantKind::bot(1),
                ParticipantKind::bot(2),
                ParticipantKind::bot(3),
            ],
        )
    }

    #[tokio::test]
    async fn test_slot_rejects_without_window() {
        let slot = ActionSlot::default();
        let id = PlayerId::new("a");
        assert!(!slot.submit(&id, &ClientMessage::Roll { color: Color::Blue }).await);
    }

    #[tokio::test]
    async fn test_slot_roll_window() {
        let slot = ActionSlot::default();
        let owner = PlayerId::new("a");
        let mut rx = slot.open(ActionKind::Roll, Color::Blue, owner.clone()).await;

        assert!(!slot.submit(&PlayerId::new("b"), &ClientMessage::Roll { color: Color::Blue }).await);
        assert!(!slot.submit(&owner, &ClientMessage::Roll { color: Color::Red }).await);
        assert!(!slot.submit(&owner, &ClientMessage::Move { piece: "blue1".into() }).await);

        assert!(slot.submit(&owner, &ClientMessage::Roll { color: Color::Blue }).await);
        assert!(!slot.submit(&owner, &ClientMessage::Roll { color: Color::Blue }).await);
        assert!(!slot.is_open().await);

        assert_eq!(rx.recv().await, Some(PlayerAction::Roll));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_slot_move_window_stays_open() {
        let slot = ActionSlot::default();
        let owner = PlayerId::new("a");
        let mut rx = slot.open(ActionKind::Move, Color::Green, owner.clone()).await;

        assert!(slot.submit(&owner, &ClientMessage::Move { piece: "green9".into() }).await);
        assert!(slot.submit(&owner, &ClientMessage::Move { piece: "green1".into() }).await);
        assert!(!slot.submit(&owner, &ClientMessage::Roll { color: Color::Green }).await);

        slot.close().await;
        assert!(!slot.submit(&owner, &ClientMessage::Move { piece: "green1".into() }).await);

        assert_eq!(rx.recv().await, Some(PlayerAction::Move { piece: "green9".into() }));
        assert_eq!(rx.recv().await, Some(PlayerAction::Move { piece: "green1".into() }));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_directory_rebind_and_stale_unregister() {
        let directory = ClientDirectory::new();
        let (tx1, mut rx1) = mpsc::channel(8);
        let (tx2, mut rx2) = mpsc::channel(8);

        let first = directory.register(identity("a"), tx1).await;
        let second = directory.register(identity("a"), tx2).await;
        assert_ne!(first, second);
        assert!(matches!(rx1.recv().await, Some(ServerMessage::Status(_))));

        let id = PlayerId::new("a");
        assert!(directory.send(&id, ServerMessage::Dice(3)).await);
        assert_eq!(rx2.recv().await, Some(ServerMessage::Dice(3)));

        assert!(!directory.unregister(&id, first).await);
        assert!(directory.is_connected(&id).await);
        assert!(directory.unregister(&id, second).await);
        assert!(directory.is_empty().await);
    }

    #[tokio::test]
    async fn test_bind_signals_displaced_connection() {
        let directory = ClientDirectory::new();
        let (tx1, _rx1) = mpsc::channel(8);
        let (tx2, _rx2) = mpsc::channel(8);

        let mut first = directory.bind(identity("a"), tx1).await;
        assert!(first.displaced.try_recv().is_err());

        let second = directory.bind(identity("a"), tx2).await;
        assert_eq!(first.displaced.await, Ok(()));
        assert!(!directory.unregister(&PlayerId::new("a"), first.connection_id).await);
        assert!(directory.unregister(&PlayerId::new("a"), second.connection_id).await);
    }

    #[tokio::test]
    async fn test_enqueue_during_formation_sees_seat() {
        use crate::network::matchmaking::{Matchmaker, MatchmakingConfig, MatchmakingError};

        let registry = registry();
        let config = MatchmakingConfig { backfill_interval: Duration::from_secs(60) };
        let matchmaker = Matchmaker::new(registry.clone(), config);
        let mut receivers = Vec::new();
        for id in ["a", "b", "c", "d"] {
            receivers.push(connect(&registry, id).await);
        }
        for id in ["a", "b", "c"] {
            matchmaker.enqueue(&identity(id)).await.unwrap();
        }

        // Stall formation while the fourth player fills the queue
        let guard = registry.rooms.write().await;
        let filling = tokio::spawn({
            let matchmaker = matchmaker.clone();
            async move { matchmaker.enqueue(&identity("d")).await }
        });
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        let requeue = tokio::spawn({
            let matchmaker = matchmaker.clone();
            async move { matchmaker.enqueue(&identity("a")).await }
        });
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        drop(guard);

        assert_eq!(filling.await.unwrap(), Ok(()));
        let room_id = registry.room_of(&PlayerId::new("a")).await.unwrap();
        assert_eq!(
            requeue.await.unwrap(),
            Err(MatchmakingError::AlreadySeated { player_id: PlayerId::new("a"), room_id })
        );
        assert_eq!(matchmaker.queued_tier(&PlayerId::new("a")).await, None);
        registry.shutdown();
    }

    #[tokio::test]
    async fn test_broadcast_skips_missing() {
        let directory = ClientDirectory::new();
        let (tx, mut rx) = mpsc::channel(8);
        directory.register(identity("a"), tx).await;

        let ids = [PlayerId::new("gone"), PlayerId::new("a")];
        directory.broadcast(&ids, &ServerMessage::Turn(Color::Red)).await;

        assert_eq!(rx.recv().await, Some(ServerMessage::Turn(Color::Red)));
        assert!(!directory.send(&PlayerId::new("gone"), ServerMessage::Dice(1)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_form_room_greets_players() {
        let registry = registry();
        let mut rx = connect(&registry, "alice").await;

        let entries = vec![
            QueueEntry::Player(PlayerId::new("alice")),
            QueueEntry::Bot,
            QueueEntry::Player(PlayerId::new("left-already")),
            QueueEntry::Bot,
        ];
        let room_id = registry.form_room(Tier::Bronze, entries).await.unwrap();

        assert_eq!(rx.recv().await, Some(ServerMessage::MyColor(Color::Blue)));
        assert_eq!(rx.recv().await, Some(ServerMessage::Status("starting game".into())));
        let Some(ServerMessage::RoomStart(snapshot)) = rx.recv().await else {
            panic!("expected room start");
        };
        assert_eq!(snapshot.room_id, room_id);
        let names: Vec<&str> = snapshot.seats.iter().map(|s| s.username.as_str()).collect();
        assert_eq!(names, ["alice", "bot1", "bot2", "bot3"]);

        assert_eq!(registry.room_of(&PlayerId::new("alice")).await, Some(room_id));
        assert_eq!(registry.rooms_in_tier(Tier::Bronze).await, 1);
        registry.shutdown();
    }

    #[tokio::test]
    async fn test_form_room_rejects_bad_entries() {
        let registry = registry();

        let short = vec![QueueEntry::Bot, QueueEntry::Bot];
        assert_eq!(registry.form_room(Tier::Gold, short).await, Err(SessionError::SeatCount(2)));

        let ghosts = vec![QueueEntry::Player(PlayerId::new("ghost")), QueueEntry::Bot, QueueEntry::Bot, QueueEntry::Bot];
        assert_eq!(registry.form_room(Tier::Gold, ghosts).await, Err(SessionError::NoConnectedPlayers));
        assert_eq!(registry.room_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_room_abandoned_without_connections() {
        let registry = registry();
        let started = Instant::now();
        let handle = registry.start_room(one_player_room("nobody"), Box::new(ScriptedDice(VecDeque::new()))).await;

        assert_eq!(handle.await.unwrap(), RoomEnd::Abandoned);
        assert!(started.elapsed() >= TurnTimings::default().abandon_after);
        assert_eq!(registry.room_count().await, 0);
        assert_eq!(registry.room_of(&PlayerId::new("nobody")).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_brief_disconnect_keeps_room() {
        let registry = registry();
        let (tx, mut rx) = mpsc::channel(CLIENT_CHANNEL_CAPACITY);
        let connection = registry.clients().register(identity("alice"), tx).await;
        let handle = registry.start_room(one_player_room("alice"), Box::new(ScriptedDice(VecDeque::new()))).await;
        assert_eq!(next_turn(&mut rx).await, Color::Blue);

        let alice = PlayerId::new("alice");
        assert!(registry.clients().unregister(&alice, connection).await);
        sleep(Duration::from_secs(6)).await;

        let mut rx = connect(&registry, "alice").await;
        let (color, _) = registry.rejoin(&alice).await.unwrap();
        assert_eq!(color, Color::Blue);
        assert!(!handle.is_finished());
        next_turn(&mut rx).await;

        registry.shutdown();
        assert_eq!(handle.await.unwrap(), RoomEnd::Shutdown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_ends_room() {
        let registry = registry();
        let mut rx = connect(&registry, "alice").await;
        let handle = registry.start_room(one_player_room("alice"), Box::new(ScriptedDice(VecDeque::new()))).await;

        assert_eq!(next_turn(&mut rx).await, Color::Blue);
        registry.shutdown();

        assert_eq!(handle.await.unwrap(), RoomEnd::Shutdown);
        let mut saw_shutdown = false;
        while let Ok(message) = rx.try_recv() {
            saw_shutdown |= matches!(message, ServerMessage::Shutdown { .. });
        }
        assert!(saw_shutdown);
        assert_eq!(registry.room_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_player_roll_and_move() {
        let registry = registry();
        let mut rx = connect(&registry, "alice").await;
        let dice = ScriptedDice(VecDeque::from([6, 2]));
        let room = one_player_room("alice");
        let room_id = room.id;
        let _handle = registry.start_room(room, Box::new(dice)).await;

        assert_eq!(next_turn(&mut rx).await, Color::Blue);
        submit_when_open(&registry, "alice", ClientMessage::Roll { color: Color::Blue }).await;
        assert_eq!(rx.recv().await, Some(ServerMessage::Dice(6)));

        // An illegal pick is ignored and the window stays open
        submit_when_open(&registry, "alice", ClientMessage::Move { piece: "blue7".into() }).await;
        submit_when_open(&registry, "alice", ClientMessage::Move { piece: "blue3".into() }).await;
        let Some(ServerMessage::Layout(seats)) = rx.recv().await else {
            panic!("expected layout");
        };
        assert_eq!(seats[0].pieces[2].position, Some(0));

        // Six without capture keeps the turn
        assert_eq!(rx.recv().await, Some(ServerMessage::Turn(Color::Blue)));

        let snapshot = registry.snapshot(&room_id).await.unwrap();
        assert_eq!(snapshot.last_dice, Some(6));
        registry.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_roll_timeout_rolls_once() {
        let registry = registry();
        let mut rx = connect(&registry, "alice").await;
        let _handle = registry.start_room(one_player_room("alice"), Box::new(ScriptedDice(VecDeque::from([3])))).await;

        assert_eq!(next_turn(&mut rx).await, Color::Blue);
        let started = Instant::now();

        // Locked pieces and a 3: one dice event, then red's turn
        assert_eq!(rx.recv().await, Some(ServerMessage::Dice(3)));
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert_eq!(rx.recv().await, Some(ServerMessage::Turn(Color::Red)));
        registry.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejoin_gets_seat_and_snapshot() {
        let registry = registry();
        let mut rx = connect(&registry, "alice").await;
        let mut room = one_player_room("alice");
        room.participant_mut(Color::Blue).pieces[0] = Piece::unlocked_at(Color::Blue, 1, FINISH_LINE);
        let room_id = room.id;
        let _handle = registry.start_room(room, Box::new(ScriptedDice(VecDeque::new()))).await;
        assert_eq!(next_turn(&mut rx).await, Color::Blue);

        let (color, snapshot) = registry.rejoin(&PlayerId::new("alice")).await.unwrap();
        assert_eq!(color, Color::Blue);
        assert_eq!(snapshot.room_id, room_id);
        assert_eq!(snapshot.seats[0].pieces[0].position, Some(FINISH_LINE));
        assert!(registry.rejoin(&PlayerId::new("stranger")).await.is_none());
        registry.shutdown();
    }
}
