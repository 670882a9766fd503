//! WebSocket Game Server
//!
//! Async WebSocket front for the room engine. Authenticates each
//! connection, binds it in the client directory, then either routes it back
//! into its running room or queues it for a match.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};
use tracing::{debug, error, info, instrument, warn};

use crate::game::state::PlayerIdentity;
use crate::game::turn::TurnTimings;
use crate::network::auth::{bearer_token, validate_token, AuthConfig, AuthError};
use crate::network::matchmaking::{Matchmaker, MatchmakingConfig};
use crate::network::protocol::{ClientMessage, ErrorCode, ServerMessage};
use crate::network::session::{ClientDirectory, RoomRegistry, SessionError, CLIENT_CHANNEL_CAPACITY};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// How long a connection without a bearer header has to send `auth`.
    pub auth_timeout: Duration,
    /// Turn timings for every room.
    pub timings: TurnTimings,
    /// Queue backfill settings.
    pub matchmaking: MatchmakingConfig,
    /// Token validation settings.
    pub auth: AuthConfig,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 9000)),
            max_connections: 1000,
            auth_timeout: Duration::from_secs(10),
            timings: TurnTimings::default(),
            matchmaking: MatchmakingConfig::default(),
            auth: AuthConfig::default(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(addr) = std::env::var("BIND_ADDR").ok().and_then(|v| v.parse().ok()) {
            config.bind_addr = addr;
        }
        if let Some(port) = std::env::var("PORT").ok().and_then(|v| v.parse().ok()) {
            config.bind_addr.set_port(port);
        }
        if let Some(max) = std::env::var("MAX_CONNECTIONS").ok().and_then(|v| v.parse().ok()) {
            config.max_connections = max;
        }

        config.timings = TurnTimings::from_env();
        config.matchmaking = MatchmakingConfig::from_env();
        config.auth = AuthConfig::from_env();
        config
    }
}

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Connection limit reached.
    #[error("Connection limit reached")]
    ConnectionLimitReached,

    /// Session error.
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Shared handles each connection task needs.
#[derive(Clone)]
struct ConnectionContext {
    config: ServerConfig,
    clients: Arc<ClientDirectory>,
    rooms: Arc<RoomRegistry>,
    matchmaker: Matchmaker,
}

/// Decrements the live connection count when a connection task ends.
struct ConnectionGuard(Arc<AtomicUsize>);

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// The game server.
pub struct GameServer {
    context: ConnectionContext,
    connections: Arc<AtomicUsize>,
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new game server.
    pub fn new(config: ServerConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let clients = Arc::new(ClientDirectory::new());
        let rooms = Arc::new(RoomRegistry::new(clients.clone(), config.timings));
        let matchmaker = Matchmaker::new(rooms.clone(), config.matchmaking);

        Self {
            context: ConnectionContext { config, clients, rooms, matchmaker },
            connections: Arc::new(AtomicUsize::new(0)),
            shutdown_tx,
        }
    }

    /// Bind the configured address and serve until shutdown.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.context.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GameServerError> {
        info!("Game server v{} listening on {}", self.context.config.version, listener.local_addr()?);

        if !self.context.config.auth.is_configured() {
            warn!("no AUTH_SECRET or AUTH_PUBLIC_KEY_PEM set, every connection will be refused");
        }

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            debug!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        self.context.rooms.shutdown();
        Ok(())
    }

    /// Spawn the task for one connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let over_limit = self.connections.fetch_add(1, Ordering::Relaxed) >= self.context.config.max_connections;
        let guard = ConnectionGuard(self.connections.clone());
        let context = self.context.clone();
        let shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let _guard = guard;
            if let Err(e) = Self::serve_client(context, stream, addr, over_limit, shutdown_rx).await {
                debug!("Connection {} ended with error: {}", addr, e);
            }
        });
    }

    async fn serve_client(
        context: ConnectionContext,
        stream: TcpStream,
        addr: SocketAddr,
        over_limit: bool,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<(), GameServerError> {
        let mut header_token = None;
        let ws_stream = accept_hdr_async(stream, |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            header_token = request.headers()
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(bearer_token)
                .map(str::to_owned);
            Ok(response)
        }).await?;

        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(CLIENT_CHANNEL_CAPACITY);

        // Spawn message sender task
        let mut sender_task = tokio::spawn(async move {
            while let Some(msg) = msg_rx.recv().await {
                let text = match msg.to_json() {
                    Ok(t) => t,
                    Err(e) => {
                        error!("Failed to serialize message: {}", e);
                        continue;
                    }
                };
                if ws_sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            let _ = ws_sender.close().await;
        });

        if over_limit {
            warn!("Connection limit reached, rejecting {}", addr);
            let _ = msg_tx.send(ServerMessage::error(ErrorCode::ServerOverloaded, "server is full")).await;
            drop(msg_tx);
            let _ = timeout(Duration::from_secs(1), sender_task).await;
            return Err(GameServerError::ConnectionLimitReached);
        }

        let identity = match Self::authenticate(header_token, &mut ws_receiver, &context.config).await {
            Ok(identity) => identity,
            Err(reply) => {
                debug!("Authentication failed for {}: {:?}", addr, reply);
                let _ = msg_tx.send(reply).await;
                drop(msg_tx);
                let _ = timeout(Duration::from_secs(1), sender_task).await;
                return Ok(());
            }
        };

        let player_id = identity.id.clone();
        let binding = context.clients.bind(identity.clone(), msg_tx.clone()).await;
        let connection_id = binding.connection_id;
        let mut displaced = binding.displaced;
        info!(%player_id, tier = %identity.tier, "Client {} authenticated", addr);
        let _ = msg_tx.send(ServerMessage::Status(format!("welcome {}", identity.username))).await;

        Self::place(&context, &identity, &msg_tx).await;

        // Handle incoming messages
        loop {
            tokio::select! {
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            match ClientMessage::from_json(&text) {
                                Ok(client_msg) => Self::handle_client_message(&context, &identity, client_msg, &msg_tx).await,
                                Err(e) => {
                                    debug!("Invalid message from {}: {}", addr, e);
                                    let _ = msg_tx.send(ServerMessage::error(
                                        ErrorCode::InvalidMessage,
                                        "Invalid message format",
                                    )).await;
                                }
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            debug!("Client {} disconnected", addr);
                            break;
                        }
                        Some(Err(e)) => {
                            warn!("WebSocket error for {}: {}", addr, e);
                            break;
                        }
                        _ => {}
                    }
                }
                _ = &mut displaced => {
                    debug!(%player_id, "Client {} replaced by a newer connection", addr);
                    break;
                }
                _ = shutdown_rx.recv() => {
                    if context.rooms.room_of(&player_id).await.is_none() {
                        let _ = msg_tx.send(ServerMessage::Shutdown {
                            reason: "server shutting down".to_string(),
                        }).await;
                    }
                    break;
                }
            }
        }

        // Cleanup
        if context.clients.unregister(&player_id, connection_id).await {
            context.matchmaker.dequeue(&player_id).await;
        }
        drop(msg_tx);
        if timeout(Duration::from_secs(1), &mut sender_task).await.is_err() {
            sender_task.abort();
        }

        info!(%player_id, "Client {} cleaned up", addr);
        Ok(())
    }

    /// Resolve the connection's identity from the handshake header or the
    /// first message. On failure returns the error to send before closing.
    async fn authenticate(
        header_token: Option<String>,
        receiver: &mut SplitStream<WebSocketStream<TcpStream>>,
        config: &ServerConfig,
    ) -> Result<PlayerIdentity, ServerMessage> {
        let token = match header_token {
            Some(token) => token,
            None => Self::await_auth_message(receiver, config.auth_timeout).await?,
        };

        validate_token(&token, &config.auth)
            .map(|claims| claims.identity())
            .map_err(|e| {
                let code = match e {
                    AuthError::Expired => ErrorCode::TokenExpired,
                    AuthError::NotConfigured => ErrorCode::AuthFailed,
                    _ => ErrorCode::InvalidToken,
                };
                ServerMessage::error(code, e.to_string())
            })
    }

    async fn await_auth_message(
        receiver: &mut SplitStream<WebSocketStream<TcpStream>>,
        wait: Duration,
    ) -> Result<String, ServerMessage> {
        let not_authenticated = || ServerMessage::error(ErrorCode::NotAuthenticated, "authenticate first");

        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let msg = match tokio::time::timeout_at(deadline, receiver.next()).await {
                Ok(Some(Ok(msg))) => msg,
                _ => return Err(not_authenticated()),
            };
            match msg {
                Message::Text(text) => {
                    return match ClientMessage::from_json(&text) {
                        Ok(ClientMessage::Auth { token }) => Ok(token),
                        _ => Err(not_authenticated()),
                    };
                }
                Message::Close(_) => return Err(not_authenticated()),
                _ => continue,
            }
        }
    }

    /// Send a reconnecting player back to their room or queue spot, or
    /// queue them.
    async fn place(context: &ConnectionContext, identity: &PlayerIdentity, sender: &mpsc::Sender<ServerMessage>) {
        if let Some((color, snapshot)) = context.rooms.rejoin(&identity.id).await {
            info!(player_id = %identity.id, room_id = %snapshot.room_id, "player rejoined room");
            let _ = sender.send(ServerMessage::MyColor(color)).await;
            let _ = sender.send(ServerMessage::Sync(snapshot)).await;
            return;
        }

        if let Some(status) = context.matchmaker.queue_status(&identity.id).await {
            debug!(player_id = %identity.id, tier = %status.tier, "player still queued");
            let _ = sender.send(ServerMessage::Queue(status)).await;
            return;
        }

        if let Err(e) = context.matchmaker.enqueue(identity).await {
            debug!(player_id = %identity.id, error = %e, "not queued");
            let _ = sender.send(ServerMessage::error(e.code(), e.to_string())).await;
        }
    }

    /// Handle a client message.
    async fn handle_client_message(
        context: &ConnectionContext,
        identity: &PlayerIdentity,
        msg: ClientMessage,
        sender: &mpsc::Sender<ServerMessage>,
    ) {
        match msg {
            ClientMessage::Roll { .. } | ClientMessage::Move { .. } => {
                if !context.rooms.submit(&identity.id, &msg).await {
                    debug!(player_id = %identity.id, ?msg, "action ignored");
                }
            }
            ClientMessage::Ping { timestamp } => {
                let server_time = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_millis() as u64;
                let _ = sender.send(ServerMessage::Pong { timestamp, server_time }).await;
            }
            ClientMessage::Auth { .. } => {
                debug!(player_id = %identity.id, "already authenticated");
            }
        }
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Live connection count.
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    /// Authenticated player count.
    pub async fn player_count(&self) -> usize {
        self.context.clients.len().await
    }

    /// Running room count.
    pub async fn room_count(&self) -> usize {
        self.context.rooms.room_count().await
    }
}
