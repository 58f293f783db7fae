//! Protocol Client
//!
//! WebSocket connection to the game server. Decodes inbound frames,
//! applies them to the shared [`GameSession`], republishes the resulting
//! domain events and sends outbound actions.
//!
//! One reader loop per connection processes frames in order. Writes go
//! through an mpsc channel to a writer task; the heartbeat runs as a
//! third task. A dropped connection invalidates the session and the
//! client reconnects with exponential backoff until shut down.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, instrument, warn};

#[cfg(feature = "debug-tracing")]
use tracing::trace;

use crate::game::events::GameEvent;
use crate::network::auth::{TokenError, TokenSource};
use crate::network::frame::{Frame, FrameError, Packet};
use crate::network::protocol::{ack_result, ClientRequest, ProtocolError, ServerEvent};
use crate::network::session::{ActionError, GameSession, SessionError};
use crate::proof::crash::DEFAULT_CLIENT_SEED;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket endpoint, including the Engine.IO query.
    pub url: String,
    /// Join token source.
    pub token: TokenSource,
    /// Public client seed used for crash verification.
    pub client_seed: String,
    /// First reconnect delay.
    pub reconnect_base: Duration,
    /// Longest reconnect delay.
    pub reconnect_max: Duration,
    /// Domain event channel capacity.
    pub event_capacity: usize,
    /// Outgoing frame queue capacity.
    pub outgoing_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080/socket.io/?EIO=3&transport=websocket".to_string(),
            token: TokenSource::None,
            client_seed: DEFAULT_CLIENT_SEED.to_string(),
            reconnect_base: Duration::from_millis(500),
            reconnect_max: Duration::from_secs(30),
            event_capacity: 256,
            outgoing_capacity: 64,
        }
    }
}

impl ClientConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let millis = |key: &str| {
            std::env::var(key)
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_millis)
        };

        Self {
            url: std::env::var("CRASHPOINT_URL").unwrap_or(defaults.url),
            token: TokenSource::from_env(),
            client_seed: std::env::var("CRASHPOINT_CLIENT_SEED").unwrap_or(defaults.client_seed),
            reconnect_base: millis("CRASHPOINT_RECONNECT_MS").unwrap_or(defaults.reconnect_base),
            reconnect_max: millis("CRASHPOINT_RECONNECT_MAX_MS").unwrap_or(defaults.reconnect_max),
            event_capacity: defaults.event_capacity,
            outgoing_capacity: defaults.outgoing_capacity,
        }
    }
}

/// Delay before reconnect attempt `attempt` (0-based).
pub fn backoff(base: Duration, max: Duration, attempt: u32) -> Duration {
    base.saturating_mul(1u32 << attempt.min(16)).min(max)
}

/// Client errors.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Token exchange failed.
    #[error("Token error: {0}")]
    Token(#[from] TokenError),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Undecodable frame.
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    /// Undecodable or rejected payload.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Event broke a session invariant.
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Action rejected locally.
    #[error("Action rejected: {0}")]
    Action(#[from] ActionError),

    /// No open connection.
    #[error("Not connected")]
    NotConnected,

    /// Server ended the connection.
    #[error("Connection closed: {0}")]
    Closed(String),
}

/// The protocol client.
pub struct ProtocolClient {
    /// Client configuration.
    config: ClientConfig,
    /// Shared session state.
    session: Arc<RwLock<GameSession>>,
    /// Domain event channel.
    events_tx: broadcast::Sender<GameEvent>,
    /// Writer queue of the live connection.
    outgoing: RwLock<Option<mpsc::Sender<String>>>,
    /// Requests awaiting an ack, by ack id.
    pending: Mutex<BTreeMap<u64, ClientRequest>>,
    /// Next ack id.
    next_ack: AtomicU64,
    /// Token for the current connection.
    ott: RwLock<Option<String>>,
    /// Writer and heartbeat tasks of the live connection.
    tasks: Mutex<Vec<JoinHandle<()>>>,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl ProtocolClient {
    /// Create a client with a fresh session.
    pub fn new(config: ClientConfig) -> Self {
        let session = GameSession::new(config.client_seed.clone());
        Self::with_session(config, session)
    }

    /// Create a client around an existing session.
    pub fn with_session(config: ClientConfig, session: GameSession) -> Self {
        let (events_tx, _) = broadcast::channel(config.event_capacity);
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            session: Arc::new(RwLock::new(session)),
            events_tx,
            outgoing: RwLock::new(None),
            pending: Mutex::new(BTreeMap::new()),
            next_ack: AtomicU64::new(0),
            ott: RwLock::new(None),
            tasks: Mutex::new(Vec::new()),
            shutdown_tx,
        }
    }

    /// Subscribe to domain events.
    pub fn subscribe(&self) -> broadcast::Receiver<GameEvent> {
        self.events_tx.subscribe()
    }

    /// Shared session, for queries.
    pub fn session(&self) -> Arc<RwLock<GameSession>> {
        self.session.clone()
    }

    /// Stop [`run`](Self::run).
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Connect and keep reconnecting until shut down.
    #[instrument(skip(self), fields(url = %self.config.url))]
    pub async fn run(&self) -> Result<(), ClientError> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut attempt = 0u32;

        loop {
            tokio::select! {
                result = self.connect_once() => {
                    match result {
                        Ok(reason) => {
                            info!("Disconnected: {}", reason);
                            self.on_disconnect(&reason).await;
                            attempt = 0;
                        }
                        Err(e) => {
                            warn!("Connection failed: {}", e);
                            self.on_disconnect(&e.to_string()).await;
                            attempt = attempt.saturating_add(1);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }

            let delay = backoff(self.config.reconnect_base, self.config.reconnect_max, attempt);
            debug!("Reconnecting in {:?}", delay);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        self.on_disconnect("shutdown").await;
        Ok(())
    }

    /// One connection, from handshake to close. Returns the close reason.
    async fn connect_once(&self) -> Result<String, ClientError> {
        let token = self.config.token.fetch().await?;
        *self.ott.write().await = token;

        let (ws_stream, _) = connect_async(self.config.url.as_str()).await?;
        info!("Connected to {}", self.config.url);

        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let (msg_tx, mut msg_rx) = mpsc::channel::<String>(self.config.outgoing_capacity);

        // Spawn message sender task
        let sender_task = tokio::spawn(async move {
            while let Some(text) = msg_rx.recv().await {
                #[cfg(feature = "debug-tracing")]
                trace!("-> {}", text);
                if ws_sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            let _ = ws_sender.close().await;
        });
        self.tasks.lock().await.push(sender_task);
        self.attach(msg_tx).await;

        let reason = loop {
            match ws_receiver.next().await {
                Some(Ok(Message::Text(text))) => match self.handle_text(&text).await {
                    Ok(()) => {}
                    Err(ClientError::Closed(reason)) => break reason,
                    Err(e) => warn!("{}", e),
                },
                Some(Ok(Message::Close(frame))) => {
                    break frame
                        .map(|f| f.reason.to_string())
                        .filter(|reason| !reason.is_empty())
                        .unwrap_or_else(|| "closed by server".to_string());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
                None => break "stream ended".to_string(),
            }
        };

        Ok(reason)
    }

    async fn attach(&self, sender: mpsc::Sender<String>) {
        *self.outgoing.write().await = Some(sender);
    }

    /// Tear down the connection state and invalidate the session.
    async fn on_disconnect(&self, reason: &str) {
        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
        let was_connected = self.outgoing.write().await.take().is_some();
        self.pending.lock().await.clear();
        self.session.write().await.invalidate();

        if was_connected {
            self.publish(GameEvent::Disconnected {
                reason: reason.to_string(),
            });
        }
    }

    fn publish(&self, event: GameEvent) {
        debug!(event = event.name(), game_id = ?event.game_id(), "Publishing event");
        // No subscribers is not an error.
        let _ = self.events_tx.send(event);
    }

    // =========================================================================
    // INBOUND
    // =========================================================================

    /// Process one inbound text frame.
    pub async fn handle_text(&self, text: &str) -> Result<(), ClientError> {
        #[cfg(feature = "debug-tracing")]
        trace!("<- {}", text);

        match Frame::decode(text)? {
            Frame::Open(handshake) => {
                debug!(
                    "Engine open: sid {} ping {} ms",
                    handshake.sid, handshake.ping_interval
                );
                self.start_heartbeat(Duration::from_millis(handshake.ping_interval))
                    .await;
            }
            Frame::Ping(payload) => self.send_text(Frame::Pong(payload).encode()).await?,
            Frame::Pong(_) | Frame::Upgrade | Frame::Noop => {}
            Frame::Close => return Err(ClientError::Closed("engine close".to_string())),
            Frame::Message(packet) => self.handle_packet(packet).await?,
        }
        Ok(())
    }

    async fn handle_packet(&self, packet: Packet) -> Result<(), ClientError> {
        match packet {
            Packet::Connect => {
                let ott = self.ott.read().await.clone();
                self.send_request(ClientRequest::Join { ott }).await?;
            }
            Packet::Disconnect => {
                return Err(ClientError::Closed("socket disconnected".to_string()));
            }
            Packet::Event { name, args, .. } => {
                let Some(event) = ServerEvent::decode(&name, &args)? else {
                    debug!("Ignoring event {}", name);
                    return Ok(());
                };
                let applied = self.session.write().await.apply(event);
                self.publish(applied?);
            }
            Packet::Ack { id, args } => self.handle_ack(id, &args).await?,
            Packet::Error(value) => warn!("Socket error: {}", value),
        }
        Ok(())
    }

    async fn handle_ack(&self, id: u64, args: &[serde_json::Value]) -> Result<(), ClientError> {
        let Some(request) = self.pending.lock().await.remove(&id) else {
            debug!("Ack {} matches no request", id);
            return Ok(());
        };

        if let Err(e) = ack_result(request.name(), args) {
            self.session.write().await.on_action_rejected(&request);
            return Err(e.into());
        }

        match request {
            ClientRequest::Join { .. } => {
                let snapshot = args.get(1..).unwrap_or_default();
                if let Some(event) = ServerEvent::decode("join", snapshot)? {
                    let applied = self.session.write().await.apply(event);
                    self.publish(applied?);
                }
            }
            other => debug!("{} acknowledged", other.name()),
        }
        Ok(())
    }

    async fn start_heartbeat(&self, period: Duration) {
        if period.is_zero() {
            return;
        }
        let Some(sender) = self.outgoing.read().await.clone() else {
            return;
        };

        let heartbeat = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if sender.send(Frame::Ping(String::new()).encode()).await.is_err() {
                    break;
                }
            }
        });
        self.tasks.lock().await.push(heartbeat);
    }

    // =========================================================================
    // OUTBOUND
    // =========================================================================

    /// Place a bet for the next round.
    #[instrument(skip(self))]
    pub async fn place_bet(&self, amount: u64, auto_cashout: u64) -> Result<(), ClientError> {
        let request = self
            .session
            .write()
            .await
            .begin_place_bet(amount, auto_cashout)?;
        self.dispatch_action(request).await
    }

    /// Cash out the current bet.
    #[instrument(skip(self))]
    pub async fn request_cashout(&self) -> Result<(), ClientError> {
        let request = self.session.write().await.begin_cashout()?;
        self.dispatch_action(request).await
    }

    /// Change the auto cashout of the current bet.
    #[instrument(skip(self))]
    pub async fn set_auto_cashout(&self, factor: u64) -> Result<(), ClientError> {
        let request = self.session.write().await.set_auto_cashout(factor)?;
        self.dispatch_action(request).await
    }

    async fn dispatch_action(&self, request: ClientRequest) -> Result<(), ClientError> {
        if let Err(e) = self.send_request(request.clone()).await {
            warn!("{} not sent: {}", request.name(), e);
            self.session.write().await.on_action_rejected(&request);
            return Err(e);
        }
        Ok(())
    }

    async fn send_request(&self, request: ClientRequest) -> Result<(), ClientError> {
        let id = if request.expects_ack() {
            let id = self.next_ack.fetch_add(1, Ordering::Relaxed);
            self.pending.lock().await.insert(id, request.clone());
            Some(id)
        } else {
            None
        };

        let text = Frame::event(request.name(), id, request.args()).encode();
        if let Err(e) = self.send_text(text).await {
            if let Some(id) = id {
                self.pending.lock().await.remove(&id);
            }
            return Err(e);
        }
        Ok(())
    }

    async fn send_text(&self, text: String) -> Result<(), ClientError> {
        let sender = self
            .outgoing
            .read()
            .await
            .clone()
            .ok_or(ClientError::NotConnected)?;
        sender.send(text).await.map_err(|_| ClientError::NotConnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::{RoundState, UserState};
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    const SNAPSHOT: &str = concat!(
        r#"{"state":"ENDED","game_id":10,"#,
        r#""last_hash":"bdbda14ce533755e384b3759752deb1d56ade35175b2a2d982c4587b858e029d","#,
        r#""elapsed":0,"username":"alice","balance_satoshis":10000,"#,
        r#""player_info":{},"joined":[],"table_history":[]}"#,
    );

    async fn attached_client() -> (
        ProtocolClient,
        mpsc::Receiver<String>,
        broadcast::Receiver<GameEvent>,
    ) {
        let client = ProtocolClient::new(ClientConfig::default());
        let (tx, rx) = mpsc::channel(16);
        client.attach(tx).await;
        let events = client.subscribe();
        (client, rx, events)
    }

    /// Attached client that has joined round 10 as alice.
    async fn joined_client() -> (
        ProtocolClient,
        mpsc::Receiver<String>,
        broadcast::Receiver<GameEvent>,
    ) {
        let (client, mut rx, mut events) = attached_client().await;
        client.handle_text("40").await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), r#"420["join",{}]"#);
        client
            .handle_text(&format!("430[null,{}]", SNAPSHOT))
            .await
            .unwrap();
        assert!(matches!(events.recv().await.unwrap(), GameEvent::Join(_)));
        (client, rx, events)
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let base = Duration::from_millis(500);
        let max = Duration::from_secs(30);
        assert_eq!(backoff(base, max, 0), Duration::from_millis(500));
        assert_eq!(backoff(base, max, 3), Duration::from_secs(4));
        assert_eq!(backoff(base, max, 10), max);
        assert_eq!(backoff(base, max, u32::MAX), max);
    }

    #[tokio::test]
    async fn test_connect_sends_join_with_token() {
        let (client, mut rx, _events) = attached_client().await;
        *client.ott.write().await = Some("tok".to_string());

        client.handle_text("40").await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), r#"420["join",{"ott":"tok"}]"#);
        assert_eq!(client.pending.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_join_ack_syncs_session() {
        let (client, _rx, _events) = joined_client().await;

        let session = client.session();
        let session = session.read().await;
        assert!(session.is_synced());
        assert_eq!(session.username(), Some("alice"));
        assert_eq!(session.balance(), Some(10_000));
        assert_eq!(session.round().unwrap().state, RoundState::Ended);
        assert!(client.pending.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_events_are_published() {
        let (client, _rx, mut events) = joined_client().await;

        client
            .handle_text(r#"42["game_starting",{"game_id":11,"time_till_start":5000}]"#)
            .await
            .unwrap();
        let event = events.recv().await.unwrap();
        assert!(matches!(event, GameEvent::GameStarting { game_id: 11, .. }));

        client
            .handle_text(r#"42["player_bet",{"username":"bob","bet":300}]"#)
            .await
            .unwrap();
        let event = events.recv().await.unwrap();
        assert!(matches!(event, GameEvent::PlayerBet { local: false, bet: 300, .. }));

        // Unrelated events pass through silently.
        client.handle_text(r#"42["msg",{"message":"hi"}]"#).await.unwrap();
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_session_error_surfaces() {
        let (client, _rx, mut events) = joined_client().await;
        let result = client.handle_text(r#"42["game_tick",{"elapsed":150}]"#).await;
        assert!(matches!(result, Err(ClientError::Session(SessionError::WrongState { .. }))));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_place_bet_rejected_by_server() {
        let (client, mut rx, _events) = joined_client().await;
        client
            .handle_text(r#"42["game_starting",{"game_id":11,"time_till_start":5000}]"#)
            .await
            .unwrap();

        client.place_bet(1000, 200).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), r#"421["place_bet",1000,200]"#);
        assert_eq!(client.session().read().await.user_state(), UserState::Placing);

        let result = client.handle_text(r#"431["GAME_IN_PROGRESS"]"#).await;
        assert!(matches!(result, Err(ClientError::Protocol(ProtocolError::Rejected { .. }))));
        assert_eq!(client.session().read().await.user_state(), UserState::Watching);
    }

    #[tokio::test]
    async fn test_set_auto_cashout_has_no_ack_id() {
        let (client, mut rx, _events) = joined_client().await;
        client
            .handle_text(r#"42["game_starting",{"game_id":11,"time_till_start":5000}]"#)
            .await
            .unwrap();
        client
            .handle_text(r#"42["player_bet",{"username":"alice","bet":1000}]"#)
            .await
            .unwrap();

        client.set_auto_cashout(300).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), r#"42["set_auto_cash_out",300]"#);
        assert!(client.pending.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_local_rejection_sends_nothing() {
        let (client, mut rx, _events) = joined_client().await;
        let result = client.request_cashout().await;
        assert!(matches!(result, Err(ClientError::Action(ActionError::InvalidState { .. }))));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_action_without_connection_rolls_back() {
        let (client, rx, _events) = joined_client().await;
        client
            .handle_text(r#"42["game_starting",{"game_id":11,"time_till_start":5000}]"#)
            .await
            .unwrap();
        drop(rx);
        *client.outgoing.write().await = None;

        let result = client.place_bet(500, 150).await;
        assert!(matches!(result, Err(ClientError::NotConnected)));
        assert_eq!(client.session().read().await.user_state(), UserState::Watching);
        assert!(client.pending.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_ping_answered() {
        let (client, mut rx, _events) = attached_client().await;
        client.handle_text("2").await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), "3");
    }

    #[tokio::test]
    async fn test_disconnect_invalidates() {
        let (client, _rx, mut events) = joined_client().await;
        client.on_disconnect("test").await;

        let event = events.recv().await.unwrap();
        assert_eq!(
            event,
            GameEvent::Disconnected {
                reason: "test".to_string()
            }
        );
        assert!(!client.session().read().await.is_synced());
        assert!(matches!(client.handle_text("2").await, Err(ClientError::NotConnected)));
    }

    #[tokio::test]
    async fn test_close_frames_end_connection() {
        let (client, _rx, _events) = attached_client().await;
        assert!(matches!(client.handle_text("1").await, Err(ClientError::Closed(_))));
        assert!(matches!(client.handle_text("41").await, Err(ClientError::Closed(_))));
        assert!(matches!(client.handle_text("x").await, Err(ClientError::Frame(_))));
    }

    #[tokio::test]
    async fn test_run_against_socket_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let open = r#"0{"sid":"s1","upgrades":[],"pingInterval":25000,"pingTimeout":60000}"#;
            ws.send(Message::Text(open.to_string()))
            .await
            .unwrap();
            ws.send(Message::Text("40".to_string())).await.unwrap();

            let join = ws.next().await.unwrap().unwrap();
            assert_eq!(join.into_text().unwrap(), r#"420["join",{}]"#);

            ws.send(Message::Text(format!("430[null,{}]", SNAPSHOT)))
                .await
                .unwrap();
            ws.send(Message::Text(
                r#"42["game_starting",{"game_id":11,"time_till_start":5000}]"#.to_string(),
            ))
            .await
            .unwrap();
            ws.close(None).await.unwrap();
        });

        let client = Arc::new(ProtocolClient::new(ClientConfig {
            url: format!("ws://{}/socket.io/?EIO=3&transport=websocket", addr),
            reconnect_base: Duration::from_millis(50),
            ..Default::default()
        }));
        let mut events = client.subscribe();
        let runner = {
            let client = client.clone();
            tokio::spawn(async move { client.run().await })
        };

        let wait = Duration::from_secs(5);
        let join = timeout(wait, events.recv()).await.unwrap().unwrap();
        assert!(matches!(join, GameEvent::Join(_)));
        let starting = timeout(wait, events.recv()).await.unwrap().unwrap();
        assert!(matches!(starting, GameEvent::GameStarting { game_id: 11, .. }));
        let dropped = timeout(wait, events.recv()).await.unwrap().unwrap();
        assert!(matches!(dropped, GameEvent::Disconnected { .. }));
        assert!(!client.session().read().await.is_synced());

        server.await.unwrap();
        client.shutdown();
        timeout(wait, runner).await.unwrap().unwrap().unwrap();
    }
}
