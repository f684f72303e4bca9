//! Duplex push channel
//!
//! One connection task per session owns the websocket. It identifies the
//! participant, replays joined conversations after every (re)connect, sends
//! heartbeats, and fans pushed events out to listeners. Nothing is promised
//! across a disconnect gap: consumers resync on `Connected { reconnected: true }`.

pub mod protocol;
pub mod socket;

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

use crate::config::Config;
use crate::error::TransportError;
use crate::models::{ConversationId, ParticipantId};
use crate::sync::ConversationScope;

pub use protocol::{parse_frame, ChannelEvent, EventKind, InboundEvent, OutboundEvent};
use socket::ChannelSocket;

/// Buffered events per subscriber before it starts lagging.
const EVENT_BUFFER: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Connecting,
    Disconnected,
}

#[derive(Debug, Clone)]
pub struct ChannelSettings {
    pub url: String,
    pub heartbeat: Duration,
    pub max_backoff: Duration,
    /// A session that lived this long resets the backoff.
    pub stability: Duration,
}

impl ChannelSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            url: config.socket_url.clone(),
            heartbeat: config.sync.heartbeat(),
            max_backoff: Duration::from_secs(config.sync.max_backoff_secs.max(1)),
            stability: Duration::from_secs(config.sync.stability_secs),
        }
    }

    /// Channel URL with the session's routing parameters.
    fn endpoint(&self, identity: &ParticipantId, epid: &str) -> Result<url::Url> {
        let mut url = url::Url::parse(&self.url)
            .with_context(|| format!("Invalid socket URL {}", self.url))?;
        url.query_pairs_mut()
            .append_pair("participant", identity.as_str())
            .append_pair("epid", epid);
        Ok(url)
    }
}

type Callback = Arc<dyn Fn(&ChannelEvent) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    by_kind: Mutex<HashMap<EventKind, Vec<Callback>>>,
}

impl Listeners {
    fn add(&self, kind: EventKind, callback: Callback) {
        let mut map = self.by_kind.lock().unwrap_or_else(|e| e.into_inner());
        map.entry(kind).or_default().push(callback);
    }

    fn dispatch(&self, event: &ChannelEvent) {
        // Clone out so callbacks may register further listeners.
        let callbacks = {
            let map = self.by_kind.lock().unwrap_or_else(|e| e.into_inner());
            map.get(&event.kind()).cloned().unwrap_or_default()
        };
        for callback in callbacks {
            callback(event);
        }
    }
}

enum Command {
    Send(OutboundEvent),
    Disconnect,
}

/// Reason one session ended.
enum DisconnectReason {
    /// Caller asked to disconnect. Do not reconnect.
    Shutdown,
    /// Error or server-initiated close. Should reconnect.
    Error(anyhow::Error),
}

/// Connection Manager before its task is started.
///
/// Listeners and subscribers registered here see every event, including the
/// first `Connected` and any `ConnectFailed` of the first attempt.
pub struct ConnectionManager {
    settings: ChannelSettings,
    identity: ParticipantId,
    events: broadcast::Sender<ChannelEvent>,
    listeners: Arc<Listeners>,
}

impl ConnectionManager {
    pub fn new(settings: ChannelSettings, identity: ParticipantId) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            settings,
            identity,
            events,
            listeners: Arc::new(Listeners::default()),
        }
    }

    /// Register `callback` for every event of `kind`.
    pub fn on<F>(&self, kind: EventKind, callback: F)
    where
        F: Fn(&ChannelEvent) + Send + Sync + 'static,
    {
        self.listeners.add(kind, Arc::new(callback));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events.subscribe()
    }

    /// Start the connection task.
    pub fn connect(self) -> ConnectionHandle {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Connecting);
        let joined = Arc::new(Mutex::new(BTreeSet::new()));

        let channel = Channel {
            settings: self.settings,
            identity: self.identity,
            epid: uuid::Uuid::new_v4().to_string(),
            commands: cmd_rx,
            events: self.events.clone(),
            status: status_tx,
            listeners: Arc::clone(&self.listeners),
            joined: Arc::clone(&joined),
        };
        let task = tokio::spawn(channel.run());

        ConnectionHandle {
            commands: cmd_tx,
            events: self.events,
            status: status_rx,
            listeners: self.listeners,
            joined,
            task: Mutex::new(Some(task)),
        }
    }
}

/// Caller side of a running channel.
pub struct ConnectionHandle {
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<ChannelEvent>,
    status: watch::Receiver<ConnectionStatus>,
    listeners: Arc<Listeners>,
    joined: Arc<Mutex<BTreeSet<ConversationId>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionHandle {
    /// Register `callback` for every later event of `kind`.
    ///
    /// Events emitted before registration are not replayed; register on the
    /// [`ConnectionManager`] to see them all.
    pub fn on<F>(&self, kind: EventKind, callback: F)
    where
        F: Fn(&ChannelEvent) + Send + Sync + 'static,
    {
        self.listeners.add(kind, Arc::new(callback));
    }

    /// Receive every later event. A receiver that falls behind gets `Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events.subscribe()
    }

    /// Queue an outbound event. Dropped if the channel is down at send time.
    pub fn send(&self, event: OutboundEvent) -> Result<(), TransportError> {
        self.commands
            .send(Command::Send(event))
            .map_err(|_| TransportError::Channel("connection task stopped".to_string()))
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    pub fn status_changes(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Scope live delivery to `conversation`. Re-joining is a no-op.
    pub fn join_conversation(&self, conversation: &ConversationId) {
        let inserted = self
            .joined
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(conversation.clone());
        // While not connected the join is replayed on connect instead.
        if inserted && self.status() == ConnectionStatus::Connected {
            if let Err(e) = self.send(OutboundEvent::JoinConversation(conversation.clone())) {
                tracing::warn!("Join {} not sent: {}", conversation, e);
            }
        }
    }

    pub fn leave_conversation(&self, conversation: &ConversationId) {
        let removed = self
            .joined
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(conversation);
        if removed && self.status() == ConnectionStatus::Connected {
            if let Err(e) = self.send(OutboundEvent::LeaveConversation(conversation.clone())) {
                tracing::warn!("Leave {} not sent: {}", conversation, e);
            }
        }
    }

    /// Close the channel and wait for the connection task to finish.
    pub async fn disconnect(&self) {
        let _ = self.commands.send(Command::Disconnect);
        let task = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!("Connection task ended abnormally: {}", e);
            }
        }
    }
}

impl ConversationScope for ConnectionHandle {
    fn join(&self, conversation: &ConversationId) {
        self.join_conversation(conversation);
    }

    fn leave(&self, conversation: &ConversationId) {
        self.leave_conversation(conversation);
    }
}

/// State owned by the connection task.
struct Channel {
    settings: ChannelSettings,
    identity: ParticipantId,
    /// Endpoint id for this client session, stable across reconnects.
    epid: String,
    commands: mpsc::UnboundedReceiver<Command>,
    events: broadcast::Sender<ChannelEvent>,
    status: watch::Sender<ConnectionStatus>,
    listeners: Arc<Listeners>,
    joined: Arc<Mutex<BTreeSet<ConversationId>>>,
}

impl Channel {
    /// Run sessions with automatic reconnection.
    ///
    /// Backoff doubles from 1s up to the configured cap and resets after a
    /// session that stayed up past the stability threshold.
    async fn run(mut self) {
        let mut backoff = Duration::from_secs(1);
        let mut ever_connected = false;

        loop {
            self.set_status(ConnectionStatus::Connecting);
            let started = Instant::now();
            let (reason, connected) = self.session(ever_connected).await;
            self.set_status(ConnectionStatus::Disconnected);

            let e = match reason {
                DisconnectReason::Shutdown => {
                    tracing::info!("Channel closed");
                    return;
                }
                DisconnectReason::Error(e) => e,
            };

            let reason = format!("{:#}", e);
            if connected {
                ever_connected = true;
                self.emit(ChannelEvent::Disconnected { reason });
                if started.elapsed() >= self.settings.stability {
                    backoff = Duration::from_secs(1);
                }
            } else {
                self.emit(ChannelEvent::ConnectFailed { reason });
            }

            tracing::warn!(
                "Channel disconnected: {:#}. Reconnecting in {}s...",
                e,
                backoff.as_secs()
            );

            if !self.idle(backoff).await {
                tracing::info!("Channel closed");
                return;
            }
            backoff = (backoff * 2).min(self.settings.max_backoff);
        }
    }

    /// Wait out the backoff, still serving caller commands.
    ///
    /// Returns `false` if the caller asked to disconnect meanwhile.
    async fn idle(&mut self, wait: Duration) -> bool {
        let deadline = time::sleep(wait);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => return true,
                cmd = self.commands.recv() => match cmd {
                    Some(Command::Send(event)) => {
                        tracing::debug!("Dropping {:?} while disconnected", event);
                    }
                    Some(Command::Disconnect) | None => return false,
                },
            }
        }
    }

    /// One session: connect, announce, event loop.
    ///
    /// The flag reports whether the socket was ever open.
    async fn session(&mut self, reconnected: bool) -> (DisconnectReason, bool) {
        let url = match self.settings.endpoint(&self.identity, &self.epid) {
            Ok(url) => url,
            Err(e) => return (DisconnectReason::Error(e), false),
        };

        let connect = ChannelSocket::connect(&url);
        tokio::pin!(connect);
        let mut socket = loop {
            tokio::select! {
                res = &mut connect => match res {
                    Ok(socket) => break socket,
                    Err(e) => return (DisconnectReason::Error(e), false),
                },
                cmd = self.commands.recv() => match cmd {
                    Some(Command::Send(event)) => {
                        tracing::debug!("Dropping {:?} while connecting", event);
                    }
                    Some(Command::Disconnect) | None => return (DisconnectReason::Shutdown, false),
                },
            }
        };

        self.set_status(ConnectionStatus::Connected);
        if let Err(e) = self.announce(&mut socket).await {
            return (DisconnectReason::Error(e), true);
        }
        self.emit(ChannelEvent::Connected { reconnected });

        let mut heartbeat = time::interval(self.settings.heartbeat);
        heartbeat.tick().await; // skip first immediate tick

        let reason = loop {
            tokio::select! {
                frame = socket.recv_text() => match frame {
                    Ok(Some(text)) => {
                        if let Some(event) = parse_frame(&text) {
                            self.emit(ChannelEvent::Inbound(event));
                        }
                    }
                    Ok(None) => {
                        break DisconnectReason::Error(anyhow::anyhow!("WebSocket closed by server"));
                    }
                    Err(e) => {
                        break DisconnectReason::Error(e.context("WebSocket recv error"));
                    }
                },
                _ = heartbeat.tick() => {
                    if let Err(e) = socket.send_event(&OutboundEvent::Heartbeat).await {
                        break DisconnectReason::Error(e.context("Heartbeat send failed"));
                    }
                }
                cmd = self.commands.recv() => match cmd {
                    Some(Command::Send(event)) => {
                        if let Err(e) = socket.send_event(&event).await {
                            break DisconnectReason::Error(e);
                        }
                    }
                    Some(Command::Disconnect) | None => {
                        socket.close().await;
                        break DisconnectReason::Shutdown;
                    }
                },
            }
        };

        (reason, true)
    }

    /// Identify, then re-join every conversation the caller has open.
    async fn announce(&self, socket: &mut ChannelSocket) -> Result<()> {
        socket
            .send_event(&OutboundEvent::Identify(self.identity.clone()))
            .await
            .context("Identify failed")?;

        let joined: Vec<ConversationId> = self
            .joined
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect();
        for conversation in joined {
            socket
                .send_event(&OutboundEvent::JoinConversation(conversation))
                .await
                .context("Re-join failed")?;
        }
        Ok(())
    }

    fn set_status(&self, status: ConnectionStatus) {
        self.status.send_replace(status);
    }

    fn emit(&self, event: ChannelEvent) {
        self.listeners.dispatch(&event);
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{SinkExt, StreamExt};
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    type ServerSocket = tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>;

    fn settings(addr: std::net::SocketAddr) -> ChannelSettings {
        ChannelSettings {
            url: format!("ws://{}/ws", addr),
            heartbeat: Duration::from_secs(60),
            max_backoff: Duration::from_secs(2),
            stability: Duration::from_secs(60),
        }
    }

    async fn accept(listener: &TcpListener) -> ServerSocket {
        let (stream, _) = listener.accept().await.unwrap();
        tokio_tungstenite::accept_async(stream).await.unwrap()
    }

    /// Next non-heartbeat event from the client, `None` once it closed.
    async fn next_event(ws: &mut ServerSocket) -> Option<OutboundEvent> {
        while let Some(Ok(frame)) = ws.next().await {
            if let WsMessage::Text(text) = frame {
                let event: OutboundEvent = serde_json::from_str(&text).unwrap();
                if event != OutboundEvent::Heartbeat {
                    return Some(event);
                }
            }
        }
        None
    }

    async fn wait_for(
        rx: &mut broadcast::Receiver<ChannelEvent>,
        pred: impl Fn(&ChannelEvent) -> bool,
    ) -> ChannelEvent {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let event = rx.recv().await.unwrap();
                if pred(&event) {
                    return event;
                }
            }
        })
        .await
        .unwrap()
    }

    #[test]
    fn test_endpoint_carries_routing_params() {
        let s = ChannelSettings {
            url: "wss://push.example.test/ws".to_string(),
            heartbeat: Duration::from_secs(25),
            max_backoff: Duration::from_secs(64),
            stability: Duration::from_secs(60),
        };
        let url = s.endpoint(&ParticipantId::new("rec 1"), "ep-1").unwrap();
        assert_eq!(
            url.as_str(),
            "wss://push.example.test/ws?participant=rec+1&epid=ep-1"
        );
        assert!(ChannelSettings {
            url: "not a url".to_string(),
            ..s
        }
        .endpoint(&ParticipantId::new("x"), "e")
        .is_err());
    }

    #[tokio::test]
    async fn test_identify_dispatch_and_idempotent_join() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let mut ws = accept(&listener).await;
            let mut seen = vec![next_event(&mut ws).await.unwrap()];
            let snapshot = r#"{"event":"online_snapshot","data":["cand-1"]}"#;
            ws.send(WsMessage::Text(snapshot.to_string())).await.unwrap();
            while let Some(event) = next_event(&mut ws).await {
                let done = matches!(event, OutboundEvent::LeaveConversation(_));
                seen.push(event);
                if done {
                    break;
                }
            }
            seen
        });

        let manager = ConnectionManager::new(settings(addr), ParticipantId::new("rec-1"));
        let mut rx = manager.subscribe();
        let snapshots = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&snapshots);
        manager.on(EventKind::OnlineSnapshot, move |event| {
            sink.lock().unwrap().push(event.clone());
        });
        let handle = manager.connect();

        let first = wait_for(&mut rx, |_| true).await;
        assert_eq!(first, ChannelEvent::Connected { reconnected: false });
        assert_eq!(handle.status(), ConnectionStatus::Connected);

        wait_for(&mut rx, |e| e.kind() == EventKind::OnlineSnapshot).await;
        assert_eq!(snapshots.lock().unwrap().len(), 1);

        let conv = ConversationId::new("c1");
        handle.join_conversation(&conv);
        handle.join_conversation(&conv);
        handle.leave_conversation(&conv);

        let seen = tokio::time::timeout(Duration::from_secs(10), server)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            seen,
            vec![
                OutboundEvent::Identify(ParticipantId::new("rec-1")),
                OutboundEvent::JoinConversation(conv.clone()),
                OutboundEvent::LeaveConversation(conv),
            ]
        );

        handle.disconnect().await;
        assert_eq!(handle.status(), ConnectionStatus::Disconnected);
        assert!(handle.send(OutboundEvent::Heartbeat).is_err());
    }

    #[tokio::test]
    async fn test_reconnect_replays_identify_and_joins() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let mut first = accept(&listener).await;
            let identify = next_event(&mut first).await.unwrap();
            let join = next_event(&mut first).await.unwrap();
            drop(first);

            let mut second = accept(&listener).await;
            let replay = vec![
                next_event(&mut second).await.unwrap(),
                next_event(&mut second).await.unwrap(),
            ];
            (identify, join, replay, second)
        });

        let manager = ConnectionManager::new(settings(addr), ParticipantId::new("rec-1"));
        let mut rx = manager.subscribe();
        let handle = manager.connect();
        wait_for(&mut rx, |e| e.kind() == EventKind::Connected).await;

        let conv = ConversationId::new("c7");
        handle.join_conversation(&conv);

        let lost = wait_for(&mut rx, |e| e.kind() == EventKind::Disconnected).await;
        assert!(matches!(lost, ChannelEvent::Disconnected { .. }));
        let back = wait_for(&mut rx, |e| e.kind() == EventKind::Connected).await;
        assert_eq!(back, ChannelEvent::Connected { reconnected: true });

        let (identify, join, replay, _second) = tokio::time::timeout(Duration::from_secs(10), server)
            .await
            .unwrap()
            .unwrap();
        let me = OutboundEvent::Identify(ParticipantId::new("rec-1"));
        let rejoin = OutboundEvent::JoinConversation(conv);
        assert_eq!(identify, me);
        assert_eq!(join, rejoin);
        assert_eq!(replay, vec![me, rejoin]);

        handle.disconnect().await;
    }

    #[tokio::test]
    async fn test_disconnect_while_unreachable() {
        // Bind then drop so nothing listens on the port.
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };
        let handle =
            ConnectionManager::new(settings(addr), ParticipantId::new("rec-1")).connect();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_ne!(handle.status(), ConnectionStatus::Connected);

        tokio::time::timeout(Duration::from_secs(5), handle.disconnect())
            .await
            .unwrap();
        assert_eq!(handle.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_failed_connects_reported_to_listeners() {
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };
        let manager = ConnectionManager::new(settings(addr), ParticipantId::new("rec-1"));
        let mut rx = manager.subscribe();
        let failures = Arc::new(Mutex::new(0usize));
        let count = Arc::clone(&failures);
        manager.on(EventKind::ConnectFailed, move |_| {
            *count.lock().unwrap() += 1;
        });
        let handle = manager.connect();

        // First attempt, then the retry after backoff.
        for _ in 0..2 {
            let event = wait_for(&mut rx, |e| e.kind() == EventKind::ConnectFailed).await;
            match event {
                ChannelEvent::ConnectFailed { reason } => assert!(!reason.is_empty()),
                other => panic!("expected connect failure, got {:?}", other),
            }
        }
        assert!(*failures.lock().unwrap() >= 2);
        assert_ne!(handle.status(), ConnectionStatus::Connected);

        handle.disconnect().await;
    }
}
