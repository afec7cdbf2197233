use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::client::config::ReconnectPolicy;
use crate::common::protocol::{negotiate_heartbeat, Command, Frame};
use crate::common::{ClientError, ClientResult};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);
/// Kept under `CLOSE_TIMEOUT` so the driver acknowledges before `close` gives up on it.
const RECEIPT_TIMEOUT: Duration = Duration::from_millis(1500);
const CLIENT_HEARTBEAT: (u32, u32) = (10_000, 10_000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    Connecting,
    Open,
    Closed,
    Error,
}

impl std::fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelStatus::Connecting => write!(f, "connecting"),
            ChannelStatus::Open => write!(f, "open"),
            ChannelStatus::Closed => write!(f, "closed"),
            ChannelStatus::Error => write!(f, "error"),
        }
    }
}

/// Stream of raw message bodies delivered on one destination.
#[derive(Debug)]
pub struct Subscription {
    pub id: String,
    pub destination: String,
    receiver: mpsc::UnboundedReceiver<String>,
}

impl Subscription {
    pub fn new(id: impl Into<String>, destination: impl Into<String>, receiver: mpsc::UnboundedReceiver<String>) -> Self {
        Self { id: id.into(), destination: destination.into(), receiver }
    }

    /// Next body, or `None` once the channel is gone.
    pub async fn recv(&mut self) -> Option<String> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<String> {
        self.receiver.try_recv().ok()
    }
}

/// Push channel used by a group view. Implementations keep subscriptions alive
/// across reconnects.
#[async_trait]
pub trait RealtimeChannel: Send + Sync {
    async fn subscribe(&self, destination: &str) -> ClientResult<Subscription>;

    /// Fails with `NotConnected` unless the status is `Open`.
    async fn publish(&self, destination: &str, body: String) -> ClientResult<()>;

    /// Idempotent. After it returns no further bodies are delivered.
    async fn close(&self);

    fn status(&self) -> watch::Receiver<ChannelStatus>;

    fn is_open(&self) -> bool {
        *self.status().borrow() == ChannelStatus::Open
    }
}

enum DriverCommand {
    Subscribe { id: String, destination: String, sink: mpsc::UnboundedSender<String> },
    Publish { destination: String, body: String, ack: oneshot::Sender<ClientResult<()>> },
    Close { done: oneshot::Sender<()> },
}

/// STOMP over WebSocket with automatic reconnect.
pub struct StompChannel {
    commands: mpsc::UnboundedSender<DriverCommand>,
    status: Arc<watch::Sender<ChannelStatus>>,
    driver: Mutex<Option<JoinHandle<()>>>,
    next_id: AtomicU64,
}

impl StompChannel {
    /// Starts connecting in the background and returns immediately in `Connecting`.
    pub fn connect(url: &str, token: Option<String>, policy: ReconnectPolicy) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let status = Arc::new(watch::Sender::new(ChannelStatus::Connecting));
        let driver = Driver {
            url: url.to_string(),
            token,
            policy,
            status: status.clone(),
            commands: command_rx,
            subscriptions: BTreeMap::new(),
        };
        let handle = tokio::spawn(driver.run());
        Self {
            commands: command_tx,
            status,
            driver: Mutex::new(Some(handle)),
            next_id: AtomicU64::new(0),
        }
    }

    fn abort_driver(&self) {
        if let Ok(mut guard) = self.driver.lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }
}

#[async_trait]
impl RealtimeChannel for StompChannel {
    async fn subscribe(&self, destination: &str) -> ClientResult<Subscription> {
        let id = format!("sub-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        self.commands
            .send(DriverCommand::Subscribe { id: id.clone(), destination: destination.to_string(), sink: tx })
            .map_err(|_| ClientError::Channel("channel already closed".into()))?;
        Ok(Subscription::new(id, destination, rx))
    }

    async fn publish(&self, destination: &str, body: String) -> ClientResult<()> {
        if !self.is_open() {
            return Err(ClientError::NotConnected);
        }
        let (ack, done) = oneshot::channel();
        self.commands
            .send(DriverCommand::Publish { destination: destination.to_string(), body, ack })
            .map_err(|_| ClientError::NotConnected)?;
        done.await.map_err(|_| ClientError::NotConnected)?
    }

    async fn close(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.commands.send(DriverCommand::Close { done: done_tx }).is_ok() {
            if tokio::time::timeout(CLOSE_TIMEOUT, done_rx).await.is_err() {
                warn!("[WS:CLIENT] Driver did not acknowledge close in time, aborting");
            }
        }
        self.abort_driver();
        self.status.send_replace(ChannelStatus::Closed);
    }

    fn status(&self) -> watch::Receiver<ChannelStatus> {
        self.status.subscribe()
    }
}

impl Drop for StompChannel {
    fn drop(&mut self) {
        self.abort_driver();
    }
}

enum SessionEnd {
    /// Close requested or every handle dropped.
    Closed,
    Lost { was_open: bool, reason: String },
}

struct Driver {
    url: String,
    token: Option<String>,
    policy: ReconnectPolicy,
    status: Arc<watch::Sender<ChannelStatus>>,
    commands: mpsc::UnboundedReceiver<DriverCommand>,
    /// id -> (destination, sink), re-issued on every reconnect.
    subscriptions: BTreeMap<String, (String, mpsc::UnboundedSender<String>)>,
}

/// Reads until the broker confirms `receipt`, or the connection goes away.
async fn await_receipt(source: &mut WsSource, receipt: &str) {
    while let Some(msg) = source.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if let Ok(Some(frame)) = Frame::decode(&text) {
                    if frame.command == Command::Receipt && frame.get("receipt-id") == Some(receipt) {
                        debug!("[WS:CLIENT] Broker confirmed {}", receipt);
                        return;
                    }
                }
            }
            Ok(Message::Close(_)) | Err(_) => return,
            Ok(_) => {}
        }
    }
}

impl Driver {
    async fn run(mut self) {
        let mut attempt: u32 = 0;
        loop {
            self.status.send_replace(ChannelStatus::Connecting);
            match self.session().await {
                SessionEnd::Closed => {
                    self.status.send_replace(ChannelStatus::Closed);
                    info!("[WS:CLIENT] Channel closed");
                    return;
                }
                SessionEnd::Lost { was_open, reason } => {
                    self.status.send_replace(ChannelStatus::Error);
                    if was_open {
                        attempt = 0;
                    }
                    attempt += 1;
                    if self.policy.exhausted(attempt) {
                        error!("[WS:CLIENT] Giving up after {} attempts: {}", attempt, reason);
                        self.status.send_replace(ChannelStatus::Closed);
                        return;
                    }
                    let delay = self.policy.delay_with_jitter(attempt);
                    warn!("[WS:CLIENT] Connection attempt {} failed: {}. Retrying in {:?}", attempt, reason, delay);
                    if !self.backoff(delay).await {
                        self.status.send_replace(ChannelStatus::Closed);
                        return;
                    }
                }
            }
        }
    }

    /// Sleeps while still answering commands. Returns false if closed meanwhile.
    async fn backoff(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                cmd = self.commands.recv() => match cmd {
                    None => return false,
                    Some(DriverCommand::Close { done }) => {
                        let _ = done.send(());
                        return false;
                    }
                    Some(DriverCommand::Subscribe { id, destination, sink }) => {
                        self.subscriptions.insert(id, (destination, sink));
                    }
                    Some(DriverCommand::Publish { ack, .. }) => {
                        let _ = ack.send(Err(ClientError::NotConnected));
                    }
                },
            }
        }
    }

    async fn handshake(&self) -> Result<(WsSink, WsSource, Option<String>), String> {
        let (ws_stream, _) = connect_async(self.url.as_str()).await.map_err(|e| format!("connect failed: {}", e))?;
        let (mut sink, mut source) = ws_stream.split();

        let host = url::Url::parse(&self.url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| "localhost".to_string());
        let connect = Frame::connect(&host, self.token.as_deref(), CLIENT_HEARTBEAT);
        sink.send(Message::Text(connect.encode())).await.map_err(|e| format!("CONNECT failed: {}", e))?;

        loop {
            match source.next().await {
                Some(Ok(Message::Text(text))) => match Frame::decode(&text) {
                    Ok(None) => continue,
                    Ok(Some(frame)) if frame.command == Command::Connected => {
                        return Ok((sink, source, frame.get("heart-beat").map(str::to_string)));
                    }
                    Ok(Some(frame)) if frame.command == Command::Error => {
                        return Err(format!("broker refused connection: {}", frame.get("message").unwrap_or(&frame.body)));
                    }
                    Ok(Some(frame)) => return Err(format!("unexpected {} during handshake", frame.command.as_str())),
                    Err(e) => return Err(e.to_string()),
                },
                Some(Ok(Message::Close(_))) | None => return Err("server closed connection during handshake".into()),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(format!("websocket error during handshake: {}", e)),
            }
        }
    }

    async fn session(&mut self) -> SessionEnd {
        info!("[WS:CLIENT] Connecting to {}", self.url);
        let (mut sink, mut source, server_heartbeat) = match tokio::time::timeout(HANDSHAKE_TIMEOUT, self.handshake()).await {
            Ok(Ok(parts)) => parts,
            Ok(Err(reason)) => return SessionEnd::Lost { was_open: false, reason },
            Err(_) => return SessionEnd::Lost { was_open: false, reason: "handshake timed out".into() },
        };

        // drop subscriptions whose consumers went away while we were offline
        self.subscriptions.retain(|_, (_, s)| !s.is_closed());
        for (id, (destination, _)) in &self.subscriptions {
            if let Err(e) = sink.send(Message::Text(Frame::subscribe(id, destination).encode())).await {
                return SessionEnd::Lost { was_open: false, reason: format!("SUBSCRIBE failed: {}", e) };
            }
        }
        self.status.send_replace(ChannelStatus::Open);
        info!("[WS:CLIENT] Connected, {} subscription(s) active", self.subscriptions.len());

        let (outgoing, incoming) = negotiate_heartbeat(CLIENT_HEARTBEAT, server_heartbeat.as_deref());
        let idle = Duration::from_secs(3600);
        let mut beat = tokio::time::interval(outgoing.unwrap_or(idle));
        let mut watchdog = tokio::time::interval(incoming.unwrap_or(idle));
        beat.tick().await;
        watchdog.tick().await;
        let mut last_inbound = Instant::now();

        loop {
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    None => {
                        let _ = sink.send(Message::Text(Frame::disconnect("bye").encode())).await;
                        let _ = sink.close().await;
                        return SessionEnd::Closed;
                    }
                    Some(DriverCommand::Close { done }) => {
                        let receipt = format!("close-{}", uuid::Uuid::new_v4());
                        if sink.send(Message::Text(Frame::disconnect(&receipt).encode())).await.is_ok()
                            && tokio::time::timeout(RECEIPT_TIMEOUT, await_receipt(&mut source, &receipt)).await.is_err()
                        {
                            warn!("[WS:CLIENT] No RECEIPT for {} before closing", receipt);
                        }
                        let _ = sink.close().await;
                        let _ = done.send(());
                        return SessionEnd::Closed;
                    }
                    Some(DriverCommand::Subscribe { id, destination, sink: tx }) => {
                        let frame = Frame::subscribe(&id, &destination);
                        self.subscriptions.insert(id, (destination, tx));
                        if let Err(e) = sink.send(Message::Text(frame.encode())).await {
                            return SessionEnd::Lost { was_open: true, reason: format!("SUBSCRIBE failed: {}", e) };
                        }
                    }
                    Some(DriverCommand::Publish { destination, body, ack }) => {
                        match sink.send(Message::Text(Frame::send(&destination, body).encode())).await {
                            Ok(()) => {
                                let _ = ack.send(Ok(()));
                            }
                            Err(e) => {
                                let _ = ack.send(Err(ClientError::Channel(e.to_string())));
                                return SessionEnd::Lost { was_open: true, reason: format!("SEND failed: {}", e) };
                            }
                        }
                    }
                },
                msg = source.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        last_inbound = Instant::now();
                        if let Some(reason) = self.dispatch(&text, &mut sink).await {
                            return SessionEnd::Lost { was_open: true, reason };
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        return SessionEnd::Lost { was_open: true, reason: "connection closed by server".into() };
                    }
                    Some(Ok(_)) => {
                        last_inbound = Instant::now();
                    }
                    Some(Err(e)) => {
                        return SessionEnd::Lost { was_open: true, reason: format!("websocket error: {}", e) };
                    }
                },
                _ = beat.tick(), if outgoing.is_some() => {
                    if let Err(e) = sink.send(Message::Text("\n".to_string())).await {
                        return SessionEnd::Lost { was_open: true, reason: format!("heart-beat failed: {}", e) };
                    }
                }
                _ = watchdog.tick(), if incoming.is_some() => {
                    let limit = incoming.unwrap_or(idle) * 2;
                    if last_inbound.elapsed() > limit {
                        return SessionEnd::Lost { was_open: true, reason: "broker heart-beat missed".into() };
                    }
                }
            }
        }
    }

    /// Routes one inbound frame. Returns a reason when the session must end.
    async fn dispatch(&mut self, text: &str, sink: &mut WsSink) -> Option<String> {
        let frame = match Frame::decode(text) {
            Ok(Some(frame)) => frame,
            Ok(None) => return None,
            Err(e) => {
                warn!("[WS:CLIENT] Dropping malformed frame: {}", e);
                return None;
            }
        };
        match frame.command {
            Command::Message => {
                let Some(sub_id) = frame.get("subscription").map(str::to_string) else {
                    warn!("[WS:CLIENT] MESSAGE without subscription header");
                    return None;
                };
                let delivered = match self.subscriptions.get(&sub_id) {
                    Some((_, tx)) => tx.send(frame.body).is_ok(),
                    None => {
                        debug!("[WS:CLIENT] MESSAGE for unknown subscription {}", sub_id);
                        return None;
                    }
                };
                if !delivered {
                    debug!("[WS:CLIENT] Subscriber of {} went away, unsubscribing", sub_id);
                    self.subscriptions.remove(&sub_id);
                    let _ = sink.send(Message::Text(Frame::unsubscribe(&sub_id).encode())).await;
                }
                None
            }
            Command::Error => Some(format!("broker error: {}", frame.get("message").unwrap_or(&frame.body))),
            Command::Receipt => None,
            other => {
                debug!("[WS:CLIENT] Ignoring {} frame", other.as_str());
                None
            }
        }
    }
}
