use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::time::{interval_at, sleep, timeout};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::backoff::Backoff;
use super::protocol::{self, CandleUpdate, ChannelName, Inbound, TickerUpdate, TradeUpdate};
use super::rate_limit::{MessageClass, RateLimiter};

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
pub const SUBSCRIBE_STAGGER: Duration = Duration::from_millis(250);

// Staleness: no inbound traffic AND no heartbeat-class frame for this
// multiple of the heartbeat interval forces a reconnect.
const STALENESS_MULTIPLIER: f64 = 2.5;

const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_FACTOR: f64 = 1.3;
const BACKOFF_MAX: Duration = Duration::from_secs(30);
const MAX_RECONNECT_ATTEMPTS: u32 = 10;

const SOFT_RATE_LIMIT: u32 = 200;
const HARD_RATE_LIMIT: u32 = 500;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("websocket error: {0}")]
    Websocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("connection attempt timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("client was stopped manually")]
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Subscribed,
    Reconnecting,
    Unreachable,
}

/// Typed events published to the consumer channel. Transport parsing stays
/// in here; subscribers decide what a ticker means.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Ticker(TickerUpdate),
    Trade(TradeUpdate),
    Candle(CandleUpdate),
    State(ConnectionState),
}

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Subscription = (String, ChannelName);

struct Inner {
    url: String,
    events_tx: mpsc::Sender<StreamEvent>,
    state_tx: watch::Sender<ConnectionState>,

    // Serializes connection attempts so concurrent connect() callers and
    // the reconnect loop never open duplicate sockets.
    connect_gate: Mutex<()>,

    // Writer half of the live connection; None while disconnected.
    outbound: StdMutex<Option<mpsc::UnboundedSender<Message>>>,

    // Subscriptions requested before a connection existed.
    pending: StdMutex<Vec<Subscription>>,
    subscribed: StdMutex<HashSet<Subscription>>,

    stopped: AtomicBool,
    rate: StdMutex<RateLimiter>,
}

impl Inner {
    fn set_state(&self, state: ConnectionState) {
        let _ = self.state_tx.send(state);
        let _ = self.events_tx.try_send(StreamEvent::State(state));
    }

    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn is_connected(&self) -> bool {
        matches!(
            self.state(),
            ConnectionState::Connected | ConnectionState::Subscribed
        )
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn send_raw(&self, text: String) -> bool {
        let guard = self.outbound.lock().unwrap_or_else(|p| p.into_inner());
        match guard.as_ref() {
            Some(tx) => tx.send(Message::Text(text)).is_ok(),
            None => false,
        }
    }

    fn clear_outbound(&self) {
        let mut guard = self.outbound.lock().unwrap_or_else(|p| p.into_inner());
        *guard = None;
    }

    fn queue_pending(&self, subs: Vec<Subscription>) {
        let mut pending = self.pending.lock().unwrap_or_else(|p| p.into_inner());
        for sub in subs {
            if !pending.contains(&sub) {
                pending.push(sub);
            }
        }
    }

    fn drop_subscription(&self, pair: &str, channel: &str) {
        let Some(channel) = ChannelName::parse(channel) else {
            return;
        };
        let mut subscribed = self.subscribed.lock().unwrap_or_else(|p| p.into_inner());
        subscribed.remove(&(pair.to_string(), channel));
    }
}

#[derive(Clone)]
pub struct StreamClient {
    inner: Arc<Inner>,
}

impl StreamClient {
    pub fn new(url: impl Into<String>, events_tx: mpsc::Sender<StreamEvent>) -> Self {
        let (state_tx, _state_rx) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                url: url.into(),
                events_tx,
                state_tx,
                connect_gate: Mutex::new(()),
                outbound: StdMutex::new(None),
                pending: StdMutex::new(Vec::new()),
                subscribed: StdMutex::new(HashSet::new()),
                stopped: AtomicBool::new(false),
                rate: StdMutex::new(RateLimiter::new(SOFT_RATE_LIMIT, HARD_RATE_LIMIT)),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn is_rate_limited(&self) -> bool {
        let rate = self.inner.rate.lock().unwrap_or_else(|p| p.into_inner());
        rate.is_rate_limited()
    }

    /// Establishes the connection. Idempotent: concurrent callers serialize
    /// on the connect gate, and whoever arrives after a successful attempt
    /// observes the live connection and returns immediately.
    pub async fn connect(&self) -> Result<(), StreamError> {
        let _gate = self.inner.connect_gate.lock().await;
        if self.inner.is_stopped() {
            return Err(StreamError::Stopped);
        }
        if self.inner.is_connected() {
            return Ok(());
        }
        establish(&self.inner).await
    }

    /// connect(), but a failed first attempt enters the reconnect loop
    /// instead of surfacing the error. For the owning binary.
    pub async fn start(&self) {
        match self.connect().await {
            Ok(()) => {}
            Err(StreamError::Stopped) => {}
            Err(e) => {
                tracing::warn!("initial stream connect failed: {}", e);
                self.inner.set_state(ConnectionState::Reconnecting);
                tokio::spawn(reconnect(self.inner.clone()));
            }
        }
    }

    /// Requests market-data subscriptions. Not yet connected: the request is
    /// queued and flushed (staggered) after connect. Already-requested pairs
    /// are deduplicated.
    pub fn subscribe(&self, pairs: &[&str], channel: ChannelName) {
        if self.inner.is_stopped() {
            return;
        }

        let mut fresh: Vec<Subscription> = Vec::new();
        {
            let subscribed = self
                .inner
                .subscribed
                .lock()
                .unwrap_or_else(|p| p.into_inner());
            let pending = self.inner.pending.lock().unwrap_or_else(|p| p.into_inner());
            for pair in pairs {
                let sub = (pair.to_string(), channel);
                if !subscribed.contains(&sub) && !pending.contains(&sub) {
                    fresh.push(sub);
                }
            }
        }
        if fresh.is_empty() {
            return;
        }

        if self.inner.is_connected() {
            send_subscriptions(self.inner.clone(), fresh);
        } else {
            tracing::debug!("not connected, queuing {} subscription(s)", fresh.len());
            self.inner.queue_pending(fresh);
        }
    }

    pub fn unsubscribe(&self, pairs: &[&str], channel: ChannelName) {
        let owned: Vec<String> = pairs.iter().map(|p| p.to_string()).collect();
        {
            let mut subscribed = self
                .inner
                .subscribed
                .lock()
                .unwrap_or_else(|p| p.into_inner());
            let mut pending = self.inner.pending.lock().unwrap_or_else(|p| p.into_inner());
            for pair in &owned {
                subscribed.remove(&(pair.clone(), channel));
                pending.retain(|(p, c)| !(p == pair && *c == channel));
            }
        }
        for msg in protocol::unsubscribe_messages(&owned, channel) {
            self.inner.send_raw(msg);
        }
    }

    /// Manual stop: no further reconnects, pending work cancelled.
    pub fn disconnect(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.inner.clear_outbound();
        {
            let mut pending = self.inner.pending.lock().unwrap_or_else(|p| p.into_inner());
            pending.clear();
        }
        self.inner.set_state(ConnectionState::Disconnected);
        tracing::info!("stream client stopped");
    }
}

/// Opens the socket (bounded by the connect timeout), wires the connection
/// task, and replays every known subscription. Caller holds the gate.
async fn establish(inner: &Arc<Inner>) -> Result<(), StreamError> {
    inner.set_state(ConnectionState::Connecting);

    let socket = match timeout(CONNECT_TIMEOUT, connect_async(inner.url.as_str())).await {
        Ok(Ok((socket, _))) => socket,
        Ok(Err(e)) => {
            inner.set_state(ConnectionState::Disconnected);
            return Err(e.into());
        }
        Err(_) => {
            inner.set_state(ConnectionState::Disconnected);
            return Err(StreamError::ConnectTimeout(CONNECT_TIMEOUT));
        }
    };

    let (out_tx, out_rx) = mpsc::unbounded_channel();
    {
        let mut outbound = inner.outbound.lock().unwrap_or_else(|p| p.into_inner());
        *outbound = Some(out_tx);
    }
    inner.set_state(ConnectionState::Connected);
    tracing::info!("stream connected to {}", inner.url);

    tokio::spawn(run_connection(inner.clone(), socket, out_rx));

    // Everything previously subscribed plus everything queued while down.
    let mut replay: Vec<Subscription> = {
        let mut subscribed = inner.subscribed.lock().unwrap_or_else(|p| p.into_inner());
        subscribed.drain().collect()
    };
    {
        let mut pending = inner.pending.lock().unwrap_or_else(|p| p.into_inner());
        replay.append(&mut pending);
    }
    if !replay.is_empty() {
        send_subscriptions(inner.clone(), replay);
    }

    Ok(())
}

/// Sends subscribe payloads with staggered delays so a batch does not burst
/// the server. Marks pairs subscribed on send; failed sends go back to the
/// pending queue for the next connection.
fn send_subscriptions(inner: Arc<Inner>, subs: Vec<Subscription>) {
    {
        let mut subscribed = inner.subscribed.lock().unwrap_or_else(|p| p.into_inner());
        for sub in &subs {
            subscribed.insert(sub.clone());
        }
    }

    tokio::spawn(async move {
        let mut by_channel: HashMap<ChannelName, Vec<String>> = HashMap::new();
        for (pair, channel) in &subs {
            by_channel.entry(*channel).or_default().push(pair.clone());
        }

        let mut first = true;
        for (channel, pairs) in by_channel {
            let messages = protocol::subscribe_messages(&pairs, channel);
            if messages.len() > 1 {
                tracing::warn!(
                    "subscription request for {} {} pair(s) split into {} messages",
                    pairs.len(),
                    channel.name(),
                    messages.len()
                );
            }
            for message in messages {
                if !first {
                    sleep(SUBSCRIBE_STAGGER).await;
                }
                first = false;

                if inner.is_stopped() {
                    return;
                }
                if !inner.send_raw(message) {
                    // Connection went away mid-flush; requeue the whole
                    // channel batch for the next establish().
                    let requeue: Vec<Subscription> =
                        pairs.iter().map(|p| (p.clone(), channel)).collect();
                    {
                        let mut subscribed =
                            inner.subscribed.lock().unwrap_or_else(|p| p.into_inner());
                        for sub in &requeue {
                            subscribed.remove(sub);
                        }
                    }
                    inner.queue_pending(requeue);
                    return;
                }
            }
        }

        if inner.state() == ConnectionState::Connected {
            inner.set_state(ConnectionState::Subscribed);
        }
    });
}

/// Owns one live socket: forwards outbound messages, parses inbound frames,
/// and enforces the heartbeat/staleness watchdog. On any exit it either
/// goes quiet (manual stop) or hands off to the reconnect loop.
async fn run_connection(
    inner: Arc<Inner>,
    socket: Socket,
    mut out_rx: mpsc::UnboundedReceiver<Message>,
) {
    let (mut write, mut read) = socket.split();
    let staleness_timeout = HEARTBEAT_INTERVAL.mul_f64(STALENESS_MULTIPLIER);
    let mut last_inbound = Instant::now();
    let mut last_heartbeat = Instant::now();
    let mut heartbeat = interval_at(
        tokio::time::Instant::now() + HEARTBEAT_INTERVAL,
        HEARTBEAT_INTERVAL,
    );

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                let now = Instant::now();
                if now.duration_since(last_inbound) > staleness_timeout
                    && now.duration_since(last_heartbeat) > staleness_timeout
                {
                    tracing::warn!(
                        "no feed traffic for {:?}, treating connection as dead",
                        now.duration_since(last_inbound)
                    );
                    break;
                }
                if write.send(Message::Text(protocol::ping_message())).await.is_err() {
                    break;
                }
            }

            outgoing = out_rx.recv() => {
                match outgoing {
                    Some(message) => {
                        if write.send(message).await.is_err() {
                            break;
                        }
                    }
                    // Sender cleared: manual disconnect or a replacement connection.
                    None => break,
                }
            }

            incoming = read.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        last_inbound = Instant::now();
                        handle_frame(&inner, &text, &mut last_heartbeat).await;
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        last_inbound = Instant::now();
                        last_heartbeat = last_inbound;
                        let _ = write.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_inbound = Instant::now();
                        last_heartbeat = last_inbound;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::warn!("stream closed by server");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!("stream read error: {}", e);
                        break;
                    }
                }
            }
        }
    }

    inner.clear_outbound();
    if inner.is_stopped() {
        inner.set_state(ConnectionState::Disconnected);
        return;
    }
    inner.set_state(ConnectionState::Reconnecting);
    reconnect(inner).await;
}

async fn handle_frame(inner: &Arc<Inner>, text: &str, last_heartbeat: &mut Instant) {
    let Some(inbound) = protocol::parse_inbound(text) else {
        tracing::debug!("unparseable frame: {}", text);
        return;
    };

    let class = match &inbound {
        Inbound::Ticker(_) => MessageClass::Ticker,
        Inbound::Trade(_) => MessageClass::Trade,
        Inbound::Candle(_) => MessageClass::Candle,
        _ => MessageClass::Control,
    };
    let admitted = {
        let mut rate = inner.rate.lock().unwrap_or_else(|p| p.into_inner());
        rate.admit(class, Instant::now())
    };
    if !admitted {
        return;
    }

    match inbound {
        Inbound::Heartbeat | Inbound::Pong => {
            *last_heartbeat = Instant::now();
        }
        Inbound::SystemStatus { status } => {
            *last_heartbeat = Instant::now();
            tracing::info!("feed system status: {}", status);
        }
        Inbound::SubscriptionStatus {
            pair,
            channel,
            status,
            error,
        } => {
            *last_heartbeat = Instant::now();
            if status == "error" {
                tracing::warn!(
                    "subscription rejected for {} on {}: {}",
                    pair,
                    channel,
                    error.unwrap_or_default()
                );
                inner.drop_subscription(&pair, &channel);
            } else {
                tracing::debug!("subscription {} for {} on {}", status, pair, channel);
            }
        }
        Inbound::Ticker(update) => {
            let _ = inner.events_tx.send(StreamEvent::Ticker(update)).await;
        }
        Inbound::Trade(update) => {
            let _ = inner.events_tx.send(StreamEvent::Trade(update)).await;
        }
        Inbound::Candle(update) => {
            let _ = inner.events_tx.send(StreamEvent::Candle(update)).await;
        }
        Inbound::Ignored => {}
    }
}

/// Bounded-backoff reconnect loop. Gives up with a terminal Unreachable
/// state after the attempt budget; a manual stop exits quietly.
///
/// Returns a boxed future rather than being an `async fn` so that the
/// mutually recursive cycle (run_connection -> reconnect -> establish ->
/// spawn(run_connection)) resolves its `Send` bound against a concrete,
/// named type instead of an open coinductive chain of opaque `impl Future`s.
fn reconnect(inner: Arc<Inner>) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move {
        let mut backoff = Backoff::new(
            BACKOFF_BASE,
            BACKOFF_FACTOR,
            BACKOFF_MAX,
            MAX_RECONNECT_ATTEMPTS,
        );

        loop {
            if inner.is_stopped() {
                inner.set_state(ConnectionState::Disconnected);
                return;
            }

            let Some(delay) = backoff.next_delay() else {
                tracing::error!(
                    "feed unreachable after {} reconnect attempts, giving up",
                    MAX_RECONNECT_ATTEMPTS
                );
                inner.set_state(ConnectionState::Unreachable);
                return;
            };
            let delay = backoff.jittered(delay);
            tracing::info!(
                "reconnecting in {:.1}s (attempt {})",
                delay.as_secs_f64(),
                backoff.attempt()
            );
            sleep(delay).await;

            if inner.is_stopped() {
                inner.set_state(ConnectionState::Disconnected);
                return;
            }

            let _gate = inner.connect_gate.lock().await;
            if inner.is_connected() {
                return;
            }
            match establish(&inner).await {
                Ok(()) => return,
                Err(e) => tracing::warn!("reconnect attempt failed: {}", e),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriptions_queue_while_disconnected() {
        let (events_tx, _events_rx) = mpsc::channel(16);
        let client = StreamClient::new("wss://example.invalid", events_tx);

        client.subscribe(&["XBT/USD", "ETH/USD"], ChannelName::Ticker);
        // second request for an already-queued pair is a no-op
        client.subscribe(&["XBT/USD"], ChannelName::Ticker);

        let pending = client
            .inner
            .pending
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        assert_eq!(pending.len(), 2);
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn disconnect_clears_pending_and_blocks_connect() {
        let (events_tx, _events_rx) = mpsc::channel(16);
        let client = StreamClient::new("wss://example.invalid", events_tx);

        client.subscribe(&["XBT/USD"], ChannelName::Ticker);
        client.disconnect();

        {
            let pending = client
                .inner
                .pending
                .lock()
                .unwrap_or_else(|p| p.into_inner());
            assert!(pending.is_empty());
        }
        // queued work after stop is refused
        client.subscribe(&["ETH/USD"], ChannelName::Ticker);
        let pending = client
            .inner
            .pending
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        assert!(pending.is_empty());

        match client.connect().await {
            Err(StreamError::Stopped) => {}
            other => panic!("expected Stopped, got {:?}", other.map(|_| ())),
        }
    }
}
