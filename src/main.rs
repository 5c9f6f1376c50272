use std::sync::Arc;
use std::time::Duration;

use mongodb::Client;
use tokio::sync::mpsc;
use tokio::time;

use dipwatch::config;
use dipwatch::events::RealtimeBus;
use dipwatch::models::AssetType;
use dipwatch::services::alerts_service::{AlertStore, MongoAlertStore};
use dipwatch::services::cooldown::CooldownManager;
use dipwatch::services::evaluator::Evaluator;
use dipwatch::services::fanout::NotificationFanout;
use dipwatch::services::finnhub::FinnhubClient;
use dipwatch::services::notifier::{AlertNotifier, LogNotifier, WebhookNotifier};
use dipwatch::services::price_cache::{self, PriceCache};
use dipwatch::services::{db_init, quote_poller};
use dipwatch::stream::{ChannelName, StreamClient};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let settings = config::load();

    // Mongo connection
    let client = Client::with_uri_str(&settings.mongodb_uri)
        .await
        .expect("Failed to connect to MongoDB");
    let db = client.database(&settings.mongodb_db);

    if let Err(e) = db_init::ensure_indexes(&db).await {
        tracing::warn!("index init failed: {}", e);
    }

    let store = Arc::new(MongoAlertStore::new(db));
    let cache = PriceCache::new(Duration::from_secs(settings.price_ttl_secs));
    let bus = RealtimeBus::new(256);
    let cooldowns = Arc::new(CooldownManager::new(Duration::from_secs(
        settings.cooldown_secs,
    )));

    let notifier: Arc<dyn AlertNotifier> = if settings.notify_webhook_url.trim().is_empty() {
        tracing::info!("NOTIFY_WEBHOOK_URL not set, fired alerts only log locally");
        Arc::new(LogNotifier)
    } else {
        Arc::new(WebhookNotifier::new(settings.notify_webhook_url.clone()))
    };

    // streaming ingestion (crypto) + cache writer
    let (stream_tx, stream_rx) = mpsc::channel(1024);
    let stream = StreamClient::new(settings.kraken_ws_url.clone(), stream_tx);
    stream.start().await;
    price_cache::spawn_stream_writer(stream_rx, cache.clone());
    spawn_subscription_sync(
        store.clone(),
        stream.clone(),
        Duration::from_secs(settings.subscription_sync_secs),
    );

    // fallback ingestion (stocks)
    let finnhub = FinnhubClient::new(settings.finnhub_api_key.clone());
    quote_poller::spawn_quote_poller(
        store.clone(),
        finnhub,
        cache.clone(),
        Duration::from_secs(settings.poll_interval_secs),
    );

    spawn_event_logger(&bus);

    let fanout = NotificationFanout::new(store.clone(), bus, notifier);
    let evaluator = Arc::new(Evaluator::new(store, cache, cooldowns, fanout));
    evaluator.spawn(Duration::from_secs(settings.eval_interval_secs));

    tracing::info!(
        "dip monitor running (tick every {}s)",
        settings.eval_interval_secs
    );

    tokio::signal::ctrl_c()
        .await
        .expect("failed to listen for shutdown signal");
    tracing::info!("shutting down");
    stream.disconnect();
}

/// Keeps the stream subscribed to every symbol an active crypto alert
/// tracks. The client dedups pairs it already knows, so re-listing is
/// idempotent; alerts created while running are picked up within a cycle.
fn spawn_subscription_sync(
    store: Arc<MongoAlertStore>,
    stream: StreamClient,
    every: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval(every);

        loop {
            interval.tick().await;

            match store.list_active_symbols(AssetType::Crypto).await {
                Ok(symbols) => {
                    if !symbols.is_empty() {
                        let pairs: Vec<&str> = symbols.iter().map(|s| s.as_str()).collect();
                        stream.subscribe(&pairs, ChannelName::Ticker);
                    }
                }
                Err(e) => tracing::warn!("subscription sync failed: {}", e),
            }
        }
    })
}

/// Operator visibility into the realtime channel.
fn spawn_event_logger(bus: &RealtimeBus) -> tokio::task::JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(evt) => tracing::debug!("realtime event {} for user {}", evt.event, evt.user_id),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::debug!("event logger lagged, skipped {} events", n);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
