use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::mpsc;

use crate::models::{AssetType, PriceSample};
use crate::stream::StreamEvent;

struct Entry {
    sample: PriceSample,
    stored_at: Instant,
}

/// Latest observed price per (asset type, symbol). Single shared resource
/// between the ingestion paths and the evaluator: the stream writes crypto,
/// the poller writes stocks, the evaluator only reads.
#[derive(Clone)]
pub struct PriceCache {
    ttl: Duration,
    inner: Arc<RwLock<HashMap<(AssetType, String), Entry>>>,
}

impl PriceCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn insert(&self, sample: PriceSample) {
        let key = (sample.asset_type, sample.symbol.clone());
        let mut map = self.inner.write().unwrap_or_else(|p| p.into_inner());
        map.insert(
            key,
            Entry {
                sample,
                stored_at: Instant::now(),
            },
        );
    }

    /// Latest sample, or `None` when there is no data or the entry outlived
    /// the freshness TTL. A stale price must never reach the evaluator.
    pub fn get(&self, symbol: &str, asset_type: AssetType) -> Option<PriceSample> {
        let map = self.inner.read().unwrap_or_else(|p| p.into_inner());
        let entry = map.get(&(asset_type, symbol.to_string()))?;
        if entry.stored_at.elapsed() > self.ttl {
            return None;
        }
        Some(entry.sample.clone())
    }

    pub fn len(&self) -> usize {
        let map = self.inner.read().unwrap_or_else(|p| p.into_inner());
        map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Bridges the stream client's typed events into cache writes. Ticker
/// updates are the alerting source; trade and candle frames don't touch
/// the cache.
pub fn spawn_stream_writer(
    mut events_rx: mpsc::Receiver<StreamEvent>,
    cache: PriceCache,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            match event {
                StreamEvent::Ticker(t) => {
                    if !t.last.is_finite() || t.last <= 0.0 {
                        continue;
                    }
                    cache.insert(PriceSample {
                        symbol: t.pair,
                        asset_type: AssetType::Crypto,
                        price: t.last,
                        change_24h: t.change_24h,
                        observed_at: Utc::now().timestamp(),
                    });
                }
                StreamEvent::State(state) => {
                    tracing::info!("stream connection state: {:?}", state);
                }
                StreamEvent::Trade(_) | StreamEvent::Candle(_) => {}
            }
        }
    })
}
