use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time;

use crate::models::{AssetType, PriceSample};
use crate::services::alerts_service::AlertStore;
use crate::services::finnhub::FinnhubClient;
use crate::services::price_cache::PriceCache;

/// Fallback ingestion for symbols with no streaming feed (equities): poll
/// the quote API on a fixed interval and write the same cache the stream
/// writes, so the evaluator never knows the difference.
pub fn spawn_quote_poller(
    store: Arc<dyn AlertStore>,
    finnhub: FinnhubClient,
    cache: PriceCache,
    every: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval(every);

        loop {
            interval.tick().await;

            if let Err(e) = poll_once(store.as_ref(), &finnhub, &cache).await {
                tracing::error!("quote poll cycle error: {}", e);
            }
        }
    })
}

async fn poll_once(
    store: &dyn AlertStore,
    finnhub: &FinnhubClient,
    cache: &PriceCache,
) -> Result<(), String> {
    let symbols = store.list_active_symbols(AssetType::Stock).await?;
    if symbols.is_empty() {
        return Ok(());
    }

    for sym in symbols {
        let quote = match finnhub.quote(&sym).await {
            Ok(q) => q,
            Err(e) => {
                // one bad symbol must not block the rest of the cycle
                tracing::warn!("quote poll failed for {}: {}", sym, e);
                continue;
            }
        };

        if !quote.c.is_finite() || quote.c <= 0.0 {
            tracing::warn!("discarding bogus quote for {}: {}", sym, quote.c);
            continue;
        }

        cache.insert(PriceSample {
            symbol: sym,
            asset_type: AssetType::Stock,
            price: quote.c,
            change_24h: quote.dp,
            observed_at: Utc::now().timestamp(),
        });
    }

    Ok(())
}
