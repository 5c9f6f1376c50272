use std::env;

#[derive(Debug, Clone)]
pub struct Settings {
    pub mongodb_uri: String,
    pub mongodb_db: String,

    pub finnhub_api_key: String,
    pub kraken_ws_url: String,
    pub notify_webhook_url: String,

    pub eval_interval_secs: u64,
    pub poll_interval_secs: u64,
    pub subscription_sync_secs: u64,
    pub price_ttl_secs: u64,
    pub cooldown_secs: u64,
}

pub fn load() -> Settings {
    // Loads .env if present (no crash if missing)
    dotenvy::dotenv().ok();

    let mongodb_uri = env::var("MONGODB_URI")
        .unwrap_or_else(|_| "mongodb://localhost:27017".to_string());

    let mongodb_db = env::var("MONGODB_DB")
        .unwrap_or_else(|_| "dipwatch".to_string());

    let finnhub_api_key = env::var("FINNHUB_API_KEY").unwrap_or_default();

    let kraken_ws_url = env::var("KRAKEN_WS_URL")
        .unwrap_or_else(|_| "wss://ws.kraken.com".to_string());

    let notify_webhook_url = env::var("NOTIFY_WEBHOOK_URL").unwrap_or_default();

    let eval_interval_secs = env_u64("EVAL_INTERVAL_SECS", 60);
    let poll_interval_secs = env_u64("POLL_INTERVAL_SECS", 60);
    let subscription_sync_secs = env_u64("SUBSCRIPTION_SYNC_SECS", 60);
    let price_ttl_secs = env_u64("PRICE_TTL_SECS", 300);
    let cooldown_secs = env_u64("COOLDOWN_SECS", 3600);

    Settings {
        mongodb_uri,
        mongodb_db,
        finnhub_api_key,
        kraken_ws_url,
        notify_webhook_url,
        eval_interval_secs,
        poll_interval_secs,
        subscription_sync_secs,
        price_ttl_secs,
        cooldown_secs,
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(default)
}
