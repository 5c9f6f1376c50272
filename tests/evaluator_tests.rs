use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use mongodb::bson::oid::ObjectId;

use dipwatch::events::RealtimeBus;
use dipwatch::models::{Alert, AlertHistoryRecord, AssetType, DipLevel, PriceSample};
use dipwatch::services::alerts_service::AlertStore;
use dipwatch::services::cooldown::CooldownManager;
use dipwatch::services::evaluator::{
    Evaluator, decide_trigger_level, drop_percentage, should_reset_baseline,
};
use dipwatch::services::fanout::NotificationFanout;
use dipwatch::services::notifier::AlertNotifier;
use dipwatch::services::price_cache::PriceCache;

struct MemoryAlertStore {
    alerts: Mutex<Vec<Alert>>,
    history: Mutex<Vec<AlertHistoryRecord>>,
    fail_history: bool,
}

impl MemoryAlertStore {
    fn new(alerts: Vec<Alert>) -> Self {
        Self {
            alerts: Mutex::new(alerts),
            history: Mutex::new(Vec::new()),
            fail_history: false,
        }
    }

    fn baseline_of(&self, alert_id: ObjectId) -> Option<f64> {
        let alerts = self.alerts.lock().unwrap();
        alerts
            .iter()
            .find(|a| a.id == alert_id)
            .and_then(|a| a.baseline_price)
    }

    fn history_len(&self) -> usize {
        self.history.lock().unwrap().len()
    }

    fn history_levels(&self) -> Vec<DipLevel> {
        self.history.lock().unwrap().iter().map(|r| r.level).collect()
    }
}

#[async_trait]
impl AlertStore for MemoryAlertStore {
    async fn list_active_alerts(&self) -> Result<Vec<Alert>, String> {
        Ok(self
            .alerts
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.active)
            .cloned()
            .collect())
    }

    async fn list_active_symbols(&self, asset_type: AssetType) -> Result<Vec<String>, String> {
        Ok(self
            .alerts
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.active && a.asset_type == asset_type)
            .map(|a| a.symbol.clone())
            .collect())
    }

    async fn set_baseline(&self, alert_id: ObjectId, price: f64) -> Result<(), String> {
        let mut alerts = self.alerts.lock().unwrap();
        for alert in alerts.iter_mut() {
            if alert.id == alert_id {
                alert.baseline_price = Some(price);
            }
        }
        Ok(())
    }

    async fn insert_history(&self, record: &AlertHistoryRecord) -> Result<(), String> {
        if self.fail_history {
            return Err("history store down".to_string());
        }
        self.history.lock().unwrap().push(record.clone());
        Ok(())
    }
}

struct RecordingNotifier {
    sent: Mutex<Vec<AlertHistoryRecord>>,
}

impl RecordingNotifier {
    fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl AlertNotifier for RecordingNotifier {
    async fn send(&self, record: &AlertHistoryRecord) -> Result<(), String> {
        self.sent.lock().unwrap().push(record.clone());
        Ok(())
    }
}

fn make_alert(symbol: &str, baseline: Option<f64>) -> Alert {
    let now = Utc::now().timestamp();
    Alert {
        id: ObjectId::new(),
        user_id: ObjectId::new(),
        symbol: symbol.to_string(),
        asset_type: AssetType::Crypto,
        small_threshold: 5.0,
        medium_threshold: 10.0,
        large_threshold: 15.0,
        baseline_price: baseline,
        active: true,
        created_at: now,
        updated_at: now,
    }
}

fn sample(symbol: &str, price: f64) -> PriceSample {
    PriceSample {
        symbol: symbol.to_string(),
        asset_type: AssetType::Crypto,
        price,
        change_24h: 0.0,
        observed_at: Utc::now().timestamp(),
    }
}

struct Harness {
    store: Arc<MemoryAlertStore>,
    cache: PriceCache,
    cooldowns: Arc<CooldownManager>,
    notifier: Arc<RecordingNotifier>,
    bus: RealtimeBus,
    evaluator: Evaluator,
}

fn harness(store: MemoryAlertStore) -> Harness {
    let store = Arc::new(store);
    let cache = PriceCache::new(Duration::from_secs(300));
    let cooldowns = Arc::new(CooldownManager::new(Duration::from_secs(3600)));
    let notifier = Arc::new(RecordingNotifier::new());
    let bus = RealtimeBus::new(64);
    let fanout = NotificationFanout::new(store.clone(), bus.clone(), notifier.clone());
    let evaluator = Evaluator::new(store.clone(), cache.clone(), cooldowns.clone(), fanout);

    Harness {
        store,
        cache,
        cooldowns,
        notifier,
        bus,
        evaluator,
    }
}

/// Delivery runs on a spawned task; give it a moment to land.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[test]
fn tier_decisions_match_threshold_table() {
    let alert = make_alert("XBT/USD", Some(100.0));

    // 100 -> 96 is a 4% drop, under every threshold
    assert_eq!(decide_trigger_level(&alert, drop_percentage(100.0, 96.0)), None);
    assert_eq!(
        decide_trigger_level(&alert, drop_percentage(100.0, 94.0)),
        Some(DipLevel::Small)
    );
    assert_eq!(
        decide_trigger_level(&alert, drop_percentage(100.0, 89.0)),
        Some(DipLevel::Medium)
    );
    // a crash through all three tiers is exactly one large firing
    assert_eq!(
        decide_trigger_level(&alert, drop_percentage(100.0, 83.0)),
        Some(DipLevel::Large)
    );
}

#[test]
fn recovery_threshold_is_strict() {
    assert!(should_reset_baseline(100.0, 103.0));
    assert!(!should_reset_baseline(100.0, 101.9));
    assert!(!should_reset_baseline(100.0, 102.0));
}

#[tokio::test]
async fn first_observation_sets_baseline_without_firing() {
    let alert = make_alert("XBT/USD", None);
    let alert_id = alert.id;
    let h = harness(MemoryAlertStore::new(vec![alert]));

    h.cache.insert(sample("XBT/USD", 100.0));
    h.evaluator.run_tick().await.unwrap();

    assert_eq!(h.store.baseline_of(alert_id), Some(100.0));
    assert_eq!(h.store.history_len(), 0);
}

#[tokio::test]
async fn missing_price_skips_the_alert() {
    let alert = make_alert("XBT/USD", None);
    let alert_id = alert.id;
    let h = harness(MemoryAlertStore::new(vec![alert]));

    h.evaluator.run_tick().await.unwrap();

    assert_eq!(h.store.baseline_of(alert_id), None);
    assert_eq!(h.store.history_len(), 0);
}

#[tokio::test]
async fn stale_price_is_never_evaluated() {
    let alert = make_alert("XBT/USD", Some(100.0));
    let store = Arc::new(MemoryAlertStore::new(vec![alert]));
    let cache = PriceCache::new(Duration::from_millis(10));
    let cooldowns = Arc::new(CooldownManager::new(Duration::from_secs(3600)));
    let notifier = Arc::new(RecordingNotifier::new());
    let fanout = NotificationFanout::new(store.clone(), RealtimeBus::new(64), notifier);
    let evaluator = Evaluator::new(store.clone(), cache.clone(), cooldowns, fanout);

    // a 17% drop, but the sample ages past the TTL before the tick
    cache.insert(sample("XBT/USD", 83.0));
    tokio::time::sleep(Duration::from_millis(30)).await;

    evaluator.run_tick().await.unwrap();
    assert_eq!(store.history_len(), 0);
}

#[tokio::test]
async fn trigger_fires_fanout_and_registers_cooldown() {
    let alert = make_alert("XBT/USD", Some(100.0));
    let alert_id = alert.id;
    let user_id = alert.user_id;
    let h = harness(MemoryAlertStore::new(vec![alert]));
    let mut events = h.bus.subscribe();

    h.cache.insert(sample("XBT/USD", 89.0));
    h.evaluator.run_tick().await.unwrap();
    settle().await;

    // history persisted, exactly one medium firing
    assert_eq!(h.store.history_levels(), vec![DipLevel::Medium]);

    // realtime event reached the user's channel
    let evt = events.try_recv().expect("expected a realtime event");
    assert_eq!(evt.event, "dipAlert");
    assert_eq!(evt.user_id, user_id.to_hex());

    // external delivery requested
    assert_eq!(h.notifier.sent.lock().unwrap().len(), 1);

    // cooldown registered for the fired level only
    assert!(h.cooldowns.is_suppressed(alert_id, DipLevel::Medium).unwrap());
    assert!(!h.cooldowns.is_suppressed(alert_id, DipLevel::Large).unwrap());
}

#[tokio::test]
async fn cooldown_suppresses_repeats_but_not_higher_tiers() {
    let alert = make_alert("XBT/USD", Some(100.0));
    let h = harness(MemoryAlertStore::new(vec![alert]));

    h.cache.insert(sample("XBT/USD", 89.0));
    h.evaluator.run_tick().await.unwrap();
    assert_eq!(h.store.history_len(), 1);

    // condition still true next tick: suppressed
    h.evaluator.run_tick().await.unwrap();
    assert_eq!(h.store.history_len(), 1);

    // crash deepens into large territory: independent key, fires again
    h.cache.insert(sample("XBT/USD", 83.0));
    h.evaluator.run_tick().await.unwrap();
    settle().await;

    assert_eq!(
        h.store.history_levels(),
        vec![DipLevel::Medium, DipLevel::Large]
    );
}

#[tokio::test]
async fn recovery_resets_the_baseline() {
    let alert = make_alert("XBT/USD", Some(100.0));
    let alert_id = alert.id;
    let h = harness(MemoryAlertStore::new(vec![alert]));

    h.cache.insert(sample("XBT/USD", 103.0));
    h.evaluator.run_tick().await.unwrap();
    assert_eq!(h.store.baseline_of(alert_id), Some(103.0));

    // a later 10.7% drop measures from the new anchor, not the old 100
    h.cache.insert(sample("XBT/USD", 92.0));
    h.evaluator.run_tick().await.unwrap();
    assert_eq!(h.store.history_levels(), vec![DipLevel::Medium]);
}

#[tokio::test]
async fn one_bad_alert_does_not_abort_the_batch() {
    // corrupt baseline forces an evaluation error on the first alert
    let broken = make_alert("BAD/USD", Some(0.0));
    let healthy = make_alert("ETH/USD", Some(100.0));
    let h = harness(MemoryAlertStore::new(vec![broken, healthy]));

    h.cache.insert(sample("BAD/USD", 50.0));
    h.cache.insert(sample("ETH/USD", 83.0));
    h.evaluator.run_tick().await.unwrap();

    assert_eq!(h.store.history_levels(), vec![DipLevel::Large]);
}

#[tokio::test]
async fn history_outage_does_not_stop_realtime_or_delivery() {
    let alert = make_alert("XBT/USD", Some(100.0));
    let alert_id = alert.id;
    let mut store = MemoryAlertStore::new(vec![alert]);
    store.fail_history = true;
    let h = harness(store);
    let mut events = h.bus.subscribe();

    h.cache.insert(sample("XBT/USD", 89.0));
    h.evaluator.run_tick().await.unwrap();
    settle().await;

    assert_eq!(h.store.history_len(), 0);
    assert!(events.try_recv().is_ok());
    assert_eq!(h.notifier.sent.lock().unwrap().len(), 1);
    // cooldown still registers, otherwise the outage becomes a storm
    assert!(h.cooldowns.is_suppressed(alert_id, DipLevel::Medium).unwrap());
}
