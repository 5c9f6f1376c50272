use std::time::Duration;

use mongodb::bson::oid::ObjectId;

use dipwatch::models::DipLevel;
use dipwatch::services::cooldown::CooldownManager;

#[test]
fn suppression_is_scoped_per_alert_and_level() {
    let manager = CooldownManager::new(Duration::from_secs(3600));
    let alert_a = ObjectId::new();
    let alert_b = ObjectId::new();

    manager.suppress(alert_a, DipLevel::Medium);

    assert!(manager.is_suppressed(alert_a, DipLevel::Medium).unwrap());
    // other levels of the same alert stay free
    assert!(!manager.is_suppressed(alert_a, DipLevel::Small).unwrap());
    assert!(!manager.is_suppressed(alert_a, DipLevel::Large).unwrap());
    // other alerts are unaffected
    assert!(!manager.is_suppressed(alert_b, DipLevel::Medium).unwrap());
}

#[tokio::test]
async fn suppression_expires_on_its_own() {
    let manager = CooldownManager::new(Duration::from_secs(3600));
    let alert = ObjectId::new();

    manager.suppress_for(alert, DipLevel::Small, Duration::from_millis(20));
    assert!(manager.is_suppressed(alert, DipLevel::Small).unwrap());

    tokio::time::sleep(Duration::from_millis(40)).await;
    assert!(!manager.is_suppressed(alert, DipLevel::Small).unwrap());
}

#[tokio::test]
async fn sweep_drops_expired_entries() {
    let manager = CooldownManager::new(Duration::from_secs(3600));
    let alert = ObjectId::new();

    manager.suppress_for(alert, DipLevel::Small, Duration::from_millis(10));
    manager.suppress(alert, DipLevel::Large);
    assert_eq!(manager.active_count(), 2);

    tokio::time::sleep(Duration::from_millis(30)).await;
    manager.sweep();

    assert_eq!(manager.active_count(), 1);
    assert!(manager.is_suppressed(alert, DipLevel::Large).unwrap());
}
