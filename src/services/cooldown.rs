use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use mongodb::bson::oid::ObjectId;

use crate::models::DipLevel;

/// Suppresses repeat notifications per (alert, level). Entries expire on
/// their own; absence means free to fire. Levels are independent keys, so
/// a suppressed "small" never blocks a later "large".
pub struct CooldownManager {
    default_ttl: Duration,
    entries: Mutex<HashMap<(ObjectId, DipLevel), Instant>>,
}

impl CooldownManager {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            default_ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// `Err` means the suppression state is unavailable; callers fail
    /// closed and skip firing.
    pub fn is_suppressed(&self, alert_id: ObjectId, level: DipLevel) -> Result<bool, String> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| "cooldown state unavailable (poisoned lock)".to_string())?;

        let key = (alert_id, level);
        match entries.get(&key) {
            Some(deadline) if *deadline > Instant::now() => Ok(true),
            Some(_) => {
                entries.remove(&key);
                Ok(false)
            }
            None => Ok(false),
        }
    }

    pub fn suppress(&self, alert_id: ObjectId, level: DipLevel) {
        self.suppress_for(alert_id, level, self.default_ttl);
    }

    pub fn suppress_for(&self, alert_id: ObjectId, level: DipLevel, ttl: Duration) {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries.insert((alert_id, level), Instant::now() + ttl);
    }

    /// Drops expired entries so the map tracks only live suppressions.
    pub fn sweep(&self) {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries.retain(|_, deadline| *deadline > now);
    }

    pub fn active_count(&self) -> usize {
        let entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn poisoned_lock_fails_closed() {
        let manager = Arc::new(CooldownManager::new(Duration::from_secs(60)));

        let poisoner = Arc::clone(&manager);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.entries.lock().unwrap();
            panic!("poison the cooldown lock");
        })
        .join();

        let alert_id = ObjectId::new();
        assert!(manager.is_suppressed(alert_id, DipLevel::Small).is_err());
    }
}
