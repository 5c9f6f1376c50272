use std::sync::Arc;
use std::time::Duration;

use tokio::time;

use crate::models::{Alert, DipLevel};
use crate::services::alerts_service::AlertStore;
use crate::services::cooldown::CooldownManager;
use crate::services::fanout::NotificationFanout;
use crate::services::price_cache::PriceCache;

/// A close more than 2% above the baseline re-anchors it, so the next dip
/// is measured from the recent local peak instead of a stale low.
pub const RECOVERY_FACTOR: f64 = 1.02;

pub fn drop_percentage(baseline: f64, current: f64) -> f64 {
    (baseline - current) / baseline * 100.0
}

/// The single highest tier whose threshold was reached, probed large to
/// small. A move through all three thresholds in one tick fires only the
/// large tier; that tie-break is deliberate.
pub fn decide_trigger_level(alert: &Alert, drop_pct: f64) -> Option<DipLevel> {
    if drop_pct >= alert.large_threshold {
        Some(DipLevel::Large)
    } else if drop_pct >= alert.medium_threshold {
        Some(DipLevel::Medium)
    } else if drop_pct >= alert.small_threshold {
        Some(DipLevel::Small)
    } else {
        None
    }
}

pub fn should_reset_baseline(baseline: f64, current: f64) -> bool {
    current > baseline * RECOVERY_FACTOR
}

/// Tick-driven decision engine over all active alerts. The pure decision
/// functions above do the thinking; this owns the scheduling and the I/O.
pub struct Evaluator {
    store: Arc<dyn AlertStore>,
    cache: PriceCache,
    cooldowns: Arc<CooldownManager>,
    fanout: NotificationFanout,
}

impl Evaluator {
    pub fn new(
        store: Arc<dyn AlertStore>,
        cache: PriceCache,
        cooldowns: Arc<CooldownManager>,
        fanout: NotificationFanout,
    ) -> Self {
        Self {
            store,
            cache,
            cooldowns,
            fanout,
        }
    }

    pub fn spawn(self: Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = time::interval(every);

            loop {
                interval.tick().await;

                if let Err(e) = self.run_tick().await {
                    tracing::error!("evaluator tick error: {}", e);
                }
            }
        })
    }

    /// One pass over all active alerts. A failure on one alert is logged
    /// and never aborts the rest of the batch.
    pub async fn run_tick(&self) -> Result<(), String> {
        let alerts = self.store.list_active_alerts().await?;

        for alert in alerts {
            if let Err(e) = self.evaluate_alert(&alert).await {
                tracing::error!("evaluation failed for alert {}: {}", alert.id, e);
            }
        }

        self.cooldowns.sweep();
        Ok(())
    }

    async fn evaluate_alert(&self, alert: &Alert) -> Result<(), String> {
        // no fresh price, no opinion
        let Some(sample) = self.cache.get(&alert.symbol, alert.asset_type) else {
            return Ok(());
        };

        // first observation establishes the baseline; it can never trigger
        let Some(baseline) = alert.baseline_price else {
            return self.store.set_baseline(alert.id, sample.price).await;
        };
        if !baseline.is_finite() || baseline <= 0.0 {
            return Err(format!("invalid baseline {baseline}"));
        }

        let drop_pct = drop_percentage(baseline, sample.price);

        if let Some(level) = decide_trigger_level(alert, drop_pct) {
            match self.cooldowns.is_suppressed(alert.id, level) {
                Ok(true) => {}
                Ok(false) => {
                    self.fanout
                        .dispatch(alert, level, &sample, baseline, drop_pct)
                        .await;
                    self.cooldowns.suppress(alert.id, level);
                }
                Err(e) => {
                    // fail closed: better a missed repeat than a storm
                    tracing::warn!("cooldown check failed for alert {}, skipping fire: {}", alert.id, e);
                }
            }
        }

        if should_reset_baseline(baseline, sample.price) {
            self.store.set_baseline(alert.id, sample.price).await?;
        }

        Ok(())
    }
}
