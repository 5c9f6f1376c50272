use std::sync::Arc;

use chrono::Utc;
use mongodb::bson::oid::ObjectId;

use crate::events::RealtimeBus;
use crate::models::{Alert, AlertHistoryRecord, DipLevel, PriceSample};
use crate::services::alerts_service::AlertStore;
use crate::services::notifier::AlertNotifier;

/// Turns a trigger decision into its observable effects: a durable history
/// record, a realtime event on the owner's channel, and an external
/// delivery request.
#[derive(Clone)]
pub struct NotificationFanout {
    store: Arc<dyn AlertStore>,
    bus: RealtimeBus,
    notifier: Arc<dyn AlertNotifier>,
}

impl NotificationFanout {
    pub fn new(
        store: Arc<dyn AlertStore>,
        bus: RealtimeBus,
        notifier: Arc<dyn AlertNotifier>,
    ) -> Self {
        Self {
            store,
            bus,
            notifier,
        }
    }

    /// Never fails the caller. A history-insert error or delivery error is
    /// logged and the firing stands — re-firing every tick during a partial
    /// outage would be worse than a gap in history.
    pub async fn dispatch(
        &self,
        alert: &Alert,
        level: DipLevel,
        sample: &PriceSample,
        baseline: f64,
        drop_pct: f64,
    ) {
        let record = build_record(alert, level, sample, baseline, drop_pct);

        if let Err(e) = self.store.insert_history(&record).await {
            tracing::error!("failed to persist history for alert {}: {}", alert.id, e);
        }

        match serde_json::to_value(&record) {
            Ok(payload) => self.bus.emit_to_user(&alert.user_id, "dipAlert", payload),
            Err(e) => tracing::error!("failed to encode alert payload: {}", e),
        }

        let notifier = Arc::clone(&self.notifier);
        let delivery = record.clone();
        tokio::spawn(async move {
            if let Err(e) = notifier.send(&delivery).await {
                tracing::warn!(
                    "notification delivery failed for alert {}: {}",
                    delivery.alert_id,
                    e
                );
            }
        });

        tracing::info!(
            "alert {} fired {}: {} dropped {:.2}% from {:.2}",
            alert.id,
            level.as_str(),
            alert.symbol,
            drop_pct,
            baseline
        );
    }
}

pub fn build_record(
    alert: &Alert,
    level: DipLevel,
    sample: &PriceSample,
    baseline: f64,
    drop_pct: f64,
) -> AlertHistoryRecord {
    let threshold = alert.threshold_for(level);
    let message = format!(
        "{} is down {:.2}% from your {:.2} baseline (now {:.2}): {} dip alert ({:.1}%+)",
        alert.symbol, drop_pct, baseline, sample.price, level.as_str(), threshold
    );

    AlertHistoryRecord {
        id: ObjectId::new(),
        alert_id: alert.id,
        user_id: alert.user_id,
        symbol: alert.symbol.clone(),
        asset_type: alert.asset_type,
        level,
        current_price: sample.price,
        baseline_price: baseline,
        drop_percentage: drop_pct,
        threshold,
        message,
        fired_at: Utc::now().timestamp(),
    }
}
