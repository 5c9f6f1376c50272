use std::sync::OnceLock;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::StreamExt;
use mongodb::Database;
use mongodb::bson::{Bson, doc, oid::ObjectId};
use regex::Regex;

use crate::models::{Alert, AlertHistoryRecord, AssetType, validate_thresholds};

/// Durable-store seam the monitor runs against. Production is Mongo; tests
/// inject an in-memory double.
#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn list_active_alerts(&self) -> Result<Vec<Alert>, String>;

    async fn list_active_symbols(&self, asset_type: AssetType) -> Result<Vec<String>, String>;

    async fn set_baseline(&self, alert_id: ObjectId, price: f64) -> Result<(), String>;

    async fn insert_history(&self, record: &AlertHistoryRecord) -> Result<(), String>;
}

pub struct MongoAlertStore {
    db: Database,
}

impl MongoAlertStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn create_alert(
        &self,
        user_id: ObjectId,
        symbol: &str,
        asset_type: AssetType,
        small: f64,
        medium: f64,
        large: f64,
    ) -> Result<Alert, String> {
        let sym = normalize_symbol(symbol)?;
        validate_thresholds(small, medium, large)?;

        let alerts = self.db.collection::<Alert>("alerts");

        // at most one active alert per (user, symbol, asset type); the
        // partial index backs this up against races
        let existing = alerts
            .find_one(
                doc! {
                    "user_id": user_id,
                    "symbol": &sym,
                    "asset_type": asset_type.as_str(),
                    "active": true,
                },
                None,
            )
            .await
            .map_err(|e| e.to_string())?;
        if existing.is_some() {
            return Err(format!("an active alert for {sym} already exists"));
        }

        let now = Utc::now().timestamp();
        let alert = Alert {
            id: ObjectId::new(),
            user_id,
            symbol: sym,
            asset_type,
            small_threshold: small,
            medium_threshold: medium,
            large_threshold: large,
            baseline_price: None,
            active: true,
            created_at: now,
            updated_at: now,
        };

        alerts
            .insert_one(&alert, None)
            .await
            .map_err(|e| e.to_string())?;

        Ok(alert)
    }

    pub async fn update_thresholds(
        &self,
        user_id: ObjectId,
        alert_id: ObjectId,
        small: f64,
        medium: f64,
        large: f64,
    ) -> Result<(), String> {
        validate_thresholds(small, medium, large)?;

        let alerts = self.db.collection::<Alert>("alerts");
        let res = alerts
            .update_one(
                doc! { "_id": alert_id, "user_id": user_id },
                doc! { "$set": {
                    "small_threshold": small,
                    "medium_threshold": medium,
                    "large_threshold": large,
                    "updated_at": Utc::now().timestamp(),
                } },
                None,
            )
            .await
            .map_err(|e| e.to_string())?;

        if res.matched_count == 0 {
            return Err("alert not found".to_string());
        }
        Ok(())
    }

    /// Soft delete (active=false) keeps the row for history joins.
    pub async fn set_active(
        &self,
        user_id: ObjectId,
        alert_id: ObjectId,
        active: bool,
    ) -> Result<(), String> {
        let alerts = self.db.collection::<Alert>("alerts");
        let res = alerts
            .update_one(
                doc! { "_id": alert_id, "user_id": user_id },
                doc! { "$set": { "active": active, "updated_at": Utc::now().timestamp() } },
                None,
            )
            .await
            .map_err(|e| e.to_string())?;

        if res.matched_count == 0 {
            return Err("alert not found".to_string());
        }
        Ok(())
    }

    pub async fn delete_alert(&self, user_id: ObjectId, alert_id: ObjectId) -> Result<(), String> {
        let alerts = self.db.collection::<Alert>("alerts");
        alerts
            .delete_one(doc! { "_id": alert_id, "user_id": user_id }, None)
            .await
            .map_err(|e| e.to_string())?;
        Ok(())
    }
}

#[async_trait]
impl AlertStore for MongoAlertStore {
    async fn list_active_alerts(&self) -> Result<Vec<Alert>, String> {
        let alerts = self.db.collection::<Alert>("alerts");

        let mut cursor = alerts
            .find(doc! { "active": true }, None)
            .await
            .map_err(|e| e.to_string())?;

        let mut items: Vec<Alert> = Vec::new();
        while let Some(res) = cursor.next().await {
            items.push(res.map_err(|e| e.to_string())?);
        }
        Ok(items)
    }

    async fn list_active_symbols(&self, asset_type: AssetType) -> Result<Vec<String>, String> {
        let alerts = self.db.collection::<Alert>("alerts");

        let values = alerts
            .distinct(
                "symbol",
                doc! { "active": true, "asset_type": asset_type.as_str() },
                None,
            )
            .await
            .map_err(|e| e.to_string())?;

        Ok(values
            .into_iter()
            .filter_map(|v| match v {
                Bson::String(s) => Some(s),
                _ => None,
            })
            .collect())
    }

    async fn set_baseline(&self, alert_id: ObjectId, price: f64) -> Result<(), String> {
        let alerts = self.db.collection::<Alert>("alerts");
        alerts
            .update_one(
                doc! { "_id": alert_id },
                doc! { "$set": { "baseline_price": price, "updated_at": Utc::now().timestamp() } },
                None,
            )
            .await
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    async fn insert_history(&self, record: &AlertHistoryRecord) -> Result<(), String> {
        let history = self.db.collection::<AlertHistoryRecord>("alert_history");
        history
            .insert_one(record, None)
            .await
            .map_err(|e| e.to_string())?;
        Ok(())
    }
}

/// Uppercases and sanity-checks a user-supplied symbol ("AAPL", "XBT/USD",
/// "BRK.B").
pub fn normalize_symbol(symbol: &str) -> Result<String, String> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let re = PATTERN.get_or_init(|| Regex::new(r"^[A-Z0-9][A-Z0-9./-]{0,19}$").expect("symbol regex"));

    let sym = symbol.trim().to_uppercase();
    if !re.is_match(&sym) {
        return Err(format!("invalid symbol: {symbol}"));
    }
    Ok(sym)
}
