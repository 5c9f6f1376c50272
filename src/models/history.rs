use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

use super::{AssetType, DipLevel};

/// Immutable snapshot of a firing event, persisted to `alert_history`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertHistoryRecord {
    #[serde(rename = "_id")]
    pub id: ObjectId,

    pub alert_id: ObjectId,
    pub user_id: ObjectId,
    pub symbol: String,
    pub asset_type: AssetType,

    pub level: DipLevel,
    pub current_price: f64,
    pub baseline_price: f64,
    pub drop_percentage: f64,
    pub threshold: f64,

    pub message: String,
    pub fired_at: i64,
}
