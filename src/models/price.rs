use serde::{Deserialize, Serialize};

use super::AssetType;

/// Latest observed price for one symbol. Cache-resident only; every new
/// observation overwrites the previous one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceSample {
    pub symbol: String,
    pub asset_type: AssetType,
    pub price: f64,
    pub change_24h: f64,
    pub observed_at: i64,
}
