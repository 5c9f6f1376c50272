use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetType {
    Crypto,
    Stock,
}

impl AssetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetType::Crypto => "crypto",
            AssetType::Stock => "stock",
        }
    }
}

/// The three drop tiers, smallest to largest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DipLevel {
    Small,
    Medium,
    Large,
}

impl DipLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            DipLevel::Small => "small",
            DipLevel::Medium => "medium",
            DipLevel::Large => "large",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    #[serde(rename = "_id")]
    pub id: ObjectId,

    pub user_id: ObjectId,
    pub symbol: String,
    pub asset_type: AssetType,

    // drop percentages, strictly ascending: small < medium < large
    pub small_threshold: f64,
    pub medium_threshold: f64,
    pub large_threshold: f64,

    // null until the first price observation
    pub baseline_price: Option<f64>,

    pub active: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Alert {
    pub fn threshold_for(&self, level: DipLevel) -> f64 {
        match level {
            DipLevel::Small => self.small_threshold,
            DipLevel::Medium => self.medium_threshold,
            DipLevel::Large => self.large_threshold,
        }
    }
}

/// Rejects threshold sets that are non-positive or not strictly ascending.
pub fn validate_thresholds(small: f64, medium: f64, large: f64) -> Result<(), String> {
    for t in [small, medium, large] {
        if !t.is_finite() || t <= 0.0 {
            return Err("thresholds must be positive percentages".to_string());
        }
    }
    if !(small < medium && medium < large) {
        return Err("thresholds must be ascending: small < medium < large".to_string());
    }
    Ok(())
}
