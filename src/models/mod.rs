pub mod alert;
pub mod history;
pub mod price;

pub use alert::{Alert, AssetType, DipLevel, validate_thresholds};
pub use history::AlertHistoryRecord;
pub use price::PriceSample;
