use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Column order the classifier was trained with.
pub const FEATURE_COLUMNS: [&str; NUM_FEATURES] = [
    "Open",
    "change",
    "change_lag1",
    "change_lag2",
    "price_range",
    "relative_volatility",
    "avg_lagged_change",
];

pub const NUM_FEATURES: usize = 7;

/// Schemaless record as persisted by a feature store.
pub type Document = Map<String, Value>;

/// Insertion identifier assigned by a feature store, strictly increasing.
pub type RecordId = u64;

/// The feature vector of one extraction cycle. `change*` fields are percentages.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    #[serde(rename = "Open")]
    pub open: f64,
    pub change: f64,
    pub change_lag1: f64,
    pub change_lag2: f64,
    pub price_range: f64,
    pub relative_volatility: f64,
    pub avg_lagged_change: f64,
}

impl FeatureVector {
    /// Values in `FEATURE_COLUMNS` order.
    pub fn as_row(&self) -> [f64; NUM_FEATURES] {
        [
            self.open,
            self.change,
            self.change_lag1,
            self.change_lag2,
            self.price_range,
            self.relative_volatility,
            self.avg_lagged_change,
        ]
    }

    pub fn to_document(&self) -> Document {
        FEATURE_COLUMNS
            .iter()
            .zip(self.as_row())
            .map(|(column, value)| (column.to_string(), Value::from(value)))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub id: RecordId,
    pub document: Document,
}

impl StoredRecord {
    pub fn features(&self) -> Result<FeatureVector, serde_json::Error> {
        serde_json::from_value(Value::Object(self.document.clone()))
    }
}
