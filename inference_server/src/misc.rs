use feature_processing::misc::RecordId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Body of `POST /extract`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractRequest {
    pub url: String,
    #[serde(default, alias = "collectionName", skip_serializing_if = "Option::is_none")]
    pub collection_name: Option<String>,
}

/// Query of `GET /predict`. `after` is the id returned by the extraction the
/// prediction must observe, `collection` the collection that extraction wrote to.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PredictQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<RecordId>,
    #[serde(default, alias = "collectionName", skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PredictionResponse {
    Prediction { prediction: i64 },
    Error { error: String },
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Trading direction of a classifier label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signal {
    Short,
    Long,
}

impl TryFrom<i64> for Signal {
    type Error = i64;

    fn try_from(label: i64) -> Result<Self, Self::Error> {
        match label {
            0 => Ok(Signal::Short),
            1 => Ok(Signal::Long),
            other => Err(other),
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Short => write!(f, "Short"),
            Signal::Long => write!(f, "Long"),
        }
    }
}
