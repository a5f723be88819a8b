use feature_processing::error::StoreError;
use feature_processing::misc::{Document, FEATURE_COLUMNS, NUM_FEATURES, RecordId};
use feature_processing::store::FeatureStore;
use log::{debug, info};
use std::sync::Arc;
use thiserror::Error;

use crate::engine::{Classifier, ModelError};

#[derive(Error, Debug)]
pub enum PredictError {
    #[error("No data found in the database.")]
    NoData,

    #[error("Missing key in the input data: {0}")]
    SchemaMismatch(String),

    #[error("Missing values detected in the input data: {0}")]
    IncompleteInput(String),

    #[error("Latest record {latest} predates the requested extraction {expected}")]
    Stale { latest: RecordId, expected: RecordId },

    #[error("Feature store error: {0}")]
    Storage(#[from] StoreError),

    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Classifies the most recent feature record of one collection.
pub struct Predictor {
    store: Arc<dyn FeatureStore>,
    classifier: Arc<dyn Classifier>,
    collection: String,
}

impl Predictor {
    pub fn new(
        store: Arc<dyn FeatureStore>,
        classifier: Arc<dyn Classifier>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            store,
            classifier,
            collection: collection.into(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Keeps a completion token only when its extraction wrote to this predictor's
    /// collection. Ids are store-wide, so a token from another collection says nothing
    /// about this one. A token without a collection is taken as ours.
    pub fn relevant_token(
        &self,
        collection: Option<&str>,
        after: Option<RecordId>,
    ) -> Option<RecordId> {
        match collection {
            Some(source) if source != self.collection => {
                if let Some(id) = after {
                    debug!(
                        "Ignoring completion token {id} from collection {source}, predicting on {}",
                        self.collection
                    );
                }
                None
            }
            _ => after,
        }
    }

    /// Predicts on the latest record. With `after`, a record older than that id is rejected.
    pub async fn predict(&self, after: Option<RecordId>) -> Result<i64, PredictError> {
        let record = self
            .store
            .latest(&self.collection)
            .await?
            .ok_or(PredictError::NoData)?;

        if let Some(expected) = after {
            if record.id < expected {
                return Err(PredictError::Stale {
                    latest: record.id,
                    expected,
                });
            }
        }

        let row = project(&record.document)?;
        debug!("Model input for record {}: {row:?}", record.id);

        let label = self.classifier.predict(row).await?;
        info!("Prediction for record {}: {label}", record.id);
        Ok(label)
    }
}

/// Orders a stored document into the columns the classifier was trained on.
pub fn project(document: &Document) -> Result<[f64; NUM_FEATURES], PredictError> {
    if let Some(missing) = FEATURE_COLUMNS.iter().find(|c| !document.contains_key(**c)) {
        return Err(PredictError::SchemaMismatch(missing.to_string()));
    }

    let mut row = [0.0; NUM_FEATURES];
    for (slot, column) in row.iter_mut().zip(FEATURE_COLUMNS) {
        *slot = document[column]
            .as_f64()
            .filter(|value| value.is_finite())
            .ok_or_else(|| PredictError::IncompleteInput(column.to_string()))?;
    }
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn document(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn full() -> Value {
        json!({
            "avg_lagged_change": 2.6,
            "relative_volatility": 0.078,
            "price_range": 8.0,
            "change_lag2": 3.158,
            "change_lag1": 2.041,
            "change": 5.0,
            "Open": 103.0,
            "_extra": "ignored"
        })
    }

    struct Unused;

    #[async_trait::async_trait]
    impl Classifier for Unused {
        async fn predict(&self, _row: [f64; NUM_FEATURES]) -> Result<i64, ModelError> {
            Err(ModelError::Unavailable)
        }
    }

    fn predictor() -> Predictor {
        Predictor::new(
            Arc::new(feature_processing::store::MemoryStore::default()),
            Arc::new(Unused),
            "prices",
        )
    }

    #[test]
    fn token_from_another_collection_is_dropped() {
        let predictor = predictor();

        assert_eq!(predictor.relevant_token(Some("prices"), Some(4)), Some(4));
        assert_eq!(predictor.relevant_token(None, Some(4)), Some(4));
        assert_eq!(predictor.relevant_token(Some("btc_1m"), Some(4)), None);
        assert_eq!(predictor.relevant_token(Some("btc_1m"), None), None);
    }

    #[test]
    fn projects_in_training_order() {
        let row = project(&document(full())).unwrap();
        assert_eq!(row, [103.0, 5.0, 2.041, 3.158, 8.0, 0.078, 2.6]);
    }

    #[test]
    fn missing_column_is_schema_mismatch() {
        let mut doc = document(full());
        doc.remove("relative_volatility");

        match project(&doc) {
            Err(PredictError::SchemaMismatch(key)) => assert_eq!(key, "relative_volatility"),
            other => panic!("expected schema mismatch, got {other:?}"),
        }
    }

    #[test]
    fn null_value_is_incomplete_input() {
        let mut doc = document(full());
        doc.insert("change_lag1".to_string(), Value::Null);

        match project(&doc) {
            Err(PredictError::IncompleteInput(key)) => assert_eq!(key, "change_lag1"),
            other => panic!("expected incomplete input, got {other:?}"),
        }
    }

    #[test]
    fn schema_is_checked_before_values() {
        let mut doc = document(full());
        doc.insert("Open".to_string(), Value::Null);
        doc.remove("avg_lagged_change");

        assert!(matches!(project(&doc), Err(PredictError::SchemaMismatch(_))));
    }
}
