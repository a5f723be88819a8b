use data_ingestion::fetcher::PageSource;
use data_ingestion::parser::TableLayout;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::misc::RecordId;
use crate::processor::extract_features;
use crate::store::FeatureStore;

/// Result of one fetch → parse → compute → persist cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExtractionOutcome {
    Success { inserted_id: RecordId },
    /// The page loaded but did not carry enough usable history.
    NoData { message: String },
    Error { message: String },
}

impl ExtractionOutcome {
    /// The completion token of a successful cycle.
    pub fn inserted_id(&self) -> Option<RecordId> {
        match self {
            ExtractionOutcome::Success { inserted_id } => Some(*inserted_id),
            _ => None,
        }
    }
}

pub struct Extractor {
    source: Arc<dyn PageSource>,
    store: Arc<dyn FeatureStore>,
    layout: TableLayout,
}

impl Extractor {
    pub fn new(source: Arc<dyn PageSource>, store: Arc<dyn FeatureStore>, layout: TableLayout) -> Self {
        Self {
            source,
            store,
            layout,
        }
    }

    /// Runs one extraction cycle. Every failure is folded into the outcome.
    pub async fn run(&self, url: &str, collection: &str) -> ExtractionOutcome {
        info!("Starting data extraction process.");

        let markup = match self.source.fetch(url).await {
            Ok(markup) => markup,
            Err(e) => {
                return ExtractionOutcome::Error {
                    message: e.to_string(),
                };
            }
        };

        let snapshot = match self.layout.parse(&markup) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("{e}");
                return ExtractionOutcome::NoData {
                    message: e.to_string(),
                };
            }
        };

        let features = extract_features(&snapshot);
        info!("Extracted features: {features:?}");

        match self.store.insert(collection, &features).await {
            Ok(inserted_id) => {
                info!("Features inserted into `{collection}` with id {inserted_id}");
                ExtractionOutcome::Success { inserted_id }
            }
            Err(e) => {
                error!("Error inserting features into `{collection}`: {e}");
                ExtractionOutcome::Error {
                    message: e.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::misc::{FeatureVector, StoredRecord};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use data_ingestion::error::FetchError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FixturePage(Result<String, ()>);

    #[async_trait]
    impl PageSource for FixturePage {
        async fn fetch(&self, _url: &str) -> Result<String, FetchError> {
            self.0.clone().map_err(|_| FetchError::NavigationTimeout(Duration::from_secs(60)))
        }
    }

    /// Store whose backend is gone; counts attempted writes.
    #[derive(Default)]
    struct UnreachableStore {
        writes: AtomicUsize,
    }

    #[async_trait]
    impl FeatureStore for UnreachableStore {
        async fn insert(&self, _: &str, _: &FeatureVector) -> Result<RecordId, StoreError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        async fn latest(&self, _: &str) -> Result<Option<StoredRecord>, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
    }

    fn page(closes: &[f64]) -> String {
        let rows: String = closes
            .iter()
            .enumerate()
            .map(|(i, close)| {
                let (open, high, low) = if i == 1 {
                    (103.0, 110.0, 102.0)
                } else {
                    (*close, *close, *close)
                };
                format!(
                    "<tr><td>t-{i}</td><td>{open}</td><td>{high}</td><td>{low}</td><td>{close}</td></tr>"
                )
            })
            .collect();
        format!(
            "<table class=\"chart-price-history-table\">\
             <tr><th>Date</th><th>Open</th><th>High</th><th>Low</th><th>Close</th></tr>{rows}</table>"
        )
    }

    fn extractor(markup: Result<String, ()>, store: Arc<dyn FeatureStore>) -> Extractor {
        Extractor::new(Arc::new(FixturePage(markup)), store, TableLayout::default())
    }

    #[tokio::test]
    async fn persists_features_of_reference_page() {
        let store = Arc::new(MemoryStore::default());
        let outcome = extractor(Ok(page(&[106.0, 105.0, 100.0, 98.0, 95.0])), store.clone())
            .run("https://example.test/chart", "prices")
            .await;

        assert_eq!(outcome, ExtractionOutcome::Success { inserted_id: 1 });
        let stored = store.latest("prices").await.unwrap().unwrap().features().unwrap();
        assert_eq!(stored.open, 103.0);
        assert_eq!(stored.change, 5.0);
        assert_eq!(stored.price_range, 8.0);
        assert!((stored.change_lag1 - 2.041).abs() < 1e-3);
        assert!((stored.change_lag2 - 3.158).abs() < 1e-3);
        assert!((stored.relative_volatility - 0.0777).abs() < 1e-4);
        assert!((stored.avg_lagged_change - 2.599).abs() < 1e-3);
    }

    #[tokio::test]
    async fn short_table_is_no_data_without_write() {
        let store = Arc::new(UnreachableStore::default());
        let outcome = extractor(Ok(page(&[106.0, 105.0])), store.clone())
            .run("https://example.test/chart", "prices")
            .await;

        assert!(matches!(outcome, ExtractionOutcome::NoData { .. }));
        assert_eq!(store.writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unreachable_store_is_an_error() {
        let store = Arc::new(UnreachableStore::default());
        let outcome = extractor(Ok(page(&[106.0, 105.0, 100.0, 98.0, 95.0])), store.clone())
            .run("https://example.test/chart", "prices")
            .await;

        match outcome {
            ExtractionOutcome::Error { message } => assert!(!message.is_empty()),
            other => panic!("expected error outcome, got {other:?}"),
        }
        assert_eq!(store.writes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn navigation_failure_is_an_error() {
        let outcome = extractor(Err(()), Arc::new(MemoryStore::default()))
            .run("https://example.test/chart", "prices")
            .await;

        assert!(matches!(outcome, ExtractionOutcome::Error { .. }));
        assert_eq!(outcome.inserted_id(), None);
    }

    #[test]
    fn outcome_wire_format() {
        let success = serde_json::to_value(ExtractionOutcome::Success { inserted_id: 7 }).unwrap();
        assert_eq!(success, serde_json::json!({"status": "success", "inserted_id": 7}));

        let no_data = serde_json::to_value(ExtractionOutcome::NoData {
            message: "No table found on the page".to_string(),
        })
        .unwrap();
        assert_eq!(no_data["status"], "no_data");
    }
}
