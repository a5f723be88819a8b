use async_trait::async_trait;
use feature_processing::extraction::ExtractionOutcome;
use feature_processing::misc::RecordId;
use log::debug;
use reqwest::Client;

use crate::automation::{LoopActions, PredictionOutcome};
use crate::misc::{ExtractRequest, PredictQuery, PredictionResponse};

/// Drives a running server's `/extract` and `/predict` endpoints.
pub struct RemoteActions {
    client: Client,
    server_url: String,
    request: ExtractRequest,
}

impl RemoteActions {
    pub fn new(server_url: &str, url: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            server_url: server_url.trim_end_matches('/').to_string(),
            request: ExtractRequest {
                url: url.into(),
                collection_name: Some(collection.into()),
            },
        }
    }
}

#[async_trait]
impl LoopActions for RemoteActions {
    async fn extract(&self) -> ExtractionOutcome {
        let endpoint = format!("{}/extract", self.server_url);
        debug!("POST {endpoint}");

        let response = match self.client.post(&endpoint).json(&self.request).send().await {
            Ok(response) => response,
            Err(e) => {
                return ExtractionOutcome::Error {
                    message: format!("Error during extraction: {e}"),
                };
            }
        };

        if !response.status().is_success() {
            return ExtractionOutcome::Error {
                message: format!("Extract endpoint failed with status code {}", response.status()),
            };
        }

        response
            .json::<ExtractionOutcome>()
            .await
            .unwrap_or_else(|e| ExtractionOutcome::Error {
                message: format!("Malformed extract response: {e}"),
            })
    }

    async fn predict(&self, after: Option<RecordId>) -> PredictionOutcome {
        let endpoint = format!("{}/predict", self.server_url);
        debug!("GET {endpoint}");

        let query = PredictQuery {
            after,
            collection: after.and(self.request.collection_name.clone()),
        };
        let request = self.client.get(&endpoint).query(&query);

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return PredictionOutcome::Failed(format!("Error during prediction: {e}")),
        };

        if !response.status().is_success() {
            return PredictionOutcome::Failed(format!(
                "Prediction endpoint failed with status code {}",
                response.status()
            ));
        }

        match response.json::<PredictionResponse>().await {
            Ok(PredictionResponse::Prediction { prediction }) => PredictionOutcome::Label(prediction),
            Ok(PredictionResponse::Error { error }) => PredictionOutcome::Failed(error),
            Err(e) => PredictionOutcome::Failed(format!("Malformed prediction response: {e}")),
        }
    }
}
