use anyhow::Result;
use axum::extract::{Query, State};
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use feature_processing::extraction::{ExtractionOutcome, Extractor};
use log::{info, warn};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::misc::{ExtractRequest, HealthResponse, PredictQuery, PredictionResponse};
use crate::predictor::Predictor;

/// Shared application state: the extraction cycle and the predictor.
#[derive(Clone)]
pub struct AppState {
    pub extractor: Arc<Extractor>,
    pub predictor: Arc<Predictor>,
    pub default_collection: String,
}

/// POST /extract runs one extraction cycle and reports its outcome.
pub async fn extract(
    State(state): State<AppState>,
    Json(request): Json<ExtractRequest>,
) -> Json<ExtractionOutcome> {
    let collection = request
        .collection_name
        .unwrap_or_else(|| state.default_collection.clone());
    Json(state.extractor.run(&request.url, &collection).await)
}

/// GET /predict classifies the latest feature record.
pub async fn predict(
    State(state): State<AppState>,
    Query(query): Query<PredictQuery>,
) -> Json<PredictionResponse> {
    let after = state
        .predictor
        .relevant_token(query.collection.as_deref(), query.after);
    match state.predictor.predict(after).await {
        Ok(prediction) => Json(PredictionResponse::Prediction { prediction }),
        Err(e) => {
            warn!("Prediction failed: {e}");
            Json(PredictionResponse::Error {
                error: e.to_string(),
            })
        }
    }
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/extract", post(extract))
        .route("/predict", get(predict))
        .route("/health", get(health))
        .with_state(state)
}

pub struct Server {
    state: AppState,
}

impl Server {
    pub fn init(state: AppState) -> Self {
        Self { state }
    }

    pub async fn run<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        info!("HTTP server running on {}", listener.local_addr()?);
        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }
}
