use async_trait::async_trait;
use data_ingestion::config::ModelConfig;
use feature_processing::misc::NUM_FEATURES;
use log::{error, info};
use onnxruntime::environment::Environment;
use onnxruntime::ndarray::Array2;
use onnxruntime::session::Session;
use onnxruntime::tensor::OrtOwnedTensor;
use onnxruntime::{GraphOptimizationLevel, LoggingLevel};
use std::path::PathBuf;
use std::sync::mpsc as std_mpsc;
use std::thread;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Failed to load model: {0}")]
    Load(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Model returned no label")]
    EmptyOutput,

    #[error("Inference engine is not running")]
    Unavailable,
}

/// A trained binary direction classifier.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Label for one feature row given in training column order.
    async fn predict(&self, row: [f64; NUM_FEATURES]) -> Result<i64, ModelError>;
}

struct InferenceRequest {
    row: [f64; NUM_FEATURES],
    reply: oneshot::Sender<Result<i64, ModelError>>,
}

/// Handle to an ONNX session owned by a dedicated thread.
///
/// The model is loaded once in [`InferenceEngine::load`] and never reloaded; requests from
/// any number of tasks are queued to the session thread.
#[derive(Clone)]
pub struct InferenceEngine {
    request_tx: mpsc::Sender<InferenceRequest>,
}

impl InferenceEngine {
    pub fn load(config: &ModelConfig) -> Result<Self, ModelError> {
        info!("🚀Loading classifier from {}...", config.path);
        let (request_tx, request_rx) = mpsc::channel(64);
        let (ready_tx, ready_rx) = std_mpsc::channel();
        let path = PathBuf::from(&config.path);
        let threads = config.threads;

        thread::Builder::new()
            .name("inference-engine".to_string())
            .spawn(move || run_session(path, threads, request_rx, ready_tx))
            .map_err(|e| ModelError::Load(e.to_string()))?;

        ready_rx
            .recv()
            .map_err(|_| ModelError::Load("inference thread exited during startup".to_string()))??;

        info!("Model loaded✅");
        Ok(Self { request_tx })
    }
}

#[async_trait]
impl Classifier for InferenceEngine {
    async fn predict(&self, row: [f64; NUM_FEATURES]) -> Result<i64, ModelError> {
        let (reply, response) = oneshot::channel();
        self.request_tx
            .send(InferenceRequest { row, reply })
            .await
            .map_err(|_| ModelError::Unavailable)?;
        response.await.map_err(|_| ModelError::Unavailable)?
    }
}

fn run_session(
    path: PathBuf,
    threads: i16,
    mut request_rx: mpsc::Receiver<InferenceRequest>,
    ready_tx: std_mpsc::Sender<Result<(), ModelError>>,
) {
    let environment = match Environment::builder()
        .with_name("direction_classifier")
        .with_log_level(LoggingLevel::Warning)
        .build()
    {
        Ok(environment) => environment,
        Err(e) => {
            let _ = ready_tx.send(Err(ModelError::Load(e.to_string())));
            return;
        }
    };

    let session = environment
        .new_session_builder()
        .and_then(|builder| builder.with_optimization_level(GraphOptimizationLevel::All))
        .and_then(|builder| builder.with_number_threads(threads))
        .and_then(|builder| builder.with_model_from_file(path));

    let mut session = match session {
        Ok(session) => session,
        Err(e) => {
            let _ = ready_tx.send(Err(ModelError::Load(e.to_string())));
            return;
        }
    };
    let _ = ready_tx.send(Ok(()));

    while let Some(request) = request_rx.blocking_recv() {
        let result = infer(&mut session, &request.row);
        if let Err(e) = &result {
            error!("{e}");
        }
        // the caller may have given up waiting
        let _ = request.reply.send(result);
    }
    info!("Inference engine stopped");
}

// The exported classifier takes one float32 row and yields the class label as int64.
fn infer(session: &mut Session<'_>, row: &[f64; NUM_FEATURES]) -> Result<i64, ModelError> {
    let input: Vec<f32> = row.iter().map(|value| *value as f32).collect();
    let input_array = Array2::from_shape_vec((1, NUM_FEATURES), input)
        .map_err(|e| ModelError::Inference(e.to_string()))?;

    let outputs: Vec<OrtOwnedTensor<i64, _>> = session
        .run(vec![input_array])
        .map_err(|e| ModelError::Inference(e.to_string()))?;

    outputs
        .first()
        .and_then(|labels| labels.iter().next().copied())
        .ok_or(ModelError::EmptyOutput)
}
