//! The extraction → prediction loop.
//!
//! `Idle → Extracting → PostExtractWait → Predicting → PostPredictWait → Extracting → …`
//!
//! Phases run strictly in order. A failed phase is reported and the loop carries on;
//! cancellation is observed before each cycle and during the waits, never mid-phase.

use async_trait::async_trait;
use data_ingestion::config::AutomationConfig;
use feature_processing::extraction::{ExtractionOutcome, Extractor};
use feature_processing::misc::RecordId;
use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Duration};

use crate::misc::Signal;
use crate::predictor::Predictor;

#[derive(Debug, Clone, PartialEq)]
pub enum PredictionOutcome {
    Label(i64),
    Failed(String),
}

/// The two actions the loop sequences.
#[async_trait]
pub trait LoopActions: Send + Sync {
    async fn extract(&self) -> ExtractionOutcome;

    /// `after` is the completion token of the extraction just performed, if it succeeded.
    async fn predict(&self, after: Option<RecordId>) -> PredictionOutcome;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Extracting,
    PostExtractWait,
    Predicting,
    PostPredictWait,
}

/// What the loop reports to whoever renders it.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopEvent {
    Phase(Phase),
    Extraction(ExtractionOutcome),
    Signal(Signal),
    Warning(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopTimings {
    pub extract_wait: Duration,
    pub predict_wait: Duration,
}

impl Default for LoopTimings {
    fn default() -> Self {
        Self {
            extract_wait: Duration::from_secs(5),
            predict_wait: Duration::from_secs(65),
        }
    }
}

impl From<&AutomationConfig> for LoopTimings {
    fn from(config: &AutomationConfig) -> Self {
        Self {
            extract_wait: Duration::from_secs(config.extract_wait_secs),
            predict_wait: Duration::from_secs(config.predict_wait_secs),
        }
    }
}

pub struct Automation<A> {
    actions: A,
    timings: LoopTimings,
    events: Option<mpsc::Sender<LoopEvent>>,
}

impl<A: LoopActions> Automation<A> {
    pub fn new(actions: A, timings: LoopTimings) -> Self {
        Self {
            actions,
            timings,
            events: None,
        }
    }

    pub fn with_events(mut self, events: mpsc::Sender<LoopEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Loops until `shutdown` turns true. Returns the number of completed cycles.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> u64 {
        info!("Automation started");
        let mut cycles = 0;

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.enter(Phase::Extracting).await;
            let extraction = self.actions.extract().await;
            let token = extraction.inserted_id();
            self.report_extraction(extraction).await;

            self.enter(Phase::PostExtractWait).await;
            if !wait(self.timings.extract_wait, &mut shutdown).await {
                break;
            }

            self.enter(Phase::Predicting).await;
            let prediction = self.actions.predict(token).await;
            self.report_prediction(prediction).await;
            cycles += 1;

            self.enter(Phase::PostPredictWait).await;
            if !wait(self.timings.predict_wait, &mut shutdown).await {
                break;
            }
        }

        self.enter(Phase::Idle).await;
        info!("Automation stopped after {cycles} cycles");
        cycles
    }

    async fn enter(&self, phase: Phase) {
        debug!("Automation phase: {phase:?}");
        self.emit(LoopEvent::Phase(phase)).await;
    }

    async fn report_extraction(&self, outcome: ExtractionOutcome) {
        match &outcome {
            ExtractionOutcome::Success { inserted_id } => {
                info!("Extraction succeeded, record {inserted_id}")
            }
            ExtractionOutcome::NoData { message } => warn!("Extraction found no data: {message}"),
            ExtractionOutcome::Error { message } => error!("Extraction failed: {message}"),
        }
        self.emit(LoopEvent::Extraction(outcome)).await;
    }

    async fn report_prediction(&self, outcome: PredictionOutcome) {
        let event = match outcome {
            PredictionOutcome::Label(label) => match Signal::try_from(label) {
                Ok(signal) => {
                    info!("Prediction: {signal}");
                    LoopEvent::Signal(signal)
                }
                Err(value) => {
                    let message = format!("Unexpected prediction value received: {value}");
                    warn!("{message}");
                    LoopEvent::Warning(message)
                }
            },
            PredictionOutcome::Failed(message) => {
                warn!("Prediction failed: {message}");
                LoopEvent::Warning(message)
            }
        };
        self.emit(event).await;
    }

    async fn emit(&self, event: LoopEvent) {
        if let Some(events) = &self.events {
            // a dropped receiver only means nobody is watching
            let _ = events.send(event).await;
        }
    }
}

/// Sleeps for `duration`; false when cancelled first.
async fn wait(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = time::sleep(duration) => true,
        _ = cancelled(shutdown) => false,
    }
}

async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            // nobody can cancel any more
            std::future::pending::<()>().await;
        }
    }
}

/// Runs both actions in this process.
pub struct LocalActions {
    extractor: Arc<Extractor>,
    predictor: Arc<Predictor>,
    url: String,
    collection: String,
}

impl LocalActions {
    pub fn new(
        extractor: Arc<Extractor>,
        predictor: Arc<Predictor>,
        url: impl Into<String>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            extractor,
            predictor,
            url: url.into(),
            collection: collection.into(),
        }
    }
}

#[async_trait]
impl LoopActions for LocalActions {
    async fn extract(&self) -> ExtractionOutcome {
        self.extractor.run(&self.url, &self.collection).await
    }

    async fn predict(&self, after: Option<RecordId>) -> PredictionOutcome {
        let after = self.predictor.relevant_token(Some(&self.collection), after);
        match self.predictor.predict(after).await {
            Ok(label) => PredictionOutcome::Label(label),
            Err(e) => PredictionOutcome::Failed(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Replays scripted outcomes, repeating the last one.
    struct Scripted {
        extractions: Mutex<VecDeque<ExtractionOutcome>>,
        predictions: Mutex<VecDeque<PredictionOutcome>>,
        tokens: Mutex<Vec<Option<RecordId>>>,
        extract_calls: AtomicUsize,
    }

    impl Scripted {
        fn new(extractions: Vec<ExtractionOutcome>, predictions: Vec<PredictionOutcome>) -> Self {
            Self {
                extractions: Mutex::new(extractions.into()),
                predictions: Mutex::new(predictions.into()),
                tokens: Mutex::new(Vec::new()),
                extract_calls: AtomicUsize::new(0),
            }
        }
    }

    fn next<T: Clone>(queue: &Mutex<VecDeque<T>>) -> T {
        let mut queue = queue.lock().unwrap();
        if queue.len() > 1 {
            queue.pop_front().unwrap()
        } else {
            queue.front().cloned().unwrap()
        }
    }

    #[async_trait]
    impl LoopActions for Arc<Scripted> {
        async fn extract(&self) -> ExtractionOutcome {
            self.extract_calls.fetch_add(1, Ordering::SeqCst);
            next(&self.extractions)
        }

        async fn predict(&self, after: Option<RecordId>) -> PredictionOutcome {
            self.tokens.lock().unwrap().push(after);
            next(&self.predictions)
        }
    }

    fn drain(rx: &mut mpsc::Receiver<LoopEvent>) -> Vec<LoopEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test(start_paused = true)]
    async fn phases_run_in_order_and_stop_at_wait_boundary() {
        let actions = Arc::new(Scripted::new(
            vec![ExtractionOutcome::Success { inserted_id: 3 }],
            vec![PredictionOutcome::Label(1)],
        ));
        let (events_tx, mut events_rx) = mpsc::channel(64);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let automation = Automation::new(actions.clone(), LoopTimings::default()).with_events(events_tx);

        let runner = tokio::spawn(async move { automation.run(shutdown_rx).await });
        // first cycle finishes at 5s, the second extraction starts at 70s
        time::sleep(Duration::from_secs(30)).await;
        shutdown_tx.send(true).unwrap();

        assert_eq!(runner.await.unwrap(), 1);
        assert_eq!(
            drain(&mut events_rx),
            vec![
                LoopEvent::Phase(Phase::Extracting),
                LoopEvent::Extraction(ExtractionOutcome::Success { inserted_id: 3 }),
                LoopEvent::Phase(Phase::PostExtractWait),
                LoopEvent::Phase(Phase::Predicting),
                LoopEvent::Signal(Signal::Long),
                LoopEvent::Phase(Phase::PostPredictWait),
                LoopEvent::Phase(Phase::Idle),
            ]
        );
        assert_eq!(*actions.tokens.lock().unwrap(), vec![Some(3)]);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_never_stop_the_loop() {
        let actions = Arc::new(Scripted::new(
            vec![
                ExtractionOutcome::Error { message: "Feature store unavailable".to_string() },
                ExtractionOutcome::NoData { message: "No table found on the page".to_string() },
                ExtractionOutcome::Success { inserted_id: 9 },
            ],
            vec![
                PredictionOutcome::Failed("No data found in the database.".to_string()),
                PredictionOutcome::Label(2),
                PredictionOutcome::Label(0),
            ],
        ));
        let (events_tx, mut events_rx) = mpsc::channel(64);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let automation = Automation::new(actions.clone(), LoopTimings::default()).with_events(events_tx);

        let runner = tokio::spawn(async move { automation.run(shutdown_rx).await });
        // three full cycles take 210s, the fourth extraction then waits until 215s
        time::sleep(Duration::from_secs(212)).await;
        shutdown_tx.send(true).unwrap();

        assert_eq!(runner.await.unwrap(), 3);
        let reports: Vec<LoopEvent> = drain(&mut events_rx)
            .into_iter()
            .filter(|e| matches!(e, LoopEvent::Signal(_) | LoopEvent::Warning(_)))
            .collect();
        assert_eq!(reports.len(), 3);
        assert_eq!(reports[0], LoopEvent::Warning("No data found in the database.".to_string()));
        match &reports[1] {
            LoopEvent::Warning(message) => assert!(message.contains("Unexpected prediction value")),
            other => panic!("expected warning, got {other:?}"),
        }
        assert_eq!(reports[2], LoopEvent::Signal(Signal::Short));
        assert_eq!(*actions.tokens.lock().unwrap(), vec![None, None, Some(9)]);
        assert_eq!(actions.extract_calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_before_start_runs_nothing() {
        let actions = Arc::new(Scripted::new(
            vec![ExtractionOutcome::Success { inserted_id: 1 }],
            vec![PredictionOutcome::Label(1)],
        ));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        shutdown_tx.send(true).unwrap();

        let cycles = Automation::new(actions.clone(), LoopTimings::default())
            .run(shutdown_rx)
            .await;

        assert_eq!(cycles, 0);
        assert_eq!(actions.extract_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelling_during_post_extract_wait_skips_prediction() {
        let actions = Arc::new(Scripted::new(
            vec![ExtractionOutcome::Success { inserted_id: 1 }],
            vec![PredictionOutcome::Label(1)],
        ));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let automation = Automation::new(actions.clone(), LoopTimings::default());

        let runner = tokio::spawn(async move { automation.run(shutdown_rx).await });
        time::sleep(Duration::from_secs(2)).await;
        shutdown_tx.send(true).unwrap();

        assert_eq!(runner.await.unwrap(), 0);
        assert_eq!(actions.extract_calls.load(Ordering::SeqCst), 1);
        assert!(actions.tokens.lock().unwrap().is_empty());
    }
}
