//! Runs the extraction/prediction loop against a remote inference server.

use anyhow::Result;
use data_ingestion::config::AppConfig;
use data_ingestion::logger::init_logger;
use feature_processing::extraction::ExtractionOutcome;
use inference_server::automation::{Automation, LoopEvent, LoopTimings, Phase};
use inference_server::client::RemoteActions;
use log::{info, warn};
use tokio::signal;
use tokio::sync::{mpsc, watch};

fn render(event: LoopEvent, timings: &LoopTimings) {
    match event {
        LoopEvent::Phase(Phase::Extracting) => info!("Starting data extraction..."),
        LoopEvent::Phase(Phase::PostExtractWait) => {
            info!("Waiting {:?} to ensure extraction is complete...", timings.extract_wait)
        }
        LoopEvent::Phase(Phase::Predicting) => info!("Fetching prediction..."),
        LoopEvent::Phase(Phase::PostPredictWait) => {
            info!("Waiting {:?} before the next cycle...", timings.predict_wait)
        }
        LoopEvent::Phase(Phase::Idle) => info!("Automation idle"),
        LoopEvent::Extraction(ExtractionOutcome::Success { inserted_id }) => {
            info!("Data extraction succeeded (record {inserted_id})")
        }
        LoopEvent::Extraction(outcome) => warn!("Data extraction did not succeed: {outcome:?}"),
        LoopEvent::Signal(signal) => println!("{signal}"),
        LoopEvent::Warning(message) => warn!("{message}"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logger();
    let config = AppConfig::from_env()?;
    let timings = LoopTimings::from(&config.automation);

    let actions = RemoteActions::new(
        &config.automation.server_url,
        config.source.url.clone(),
        config.store.collection.clone(),
    );
    let (event_tx, mut event_rx) = mpsc::channel(64);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let automation = Automation::new(actions, timings).with_events(event_tx);

    info!("Automation started against {}. Press Ctrl-C to stop.", config.automation.server_url);
    let runner = tokio::spawn(async move { automation.run(shutdown_rx).await });

    loop {
        tokio::select! {
            event = event_rx.recv() => match event {
                Some(event) => render(event, &timings),
                None => break,
            },
            _ = signal::ctrl_c() => {
                info!("Received shutdown signal, stopping at the next wait boundary");
                let _ = shutdown_tx.send(true);
                break;
            }
        }
    }

    // the loop may be blocked on a full event channel
    drop(event_rx);
    let cycles = runner.await?;
    info!("Automation stopped after {cycles} cycles");
    Ok(())
}
