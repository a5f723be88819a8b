use anyhow::Result;
use data_ingestion::config::AppConfig;
use data_ingestion::fetcher::BrowserFetcher;
use data_ingestion::logger::init_logger;
use data_ingestion::parser::TableLayout;
use feature_processing::extraction::Extractor;
use feature_processing::store::open_store;
use inference_server::automation::{Automation, LocalActions, LoopTimings};
use inference_server::engine::InferenceEngine;
use inference_server::predictor::Predictor;
use inference_server::server::{AppState, Server};
use log::{error, info};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<()> {
    init_logger();
    let config = AppConfig::from_env()?;

    let store = open_store(&config.store)?;
    let classifier = Arc::new(InferenceEngine::load(&config.model)?);
    let fetcher = BrowserFetcher::new(config.fetcher.clone(), config.source.table_selector.clone());

    let extractor = Arc::new(Extractor::new(
        Arc::new(fetcher),
        store.clone(),
        TableLayout::with_selector(config.source.table_selector.clone()),
    ));
    let predictor = Arc::new(Predictor::new(store, classifier, config.store.collection.clone()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let automation = if config.automation.enabled {
        let actions = LocalActions::new(
            extractor.clone(),
            predictor.clone(),
            config.source.url.clone(),
            config.store.collection.clone(),
        );
        let automation = Automation::new(actions, LoopTimings::from(&config.automation));
        Some(tokio::spawn(async move { automation.run(shutdown_rx).await }))
    } else {
        None
    };

    let state = AppState {
        extractor,
        predictor,
        default_collection: config.store.collection.clone(),
    };

    let shutdown = async move {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {e}");
        }
        info!("Received shutdown signal, initiating graceful shutdown");
        let _ = shutdown_tx.send(true);
    };

    let listener = TcpListener::bind(&config.server.bind).await?;
    Server::init(state).run(listener, shutdown).await?;

    if let Some(automation) = automation {
        let cycles = automation.await?;
        info!("Automation finished after {cycles} cycles");
    }

    info!("Server has been shut down gracefully");
    Ok(())
}
