use anyhow::Result;
use data_ingestion::config::AppConfig;
use data_ingestion::fetcher::BrowserFetcher;
use data_ingestion::logger::init_logger;
use data_ingestion::parser::TableLayout;
use feature_processing::extraction::Extractor;
use feature_processing::store::open_store;
use log::info;
use std::sync::Arc;

/// Runs a single extraction cycle against the configured page and prints its outcome.
#[tokio::main]
async fn main() -> Result<()> {
    init_logger();

    let config = AppConfig::from_env()?;
    let store = open_store(&config.store)?;
    let fetcher = BrowserFetcher::new(config.fetcher.clone(), config.source.table_selector.clone());
    let extractor = Extractor::new(
        Arc::new(fetcher),
        store,
        TableLayout::with_selector(config.source.table_selector.clone()),
    );

    let outcome = extractor
        .run(&config.source.url, &config.store.collection)
        .await;
    info!("Extraction finished: {outcome:?}");
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    Ok(())
}
