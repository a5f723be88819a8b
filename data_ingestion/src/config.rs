use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File, FileFormat, Map};
use serde::Deserialize;
use std::time::Duration;

/// Page the price history is scraped from.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub url: String,
    pub table_selector: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetcherConfig {
    pub navigation_timeout_secs: u64,
    pub table_timeout_secs: u64,
    pub settle_secs: u64,
    /// The table counts as rendered once it has strictly more rows than this.
    pub min_rendered_rows: usize,
    pub poll_interval_ms: u64,
    /// Grace period for the browser to exit before it is killed.
    pub close_timeout_secs: u64,
}

impl FetcherConfig {
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }

    pub fn table_timeout(&self) -> Duration {
        Duration::from_secs(self.table_timeout_secs)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_secs(self.close_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// SQLite database path, or `:memory:` for a process-local store.
    pub path: String,
    pub collection: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    pub path: String,
    pub threads: i16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AutomationConfig {
    pub enabled: bool,
    pub server_url: String,
    pub extract_wait_secs: u64,
    pub predict_wait_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub source: SourceConfig,
    pub fetcher: FetcherConfig,
    pub store: StoreConfig,
    pub model: ModelConfig,
    pub server: ServerConfig,
    pub automation: AutomationConfig,
}

impl AppConfig {
    /// Defaults, then `scraper.toml` if present, then `SCRAPER_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // a missing .env is fine, the variables may come from the real environment
        let _ = dotenvy::dotenv();
        Self::load(None)
    }

    fn load(env: Option<Map<String, String>>) -> Result<Self, ConfigError> {
        let cfg = defaults()?
            .add_source(File::new("scraper.toml", FileFormat::Toml).required(false))
            .add_source(
                Environment::with_prefix("SCRAPER")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .build()?;

        cfg.try_deserialize()
    }
}

fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Config::builder()
        .set_default("source.url", "https://www.cashbackforex.com/chart?s=BTC.USD-1m")?
        .set_default("source.table_selector", "table.chart-price-history-table")?
        .set_default("fetcher.navigation_timeout_secs", 60_i64)?
        .set_default("fetcher.table_timeout_secs", 15_i64)?
        .set_default("fetcher.settle_secs", 2_i64)?
        .set_default("fetcher.min_rendered_rows", 3_i64)?
        .set_default("fetcher.poll_interval_ms", 250_i64)?
        .set_default("fetcher.close_timeout_secs", 5_i64)?
        .set_default("store.path", "features.db")?
        .set_default("store.collection", "prices")?
        .set_default("model.path", "models/xgb_model.onnx")?
        .set_default("model.threads", 1_i64)?
        .set_default("server.bind", "0.0.0.0:11000")?
        .set_default("automation.enabled", false)?
        .set_default("automation.server_url", "http://127.0.0.1:11000")?
        .set_default("automation.extract_wait_secs", 5_i64)?
        .set_default("automation.predict_wait_secs", 65_i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_deployed_pipeline() {
        let cfg = AppConfig::load(Some(Map::new())).unwrap();

        assert_eq!(cfg.source.table_selector, "table.chart-price-history-table");
        assert_eq!(cfg.store.collection, "prices");
        assert_eq!(cfg.fetcher.navigation_timeout(), Duration::from_secs(60));
        assert_eq!(cfg.fetcher.table_timeout(), Duration::from_secs(15));
        assert_eq!(cfg.fetcher.min_rendered_rows, 3);
        assert_eq!(cfg.fetcher.close_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.automation.extract_wait_secs, 5);
        assert_eq!(cfg.automation.predict_wait_secs, 65);
        assert!(!cfg.automation.enabled);
    }

    #[test]
    fn environment_overrides_store_target() {
        let mut env = Map::new();
        env.insert("SCRAPER_STORE__PATH".to_string(), ":memory:".to_string());
        env.insert("SCRAPER_STORE__COLLECTION".to_string(), "btc_1m".to_string());
        env.insert("SCRAPER_AUTOMATION__PREDICT_WAIT_SECS".to_string(), "30".to_string());

        let cfg = AppConfig::load(Some(env)).unwrap();

        assert_eq!(cfg.store.path, ":memory:");
        assert_eq!(cfg.store.collection, "btc_1m");
        assert_eq!(cfg.automation.predict_wait_secs, 30);
    }
}
