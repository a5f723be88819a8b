use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to open feature store: {0}")]
    Open(#[source] rusqlite::Error),

    #[error("Feature store query failed: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Feature record is not valid JSON: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Feature store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("Feature store unavailable: {0}")]
    Unavailable(String),
}
