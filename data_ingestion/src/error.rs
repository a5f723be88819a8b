use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Browser launch failed: {0}")]
    Launch(String),

    #[error("Navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },

    #[error("Navigation timed out after {0:?}")]
    NavigationTimeout(Duration),

    #[error("Table `{selector}` was not ready after {timeout:?}")]
    TableTimeout { selector: String, timeout: Duration },

    #[error("Browser protocol error: {0}")]
    Protocol(String),
}

/// Reasons a rendered page yields no usable price history.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("Invalid table selector `{0}`")]
    InvalidSelector(String),

    #[error("No table found on the page")]
    TableNotFound,

    #[error("Not enough rows to extract lagged data: found {found}, need {required}")]
    NotEnoughRows { found: usize, required: usize },

    #[error("Row {index} ({label}) is empty or unparsable")]
    UnusableRow { index: usize, label: &'static str },
}
