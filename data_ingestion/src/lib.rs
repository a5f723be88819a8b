pub mod config;
pub mod error;
pub mod fetcher;
pub mod logger;
pub mod parser;
