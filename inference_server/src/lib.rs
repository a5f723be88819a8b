pub mod automation;
pub mod client;
pub mod engine;
pub mod misc;
pub mod predictor;
pub mod server;
