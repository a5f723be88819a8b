pub mod error;
pub mod extraction;
pub mod misc;
pub mod processor;
pub mod store;
