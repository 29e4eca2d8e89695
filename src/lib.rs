// Core modules
pub mod classifier;
pub mod config;
pub mod correlation;
pub mod engine;
pub mod execution;
pub mod feed;
pub mod indicators;
pub mod lifecycle;
pub mod models;
pub mod persistence;
pub mod risk;
pub mod sizing;
pub mod strategy;

// Re-export commonly used types
pub use models::*;
pub use strategy::Strategy;

// Error handling
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
