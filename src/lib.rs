// Core modules
pub mod api;
pub mod config;
pub mod execution;
pub mod indicators;
pub mod models;
pub mod persistence;
pub mod scheduler;
pub mod strategy;

// Re-export commonly used types
pub use api::{Broker, BrokerError};
pub use execution::PositionManager;
pub use models::*;
pub use scheduler::{CycleReport, Scheduler};
pub use strategy::Strategy;

// Error handling
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
