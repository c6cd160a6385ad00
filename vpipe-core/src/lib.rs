pub mod broadcast;
pub mod cache;
pub mod config;
pub mod error;
pub mod ids;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod resilience;

pub use config::Config;
pub use error::{Error, Result};
