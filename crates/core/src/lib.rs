pub mod api;
pub mod bot_detection;
pub mod config;
pub mod error;
pub mod types;

pub use config::AppConfig;
pub use error::{CoreError, FailureKind, ScrapeError};
pub use types::*;
