pub mod config;
pub mod error;
pub mod telemetry;

pub use config::Settings;
pub use error::AppError;

/// Result alias used by the library crates.
pub type Result<T, E = AppError> = std::result::Result<T, E>;
