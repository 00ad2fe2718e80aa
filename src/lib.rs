// Darkroom - background job engine and system configuration for a
// self-hosted photo and video library

pub mod config;
pub mod db;
pub mod models;
pub mod queue;
pub mod storage_template;
pub mod system_config;
pub mod types;
pub mod utils;

// Re-exports for convenience
pub use config::Config;
pub use models::AppState;
pub use types::{AppError, AppResult};
