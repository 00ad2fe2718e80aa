// Shared error type for the job engine and system configuration

use crate::queue::QueueName;
use crate::system_config::FeatureFlag;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// A job payload does not match the shape its name requires.
    #[error("Invalid job: {0}")]
    InvalidJob(String),

    /// A proposed configuration was rejected. Nothing was persisted.
    #[error("Invalid configuration: {0}")]
    Validation(String),

    #[error("Cannot update configuration while DARKROOM_CONFIG_FILE is in use")]
    ReadOnlyConfig,

    #[error("Invalid configuration file: {0}")]
    InvalidConfigFile(String),

    /// A queue, job or config key name that is not part of this build.
    /// Only reachable through stale persisted data.
    #[error("Unknown name: {0}")]
    UnknownName(String),

    #[error("A handler is already bound to queue {0}")]
    HandlerAlreadyBound(QueueName),

    #[error("Feature {0} is not enabled")]
    FeatureDisabled(FeatureFlag),

    #[error("Job is already running: {0}")]
    JobAlreadyRunning(QueueName),

    #[error("Invalid command: {0}")]
    InvalidCommand(String),
}

pub type AppResult<T> = std::result::Result<T, AppError>;
