//! Error types for the intake bot.

use crate::intake::validator::ValidationFailure;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Intake error: {0}")]
    Intake(#[from] IntakeError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Channel-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Failed to send message on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Failed to download file on channel {name}: {reason}")]
    DownloadFailed { name: String, reason: String },

    #[error("Channel health check failed: {name}")]
    HealthCheckFailed { name: String },
}

/// Blob storage errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Upload of {path} failed: {reason}")]
    UploadFailed { path: String, reason: String },

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures raised while advancing an intake conversation.
///
/// Every variant is converted into a user-visible reply at the message
/// boundary; none of them escape the engine.
#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationFailure),

    #[error("No step definition for step {step} (category {category})")]
    LookupInconsistency { step: u32, category: String },

    #[error("Upload failed: {0}")]
    Upload(String),

    #[error("Persisting record failed: {0}")]
    Persist(String),
}
