//! Error types for the Vigil service.

use thiserror::Error;

/// Main error type for Vigil operations.
///
/// Admission decisions never fail; only construction, configuration and the
/// transport can.
#[derive(Error, Debug)]
pub enum VigilError {
    /// Invalid configuration values
    #[error("Configuration error: {0}")]
    Config(String),

    /// Failure while reading or merging configuration sources
    #[error("Configuration source error: {0}")]
    ConfigSource(#[from] ::config::ConfigError),

    /// gRPC server errors
    #[error("gRPC error: {0}")]
    Grpc(#[from] tonic::transport::Error),
}

/// Result type alias for Vigil operations.
pub type Result<T> = std::result::Result<T, VigilError>;
