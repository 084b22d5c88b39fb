//! Error types for the fluxbus runtime.

use thiserror::Error;

/// Main error type for binding and planning operations.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Unsupported or malformed properties, including invalid partition
    /// counts surfaced by the planner.
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// A binding could not be established or torn down.
    #[error("Binding failure for '{name}': {message}")]
    Binding { name: String, message: String },

    /// A partition extractor or selector could not be resolved.
    #[error("Failed to resolve strategy '{name}': {message}")]
    StrategyResolution { name: String, message: String },

    /// An expression could not be evaluated against a message or key.
    #[error("Failed to evaluate expression '{expression}': {message}")]
    Expression { expression: String, message: String },

    /// Invalid bus or registry configuration.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Errors surfaced from the core message layer.
    #[error(transparent)]
    Core(#[from] fluxbus_core::Error),

    /// Internal system errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Result type alias for fluxbus runtime operations.
pub type Result<T> = std::result::Result<T, Error>;
