//! Quota Module Error Types

/// Error types for quota operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QuotaError {
    /// Malformed limit definition
    #[error("Invalid quota limit '{0}': {1}")]
    InvalidLimit(String, String),

    /// Limit id not registered
    #[error("Quota limit not found: {0}")]
    UnknownLimit(String),

    /// Invalid manager configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Usage value that cannot be metered
    #[error("Invalid usage value {0}: must be finite and non-negative")]
    InvalidValue(f64),
}
