use thiserror::Error;

/// Main error type for the bitcoin-policy library.
#[derive(Error, Debug)]
pub enum PolicyError {
    /// Structural or value-range violation while reading estimates data.
    #[error("corrupt estimates data: {0}")]
    CorruptEstimatesFile(String),

    /// The estimates data was written by a newer, incompatible version.
    #[error("estimates data requires version {file_version}, up to {supported} is supported")]
    UnsupportedVersion { file_version: i32, supported: i32 },

    /// Invalid configuration provided.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O error from the underlying source or sink.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Type alias for Results in this library.
pub type Result<T> = std::result::Result<T, PolicyError>;

impl PolicyError {
    /// Creates a CorruptEstimatesFile error.
    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::CorruptEstimatesFile(msg.into())
    }

    /// Creates an InvalidConfig error.
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
}
