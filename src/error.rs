// MIT License - Copyright (c) 2026 telenot-bridge authors
// Error types

/// All errors that can occur in the telenot-bridge library.
#[derive(Debug, thiserror::Error)]
pub enum TelenotError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "serial")]
    #[error("Serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    #[error("Connection timeout")]
    ConnectionTimeout,

    #[error("Command timeout after {timeout_ms}ms: {command}")]
    CommandTimeout { command: String, timeout_ms: u64 },

    #[error("Invalid parameter: {details}")]
    InvalidParameter { details: String },

    #[error("Malformed telegram: {details}")]
    MalformedTelegram { details: String },

    #[error("Not connected to panel")]
    Disconnected,

    #[error("Channel closed")]
    ChannelClosed,
}

impl TelenotError {
    /// Whether this error is transient and the connection should be retried.
    ///
    /// Serial port errors are not retryable: a vanished or busy port needs
    /// an operator to fix it.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TelenotError::Io(_)
                | TelenotError::ConnectionTimeout
                | TelenotError::Disconnected
                | TelenotError::ChannelClosed
        )
    }

    pub(crate) fn malformed(details: impl Into<String>) -> Self {
        TelenotError::MalformedTelegram {
            details: details.into(),
        }
    }

    pub(crate) fn invalid(details: impl Into<String>) -> Self {
        TelenotError::InvalidParameter {
            details: details.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, TelenotError>;
