use thiserror::Error;

use crate::error_codes::ErrorCode;

/// Failure reported by a single [`Transport`](crate::transport::Transport) call.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("{}", .0.description())]
    Code(ErrorCode),

    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Code(code) => *code,
            Self::Io(e) => ErrorCode::from_io(e),
        }
    }

    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.code().is_retryable()
    }
}

impl From<ErrorCode> for TransportError {
    fn from(code: ErrorCode) -> Self {
        Self::Code(code)
    }
}

/// Failure of a [`Connection`](crate::connection::Connection) operation.
///
/// The `Display` text is exactly what the connection records as its last error.
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("Failed to create Modbus context: {0}")]
    Create(TransportError),

    #[error("Invalid Modbus context")]
    InvalidContext,

    #[error("Not connected")]
    NotConnected,

    #[error("Connection failed: {0}")]
    Connect(TransportError),

    #[error("{prefix}{source}")]
    Operation {
        prefix: &'static str,
        source: TransportError,
    },

    #[error("Set slave failed: {0}")]
    SetSlave(TransportError),

    #[error("config error: {0}")]
    Config(String),
}

impl LinkError {
    /// Underlying transport error code, when the failure came from the transport.
    #[must_use]
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Create(e) | Self::Connect(e) | Self::SetSlave(e) => Some(e.code()),
            Self::Operation { source, .. } => Some(source.code()),
            Self::InvalidContext | Self::NotConnected | Self::Config(_) => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, LinkError>;
