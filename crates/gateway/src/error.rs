use thiserror::Error;

/// Errors returned by the outbound charge call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Gateway responded with status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("Gateway transport error: {0}")]
    Transport(String),

    #[error("Failed to decode gateway response: {0}")]
    Decode(String),

    #[error("Gateway client configuration error: {0}")]
    Config(String),
}

impl GatewayError {
    /// Returns true if the call may succeed when repeated.
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Transport(_) => true,
            GatewayError::UnexpectedStatus { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Errors raised while interpreting an inbound payment notification.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NotificationError {
    #[error("Invalid gross amount '{0}'")]
    InvalidAmount(String),
}

pub type Result<T> = std::result::Result<T, GatewayError>;
