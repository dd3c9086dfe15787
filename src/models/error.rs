use thiserror::Error;

/// Failure to establish the connection, reported to every caller of `connect`
/// that was waiting on the same attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("invalid endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("connection to {endpoint} failed: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    #[error("connection attempt to {endpoint} aborted by disconnect")]
    Aborted { endpoint: String },
}

/// Inbound data that could not be read as a message envelope.
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Faults the connection manager contains itself. They only ever reach logs.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectionFault {
    #[error("connection to {endpoint} closed unexpectedly")]
    UnexpectedDisconnect { endpoint: String },

    #[error("dropped outbound '{kind}' message, connection is not open")]
    SendWhileDisconnected { kind: String },
}
