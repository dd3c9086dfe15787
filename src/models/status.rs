use serde::Serialize;
use std::fmt;

/// Lifecycle of the single shared connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Idle => write!(f, "idle"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Open => write!(f, "open"),
            ConnectionState::Closing => write!(f, "closing"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

/// What a UI shows as the connection indicator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConnectionStatus {
    Idle,
    Connecting,
    Open,
    /// Disconnected; the next automatic attempt fires after `retry_in_ms`.
    Reconnecting { attempt: u32, retry_in_ms: u64 },
    /// The retry ceiling was hit. Nothing happens until `connect` is called again.
    RecoveryStopped { attempts: u32 },
    Closed,
}

impl ConnectionStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionStatus::Open)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Idle => write!(f, "offline"),
            ConnectionStatus::Connecting => write!(f, "connecting"),
            ConnectionStatus::Open => write!(f, "connected"),
            ConnectionStatus::Reconnecting { attempt, retry_in_ms } => {
                write!(f, "disconnected, reconnecting (attempt {attempt} in {retry_in_ms} ms)")
            }
            ConnectionStatus::RecoveryStopped { attempts } => {
                write!(f, "disconnected, automatic reconnection stopped after {attempts} attempts")
            }
            ConnectionStatus::Closed => write!(f, "disconnected"),
        }
    }
}
