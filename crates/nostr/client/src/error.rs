//! Client error types

use crate::message::MessageError;
use std::fmt;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Client error type
#[derive(Error, Debug)]
pub enum ClientError {
    /// No relay connection is open
    #[error("Not connected to any relay")]
    NotConnected,

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Relay message could not be built or parsed
    #[error("Message error: {0}")]
    Message(#[from] MessageError),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Subscription error
    #[error("Subscription error: {0}")]
    Subscription(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Client result type
pub type Result<T> = std::result::Result<T, ClientError>;

/// Broad class of a transport failure, used to spot relays failing the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionErrorKind {
    /// Handshake rejected or TCP connection refused/reset
    Refused,
    /// Connect attempt exceeded the configured timeout
    Timeout,
    /// Other socket-level failure (DNS, unreachable, ...)
    Network,
    /// TLS negotiation failed
    Tls,
    /// Endpoint address is not a usable ws:// or wss:// URL
    InvalidUrl,
    /// The connection was already closed
    Closed,
    /// Anything else the transport reports
    Other,
}

impl fmt::Display for ConnectionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Refused => "refused",
            Self::Timeout => "timeout",
            Self::Network => "network",
            Self::Tls => "tls",
            Self::InvalidUrl => "invalid url",
            Self::Closed => "closed",
            Self::Other => "other",
        };
        f.write_str(name)
    }
}

/// A per-relay transport failure. Never leaves the pool except as a log line,
/// a [`crate::PoolEvent::Error`], or an aggregate diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
}

impl ConnectionError {
    pub fn new(kind: ConnectionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(after: std::time::Duration) -> Self {
        Self::new(
            ConnectionErrorKind::Timeout,
            format!("connection timeout after {:?}", after),
        )
    }

    pub fn invalid_url(message: impl Into<String>) -> Self {
        Self::new(ConnectionErrorKind::InvalidUrl, message)
    }
}

impl From<tungstenite::Error> for ConnectionError {
    fn from(err: tungstenite::Error) -> Self {
        use std::io::ErrorKind;
        use tungstenite::Error as WsError;

        let kind = match &err {
            WsError::Http(_) => ConnectionErrorKind::Refused,
            WsError::Io(io) => match io.kind() {
                ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset => {
                    ConnectionErrorKind::Refused
                }
                ErrorKind::TimedOut => ConnectionErrorKind::Timeout,
                _ => ConnectionErrorKind::Network,
            },
            WsError::Tls(_) => ConnectionErrorKind::Tls,
            WsError::Url(_) => ConnectionErrorKind::InvalidUrl,
            WsError::ConnectionClosed | WsError::AlreadyClosed => ConnectionErrorKind::Closed,
            _ => ConnectionErrorKind::Other,
        };
        Self::new(kind, err.to_string())
    }
}
