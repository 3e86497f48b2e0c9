use thiserror::Error as ThisError;
use tokio_tungstenite::tungstenite;

#[derive(ThisError, Debug)]
pub enum RelayError {
    #[error("Node unavailable: {0}")]
    Unavailable(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    SerdeJsonError(#[from] serde_json::Error),

    #[error(transparent)]
    SqliteError(#[from] rusqlite::Error),
}

impl RelayError {
    /// True when the peer could not be reached at all, as opposed to a
    /// failure in the middle of an established exchange.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, RelayError::Unavailable(_))
    }

    /// Classify a WebSocket error into the unavailable / other split used by
    /// the reconnect loops.
    pub fn from_ws(err: tungstenite::Error) -> Self {
        use std::io::ErrorKind;
        use tungstenite::Error as WsError;

        match err {
            WsError::Io(io) => match io.kind() {
                ErrorKind::ConnectionRefused
                | ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::NotConnected
                | ErrorKind::AddrNotAvailable
                | ErrorKind::TimedOut
                | ErrorKind::BrokenPipe
                | ErrorKind::UnexpectedEof => RelayError::Unavailable(io.to_string()),
                _ => RelayError::Transport(io.to_string()),
            },
            WsError::Http(response) => {
                let status = response.status();
                if status.as_u16() == 502 || status.as_u16() == 503 || status.as_u16() == 504 {
                    RelayError::Unavailable(format!("handshake rejected with {}", status))
                } else {
                    RelayError::Transport(format!("handshake rejected with {}", status))
                }
            }
            WsError::ConnectionClosed | WsError::AlreadyClosed => {
                RelayError::Unavailable("connection closed".to_string())
            }
            other => RelayError::Transport(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refused_connection_is_unavailable() {
        let err = tungstenite::Error::Io(std::io::Error::from(std::io::ErrorKind::ConnectionRefused));
        assert!(RelayError::from_ws(err).is_unavailable());
    }

    #[test]
    fn test_protocol_failure_is_not_unavailable() {
        let err = tungstenite::Error::Capacity(tungstenite::error::CapacityError::TooManyHeaders);
        let classified = RelayError::from_ws(err);
        assert!(!classified.is_unavailable());
        assert!(matches!(classified, RelayError::Transport(_)));
    }

    #[test]
    fn test_closed_connection_is_unavailable() {
        assert!(RelayError::from_ws(tungstenite::Error::ConnectionClosed).is_unavailable());
    }
}
