use thiserror::Error;

use crate::client::ConnectionId;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Server full ({max} viewers)")]
    ServerFull { max: usize },

    #[error("Connection {0} is not the active source")]
    NotSource(ConnectionId),

    #[error("Relay is shutting down")]
    ShuttingDown,
}

pub type Result<T> = std::result::Result<T, RelayError>;
