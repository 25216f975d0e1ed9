use std::path::PathBuf;

use thiserror::Error;

use crate::model::connection::ConnectionId;
use crate::model::view::Eye;

/// Faults raised by [`ClientSession`](crate::ClientSession) operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The session was built without one of its eye senders.
    #[error("{0} video sender is missing")]
    MissingVideoSender(Eye),

    /// An eye sender has no usable streaming size, so nothing can be bound.
    #[error("{0} video sender has no streaming size configured")]
    MissingStreamingSize(Eye),

    /// The broker refused one of the registrations made during bind.
    /// Registrations made earlier in the same bind have been withdrawn.
    #[error("registering {what} for connection {connection} failed: {source}")]
    Registration {
        connection: ConnectionId,
        what: String,
        #[source]
        source: BrokerError,
    },

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Sender(#[from] SenderError),

    #[error("failed to serialise event envelope: {0}")]
    Envelope(#[from] serde_json::Error),
}

/// Faults raised by media senders.
#[derive(Debug, Error)]
pub enum SenderError {
    #[error("bitrate of {0} kbps does not fit in bits per second")]
    BitrateOverflow(u64),

    #[error("sender {0} has no capture sources")]
    NoCaptureSources(String),

    #[error("invalid render config: {0}")]
    RenderConfig(String),

    #[error("render surface allocation failed: {0}")]
    Surface(String),

    #[error("rtp sender rejected parameters: {0}")]
    Parameters(String),
}

/// Faults returned by a [`Broker`](crate::Broker) registration.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("connection {0} is not known to this broker")]
    UnknownConnection(ConnectionId),

    #[error("connection {0} is closed")]
    Closed(ConnectionId),

    #[error("registration rejected: {0}")]
    Rejected(String),
}

/// Faults raised when writing to a data channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("no data channel is bound")]
    NotBound,

    #[error("data channel for connection {0} is closed")]
    Closed(ConnectionId),

    #[error("data channel write failed: {0}")]
    Write(String),
}

/// Faults raised while loading [`StreamConfig`](crate::config::StreamConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
