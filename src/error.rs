//! Error types for the ingestion path

use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    /// Definition index error
    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    /// Ingestion error
    #[error("Ingestion error: {0}")]
    Ingestion(#[from] IngestionError),

    /// Transport error
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Metrics registration error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Definition index errors
///
/// A lookup that finds nothing is not an error: `get_definition` returns
/// `Ok(None)` for that case.
#[derive(Error, Debug)]
pub enum IndexError {
    /// Lookup called with an empty key
    #[error("Key cannot be an empty string")]
    EmptyKey,

    /// Definition failed validation; nothing was written
    #[error("Invalid definition: {0}")]
    InvalidDefinition(String),

    /// Search engine address is not `host:port`
    #[error("Invalid tcp addr {0:?}")]
    InvalidAddress(String),

    /// Connection to the search engine failed
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Search engine rejected or failed a request
    #[error("Query error: {0}")]
    QueryError(String),

    /// A bulk request failed
    #[error("Bulk request failed: {0}")]
    BulkFailed(String),

    /// Serialization failed
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Stored document could not be decoded
    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    /// Bulk indexer queue is closed
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// Index configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Message decoding errors
#[derive(Error, Debug)]
pub enum DecodeError {
    /// Message is shorter than the envelope header
    #[error("not enough data: {0} bytes")]
    TooShort(usize),

    /// Envelope carries an unknown payload format
    #[error("unknown format {0}")]
    UnknownFormat(u8),

    /// JSON payload could not be decoded
    #[error("json decode failed: {0}")]
    Json(#[from] serde_json::Error),

    /// MessagePack payload could not be decoded
    #[error("msgpack decode failed: {0}")]
    MsgPack(#[from] rmp_serde::decode::Error),

    /// Payload could not be encoded
    #[error("encode failed: {0}")]
    Encode(String),
}

/// Ingestion errors
#[derive(Error, Debug)]
pub enum IngestionError {
    /// Consumer was already started
    #[error("Consumer already started")]
    AlreadyStarted,

    /// Consumer is not running
    #[error("Consumer not running (state: {0})")]
    NotRunning(String),
}

/// Transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    /// Consumer configuration is invalid
    #[error("invalid config: {0}")]
    Config(String),

    /// Could not connect or subscribe
    #[error("failed to start consumer: {0}")]
    Connect(String),

    /// Offset could not be marked
    #[error("commit failed: {0}")]
    Commit(String),
}

impl From<rdkafka::error::KafkaError> for TransportError {
    fn from(e: rdkafka::error::KafkaError) -> Self {
        TransportError::Connect(e.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
