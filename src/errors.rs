//! Error types for the IoTaWatt client
//!
//! Uses thiserror for ergonomic error definitions.
//! These errors can be converted to anyhow::Error in the main application.

/// Failure of a single HTTP attempt before any response was received
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Request to {url} failed: {reason}")]
    Request { url: String, reason: String },

    #[error("Digest authentication failed: {0}")]
    Authentication(String),
}

/// IoTaWatt query, retrieval and dataset errors
#[derive(Debug, thiserror::Error)]
pub enum IotaWattError {
    #[error("Maximum number of retries exceeded ({attempts} tries) for query {query}")]
    ExhaustedRetries { query: String, attempts: u32 },

    #[error("Connection error code {status} for query {query}")]
    ConnectionFailure { query: String, status: u16 },

    #[error("Error parsing JSON response (length {length}) to query {query}")]
    ParseFailure { query: String, length: usize },

    #[error("Unexpected response to query {query}: {reason}")]
    UnexpectedResponse { query: String, reason: String },

    #[error("Channel topology mismatch: {0}")]
    Topology(String),

    #[error("Too many failures in accessing data block starting at time {timestamp}")]
    WindowRetryExhausted { timestamp: i64 },

    #[error("No data for channel {0}")]
    UnknownChannel(String),

    #[error("Unrecognized units {units} for channel {channel}")]
    UnsupportedUnits { channel: String, units: String },

    #[error("Invalid date/time '{0}'")]
    InvalidTimestamp(String),

    #[error("Sampling interval must be a positive multiple of 5 seconds, got {0}")]
    InvalidInterval(i64),

    #[error("Begin time {begin} is not before end time {end}")]
    InvalidRange { begin: i64, end: i64 },

    #[error("Download cancelled at time {timestamp}")]
    Cancelled { timestamp: i64 },

    #[error("Dataset storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
