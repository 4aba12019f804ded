//! Error types for objectloader
//!
//! This module provides the error handling for the library:
//! - Transport errors (network failures, non-success HTTP responses)
//! - Protocol errors (malformed batch lines, payloads that are not objects)
//! - Capacity errors (ring channel overflow)
//! - Lifecycle errors (use before initialization, use after disposal)
//!
//! Ring and channel operations report timeouts as `false`/`None`. Only the
//! item sink adapter, which has no such return value, raises
//! [`Error::ChannelTimeout`].

use thiserror::Error;

/// Result type alias for objectloader operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for objectloader
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "server_url")
        key: Option<String>,
    },

    /// Network error raised by the HTTP client
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The server refused the credentials (401/403)
    #[error("access denied: the server returned {status}")]
    AccessDenied {
        /// HTTP status code returned by the server
        status: u16,
    },

    /// The server answered with a non-success status
    #[error("failed to fetch objects: {status} {reason}")]
    HttpStatus {
        /// HTTP status code returned by the server
        status: u16,
        /// Canonical reason phrase, empty when unknown
        reason: String,
    },

    /// Malformed response data
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A payload carrying the raw-encoding marker arrived on the batch path
    #[error("object {id} is raw-encoded and must be fetched individually")]
    RawEncoded {
        /// Id of the offending object
        id: String,
    },

    /// A batch completed without delivering every requested id
    #[error("{count} requested objects were not downloaded: {}", sample.join(","))]
    MissingObjects {
        /// Number of ids that were requested but never delivered
        count: usize,
        /// Up to 10 of the missing ids
        sample: Vec<String>,
    },

    /// A single ring write can never fit, the channel must be rebuilt
    #[error("write of {requested} bytes exceeds ring capacity of {capacity} bytes")]
    Overflow {
        /// Size of the rejected write in bytes
        requested: usize,
        /// Usable capacity of the ring in bytes
        capacity: usize,
    },

    /// The consumer did not drain the channel in time
    #[error("timed out after {waited:?} waiting for channel space")]
    ChannelTimeout {
        /// How long the sender waited
        waited: std::time::Duration,
    },

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error (shared memory mapping, backing files)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// `add` was called before `initialize`
    #[error("download pool is not initialized")]
    NotInitialized,

    /// The component has been disposed and accepts no further work
    #[error("disposed: no further requests are accepted")]
    Disposed,
}

/// Malformed data in a fetch response
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A batch line had no TAB separating the id from the payload
    #[error("invalid line format in response: {line}")]
    MissingSeparator {
        /// The offending line, lossily decoded
        line: String,
    },

    /// Bytes that should have been UTF-8 were not
    #[error("invalid UTF-8 in response for object {id}")]
    InvalidUtf8 {
        /// Id of the object whose bytes were undecodable, lossily decoded
        id: String,
    },

    /// The payload failed to parse as JSON
    #[error("error parsing object {id}: {source}")]
    InvalidJson {
        /// Id of the object whose payload failed to parse
        id: String,
        /// Underlying parser error
        source: serde_json::Error,
    },

    /// The payload parsed but is not an object with a matching `id`
    #[error("{id} is not a base object")]
    NotABase {
        /// Id the payload was delivered under
        id: String,
    },

    /// A ring frame header announced a frame the ring cannot hold
    #[error("frame of {length} bytes exceeds ring capacity of {capacity} bytes")]
    OversizedFrame {
        /// Length announced by the frame header
        length: usize,
        /// Usable capacity of the ring
        capacity: usize,
    },
}

impl Error {
    /// Whether this error came from the transport layer (network or HTTP status)
    ///
    /// Transport failures are batch-scoped: the batch is dropped and logged,
    /// other batches keep running.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Network(_) | Error::AccessDenied { .. } | Error::HttpStatus { .. }
        )
    }

    /// Whether this error is a malformed-data error
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            Error::Protocol(_) | Error::RawEncoded { .. } | Error::MissingObjects { .. }
        )
    }

    pub(crate) fn config(message: impl Into<String>, key: &str) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }
}
