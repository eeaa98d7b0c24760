//! Error types for the connection engine.
//!
//! Network faults are absorbed by [`Connection`](crate::Connection) into a
//! disconnected state; the variants here are what remains visible to callers:
//! configuration problems, protocol-handling invariant violations and
//! lookups of entities that do not exist.

use std::path::PathBuf;

use thiserror::Error;

/// Convenience type alias for Results using [`EngineError`].
pub type Result<T, E = EngineError> = std::result::Result<T, E>;

/// Top-level engine errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    /// I/O error while connecting.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration, fatal at connect time.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// TLS client setup failed.
    #[error("tls error: {0}")]
    Tls(#[from] tokio_rustls::rustls::Error),

    /// Hostname is not usable as a TLS server name.
    #[error("invalid server name: {0}")]
    InvalidServerName(String),

    /// No address of the requested family was found for the host.
    #[error("could not resolve {host}:{port} to an {family} address")]
    Resolve {
        /// Hostname that was looked up.
        host: String,
        /// Target port.
        port: u16,
        /// "IPv4" or "IPv6".
        family: &'static str,
    },

    /// TCP connect did not complete in time.
    #[error("connecting to {0} timed out")]
    ConnectTimeout(String),

    /// Operation needs a live socket.
    #[error("not connected")]
    NotConnected,

    /// A protocol handler broke an engine invariant (a coding defect).
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Name does not start with one of the server's channel types.
    #[error("invalid channel name: {0}")]
    InvalidChannelName(String),

    /// Channel is not tracked on this connection.
    #[error("unknown channel: {0}")]
    UnknownChannel(String),

    /// User is not tracked on this connection.
    #[error("unknown user: {0}")]
    UnknownUser(String),

    /// Failed to parse an IRC line.
    #[error("invalid message: {string}")]
    InvalidMessage {
        /// The raw line.
        string: String,
        /// The underlying parse error.
        #[source]
        cause: MessageParseError,
    },
}

impl EngineError {
    /// Whether this error came from the network layer and a reconnect may
    /// succeed.
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Resolve { .. } | Self::ConnectTimeout(_) | Self::NotConnected
        )
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// A configured file could not be read.
    #[error("cannot read {path}: {source}")]
    ReadFile {
        /// Offending path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// PEM file held no certificates.
    #[error("no certificates found in {0}")]
    NoCertificates(PathBuf),

    /// PEM file held no private key.
    #[error("no private key found in {0}")]
    NoPrivateKey(PathBuf),

    /// A setting value could not be parsed.
    #[error("invalid value for {key}: {value:?}")]
    InvalidSetting {
        /// Setting name.
        key: &'static str,
        /// Raw stored value.
        value: String,
    },

    /// Encoding label not known to `encoding_rs`.
    #[error("unknown encoding: {0}")]
    UnknownEncoding(String),
}

/// Errors encountered when parsing IRC lines.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum MessageParseError {
    /// Line was empty.
    #[error("empty message")]
    EmptyMessage,

    /// Parsing error with position information.
    #[error("parsing failed at position {position}: {context}")]
    ParseContext {
        /// Byte position where parsing failed.
        position: usize,
        /// Description of what was being parsed.
        context: &'static str,
    },
}
