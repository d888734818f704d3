//! Error types for session store operations.

use kvsession_kv::KvError;

/// Error type for session store operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The session directory could not be created or opened.
    #[error("Failed to open session directory '{directory}': {source}")]
    Connection {
        directory: String,
        #[source]
        source: KvError,
    },

    /// The store failed to connect earlier, or its directory was removed.
    #[error("Session store is disconnected")]
    Disconnected,

    /// A transaction failed (conflict, timeout, backend fault).
    #[error("Transaction error: {0}")]
    Transaction(#[from] KvError),

    /// A session or record could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    /// The store options are invalid.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors converting sessions and records to and from bytes.
#[derive(Debug, thiserror::Error)]
pub enum SerializationError {
    /// JSON encoding or decoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MessagePack encoding failed.
    #[cfg(feature = "msgpack")]
    #[error("MessagePack encode error: {0}")]
    MessagePackEncode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding failed.
    #[cfg(feature = "msgpack")]
    #[error("MessagePack decode error: {0}")]
    MessagePackDecode(#[from] rmp_serde::decode::Error),

    /// The stored record uses an encoding this build cannot read.
    #[error("Unsupported record encoding: {0}")]
    UnsupportedEnvelope(String),

    /// The payload does not have the shape the serializer expects.
    #[error("Unexpected payload: {0}")]
    UnexpectedPayload(String),

    /// The session uses a property name the payload format reserves.
    #[error("Session property '{0}' is reserved")]
    ReservedProperty(String),

    /// A custom codec failed.
    #[error("Codec error: {0}")]
    Codec(String),
}

/// Errors in store options.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read an options file.
    #[error("failed to read config file '{path}': {source}")]
    ReadFile {
        path: String,
        source: std::io::Error,
    },

    /// Failed to parse TOML.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// The hash algorithm name is not recognized.
    #[error("unsupported hash algorithm '{0}'")]
    UnsupportedHashAlgorithm(String),

    /// The directory path is empty or malformed.
    #[error("invalid directory '{0}'")]
    InvalidDirectory(String),

    /// The envelope format needs a cargo feature this build lacks.
    #[error("envelope format '{0}' is not available in this build")]
    UnavailableEnvelope(String),

    /// A SQLite-backed store was requested without a database path.
    #[error("missing required field 'database_path'")]
    MissingDatabasePath,
}

/// Result type for session store operations.
pub type Result<T> = std::result::Result<T, Error>;
