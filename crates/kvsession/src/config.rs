//! Store options.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::serializer::{EnvelopeFormat, SerializationStrategy, SessionCodec};

/// Default directory path for session records.
pub const DEFAULT_DIRECTORY: &str = "sessions";

/// Default session lifetime in milliseconds (14 days).
pub const DEFAULT_EXPIRATION_TIME: u64 = 14 * 24 * 60 * 60 * 1000;

/// Session id hashing options. Present means hashing is on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashOptions {
    /// Salt prepended to the id. Defaults to the built-in salt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salt: Option<String>,

    /// Digest name such as `sha256`. Defaults to `sha1`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<String>,
}

/// Options for a [`KvSessionStore`](crate::KvSessionStore).
///
/// ```toml
/// directory = "app/sessions"
/// default_expiration_time = 3600000
/// stringify = false
/// snapshot_reads = true
/// database_path = "/var/lib/app/sessions.db"
///
/// [hash]
/// algorithm = "sha256"
/// salt = "pepper"
/// ```
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreOptions {
    /// `/`-separated directory path isolating this store's keys.
    pub directory: String,

    /// Lifetime in milliseconds for sessions without a cookie expiry.
    pub default_expiration_time: u64,

    /// Enables id hashing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<HashOptions>,

    /// Store the session as JSON text instead of a structured object.
    pub stringify: bool,

    /// Record encoding. Defaults to MessagePack when available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub envelope: Option<EnvelopeFormat>,

    /// Use non-conflicting reads for `get` and `length`.
    pub snapshot_reads: bool,

    /// SQLite file backing the store.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,

    /// Custom payload codec; takes precedence over `stringify`.
    #[serde(skip)]
    pub codec: Option<Arc<dyn SessionCodec>>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            directory: DEFAULT_DIRECTORY.to_string(),
            default_expiration_time: DEFAULT_EXPIRATION_TIME,
            hash: None,
            stringify: false,
            envelope: None,
            snapshot_reads: false,
            database_path: None,
            codec: None,
        }
    }
}

impl fmt::Debug for StoreOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreOptions")
            .field("directory", &self.directory)
            .field("default_expiration_time", &self.default_expiration_time)
            .field("hash", &self.hash)
            .field("stringify", &self.stringify)
            .field("envelope", &self.envelope)
            .field("snapshot_reads", &self.snapshot_reads)
            .field("database_path", &self.database_path)
            .field("codec", &self.codec.as_ref().map(|_| ".."))
            .finish()
    }
}

impl StoreOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse options from TOML. Missing fields take their defaults.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Load options from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_toml(&contents)
    }

    pub fn with_directory(mut self, directory: impl Into<String>) -> Self {
        self.directory = directory.into();
        self
    }

    pub fn with_default_expiration(mut self, ttl: Duration) -> Self {
        self.default_expiration_time = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_hash(mut self, hash: HashOptions) -> Self {
        self.hash = Some(hash);
        self
    }

    /// Enable hashing with the default algorithm and salt.
    pub fn with_default_hash(self) -> Self {
        self.with_hash(HashOptions::default())
    }

    pub fn with_stringify(mut self, stringify: bool) -> Self {
        self.stringify = stringify;
        self
    }

    pub fn with_envelope(mut self, envelope: EnvelopeFormat) -> Self {
        self.envelope = Some(envelope);
        self
    }

    pub fn with_snapshot_reads(mut self, enabled: bool) -> Self {
        self.snapshot_reads = enabled;
        self
    }

    pub fn with_database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = Some(path.into());
        self
    }

    pub fn with_codec(mut self, codec: Arc<dyn SessionCodec>) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Custom codec, then text, then structural.
    pub fn serialization_strategy(&self) -> SerializationStrategy {
        if let Some(codec) = &self.codec {
            SerializationStrategy::Custom(Arc::clone(codec))
        } else if self.stringify {
            SerializationStrategy::Text
        } else {
            SerializationStrategy::Structural
        }
    }

    pub fn envelope_format(&self) -> Result<EnvelopeFormat, ConfigError> {
        let format = self.envelope.unwrap_or_default();
        if !format.is_supported() {
            return Err(ConfigError::UnavailableEnvelope(format.to_string()));
        }
        Ok(format)
    }

    /// Lifetime for sessions without a cookie expiry. Zero means the default.
    pub fn default_expiration(&self) -> Duration {
        match self.default_expiration_time {
            0 => Duration::from_millis(DEFAULT_EXPIRATION_TIME),
            ms => Duration::from_millis(ms),
        }
    }
}
