//! Record key derivation from session identifiers.

use std::fmt;
use std::str::FromStr;

use sha1::Sha1;
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};

use crate::config::HashOptions;
use crate::error::ConfigError;

/// Salt used when hashing is enabled without an explicit one.
pub const DEFAULT_HASH_SALT: &str = "kvsession";

/// Digest used to hash session identifiers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HashAlgorithm {
    #[default]
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Sha224 => "sha224",
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
            Self::Sha512 => "sha512",
        }
    }

    /// Hex digest of `salt ++ input`.
    pub fn hex_digest(&self, salt: &str, input: &str) -> String {
        match self {
            Self::Sha1 => hex_digest::<Sha1>(salt, input),
            Self::Sha224 => hex_digest::<Sha224>(salt, input),
            Self::Sha256 => hex_digest::<Sha256>(salt, input),
            Self::Sha384 => hex_digest::<Sha384>(salt, input),
            Self::Sha512 => hex_digest::<Sha512>(salt, input),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match normalized.as_str() {
            "sha1" => Ok(Self::Sha1),
            "sha224" => Ok(Self::Sha224),
            "sha256" => Ok(Self::Sha256),
            "sha384" => Ok(Self::Sha384),
            "sha512" => Ok(Self::Sha512),
            _ => Err(ConfigError::UnsupportedHashAlgorithm(s.to_string())),
        }
    }
}

fn hex_digest<D: Digest>(salt: &str, input: &str) -> String {
    let mut hasher = D::new();
    hasher.update(salt.as_bytes());
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Maps raw session identifiers to the ids stored in the keyspace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum KeyCodec {
    /// Store the identifier verbatim.
    #[default]
    Plain,
    /// Store the hex digest of salt and identifier.
    Hashed {
        algorithm: HashAlgorithm,
        salt: String,
    },
}

impl KeyCodec {
    pub fn plain() -> Self {
        Self::Plain
    }

    pub fn hashed(algorithm: HashAlgorithm, salt: impl Into<String>) -> Self {
        Self::Hashed {
            algorithm,
            salt: salt.into(),
        }
    }

    /// Build from the `hash` store option. `None` disables hashing; missing
    /// sub-options fall back to sha1 and [`DEFAULT_HASH_SALT`].
    pub fn from_options(options: Option<&HashOptions>) -> Result<Self, ConfigError> {
        let Some(options) = options else {
            return Ok(Self::Plain);
        };
        let algorithm = match options.algorithm.as_deref() {
            Some(name) => name.parse()?,
            None => HashAlgorithm::default(),
        };
        let salt = options
            .salt
            .clone()
            .unwrap_or_else(|| DEFAULT_HASH_SALT.to_string());
        Ok(Self::hashed(algorithm, salt))
    }

    pub fn is_hashed(&self) -> bool {
        matches!(self, Self::Hashed { .. })
    }

    /// The id under which `sid` is stored.
    pub fn effective_id(&self, sid: &str) -> String {
        match self {
            Self::Plain => sid.to_string(),
            Self::Hashed { algorithm, salt } => algorithm.hex_digest(salt, sid),
        }
    }
}
