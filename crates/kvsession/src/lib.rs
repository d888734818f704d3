//! Web-session persistence on a transactional key-value store.
//!
//! [`KvSessionStore`] keeps one record per session under a directory of the
//! keyspace, plus a counter of live records that is updated in the same
//! transaction as every record insert or removal:
//! - session ids can be stored verbatim or as salted digests ([`KeyCodec`])
//! - payloads use a strategy chosen at construction ([`SerializationStrategy`])
//! - expiry is checked lazily on read ([`ExpirationPolicy`])
//!
//! # Example
//!
//! ```rust,ignore
//! use kvsession::{KvSessionStore, Session, SessionStore, StoreOptions};
//! use kvsession::kv::MemoryDatabase;
//!
//! let store = KvSessionStore::open(MemoryDatabase::new(), StoreOptions::default()).await?;
//! store.set("sid", &Session::new().with("user", "alice")).await?;
//! assert_eq!(store.length().await?, 1);
//! ```

mod config;
mod counter;
mod error;
mod expiration;
mod key;
mod serializer;
mod session;
mod state;
mod store;

pub use kvsession_kv as kv;

pub use config::{DEFAULT_DIRECTORY, DEFAULT_EXPIRATION_TIME, HashOptions, StoreOptions};
pub use counter::CounterMaintainer;
pub use error::{ConfigError, Error, Result, SerializationError};
pub use expiration::ExpirationPolicy;
pub use key::{DEFAULT_HASH_SALT, HashAlgorithm, KeyCodec};
pub use serializer::{EnvelopeFormat, SerializationStrategy, SessionCodec, SessionRecord};
pub use session::{Cookie, SameSite, Session};
pub use state::StoreState;
pub use store::{KvSessionStore, SessionStore};
