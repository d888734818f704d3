//! Session store over a transactional key-value database.
//!
//! Layout under the store's directory:
//!
//! ```text
//! <directory> / "data" / <effective id>  ->  encoded SessionRecord
//! <directory> / "count"                  ->  i32 LE live-record count
//! ```
//!
//! Every mutation of a record key and the matching counter update run in
//! the same transaction.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use kvsession_kv::{
    Database, DirectoryLayer, DirectorySubspace, ReadMode, SqliteDatabase, Subspace, Tuple,
};
use tokio::sync::{OnceCell, watch};
use tracing::{debug, warn};

use crate::config::StoreOptions;
use crate::counter::CounterMaintainer;
use crate::error::{ConfigError, Error, Result};
use crate::expiration::ExpirationPolicy;
use crate::key::KeyCodec;
use crate::serializer::{EnvelopeFormat, SerializationStrategy, SessionRecord};
use crate::session::Session;
use crate::state::{StateCell, StoreState};

/// Operations a session middleware needs from its backing store.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load a session. Expired sessions are removed and reported as absent.
    async fn get(&self, sid: &str) -> Result<Option<Session>>;

    /// Create or replace a session.
    async fn set(&self, sid: &str, session: &Session) -> Result<()>;

    /// Remove a session. Removing an absent session succeeds.
    async fn destroy(&self, sid: &str) -> Result<()>;

    /// Number of stored sessions.
    async fn length(&self) -> Result<u64>;

    /// Remove every session.
    async fn clear(&self) -> Result<()>;

    /// Refresh an existing session's record and expiry. Returns whether the
    /// session existed; absent sessions are not created.
    async fn touch(&self, sid: &str, session: &Session) -> Result<bool>;
}

/// Keys of an opened session directory.
#[derive(Debug)]
struct Namespace {
    directory: DirectorySubspace,
    data: Subspace,
    counter: CounterMaintainer,
}

impl Namespace {
    fn new(directory: DirectorySubspace) -> Self {
        let data = directory.subspace(&Tuple::new().push("data"));
        let counter = CounterMaintainer::new(directory.content());
        Self {
            directory,
            data,
            counter,
        }
    }

    fn record_key(&self, id: &str) -> Vec<u8> {
        self.data.pack(&Tuple::new().push(id))
    }
}

/// [`SessionStore`] backed by any [`Database`].
///
/// A new store is `Connecting`. The directory is created or opened by
/// [`KvSessionStore::open`], an explicit [`KvSessionStore::connect`], or else
/// the first operation. Concurrent first operations share one handshake.
pub struct KvSessionStore<D: Database> {
    db: D,
    directory_path: Vec<String>,
    directories: DirectoryLayer,
    keys: KeyCodec,
    serializer: SerializationStrategy,
    envelope: EnvelopeFormat,
    expiration: ExpirationPolicy,
    snapshot_reads: bool,
    state: StateCell,
    namespace: OnceCell<Namespace>,
}

impl<D: Database> std::fmt::Debug for KvSessionStore<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvSessionStore")
            .field("directory", &self.directory_path.join("/"))
            .field("keys", &self.keys)
            .field("serializer", &self.serializer)
            .field("envelope", &self.envelope)
            .field("snapshot_reads", &self.snapshot_reads)
            .field("state", &self.state.get())
            .finish_non_exhaustive()
    }
}

impl<D: Database> KvSessionStore<D> {
    /// Build a store over `db` and start connecting. Fails on invalid options.
    ///
    /// The directory handshake completes on the first operation; use
    /// [`KvSessionStore::open`] to finish it up front.
    pub fn new(db: D, options: StoreOptions) -> Result<Self> {
        let directory_path = DirectoryLayer::parse_path(&options.directory)
            .map_err(|_| ConfigError::InvalidDirectory(options.directory.clone()))?;
        let keys = KeyCodec::from_options(options.hash.as_ref())?;
        let expiration = ExpirationPolicy::new(options.default_expiration());
        let envelope = options.envelope_format()?;
        let serializer = options.serialization_strategy();

        let state = StateCell::new(directory_path.join("/"));
        state.set(StoreState::Connecting);

        Ok(Self {
            db,
            state,
            directory_path,
            directories: DirectoryLayer::new(),
            keys,
            serializer,
            envelope,
            expiration,
            snapshot_reads: options.snapshot_reads,
            namespace: OnceCell::new(),
        })
    }

    /// Build a store and open its directory.
    pub async fn open(db: D, options: StoreOptions) -> Result<Self> {
        let store = Self::new(db, options)?;
        store.connect().await?;
        Ok(store)
    }

    /// Open the session directory if it isn't already.
    pub async fn connect(&self) -> Result<()> {
        self.namespace().await.map(|_| ())
    }

    pub fn state(&self) -> StoreState {
        self.state.get()
    }

    /// Receiver notified on every state transition.
    pub fn subscribe(&self) -> watch::Receiver<StoreState> {
        self.state.subscribe()
    }

    pub fn database(&self) -> &D {
        &self.db
    }

    pub fn key_codec(&self) -> &KeyCodec {
        &self.keys
    }

    pub fn default_expiration(&self) -> Duration {
        self.expiration.default_ttl()
    }

    /// Full key of the record stored for `sid`.
    pub async fn record_key(&self, sid: &str) -> Result<Vec<u8>> {
        let ns = self.namespace().await?;
        Ok(ns.record_key(&self.keys.effective_id(sid)))
    }

    /// Effective ids of all stored records, expired or not.
    pub async fn ids(&self) -> Result<Vec<String>> {
        let ns = self.namespace().await?;
        let (begin, end) = ns.data.range();
        let mode = self.read_mode();
        let rows = self
            .db
            .transact(|tr| tr.get_range(&begin, &end, None, mode))
            .await?;

        let mut ids = Vec::with_capacity(rows.len());
        for row in rows {
            let tuple = ns.data.unpack(&row.key)?;
            if let Some(id) = tuple.get(0).and_then(|e| e.as_str()) {
                ids.push(id.to_string());
            }
        }
        Ok(ids)
    }

    /// Delete the whole directory, including anything nested below it.
    ///
    /// Finishes the handshake first if needed. The store is `Disconnected`
    /// afterwards.
    pub async fn remove_namespace(&self) -> Result<()> {
        self.connect().await?;
        let removed = self
            .directories
            .remove_if_exists(&self.db, &self.directory_path)
            .await?;
        self.state.set(StoreState::Disconnected);
        debug!(directory = %self.directory_path.join("/"), removed, "Removed session directory");
        Ok(())
    }

    fn read_mode(&self) -> ReadMode {
        if self.snapshot_reads {
            ReadMode::Snapshot
        } else {
            ReadMode::Serializable
        }
    }

    async fn namespace(&self) -> Result<&Namespace> {
        if self.state.get() == StoreState::Disconnected {
            return Err(Error::Disconnected);
        }
        self.namespace.get_or_try_init(|| self.open_namespace()).await
    }

    async fn open_namespace(&self) -> Result<Namespace> {
        // A waiter on a failed handshake must not retry it.
        if self.state.get() == StoreState::Disconnected {
            return Err(Error::Disconnected);
        }

        match self
            .directories
            .create_or_open(&self.db, &self.directory_path)
            .await
        {
            Ok(directory) => {
                self.state.set(StoreState::Connected);
                Ok(Namespace::new(directory))
            }
            Err(source) => {
                let directory = self.directory_path.join("/");
                warn!(directory = %directory, error = %source, "Failed to open session directory");
                self.state.set(StoreState::Disconnected);
                Err(Error::Connection { directory, source })
            }
        }
    }

    fn encode_record(&self, id: &str, session: &Session) -> Result<Vec<u8>> {
        let record = SessionRecord {
            id: id.to_string(),
            session: self.serializer.serialize(session)?,
            expires: Some(self.expiration.compute_expiry(session, Utc::now())),
        };
        Ok(self.envelope.encode(&record)?)
    }
}

impl KvSessionStore<SqliteDatabase> {
    /// Open the SQLite file named by `database_path` and connect.
    pub async fn from_options(options: StoreOptions) -> Result<Self> {
        let path = options
            .database_path
            .clone()
            .ok_or(ConfigError::MissingDatabasePath)?;
        let db = SqliteDatabase::open(&path).map_err(|source| Error::Connection {
            directory: options.directory.clone(),
            source,
        })?;
        Self::open(db, options).await
    }
}

#[async_trait]
impl<D: Database> SessionStore for KvSessionStore<D> {
    async fn get(&self, sid: &str) -> Result<Option<Session>> {
        let ns = self.namespace().await?;
        let id = self.keys.effective_id(sid);
        let key = ns.record_key(&id);
        let mode = self.read_mode();

        let Some(bytes) = self.db.transact(|tr| tr.get(&key, mode)).await? else {
            debug!(session_id = %id, "Session not found");
            return Ok(None);
        };

        let record = EnvelopeFormat::decode(&bytes)?;
        if ExpirationPolicy::is_expired(record.expires, Utc::now()) {
            debug!(session_id = %id, expires = ?record.expires, "Session expired");
            self.destroy(sid).await?;
            return Ok(None);
        }

        Ok(Some(self.serializer.deserialize(record.session)?))
    }

    async fn set(&self, sid: &str, session: &Session) -> Result<()> {
        let ns = self.namespace().await?;
        let id = self.keys.effective_id(sid);
        let key = ns.record_key(&id);
        let bytes = self.encode_record(&id, session)?;

        let created = self
            .db
            .transact(|tr| {
                let exists = tr.get(&key, ReadMode::Serializable)?.is_some();
                if !exists {
                    ns.counter.on_record_created(tr)?;
                }
                tr.set(&key, &bytes)?;
                Ok(!exists)
            })
            .await?;

        debug!(session_id = %id, created, "Stored session");
        Ok(())
    }

    async fn destroy(&self, sid: &str) -> Result<()> {
        let ns = self.namespace().await?;
        let id = self.keys.effective_id(sid);
        let key = ns.record_key(&id);

        let existed = self
            .db
            .transact(|tr| {
                let exists = tr.get(&key, ReadMode::Serializable)?.is_some();
                if exists {
                    ns.counter.on_record_removed(tr)?;
                }
                tr.clear(&key)?;
                Ok(exists)
            })
            .await?;

        debug!(session_id = %id, existed, "Destroyed session");
        Ok(())
    }

    async fn length(&self) -> Result<u64> {
        let ns = self.namespace().await?;
        let mode = self.read_mode();
        let count = self
            .db
            .transact(|tr| ns.counter.read_count(tr, mode))
            .await?;

        match u64::try_from(count) {
            Ok(count) => Ok(count),
            Err(_) => {
                warn!(
                    directory = %ns.directory.path().join("/"),
                    count,
                    "Session count is negative, reporting zero"
                );
                Ok(0)
            }
        }
    }

    async fn clear(&self) -> Result<()> {
        let ns = self.namespace().await?;
        let (begin, end) = ns.data.range();

        self.db
            .transact(|tr| {
                tr.clear_range(&begin, &end)?;
                ns.counter.reset(tr)
            })
            .await?;

        debug!(directory = %ns.directory.path().join("/"), "Cleared sessions");
        Ok(())
    }

    async fn touch(&self, sid: &str, session: &Session) -> Result<bool> {
        let ns = self.namespace().await?;
        let id = self.keys.effective_id(sid);
        let key = ns.record_key(&id);
        let bytes = self.encode_record(&id, session)?;

        let touched = self
            .db
            .transact(|tr| {
                if tr.get(&key, ReadMode::Serializable)?.is_none() {
                    return Ok(false);
                }
                tr.set(&key, &bytes)?;
                Ok(true)
            })
            .await?;

        debug!(session_id = %id, touched, "Touched session");
        Ok(touched)
    }
}
