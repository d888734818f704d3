//! Integration tests for the session store.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use kvsession::kv::{Database, MemoryDatabase, ReadMode, RetryPolicy, SqliteDatabase};
use kvsession::{
    Cookie, EnvelopeFormat, Error, HashOptions, KvSessionStore, SerializationError, Session,
    SessionCodec, SessionStore, StoreOptions, StoreState,
};
use serde_json::{Value, json};

async fn memory_store(options: StoreOptions) -> KvSessionStore<MemoryDatabase> {
    KvSessionStore::open(MemoryDatabase::new(), options)
        .await
        .unwrap()
}

/// Store whose substrate tolerates heavy write contention.
async fn contended_store() -> KvSessionStore<MemoryDatabase> {
    let db = MemoryDatabase::new().with_retry_policy(RetryPolicy::new().with_max_retries(200));
    KvSessionStore::open(db, StoreOptions::default()).await.unwrap()
}

fn sample() -> Session {
    Session::new()
        .with("foo", 1)
        .with("bar", 2)
}

#[tokio::test]
async fn test_set_length_get_destroy_scenario() {
    let store = memory_store(StoreOptions::default()).await;

    store.set("a", &sample()).await.unwrap();
    assert_eq!(store.length().await.unwrap(), 1);
    assert_eq!(store.get("a").await.unwrap(), Some(sample()));

    store.destroy("a").await.unwrap();
    assert_eq!(store.length().await.unwrap(), 0);
    assert_eq!(store.get("a").await.unwrap(), None);
}

#[tokio::test]
async fn test_round_trip_under_each_strategy() {
    let session = Session::new()
        .with("user", json!({"name": "alice", "roles": ["admin", "dev"]}))
        .with("visits", 42)
        .with("flag", true)
        .with_cookie(
            Cookie::new()
                .with_max_age(60_000)
                .with_path("/")
                .with_http_only(true),
        );

    let variants = [
        StoreOptions::default(),
        StoreOptions::default().with_stringify(true),
        StoreOptions::default().with_envelope(EnvelopeFormat::Json),
        StoreOptions::default()
            .with_envelope(EnvelopeFormat::Json)
            .with_stringify(true),
    ];

    for options in variants {
        let store = memory_store(options).await;
        store.set("sid", &session).await.unwrap();
        assert_eq!(store.get("sid").await.unwrap(), Some(session.clone()));
    }
}

#[tokio::test]
async fn test_overwrite_counts_once() {
    let store = memory_store(StoreOptions::default()).await;

    store.set("a", &sample()).await.unwrap();
    store.set("a", &sample().with("foo", 10)).await.unwrap();
    store.set("b", &sample()).await.unwrap();

    assert_eq!(store.length().await.unwrap(), 2);
    assert_eq!(
        store.get("a").await.unwrap().and_then(|s| s.get_as::<i64>("foo")),
        Some(10)
    );
}

#[tokio::test]
async fn test_destroy_absent_is_noop() {
    let store = memory_store(StoreOptions::default()).await;
    store.set("present", &sample()).await.unwrap();

    store.destroy("missing").await.unwrap();
    store.destroy("missing").await.unwrap();
    assert_eq!(store.length().await.unwrap(), 1);

    store.destroy("present").await.unwrap();
    store.destroy("present").await.unwrap();
    assert_eq!(store.length().await.unwrap(), 0);
}

#[tokio::test]
async fn test_clear_resets_everything() {
    let store = memory_store(StoreOptions::default()).await;
    for sid in ["a", "b", "c"] {
        store.set(sid, &sample()).await.unwrap();
    }
    assert_eq!(store.length().await.unwrap(), 3);

    store.clear().await.unwrap();
    assert_eq!(store.length().await.unwrap(), 0);
    for sid in ["a", "b", "c"] {
        assert_eq!(store.get(sid).await.unwrap(), None);
    }
    assert!(store.ids().await.unwrap().is_empty());

    store.set("a", &sample()).await.unwrap();
    assert_eq!(store.length().await.unwrap(), 1);
}

#[tokio::test]
async fn test_clear_leaves_other_directories() {
    let db = MemoryDatabase::new();
    let first = KvSessionStore::open(db.clone(), StoreOptions::new().with_directory("app/one"))
        .await
        .unwrap();
    let second = KvSessionStore::open(db, StoreOptions::new().with_directory("app/two"))
        .await
        .unwrap();

    first.set("a", &sample()).await.unwrap();
    second.set("a", &sample()).await.unwrap();
    first.clear().await.unwrap();

    assert_eq!(first.length().await.unwrap(), 0);
    assert_eq!(second.length().await.unwrap(), 1);
    assert_eq!(second.get("a").await.unwrap(), Some(sample()));
}

#[tokio::test]
async fn test_hashed_ids_are_shared_between_stores() {
    let db = MemoryDatabase::new();
    let hash = HashOptions {
        salt: Some("pepper".to_string()),
        algorithm: Some("sha256".to_string()),
    };
    let writer = KvSessionStore::open(db.clone(), StoreOptions::new().with_hash(hash.clone()))
        .await
        .unwrap();
    let reader = KvSessionStore::open(db.clone(), StoreOptions::new().with_hash(hash))
        .await
        .unwrap();

    writer.set("raw-sid", &sample()).await.unwrap();
    assert_eq!(reader.get("raw-sid").await.unwrap(), Some(sample()));
    assert_eq!(reader.length().await.unwrap(), 1);

    let ids = reader.ids().await.unwrap();
    assert_eq!(ids.len(), 1);
    assert_ne!(ids[0], "raw-sid");
    assert_eq!(ids[0].len(), 64);

    // A differently salted store derives other keys.
    let other = KvSessionStore::open(db, StoreOptions::new().with_default_hash())
        .await
        .unwrap();
    assert_eq!(other.get("raw-sid").await.unwrap(), None);
}

#[tokio::test]
async fn test_expired_session_is_destroyed_on_get() {
    let store = memory_store(StoreOptions::default()).await;
    let past = Utc::now() - chrono::Duration::milliseconds(1);
    let session = sample().with_cookie(Cookie::new().with_expires(past));

    store.set("old", &session).await.unwrap();
    store.set("fresh", &sample()).await.unwrap();
    assert_eq!(store.length().await.unwrap(), 2);

    assert_eq!(store.get("old").await.unwrap(), None);
    assert_eq!(store.length().await.unwrap(), 1);
    assert_eq!(store.ids().await.unwrap(), vec!["fresh".to_string()]);
}

#[tokio::test]
async fn test_length_does_not_reconcile_expiry() {
    let store = memory_store(StoreOptions::default()).await;
    let past = Utc::now() - chrono::Duration::seconds(10);
    store
        .set("old", &sample().with_cookie(Cookie::new().with_expires(past)))
        .await
        .unwrap();

    assert_eq!(store.length().await.unwrap(), 1);
}

#[tokio::test]
async fn test_default_expiration_applies() {
    let store = memory_store(
        StoreOptions::new().with_default_expiration(Duration::from_millis(200)),
    )
    .await;

    store.set("short", &sample()).await.unwrap();
    assert!(store.get("short").await.unwrap().is_some());

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(store.get("short").await.unwrap(), None);
    assert_eq!(store.length().await.unwrap(), 0);
}

#[tokio::test]
async fn test_malformed_record_is_an_error() {
    let store = memory_store(StoreOptions::default()).await;
    store.set("a", &sample()).await.unwrap();

    let key = store.record_key("a").await.unwrap();
    store
        .database()
        .transact(|tr| tr.set(&key, b"{garbage"))
        .await
        .unwrap();

    let result = store.get("a").await;
    assert!(matches!(result, Err(Error::Serialization(_))));
    assert_eq!(store.length().await.unwrap(), 1);
}

#[tokio::test]
async fn test_legacy_record_without_expiry_never_expires() {
    let store = memory_store(StoreOptions::default()).await;
    store.set("legacy", &sample()).await.unwrap();

    let key = store.record_key("legacy").await.unwrap();
    let legacy = br#"{"_id":"legacy","session":{"foo":1,"bar":2}}"#;
    store
        .database()
        .transact(|tr| tr.set(&key, legacy))
        .await
        .unwrap();

    assert_eq!(store.get("legacy").await.unwrap(), Some(sample()));
}

#[tokio::test]
async fn test_reads_either_envelope() {
    let db = MemoryDatabase::new();
    let json_store = KvSessionStore::open(
        db.clone(),
        StoreOptions::new().with_envelope(EnvelopeFormat::Json),
    )
    .await
    .unwrap();
    let default_store = KvSessionStore::open(db, StoreOptions::new()).await.unwrap();

    json_store.set("j", &sample()).await.unwrap();
    default_store.set("d", &sample()).await.unwrap();

    assert_eq!(default_store.get("j").await.unwrap(), Some(sample()));
    assert_eq!(json_store.get("d").await.unwrap(), Some(sample()));
}

struct UppercaseKeys;

impl SessionCodec for UppercaseKeys {
    fn serialize(&self, session: &Session) -> Result<Value, SerializationError> {
        let object = session
            .data
            .iter()
            .map(|(k, v)| (k.to_uppercase(), v.clone()))
            .collect();
        Ok(Value::Object(object))
    }

    fn deserialize(&self, payload: Value) -> Result<Session, SerializationError> {
        let Value::Object(object) = payload else {
            return Err(SerializationError::Codec("expected object".to_string()));
        };
        let mut session = Session::new();
        for (k, v) in object {
            session.insert(k.to_lowercase(), v);
        }
        Ok(session)
    }
}

#[tokio::test]
async fn test_custom_codec_wins_over_stringify() {
    let store = memory_store(
        StoreOptions::new()
            .with_stringify(true)
            .with_envelope(EnvelopeFormat::Json)
            .with_codec(Arc::new(UppercaseKeys)),
    )
    .await;

    store.set("c", &sample()).await.unwrap();
    assert_eq!(store.get("c").await.unwrap(), Some(sample()));

    let key = store.record_key("c").await.unwrap();
    let raw = store
        .database()
        .transact(|tr| tr.get(&key, ReadMode::Serializable))
        .await
        .unwrap()
        .unwrap();
    let record = EnvelopeFormat::decode(&raw).unwrap();
    assert_eq!(record.session, json!({"FOO": 1, "BAR": 2}));
}

#[tokio::test]
async fn test_reserved_cookie_property_is_rejected() {
    let session = sample()
        .with("cookie", "raw")
        .with_cookie(Cookie::new().with_path("/"));

    for options in [
        StoreOptions::default(),
        StoreOptions::default().with_stringify(true),
    ] {
        let store = memory_store(options).await;
        let result = store.set("sid", &session).await;
        assert!(matches!(
            result,
            Err(Error::Serialization(SerializationError::ReservedProperty(_)))
        ));
        assert_eq!(store.length().await.unwrap(), 0);
        assert_eq!(store.get("sid").await.unwrap(), None);
    }
}

/// Codec that refuses every session.
struct RejectingCodec;

impl SessionCodec for RejectingCodec {
    fn serialize(&self, _session: &Session) -> Result<Value, SerializationError> {
        Err(SerializationError::Codec("rejected".to_string()))
    }

    fn deserialize(&self, _payload: Value) -> Result<Session, SerializationError> {
        Err(SerializationError::Codec("rejected".to_string()))
    }
}

#[tokio::test]
async fn test_failed_serialization_writes_nothing() {
    let store = memory_store(StoreOptions::new().with_codec(Arc::new(RejectingCodec))).await;
    let keys_before = store.database().len();

    let result = store.set("a", &sample()).await;
    assert!(matches!(
        result,
        Err(Error::Serialization(SerializationError::Codec(_)))
    ));

    assert_eq!(store.database().len(), keys_before);
    assert_eq!(store.length().await.unwrap(), 0);
    assert!(store.ids().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_deserialization_keeps_record() {
    let db = MemoryDatabase::new();
    let writer = KvSessionStore::open(db.clone(), StoreOptions::new()).await.unwrap();
    writer.set("a", &sample()).await.unwrap();

    let reader = KvSessionStore::open(
        db,
        StoreOptions::new().with_codec(Arc::new(RejectingCodec)),
    )
    .await
    .unwrap();

    let result = reader.get("a").await;
    assert!(matches!(
        result,
        Err(Error::Serialization(SerializationError::Codec(_)))
    ));
    assert_eq!(reader.length().await.unwrap(), 1);
    assert_eq!(writer.get("a").await.unwrap(), Some(sample()));
}

#[tokio::test]
async fn test_touch_only_updates_existing() {
    let store = memory_store(StoreOptions::default()).await;

    assert!(!store.touch("ghost", &sample()).await.unwrap());
    assert_eq!(store.get("ghost").await.unwrap(), None);
    assert_eq!(store.length().await.unwrap(), 0);

    store.set("a", &sample()).await.unwrap();
    assert!(store.touch("a", &sample().with("foo", 5)).await.unwrap());
    assert_eq!(store.length().await.unwrap(), 1);
    assert_eq!(
        store.get("a").await.unwrap().and_then(|s| s.get_as::<i64>("foo")),
        Some(5)
    );
}

#[tokio::test]
async fn test_snapshot_reads() {
    let store = memory_store(StoreOptions::new().with_snapshot_reads(true)).await;
    store.set("a", &sample()).await.unwrap();
    assert_eq!(store.get("a").await.unwrap(), Some(sample()));
    assert_eq!(store.length().await.unwrap(), 1);
}

#[tokio::test]
async fn test_lifecycle_states() {
    let store = KvSessionStore::new(MemoryDatabase::new(), StoreOptions::default()).unwrap();
    let mut states = store.subscribe();
    assert_eq!(store.state(), StoreState::Connecting);
    assert!(!states.has_changed().unwrap());

    store.connect().await.unwrap();
    assert_eq!(store.state(), StoreState::Connected);
    assert!(states.has_changed().unwrap());
    assert_eq!(*states.borrow_and_update(), StoreState::Connected);

    // Connecting again is a no-op.
    store.connect().await.unwrap();
    assert!(!states.has_changed().unwrap());
}

#[tokio::test]
async fn test_remove_namespace_disconnects() {
    let db = MemoryDatabase::new();
    let store = KvSessionStore::open(db.clone(), StoreOptions::default())
        .await
        .unwrap();
    store.set("a", &sample()).await.unwrap();

    store.remove_namespace().await.unwrap();
    assert_eq!(store.state(), StoreState::Disconnected);
    assert!(matches!(store.remove_namespace().await, Err(Error::Disconnected)));
    assert!(matches!(store.get("a").await, Err(Error::Disconnected)));
    assert!(matches!(store.length().await, Err(Error::Disconnected)));

    // A fresh store recreates the directory empty.
    let fresh = KvSessionStore::open(db, StoreOptions::default()).await.unwrap();
    assert_eq!(fresh.length().await.unwrap(), 0);
    assert_eq!(fresh.get("a").await.unwrap(), None);
}

#[tokio::test]
async fn test_remove_namespace_before_first_operation() {
    let db = MemoryDatabase::new();
    let writer = KvSessionStore::open(db.clone(), StoreOptions::default())
        .await
        .unwrap();
    writer.set("a", &sample()).await.unwrap();

    let remover = KvSessionStore::new(db.clone(), StoreOptions::default()).unwrap();
    let mut states = remover.subscribe();
    assert_eq!(*states.borrow_and_update(), StoreState::Connecting);

    remover.remove_namespace().await.unwrap();
    assert_eq!(remover.state(), StoreState::Disconnected);

    let fresh = KvSessionStore::open(db, StoreOptions::default()).await.unwrap();
    assert_eq!(fresh.length().await.unwrap(), 0);
    assert_eq!(fresh.get("a").await.unwrap(), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_sets_of_one_sid_count_once() {
    let store = Arc::new(contended_store().await);

    let mut handles = Vec::new();
    for i in 0..16 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            store
                .set("shared", &Session::new().with("writer", i))
                .await
                .unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(store.length().await.unwrap(), 1);
    assert!(store.get("shared").await.unwrap().is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_distinct_sids() {
    let store = Arc::new(contended_store().await);

    let mut handles = Vec::new();
    for i in 0..32 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            let sid = format!("sid-{i}");
            store.set(&sid, &sample()).await.unwrap();
            if i % 2 == 0 {
                store.destroy(&sid).await.unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(store.length().await.unwrap(), 16);
    assert_eq!(store.ids().await.unwrap().len(), 16);
}

#[tokio::test]
async fn test_store_as_trait_object() {
    let store: Arc<dyn SessionStore> = Arc::new(memory_store(StoreOptions::default()).await);
    store.set("a", &sample()).await.unwrap();
    assert_eq!(store.length().await.unwrap(), 1);
    store.clear().await.unwrap();
    assert_eq!(store.length().await.unwrap(), 0);
}

#[tokio::test]
async fn test_sqlite_store_persists() {
    let dir = tempfile::tempdir().unwrap();
    let options = StoreOptions::new()
        .with_database_path(dir.path().join("sessions.db"))
        .with_default_hash();

    {
        let store = KvSessionStore::from_options(options.clone()).await.unwrap();
        store.set("a", &sample()).await.unwrap();
        store.set("b", &sample()).await.unwrap();
        store.destroy("b").await.unwrap();
    }

    let reopened = KvSessionStore::from_options(options).await.unwrap();
    assert_eq!(reopened.length().await.unwrap(), 1);
    assert_eq!(reopened.get("a").await.unwrap(), Some(sample()));
    assert_eq!(reopened.get("b").await.unwrap(), None);
}

#[tokio::test]
async fn test_sqlite_requires_path() {
    let result = KvSessionStore::<SqliteDatabase>::from_options(StoreOptions::default()).await;
    assert!(matches!(
        result,
        Err(Error::Config(kvsession::ConfigError::MissingDatabasePath))
    ));
}
