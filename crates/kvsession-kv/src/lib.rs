//! Transactional ordered key-value substrate.
//!
//! This crate provides the storage primitives the session engine composes:
//! - [`Database`] runs units of work in transactions, retrying conflicts
//! - [`Transaction`] exposes reads, range reads, writes, clears and atomic adds
//! - [`Tuple`] and [`Subspace`] build order-preserving, namespaced keys
//! - [`DirectoryLayer`] maps hierarchical paths to short key prefixes
//!
//! Two backends are included: [`MemoryDatabase`] (optimistic concurrency,
//! used for tests and embedding) and [`SqliteDatabase`] (durable).
//!
//! # Example
//!
//! ```rust,ignore
//! use kvsession_kv::{Database, MemoryDatabase, ReadMode};
//!
//! let db = MemoryDatabase::new();
//! db.transact(|tr| tr.set(b"greeting", b"hello")).await?;
//! let value = db.transact(|tr| tr.get(b"greeting", ReadMode::Serializable)).await?;
//! ```

mod database;
mod directory;
mod error;
mod memory;
mod sqlite;
mod subspace;
mod transaction;
mod tuple;

pub use database::{Database, RetryPolicy};
pub use directory::{DirectoryLayer, DirectorySubspace};
pub use error::{KvError, Result};
pub use memory::{MemoryDatabase, MemoryTransaction};
pub use sqlite::SqliteDatabase;
pub use subspace::Subspace;
pub use transaction::{KeyValue, ReadMode, Transaction, add_le};
pub use tuple::{Element, Tuple};
