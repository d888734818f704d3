//! In-memory database with optimistic concurrency control.
//!
//! Transactions read committed data directly and buffer their writes. At
//! commit, a transaction whose serializable reads intersect the writes of any
//! transaction committed after it started is rejected with
//! [`KvError::Conflict`]; the driver then reruns it. Snapshot reads and atomic
//! adds never cause conflicts. Read-only transactions always commit.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::database::{Database, RetryPolicy};
use crate::error::{KvError, Result};
use crate::transaction::{KeyValue, ReadMode, Transaction, add_le};

/// Number of commits whose write sets are kept for conflict checks.
const MAX_COMMIT_HISTORY: usize = 4096;

/// Half-open key range `[begin, end)`.
#[derive(Debug, Clone)]
struct KeyRange {
    begin: Vec<u8>,
    end: Vec<u8>,
}

impl KeyRange {
    fn new(begin: &[u8], end: &[u8]) -> Self {
        Self {
            begin: begin.to_vec(),
            end: end.to_vec(),
        }
    }

    fn single(key: &[u8]) -> Self {
        let mut end = key.to_vec();
        end.push(0x00);
        Self {
            begin: key.to_vec(),
            end,
        }
    }

    fn is_empty(&self) -> bool {
        self.begin >= self.end
    }

    fn contains(&self, key: &[u8]) -> bool {
        self.begin.as_slice() <= key && key < self.end.as_slice()
    }

    fn intersects(&self, other: &KeyRange) -> bool {
        self.begin < other.end && other.begin < self.end
    }
}

#[derive(Debug, Clone)]
enum Mutation {
    Set(Vec<u8>, Vec<u8>),
    Clear(Vec<u8>),
    ClearRange(KeyRange),
    Add(Vec<u8>, Vec<u8>),
}

impl Mutation {
    /// Value of `key` after this mutation, given its value before.
    fn apply_to(&self, key: &[u8], current: Option<Vec<u8>>) -> Option<Vec<u8>> {
        match self {
            Mutation::Set(k, v) if k.as_slice() == key => Some(v.clone()),
            Mutation::Clear(k) if k.as_slice() == key => None,
            Mutation::ClearRange(range) if range.contains(key) => None,
            Mutation::Add(k, delta) if k.as_slice() == key => {
                Some(add_le(current.as_deref(), delta))
            }
            _ => current,
        }
    }

    fn apply(&self, data: &mut BTreeMap<Vec<u8>, Vec<u8>>) {
        match self {
            Mutation::Set(k, v) => {
                data.insert(k.clone(), v.clone());
            }
            Mutation::Clear(k) => {
                data.remove(k);
            }
            Mutation::ClearRange(range) => {
                if range.is_empty() {
                    return;
                }
                let doomed: Vec<Vec<u8>> = data
                    .range(range.begin.clone()..range.end.clone())
                    .map(|(k, _)| k.clone())
                    .collect();
                for k in doomed {
                    data.remove(&k);
                }
            }
            Mutation::Add(k, delta) => {
                let value = add_le(data.get(k).map(Vec::as_slice), delta);
                data.insert(k.clone(), value);
            }
        }
    }
}

#[derive(Debug)]
struct CommitRecord {
    version: u64,
    writes: Vec<KeyRange>,
}

#[derive(Debug, Default)]
struct MemoryState {
    data: BTreeMap<Vec<u8>, Vec<u8>>,
    version: u64,
    history: VecDeque<CommitRecord>,
    /// Highest version dropped from `history`.
    trimmed_through: u64,
}

impl MemoryState {
    fn check_conflicts(&self, read_version: u64, reads: &[KeyRange]) -> Result<()> {
        if reads.is_empty() {
            return Ok(());
        }
        if read_version < self.trimmed_through {
            return Err(KvError::TransactionTooOld);
        }
        let newer = self
            .history
            .iter()
            .rev()
            .take_while(|record| record.version > read_version);
        for record in newer {
            let conflicting = record
                .writes
                .iter()
                .any(|write| reads.iter().any(|read| read.intersects(write)));
            if conflicting {
                return Err(KvError::Conflict);
            }
        }
        Ok(())
    }

    fn record_commit(&mut self, writes: Vec<KeyRange>) {
        self.version += 1;
        self.history.push_back(CommitRecord {
            version: self.version,
            writes,
        });
        while self.history.len() > MAX_COMMIT_HISTORY {
            if let Some(dropped) = self.history.pop_front() {
                self.trimmed_through = dropped.version;
            }
        }
    }
}

/// In-process ordered key-value database.
///
/// Clones share the same underlying data, so several stores built from clones
/// of one `MemoryDatabase` observe each other's writes.
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    state: Arc<Mutex<MemoryState>>,
    retry: RetryPolicy,
}

impl MemoryDatabase {
    /// Create an empty database with the default retry policy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the retry policy. The data stays shared with existing clones.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Start a transaction at the current commit version.
    ///
    /// Most callers want [`Database::transact`]; this is for driving
    /// interleaved transactions by hand.
    pub fn begin(&self) -> MemoryTransaction<'_> {
        let read_version = self.state.lock().version;
        MemoryTransaction {
            state: &self.state,
            read_version,
            reads: Vec::new(),
            writes: Vec::new(),
            mutations: Vec::new(),
        }
    }

    /// Number of committed keys.
    pub fn len(&self) -> usize {
        self.state.lock().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().data.is_empty()
    }
}

impl Database for MemoryDatabase {
    fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    fn run_once<T, F>(&self, work: &mut F) -> Result<T>
    where
        F: FnMut(&mut dyn Transaction) -> Result<T>,
    {
        let mut tr = self.begin();
        let value = work(&mut tr)?;
        tr.commit()?;
        Ok(value)
    }
}

/// A transaction against a [`MemoryDatabase`].
pub struct MemoryTransaction<'a> {
    state: &'a Mutex<MemoryState>,
    read_version: u64,
    reads: Vec<KeyRange>,
    writes: Vec<KeyRange>,
    mutations: Vec<Mutation>,
}

impl MemoryTransaction<'_> {
    /// Apply buffered mutations to a committed value.
    fn overlay(&self, key: &[u8], committed: Option<Vec<u8>>) -> Option<Vec<u8>> {
        self.mutations
            .iter()
            .fold(committed, |current, mutation| mutation.apply_to(key, current))
    }

    fn record_read(&mut self, range: KeyRange, mode: ReadMode) {
        if mode == ReadMode::Serializable {
            self.reads.push(range);
        }
    }

    /// Validate against concurrent commits and apply buffered writes.
    pub fn commit(self) -> Result<()> {
        if self.mutations.is_empty() {
            return Ok(());
        }

        let mut state = self.state.lock();
        state.check_conflicts(self.read_version, &self.reads)?;
        for mutation in &self.mutations {
            mutation.apply(&mut state.data);
        }
        state.record_commit(self.writes);
        trace!(
            version = state.version,
            mutations = self.mutations.len(),
            "Committed transaction"
        );
        Ok(())
    }
}

impl Transaction for MemoryTransaction<'_> {
    fn get(&mut self, key: &[u8], mode: ReadMode) -> Result<Option<Vec<u8>>> {
        let committed = self.state.lock().data.get(key).cloned();
        self.record_read(KeyRange::single(key), mode);
        Ok(self.overlay(key, committed))
    }

    fn get_range(
        &mut self,
        begin: &[u8],
        end: &[u8],
        limit: Option<usize>,
        mode: ReadMode,
    ) -> Result<Vec<KeyValue>> {
        let range = KeyRange::new(begin, end);
        if range.is_empty() {
            return Ok(Vec::new());
        }

        let committed: BTreeMap<Vec<u8>, Vec<u8>> = self
            .state
            .lock()
            .data
            .range(range.begin.clone()..range.end.clone())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let mut candidates: BTreeSet<Vec<u8>> = committed.keys().cloned().collect();
        for mutation in &self.mutations {
            if let Mutation::Set(k, _) | Mutation::Add(k, _) = mutation
                && range.contains(k)
            {
                candidates.insert(k.clone());
            }
        }

        let limit = limit.unwrap_or(usize::MAX);
        let mut out = Vec::new();
        for key in candidates {
            if out.len() >= limit {
                break;
            }
            if let Some(value) = self.overlay(&key, committed.get(&key).cloned()) {
                out.push(KeyValue { key, value });
            }
        }

        self.record_read(range, mode);
        Ok(out)
    }

    fn set(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.writes.push(KeyRange::single(key));
        self.mutations
            .push(Mutation::Set(key.to_vec(), value.to_vec()));
        Ok(())
    }

    fn clear(&mut self, key: &[u8]) -> Result<()> {
        self.writes.push(KeyRange::single(key));
        self.mutations.push(Mutation::Clear(key.to_vec()));
        Ok(())
    }

    fn clear_range(&mut self, begin: &[u8], end: &[u8]) -> Result<()> {
        let range = KeyRange::new(begin, end);
        if range.is_empty() {
            return Ok(());
        }
        self.writes.push(range.clone());
        self.mutations.push(Mutation::ClearRange(range));
        Ok(())
    }

    fn atomic_add(&mut self, key: &[u8], delta: &[u8]) -> Result<()> {
        self.writes.push(KeyRange::single(key));
        self.mutations
            .push(Mutation::Add(key.to_vec(), delta.to_vec()));
        Ok(())
    }
}
