//! Live-record counter kept beside the data keys.

use kvsession_kv::{ReadMode, Subspace, Transaction, Tuple};
use tracing::trace;

/// Maintains the `count` key of a session namespace.
///
/// Every update is an atomic add inside the caller's transaction, so it
/// commits or aborts together with the record mutation it accounts for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterMaintainer {
    key: Vec<u8>,
}

impl CounterMaintainer {
    pub fn new(namespace: &Subspace) -> Self {
        Self {
            key: namespace.pack(&Tuple::new().push("count")),
        }
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn on_record_created(&self, tr: &mut dyn Transaction) -> kvsession_kv::Result<()> {
        trace!("Incrementing session count");
        tr.atomic_add(&self.key, &1i32.to_le_bytes())
    }

    pub fn on_record_removed(&self, tr: &mut dyn Transaction) -> kvsession_kv::Result<()> {
        trace!("Decrementing session count");
        tr.atomic_add(&self.key, &(-1i32).to_le_bytes())
    }

    /// Current count; an absent key reads as zero.
    pub fn read_count(&self, tr: &mut dyn Transaction, mode: ReadMode) -> kvsession_kv::Result<i32> {
        Ok(tr.get(&self.key, mode)?.map_or(0, |bytes| decode(&bytes)))
    }

    pub fn reset(&self, tr: &mut dyn Transaction) -> kvsession_kv::Result<()> {
        tr.clear(&self.key)
    }
}

/// Little-endian i32; shorter values are zero-extended, extra bytes ignored.
fn decode(bytes: &[u8]) -> i32 {
    let mut buf = [0u8; 4];
    let len = bytes.len().min(4);
    buf[..len].copy_from_slice(&bytes[..len]);
    i32::from_le_bytes(buf)
}
