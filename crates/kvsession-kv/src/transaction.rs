//! The transaction interface every backend implements.

use crate::error::Result;

/// Isolation for a read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReadMode {
    /// The read joins the transaction's conflict set.
    #[default]
    Serializable,
    /// The read is not checked at commit; concurrent writers never abort it.
    Snapshot,
}

/// A key and its value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// Operations available inside a unit of work.
///
/// Writes are visible to later reads in the same transaction and to other
/// transactions only once the enclosing unit of work commits.
pub trait Transaction {
    /// Read a single key.
    fn get(&mut self, key: &[u8], mode: ReadMode) -> Result<Option<Vec<u8>>>;

    /// Read keys in `[begin, end)` in ascending order, at most `limit` of them.
    fn get_range(
        &mut self,
        begin: &[u8],
        end: &[u8],
        limit: Option<usize>,
        mode: ReadMode,
    ) -> Result<Vec<KeyValue>>;

    /// Write a key, replacing any existing value.
    fn set(&mut self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Remove a key. Removing an absent key is a no-op.
    fn clear(&mut self, key: &[u8]) -> Result<()>;

    /// Remove every key in `[begin, end)`.
    fn clear_range(&mut self, begin: &[u8], end: &[u8]) -> Result<()>;

    /// Add `delta` to the value at `key` as little-endian integers.
    ///
    /// An absent value counts as zero. The result has the width of `delta`;
    /// overflow wraps. Does not add the key to the read conflict set.
    fn atomic_add(&mut self, key: &[u8], delta: &[u8]) -> Result<()>;
}

/// Little-endian wrapping addition used by [`Transaction::atomic_add`].
pub fn add_le(existing: Option<&[u8]>, delta: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(delta.len());
    let mut carry = 0u16;
    for (i, &d) in delta.iter().enumerate() {
        let current = existing.and_then(|bytes| bytes.get(i)).copied().unwrap_or(0);
        let sum = u16::from(current) + u16::from(d) + carry;
        out.push(sum as u8);
        carry = sum >> 8;
    }
    out
}
