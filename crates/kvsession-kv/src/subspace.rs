//! Key prefixes for namespace isolation.

use crate::error::{KvError, Result};
use crate::tuple::Tuple;

/// A key prefix under which tuples are packed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subspace {
    prefix: Vec<u8>,
}

impl Subspace {
    /// Subspace whose prefix is the packed `tuple`.
    pub fn new(tuple: &Tuple) -> Self {
        Self {
            prefix: tuple.pack(),
        }
    }

    /// Subspace with a raw byte prefix.
    pub fn from_bytes(prefix: impl Into<Vec<u8>>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    /// Key for `tuple` inside this subspace.
    pub fn pack(&self, tuple: &Tuple) -> Vec<u8> {
        let mut key = self.prefix.clone();
        tuple.pack_into(&mut key);
        key
    }

    /// Nested subspace for `tuple`.
    pub fn subspace(&self, tuple: &Tuple) -> Subspace {
        Subspace {
            prefix: self.pack(tuple),
        }
    }

    /// Whether `key` lies inside this subspace.
    pub fn contains(&self, key: &[u8]) -> bool {
        key.starts_with(&self.prefix)
    }

    /// Decode the tuple part of a key from this subspace.
    pub fn unpack(&self, key: &[u8]) -> Result<Tuple> {
        let rest = key
            .strip_prefix(self.prefix.as_slice())
            .ok_or_else(|| KvError::InvalidKey("key is outside the subspace".to_string()))?;
        Tuple::unpack(rest)
    }

    /// Half-open range `[begin, end)` covering every packed tuple in the subspace.
    pub fn range(&self) -> (Vec<u8>, Vec<u8>) {
        let mut begin = self.prefix.clone();
        begin.push(0x00);
        let mut end = self.prefix.clone();
        end.push(0xFF);
        (begin, end)
    }
}
