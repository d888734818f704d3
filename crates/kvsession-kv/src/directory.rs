//! Hierarchical namespaces mapped to short key prefixes.
//!
//! A directory path such as `["app", "sessions"]` is recorded under the node
//! subspace and assigned a fixed-width content prefix from a counter. Keys of
//! a directory never fall inside another directory's range, and every
//! descendant's node entry sorts inside its ancestor's node range, which is
//! what makes recursive removal a range scan.

use std::ops::Deref;

use tracing::debug;

use crate::database::Database;
use crate::error::{KvError, Result};
use crate::subspace::Subspace;
use crate::transaction::ReadMode;
use crate::tuple::Tuple;

/// Prefix of the node subspace holding directory metadata.
const NODE_PREFIX: u8 = 0xFE;
/// First byte of every allocated content prefix.
const CONTENT_PREFIX: u8 = 0x15;

/// An opened directory: its path plus the subspace holding its contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectorySubspace {
    path: Vec<String>,
    subspace: Subspace,
}

impl DirectorySubspace {
    pub fn path(&self) -> &[String] {
        &self.path
    }

    /// The subspace holding this directory's keys.
    pub fn content(&self) -> &Subspace {
        &self.subspace
    }
}

impl Deref for DirectorySubspace {
    type Target = Subspace;

    fn deref(&self) -> &Subspace {
        &self.subspace
    }
}

/// Creates, opens and removes directories.
#[derive(Debug, Clone)]
pub struct DirectoryLayer {
    nodes: Subspace,
}

impl Default for DirectoryLayer {
    fn default() -> Self {
        Self {
            nodes: Subspace::from_bytes(vec![NODE_PREFIX]),
        }
    }
}

impl DirectoryLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Split a `/`-separated path into components.
    pub fn parse_path(path: &str) -> Result<Vec<String>> {
        let components: Vec<String> = path
            .split('/')
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect();
        if components.is_empty() {
            return Err(KvError::Directory(format!("invalid directory path '{path}'")));
        }
        Ok(components)
    }

    fn node_key(&self, path: &[String]) -> Vec<u8> {
        let tuple: Tuple = std::iter::once("node")
            .chain(path.iter().map(String::as_str))
            .collect();
        self.nodes.pack(&tuple)
    }

    fn allocator_key(&self) -> Vec<u8> {
        self.nodes.pack(&Tuple::new().push("alloc"))
    }

    /// Open the directory at `path`, creating it if it doesn't exist.
    pub async fn create_or_open<D: Database>(
        &self,
        db: &D,
        path: &[String],
    ) -> Result<DirectorySubspace> {
        check_path(path)?;
        let node_key = self.node_key(path);
        let allocator_key = self.allocator_key();

        let prefix = db
            .transact(|tr| {
                if let Some(prefix) = tr.get(&node_key, ReadMode::Serializable)? {
                    return Ok(prefix);
                }
                let last = decode_allocation(tr.get(&allocator_key, ReadMode::Serializable)?)?;
                let next = last + 1;
                tr.set(&allocator_key, &next.to_be_bytes())?;

                let prefix = content_prefix(next);
                tr.set(&node_key, &prefix)?;
                Ok(prefix)
            })
            .await?;

        debug!(path = %path.join("/"), "Opened directory");
        Ok(DirectorySubspace {
            path: path.to_vec(),
            subspace: Subspace::from_bytes(prefix),
        })
    }

    /// Open the directory at `path` if it exists.
    pub async fn open<D: Database>(
        &self,
        db: &D,
        path: &[String],
    ) -> Result<Option<DirectorySubspace>> {
        check_path(path)?;
        let node_key = self.node_key(path);
        let prefix = db
            .transact(|tr| tr.get(&node_key, ReadMode::Serializable))
            .await?;
        Ok(prefix.map(|prefix| DirectorySubspace {
            path: path.to_vec(),
            subspace: Subspace::from_bytes(prefix),
        }))
    }

    /// Remove the directory at `path`, its descendants, and all their contents.
    ///
    /// Returns whether anything was removed.
    pub async fn remove_if_exists<D: Database>(&self, db: &D, path: &[String]) -> Result<bool> {
        check_path(path)?;
        let node_key = self.node_key(path);
        let (children_begin, children_end) = Subspace::from_bytes(node_key.clone()).range();

        let removed = db
            .transact(|tr| {
                let own = tr.get(&node_key, ReadMode::Serializable)?;
                let children =
                    tr.get_range(&children_begin, &children_end, None, ReadMode::Serializable)?;
                if own.is_none() && children.is_empty() {
                    return Ok(false);
                }

                let prefixes = own
                    .into_iter()
                    .chain(children.into_iter().map(|kv| kv.value));
                for prefix in prefixes {
                    let contents = Subspace::from_bytes(prefix);
                    let (begin, end) = contents.range();
                    tr.clear(contents.prefix())?;
                    tr.clear_range(&begin, &end)?;
                }
                tr.clear(&node_key)?;
                tr.clear_range(&children_begin, &children_end)?;
                Ok(true)
            })
            .await?;

        if removed {
            debug!(path = %path.join("/"), "Removed directory");
        }
        Ok(removed)
    }
}

fn check_path(path: &[String]) -> Result<()> {
    if path.is_empty() || path.iter().any(String::is_empty) {
        return Err(KvError::Directory(format!(
            "invalid directory path {path:?}"
        )));
    }
    Ok(())
}

fn decode_allocation(value: Option<Vec<u8>>) -> Result<u64> {
    match value {
        None => Ok(0),
        Some(bytes) => {
            let bytes: [u8; 8] = bytes.try_into().map_err(|_| {
                KvError::Directory("corrupt directory allocator".to_string())
            })?;
            Ok(u64::from_be_bytes(bytes))
        }
    }
}

fn content_prefix(n: u64) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(9);
    prefix.push(CONTENT_PREFIX);
    prefix.extend_from_slice(&n.to_be_bytes());
    prefix
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_path() {
        assert_eq!(
            DirectoryLayer::parse_path("app/sessions").unwrap(),
            vec!["app".to_string(), "sessions".to_string()]
        );
        assert_eq!(
            DirectoryLayer::parse_path("/sessions/").unwrap(),
            vec!["sessions".to_string()]
        );
        assert!(DirectoryLayer::parse_path("//").is_err());
    }

    #[test]
    fn test_content_prefixes_are_fixed_width() {
        assert_eq!(content_prefix(1).len(), content_prefix(u64::MAX).len());
        assert!(!content_prefix(2).starts_with(&content_prefix(1)));
    }

    #[test]
    fn test_corrupt_allocator() {
        assert!(decode_allocation(Some(vec![1, 2, 3])).is_err());
        assert_eq!(decode_allocation(None).unwrap(), 0);
    }
}
