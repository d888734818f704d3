//! Order-preserving tuple encoding for keys.
//!
//! Each element is written as a type code, its payload with every `0x00`
//! escaped as `0x00 0xFF`, and a `0x00` terminator. Packed tuples sort
//! bytewise in the same order as the tuples compare element by element, and
//! the packing of a tuple is a prefix of the packing of any tuple extending it.

use crate::error::{KvError, Result};

const BYTES_CODE: u8 = 0x01;
const STRING_CODE: u8 = 0x02;
const TERMINATOR: u8 = 0x00;
const ESCAPE: u8 = 0xFF;

/// A single tuple element.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Element {
    /// Raw byte string.
    Bytes(Vec<u8>),
    /// UTF-8 string.
    String(String),
}

impl Element {
    /// The element as a string slice, if it is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Element::String(s) => Some(s),
            Element::Bytes(_) => None,
        }
    }

    fn pack_into(&self, out: &mut Vec<u8>) {
        let (code, payload) = match self {
            Element::Bytes(b) => (BYTES_CODE, b.as_slice()),
            Element::String(s) => (STRING_CODE, s.as_bytes()),
        };
        out.push(code);
        for &byte in payload {
            out.push(byte);
            if byte == TERMINATOR {
                out.push(ESCAPE);
            }
        }
        out.push(TERMINATOR);
    }
}

impl From<&str> for Element {
    fn from(value: &str) -> Self {
        Element::String(value.to_string())
    }
}

impl From<String> for Element {
    fn from(value: String) -> Self {
        Element::String(value)
    }
}

impl From<&String> for Element {
    fn from(value: &String) -> Self {
        Element::String(value.clone())
    }
}

impl From<Vec<u8>> for Element {
    fn from(value: Vec<u8>) -> Self {
        Element::Bytes(value)
    }
}

impl From<&[u8]> for Element {
    fn from(value: &[u8]) -> Self {
        Element::Bytes(value.to_vec())
    }
}

/// An ordered sequence of elements that packs into a key.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tuple(Vec<Element>);

impl Tuple {
    /// Create an empty tuple.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an element.
    pub fn push(mut self, element: impl Into<Element>) -> Self {
        self.0.push(element.into());
        self
    }

    /// The elements of the tuple.
    pub fn elements(&self) -> &[Element] {
        &self.0
    }

    /// Get an element by position.
    pub fn get(&self, index: usize) -> Option<&Element> {
        self.0.get(index)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Encode the tuple.
    pub fn pack(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.pack_into(&mut out);
        out
    }

    /// Encode the tuple, appending to `out`.
    pub fn pack_into(&self, out: &mut Vec<u8>) {
        for element in &self.0 {
            element.pack_into(out);
        }
    }

    /// Decode a packed tuple.
    pub fn unpack(bytes: &[u8]) -> Result<Self> {
        let mut elements = Vec::new();
        let mut pos = 0;

        while pos < bytes.len() {
            let code = bytes[pos];
            pos += 1;

            let mut payload = Vec::new();
            loop {
                let Some(&byte) = bytes.get(pos) else {
                    return Err(KvError::InvalidKey(format!(
                        "unterminated element at offset {pos}"
                    )));
                };
                pos += 1;
                if byte != TERMINATOR {
                    payload.push(byte);
                } else if bytes.get(pos) == Some(&ESCAPE) {
                    payload.push(TERMINATOR);
                    pos += 1;
                } else {
                    break;
                }
            }

            let element = match code {
                BYTES_CODE => Element::Bytes(payload),
                STRING_CODE => Element::String(String::from_utf8(payload).map_err(|e| {
                    KvError::InvalidKey(format!("string element is not UTF-8: {e}"))
                })?),
                other => {
                    return Err(KvError::InvalidKey(format!(
                        "unknown element type code 0x{other:02x}"
                    )));
                }
            };
            elements.push(element);
        }

        Ok(Self(elements))
    }
}

impl<E: Into<Element>> FromIterator<E> for Tuple {
    fn from_iter<I: IntoIterator<Item = E>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}
