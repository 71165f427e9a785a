//! Bencode: the self-describing value encoding used throughout the
//! BitTorrent protocol (metainfo files, KRPC messages, resume data).
//!
//! Dictionaries are kept as an *ordered* list of pairs rather than a
//! `HashMap`: decode must preserve the original key order, and a torrent's
//! `info` dict is hashed from its original byte layout rather than a
//! re-sorted one (see [`decoder::find_info_range`]). Lookup by key is a
//! linear scan; these dictionaries are small.

use std::ops::Range;
use thiserror::Error;

pub mod decoder;
pub mod encoder;

pub use decoder::{decode, decode_with_range, find_info_range};
pub use encoder::encode;

/// A decoded bencode value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BencodeValue {
    Integer(i64),
    Bytes(Vec<u8>),
    List(Vec<BencodeValue>),
    /// Ordered key/value pairs, in the order they appeared on the wire.
    Dict(Vec<(Vec<u8>, BencodeValue)>),
}

impl BencodeValue {
    pub fn integer(v: i64) -> Self {
        BencodeValue::Integer(v)
    }

    pub fn bytes(v: impl Into<Vec<u8>>) -> Self {
        BencodeValue::Bytes(v.into())
    }

    pub fn dict(pairs: Vec<(Vec<u8>, BencodeValue)>) -> Self {
        BencodeValue::Dict(pairs)
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            BencodeValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            BencodeValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[BencodeValue]> {
        match self {
            BencodeValue::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&[(Vec<u8>, BencodeValue)]> {
        match self {
            BencodeValue::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// Linear lookup by key; dictionaries in this protocol are small.
    pub fn get(&self, key: &[u8]) -> Option<&BencodeValue> {
        self.as_dict()?
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }
}

/// Errors produced while decoding bencode.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum BencodeError {
    #[error("unexpected end of input")]
    UnexpectedEnd,

    #[error("invalid bencode format: {0}")]
    InvalidFormat(String),

    #[error("invalid integer")]
    InvalidInteger,

    #[error("invalid string length")]
    InvalidStringLength,

    #[error("invalid dictionary key")]
    InvalidDictKey,
}

pub type BencodeResult<T> = Result<T, BencodeError>;

/// The byte range (relative to the start of the input) spanned by a decoded value.
pub type ByteRange = Range<usize>;
