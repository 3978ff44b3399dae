//! Key codec for archive entries
//!
//! The store is generic in its key type: anything hashable,
//! equality-comparable, and serde-serializable works. Keys are encoded with
//! bincode so the archive can decode keys it never statically knew when it
//! re-reads its own file header; payloads are opaque byte strings and pass
//! through the engine untouched.

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::hash::Hash;

/// Bound for archive key types.
///
/// Blanket-implemented: any `Clone + Eq + Hash` type with serde support is a
/// valid key. `u64` keys encode to 8 bytes, strings to 8 bytes of length plus
/// their UTF-8 contents.
pub trait Key: Clone + Eq + Hash + Serialize + DeserializeOwned {}

impl<T: Clone + Eq + Hash + Serialize + DeserializeOwned> Key for T {}

/// Encode a key to its on-disk / on-wire byte representation.
pub fn encode_key<K: Key>(key: &K) -> Result<Vec<u8>> {
    bincode::serialize(key).map_err(|e| Error::codec(format!("key encode: {}", e)))
}

/// Decode a key from its byte representation.
pub fn decode_key<K: Key>(bytes: &[u8]) -> Result<K> {
    bincode::deserialize(bytes).map_err(|e| Error::codec(format!("key decode: {}", e)))
}
