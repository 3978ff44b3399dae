//! Overlay message vocabulary
//!
//! Eight logical message kinds flow between peers. Their numeric tags are
//! caller-configurable so they never collide with unrelated traffic on the
//! same transport; they must be pairwise distinct across the host
//! application.

use objvault_common::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Numeric identifier of a message kind on the transport.
pub type Tag = u32;

/// The tags used by one overlay instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tags {
    /// Peer liveness announcement, payload `bool` (false = leaving).
    pub alive: Tag,
    /// A key was removed somewhere, payload `K`.
    pub invalidated: Tag,
    /// A key was inserted somewhere, payload `K`.
    pub inserted: Tag,
    /// A key was renamed somewhere, payload [`KeyPair`].
    pub change_key: Tag,
    /// Fetch probe, payload [`FetchRequest`].
    pub request: Tag,
    /// Availability answer to a probe, payload [`FetchResponse`].
    pub response: Tag,
    /// Payload pull from the chosen peer, payload [`FetchRequest`].
    pub request_data: Tag,
    /// The pulled payload, payload [`FetchResponseData`].
    pub response_data: Tag,
}

impl Default for Tags {
    fn default() -> Self {
        Self {
            alive: 0,
            invalidated: 1,
            inserted: 2,
            change_key: 3,
            request: 4,
            response: 5,
            request_data: 6,
            response_data: 7,
        }
    }
}

impl Tags {
    /// All eight tags in one slice, for inbox filtering.
    pub fn all(&self) -> [Tag; 8] {
        [
            self.alive,
            self.invalidated,
            self.inserted,
            self.change_key,
            self.request,
            self.response,
            self.request_data,
            self.response_data,
        ]
    }

    /// True when no two tags share a value.
    pub fn are_distinct(&self) -> bool {
        let mut tags = self.all();
        tags.sort_unstable();
        tags.windows(2).all(|w| w[0] != w[1])
    }
}

/// Rename notification.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KeyPair<K> {
    pub old_key: K,
    pub new_key: K,
}

/// An in-flight pull of a remote object.
///
/// The counter disambiguates concurrent requests for the same key on one
/// node; without it, responses from an earlier round can be taken for
/// responses to a later one and wedge the fetch.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct FetchRequest<K> {
    pub key: K,
    pub counter: u64,
}

/// Whether the responding peer holds the requested object.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FetchResponse<K> {
    pub request: FetchRequest<K>,
    pub found: bool,
}

/// The requested payload, sent only to the requester that asked this peer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FetchResponseData<K> {
    pub request: FetchRequest<K>,
    pub valid: bool,
    pub data: Vec<u8>,
}

/// Encode a wire message.
pub fn encode_message<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(|e| Error::codec(format!("message encode: {}", e)))
}

/// Decode a wire message.
pub fn decode_message<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes).map_err(|e| Error::codec(format!("message decode: {}", e)))
}
