//! objvault mesh - loose-consistency overlay over the local store
//!
//! Wraps an archive with multi-peer consistency on top of a tagged
//! message-passing substrate:
//! - Mutations (insert, remove, rename) are broadcast to every known-alive
//!   peer
//! - A local load miss triggers a remote fetch from whichever peer still
//!   holds the object
//! - Peer liveness is tracked so in-flight fetches survive peer death
//!
//! Consistency is best-effort by design: peers may temporarily disagree, and
//! nothing is retried. Hosts needing stronger guarantees pull again or flush
//! on both sides.

pub mod archive;
pub mod message;
pub mod transport;

// Re-exports
pub use archive::MeshArchive;
pub use message::{FetchRequest, FetchResponse, FetchResponseData, KeyPair, Tag, Tags};
pub use transport::{Communicator, LocalNode, Rank};
