//! Backing-file layout
//!
//! An archive file is a header-prefixed concatenation of payloads:
//!
//! ```text
//! +-------------+
//! | entry_count |  8B u64 le
//! +-------------+
//! | key_len     |  8B u64 le   \
//! | payload_len |  8B u64 le    |  repeated entry_count times,
//! | key         |  var          |  in unspecified order
//! | payload     |  var         /
//! +-------------+
//! ```
//!
//! All integers are little-endian u64, so files are portable across
//! architectures. Keys are encoded by the key codec; payloads are opaque to
//! the engine and written verbatim.

use objvault_common::Result;
use std::io::{Read, Write};

/// Size of the file header (the entry count alone).
pub const HEADER_SIZE: u64 = 8;

/// Size of one per-entry metadata record (key length + payload length).
pub const ENTRY_META_SIZE: u64 = 16;

/// Write an entry count at the current position.
pub fn write_entry_count<W: Write>(w: &mut W, count: u64) -> Result<()> {
    w.write_all(&count.to_le_bytes())?;
    Ok(())
}

/// Read the entry count at the current position.
pub fn read_entry_count<R: Read>(r: &mut R) -> Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

/// Write one entry's metadata record (lengths only).
pub fn write_entry_meta<W: Write>(w: &mut W, key_len: u64, payload_len: u64) -> Result<()> {
    w.write_all(&key_len.to_le_bytes())?;
    w.write_all(&payload_len.to_le_bytes())?;
    Ok(())
}

/// Read one entry's metadata record (lengths only).
pub fn read_entry_meta<R: Read>(r: &mut R) -> Result<(u64, u64)> {
    let mut buf = [0u8; 16];
    r.read_exact(&mut buf)?;
    let key_len = u64::from_le_bytes(buf[0..8].try_into().unwrap());
    let payload_len = u64::from_le_bytes(buf[8..16].try_into().unwrap());
    Ok((key_len, payload_len))
}
