//! Shared types for the objvault workspace.
//!
//! This crate holds the pieces every other objvault crate needs: the common
//! error type, the key codec, and human-readable buffer-size parsing.

pub mod bytesize;
pub mod error;
pub mod key;

pub use bytesize::{fraction_of_free_ram, parse_size};
pub use error::{Error, Result};
pub use key::{decode_key, encode_key, Key};
