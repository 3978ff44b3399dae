//! Thread-safe archive wrapper
//!
//! Every public operation acquires one exclusive lock over the whole engine,
//! so concurrent threads are serialized. The engine's methods call each other
//! internally (`insert` removes and unloads, `flush` unloads then rebuilds);
//! holding a single outer lock per public call is what lets those internal
//! cross-calls run without recursive locking.
//!
//! This wrapper is for the local, multi-threaded configuration only; the
//! distributed overlay assumes cooperative single-threaded execution and
//! wraps the plain [`Archive`] instead.

use crate::archive::Archive;
use bytes::Bytes;
use objvault_common::{Key, Result};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;

/// Cloneable, thread-safe handle to an [`Archive`].
pub struct SharedArchive<K: Key> {
    inner: Arc<Mutex<Archive<K>>>,
}

impl<K: Key> Clone for SharedArchive<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K: Key> SharedArchive<K> {
    /// Wrap an archive for shared use.
    pub fn new(archive: Archive<K>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(archive)),
        }
    }

    /// Open or create an archive at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self::new(Archive::open(path)?))
    }

    /// Create an archive backed by a temporary file.
    pub fn temp() -> Result<Self> {
        Ok(Self::new(Archive::temp()?))
    }

    /// See [`Archive::set_max_buffer_size`].
    pub fn set_max_buffer_size(&self, bytes: u64) -> Result<()> {
        self.inner.lock().set_max_buffer_size(bytes)
    }

    /// See [`Archive::set_max_buffer_size_str`].
    pub fn set_max_buffer_size_str(&self, size: &str) -> Result<()> {
        self.inner.lock().set_max_buffer_size_str(size)
    }

    /// See [`Archive::insert`].
    pub fn insert(&self, key: K, data: impl Into<Bytes>, keep_in_buffer: bool) -> Result<u64> {
        self.inner.lock().insert(key, data, keep_in_buffer)
    }

    /// See [`Archive::load`].
    pub fn load(&self, key: &K, keep_in_buffer: bool) -> Result<Option<Bytes>> {
        self.inner.lock().load(key, keep_in_buffer)
    }

    /// See [`Archive::remove`].
    pub fn remove(&self, key: &K) {
        self.inner.lock().remove(key)
    }

    /// See [`Archive::rename`].
    pub fn rename(&self, old_key: &K, new_key: K) {
        self.inner.lock().rename(old_key, new_key)
    }

    /// See [`Archive::unload`].
    pub fn unload(&self, target: u64) -> Result<()> {
        self.inner.lock().unload(target)
    }

    /// See [`Archive::write_back`].
    pub fn write_back(&self, key: &K) -> Result<bool> {
        self.inner.lock().write_back(key)
    }

    /// See [`Archive::is_available`].
    pub fn is_available(&self, key: &K) -> bool {
        self.inner.lock().is_available(key)
    }

    /// See [`Archive::available_keys`].
    pub fn available_keys(&self) -> Vec<K> {
        self.inner.lock().available_keys()
    }

    /// See [`Archive::buffer_size`].
    pub fn buffer_size(&self) -> u64 {
        self.inner.lock().buffer_size()
    }

    /// See [`Archive::flush`].
    pub fn flush(&self) -> Result<()> {
        self.inner.lock().flush()
    }

    /// See [`Archive::clear`].
    pub fn clear(&self) -> Result<()> {
        self.inner.lock().clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    /// Two workers share one archive: each inserts its half of the key space
    /// and spin-loads the other half as it appears.
    #[test]
    fn test_concurrent_insert_and_load() {
        let ar: SharedArchive<u64> = SharedArchive::temp().unwrap();
        ar.set_max_buffer_size(100).unwrap();

        let worker = |ar: SharedArchive<u64>, odd: bool| {
            for i in 0u64..200 {
                if (i % 2 == 1) == odd {
                    ar.insert(i, i.to_le_bytes().to_vec(), true).unwrap();
                } else {
                    while !ar.is_available(&i) {
                        thread::yield_now();
                    }
                    let val = ar.load(&i, true).unwrap().unwrap();
                    assert_eq!(val, i.to_le_bytes().to_vec());
                }
            }
        };

        let a = ar.clone();
        let b = ar.clone();
        let t1 = thread::spawn(move || worker(a, true));
        let t2 = thread::spawn(move || worker(b, false));
        t1.join().unwrap();
        t2.join().unwrap();

        assert_eq!(ar.available_keys().len(), 200);
    }
}
