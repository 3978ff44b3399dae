//! The archive engine
//!
//! `Archive` stores many variably-sized opaque objects, each under a
//! caller-chosen key, in a single backing file. Recently touched payloads
//! live in a bounded in-memory buffer with pure LRU eviction; evicted dirty
//! payloads are appended to the file and the stale regions they leave behind
//! are reclaimed by a compacting rebuild on [`Archive::flush`].
//!
//! Durability is deliberately lazy: buffered modifications reach the file
//! only on eviction, flush, or drop. A killed process loses dirty buffered
//! state.

use crate::layout;
use crate::lru::LruList;
use bytes::Bytes;
use objvault_common::{bytesize, decode_key, encode_key, Key, Result};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Upper bound on the scratch chunk used while streaming payloads during a
/// rebuild. The effective chunk is `min(max(max_buffer_size, 1), this)`, so
/// rebuild I/O stays within the configured buffer budget without a large
/// buffer setting turning into an equally large scratch allocation.
const REBUILD_CHUNK_CAP: u64 = 64 * 1024;

/// One stored object.
#[derive(Debug)]
struct ObjectEntry {
    /// Payload, present only while the entry is resident in the buffer.
    data: Option<Bytes>,
    /// Byte offset of the payload in the backing file. Meaningful only once
    /// the entry has been written back at least once.
    index_in_file: u64,
    /// Payload length in bytes.
    size: u64,
    /// True when the buffered payload is newer than what is on disk.
    modified: bool,
}

/// Single-file keyed object store with a bounded LRU buffer.
pub struct Archive<K: Key> {
    path: PathBuf,
    /// Temporary archives delete their file on drop instead of flushing.
    temporary: bool,
    file: fs::File,
    index: HashMap<K, ObjectEntry>,
    /// Keys currently resident in the buffer, front = most recently used.
    lru: LruList<K>,
    /// Sum of `size` over resident entries.
    buffer_size: u64,
    max_buffer_size: u64,
    /// True when the file layout no longer matches the index.
    must_rebuild: bool,
}

impl<K: Key> Archive<K> {
    /// Open or create an archive at `path`.
    ///
    /// An existing non-empty file has its header parsed to rebuild the index
    /// (payloads are not loaded). A missing, empty, or unparseable file is
    /// initialized to an empty archive.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        Self::new_at(path.into(), false)
    }

    /// Create an archive backed by a uniquely named file in the system temp
    /// directory. The file is removed when the archive is dropped.
    pub fn temp() -> Result<Self> {
        let path = std::env::temp_dir().join(format!("objvault-{}.arc", Uuid::new_v4()));
        Self::new_at(path, true)
    }

    fn new_at(path: PathBuf, temporary: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let mut archive = Self {
            path,
            temporary,
            file,
            index: HashMap::new(),
            lru: LruList::new(),
            buffer_size: 0,
            max_buffer_size: 0,
            must_rebuild: false,
        };
        archive.reload_index()?;

        info!(
            "Opened archive at {:?} ({} entries)",
            archive.path,
            archive.index.len()
        );
        Ok(archive)
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Configured buffer ceiling in bytes.
    pub fn max_buffer_size(&self) -> u64 {
        self.max_buffer_size
    }

    /// Bytes currently resident in the buffer.
    pub fn buffer_size(&self) -> u64 {
        self.buffer_size
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// True when no objects are stored.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Set the buffer ceiling, evicting from the LRU tail if the buffer is
    /// already over the new limit. A ceiling of zero is legal and makes every
    /// insert write through.
    pub fn set_max_buffer_size(&mut self, bytes: u64) -> Result<()> {
        self.unload(bytes)?;
        self.max_buffer_size = bytes;
        Ok(())
    }

    /// Set the buffer ceiling from a human-readable string like `"1.5G"`.
    pub fn set_max_buffer_size_str(&mut self, size: &str) -> Result<()> {
        self.set_max_buffer_size(bytesize::parse_size(size))
    }

    /// Set the buffer ceiling to a fraction of the currently free system
    /// memory.
    pub fn set_max_buffer_size_scale(&mut self, fraction: f64) -> Result<()> {
        self.set_max_buffer_size(bytesize::fraction_of_free_ram(fraction))
    }

    /// Store `data` under `key`, replacing any previous value. Returns the
    /// payload length.
    ///
    /// With `keep_in_buffer` the payload stays resident (evicting older
    /// entries to make room); otherwise, or when the payload is larger than
    /// the buffer ceiling, it is written through to the file immediately.
    pub fn insert(&mut self, key: K, data: impl Into<Bytes>, keep_in_buffer: bool) -> Result<u64> {
        let data: Bytes = data.into();
        let size = data.len() as u64;
        let keep = keep_in_buffer && size <= self.max_buffer_size;

        self.remove(&key);

        if keep && self.buffer_size + size > self.max_buffer_size {
            self.unload(self.max_buffer_size.saturating_sub(size))?;
        }

        self.buffer_size += size;
        self.index.insert(
            key.clone(),
            ObjectEntry {
                data: Some(data),
                index_in_file: 0,
                size,
                modified: true,
            },
        );
        self.lru.touch(&key);
        self.must_rebuild = true;

        if !keep {
            self.write_back(&key)?;
        }

        Ok(size)
    }

    /// Load the payload stored under `key`, or `None` when the key is
    /// absent.
    ///
    /// A payload not yet resident is read from the file into the buffer
    /// (evicting to make room). With `keep_in_buffer=false`, or for payloads
    /// larger than the buffer ceiling, the entry is written back out of the
    /// buffer before returning.
    pub fn load(&mut self, key: &K, keep_in_buffer: bool) -> Result<Option<Bytes>> {
        let (size, offset, resident) = match self.index.get(key) {
            Some(entry) => (entry.size, entry.index_in_file, entry.data.is_some()),
            None => return Ok(None),
        };
        let keep = keep_in_buffer && size <= self.max_buffer_size;

        if !resident {
            // Make room first. Oversize payloads overflow the buffer
            // transiently and are evicted again before this call returns.
            if size <= self.max_buffer_size && self.buffer_size + size > self.max_buffer_size {
                self.unload(self.max_buffer_size.saturating_sub(size))?;
            }

            self.file.seek(SeekFrom::Start(offset))?;
            let mut buf = vec![0u8; size as usize];
            self.file.read_exact(&mut buf)?;

            if let Some(entry) = self.index.get_mut(key) {
                entry.data = Some(Bytes::from(buf));
                entry.modified = false;
            }
            self.buffer_size += size;
        }

        self.lru.touch(key);

        let data = match self.index.get(key).and_then(|entry| entry.data.clone()) {
            Some(data) => data,
            None => return Ok(None),
        };

        if !keep {
            self.write_back(key)?;
        }

        Ok(Some(data))
    }

    /// Remove the entry stored under `key`, if present.
    pub fn remove(&mut self, key: &K) {
        if let Some(entry) = self.index.remove(key) {
            if entry.data.is_some() {
                self.buffer_size -= entry.size;
            }
            self.lru.remove(key);
            self.must_rebuild = true;
        }
    }

    /// Move the entry stored under `old_key` to `new_key`, preserving its
    /// payload, file position, and LRU slot. A no-op when `old_key` is
    /// absent; an existing entry at `new_key` is displaced.
    pub fn rename(&mut self, old_key: &K, new_key: K) {
        if old_key == &new_key || !self.index.contains_key(old_key) {
            return;
        }

        self.remove(&new_key);
        if let Some(entry) = self.index.remove(old_key) {
            self.lru.replace(old_key, new_key.clone());
            self.index.insert(new_key, entry);
            self.must_rebuild = true;
        }
    }

    /// Write back LRU-tail entries until the buffer holds at most `target`
    /// bytes.
    pub fn unload(&mut self, target: u64) -> Result<()> {
        while self.buffer_size > target {
            let key = match self.lru.tail() {
                Some(key) => key.clone(),
                None => break,
            };
            self.write_back(&key)?;
        }
        Ok(())
    }

    /// Evict a single entry from the buffer, appending its payload to the
    /// file first when it is dirty. Returns false when the key is absent.
    ///
    /// The entry stays in the index with a valid file position.
    pub fn write_back(&mut self, key: &K) -> Result<bool> {
        let (size, modified, data) = match self.index.get_mut(key) {
            Some(entry) => match entry.data.take() {
                Some(data) => (entry.size, entry.modified, data),
                // Not resident: nothing to do.
                None => return Ok(true),
            },
            None => return Ok(false),
        };

        if modified {
            match self.append_payload(&data) {
                Ok(offset) => {
                    if let Some(entry) = self.index.get_mut(key) {
                        entry.index_in_file = offset;
                        entry.modified = false;
                    }
                    self.must_rebuild = true;
                }
                Err(e) => {
                    // Put the payload back so the buffer stays consistent.
                    if let Some(entry) = self.index.get_mut(key) {
                        entry.data = Some(data);
                    }
                    return Err(e);
                }
            }
        }

        self.buffer_size -= size;
        self.lru.remove(key);
        Ok(true)
    }

    /// True when `key` is indexed. Never touches the file.
    pub fn is_available(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    /// Snapshot of every indexed key.
    pub fn available_keys(&self) -> Vec<K> {
        self.index.keys().cloned().collect()
    }

    /// Write every buffered entry back and, if the file layout is stale,
    /// rebuild the file compactly and re-read the fresh layout.
    pub fn flush(&mut self) -> Result<()> {
        self.unload(0)?;

        if !self.must_rebuild {
            return Ok(());
        }

        self.rebuild()?;
        self.must_rebuild = false;
        self.reload_index()?;
        Ok(())
    }

    /// Remove every entry, then flush. The resulting file contains only the
    /// empty header.
    pub fn clear(&mut self) -> Result<()> {
        self.index.clear();
        self.lru.clear();
        self.buffer_size = 0;
        self.must_rebuild = true;
        self.flush()
    }

    fn append_payload(&mut self, data: &[u8]) -> Result<u64> {
        let offset = self.file.seek(SeekFrom::End(0))?;
        self.file.write_all(data)?;
        Ok(offset)
    }

    /// Stream the live entries into a compact sibling file and atomically
    /// swap it in. The sibling lives in the same directory as the target so
    /// the rename never crosses filesystems.
    fn rebuild(&mut self) -> Result<()> {
        let tmp_path = self.path.with_extension("rebuild");

        let tmp = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        let mut writer = BufWriter::new(tmp);

        let result = self
            .stream_live_entries(&mut writer)
            .and_then(|_| writer.flush().map_err(Into::into));
        drop(writer);

        if let Err(e) = result {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }

        fs::rename(&tmp_path, &self.path)?;
        self.file = OpenOptions::new().read(true).write(true).open(&self.path)?;

        debug!(
            "Rebuilt archive file at {:?} ({} entries)",
            self.path,
            self.index.len()
        );
        Ok(())
    }

    /// Write the header plus every entry (key and payload) to `w`, copying
    /// payloads from the current file in bounded chunks.
    fn stream_live_entries<W: Write>(&self, w: &mut W) -> Result<()> {
        layout::write_entry_count(w, self.index.len() as u64)?;

        let chunk_len = self.max_buffer_size.max(1).min(REBUILD_CHUNK_CAP) as usize;
        let mut chunk = vec![0u8; chunk_len];

        for (key, entry) in &self.index {
            let key_bytes = encode_key(key)?;
            layout::write_entry_meta(w, key_bytes.len() as u64, entry.size)?;
            w.write_all(&key_bytes)?;

            // The buffer was unloaded before the rebuild, so every payload
            // is at a valid position in the current file.
            (&self.file).seek(SeekFrom::Start(entry.index_in_file))?;
            let mut remaining = entry.size;
            while remaining > 0 {
                let n = remaining.min(chunk_len as u64) as usize;
                (&self.file).read_exact(&mut chunk[..n])?;
                w.write_all(&chunk[..n])?;
                remaining -= n as u64;
            }
        }

        Ok(())
    }

    /// Drop all in-memory state and re-read the index from the file. A file
    /// that cannot be parsed is treated as corrupt and reset to empty.
    fn reload_index(&mut self) -> Result<()> {
        self.index.clear();
        self.lru.clear();
        self.buffer_size = 0;

        let file_len = self.file.metadata()?.len();
        if file_len == 0 {
            return self.write_empty_file();
        }

        if let Err(e) = self.parse_index(file_len) {
            warn!(
                "Archive file at {:?} is corrupt, resetting to empty: {}",
                self.path, e
            );
            self.index.clear();
            self.write_empty_file()?;
        }
        Ok(())
    }

    fn parse_index(&mut self, file_len: u64) -> Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        let mut reader = BufReader::new(&self.file);

        let entry_count = layout::read_entry_count(&mut reader)?;
        for _ in 0..entry_count {
            let (key_len, payload_len) = layout::read_entry_meta(&mut reader)?;
            if key_len > file_len {
                return Err(truncated_record());
            }

            let mut key_buf = vec![0u8; key_len as usize];
            reader.read_exact(&mut key_buf)?;
            let key: K = decode_key(&key_buf)?;

            let offset = reader.stream_position()?;
            match offset.checked_add(payload_len) {
                Some(end) if end <= file_len => {}
                _ => return Err(truncated_record()),
            }
            reader.seek(SeekFrom::Current(payload_len as i64))?;

            self.index.insert(
                key,
                ObjectEntry {
                    data: None,
                    index_in_file: offset,
                    size: payload_len,
                    modified: false,
                },
            );
        }
        Ok(())
    }

    fn write_empty_file(&mut self) -> Result<()> {
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        layout::write_entry_count(&mut self.file, 0)?;
        Ok(())
    }
}

fn truncated_record() -> objvault_common::Error {
    std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "truncated entry record").into()
}

impl<K: Key> Drop for Archive<K> {
    fn drop(&mut self) {
        if self.temporary {
            if let Err(e) = fs::remove_file(&self.path) {
                debug!("Failed to remove temporary archive {:?}: {}", self.path, e);
            }
        } else if let Err(e) = self.flush() {
            error!("Failed to flush archive at {:?} on drop: {}", self.path, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    /// File size of an archive holding `payload_sizes` entries with u64 keys
    /// (bincode encodes a u64 key to 8 bytes).
    fn expected_file_size(payload_sizes: &[u64]) -> u64 {
        layout::HEADER_SIZE
            + payload_sizes
                .iter()
                .map(|s| layout::ENTRY_META_SIZE + 8 + s)
                .sum::<u64>()
    }

    #[test]
    fn test_empty_archive_is_just_a_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.arc");

        {
            let _ar: Archive<u64> = Archive::open(&path).unwrap();
        }

        assert_eq!(fs::metadata(&path).unwrap().len(), 8);
    }

    #[test]
    fn test_insert_two_and_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.arc");

        {
            let mut ar: Archive<u64> = Archive::open(&path).unwrap();
            ar.set_max_buffer_size(100).unwrap();
            assert_eq!(ar.insert(0, &b"1"[..], true).unwrap(), 1);
            assert_eq!(ar.insert(2, &b"3"[..], true).unwrap(), 1);
        }

        assert_eq!(
            fs::metadata(&path).unwrap().len(),
            expected_file_size(&[1, 1])
        );

        let mut ar: Archive<u64> = Archive::open(&path).unwrap();
        ar.set_max_buffer_size(100).unwrap();
        let mut keys = ar.available_keys();
        keys.sort_unstable();
        assert_eq!(keys, vec![0, 2]);
        assert_eq!(ar.load(&0, true).unwrap().unwrap(), &b"1"[..]);
        assert_eq!(ar.load(&2, true).unwrap().unwrap(), &b"3"[..]);
    }

    #[test]
    fn test_insert_overwrite_keeps_one_entry() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.arc");

        {
            let mut ar: Archive<u64> = Archive::open(&path).unwrap();
            ar.set_max_buffer_size(100).unwrap();
            ar.insert(0, &b"1"[..], true).unwrap();
            ar.insert(0, &b"3"[..], true).unwrap();
            assert_eq!(ar.len(), 1);
        }

        assert_eq!(fs::metadata(&path).unwrap().len(), expected_file_size(&[1]));

        let mut ar: Archive<u64> = Archive::open(&path).unwrap();
        ar.set_max_buffer_size(100).unwrap();
        assert_eq!(ar.load(&0, true).unwrap().unwrap(), &b"3"[..]);
    }

    #[test]
    fn test_overwrite_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.arc");

        {
            let mut ar: Archive<u64> = Archive::open(&path).unwrap();
            ar.set_max_buffer_size(100).unwrap();
            ar.insert(0, &b"1"[..], true).unwrap();
        }
        {
            let mut ar: Archive<u64> = Archive::open(&path).unwrap();
            ar.set_max_buffer_size(100).unwrap();
            assert_eq!(ar.load(&0, true).unwrap().unwrap(), &b"1"[..]);
            ar.insert(0, &b"3"[..], true).unwrap();
        }

        assert_eq!(fs::metadata(&path).unwrap().len(), expected_file_size(&[1]));

        let mut ar: Archive<u64> = Archive::open(&path).unwrap();
        assert_eq!(ar.load(&0, true).unwrap().unwrap(), &b"3"[..]);
    }

    #[test]
    fn test_small_buffer_forces_eviction() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.arc");
        let a = vec![b'a'; 30];
        let b = vec![b'b'; 30];

        {
            let mut ar: Archive<u64> = Archive::open(&path).unwrap();
            ar.set_max_buffer_size(50).unwrap();
            ar.insert(0, a.clone(), true).unwrap();
            ar.insert(2, b.clone(), true).unwrap();

            // Only the second entry fits; the first was written back.
            assert!(ar.buffer_size() <= 50);

            assert_eq!(ar.load(&0, true).unwrap().unwrap(), a.as_slice());
            assert_eq!(ar.load(&2, true).unwrap().unwrap(), b.as_slice());
            assert!(ar.buffer_size() <= 50);
        }

        assert_eq!(
            fs::metadata(&path).unwrap().len(),
            expected_file_size(&[30, 30])
        );
    }

    #[test]
    fn test_oversize_payload_is_written_through() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.arc");

        let mut ar: Archive<u64> = Archive::open(&path).unwrap();
        ar.set_max_buffer_size(1).unwrap();

        assert_eq!(ar.insert(0, &b"xy"[..], true).unwrap(), 2);
        // keep_in_buffer was silently demoted; nothing is resident.
        assert_eq!(ar.buffer_size(), 0);

        // Loading an oversize payload buffers it transiently and evicts it
        // again before returning.
        assert_eq!(ar.load(&0, true).unwrap().unwrap(), &b"xy"[..]);
        assert_eq!(ar.buffer_size(), 0);
    }

    #[test]
    fn test_payload_exactly_at_ceiling_is_cached() {
        let mut ar: Archive<u64> = Archive::temp().unwrap();
        ar.set_max_buffer_size(2).unwrap();

        ar.insert(0, &b"xy"[..], true).unwrap();
        assert_eq!(ar.buffer_size(), 2);

        ar.insert(1, &b"xyz"[..], true).unwrap();
        // One byte over the ceiling: written through, not cached.
        assert_eq!(ar.buffer_size(), 2);
    }

    #[test]
    fn test_zero_ceiling_writes_everything_through() {
        let mut ar: Archive<u64> = Archive::temp().unwrap();
        ar.set_max_buffer_size(0).unwrap();

        ar.insert(0, &b"1"[..], true).unwrap();
        assert_eq!(ar.buffer_size(), 0);

        assert_eq!(ar.load(&0, true).unwrap().unwrap(), &b"1"[..]);
        assert_eq!(ar.buffer_size(), 0);
    }

    #[test]
    fn test_unbuffered_insert_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.arc");

        {
            let mut ar: Archive<u64> = Archive::open(&path).unwrap();
            ar.set_max_buffer_size(100).unwrap();
            ar.insert(0, &b"1"[..], false).unwrap();
            ar.insert(2, &b"3"[..], false).unwrap();
            assert_eq!(ar.buffer_size(), 0);
        }

        assert_eq!(
            fs::metadata(&path).unwrap().len(),
            expected_file_size(&[1, 1])
        );

        let mut ar: Archive<u64> = Archive::open(&path).unwrap();
        ar.set_max_buffer_size(100).unwrap();
        assert_eq!(ar.load(&0, false).unwrap().unwrap(), &b"1"[..]);
        assert_eq!(ar.load(&2, false).unwrap().unwrap(), &b"3"[..]);
        assert_eq!(ar.buffer_size(), 0);
    }

    #[test]
    fn test_load_too_large_for_new_ceiling() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.arc");

        {
            let mut ar: Archive<u64> = Archive::open(&path).unwrap();
            ar.set_max_buffer_size(50).unwrap();
            ar.insert(0, vec![b'v'; 10], true).unwrap();
        }

        let mut ar: Archive<u64> = Archive::open(&path).unwrap();
        ar.set_max_buffer_size(1).unwrap();
        assert_eq!(ar.load(&0, true).unwrap().unwrap(), vec![b'v'; 10]);
        assert_eq!(ar.buffer_size(), 0);
    }

    #[test]
    fn test_remove_shrinks_rebuilt_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.arc");

        {
            let mut ar: Archive<u64> = Archive::open(&path).unwrap();
            ar.set_max_buffer_size(100).unwrap();
            ar.insert(0, &b"1"[..], true).unwrap();
            ar.insert(2, &b"3"[..], true).unwrap();
        }
        {
            let mut ar: Archive<u64> = Archive::open(&path).unwrap();
            ar.set_max_buffer_size(2).unwrap();
            ar.remove(&0);
        }

        assert_eq!(fs::metadata(&path).unwrap().len(), expected_file_size(&[1]));

        let ar: Archive<u64> = Archive::open(&path).unwrap();
        assert_eq!(ar.available_keys(), vec![2]);
    }

    #[test]
    fn test_remove_absent_is_a_noop() {
        let mut ar: Archive<u64> = Archive::temp().unwrap();
        ar.remove(&42);
        assert!(ar.is_empty());
    }

    #[test]
    fn test_rename_roundtrip() {
        let mut ar: Archive<u64> = Archive::temp().unwrap();
        ar.set_max_buffer_size(100).unwrap();

        let size = ar.insert(0, &b"1"[..], true).unwrap();
        ar.rename(&0, 2);

        assert!(!ar.is_available(&0));
        assert!(ar.load(&0, true).unwrap().is_none());
        let loaded = ar.load(&2, true).unwrap().unwrap();
        assert_eq!(loaded.len() as u64, size);
        assert_eq!(loaded, &b"1"[..]);
    }

    #[test]
    fn test_rename_survives_flush_and_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.arc");

        {
            let mut ar: Archive<u64> = Archive::open(&path).unwrap();
            ar.set_max_buffer_size(100).unwrap();
            ar.insert(0, &b"1"[..], true).unwrap();
            ar.flush().unwrap();
            ar.rename(&0, 7);
        }

        let mut ar: Archive<u64> = Archive::open(&path).unwrap();
        ar.set_max_buffer_size(100).unwrap();
        assert!(!ar.is_available(&0));
        assert_eq!(ar.load(&7, true).unwrap().unwrap(), &b"1"[..]);
    }

    #[test]
    fn test_rename_absent_is_a_noop() {
        let mut ar: Archive<u64> = Archive::temp().unwrap();
        ar.rename(&0, 2);
        assert!(ar.is_empty());
    }

    #[test]
    fn test_flush_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.arc");

        let mut ar: Archive<u64> = Archive::open(&path).unwrap();
        ar.set_max_buffer_size(100).unwrap();
        ar.insert(0, &b"1"[..], true).unwrap();
        ar.insert(2, &b"3"[..], true).unwrap();

        ar.flush().unwrap();
        let first = fs::read(&path).unwrap();

        ar.flush().unwrap();
        let second = fs::read(&path).unwrap();
        assert_eq!(first, second);

        // The archive remains fully usable after the rebuild.
        assert_eq!(ar.load(&0, true).unwrap().unwrap(), &b"1"[..]);
        assert_eq!(ar.load(&2, true).unwrap().unwrap(), &b"3"[..]);
    }

    #[test]
    fn test_clear_leaves_empty_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.arc");

        let mut ar: Archive<u64> = Archive::open(&path).unwrap();
        ar.set_max_buffer_size(100).unwrap();
        ar.insert(0, &b"1"[..], true).unwrap();
        ar.insert(2, &b"3"[..], true).unwrap();

        ar.clear().unwrap();
        assert!(ar.is_empty());
        assert_eq!(ar.buffer_size(), 0);
        assert_eq!(fs::metadata(&path).unwrap().len(), 8);
    }

    #[test]
    fn test_shrinking_ceiling_evicts() {
        let mut ar: Archive<u64> = Archive::temp().unwrap();
        ar.set_max_buffer_size(100).unwrap();
        ar.insert(0, vec![b'a'; 30], true).unwrap();
        ar.insert(1, vec![b'b'; 30], true).unwrap();
        assert_eq!(ar.buffer_size(), 60);

        ar.set_max_buffer_size(30).unwrap();
        assert!(ar.buffer_size() <= 30);
        assert_eq!(ar.len(), 2);
    }

    #[test]
    fn test_buffer_size_from_string() {
        let mut ar: Archive<u64> = Archive::temp().unwrap();
        ar.set_max_buffer_size_str("0.05k").unwrap();
        assert_eq!(ar.max_buffer_size(), 50);
        assert_eq!(ar.buffer_size(), 0);
    }

    #[test]
    fn test_corrupt_file_is_reset_to_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.arc");
        fs::write(&path, b"\xff\xff\xff\xff\xff\xff\xff\xffgarbage").unwrap();

        let ar: Archive<u64> = Archive::open(&path).unwrap();
        assert!(ar.is_empty());
        assert_eq!(fs::metadata(&path).unwrap().len(), 8);
    }

    #[test]
    fn test_temp_archive_removes_its_file() {
        let path = {
            let ar: Archive<u64> = Archive::temp().unwrap();
            ar.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_lru_evicts_least_recently_used() {
        let mut ar: Archive<u64> = Archive::temp().unwrap();
        ar.set_max_buffer_size(60).unwrap();
        ar.insert(0, vec![b'a'; 30], true).unwrap();
        ar.insert(1, vec![b'b'; 30], true).unwrap();

        // Touch 0 so 1 becomes the eviction candidate.
        ar.load(&0, true).unwrap();
        ar.insert(2, vec![b'c'; 30], true).unwrap();

        // 0 was touched most recently before the insert, so it should still
        // be resident along with 2; either way the originals read back.
        assert!(ar.buffer_size() <= 60);
        assert_eq!(ar.load(&1, true).unwrap().unwrap(), vec![b'b'; 30]);
        assert_eq!(ar.load(&2, true).unwrap().unwrap(), vec![b'c'; 30]);
    }
}
