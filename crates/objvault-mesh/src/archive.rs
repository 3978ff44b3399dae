//! The distributed archive
//!
//! `MeshArchive` exposes the store surface across a fixed set of peers. It
//! forwards mutations eagerly and fetches missing objects on demand.
//!
//! Protocol outline:
//! 1. A starting node broadcasts that it is alive; a leaving node broadcasts
//!    that it is not. A node hearing from a newcomer answers with its own
//!    liveness so the tables stay symmetric.
//! 2. Removals broadcast an invalidation; renames broadcast the key pair.
//! 3. Inserts broadcast the key. Peers drop their now-stale copy and, when
//!    the insert filter approves the key, pull the new value eagerly.
//! 4. A local load miss broadcasts a request. Peers answer found/not-found;
//!    the payload itself is pulled from the first peer that answered
//!    positively. A peer dying mid-fetch counts as a negative answer.
//!
//! Every wait is a pump loop over the inbox, so two nodes fetching from each
//! other make progress instead of deadlocking.

use crate::message::{
    decode_message, encode_message, FetchRequest, FetchResponse, FetchResponseData, KeyPair, Tag,
    Tags,
};
use crate::transport::{Communicator, Rank};
use bytes::Bytes;
use objvault_common::{Error, Key, Result};
use objvault_store::Archive;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Progress of one outstanding fetch.
struct RequestState {
    /// The one peer expected to answer, or `None` for a broadcast fetch.
    source: Option<Rank>,
    /// Peers that may still answer the availability probe.
    waiting: usize,
    /// First peer that claimed to hold the object.
    winner: Option<Rank>,
    /// Set once the winner answered the data pull.
    valid: Option<bool>,
    data: Option<Vec<u8>>,
}

/// Filter deciding whether a remotely inserted key is pulled eagerly.
type InsertFilter<K> = Box<dyn Fn(&K) -> bool + Send>;

/// Archive with loose consistency across peers.
///
/// Owns the local [`Archive`]; the communicator outlives the overlay and is
/// shared with whatever else the host runs on the same transport. The
/// overlay assumes cooperative single-threaded use within each peer and is
/// not combinable with [`objvault_store::SharedArchive`].
pub struct MeshArchive<K: Key, C: Communicator> {
    store: Archive<K>,
    comm: Arc<C>,
    tags: Tags,
    /// Liveness per rank. A node's own slot stays false: broadcasts and
    /// waiting counts never include self.
    alive: Vec<bool>,
    request_counter: u64,
    in_flight: HashMap<FetchRequest<K>, RequestState>,
    insert_filter: Option<InsertFilter<K>>,
}

impl<K: Key, C: Communicator> MeshArchive<K, C> {
    /// Wrap `store` into the overlay and announce this node to every peer.
    ///
    /// Tags must be pairwise distinct.
    pub fn new(store: Archive<K>, comm: Arc<C>, tags: Tags) -> Result<Self> {
        debug_assert!(tags.are_distinct(), "overlay tags must be distinct");

        let mut mesh = Self {
            store,
            alive: vec![false; comm.size()],
            comm,
            tags,
            request_counter: 0,
            in_flight: HashMap::new(),
            insert_filter: None,
        };

        mesh.broadcast_all(mesh.tags.alive, &true)?;
        mesh.process_inbox()?;

        info!(
            "Archive overlay up as rank {} of {}",
            mesh.comm.rank(),
            mesh.comm.size()
        );
        Ok(mesh)
    }

    /// The wrapped local store.
    pub fn store(&self) -> &Archive<K> {
        &self.store
    }

    /// Pull remotely inserted keys eagerly when `filter` approves them.
    pub fn set_insert_filter(&mut self, filter: impl Fn(&K) -> bool + Send + 'static) {
        self.insert_filter = Some(Box::new(filter));
    }

    /// Go back to never pulling remote inserts.
    pub fn clear_insert_filter(&mut self) {
        self.insert_filter = None;
    }

    /// Store `data` under `key` and announce the insert to every peer.
    pub fn insert(&mut self, key: K, data: impl Into<Bytes>, keep_in_buffer: bool) -> Result<u64> {
        self.process_inbox()?;

        // Keep the payload resident so an imminent pull can be served, then
        // honor the caller's wish.
        let size = self.store.insert(key.clone(), data, true)?;
        self.broadcast_alive_peers(self.tags.inserted, &key)?;

        if !keep_in_buffer {
            self.store.write_back(&key)?;
        }
        Ok(size)
    }

    /// Remove `key` everywhere.
    pub fn remove(&mut self, key: &K) -> Result<()> {
        self.process_inbox()?;
        self.broadcast_alive_peers(self.tags.invalidated, key)?;
        self.store.remove(key);
        Ok(())
    }

    /// Rename `old_key` to `new_key` everywhere.
    pub fn rename(&mut self, old_key: &K, new_key: K) -> Result<()> {
        self.process_inbox()?;
        let pair = KeyPair {
            old_key: old_key.clone(),
            new_key: new_key.clone(),
        };
        self.broadcast_alive_peers(self.tags.change_key, &pair)?;
        self.store.rename(old_key, new_key);
        Ok(())
    }

    /// Load `key`, fetching it from a peer when it is not held locally.
    /// Returns `None` when no reachable peer holds it either.
    pub fn load(&mut self, key: &K, keep_in_buffer: bool) -> Result<Option<Bytes>> {
        self.process_inbox()?;

        if let Some(data) = self.store.load(key, keep_in_buffer)? {
            return Ok(Some(data));
        }

        self.request_counter += 1;
        let request = FetchRequest {
            key: key.clone(),
            counter: self.request_counter,
        };
        let waiting = self.alive_peer_count();
        debug!("local miss, asking {} peers", waiting);

        self.broadcast_alive_peers(self.tags.request, &request)?;
        match self.await_response(None, waiting, request)? {
            Some(data) => {
                self.store.insert(key.clone(), data, true)?;
                self.store.load(key, keep_in_buffer)
            }
            None => Ok(None),
        }
    }

    /// Local-only availability check; a peer may disagree a moment later.
    pub fn is_available(&self, key: &K) -> bool {
        self.store.is_available(key)
    }

    /// Local-only key snapshot.
    pub fn available_keys(&self) -> Vec<K> {
        self.store.available_keys()
    }

    /// See [`Archive::set_max_buffer_size`].
    pub fn set_max_buffer_size(&mut self, bytes: u64) -> Result<()> {
        self.store.set_max_buffer_size(bytes)
    }

    /// See [`Archive::set_max_buffer_size_str`].
    pub fn set_max_buffer_size_str(&mut self, size: &str) -> Result<()> {
        self.store.set_max_buffer_size_str(size)
    }

    /// See [`Archive::unload`].
    pub fn unload(&mut self, target: u64) -> Result<()> {
        self.store.unload(target)
    }

    /// See [`Archive::flush`]. Local only.
    pub fn flush(&mut self) -> Result<()> {
        self.store.flush()
    }

    /// See [`Archive::clear`]. Local only.
    pub fn clear(&mut self) -> Result<()> {
        self.store.clear()
    }

    /// See [`Archive::write_back`]. Local only.
    pub fn write_back(&mut self, key: &K) -> Result<bool> {
        self.store.write_back(key)
    }

    /// Drain the inbox, handling every queued overlay message. Idle hosts
    /// call this to keep answering their peers.
    pub fn process_inbox(&mut self) -> Result<()> {
        let tags = self.tags.all();
        while let Some((source, tag)) = self.comm.probe(&tags) {
            let payload = self.comm.recv(source, tag)?;
            match self.handle_message(source, tag, &payload) {
                Ok(()) => {}
                // A message that does not decode is dropped, not fatal.
                Err(Error::Codec(e)) => {
                    warn!("dropping undecodable message from rank {}: {}", source, e)
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn handle_message(&mut self, source: Rank, tag: Tag, payload: &[u8]) -> Result<()> {
        if tag == self.tags.alive {
            self.on_alive(source, decode_message(payload)?)
        } else if tag == self.tags.invalidated {
            let key: K = decode_message(payload)?;
            self.store.remove(&key);
            Ok(())
        } else if tag == self.tags.inserted {
            self.on_inserted(source, decode_message(payload)?)
        } else if tag == self.tags.change_key {
            let pair: KeyPair<K> = decode_message(payload)?;
            self.store.rename(&pair.old_key, pair.new_key);
            Ok(())
        } else if tag == self.tags.request {
            self.on_request(source, decode_message(payload)?)
        } else if tag == self.tags.response {
            self.on_response(source, decode_message(payload)?);
            Ok(())
        } else if tag == self.tags.request_data {
            self.on_request_data(source, decode_message(payload)?)
        } else if tag == self.tags.response_data {
            self.on_response_data(source, decode_message(payload)?);
            Ok(())
        } else {
            Ok(())
        }
    }

    fn on_alive(&mut self, source: Rank, alive: bool) -> Result<()> {
        let was_alive = self.alive[source];
        self.alive[source] = alive;

        if alive && !was_alive {
            debug!("peer {} is alive", source);
            // Tell the newcomer about us so the tables stay symmetric.
            self.send_to(source, self.tags.alive, &true)?;
        } else if was_alive && !alive {
            debug!("peer {} left", source);
            // The peer will answer none of these.
            for state in self.in_flight.values_mut() {
                if state.source == Some(source) || state.source.is_none() {
                    state.waiting = state.waiting.saturating_sub(1);
                }
            }
        }
        Ok(())
    }

    fn on_inserted(&mut self, source: Rank, key: K) -> Result<()> {
        // Whatever we held under this key is stale now.
        self.store.remove(&key);

        let wanted = self.insert_filter.as_ref().map_or(false, |f| f(&key));
        if wanted {
            self.request_counter += 1;
            let request = FetchRequest {
                key: key.clone(),
                counter: self.request_counter,
            };
            self.send_to(source, self.tags.request, &request)?;
            if let Some(data) = self.await_response(Some(source), 1, request)? {
                self.store.insert(key, data, false)?;
            }
        }
        Ok(())
    }

    fn on_request(&mut self, source: Rank, request: FetchRequest<K>) -> Result<()> {
        let response = FetchResponse {
            found: self.store.is_available(&request.key),
            request,
        };
        // Only availability; the requester pulls the payload from the single
        // winner it picks.
        self.send_to(source, self.tags.response, &response)
    }

    fn on_response(&mut self, source: Rank, response: FetchResponse<K>) {
        if let Some(state) = self.in_flight.get_mut(&response.request) {
            state.waiting = state.waiting.saturating_sub(1);
            if response.found && state.winner.is_none() {
                state.winner = Some(source);
            }
        }
    }

    fn on_request_data(&mut self, source: Rank, request: FetchRequest<K>) -> Result<()> {
        let data = if self.store.is_available(&request.key) {
            self.store.load(&request.key, false)?
        } else {
            None
        };
        let response = FetchResponseData {
            request,
            valid: data.is_some(),
            data: data.map(|b| b.to_vec()).unwrap_or_default(),
        };
        self.send_to(source, self.tags.response_data, &response)
    }

    fn on_response_data(&mut self, source: Rank, rd: FetchResponseData<K>) {
        if let Some(state) = self.in_flight.get_mut(&rd.request) {
            state.winner = Some(source);
            state.valid = Some(rd.valid);
            if rd.valid {
                state.data = Some(rd.data);
            }
        }
    }

    /// Register `request` and pump the inbox until it is answered or every
    /// candidate peer declined or died. Returns the fetched payload, if any.
    fn await_response(
        &mut self,
        source: Option<Rank>,
        waiting: usize,
        request: FetchRequest<K>,
    ) -> Result<Option<Vec<u8>>> {
        self.in_flight.insert(
            request.clone(),
            RequestState {
                source,
                waiting,
                winner: None,
                valid: None,
                data: None,
            },
        );

        // Wait for the first positive availability answer.
        loop {
            match self.in_flight.get(&request) {
                Some(state) if state.winner.is_none() && state.waiting > 0 => {}
                _ => break,
            }
            self.process_inbox()?;
            std::thread::yield_now();
        }

        let winner = self.in_flight.get(&request).and_then(|s| s.winner);
        let mut result = None;

        if let Some(winner) = winner {
            // Pull the payload from the winner, giving up if it dies.
            self.send_to(winner, self.tags.request_data, &request)?;
            loop {
                match self.in_flight.get(&request) {
                    Some(state) if state.valid.is_none() && self.alive[winner] => {}
                    _ => break,
                }
                self.process_inbox()?;
                std::thread::yield_now();
            }

            if let Some(state) = self.in_flight.get_mut(&request) {
                if state.valid == Some(true) {
                    result = state.data.take();
                }
            }
        }

        self.in_flight.remove(&request);
        Ok(result)
    }

    fn alive_peer_count(&self) -> usize {
        self.alive.iter().filter(|&&a| a).count()
    }

    /// Send to every peer currently believed alive.
    fn broadcast_alive_peers<T: Serialize>(&self, tag: Tag, value: &T) -> Result<()> {
        let payload = encode_message(value)?;
        for rank in 0..self.comm.size() {
            if self.alive[rank] {
                if let Err(e) = self.comm.send(rank, tag, payload.clone()) {
                    debug!("send to rank {} failed: {}", rank, e);
                }
            }
        }
        Ok(())
    }

    /// Send to every other rank regardless of liveness (the alive
    /// handshake).
    fn broadcast_all<T: Serialize>(&self, tag: Tag, value: &T) -> Result<()> {
        let payload = encode_message(value)?;
        for rank in 0..self.comm.size() {
            if rank != self.comm.rank() {
                if let Err(e) = self.comm.send(rank, tag, payload.clone()) {
                    debug!("send to rank {} failed: {}", rank, e);
                }
            }
        }
        Ok(())
    }

    fn send_to<T: Serialize>(&self, dest: Rank, tag: Tag, value: &T) -> Result<()> {
        let payload = encode_message(value)?;
        if let Err(e) = self.comm.send(dest, tag, payload) {
            debug!("send to rank {} failed: {}", dest, e);
        }
        Ok(())
    }
}

impl<K: Key, C: Communicator> Drop for MeshArchive<K, C> {
    fn drop(&mut self) {
        // Answer anything still queued, then say goodbye to everyone.
        let _ = self.process_inbox();
        let _ = self.broadcast_all(self.tags.alive, &false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LocalNode;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;

    fn mesh_node(node: LocalNode) -> MeshArchive<u64, LocalNode> {
        let store = Archive::temp().unwrap();
        MeshArchive::new(store, Arc::new(node), Tags::default()).unwrap()
    }

    /// Run one closure per rank, each on its own thread with its own node.
    fn run_cluster<F>(size: usize, body: F)
    where
        F: Fn(usize, MeshArchive<u64, LocalNode>, &Barrier, &AtomicUsize) + Send + Sync + 'static,
    {
        let nodes = LocalNode::cluster(size);
        let barrier = Arc::new(Barrier::new(size));
        let done = Arc::new(AtomicUsize::new(0));
        let body = Arc::new(body);

        let handles: Vec<_> = nodes
            .into_iter()
            .enumerate()
            .map(|(rank, node)| {
                let barrier = Arc::clone(&barrier);
                let done = Arc::clone(&done);
                let body = Arc::clone(&body);
                thread::spawn(move || {
                    let mesh = mesh_node(node);
                    body(rank, mesh, &barrier, &done);
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
    }

    /// Pump the inbox until every rank has checked in as done.
    fn pump_until_all_done(
        mesh: &mut MeshArchive<u64, LocalNode>,
        done: &AtomicUsize,
        size: usize,
    ) {
        done.fetch_add(1, Ordering::SeqCst);
        while done.load(Ordering::SeqCst) < size {
            mesh.process_inbox().unwrap();
            thread::yield_now();
        }
    }

    #[test]
    fn test_two_node_fetch() {
        run_cluster(2, |rank, mut mesh, barrier, done| {
            mesh.set_max_buffer_size(100).unwrap();
            barrier.wait();

            if rank == 0 {
                mesh.insert(42, &b"hello"[..], true).unwrap();
            }
            barrier.wait();

            if rank == 1 {
                let value = mesh.load(&42, true).unwrap().unwrap();
                assert_eq!(value, &b"hello"[..]);
                // The fetched object is now indexed locally.
                assert!(mesh.is_available(&42));
            }
            pump_until_all_done(&mut mesh, done, 2);
        });
    }

    #[test]
    fn test_every_rank_loads_every_other() {
        run_cluster(3, |rank, mut mesh, barrier, done| {
            mesh.set_max_buffer_size(100).unwrap();
            barrier.wait();

            let rank_u64 = rank as u64;
            mesh.insert(rank_u64, vec![rank as u8 + 5], true).unwrap();
            barrier.wait();

            for other in 0..3u64 {
                if other != rank_u64 {
                    let value = mesh.load(&other, true).unwrap().unwrap();
                    assert_eq!(value, vec![other as u8 + 5]);
                }
            }
            pump_until_all_done(&mut mesh, done, 3);
        });
    }

    #[test]
    fn test_insert_filter_pulls_eagerly() {
        run_cluster(2, |rank, mut mesh, barrier, done| {
            mesh.set_max_buffer_size(100).unwrap();
            if rank == 0 {
                mesh.set_insert_filter(|_| true);
            }
            barrier.wait();

            if rank == 1 {
                mesh.insert(7, &b"x"[..], true).unwrap();
                // Stay responsive while rank 0 pulls the value.
                pump_until_all_done(&mut mesh, done, 2);
            } else {
                while !mesh.is_available(&7) {
                    mesh.process_inbox().unwrap();
                    thread::yield_now();
                }
                let value = mesh.load(&7, true).unwrap().unwrap();
                assert_eq!(value, &b"x"[..]);
                pump_until_all_done(&mut mesh, done, 2);
            }
        });
    }

    #[test]
    fn test_peer_death_aborts_fetch() {
        run_cluster(2, |rank, mut mesh, barrier, _done| {
            mesh.set_max_buffer_size(100).unwrap();
            barrier.wait();

            if rank == 1 {
                mesh.insert(9, &b"v"[..], true).unwrap();
                drop(mesh);
                barrier.wait();
            } else {
                barrier.wait();
                // Rank 1 held the key but is gone; the fetch must come back
                // empty instead of hanging.
                assert!(mesh.load(&9, true).unwrap().is_none());
            }
        });
    }

    #[test]
    fn test_rename_across_peers() {
        run_cluster(2, |rank, mut mesh, barrier, done| {
            mesh.set_max_buffer_size(100).unwrap();
            barrier.wait();

            if rank == 0 {
                mesh.insert(1, &b"v"[..], true).unwrap();
            }
            barrier.wait();

            if rank == 1 {
                mesh.rename(&1, 2).unwrap();
            }
            barrier.wait();

            if rank == 0 {
                mesh.process_inbox().unwrap();
                assert!(!mesh.is_available(&1));
                assert_eq!(mesh.load(&2, true).unwrap().unwrap(), &b"v"[..]);
            }
            pump_until_all_done(&mut mesh, done, 2);
        });
    }

    #[test]
    fn test_remove_reaches_every_peer() {
        run_cluster(3, |rank, mut mesh, barrier, done| {
            mesh.set_max_buffer_size(100).unwrap();
            barrier.wait();

            let rank_u64 = rank as u64;
            mesh.insert(rank_u64, vec![rank as u8], true).unwrap();
            barrier.wait();

            // Each rank removes its left neighbor's key.
            let target = (rank_u64 + 2) % 3;
            mesh.remove(&target).unwrap();
            barrier.wait();

            mesh.process_inbox().unwrap();
            assert!(!mesh.is_available(&rank_u64));
            pump_until_all_done(&mut mesh, done, 3);
        });
    }
}
