//! Bounded cache of decoded record blocks.
//!
//! Lookups for neighbouring keys usually land in the same record block, so decoded
//! blocks are kept in an LRU list bounded either by block count or by the total
//! decoded size. A block being decoded is tracked apart from that list: eviction
//! never touches it, concurrent requests for it wait for the one decode in progress,
//! and its outcome (a buffer or an error) is handed to every waiter.
//!
//! # Examples
//!
//! ```
//! use mdict_archive::storage::record_cache::{CacheCapacity, RecordBlockCache};
//!
//! let cache = RecordBlockCache::new(CacheCapacity::Blocks(1));
//! let block = cache.get_or_decode(0, 3, || Ok(b"abc".to_vec()))?;
//! assert_eq!(&block[..], b"abc");
//! let again = cache.get_or_decode(0, 3, || unreachable!())?;
//! assert_eq!(cache.stats().misses, 1);
//! assert_eq!(cache.stats().hits, 1);
//! # let _ = again;
//! # Ok::<(), mdict_archive::MdictError>(())
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::trace;
use lru::LruCache;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::{MdictError, Result};

/// Upper bound of the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheCapacity {
    /// At most this many decoded blocks
    Blocks(usize),
    /// At most this many decoded bytes, counted by declared block size
    Bytes(u64),
}

impl Default for CacheCapacity {
    fn default() -> Self {
        CacheCapacity::Blocks(10)
    }
}

/// Counters describing cache behaviour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Requests served without decoding
    pub hits: u64,
    /// Decodes run, successful or not
    pub misses: u64,
    pub evictions: u64,
    pub resident_blocks: usize,
    pub resident_bytes: u64,
}

type Outcome = std::result::Result<Arc<[u8]>, MdictError>;
type Flight = Arc<OnceCell<Outcome>>;

struct CacheState {
    lru: LruCache<usize, (Arc<[u8]>, u64)>,
    in_flight: HashMap<usize, Flight>,
    resident_bytes: u64,
}

enum Lookup {
    Cached(Arc<[u8]>),
    Wait(Flight),
    Lead(Flight),
}

/// LRU cache of decoded record blocks with single-flight decoding.
pub struct RecordBlockCache {
    capacity: CacheCapacity,
    state: Mutex<CacheState>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

/// Ends a decode in progress. If the loader unwinds before `complete`, waiters
/// receive an error instead of blocking forever.
struct FlightGuard<'a> {
    cache: &'a RecordBlockCache,
    index: usize,
    flight: Flight,
    done: bool,
}

impl FlightGuard<'_> {
    fn complete(&mut self, result: &Result<Arc<[u8]>>, weight: u64) {
        let published = match result {
            Ok(block) => Ok(block.clone()),
            Err(e) => Err(e.duplicate()),
        };
        let _ = self.flight.set(published);
        let mut state = self.cache.state.lock();
        self.cache.end_flight(&mut state, self.index, &self.flight);
        if let Ok(block) = result {
            self.cache.admit(&mut state, self.index, block.clone(), weight);
        }
        self.done = true;
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let _ = self.flight.set(Err(MdictError::corrupt_block(format!(
            "decoding record block {} was abandoned", self.index
        ))));
        let mut state = self.cache.state.lock();
        self.cache.end_flight(&mut state, self.index, &self.flight);
    }
}

impl RecordBlockCache {
    pub fn new(capacity: CacheCapacity) -> Self {
        Self {
            capacity,
            state: Mutex::new(CacheState {
                lru: LruCache::unbounded(),
                in_flight: HashMap::new(),
                resident_bytes: 0,
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> CacheCapacity {
        self.capacity
    }

    fn over_budget(&self, state: &CacheState, incoming: u64) -> bool {
        match self.capacity {
            // a zero budget still keeps the block just decoded
            CacheCapacity::Blocks(max) => state.lru.len() >= max.max(1),
            CacheCapacity::Bytes(max) => state.resident_bytes.saturating_add(incoming) > max,
        }
    }

    /// Makes room for a decoded block of `weight` bytes and inserts it.
    fn admit(&self, state: &mut CacheState, index: usize, block: Arc<[u8]>, weight: u64) {
        while !state.lru.is_empty() && self.over_budget(state, weight) {
            if let Some((evicted, (_, evicted_weight))) = state.lru.pop_lru() {
                state.resident_bytes = state.resident_bytes.saturating_sub(evicted_weight);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                trace!("Evicted record block {} ({} bytes)", evicted, evicted_weight);
            }
        }
        if let Some((_, replaced_weight)) = state.lru.put(index, (block, weight)) {
            state.resident_bytes = state.resident_bytes.saturating_sub(replaced_weight);
        }
        state.resident_bytes = state.resident_bytes.saturating_add(weight);
    }

    fn end_flight(&self, state: &mut CacheState, index: usize, flight: &Flight) {
        let is_same_flight = state.in_flight.get(&index).is_some_and(|current| Arc::ptr_eq(current, flight));
        if is_same_flight {
            state.in_flight.remove(&index);
        }
    }

    /// Returns decoded block `index`, running `loader` only if the block is neither
    /// cached nor being decoded by another caller.
    ///
    /// # Arguments
    ///
    /// * `index` - Record block index
    /// * `weight` - Declared decoded size, used for the byte budget
    /// * `loader` - Reads and decodes the block
    ///
    /// # Errors
    ///
    /// The loader's error, returned to the caller that ran it and to every caller
    /// waiting on that decode. Errors are not cached; a later request decodes again.
    pub fn get_or_decode<F>(&self, index: usize, weight: u64, loader: F) -> Result<Arc<[u8]>>
    where
        F: FnOnce() -> Result<Vec<u8>>,
    {
        let lookup = {
            let mut state = self.state.lock();
            let cached = state.lru.get(&index).map(|(block, _)| block.clone());
            match cached {
                Some(block) => Lookup::Cached(block),
                None => match state.in_flight.get(&index) {
                    Some(flight) => Lookup::Wait(flight.clone()),
                    None => {
                        let flight: Flight = Arc::new(OnceCell::new());
                        state.in_flight.insert(index, flight.clone());
                        Lookup::Lead(flight)
                    }
                },
            }
        };

        match lookup {
            Lookup::Cached(block) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                trace!("Record block {} served from cache", index);
                Ok(block)
            }
            Lookup::Wait(flight) => match flight.wait() {
                Ok(block) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    trace!("Record block {} shared with a concurrent decode", index);
                    Ok(block.clone())
                }
                Err(e) => Err(e.duplicate()),
            },
            Lookup::Lead(flight) => {
                let mut guard = FlightGuard { cache: self, index, flight, done: false };
                let result = loader().map(Arc::<[u8]>::from);
                self.misses.fetch_add(1, Ordering::Relaxed);
                if let Ok(block) = &result {
                    trace!("Decoded record block {} ({} bytes)", index, block.len());
                }
                guard.complete(&result, weight);
                result
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            resident_blocks: state.lru.len(),
            resident_bytes: state.resident_bytes,
        }
    }

    /// Drops every cached block. Counters and decodes in progress are kept.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.lru.clear();
        state.resident_bytes = 0;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::MdictError;

    fn block(fill: u8, len: usize) -> Result<Vec<u8>> {
        Ok(vec![fill; len])
    }

    #[test]
    fn test_block_capacity_evicts_lru() {
        let cache = RecordBlockCache::new(CacheCapacity::Blocks(1));
        cache.get_or_decode(0, 4, || block(0, 4)).unwrap();
        cache.get_or_decode(1, 4, || block(1, 4)).unwrap();
        let stats = cache.stats();
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.resident_blocks, 1);
        // block 0 was evicted, so it is decoded again
        cache.get_or_decode(0, 4, || block(0, 4)).unwrap();
        assert_eq!(cache.stats().misses, 3);
    }

    #[test]
    fn test_recently_used_survives() {
        let cache = RecordBlockCache::new(CacheCapacity::Blocks(2));
        cache.get_or_decode(0, 1, || block(0, 1)).unwrap();
        cache.get_or_decode(1, 1, || block(1, 1)).unwrap();
        cache.get_or_decode(0, 1, || block(9, 1)).unwrap();
        cache.get_or_decode(2, 1, || block(2, 1)).unwrap();
        // block 1 was least recently used
        let zero = cache.get_or_decode(0, 1, || block(9, 1)).unwrap();
        assert_eq!(&zero[..], &[0]);
        assert_eq!(cache.stats().misses, 3);
    }

    #[test]
    fn test_byte_budget() {
        let cache = RecordBlockCache::new(CacheCapacity::Bytes(100));
        cache.get_or_decode(0, 60, || block(0, 60)).unwrap();
        cache.get_or_decode(1, 30, || block(1, 30)).unwrap();
        assert_eq!(cache.stats().resident_bytes, 90);
        cache.get_or_decode(2, 50, || block(2, 50)).unwrap();
        let stats = cache.stats();
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.resident_bytes, 80);
        // an oversized block is still served, alone
        cache.get_or_decode(3, 500, || block(3, 500)).unwrap();
        let stats = cache.stats();
        assert_eq!(stats.resident_blocks, 1);
        assert_eq!(stats.resident_bytes, 500);
    }

    #[test]
    fn test_failure_is_not_cached() {
        let cache = RecordBlockCache::new(CacheCapacity::Blocks(4));
        let err = cache.get_or_decode(0, 8, || Err(MdictError::corrupt_block("bad"))).unwrap_err();
        assert!(err.is_corrupt_block());
        let stats = cache.stats();
        assert_eq!(stats.resident_blocks, 0);
        assert_eq!(stats.resident_bytes, 0);
        assert_eq!(&cache.get_or_decode(0, 8, || block(5, 8)).unwrap()[..], &[5; 8]);
    }

    #[test]
    fn test_concurrent_misses_decode_once() {
        let cache = RecordBlockCache::new(CacheCapacity::Blocks(2));
        let decodes = AtomicUsize::new(0);
        let barrier = Barrier::new(8);
        let buffers: Vec<Arc<[u8]>> = thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        cache.get_or_decode(3, 16, || {
                            decodes.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(Duration::from_millis(50));
                            block(3, 16)
                        }).unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(decodes.load(Ordering::SeqCst), 1);
        assert!(buffers.iter().all(|b| Arc::ptr_eq(b, &buffers[0])));
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 7);
    }

    #[test]
    fn test_eviction_during_decode_keeps_single_flight() {
        let cache = RecordBlockCache::new(CacheCapacity::Blocks(1));
        let decodes = AtomicUsize::new(0);
        let started = Barrier::new(2);
        let (slow, waited) = thread::scope(|s| {
            let slow = s.spawn(|| {
                cache.get_or_decode(0, 4, || {
                    decodes.fetch_add(1, Ordering::SeqCst);
                    started.wait();
                    thread::sleep(Duration::from_millis(100));
                    block(0, 4)
                }).unwrap()
            });
            started.wait();
            // block 1 completes while block 0 is still decoding
            cache.get_or_decode(1, 4, || block(1, 4)).unwrap();
            let waited = cache.get_or_decode(0, 4, || {
                decodes.fetch_add(1, Ordering::SeqCst);
                block(0, 4)
            }).unwrap();
            (slow.join().unwrap(), waited)
        });
        assert_eq!(decodes.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&slow, &waited));
        let stats = cache.stats();
        assert_eq!(stats.resident_blocks, 1);
        assert_eq!(stats.evictions, 1);
    }

    #[test]
    fn test_failure_reaches_every_waiter() {
        let cache = RecordBlockCache::new(CacheCapacity::Blocks(4));
        let decodes = AtomicUsize::new(0);
        let barrier = Barrier::new(4);
        let results: Vec<Result<Arc<[u8]>>> = thread::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        cache.get_or_decode(2, 8, || {
                            decodes.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(Duration::from_millis(50));
                            Err(MdictError::corrupt_block("bad block"))
                        })
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(decodes.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| r.as_ref().is_err_and(|e| e.is_corrupt_block())));
        assert_eq!(cache.stats().resident_blocks, 0);
        // the failed decode is forgotten
        assert_eq!(&cache.get_or_decode(2, 8, || block(2, 8)).unwrap()[..], &[2; 8]);
    }

    #[test]
    fn test_panicking_loader_releases_block() {
        let cache = RecordBlockCache::new(CacheCapacity::Blocks(4));
        let outcome = thread::scope(|s| {
            s.spawn(|| cache.get_or_decode(5, 8, || panic!("loader gave up"))).join()
        });
        assert!(outcome.is_err());
        assert_eq!(&cache.get_or_decode(5, 8, || block(5, 8)).unwrap()[..], &[5; 8]);
    }

    #[test]
    fn test_huge_weights_saturate() {
        let cache = RecordBlockCache::new(CacheCapacity::Bytes(100));
        cache.get_or_decode(0, u64::MAX, || block(0, 1)).unwrap();
        cache.get_or_decode(1, u64::MAX, || block(1, 1)).unwrap();
        let stats = cache.stats();
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.resident_blocks, 1);
        assert_eq!(stats.resident_bytes, u64::MAX);
    }

    #[test]
    fn test_clear() {
        let cache = RecordBlockCache::new(CacheCapacity::default());
        cache.get_or_decode(0, 2, || block(0, 2)).unwrap();
        cache.clear();
        assert_eq!(cache.stats().resident_blocks, 0);
        assert_eq!(cache.capacity(), CacheCapacity::Blocks(10));
    }
}
