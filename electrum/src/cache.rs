// SPDX-License-Identifier: CC0-1.0

//! C2: a bounded, time-boxed cache of transaction views keyed by txid.
//!
//! Eviction is FIFO by insertion order, not LRU: a separate deque records
//! insertion order so the oldest entry can always be found in O(1)
//! regardless of how often it has been read.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bitcoin::Txid;
use types::TransactionView;

struct Entry {
    view: TransactionView,
    expiry: Instant,
}

struct Inner {
    map: HashMap<Txid, Entry>,
    index: VecDeque<Txid>,
}

impl Inner {
    fn remove_oldest(&mut self) {
        if let Some(txid) = self.index.pop_front() {
            self.map.remove(&txid);
        }
    }

    fn sweep(&mut self, now: Instant) {
        let expired: Vec<Txid> =
            self.map.iter().filter(|(_, e)| e.expiry <= now).map(|(t, _)| *t).collect();
        for txid in expired {
            self.map.remove(&txid);
            self.index.retain(|t| t != &txid);
        }
    }
}

/// A size- and age-bounded store of [`TransactionView`]s, keyed by txid.
///
/// Reuse policy (a view with `height == 0` must be re-fetched) is enforced by
/// the provider, not here: this cache serves whatever was last `set`.
pub struct RequestCache {
    inner: Arc<Mutex<Inner>>,
    max_size: usize,
    timeout: Duration,
    stopped: Arc<AtomicBool>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl RequestCache {
    /// Creates a cache bounded to `max_size` entries, each valid for `timeout`,
    /// swept for expired entries every `sweep_interval`.
    pub fn new(max_size: usize, timeout: Duration, sweep_interval: Duration) -> Arc<Self> {
        let cache = Arc::new(RequestCache {
            inner: Arc::new(Mutex::new(Inner { map: HashMap::new(), index: VecDeque::new() })),
            max_size,
            timeout,
            stopped: Arc::new(AtomicBool::new(false)),
            sweeper: Mutex::new(None),
        });

        let inner = Arc::clone(&cache.inner);
        let stopped = Arc::clone(&cache.stopped);
        let handle = thread::spawn(move || {
            while !stopped.load(Ordering::SeqCst) {
                thread::sleep(sweep_interval);
                if stopped.load(Ordering::SeqCst) {
                    break;
                }
                inner.lock().unwrap().sweep(Instant::now());
            }
        });
        *cache.sweeper.lock().unwrap() = Some(handle);
        cache
    }

    /// Returns the cached view for `txid`, if present (expired or not evicted yet).
    pub fn get(&self, txid: &Txid) -> Option<TransactionView> {
        self.inner.lock().unwrap().map.get(txid).map(|e| e.view.clone())
    }

    /// Inserts or replaces the view for `txid`, evicting the oldest entry first if at capacity.
    pub fn set(&self, txid: Txid, view: TransactionView) {
        let mut inner = self.inner.lock().unwrap();
        if inner.map.contains_key(&txid) {
            inner.index.retain(|t| t != &txid);
        } else if inner.index.len() >= self.max_size {
            inner.remove_oldest();
        }
        inner.index.push_back(txid);
        inner.map.insert(txid, Entry { view, expiry: Instant::now() + self.timeout });
    }

    /// Empties the cache.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.map.clear();
        inner.index.clear();
    }

    /// Number of entries currently held.
    pub fn len(&self) -> usize { self.inner.lock().unwrap().index.len() }

    /// True if the cache holds no entries.
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Stops the background sweeper. Further `get`/`set` calls still work.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        if let Some(handle) = self.sweeper.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash;

    fn sample_view(byte: u8, height: u32) -> (Txid, TransactionView) {
        let txid = Txid::from_byte_array([byte; 32]);
        let view = TransactionView {
            txid,
            height,
            outputs: vec![],
            std_out: vec![],
            inputs: vec![],
            fee: bitcoin::Amount::ZERO,
            unconfirmed_inputs: vec![],
        };
        (txid, view)
    }

    #[test]
    fn get_and_set_round_trip() {
        let cache = RequestCache::new(10, Duration::from_secs(300), Duration::from_secs(3600));
        let (txid, view) = sample_view(1, 100);
        assert!(cache.get(&txid).is_none());
        cache.set(txid, view.clone());
        assert_eq!(cache.get(&txid), Some(view));
        cache.stop();
    }

    #[test]
    fn evicts_fifo_when_over_capacity() {
        let cache = RequestCache::new(2, Duration::from_secs(300), Duration::from_secs(3600));
        let (t1, v1) = sample_view(1, 1);
        let (t2, v2) = sample_view(2, 1);
        let (t3, v3) = sample_view(3, 1);
        cache.set(t1, v1);
        cache.set(t2, v2);
        cache.set(t3, v3);

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&t1).is_none(), "oldest entry should have been evicted");
        assert!(cache.get(&t2).is_some());
        assert!(cache.get(&t3).is_some());
        cache.stop();
    }

    #[test]
    fn clear_empties_the_cache() {
        let cache = RequestCache::new(10, Duration::from_secs(300), Duration::from_secs(3600));
        let (txid, view) = sample_view(1, 1);
        cache.set(txid, view);
        cache.clear();
        assert!(cache.is_empty());
        cache.stop();
    }
}
