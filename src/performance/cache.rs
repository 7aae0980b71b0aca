//! Content-hash validated analysis cache
//!
//! Entries are keyed by file identity and carry the hash of the content they
//! were computed from. A lookup through [`ContentCache::get_if_valid`] only
//! hits when the caller's current content hashes to the stored value. The
//! cache is bounded both by entry count and by an approximate memory budget,
//! evicting least-recently-used entries first.

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace};

/// Content hash for change detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    pub fn from_content(content: &[u8]) -> Self {
        let hash = blake3::hash(content);
        Self(*hash.as_bytes())
    }

    pub fn of(content: &str) -> Self {
        Self::from_content(content.as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

/// Approximate in-memory footprint of a cached value, in bytes
pub trait EstimateSize {
    fn estimated_size(&self) -> usize;
}

macro_rules! fixed_size {
    ($($ty:ty),*) => {
        $(impl EstimateSize for $ty {
            fn estimated_size(&self) -> usize {
                std::mem::size_of::<$ty>()
            }
        })*
    };
}

fixed_size!(bool, u8, u16, u32, u64, usize, i8, i16, i32, i64, isize, f32, f64, ());

impl EstimateSize for str {
    fn estimated_size(&self) -> usize {
        self.len()
    }
}

impl EstimateSize for String {
    fn estimated_size(&self) -> usize {
        self.len()
    }
}

impl EstimateSize for PathBuf {
    fn estimated_size(&self) -> usize {
        self.as_os_str().len()
    }
}

impl<T: EstimateSize> EstimateSize for Option<T> {
    fn estimated_size(&self) -> usize {
        self.as_ref().map_or(0, EstimateSize::estimated_size)
    }
}

impl<T: EstimateSize> EstimateSize for Vec<T> {
    fn estimated_size(&self) -> usize {
        self.iter().map(EstimateSize::estimated_size).sum()
    }
}

impl<T: EstimateSize + ?Sized> EstimateSize for Arc<T> {
    fn estimated_size(&self) -> usize {
        (**self).estimated_size()
    }
}

impl<A: EstimateSize, B: EstimateSize> EstimateSize for (A, B) {
    fn estimated_size(&self) -> usize {
        self.0.estimated_size() + self.1.estimated_size()
    }
}

impl<K: EstimateSize, V: EstimateSize, S> EstimateSize for HashMap<K, V, S> {
    fn estimated_size(&self) -> usize {
        self.iter().map(|(k, v)| k.estimated_size() + v.estimated_size()).sum()
    }
}

impl<K: EstimateSize, V: EstimateSize> EstimateSize for BTreeMap<K, V> {
    fn estimated_size(&self) -> usize {
        self.iter().map(|(k, v)| k.estimated_size() + v.estimated_size()).sum()
    }
}

impl EstimateSize for serde_json::Value {
    fn estimated_size(&self) -> usize {
        use serde_json::Value;
        match self {
            Value::Null => 0,
            Value::Bool(_) => 4,
            Value::Number(_) => 8,
            Value::String(s) => s.len(),
            Value::Array(items) => items.iter().map(EstimateSize::estimated_size).sum(),
            Value::Object(map) => map.iter().map(|(k, v)| k.len() + v.estimated_size()).sum(),
        }
    }
}

struct CacheSlot<V> {
    hash: Option<ContentHash>,
    value: Arc<V>,
    size_bytes: usize,
    last_access: Instant,
}

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    hits: usize,
    misses: usize,
    evictions: usize,
}

struct CacheInner<V> {
    lru: LruCache<String, CacheSlot<V>>,
    memory_bytes: usize,
    counters: Counters,
}

/// Cache statistics for monitoring
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub memory_usage_mb: f64,
    pub max_memory_mb: f64,
    pub hits: usize,
    pub misses: usize,
    pub evictions: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// LRU cache bounded by entry count and estimated memory, with content-hash validation
pub struct ContentCache<V> {
    inner: Mutex<CacheInner<V>>,
    max_entries: usize,
    max_memory_bytes: usize,
}

impl<V: EstimateSize> ContentCache<V> {
    pub fn new(max_entries: usize, max_memory_mb: usize) -> Self {
        Self::with_memory_bytes(max_entries, max_memory_mb * 1024 * 1024)
    }

    pub fn with_memory_bytes(max_entries: usize, max_memory_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                lru: LruCache::unbounded(),
                memory_bytes: 0,
                counters: Counters::default(),
            }),
            max_entries: max_entries.max(1),
            max_memory_bytes,
        }
    }

    /// Return the cached value only if it was stored for exactly this content.
    /// A stale entry is dropped on the way out.
    pub fn get_if_valid(&self, path: &str, current_content: &str) -> Option<Arc<V>> {
        let current = ContentHash::of(current_content);
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let valid = match inner.lru.get_mut(path) {
            Some(slot) if slot.hash == Some(current) => {
                slot.last_access = Instant::now();
                Some(slot.value.clone())
            }
            Some(_) => None,
            None => {
                inner.counters.misses += 1;
                return None;
            }
        };

        match valid {
            Some(value) => {
                inner.counters.hits += 1;
                Some(value)
            }
            None => {
                if let Some(stale) = inner.lru.pop(path) {
                    inner.memory_bytes = inner.memory_bytes.saturating_sub(stale.size_bytes);
                }
                inner.counters.misses += 1;
                trace!(path, "stale cache entry dropped");
                None
            }
        }
    }

    /// Store a value tagged with the hash of the content it was derived from
    pub fn set_with_hash(&self, path: &str, content: &str, value: V) -> bool {
        self.insert(path.to_string(), Some(ContentHash::of(content)), value)
    }

    /// Plain lookup without hash validation
    pub fn get(&self, key: &str) -> Option<Arc<V>> {
        let mut inner = self.inner.lock();
        let found = inner.lru.get_mut(key).map(|slot| {
            slot.last_access = Instant::now();
            slot.value.clone()
        });
        if found.is_some() {
            inner.counters.hits += 1;
        } else {
            inner.counters.misses += 1;
        }
        found
    }

    /// Plain insert without a content hash. Such entries never satisfy
    /// [`get_if_valid`](Self::get_if_valid).
    pub fn set(&self, key: &str, value: V) -> bool {
        self.insert(key.to_string(), None, value)
    }

    /// Check presence without touching recency
    pub fn has(&self, key: &str) -> bool {
        self.inner.lock().lru.contains(key)
    }

    /// Time since the entry was last read or written
    pub fn idle_time(&self, key: &str) -> Option<std::time::Duration> {
        self.inner.lock().lru.peek(key).map(|slot| slot.last_access.elapsed())
    }

    pub fn delete(&self, key: &str) -> bool {
        let mut inner = self.inner.lock();
        match inner.lru.pop(key) {
            Some(slot) => {
                inner.memory_bytes = inner.memory_bytes.saturating_sub(slot.size_bytes);
                true
            }
            None => false,
        }
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.lru.clear();
        inner.memory_bytes = 0;
    }

    pub fn len(&self) -> usize {
        self.inner.lock().lru.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().lru.is_empty()
    }

    pub fn memory_usage_bytes(&self) -> usize {
        self.inner.lock().memory_bytes
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            size: inner.lru.len(),
            max_size: self.max_entries,
            memory_usage_mb: bytes_to_mb(inner.memory_bytes),
            max_memory_mb: bytes_to_mb(self.max_memory_bytes),
            hits: inner.counters.hits,
            misses: inner.counters.misses,
            evictions: inner.counters.evictions,
        }
    }

    fn insert(&self, key: String, hash: Option<ContentHash>, value: V) -> bool {
        let size = key.len() + value.estimated_size();
        let mut inner = self.inner.lock();

        // Whatever was stored under this key is superseded either way.
        if let Some(old) = inner.lru.pop(&key) {
            inner.memory_bytes = inner.memory_bytes.saturating_sub(old.size_bytes);
        }

        if size > self.max_memory_bytes {
            debug!(key = %key, size, budget = self.max_memory_bytes, "value exceeds cache budget, not cached");
            return false;
        }

        while inner.lru.len() >= self.max_entries || inner.memory_bytes + size > self.max_memory_bytes {
            match inner.lru.pop_lru() {
                Some((evicted, slot)) => {
                    inner.memory_bytes = inner.memory_bytes.saturating_sub(slot.size_bytes);
                    inner.counters.evictions += 1;
                    trace!(key = %evicted, "evicted cache entry");
                }
                None => break,
            }
        }

        inner.lru.put(
            key,
            CacheSlot {
                hash,
                value: Arc::new(value),
                size_bytes: size,
                last_access: Instant::now(),
            },
        );
        inner.memory_bytes += size;
        true
    }
}

fn bytes_to_mb(bytes: usize) -> f64 {
    bytes as f64 / 1024.0 / 1024.0
}
