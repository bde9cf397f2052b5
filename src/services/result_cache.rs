// Combine Result Cache Service
//
// LRU cache of terminal outputs with TTL support. Entries are keyed by the
// plan's dag_id, the backend and a fingerprint of the scan data it ran over,
// so a hit is only possible for an identical plan over identical input rows.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::models::Relation;

/// Terminal outputs of one execution
pub type CombineOutputs = BTreeMap<String, Relation>;

#[derive(Debug, Clone)]
struct CachedOutputs {
    outputs: CombineOutputs,
    cached_at: Instant,
    ttl: Duration,
    hit_count: u64,
    /// Access tick, larger is more recent
    last_used: u64,
}

impl CachedOutputs {
    fn is_expired(&self) -> bool {
        self.cached_at.elapsed() > self.ttl
    }
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, CachedOutputs>,
    tick: u64,
    stats: CacheStats,
}

impl CacheState {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

impl CacheStats {
    /// Calculate hit ratio (0.0 to 1.0)
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Result cache with LRU eviction and TTL
///
/// Cloning shares the underlying storage.
#[derive(Debug, Clone)]
pub struct ResultCache {
    state: Arc<Mutex<CacheState>>,
    max_size: usize,
    default_ttl: Duration,
}

impl ResultCache {
    /// Create a new result cache
    ///
    /// # Arguments
    ///
    /// * `max_size` - Maximum number of cached executions; 0 disables caching
    /// * `default_ttl_secs` - Default TTL in seconds
    pub fn new(max_size: usize, default_ttl_secs: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(CacheState::default())),
            max_size,
            default_ttl: Duration::from_secs(default_ttl_secs),
        }
    }

    /// Cache key for a plan run on one backend over a given scan data fingerprint
    pub fn generate_key(dag_id: &str, backend: &str, scan_fingerprint: &str) -> String {
        format!("{}:{}:{}", dag_id, backend, scan_fingerprint)
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        // A panic while holding the lock cannot leave entries half-written
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Get cached outputs if present and not expired
    pub fn get(&self, key: &str) -> Option<CombineOutputs> {
        let mut guard = self.lock();
        let state = &mut *guard;
        let tick = state.next_tick();

        let expired = match state.entries.get(key) {
            Some(cached) => cached.is_expired(),
            None => {
                state.stats.misses += 1;
                tracing::debug!("Result cache miss for key: {}", key);
                return None;
            }
        };

        if expired {
            state.entries.remove(key);
            state.stats.misses += 1;
            state.stats.expirations += 1;
            tracing::debug!("Result cache expired for key: {}", key);
            return None;
        }

        state.stats.hits += 1;
        let cached = state.entries.get_mut(key)?;
        cached.hit_count += 1;
        cached.last_used = tick;
        tracing::debug!(
            "Result cache hit for key: {} (hit_count: {})",
            key,
            cached.hit_count
        );
        Some(cached.outputs.clone())
    }

    /// Store outputs, evicting the least recently used entry when full
    pub fn put(&self, key: String, outputs: CombineOutputs, ttl: Option<Duration>) {
        if self.max_size == 0 {
            return;
        }

        let mut state = self.lock();
        if state.entries.len() >= self.max_size && !state.entries.contains_key(&key) {
            Self::evict_lru(&mut state);
        }

        let tick = state.next_tick();
        state.entries.insert(
            key.clone(),
            CachedOutputs {
                outputs,
                cached_at: Instant::now(),
                ttl: ttl.unwrap_or(self.default_ttl),
                hit_count: 0,
                last_used: tick,
            },
        );
        tracing::debug!(
            "Cached outputs for key: {} (cache size: {})",
            key,
            state.entries.len()
        );
    }

    fn evict_lru(state: &mut CacheState) {
        let oldest = state
            .entries
            .iter()
            .min_by_key(|(_, cached)| cached.last_used)
            .map(|(key, _)| key.clone());

        if let Some(key) = oldest {
            state.entries.remove(&key);
            state.stats.evictions += 1;
            tracing::debug!("Evicted result cache entry: {}", key);
        }
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        let count = state.entries.len();
        state.entries.clear();
        tracing::info!("Cleared {} result cache entries", count);
    }

    pub fn stats(&self) -> CacheStats {
        self.lock().stats.clone()
    }

    pub fn size(&self) -> usize {
        self.lock().entries.len()
    }

    /// Remove expired entries
    pub fn cleanup_expired(&self) {
        let mut state = self.lock();
        let before = state.entries.len();
        state.entries.retain(|_, cached| !cached.is_expired());
        let removed = before - state.entries.len();
        state.stats.expirations += removed as u64;

        if removed > 0 {
            tracing::info!("Cleaned up {} expired result cache entries", removed);
        }
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(256, 300)
    }
}
