//! Token Counts
//!
//! cl100k_base counts for task text, with a 4-chars-per-token estimate when
//! the encoder cannot load. Counts are memoised by content hash in a bounded
//! first-in first-out cache.

use parking_lot::{Mutex, RwLock};
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tiktoken_rs::{cl100k_base, CoreBPE};

const CACHE_CAPACITY: usize = 10_000;

lazy_static::lazy_static! {
    /// Encoder shared by every count; `None` until first use or if loading failed
    static ref ENCODER: Mutex<Option<Arc<CoreBPE>>> = Mutex::new(None);
}

static COUNT_CACHE: RwLock<Option<CountCache>> = RwLock::new(None);

/// Bounded count cache; the oldest entry goes first when full
struct CountCache {
    counts: HashMap<u64, u32>,
    order: VecDeque<u64>,
    capacity: usize,
}

impl CountCache {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            counts: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    fn lookup(&self, key: u64) -> Option<u32> {
        self.counts.get(&key).copied()
    }

    fn remember(&mut self, key: u64, count: u32) {
        if self.counts.insert(key, count).is_some() {
            return;
        }
        self.order.push_back(key);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.counts.remove(&oldest);
            }
        }
    }
}

fn content_key(text: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}

fn encoder() -> Option<Arc<CoreBPE>> {
    let mut slot = ENCODER.lock();
    if slot.is_none() {
        match cl100k_base() {
            Ok(bpe) => *slot = Some(Arc::new(bpe)),
            Err(e) => {
                tracing::warn!(error = %e, "tiktoken encoder unavailable, using estimates");
                return None;
            }
        }
    }
    slot.clone()
}

/// Count tokens in text using cl100k_base encoding.
///
/// Falls back to [`estimate_tokens_quick`] when the encoder cannot load.
pub fn count_tokens(text: &str) -> u32 {
    if text.is_empty() {
        return 0;
    }

    let key = content_key(text);
    if let Some(count) = COUNT_CACHE.read().as_ref().and_then(|c| c.lookup(key)) {
        return count;
    }

    let Some(bpe) = encoder() else {
        return estimate_tokens_quick(text);
    };
    let count = u32::try_from(bpe.encode_with_special_tokens(text).len()).unwrap_or(u32::MAX);

    COUNT_CACHE
        .write()
        .get_or_insert_with(|| CountCache::with_capacity(CACHE_CAPACITY))
        .remember(key, count);

    count
}

/// Estimate tokens without the encoder (~4 chars per token)
pub fn estimate_tokens_quick(text: &str) -> u32 {
    let estimate = (text.len() as f64 / 4.0).ceil();
    estimate.min(u32::MAX as f64) as u32
}

/// Number of cached counts
pub fn cache_len() -> usize {
    COUNT_CACHE.read().as_ref().map_or(0, |c| c.counts.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_tokens_empty() {
        assert_eq!(count_tokens(""), 0);
    }

    #[test]
    fn test_count_tokens_simple() {
        let count = count_tokens("Hello, world!");
        assert!(count > 0);
        assert!(count < 10);
    }

    #[test]
    fn test_count_tokens_cached() {
        let text = "Check the calendar for conflicts tomorrow.";
        let first = count_tokens(text);
        assert!(cache_len() >= 1);
        assert_eq!(count_tokens(text), first);
    }

    #[test]
    fn test_estimate_tokens_quick() {
        let text = "Hello world this is a test";
        let estimate = estimate_tokens_quick(text);
        let actual = count_tokens(text);
        assert!(estimate <= actual * 2);
        assert!(estimate >= actual / 2);
        assert_eq!(estimate_tokens_quick(""), 0);
    }

    #[test]
    fn test_cache_evicts_oldest_first() {
        let mut cache = CountCache::with_capacity(3);
        for key in 0..3 {
            cache.remember(key, 1);
        }
        // Re-inserting a known key does not refresh its position
        cache.remember(0, 5);
        cache.remember(99, 7);
        assert_eq!(cache.counts.len(), 3);
        assert_eq!(cache.lookup(0), None);
        assert_eq!(cache.lookup(1), Some(1));
        assert_eq!(cache.lookup(99), Some(7));
    }
}
