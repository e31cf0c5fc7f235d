//! Time-bounded in-memory cache for fetch results.
//!
//! Extraction is slow and upstream download URLs stay valid for hours, so
//! successful results are kept for a fixed window and handed back to repeat
//! requests. There is no background eviction; an entry past its TTL is
//! dropped by the read that finds it. Cookie changes wipe the whole map
//! because cached results may encode access-level-dependent content.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// How long a fetched result stays servable.
pub const RESULT_TTL: Duration = Duration::from_secs(3600);

/// Builds the cache key for a request: a blake3 digest over the normalized
/// URL and the content-sensitivity flag. The same URL fetched under a
/// different sensitivity declaration caches separately, since the extractor
/// may see different content depending on credentials.
pub fn request_key(url: &str, sensitive: bool) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(url.as_bytes());
    hasher.update(&[u8::from(sensitive)]);
    hasher.finalize().to_hex().to_string()
}

struct Entry<T> {
    value: T,
    created_at: Instant,
}

/// Key to result-record map behind a single mutex. Entries are immutable
/// after insertion apart from the expiry check on read.
pub struct ResultCache<T> {
    entries: Mutex<HashMap<String, Entry<T>>>,
    ttl: Duration,
}

impl<T: Clone> ResultCache<T> {
    pub fn new() -> Self {
        Self::with_ttl(RESULT_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Returns the cached record for `key`, or `None` when the key is unseen
    /// or its entry has aged past the TTL. Expired entries are removed here.
    pub fn get(&self, key: &str) -> Option<T> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.created_at.elapsed() < self.ttl => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Inserts or overwrites `key`, stamping the current time as created-at.
    pub fn set(&self, key: &str, value: T) {
        self.entries.lock().insert(
            key.to_owned(),
            Entry {
                value,
                created_at: Instant::now(),
            },
        );
    }

    /// Drops every entry. Called whenever the cookie state changes so
    /// results fetched under old credentials never leak across.
    pub fn invalidate_all(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Ages an existing entry so tests can cross the TTL without sleeping.
    #[cfg(test)]
    fn backdate(&self, key: &str, by: Duration) {
        if let Some(entry) = self.entries.lock().get_mut(key) {
            entry.created_at -= by;
        }
    }
}

impl<T: Clone> Default for ResultCache<T> {
    fn default() -> Self {
        Self::new()
    }
}
