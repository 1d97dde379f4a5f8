//! TTL- and size-bounded seen-set.
//!
//! One [`SeenSet`] instance backs each dedupe surface: inbound message
//! fingerprints, outbound send fingerprints, and accepted approval
//! reactions. Entries expire after their TTL; when the map overflows the
//! oldest entries are evicted so memory stays bounded regardless of
//! traffic.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

/// Bounded map of recently seen fingerprints.
pub struct SeenSet {
    entries: Mutex<HashMap<String, DateTime<Utc>>>,
    ttl: Duration,
    max_entries: usize,
    last_prune: Mutex<DateTime<Utc>>,
}

/// Prune at most once per this interval on the hot path.
const PRUNE_INTERVAL_SECS: i64 = 60;

impl SeenSet {
    /// Create a seen-set with the given TTL (milliseconds) and capacity.
    pub fn new(ttl_ms: i64, max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl: Duration::milliseconds(ttl_ms),
            max_entries,
            last_prune: Mutex::new(Utc::now()),
        }
    }

    /// Mark a fingerprint as seen now. Returns `true` when it was fresh,
    /// `false` when it was already marked within the TTL.
    pub fn check_and_mark(&self, key: &str) -> bool {
        self.maybe_prune();
        let now = Utc::now();
        let mut entries = self.entries.lock().expect("seen-set lock");

        if let Some(at) = entries.get(key)
            && now - *at < self.ttl
        {
            return false;
        }

        if entries.len() >= self.max_entries {
            Self::evict_oldest(&mut entries, self.max_entries / 4);
        }
        entries.insert(key.to_owned(), now);
        true
    }

    /// Whether a fingerprint is currently marked, without marking it.
    pub fn contains(&self, key: &str) -> bool {
        let now = Utc::now();
        let entries = self.entries.lock().expect("seen-set lock");
        entries.get(key).is_some_and(|at| now - *at < self.ttl)
    }

    /// Mark without checking; used when priming from a first poll pass.
    pub fn mark(&self, key: &str) {
        let mut entries = self.entries.lock().expect("seen-set lock");
        if entries.len() >= self.max_entries {
            Self::evict_oldest(&mut entries, self.max_entries / 4);
        }
        entries.insert(key.to_owned(), Utc::now());
    }

    /// Current entry count (expired entries included until pruned).
    pub fn len(&self) -> usize {
        self.entries.lock().expect("seen-set lock").len()
    }

    /// Whether the set holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn maybe_prune(&self) {
        let now = Utc::now();
        {
            let mut last = self.last_prune.lock().expect("seen-set lock");
            if now - *last < Duration::seconds(PRUNE_INTERVAL_SECS) {
                return;
            }
            *last = now;
        }
        let mut entries = self.entries.lock().expect("seen-set lock");
        entries.retain(|_, at| now - *at < self.ttl);
    }

    fn evict_oldest(entries: &mut HashMap<String, DateTime<Utc>>, count: usize) {
        let mut by_age: Vec<(String, DateTime<Utc>)> = entries
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        by_age.sort_by_key(|(_, at)| *at);
        for (key, _) in by_age.into_iter().take(count.max(1)) {
            entries.remove(&key);
        }
    }
}
