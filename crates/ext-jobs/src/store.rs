//! Key-value storage with per-entry expiry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = at;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

struct Entry<V> {
    value: V,
    expires_at: DateTime<Utc>,
}

/// Map whose entries vanish `ttl` after their last write.
///
/// Expired entries are dropped lazily on access; an expired key reads
/// exactly like one that was never written.
pub struct ExpiringMap<V> {
    entries: Mutex<HashMap<String, Entry<V>>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl<V> std::fmt::Debug for ExpiringMap<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpiringMap")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl<V: Clone> ExpiringMap<V> {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            clock,
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry<V>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Live value for `key`, if any.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now();
        let mut entries = self.entries();
        match entries.get(key) {
            Some(entry) if entry.expires_at > now => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Store `value`, replacing any previous one and restarting its TTL.
    pub fn put(&self, key: &str, value: V) {
        let expires_at = self.clock.now() + self.ttl;
        self.entries()
            .insert(key.to_string(), Entry { value, expires_at });
    }

    /// Whether `key` holds a live value.
    pub fn contains(&self, key: &str) -> bool {
        let now = self.clock.now();
        self.entries()
            .get(key)
            .is_some_and(|entry| entry.expires_at > now)
    }

    /// Replace the value of `key` with `f(current)` in one locked step and
    /// restart its TTL. `f` receives `None` for absent or expired keys.
    pub fn upsert(&self, key: &str, f: impl FnOnce(Option<V>) -> V) {
        let now = self.clock.now();
        let mut entries = self.entries();
        let current = entries
            .remove(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.value);
        let value = f(current);
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: now + self.ttl,
            },
        );
    }

    /// Modify a live entry in place and restart its TTL.
    ///
    /// Returns `false` without calling `f` when the key is absent or expired.
    pub fn update(&self, key: &str, f: impl FnOnce(&mut V)) -> bool {
        let now = self.clock.now();
        let mut entries = self.entries();
        match entries.get_mut(key) {
            Some(entry) if entry.expires_at > now => {
                f(&mut entry.value);
                entry.expires_at = now + self.ttl;
                true
            }
            Some(_) => {
                entries.remove(key);
                false
            }
            None => false,
        }
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    /// Number of stored entries, expired ones included until purged.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(clock: &Arc<ManualClock>) -> ExpiringMap<u32> {
        ExpiringMap::new(Duration::minutes(10), clock.clone())
    }

    #[test]
    fn test_entry_expires_after_ttl() {
        let clock = Arc::new(ManualClock::default());
        let map = map(&clock);
        map.put("a", 1);

        clock.advance(Duration::minutes(9));
        assert_eq!(map.get("a"), Some(1));

        clock.advance(Duration::minutes(1));
        assert_eq!(map.get("a"), None);
        assert!(map.is_empty());
    }

    #[test]
    fn test_update_refreshes_ttl() {
        let clock = Arc::new(ManualClock::default());
        let map = map(&clock);
        map.put("a", 1);

        clock.advance(Duration::minutes(8));
        assert!(map.update("a", |v| *v += 1));

        clock.advance(Duration::minutes(8));
        assert_eq!(map.get("a"), Some(2));
    }

    #[test]
    fn test_update_on_expired_entry_is_ignored() {
        let clock = Arc::new(ManualClock::default());
        let map = map(&clock);
        map.put("a", 1);
        clock.advance(Duration::minutes(11));

        let mut called = false;
        assert!(!map.update("a", |_| called = true));
        assert!(!called);
        assert!(!map.update("missing", |_| {}));
    }

    #[test]
    fn test_upsert_sees_live_value_only() {
        let clock = Arc::new(ManualClock::default());
        let map = map(&clock);

        map.upsert("a", |current| current.unwrap_or(0) + 1);
        map.upsert("a", |current| current.unwrap_or(0) + 1);
        assert_eq!(map.get("a"), Some(2));

        clock.advance(Duration::minutes(10));
        assert!(!map.contains("a"));
        map.upsert("a", |current| current.unwrap_or(0) + 1);
        assert_eq!(map.get("a"), Some(1));
    }

    #[test]
    fn test_concurrent_upserts_are_not_lost() {
        let map = Arc::new(ExpiringMap::<Vec<usize>>::new(
            Duration::minutes(10),
            Arc::new(SystemClock),
        ));
        let barrier = Arc::new(std::sync::Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|n| {
                let map = Arc::clone(&map);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    for i in 0..50 {
                        map.upsert("k", |current| {
                            let mut items = current.unwrap_or_default();
                            items.push(n * 100 + i);
                            items
                        });
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(map.get("k").unwrap().len(), 400);
    }

    #[test]
    fn test_purge_expired() {
        let clock = Arc::new(ManualClock::default());
        let map = map(&clock);
        map.put("old", 1);
        clock.advance(Duration::minutes(5));
        map.put("new", 2);
        clock.advance(Duration::minutes(6));

        assert_eq!(map.purge_expired(), 1);
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("new"), Some(2));
    }
}
