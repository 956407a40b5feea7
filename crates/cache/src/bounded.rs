use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug)]
struct Inner<K, V> {
    entries: HashMap<K, V>,
    /// Keys in insertion order, oldest first. Always holds exactly the keys of `entries`.
    order: VecDeque<K>,
}

/// A fixed-capacity map with first-in-first-out eviction.
///
/// All operations take the same exclusive lock. `add` is first-write-wins:
/// inserting a key that is already present leaves the stored value untouched.
#[derive(Debug)]
pub struct BoundedCache<K, V> {
    inner: Mutex<Inner<K, V>>,
    capacity: usize,
}

impl<K, V> BoundedCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Creates an empty cache holding at most `capacity` entries.
    ///
    /// A zero capacity produces a cache that never stores anything.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::with_capacity(capacity),
                order: VecDeque::with_capacity(capacity),
            }),
            capacity,
        }
    }

    /// Inserts `value` under `key` unless the key is already cached.
    ///
    /// When the cache is full, the oldest inserted key is evicted first.
    pub fn add(&self, key: K, value: V) {
        if self.capacity == 0 {
            return;
        }

        let mut inner = self.lock();
        if inner.entries.contains_key(&key) {
            return;
        }

        if inner.entries.len() >= self.capacity
            && let Some(oldest) = inner.order.pop_front()
        {
            inner.entries.remove(&oldest);
            tracing::trace!(capacity = self.capacity, "evicted oldest cache entry");
        }

        inner.order.push_back(key.clone());
        inner.entries.insert(key, value);
    }

    /// Returns a clone of the cached value, or `None` on a miss.
    pub fn get(&self, key: &K) -> Option<V> {
        self.lock().entries.get(key).cloned()
    }

    /// Returns true if `key` is cached.
    pub fn contains(&self, key: &K) -> bool {
        self.lock().entries.contains_key(key)
    }

    /// Removes every entry and resets eviction order.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.order.clear();
    }

    /// Returns the number of cached entries.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    // A panic while holding the lock cannot leave the two collections out of
    // step: every mutation above completes without calling user code.
    fn lock(&self) -> MutexGuard<'_, Inner<K, V>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
