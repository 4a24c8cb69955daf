//! Recycling Pool for Codec Contexts
//!
//! Zstd contexts are expensive to set up relative to compressing one chunk
//! section, so they are cached process-wide, keyed by codec parameters. The
//! pool hands out a guard that returns the context on drop; the lock is
//! held only around the free-list operation, never across a codec call.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;

/// How many idle contexts to keep per key.
const MAX_IDLE_PER_KEY: usize = 16;

pub struct RecyclingPool<K: Eq + Hash, T> {
    idle: Mutex<HashMap<K, Vec<T>>>,
}

impl<K: Eq + Hash + Clone, T> RecyclingPool<K, T> {
    pub fn new() -> Self {
        Self {
            idle: Mutex::new(HashMap::new()),
        }
    }

    /// Takes an idle context for `key` or creates one with `create`.
    pub fn get<E>(
        &self,
        key: K,
        create: impl FnOnce() -> std::result::Result<T, E>,
    ) -> std::result::Result<PoolGuard<'_, K, T>, E> {
        let recycled = {
            let mut idle = self.idle.lock().expect("codec pool poisoned");
            idle.get_mut(&key).and_then(Vec::pop)
        };
        let value = match recycled {
            Some(value) => value,
            None => create()?,
        };
        Ok(PoolGuard {
            pool: self,
            key: Some(key),
            value: Some(value),
        })
    }

    fn put(&self, key: K, value: T) {
        let mut idle = self.idle.lock().expect("codec pool poisoned");
        let slot = idle.entry(key).or_default();
        if slot.len() < MAX_IDLE_PER_KEY {
            slot.push(value);
        }
    }
}

impl<K: Eq + Hash + Clone, T> Default for RecyclingPool<K, T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Borrowed codec context; returns to the pool on drop.
pub struct PoolGuard<'a, K: Eq + Hash + Clone, T> {
    pool: &'a RecyclingPool<K, T>,
    key: Option<K>,
    value: Option<T>,
}

impl<K: Eq + Hash + Clone, T> std::ops::Deref for PoolGuard<'_, K, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.value.as_ref().expect("value present until drop")
    }
}

impl<K: Eq + Hash + Clone, T> std::ops::DerefMut for PoolGuard<'_, K, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.value.as_mut().expect("value present until drop")
    }
}

impl<K: Eq + Hash + Clone, T> Drop for PoolGuard<'_, K, T> {
    fn drop(&mut self) {
        if let (Some(key), Some(value)) = (self.key.take(), self.value.take()) {
            self.pool.put(key, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contexts_are_recycled() {
        let pool: RecyclingPool<i32, Vec<u8>> = RecyclingPool::new();
        {
            let mut guard = pool.get::<()>(3, || Ok(Vec::new())).unwrap();
            guard.push(42);
        }
        // Same key gets the same context back.
        let guard = pool.get::<()>(3, || Ok(Vec::new())).unwrap();
        assert_eq!(*guard, vec![42]);
    }

    #[test]
    fn test_distinct_keys_get_distinct_contexts() {
        let pool: RecyclingPool<i32, Vec<u8>> = RecyclingPool::new();
        {
            let mut guard = pool.get::<()>(1, || Ok(Vec::new())).unwrap();
            guard.push(1);
        }
        let guard = pool.get::<()>(2, || Ok(Vec::new())).unwrap();
        assert!(guard.is_empty());
    }

    #[test]
    fn test_create_error_propagates() {
        let pool: RecyclingPool<i32, Vec<u8>> = RecyclingPool::new();
        let result = pool.get(9, || Err("nope"));
        assert!(result.is_err());
    }

    #[test]
    fn test_concurrent_checkouts_do_not_share() {
        let pool: RecyclingPool<i32, Vec<u8>> = RecyclingPool::new();
        let mut a = pool.get::<()>(1, || Ok(vec![b'a'])).unwrap();
        let b = pool.get::<()>(1, || Ok(vec![b'b'])).unwrap();
        a.push(b'x');
        assert_eq!(*b, vec![b'b']);
    }
}
