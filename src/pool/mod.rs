//! Fixed-size blocking resource pool
//!
//! [`Pool`] hands out connections from a bounded set: `acquire` blocks
//! until one is free, `try_acquire` fails fast, and the returned
//! [`PooledConn`] guard puts the connection back when dropped. FIFO
//! fairness among waiters is not guaranteed.

pub mod store;

pub use store::{AuthHook, AuthService, MemoryStore, UserStore};

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Condvar, Mutex};

struct PoolInner<T> {
    items: Mutex<VecDeque<T>>,
    available: Condvar,
    capacity: usize,
}

pub struct Pool<T> {
    inner: Arc<PoolInner<T>>,
}

impl<T> Clone for Pool<T> {
    fn clone(&self) -> Self {
        Pool {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Pool<T> {
    /// Build a pool over a fixed set of connections.
    pub fn new(items: Vec<T>) -> Self {
        let capacity = items.len();
        Pool {
            inner: Arc::new(PoolInner {
                items: Mutex::new(items.into()),
                available: Condvar::new(),
                capacity,
            }),
        }
    }

    /// Take a connection, blocking until one is returned.
    pub fn acquire(&self) -> PooledConn<T> {
        let mut items = self.inner.items.lock().unwrap();
        loop {
            if let Some(item) = items.pop_front() {
                return PooledConn {
                    item: Some(item),
                    pool: Arc::clone(&self.inner),
                };
            }
            items = self.inner.available.wait(items).unwrap();
        }
    }

    /// Take a connection if one is free right now.
    pub fn try_acquire(&self) -> Option<PooledConn<T>> {
        let mut items = self.inner.items.lock().unwrap();
        items.pop_front().map(|item| PooledConn {
            item: Some(item),
            pool: Arc::clone(&self.inner),
        })
    }

    /// Connections currently sitting idle in the pool.
    pub fn available(&self) -> usize {
        self.inner.items.lock().unwrap().len()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }
}

/// RAII guard over a pooled connection; returns it on drop.
pub struct PooledConn<T> {
    item: Option<T>,
    pool: Arc<PoolInner<T>>,
}

impl<T> Deref for PooledConn<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.item.as_ref().unwrap()
    }
}

impl<T> DerefMut for PooledConn<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.item.as_mut().unwrap()
    }
}

impl<T> Drop for PooledConn<T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.items.lock().unwrap().push_back(item);
            self.pool.available.notify_one();
        }
    }
}
