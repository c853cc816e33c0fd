//! Per-device value cache with compute-once semantics
//!
//! Entries live as long as the device stays connected. When the device goes
//! away the cache is closed: closeable entries are closed, entries are
//! dropped, and every later lookup recomputes without storing anything.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::OnceCell;

use adblib_core::prelude::*;

/// Cached value that holds a resource released on device disconnect
pub trait CacheValue: Send + Sync + 'static {
    fn close(&self);
}

/// Typed cache key. Two keys with the same name address the same entry.
pub struct CacheKey<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> CacheKey<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for CacheKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for CacheKey<T> {}

impl<T> fmt::Debug for CacheKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey({})", self.name)
    }
}

type Entry = Arc<OnceCell<Arc<dyn Any + Send + Sync>>>;

#[derive(Default)]
struct CacheState {
    closed: bool,
    entries: HashMap<&'static str, Entry>,
    closeables: Vec<Arc<dyn CacheValue>>,
}

/// Cache attached to one connected device
///
/// Cloning yields a handle to the same storage.
#[derive(Clone)]
pub struct DeviceCache {
    /// `None` for the no-op cache
    state: Option<Arc<Mutex<CacheState>>>,
}

impl fmt::Debug for DeviceCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceCache")
            .field("no_op", &self.state.is_none())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Default for DeviceCache {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceCache {
    pub fn new() -> Self {
        Self {
            state: Some(Arc::new(Mutex::new(CacheState::default()))),
        }
    }

    /// Cache that never stores anything
    pub fn no_op() -> Self {
        Self { state: None }
    }

    /// True for closed caches and the no-op cache
    pub fn is_closed(&self) -> bool {
        match &self.state {
            Some(state) => lock(state).closed,
            None => true,
        }
    }

    fn entry<T>(&self, key: &CacheKey<T>) -> Option<Entry> {
        let mut state = lock(self.state.as_ref()?);
        if state.closed {
            return None;
        }
        Some(Arc::clone(state.entries.entry(key.name).or_default()))
    }

    /// Cached value for `key`, computing it with `factory` on first use
    pub fn get_or_put<T, F>(&self, key: &CacheKey<T>, factory: F) -> T
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> T,
    {
        let Some(entry) = self.entry(key) else {
            return factory();
        };
        if let Some(existing) = downcast::<T>(entry.get()) {
            return existing;
        }
        let value = factory();
        // Another caller may have stored a value meanwhile; the first one wins
        let _ = entry.set(Arc::new(value.clone()));
        downcast::<T>(entry.get()).unwrap_or(value)
    }

    /// Async variant of [`get_or_put`](Self::get_or_put)
    ///
    /// Concurrent first lookups run one factory at a time and the first
    /// successful result is kept. Failures are returned and not remembered.
    pub async fn get_or_put_async<T, F, Fut>(&self, key: &CacheKey<T>, factory: F) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let Some(entry) = self.entry(key) else {
            return factory().await;
        };
        let value = entry
            .get_or_try_init(|| async {
                let value = factory().await?;
                Ok::<_, Error>(Arc::new(value) as Arc<dyn Any + Send + Sync>)
            })
            .await?;
        downcast::<T>(Some(value)).ok_or_else(|| {
            Error::config(format!("Cache key {:?} holds a value of another type", key.name))
        })
    }

    /// Like [`get_or_put`](Self::get_or_put) for values that must be closed
    /// when the device disconnects
    pub fn get_or_put_closeable<V, F>(&self, key: &CacheKey<Arc<V>>, factory: F) -> Arc<V>
    where
        V: CacheValue,
        F: FnOnce() -> V,
    {
        let Some(entry) = self.entry(key) else {
            return Arc::new(factory());
        };
        if let Some(existing) = downcast::<Arc<V>>(entry.get()) {
            return existing;
        }

        let value = Arc::new(factory());
        if entry.set(Arc::new(Arc::clone(&value))).is_err() {
            // Lost the race, the stored value is the one callers share
            return match downcast::<Arc<V>>(entry.get()) {
                Some(winner) => {
                    value.close();
                    winner
                }
                None => value,
            };
        }

        let closed = self.state.as_ref().map(|state| {
            let mut state = lock(state);
            if !state.closed {
                state.closeables.push(Arc::clone(&value) as Arc<dyn CacheValue>);
            }
            state.closed
        });
        if closed == Some(true) {
            value.close();
        }
        value
    }

    /// Drop every entry and close the closeable ones. Idempotent.
    pub fn close(&self) {
        let Some(state) = &self.state else {
            return;
        };
        let closeables = {
            let mut state = lock(state);
            if state.closed {
                return;
            }
            state.closed = true;
            state.entries.clear();
            std::mem::take(&mut state.closeables)
        };
        trace!("Closing device cache with {} closeable values", closeables.len());
        for value in closeables {
            value.close();
        }
    }
}

fn lock(state: &Mutex<CacheState>) -> MutexGuard<'_, CacheState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn downcast<T: Clone + 'static>(value: Option<&Arc<dyn Any + Send + Sync>>) -> Option<T> {
    value.and_then(|v| (**v).downcast_ref::<T>()).cloned()
}
