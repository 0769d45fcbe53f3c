// Copyright 2021 Dmitry Tantsur <dtantsur@protonmail.com>
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Cache of expiring credentials.

use std::collections::HashMap;
use std::fmt;
use std::future::{Future, Ready};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use lazy_static::lazy_static;
use log::{debug, trace};
use static_assertions::assert_impl_all;
use tokio::sync::{RwLock, RwLockWriteGuard};

use crate::identity::AuthToken;
use crate::{Error, ErrorKind};

/// A value that can expire.
pub trait Validity {
    /// Whether the value can still be used.
    fn is_valid(&self) -> bool;
}

#[derive(Debug)]
struct Slot<V> {
    value: Option<V>,
    // Set when the slot is removed from the map. Anyone still holding it must look up again.
    retired: bool,
}

type SlotRef<V> = Arc<RwLock<Slot<V>>>;

type NoRefresh<V> = fn() -> Ready<Result<Option<V>, Error>>;

/// Concurrent cache of tokens and other expiring values.
///
/// Every key has its own lock, so refreshing a value for one key never blocks requests for
/// other keys. Concurrent requests for the same key wait for the refresh in progress and
/// reuse its result if it is valid.
///
/// A process-wide instance for authentication tokens is available via
/// [instance](#method.instance), but independent caches can be created with
/// [new](#method.new).
pub struct TokenCache<V> {
    slots: RwLock<HashMap<String, SlotRef<V>>>,
    // Slots holding a value, valid or not.
    populated: AtomicUsize,
}

assert_impl_all!(TokenCache<AuthToken>: Send, Sync);

lazy_static! {
    static ref DEFAULT_TOKEN_CACHE: Arc<TokenCache<AuthToken>> = Arc::new(TokenCache::new());
}

impl<V> fmt::Debug for TokenCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TokenCache")
            .field("keys", &self.populated.load(Ordering::Relaxed))
            .finish()
    }
}

impl<V> Default for TokenCache<V> {
    fn default() -> Self {
        TokenCache::new()
    }
}

impl TokenCache<AuthToken> {
    /// The process-wide cache of authentication tokens.
    ///
    /// Created on the first access and never destroyed.
    #[inline]
    pub fn instance() -> Arc<TokenCache<AuthToken>> {
        Arc::clone(&DEFAULT_TOKEN_CACHE)
    }
}

impl<V> TokenCache<V> {
    /// Create a new empty cache.
    #[inline]
    pub fn new() -> TokenCache<V> {
        TokenCache {
            slots: RwLock::new(HashMap::new()),
            populated: AtomicUsize::new(0),
        }
    }

    /// Number of keys with a value in the cache, expired values included.
    ///
    /// Keys with the first refresh in progress are not counted.
    pub async fn len(&self) -> usize {
        self.populated.load(Ordering::SeqCst)
    }

    /// Whether the cache has no values.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Remove all values.
    pub async fn clear(&self) {
        let drained: Vec<_> = self.slots.write().await.drain().collect();
        debug!("Clearing {} cached value(s)", drained.len());
        for (_, slot) in drained {
            let mut guard = slot.write().await;
            guard.retired = true;
            self.store(&mut guard, None);
        }
    }

    fn store(&self, slot: &mut Slot<V>, value: Option<V>) {
        match (slot.value.is_some(), value.is_some()) {
            (false, true) => {
                let _ = self.populated.fetch_add(1, Ordering::SeqCst);
            }
            (true, false) => {
                let _ = self.populated.fetch_sub(1, Ordering::SeqCst);
            }
            _ => {}
        }
        slot.value = value;
    }

    async fn find_slot(&self, key: &str, create: bool) -> Option<SlotRef<V>> {
        if let Some(slot) = self.slots.read().await.get(key) {
            return Some(Arc::clone(slot));
        }

        if !create {
            return None;
        }

        let mut slots = self.slots.write().await;
        let slot = slots.entry(key.to_string()).or_insert_with(|| {
            Arc::new(RwLock::new(Slot {
                value: None,
                retired: false,
            }))
        });
        Some(Arc::clone(slot))
    }

    // Must be called with the slot's write lock held; the map lock is always taken after it.
    async fn retire(&self, key: &str, slot: &SlotRef<V>, guard: &mut RwLockWriteGuard<'_, Slot<V>>) {
        guard.retired = true;
        self.store(guard, None);
        let mut slots = self.slots.write().await;
        if slots.get(key).map_or(false, |s| Arc::ptr_eq(s, slot)) {
            let _ = slots.remove(key);
        }
    }
}

// Removes a slot left empty when `get` is dropped in the middle of the first refresh.
struct PendingSlot<'c, V> {
    cache: &'c TokenCache<V>,
    key: &'c str,
    slot: &'c SlotRef<V>,
}

impl<V> Drop for PendingSlot<'_, V> {
    fn drop(&mut self) {
        // A locked slot has a waiter that will refresh it.
        let mut guard = match self.slot.try_write() {
            Ok(guard) => guard,
            Err(_) => return,
        };
        if guard.retired || guard.value.is_some() {
            return;
        }

        if let Ok(mut slots) = self.cache.slots.try_write() {
            if slots
                .get(self.key)
                .map_or(false, |s| Arc::ptr_eq(s, self.slot))
            {
                trace!("Removing the empty slot for {} after an interrupted refresh", self.key);
                let _ = slots.remove(self.key);
                guard.retired = true;
            }
        }
    }
}

impl<V> TokenCache<V>
where
    V: Validity + Clone,
{
    /// Get a value from the cache, refreshing it if needed.
    ///
    /// A valid cached value is returned as it is unless `force_refresh` is `true`. Otherwise
    /// `refresh` is called to produce a new value, which replaces the cached one. If `refresh` is
    /// not provided or returns `None`, the key is removed from the cache and `None` is returned.
    ///
    /// If several tasks request the same key concurrently, only one of them calls its `refresh`
    /// (unless refreshing is forced), the rest receive the new value.
    ///
    /// Errors from `refresh` are returned as they are, and the cached value is not modified.
    /// An empty `key` results in an `InvalidInput` error.
    pub async fn get<F, Fut, E>(
        &self,
        key: &str,
        refresh: Option<F>,
        force_refresh: bool,
    ) -> Result<Option<V>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<V>, E>>,
        E: From<Error>,
    {
        if key.is_empty() {
            return Err(Error::new(ErrorKind::InvalidInput, "Cache key must not be empty").into());
        }

        loop {
            let slot = match self.find_slot(key, refresh.is_some()).await {
                Some(slot) => slot,
                None => {
                    trace!("No cached value for {} and no way to refresh it", key);
                    return Ok(None);
                }
            };

            // This branch is hit most of the time, so it's important to start with a read lock.
            if !force_refresh {
                let guard = slot.read().await;
                if guard.retired {
                    continue;
                }
                if let Some(value) = guard.value.as_ref().filter(|v| v.is_valid()) {
                    return Ok(Some(value.clone()));
                }
            }

            // Declared before the lock guard, so that it runs after the lock is released.
            let _pending = PendingSlot {
                cache: self,
                key,
                slot: &slot,
            };
            let mut guard = slot.write().await;
            if guard.retired {
                continue;
            }

            // Additional check in case another task has updated the value while we were waiting
            // for the write lock.
            if !force_refresh {
                if let Some(value) = guard.value.as_ref().filter(|v| v.is_valid()) {
                    trace!("Value for {} has been refreshed concurrently", key);
                    return Ok(Some(value.clone()));
                }
            }

            let refresh = match refresh {
                Some(refresh) => refresh,
                None => {
                    debug!("Removing cached value for {}", key);
                    self.retire(key, &slot, &mut guard).await;
                    return Ok(None);
                }
            };

            debug!(
                "Refreshing cached value for {} (forced: {})",
                key, force_refresh
            );
            let fresh = match refresh().await {
                Ok(fresh) => fresh,
                Err(err) => {
                    if guard.value.is_none() {
                        self.retire(key, &slot, &mut guard).await;
                    }
                    return Err(err);
                }
            };

            return Ok(match fresh {
                Some(value) => {
                    self.store(&mut guard, Some(value.clone()));
                    Some(value)
                }
                None => {
                    debug!("No replacement for {}, removing it", key);
                    self.retire(key, &slot, &mut guard).await;
                    None
                }
            });
        }
    }

    /// Get a valid value without refreshing it.
    ///
    /// An expired value is removed from the cache.
    #[inline]
    pub async fn lookup(&self, key: &str) -> Result<Option<V>, Error> {
        self.get::<NoRefresh<V>, _, _>(key, None, false).await
    }

    /// Get a valid value, refreshing it if it is expired or missing.
    #[inline]
    pub async fn get_or_refresh<F, Fut, E>(&self, key: &str, refresh: F) -> Result<Option<V>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<V>, E>>,
        E: From<Error>,
    {
        self.get(key, Some(refresh), false).await
    }

    /// Unconditionally refresh a value.
    #[inline]
    pub async fn force_refresh<F, Fut, E>(&self, key: &str, refresh: F) -> Result<Option<V>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<V>, E>>,
        E: From<Error>,
    {
        self.get(key, Some(refresh), true).await
    }

    /// Remove a value from the cache.
    #[inline]
    pub async fn evict(&self, key: &str) -> Result<(), Error> {
        let _ = self.get::<NoRefresh<V>, _, _>(key, None, true).await?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use tokio::sync::oneshot;

    use super::{TokenCache, Validity};
    use crate::{Error, ErrorKind};

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct FakeToken {
        id: usize,
        valid: bool,
    }

    impl Validity for FakeToken {
        fn is_valid(&self) -> bool {
            self.valid
        }
    }

    fn token(id: usize, valid: bool) -> FakeToken {
        FakeToken { id, valid }
    }

    async fn counting(
        counter: &AtomicUsize,
        valid: bool,
    ) -> Result<Option<FakeToken>, Error> {
        let id = counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Some(token(id, valid)))
    }

    #[tokio::test]
    async fn test_valid_value_is_reused() {
        let cache = TokenCache::new();
        let counter = AtomicUsize::new(0);
        let first = cache
            .get_or_refresh("key", || counting(&counter, true))
            .await
            .unwrap();
        let second = cache
            .get_or_refresh("key", || counting(&counter, true))
            .await
            .unwrap();
        assert_eq!(first, Some(token(1, true)));
        assert_eq!(second, first);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalid_value_is_refreshed() {
        let cache = TokenCache::new();
        let counter = AtomicUsize::new(0);
        let _ = cache
            .get_or_refresh("key", || counting(&counter, false))
            .await
            .unwrap();
        let second = cache
            .get_or_refresh("key", || counting(&counter, true))
            .await
            .unwrap();
        assert_eq!(second, Some(token(2, true)));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_force_refresh() {
        let cache = TokenCache::new();
        let counter = AtomicUsize::new(0);
        let _ = cache
            .get_or_refresh("key", || counting(&counter, true))
            .await
            .unwrap();
        let forced = cache
            .force_refresh("key", || counting(&counter, true))
            .await
            .unwrap();
        assert_eq!(forced, Some(token(2, true)));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(cache.lookup("key").await.unwrap(), Some(token(2, true)));
    }

    #[tokio::test]
    async fn test_force_without_refresh_evicts() {
        let cache = TokenCache::new();
        let counter = AtomicUsize::new(0);
        let _ = cache
            .get_or_refresh("key", || counting(&counter, true))
            .await
            .unwrap();
        cache.evict("key").await.unwrap();
        assert!(cache.is_empty().await);
        assert_eq!(cache.lookup("key").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expired_without_refresh_is_removed() {
        let cache = TokenCache::new();
        let counter = AtomicUsize::new(0);
        let _ = cache
            .get_or_refresh("key", || counting(&counter, false))
            .await
            .unwrap();
        assert_eq!(cache.len().await, 1);

        assert_eq!(cache.lookup("key").await.unwrap(), None);
        assert!(cache.is_empty().await);

        let value = cache
            .get_or_refresh("key", || counting(&counter, true))
            .await
            .unwrap();
        assert_eq!(value, Some(token(2, true)));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_absent_without_refresh() {
        let cache = TokenCache::<FakeToken>::new();
        assert_eq!(cache.lookup("key").await.unwrap(), None);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_refresh_returns_nothing() {
        let cache = TokenCache::new();
        let counter = AtomicUsize::new(0);
        let _ = cache
            .get_or_refresh("key", || counting(&counter, false))
            .await
            .unwrap();
        let value = cache
            .get_or_refresh("key", || async { Ok::<_, Error>(None) })
            .await
            .unwrap();
        assert_eq!(value, None);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_value() {
        let cache = TokenCache::new();
        let counter = AtomicUsize::new(0);
        let _ = cache
            .get_or_refresh("key", || counting(&counter, true))
            .await
            .unwrap();
        let err = cache
            .force_refresh("key", || async {
                Err::<Option<FakeToken>, _>(Error::new(ErrorKind::AuthenticationFailed, "nope"))
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthenticationFailed);
        assert_eq!(cache.lookup("key").await.unwrap(), Some(token(1, true)));
    }

    #[tokio::test]
    async fn test_failed_refresh_leaves_nothing() {
        let cache = TokenCache::<FakeToken>::new();
        let err = cache
            .get_or_refresh("key", || async {
                Err::<Option<FakeToken>, _>(Error::new(ErrorKind::ProtocolError, "nope"))
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolError);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_empty_key() {
        let cache = TokenCache::new();
        let counter = AtomicUsize::new(0);
        let err = cache
            .get_or_refresh("", || counting(&counter, true))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_clear() {
        let cache = TokenCache::new();
        let counter = AtomicUsize::new(0);
        for key in &["a", "b", "c"] {
            let _ = cache
                .get_or_refresh(key, || counting(&counter, true))
                .await
                .unwrap();
        }
        assert_eq!(cache.len().await, 3);
        cache.clear().await;
        assert!(cache.is_empty().await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_same_key_refreshed_once() {
        let cache = Arc::new(TokenCache::new());
        let counter = Arc::new(AtomicUsize::new(0));
        let mut tasks = Vec::new();
        for _ in 0..16 {
            let cache = Arc::clone(&cache);
            let counter = Arc::clone(&counter);
            tasks.push(tokio::spawn(async move {
                cache
                    .get_or_refresh("key", || async move {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        counting(&counter, true).await
                    })
                    .await
                    .unwrap()
            }));
        }

        for task in tasks {
            assert_eq!(task.await.unwrap(), Some(token(1, true)));
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_distinct_keys_do_not_block() {
        const KEYS: usize = 8;
        const DELAY: Duration = Duration::from_millis(200);

        let cache = Arc::new(TokenCache::new());
        let counter = Arc::new(AtomicUsize::new(0));
        let started = Instant::now();
        let mut tasks = Vec::new();
        for idx in 0..KEYS {
            let cache = Arc::clone(&cache);
            let counter = Arc::clone(&counter);
            tasks.push(tokio::spawn(async move {
                cache
                    .get_or_refresh(&format!("key-{}", idx), || async move {
                        tokio::time::sleep(DELAY).await;
                        counting(&counter, true).await
                    })
                    .await
                    .unwrap()
            }));
        }

        for task in tasks {
            assert!(task.await.unwrap().is_some());
        }
        assert!(started.elapsed() < DELAY * (KEYS as u32) / 2);
        assert_eq!(counter.load(Ordering::SeqCst), KEYS);
        assert_eq!(cache.len().await, KEYS);
    }

    #[tokio::test]
    async fn test_interrupted_refresh_leaves_nothing() {
        let cache = TokenCache::<FakeToken>::new();
        let result = tokio::time::timeout(
            Duration::from_millis(20),
            cache.get_or_refresh("key", || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, Error>(Some(token(1, true)))
            }),
        )
        .await;
        assert!(result.is_err());
        assert!(cache.is_empty().await);
        assert!(cache.slots.read().await.is_empty());

        let counter = AtomicUsize::new(0);
        let value = cache
            .get_or_refresh("key", || counting(&counter, true))
            .await
            .unwrap();
        assert_eq!(value, Some(token(1, true)));
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_expired_lookup_waits_for_refresh() {
        let cache = Arc::new(TokenCache::new());
        let counter = Arc::new(AtomicUsize::new(0));
        let _ = cache
            .get_or_refresh("key", || counting(&counter, false))
            .await
            .unwrap();

        let (started_tx, started_rx) = oneshot::channel();
        let refreshing = {
            let cache = Arc::clone(&cache);
            let counter = Arc::clone(&counter);
            tokio::spawn(async move {
                cache
                    .get_or_refresh("key", || async move {
                        let _ = started_tx.send(());
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        counting(&counter, true).await
                    })
                    .await
                    .unwrap()
            })
        };

        started_rx.await.unwrap();
        // Must not remove the value being installed concurrently.
        assert_eq!(cache.lookup("key").await.unwrap(), Some(token(2, true)));
        assert_eq!(refreshing.await.unwrap(), Some(token(2, true)));
        assert_eq!(cache.lookup("key").await.unwrap(), Some(token(2, true)));
        assert_eq!(cache.len().await, 1);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_waiter_refreshes_after_failure() {
        let cache = Arc::new(TokenCache::new());
        let counter = AtomicUsize::new(0);

        let (started_tx, started_rx) = oneshot::channel();
        let failing = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                cache
                    .get_or_refresh("key", || async move {
                        let _ = started_tx.send(());
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Err::<Option<FakeToken>, _>(Error::new(ErrorKind::ProtocolError, "nope"))
                    })
                    .await
            })
        };

        started_rx.await.unwrap();
        let value = cache
            .get_or_refresh("key", || counting(&counter, true))
            .await
            .unwrap();
        assert_eq!(value, Some(token(1, true)));
        assert_eq!(
            failing.await.unwrap().unwrap_err().kind(),
            ErrorKind::ProtocolError
        );
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(cache.lookup("key").await.unwrap(), Some(token(1, true)));
    }

    #[test]
    fn test_instance_is_shared() {
        let first = TokenCache::instance();
        let second = TokenCache::instance();
        assert!(Arc::ptr_eq(&first, &second));
    }
}
