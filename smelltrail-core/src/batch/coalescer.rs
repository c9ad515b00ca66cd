use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;
use tracing::{debug, error, warn};

use crate::error::LoadError;

use super::BatchScope;

/// A bulk-fetch function plus the key identity it is coalesced by.
#[async_trait::async_trait]
pub trait BatchLoad: Send + Sync + 'static {
    type Key: Clone + Send + Sync + 'static;
    type Value: Clone + Send + Sync + 'static;

    /// Access-pattern name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Two keys with the same cache key are the same request.
    fn cache_key(&self, key: &Self::Key) -> String;

    /// Abort in-flight dispatches when the owning operation is cancelled.
    fn abort_on_cancel(&self) -> bool {
        false
    }

    /// Fetch every key at once.
    ///
    /// Must return exactly one entry per key, in key order. An `Err` entry
    /// fails only its own key; an outer `Err` fails the whole batch.
    async fn load(
        &self,
        keys: &[Self::Key],
    ) -> crate::error::Result<Vec<Result<Self::Value, LoadError>>>;
}

/// Where an instance is in its batching cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Collecting,
    Dispatching,
}

type Outcome<V> = Option<Result<V, LoadError>>;
type Slot<V> = Arc<watch::Sender<Outcome<V>>>;

struct Pending<L: BatchLoad> {
    cache_key: String,
    key: L::Key,
    slot: Slot<L::Value>,
}

struct State<L: BatchLoad> {
    phase: Phase,
    cache: HashMap<String, Slot<L::Value>>,
    pending: Vec<Pending<L>>,
    in_flight: Vec<Slot<L::Value>>,
}

struct Inner<L: BatchLoad> {
    loader: L,
    scope: BatchScope,
    state: Mutex<State<L>>,
}

/// Deduplicating, batching, memoizing front for one access pattern.
///
/// Loads issued within one collection window are sent to the loader as a
/// single ordered batch. Every key's outcome (value or per-key error) is
/// cached for the life of the coalescer, which is one logical operation.
/// Batches of one coalescer never overlap.
pub struct RequestCoalescer<L: BatchLoad> {
    inner: Arc<Inner<L>>,
}

impl<L: BatchLoad> Clone for RequestCoalescer<L> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<L: BatchLoad> fmt::Debug for RequestCoalescer<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestCoalescer")
            .field("loader", &self.inner.loader.name())
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

impl<L: BatchLoad> RequestCoalescer<L> {
    pub fn new(loader: L, scope: BatchScope) -> Self {
        Self {
            inner: Arc::new(Inner {
                loader,
                scope,
                state: Mutex::new(State {
                    phase: Phase::Idle,
                    cache: HashMap::new(),
                    pending: Vec::new(),
                    in_flight: Vec::new(),
                }),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.inner.loader.name()
    }

    pub fn phase(&self) -> Phase {
        self.inner.lock().phase
    }

    pub async fn load(&self, key: L::Key) -> Result<L::Value, LoadError> {
        let rx = self.enqueue(key);
        wait(rx, self.name()).await
    }

    /// Load several keys in one window; results line up with `keys`.
    pub async fn load_many(&self, keys: Vec<L::Key>) -> Vec<Result<L::Value, LoadError>> {
        let receivers: Vec<_> = keys.into_iter().map(|k| self.enqueue(k)).collect();
        let mut results = Vec::with_capacity(receivers.len());
        for rx in receivers {
            results.push(wait(rx, self.name()).await);
        }
        results
    }

    /// Seed the cache with a value learned elsewhere.
    ///
    /// Returns `false` and leaves the entry alone if the key is already cached
    /// or pending.
    pub fn prime(&self, key: &L::Key, value: L::Value) -> bool {
        let cache_key = self.inner.loader.cache_key(key);
        let mut state = self.inner.lock();
        if state.cache.contains_key(&cache_key) {
            return false;
        }
        let (tx, _) = watch::channel(Some(Ok(value)));
        state.cache.insert(cache_key, Arc::new(tx));
        true
    }

    pub fn is_cached(&self, key: &L::Key) -> bool {
        let cache_key = self.inner.loader.cache_key(key);
        self.inner.lock().cache.contains_key(&cache_key)
    }

    /// Forget one key; the next load goes to the loader.
    ///
    /// A key still waiting for dispatch keeps its slot: it has not been
    /// fetched yet, and dropping the slot would queue it twice.
    pub fn clear(&self, key: &L::Key) {
        let cache_key = self.inner.loader.cache_key(key);
        let mut state = self.inner.lock();
        if !state.pending.iter().any(|p| p.cache_key == cache_key) {
            state.cache.remove(&cache_key);
        }
    }

    pub fn clear_all(&self) {
        let mut state = self.inner.lock();
        let State { cache, pending, .. } = &mut *state;
        let waiting: HashSet<&str> = pending.iter().map(|p| p.cache_key.as_str()).collect();
        cache.retain(|k, _| waiting.contains(k.as_str()));
    }

    fn enqueue(&self, key: L::Key) -> watch::Receiver<Outcome<L::Value>> {
        let cache_key = self.inner.loader.cache_key(&key);
        let mut state = self.inner.lock();
        if let Some(slot) = state.cache.get(&cache_key) {
            return slot.subscribe();
        }

        let (tx, rx) = watch::channel(None);
        let slot = Arc::new(tx);
        state.cache.insert(cache_key.clone(), Arc::clone(&slot));
        state.pending.push(Pending {
            cache_key,
            key,
            slot,
        });

        if state.phase == Phase::Idle {
            state.phase = Phase::Collecting;
            drop(state);
            self.schedule();
        }
        rx
    }

    fn schedule(&self) {
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(inner.run());
        if self.inner.loader.abort_on_cancel() {
            self.inner.scope.track(handle.abort_handle());
        }
    }
}

async fn wait<V: Clone>(
    mut rx: watch::Receiver<Outcome<V>>,
    loader: &'static str,
) -> Result<V, LoadError> {
    let outcome = match rx.wait_for(Option::is_some).await {
        Ok(current) => (*current).clone(),
        Err(_) => None,
    };
    outcome.unwrap_or(Err(LoadError::Cancelled(loader)))
}

impl<L: BatchLoad> Inner<L> {
    fn lock(&self) -> MutexGuard<'_, State<L>> {
        self.state.lock().expect("coalescer state mutex poisoned")
    }

    async fn run(self: Arc<Self>) {
        let mut guard = CancelGuard {
            inner: &self,
            armed: true,
        };

        loop {
            self.scope.collect_window().await;

            let batch = {
                let mut state = self.lock();
                if state.pending.is_empty() {
                    state.phase = Phase::Idle;
                    guard.armed = false;
                    return;
                }
                let take = state.pending.len().min(self.scope.max_batch_size());
                let batch: Vec<Pending<L>> = state.pending.drain(..take).collect();
                state.in_flight = batch.iter().map(|p| Arc::clone(&p.slot)).collect();
                state.phase = Phase::Dispatching;
                batch
            };

            self.dispatch(batch).await;

            let mut state = self.lock();
            state.in_flight.clear();
            if state.pending.is_empty() {
                state.phase = Phase::Idle;
                guard.armed = false;
                return;
            }
            state.phase = Phase::Collecting;
        }
    }

    async fn dispatch(&self, batch: Vec<Pending<L>>) {
        let name = self.loader.name();
        let keys: Vec<L::Key> = batch.iter().map(|p| p.key.clone()).collect();
        let expected = keys.len();

        let (results, batch_failed) = match self.scope.acquire().await {
            None => (vec![Err(LoadError::Cancelled(name)); expected], true),
            Some(_permit) => {
                debug!(loader = name, keys = expected, "dispatching batch");
                match self.loader.load(&keys).await {
                    Ok(values) if values.len() == expected => (values, false),
                    Ok(values) => {
                        let err = LoadError::BatchShape {
                            loader: name,
                            expected,
                            actual: values.len(),
                        };
                        error!(loader = name, expected, actual = values.len(), "bulk fetch returned wrong result count");
                        (vec![Err(err); expected], true)
                    }
                    Err(e) => {
                        let err = LoadError::from_batch(name, e);
                        warn!(loader = name, keys = expected, error = %err, "batch failed");
                        (vec![Err(err); expected], true)
                    }
                }
            }
        };

        for (pending, result) in batch.iter().zip(results) {
            pending.slot.send_replace(Some(result));
        }

        // A failed batch says nothing about its keys; let a retry refetch them.
        if batch_failed {
            let mut state = self.lock();
            for pending in &batch {
                if state
                    .cache
                    .get(&pending.cache_key)
                    .is_some_and(|slot| Arc::ptr_eq(slot, &pending.slot))
                {
                    state.cache.remove(&pending.cache_key);
                }
            }
        }
    }
}

/// Settles every waiter of a dispatch task that is dropped mid-flight.
struct CancelGuard<'a, L: BatchLoad> {
    inner: &'a Inner<L>,
    armed: bool,
}

impl<L: BatchLoad> Drop for CancelGuard<'_, L> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(mut state) = self.inner.state.lock() else {
            return;
        };
        let name = self.inner.loader.name();
        let pending = std::mem::take(&mut state.pending);
        let in_flight = std::mem::take(&mut state.in_flight);
        let unsettled = pending
            .iter()
            .map(|p| &p.slot)
            .chain(in_flight.iter())
            .filter(|slot| slot.borrow().is_none());
        for slot in unsettled {
            slot.send_replace(Some(Err(LoadError::Cancelled(name))));
        }
        state
            .cache
            .retain(|_, slot| !matches!(&*slot.borrow(), Some(Err(LoadError::Cancelled(_)))));
        state.phase = Phase::Idle;
        debug!(loader = name, "dispatch task dropped before completion");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::config::BatchSection;
    use crate::error::{NotFound, StoreError, TrailError};

    /// Multiplies keys by ten; 13 is missing.
    #[derive(Default)]
    struct TimesTen {
        calls: Arc<Mutex<Vec<Vec<u32>>>>,
        in_flight: Arc<AtomicUsize>,
        max_in_flight: Arc<AtomicUsize>,
        fail: bool,
        short: bool,
        hang: bool,
    }

    #[async_trait::async_trait]
    impl BatchLoad for TimesTen {
        type Key = u32;
        type Value = u32;

        fn name(&self) -> &'static str {
            "times_ten"
        }

        fn cache_key(&self, key: &u32) -> String {
            key.to_string()
        }

        fn abort_on_cancel(&self) -> bool {
            self.hang
        }

        async fn load(&self, keys: &[u32]) -> crate::error::Result<Vec<Result<u32, LoadError>>> {
            self.calls.lock().unwrap().push(keys.to_vec());
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            if self.hang {
                std::future::pending::<()>().await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.fail {
                return Err(TrailError::Store(StoreError::Migration("store offline".into())));
            }
            let mut out: Vec<_> = keys
                .iter()
                .map(|&k| {
                    if k == 13 {
                        Err(NotFound::Occurrence(k.to_string()).into())
                    } else {
                        Ok(k * 10)
                    }
                })
                .collect();
            if self.short {
                out.pop();
            }
            Ok(out)
        }
    }

    fn scope() -> BatchScope {
        BatchScope::new(&BatchSection::default())
    }

    fn coalescer(loader: TimesTen) -> (RequestCoalescer<TimesTen>, Arc<Mutex<Vec<Vec<u32>>>>) {
        let calls = Arc::clone(&loader.calls);
        (RequestCoalescer::new(loader, scope()), calls)
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_keys_are_fetched_once() {
        let (c, calls) = coalescer(TimesTen::default());
        let (a, b, a2, d) = tokio::join!(c.load(1), c.load(2), c.load(1), c.load(2));
        assert_eq!((a, b, a2, d), (Ok(10), Ok(20), Ok(10), Ok(20)));
        assert_eq!(*calls.lock().unwrap(), vec![vec![1, 2]]);
    }

    #[tokio::test(start_paused = true)]
    async fn results_follow_key_order() {
        let (c, calls) = coalescer(TimesTen::default());
        let results = c.load_many(vec![3, 1, 2]).await;
        assert_eq!(results, vec![Ok(30), Ok(10), Ok(20)]);
        assert_eq!(*calls.lock().unwrap(), vec![vec![3, 1, 2]]);

        let (c, calls) = coalescer(TimesTen::default());
        let results = c.load_many(vec![2, 3, 1]).await;
        assert_eq!(results, vec![Ok(20), Ok(30), Ok(10)]);
        assert_eq!(*calls.lock().unwrap(), vec![vec![2, 3, 1]]);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_key_does_not_fail_siblings() {
        let (c, _) = coalescer(TimesTen::default());
        let results = c.load_many(vec![12, 13, 14]).await;
        assert_eq!(results[0], Ok(120));
        assert_eq!(
            results[1],
            Err(LoadError::NotFound(NotFound::Occurrence("13".into())))
        );
        assert_eq!(results[2], Ok(140));
    }

    #[tokio::test(start_paused = true)]
    async fn not_found_is_cached_for_the_operation() {
        let (c, calls) = coalescer(TimesTen::default());
        assert!(c.load(13).await.is_err());
        assert!(c.load(13).await.is_err());
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn batch_failure_fails_every_key_and_allows_retry() {
        let (c, calls) = coalescer(TimesTen {
            fail: true,
            ..Default::default()
        });
        let results = c.load_many(vec![1, 2]).await;
        for r in &results {
            assert!(matches!(
                r,
                Err(LoadError::Dispatch {
                    loader: "times_ten",
                    ..
                })
            ));
        }
        assert!(!c.is_cached(&1));
        let _ = c.load(1).await;
        assert_eq!(calls.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn wrong_result_count_is_rejected() {
        let (c, _) = coalescer(TimesTen {
            short: true,
            ..Default::default()
        });
        let results = c.load_many(vec![1, 2, 3]).await;
        assert!(results.iter().all(|r| *r
            == Err(LoadError::BatchShape {
                loader: "times_ten",
                expected: 3,
                actual: 2,
            })));
    }

    #[tokio::test(start_paused = true)]
    async fn priming_never_overwrites() {
        let (c, calls) = coalescer(TimesTen::default());
        assert!(c.prime(&1, 100));
        assert!(!c.prime(&1, 200));
        assert_eq!(c.load(1).await, Ok(100));
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn priming_does_not_clobber_pending_load() {
        let (c, _) = coalescer(TimesTen::default());
        let c2 = c.clone();
        let pending = tokio::spawn(async move { c2.load(4).await });
        tokio::task::yield_now().await;
        assert!(!c.prime(&4, 999));
        assert_eq!(pending.await.unwrap(), Ok(40));
        assert_eq!(c.load(4).await, Ok(40));
    }

    #[tokio::test(start_paused = true)]
    async fn clear_forces_refetch() {
        let (c, calls) = coalescer(TimesTen::default());
        assert_eq!(c.load(5).await, Ok(50));
        c.clear(&5);
        assert_eq!(c.load(5).await, Ok(50));
        c.clear_all();
        assert_eq!(c.load(5).await, Ok(50));
        assert_eq!(calls.lock().unwrap().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn clearing_a_pending_key_does_not_queue_it_twice() {
        let (c, calls) = coalescer(TimesTen::default());
        let c2 = c.clone();
        let first = tokio::spawn(async move { c2.load_many(vec![6, 7]).await });
        tokio::task::yield_now().await;
        assert_eq!(c.phase(), Phase::Collecting);

        c.clear(&6);
        c.clear_all();
        let (six, seven) = tokio::join!(c.load(6), c.load(7));
        assert_eq!((six, seven), (Ok(60), Ok(70)));
        assert_eq!(first.await.unwrap(), vec![Ok(60), Ok(70)]);
        assert_eq!(*calls.lock().unwrap(), vec![vec![6, 7]]);
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_windows_split_into_sequential_batches() {
        let loader = TimesTen::default();
        let max_in_flight = Arc::clone(&loader.max_in_flight);
        let calls = Arc::clone(&loader.calls);
        let scope = BatchScope::new(&BatchSection {
            max_batch_size: 2,
            ..BatchSection::default()
        });
        let c = RequestCoalescer::new(loader, scope);

        let results = c.load_many(vec![1, 2, 3, 4, 5]).await;
        assert_eq!(results, vec![Ok(10), Ok(20), Ok(30), Ok(40), Ok(50)]);
        assert_eq!(*calls.lock().unwrap(), vec![vec![1, 2], vec![3, 4], vec![5]]);
        assert_eq!(max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(c.phase(), Phase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn loads_during_dispatch_wait_for_next_batch() {
        let (c, calls) = coalescer(TimesTen::default());
        let c2 = c.clone();
        let first = tokio::spawn(async move { c2.load(1).await });

        // Past the collection window, inside the loader's sleep.
        tokio::time::sleep(Duration::from_millis(12)).await;
        assert_eq!(c.phase(), Phase::Dispatching);
        assert_eq!(c.load(2).await, Ok(20));
        assert_eq!(first.await.unwrap(), Ok(10));
        assert_eq!(*calls.lock().unwrap(), vec![vec![1], vec![2]]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelling_scope_settles_waiters() {
        let loader = TimesTen {
            hang: true,
            ..Default::default()
        };
        let scope = scope();
        let c = RequestCoalescer::new(loader, scope.clone());
        let c2 = c.clone();
        let waiter = tokio::spawn(async move { c2.load(1).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(c.phase(), Phase::Dispatching);
        scope.cancel();

        assert_eq!(waiter.await.unwrap(), Err(LoadError::Cancelled("times_ten")));
        assert_eq!(c.phase(), Phase::Idle);
        assert!(!c.is_cached(&1));
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use crate::config::BatchSection;
    use proptest::prelude::*;

    struct Echo {
        calls: Arc<Mutex<Vec<Vec<u16>>>>,
    }

    #[async_trait::async_trait]
    impl BatchLoad for Echo {
        type Key = u16;
        type Value = String;

        fn name(&self) -> &'static str {
            "echo"
        }

        fn cache_key(&self, key: &u16) -> String {
            key.to_string()
        }

        async fn load(&self, keys: &[u16]) -> crate::error::Result<Vec<Result<String, LoadError>>> {
            self.calls.lock().unwrap().push(keys.to_vec());
            Ok(keys.iter().map(|k| Ok(format!("v{k}"))).collect())
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        /// Every caller gets its own key's value and each distinct key is fetched once.
        #[test]
        fn one_fetch_per_distinct_key(keys in proptest::collection::vec(0u16..20, 1..40)) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .start_paused(true)
                .build()
                .unwrap();
            rt.block_on(async {
                let calls = Arc::new(Mutex::new(Vec::new()));
                let scope = BatchScope::new(&BatchSection::default());
                let c = RequestCoalescer::new(Echo { calls: Arc::clone(&calls) }, scope);

                let results = c.load_many(keys.clone()).await;
                for (k, r) in keys.iter().zip(&results) {
                    prop_assert_eq!(r, &Ok(format!("v{k}")));
                }

                let fetched: Vec<u16> = calls.lock().unwrap().concat();
                let mut distinct = keys.clone();
                distinct.sort_unstable();
                distinct.dedup();
                let mut sorted = fetched.clone();
                sorted.sort_unstable();
                prop_assert_eq!(sorted, distinct);
                Ok(())
            })?;
        }
    }
}
