//! Observe when, how often, and in which order values drop.
//!
//! Data structures that manage lifetimes by hand need tests which can assert three things:
//!
//! - How many drops happened in total.
//! - Whether a specific value has dropped yet.
//! - The *order* in which a group of values dropped.
//!
//! Create a [DropCensus], then wrap each interesting value with [DropCensus::track], giving it a
//! numeric id.  Store the returned [Tracked] values inside the structure under test.  Every drop is
//! recorded in the census together with its id, so tests can assert counts and exact drop order.
//! Dropping the same [Tracked] twice (for example because a container double-freed its backing
//! memory) aborts the test with a panic.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct CensusInner {
    /// Ids in the order their values dropped.
    order: Mutex<Vec<u64>>,
    drop_count: AtomicU64,
}

/// A registry of tracked values.
///
/// Cheap to clone; clones share the same records.
#[derive(Clone, Debug, Default)]
pub struct DropCensus {
    inner: Arc<CensusInner>,
}

/// A value whose drop is recorded in a [DropCensus].
#[derive(Debug)]
pub struct Tracked<T> {
    value: T,
    id: u64,
    /// Kept inline rather than behind the arc so that a double drop is caught even when the arc's
    /// memory has already been reused.
    previously_dropped: bool,
    census: Arc<CensusInner>,
}

impl DropCensus {
    pub fn new() -> DropCensus {
        Default::default()
    }

    /// Wrap a value so that its drop is recorded under `id`.
    ///
    /// Ids need not be unique; reusing an id makes the order log record each drop separately.
    pub fn track<T>(&self, id: u64, value: T) -> Tracked<T> {
        Tracked {
            value,
            id,
            previously_dropped: false,
            census: self.inner.clone(),
        }
    }

    /// How many tracked values have dropped so far.
    ///
    /// If drops are happening on other threads concurrently with this call, the count may lag.
    pub fn drop_count(&self) -> u64 {
        self.inner.drop_count.load(Ordering::Relaxed)
    }

    /// The ids of every dropped value, in drop order.
    pub fn drop_order(&self) -> Vec<u64> {
        self.inner.order.lock().unwrap().clone()
    }

    pub fn is_dropped(&self, id: u64) -> bool {
        self.inner.order.lock().unwrap().contains(&id)
    }

    #[track_caller]
    pub fn assert_count(&self, expected: u64) {
        let got = self.drop_count();
        assert_eq!(got, expected, "expected {} drops but observed {}", expected, got);
    }

    #[track_caller]
    pub fn assert_order(&self, expected: &[u64]) {
        let got = self.drop_order();
        assert_eq!(got, expected, "drop order mismatch");
    }

    #[track_caller]
    pub fn assert_alive(&self, id: u64) {
        assert!(!self.is_dropped(id), "value {} has already dropped", id);
    }

    #[track_caller]
    pub fn assert_dropped(&self, id: u64) {
        assert!(self.is_dropped(id), "value {} has not dropped yet", id);
    }
}

impl<T> Tracked<T> {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl<T> std::ops::Deref for Tracked<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.value
    }
}

impl<T> std::ops::DerefMut for Tracked<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.value
    }
}

impl<T> Drop for Tracked<T> {
    fn drop(&mut self) {
        assert!(
            !self.previously_dropped,
            "the same tracked value (id {}) dropped twice",
            self.id
        );
        self.previously_dropped = true;
        self.census.order.lock().unwrap().push(self.id);
        self.census.drop_count.fetch_add(1, Ordering::Relaxed);
    }
}
