use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam::utils::Backoff;

use crate::object::Object;
use crate::wait_queue;

/// Tag states in the low two bits of the cell word.  Control blocks are at least 4-aligned, so
/// handle bits and tag bits never collide.
const TAG_MASK: usize = 0b11;
/// No lock, no waiter.
const TAG_FREE: usize = 0b00;
/// The cell's lock is held.
const TAG_LOCKED: usize = 0b01;
/// The lock is held and at least one thread is parked waiting for it.
const TAG_WAITING: usize = 0b10;
/// The lock was released inside a condition wait; parked waiters expect a notify.
const TAG_CONDITION: usize = 0b11;

/// An atomic slot for an [Object] that is simultaneously a mutex and a condition variable.
///
/// The whole state machine lives in one word: the high bits are the current handle, the low two
/// bits distinguish FREE / LOCKED / WAITING / CONDITION.  Packing the lock into the value word
/// means no separate mutex per cell, and one parking address serves both lock contention and
/// condition wakes.
///
/// The atomic API ([load](AtomicObject::load), [store](AtomicObject::store),
/// [exchange](AtomicObject::exchange), [compare_exchange](AtomicObject::compare_exchange)) moves
/// whole references in and out of the cell.  The same cell doubles as an explicit
/// [lock](AtomicObject::lock)/[unlock](AtomicObject::unlock) mutex guarding whatever the caller
/// likes, with [wait](AtomicObject::wait) and [notify_one](AtomicObject::notify_one) layered on
/// top; the stored handle is preserved across those uses.
///
/// Waits are unbounded; there is no cancellation or timeout.
pub struct AtomicObject {
    word: AtomicUsize,
}

impl AtomicObject {
    /// A cell holding the empty handle.
    pub const fn empty() -> AtomicObject {
        AtomicObject {
            word: AtomicUsize::new(0),
        }
    }

    /// A cell holding `value`, taking over its reference.
    pub fn new(value: Object) -> AtomicObject {
        AtomicObject {
            word: AtomicUsize::new(value.into_bits()),
        }
    }

    fn addr(&self) -> usize {
        &self.word as *const AtomicUsize as usize
    }

    /// Acquire the cell lock and return the bare handle bits stored in it.
    ///
    /// Spins briefly on contention, then publishes the WAITING tag and parks until the holder
    /// unlocks.
    fn lock_and_load(&self) -> usize {
        let backoff = Backoff::new();
        let mut word = self.word.load(Ordering::Relaxed);
        loop {
            match word & TAG_MASK {
                // CONDITION does not block acquisition: the waiters parked under it are waiting
                // for a notify, not for the lock.
                TAG_FREE | TAG_CONDITION => {
                    let bits = word & !TAG_MASK;
                    match self.word.compare_exchange_weak(
                        word,
                        bits | TAG_LOCKED,
                        Ordering::Acquire,
                        Ordering::Relaxed,
                    ) {
                        Ok(_) => return bits,
                        Err(observed) => {
                            word = observed;
                            backoff.spin();
                        }
                    }
                }
                TAG_LOCKED => {
                    if !backoff.is_completed() {
                        backoff.snooze();
                        word = self.word.load(Ordering::Relaxed);
                        continue;
                    }
                    let parked = (word & !TAG_MASK) | TAG_WAITING;
                    match self.word.compare_exchange_weak(
                        word,
                        parked,
                        Ordering::Relaxed,
                        Ordering::Relaxed,
                    ) {
                        Ok(_) => {
                            wait_queue::wait(&self.word, parked);
                            word = self.word.load(Ordering::Relaxed);
                        }
                        Err(observed) => word = observed,
                    }
                }
                _ => {
                    // TAG_WAITING: someone else already published a waiter; join them.
                    wait_queue::wait(&self.word, word);
                    word = self.word.load(Ordering::Relaxed);
                }
            }
        }
    }

    /// Store bare handle bits and release the cell lock in one exchange, waking lock waiters if
    /// any were published.
    fn store_and_unlock(&self, bits: usize, order: Ordering) {
        debug_assert_eq!(bits & TAG_MASK, 0);
        let old = self.word.swap(bits, with_release(order));
        debug_assert!(matches!(old & TAG_MASK, TAG_LOCKED | TAG_WAITING));
        if old & TAG_MASK == TAG_WAITING {
            wait_queue::wake_where(self.addr(), |expected| expected & TAG_MASK == TAG_WAITING, usize::MAX);
        }
    }

    /// Read the current handle, sharing ownership with the cell.
    pub fn load(&self, order: Ordering) -> Object {
        let bits = self.lock_and_load();
        let loaded = unsafe { Object::clone_from_bits(bits) };
        self.store_and_unlock(bits, order);
        loaded
    }

    /// Replace the current handle, dropping the old one.
    pub fn store(&self, value: Object, order: Ordering) {
        drop(self.exchange(value, order));
    }

    /// Replace the current handle, returning the old one.
    pub fn exchange(&self, value: Object, order: Ordering) -> Object {
        let old = self.lock_and_load();
        self.store_and_unlock(value.into_bits(), order);
        unsafe { Object::from_bits(old) }
    }

    /// Replace the handle with `desired` iff the cell currently holds the same allocation as
    /// `expected` (identity comparison).
    ///
    /// On success, `desired`'s reference moves into the cell and the cell's old reference is
    /// released; `expected` is left untouched.  On failure, `desired` is dropped and `expected`
    /// is overwritten with the observed handle (its count raised accordingly).
    pub fn compare_exchange(
        &self,
        expected: &mut Object,
        desired: Object,
        success: Ordering,
        failure: Ordering,
    ) -> bool {
        let current = self.lock_and_load();
        if current == expected.as_bits() {
            self.store_and_unlock(desired.into_bits(), success);
            // The cell no longer holds its old value.
            unsafe { Object::release_bits(current) };
            true
        } else {
            let observed = unsafe { Object::clone_from_bits(current) };
            self.store_and_unlock(current, failure);
            *expected = observed;
            false
        }
    }

    /// Identical to [compare_exchange](AtomicObject::compare_exchange); the lock-based cell has
    /// no spurious failure mode.
    pub fn compare_exchange_weak(
        &self,
        expected: &mut Object,
        desired: Object,
        success: Ordering,
        failure: Ordering,
    ) -> bool {
        self.compare_exchange(expected, desired, success, failure)
    }

    /// Acquire the cell as a plain mutex.  The stored handle is untouched and keeps its
    /// reference; callers pair this with [unlock](AtomicObject::unlock).
    pub fn lock(&self) {
        self.lock_and_load();
    }

    /// Try to acquire the cell lock without blocking.
    pub fn try_lock(&self) -> bool {
        let word = self.word.load(Ordering::Relaxed);
        if !matches!(word & TAG_MASK, TAG_FREE | TAG_CONDITION) {
            return false;
        }
        self.word
            .compare_exchange(
                word,
                (word & !TAG_MASK) | TAG_LOCKED,
                Ordering::Acquire,
                Ordering::Relaxed,
            )
            .is_ok()
    }

    /// Release the cell lock, preserving the stored handle.
    ///
    /// Must only be called by the thread that holds the lock.
    pub fn unlock(&self) {
        let old = self.word.fetch_and(!TAG_MASK, Ordering::Release);
        debug_assert!(matches!(old & TAG_MASK, TAG_LOCKED | TAG_WAITING));
        if old & TAG_MASK == TAG_WAITING {
            wait_queue::wake_where(self.addr(), |expected| expected & TAG_MASK == TAG_WAITING, usize::MAX);
        }
    }

    /// Block until `pred` returns true, releasing the lock while parked.
    ///
    /// The lock must be held on entry and is held again on return.  `pred` is evaluated under
    /// the lock; every [notify_one](AtomicObject::notify_one) /
    /// [notify_all](AtomicObject::notify_all) (and any spurious wake) re-tests it.
    pub fn wait(&self, mut pred: impl FnMut() -> bool) {
        while !pred() {
            self.wait_once();
            // wait_once reacquired the lock.
        }
    }

    fn wait_once(&self) {
        // Swap the tag to CONDITION, which releases the lock.  The loop is only against other
        // threads publishing WAITING concurrently.
        let mut word = self.word.load(Ordering::Relaxed);
        let parked;
        loop {
            debug_assert!(matches!(word & TAG_MASK, TAG_LOCKED | TAG_WAITING));
            let next = (word & !TAG_MASK) | TAG_CONDITION;
            match self.word.compare_exchange_weak(
                word,
                next,
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    parked = next;
                    break;
                }
                Err(observed) => word = observed,
            }
        }
        // The lock just became available; let published lock waiters go for it.
        if word & TAG_MASK == TAG_WAITING {
            wait_queue::wake_where(self.addr(), |expected| expected & TAG_MASK == TAG_WAITING, usize::MAX);
        }

        wait_queue::wait(&self.word, parked);
        self.lock();
    }

    /// Wake one thread parked in [wait](AtomicObject::wait).  The caller must hold the lock.
    pub fn notify_one(&self) {
        debug_assert!(matches!(
            self.word.load(Ordering::Relaxed) & TAG_MASK,
            TAG_LOCKED | TAG_WAITING
        ));
        wait_queue::wake_where(self.addr(), |expected| expected & TAG_MASK == TAG_CONDITION, 1);
    }

    /// Wake every thread parked in [wait](AtomicObject::wait).  The caller must hold the lock.
    pub fn notify_all(&self) {
        debug_assert!(matches!(
            self.word.load(Ordering::Relaxed) & TAG_MASK,
            TAG_LOCKED | TAG_WAITING
        ));
        wait_queue::wake_where(
            self.addr(),
            |expected| expected & TAG_MASK == TAG_CONDITION,
            usize::MAX,
        );
    }
}

impl Default for AtomicObject {
    fn default() -> AtomicObject {
        AtomicObject::empty()
    }
}

impl Drop for AtomicObject {
    fn drop(&mut self) {
        let word = *self.word.get_mut();
        debug_assert_eq!(word & TAG_MASK, TAG_FREE, "cell dropped while locked");
        unsafe { Object::release_bits(word & !TAG_MASK) };
    }
}

impl std::fmt::Debug for AtomicObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let word = self.word.load(Ordering::Relaxed);
        write!(f, "AtomicObject({:#x} tag {:#b})", word & !TAG_MASK, word & TAG_MASK)
    }
}

/// Never weaker than release on the store side; the paired lock acquisition supplies acquire.
fn with_release(order: Ordering) -> Ordering {
    match order {
        Ordering::Relaxed | Ordering::Release => Ordering::Release,
        Ordering::Acquire | Ordering::AcqRel => Ordering::AcqRel,
        _ => Ordering::SeqCst,
    }
}
