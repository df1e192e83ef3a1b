//! A global table of parked threads keyed by the address of an atomic word.
//!
//! This is the park/notify substrate shared by [AtomicObject](crate::AtomicObject) and
//! [WeakObject::wait_until_expired](crate::WeakObject::wait_until_expired).  It follows the futex
//! protocol: a waiter registers itself under the word's address together with the word value it
//! observed, re-checks the word, and only then parks.  Wakers remove waiters from the table before
//! unparking them, so a parked thread can always tell a real wake from a spurious `park` return.
//!
//! Unlike a kernel futex, wakers may filter on the value each waiter observed when it registered.
//! The atomic cell uses this to wake condition-variable waiters without disturbing mutex waiters
//! parked on the same word.

use std::sync::atomic::{fence, AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, Thread};

use crossbeam::utils::CachePadded;

const BUCKET_COUNT: usize = 64;

struct Waiter {
    addr: usize,
    expected: usize,
    thread: Thread,
    /// Set before the waiter is unparked; distinguishes real wakes from spurious park returns.
    woken: Arc<AtomicBool>,
}

struct Bucket {
    waiters: Mutex<Vec<Waiter>>,
    /// Mirror of `waiters.len()`, maintained under the lock.  Lets wake paths skip the lock when
    /// the bucket is empty, which is the common case on every last-handle release.
    pending: AtomicUsize,
}

impl Bucket {
    const fn new() -> Bucket {
        Bucket {
            waiters: Mutex::new(Vec::new()),
            pending: AtomicUsize::new(0),
        }
    }
}

const EMPTY_BUCKET: CachePadded<Bucket> = CachePadded::new(Bucket::new());
static TABLE: [CachePadded<Bucket>; BUCKET_COUNT] = [EMPTY_BUCKET; BUCKET_COUNT];

fn bucket_for(addr: usize) -> &'static Bucket {
    use std::hash::BuildHasher;

    let state = ahash::RandomState::with_seeds(
        0x243f_6a88_85a3_08d3,
        0x1319_8a2e_0370_7344,
        0xa409_3822_299f_31d0,
        0x082e_fa98_ec4e_6c89,
    );
    let index = state.hash_one(addr) as usize % BUCKET_COUNT;
    &TABLE[index]
}

/// Block until a waker targets `atom`'s address, as long as `atom` still reads `expected`.
///
/// Returns immediately if the word no longer holds `expected`.  May also return spuriously when
/// the word changes without a wake; callers re-check their predicate in a loop.
pub(crate) fn wait(atom: &AtomicUsize, expected: usize) {
    let addr = atom as *const AtomicUsize as usize;
    let bucket = bucket_for(addr);
    let woken = Arc::new(AtomicBool::new(false));

    {
        let mut queue = bucket.waiters.lock().unwrap();
        queue.push(Waiter {
            addr,
            expected,
            thread: thread::current(),
            woken: woken.clone(),
        });
        bucket.pending.store(queue.len(), Ordering::Relaxed);
    }

    // StoreLoad barrier: the registration above must be visible before we read the word, pairing
    // with the fence in wake_where between the waker's word update and its `pending` read.
    fence(Ordering::SeqCst);

    if atom.load(Ordering::Acquire) != expected {
        deregister(bucket, &woken);
        return;
    }

    log::trace!("parking on {:#x} (expected {:#x})", addr, expected);
    loop {
        thread::park();
        if woken.load(Ordering::Acquire) {
            return;
        }
        // Spurious park return.  The word may have moved on without a wake; bail out if so.
        if atom.load(Ordering::Acquire) != expected {
            deregister(bucket, &woken);
            return;
        }
    }
}

fn deregister(bucket: &Bucket, woken: &Arc<AtomicBool>) {
    let mut queue = bucket.waiters.lock().unwrap();
    queue.retain(|w| !Arc::ptr_eq(&w.woken, woken));
    bucket.pending.store(queue.len(), Ordering::Relaxed);
}

/// Wake up to `limit` threads parked on `addr` whose registered word value satisfies `filter`.
///
/// Returns the number of threads woken.
pub(crate) fn wake_where(addr: usize, filter: impl Fn(usize) -> bool, limit: usize) -> usize {
    // Pairs with the fence in wait(); without it this load could be satisfied before a concurrent
    // waiter's registration became visible.
    fence(Ordering::SeqCst);
    let bucket = bucket_for(addr);
    if bucket.pending.load(Ordering::Relaxed) == 0 {
        return 0;
    }

    let mut to_wake = Vec::new();
    {
        let mut queue = bucket.waiters.lock().unwrap();
        let mut i = 0;
        while i < queue.len() && to_wake.len() < limit {
            if queue[i].addr == addr && filter(queue[i].expected) {
                to_wake.push(queue.swap_remove(i));
            } else {
                i += 1;
            }
        }
        bucket.pending.store(queue.len(), Ordering::Relaxed);
    }

    for waiter in &to_wake {
        waiter.woken.store(true, Ordering::Release);
        waiter.thread.unpark();
    }
    to_wake.len()
}

pub(crate) fn wake_all(addr: usize) -> usize {
    wake_where(addr, |_| true, usize::MAX)
}
