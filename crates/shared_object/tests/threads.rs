//! Cross-thread scenarios: handle handoff through the atomic cell, the cell as mutex and
//! condition variable, and refcount behavior under contention.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use drop_census::{DropCensus, Tracked};
use shared_object::{upcasts, AtomicObject, Object};

struct Token(#[allow(dead_code)] Tracked<u64>);

upcasts!(Token);

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn handoff_through_the_cell() {
    init_logging();
    let census = DropCensus::new();
    let value = Object::new(Token(census.track(1, 42)));
    let cell = Arc::new(AtomicObject::empty());

    let writer = {
        let cell = cell.clone();
        let value = value.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            cell.store(value, Ordering::Release);
        })
    };

    let reader = {
        let cell = cell.clone();
        thread::spawn(move || loop {
            let mut expected = Object::null();
            let swapped = cell.compare_exchange(
                &mut expected,
                Object::null(),
                Ordering::AcqRel,
                Ordering::Acquire,
            );
            if !swapped && !expected.is_null() {
                return expected;
            }
            thread::yield_now();
        })
    };

    writer.join().unwrap();
    let observed = reader.join().unwrap();
    assert_eq!(observed, value);

    drop(observed);
    drop(value);
    census.assert_count(0);
    // The cell still owns the last reference; dropping it must not leak.
    drop(cell);
    census.assert_count(1);
}

struct RacyCounter {
    value: UnsafeCell<u64>,
}

// Guarded by an AtomicObject used as a mutex in the test below.
unsafe impl Sync for RacyCounter {}

#[test]
fn the_cell_is_a_mutex() {
    init_logging();
    const THREADS: usize = 8;
    const PER_THREAD: usize = 500;

    let cell = Arc::new(AtomicObject::empty());
    let counter = Arc::new(RacyCounter {
        value: UnsafeCell::new(0),
    });

    let mut handles = vec![];
    for _ in 0..THREADS {
        let cell = cell.clone();
        let counter = counter.clone();
        handles.push(thread::spawn(move || {
            for _ in 0..PER_THREAD {
                cell.lock();
                // A non-atomic increment; only mutual exclusion keeps this correct.
                unsafe { *counter.value.get() += 1 };
                cell.unlock();
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(unsafe { *counter.value.get() }, (THREADS * PER_THREAD) as u64);
}

#[test]
fn condition_variable_handshake() {
    init_logging();
    let cell = Arc::new(AtomicObject::empty());
    let shutdown = Arc::new(AtomicBool::new(false));

    let waiter = {
        let cell = cell.clone();
        let shutdown = shutdown.clone();
        thread::spawn(move || {
            cell.lock();
            cell.wait(|| shutdown.load(Ordering::Relaxed));
            // Observed the request under the lock; acknowledge by clearing it.
            shutdown.store(false, Ordering::Relaxed);
            cell.unlock();
        })
    };

    thread::sleep(Duration::from_millis(50));
    cell.lock();
    shutdown.store(true, Ordering::Relaxed);
    cell.notify_one();
    cell.unlock();

    waiter.join().unwrap();
    assert!(!shutdown.load(Ordering::Relaxed));
}

#[test]
fn notify_all_releases_every_waiter() {
    init_logging();
    const WAITERS: usize = 4;

    let cell = Arc::new(AtomicObject::empty());
    let go = Arc::new(AtomicBool::new(false));

    let mut handles = vec![];
    for _ in 0..WAITERS {
        let cell = cell.clone();
        let go = go.clone();
        handles.push(thread::spawn(move || {
            cell.lock();
            cell.wait(|| go.load(Ordering::Relaxed));
            cell.unlock();
        }));
    }

    thread::sleep(Duration::from_millis(50));
    cell.lock();
    go.store(true, Ordering::Relaxed);
    cell.notify_all();
    cell.unlock();

    for h in handles {
        h.join().unwrap();
    }
}

#[test]
fn refcounts_survive_contention() {
    init_logging();
    const THREADS: usize = 8;
    const PER_THREAD: usize = 200;

    let census = DropCensus::new();
    let shared = Object::new(Token(census.track(7, 7)));

    let mut handles = vec![];
    for _ in 0..THREADS {
        let shared = shared.clone();
        handles.push(thread::spawn(move || {
            for _ in 0..PER_THREAD {
                let copy = shared.clone();
                let weak = copy.downgrade();
                assert!(!weak.expired());
                let upgraded = weak.upgrade().unwrap();
                assert_eq!(upgraded, shared);
            }
            shared.strong_count()
        }));
    }
    for h in handles {
        assert!(h.join().unwrap() >= 1);
    }

    census.assert_count(0);
    drop(shared);
    census.assert_count(1);
}

#[test]
fn expiry_wakes_every_observer() {
    init_logging();
    let object = Object::new(1u64);

    let mut handles = vec![];
    for _ in 0..3 {
        let weak = object.downgrade();
        handles.push(thread::spawn(move || {
            weak.wait_until_expired();
            assert!(weak.expired());
        }));
    }

    thread::sleep(Duration::from_millis(50));
    drop(object);
    for h in handles {
        h.join().unwrap();
    }
}

#[test]
fn racing_stores_never_leak() {
    init_logging();
    const THREADS: usize = 6;
    const PER_THREAD: usize = 100;

    let census = DropCensus::new();
    let cell = Arc::new(AtomicObject::empty());

    let mut handles = vec![];
    for t in 0..THREADS {
        let census = census.clone();
        let cell = cell.clone();
        handles.push(thread::spawn(move || {
            for i in 0..PER_THREAD {
                let id = (t * PER_THREAD + i) as u64;
                let fresh = Object::new(Token(census.track(id, id)));
                drop(cell.exchange(fresh, Ordering::AcqRel));
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    // Every stored object except the final occupant has been dropped exactly once.
    census.assert_count((THREADS * PER_THREAD - 1) as u64);
    drop(cell);
    census.assert_count((THREADS * PER_THREAD) as u64);
}
