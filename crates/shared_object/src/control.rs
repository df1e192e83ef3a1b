use std::any::TypeId;
use std::ptr::NonNull;
use std::sync::atomic::{fence, AtomicUsize, Ordering};

use crate::wait_queue;

/// The head record of every shared allocation.
///
/// The payload lives immediately behind this block, in the same allocation.  Rather than a trait
/// object, the per-type operations are plain function pointers stored inline; each holder kind
/// fills them in with monomorphized functions when it allocates.
///
/// The counters follow the usual two-count discipline: `strong` governs the payload's lifetime,
/// `weak` governs the allocation's.  A live payload owns one weak token, released after the
/// payload is destroyed, so the block (and the recorded type) stays readable for as long as any
/// weak handle survives.
#[repr(C)]
pub(crate) struct ControlBlock {
    pub(crate) strong: AtomicUsize,
    pub(crate) weak: AtomicUsize,
    /// The type recorded at allocation time.  Value holders record the payload type itself;
    /// array, callable, and head-plus-array holders record marker types so that every holder of
    /// one shape shares a tag.
    pub(crate) type_id: TypeId,
    /// Drop the payload in place.  Runs exactly once, when `strong` hits zero.
    pub(crate) destroy: unsafe fn(NonNull<ControlBlock>),
    /// Free the whole allocation.  Runs exactly once, when `weak` hits zero.
    pub(crate) dealloc: unsafe fn(NonNull<ControlBlock>),
    /// Resolve a polymorphic cast request against the live payload.
    pub(crate) upcast: unsafe fn(NonNull<ControlBlock>, TypeId) -> Option<NonNull<()>>,
}

// The atomic cell steals the two low bits of control block addresses.
const _: () = assert!(std::mem::align_of::<ControlBlock>() >= 4);

impl ControlBlock {
    pub(crate) fn new(
        type_id: TypeId,
        destroy: unsafe fn(NonNull<ControlBlock>),
        dealloc: unsafe fn(NonNull<ControlBlock>),
        upcast: unsafe fn(NonNull<ControlBlock>, TypeId) -> Option<NonNull<()>>,
    ) -> ControlBlock {
        ControlBlock {
            strong: AtomicUsize::new(1),
            // The payload's own token.
            weak: AtomicUsize::new(1),
            type_id,
            destroy,
            dealloc,
            upcast,
        }
    }

    /// # Safety
    ///
    /// `cb` must point at a live control block with a nonzero strong count.
    pub(crate) unsafe fn addref_strong(cb: NonNull<ControlBlock>) {
        let old = unsafe { cb.as_ref() }.strong.fetch_add(1, Ordering::Relaxed);
        debug_assert_ne!(old, 0);
    }

    /// Release one strong reference; on the last one, destroy the payload and drop the payload's
    /// weak token.
    ///
    /// # Safety
    ///
    /// `cb` must point at a live control block and the caller must own one strong reference.
    pub(crate) unsafe fn release_strong(cb: NonNull<ControlBlock>) {
        let old = unsafe { cb.as_ref() }.strong.fetch_sub(1, Ordering::Release);
        debug_assert_ne!(old, 0);
        if old == 1 {
            // Order every prior access to the payload before its destructor.
            fence(Ordering::Acquire);
            // Threads in WeakObject::wait_until_expired park on the strong counter, which sits at
            // the start of the block.
            wait_queue::wake_all(cb.as_ptr() as usize);
            unsafe {
                (cb.as_ref().destroy)(cb);
                ControlBlock::release_weak(cb);
            }
        }
    }

    /// # Safety
    ///
    /// `cb` must point at a live control block with a nonzero weak count.
    pub(crate) unsafe fn addref_weak(cb: NonNull<ControlBlock>) {
        let old = unsafe { cb.as_ref() }.weak.fetch_add(1, Ordering::Relaxed);
        debug_assert_ne!(old, 0);
    }

    /// Release one weak reference; on the last one, free the allocation.
    ///
    /// # Safety
    ///
    /// `cb` must point at a control block and the caller must own one weak reference.  The pointer
    /// is invalid once this returns.
    pub(crate) unsafe fn release_weak(cb: NonNull<ControlBlock>) {
        let old = unsafe { cb.as_ref() }.weak.fetch_sub(1, Ordering::Release);
        debug_assert_ne!(old, 0);
        if old == 1 {
            fence(Ordering::Acquire);
            unsafe { (cb.as_ref().dealloc)(cb) };
        }
    }

    /// Try to raise the strong count from a nonzero value.
    ///
    /// Incrementing from zero would resurrect a payload that is being (or has been) destroyed,
    /// which is why this cannot be a plain increment-and-check.
    ///
    /// # Safety
    ///
    /// `cb` must point at a live control block (a weak reference suffices).
    pub(crate) unsafe fn upgrade(cb: NonNull<ControlBlock>) -> bool {
        let strong = &unsafe { cb.as_ref() }.strong;
        let mut cur = strong.load(Ordering::Relaxed);
        loop {
            if cur == 0 {
                return false;
            }
            match strong.compare_exchange_weak(cur, cur + 1, Ordering::Acquire, Ordering::Relaxed) {
                Ok(_) => return true,
                Err(observed) => cur = observed,
            }
        }
    }
}
