use std::ptr::NonNull;
use std::sync::atomic::Ordering;

use crate::control::ControlBlock;
use crate::error::{Error, Result};
use crate::object::Object;
use crate::wait_queue;

/// A non-owning observer of a shared allocation.
///
/// A weak handle keeps the allocation (and its recorded type) alive, but not the payload.  The
/// only way to reach the payload again is [upgrade](WeakObject::upgrade), which succeeds exactly
/// when at least one strong handle still exists.
pub struct WeakObject {
    ptr: Option<NonNull<ControlBlock>>,
}

unsafe impl Send for WeakObject {}
unsafe impl Sync for WeakObject {}

impl WeakObject {
    pub const fn null() -> WeakObject {
        WeakObject { ptr: None }
    }

    /// Equivalent to [Object::downgrade].
    pub fn new(object: &Object) -> WeakObject {
        object.downgrade()
    }

    pub fn is_null(&self) -> bool {
        self.ptr.is_none()
    }

    /// True once no strong handle remains (and always for the empty weak handle).
    pub fn expired(&self) -> bool {
        match self.ptr {
            Some(cb) => unsafe { cb.as_ref() }.strong.load(Ordering::Acquire) == 0,
            None => true,
        }
    }

    /// Attempt to promote to a strong handle; `None` once the payload is gone.
    pub fn upgrade(&self) -> Option<Object> {
        let cb = self.ptr?;
        if unsafe { ControlBlock::upgrade(cb) } {
            Some(unsafe { Object::from_control(cb) })
        } else {
            None
        }
    }

    pub fn try_upgrade(&self) -> Result<Object> {
        self.upgrade().ok_or(Error::BadWeakObject)
    }

    /// Do these two weak handles observe the same allocation?
    pub fn ptr_eq(&self, other: &WeakObject) -> bool {
        self.ptr == other.ptr
    }

    /// Block until the strong count reaches zero.
    ///
    /// The wake comes from the final strong release; there is no timeout.  Returns immediately
    /// for the empty handle.
    pub fn wait_until_expired(&self) {
        let Some(cb) = self.ptr else { return };
        let strong = &unsafe { cb.as_ref() }.strong;
        loop {
            let observed = strong.load(Ordering::Acquire);
            if observed == 0 {
                return;
            }
            log::trace!("waiting for {:p} to expire", cb.as_ptr());
            wait_queue::wait(strong, observed);
        }
    }

    pub(crate) unsafe fn from_control(cb: NonNull<ControlBlock>) -> WeakObject {
        WeakObject { ptr: Some(cb) }
    }
}

impl Default for WeakObject {
    fn default() -> WeakObject {
        WeakObject::null()
    }
}

impl Clone for WeakObject {
    fn clone(&self) -> WeakObject {
        if let Some(cb) = self.ptr {
            unsafe { ControlBlock::addref_weak(cb) };
        }
        WeakObject { ptr: self.ptr }
    }
}

impl Drop for WeakObject {
    fn drop(&mut self) {
        if let Some(cb) = self.ptr.take() {
            unsafe { ControlBlock::release_weak(cb) };
        }
    }
}

impl std::fmt::Debug for WeakObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.ptr {
            Some(cb) => write!(f, "WeakObject({:p})", cb.as_ptr()),
            None => write!(f, "WeakObject(null)"),
        }
    }
}
