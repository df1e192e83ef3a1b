use std::any::TypeId;
use std::ffi::c_void;
use std::ptr::NonNull;
use std::sync::atomic::Ordering;

use crate::control::ControlBlock;
use crate::error::{Error, Result};
use crate::holders::value;
use crate::payload::Payload;
use crate::weak::WeakObject;

/// The fundamental owning handle: a nullable, reference-counted pointer to one shared
/// allocation.
///
/// Every non-empty `Object` contributes exactly one strong reference to its control block.
/// Clones share; drops release; the payload is destroyed when the last strong reference goes
/// away.  Equality, ordering, and hashing are all by allocation identity, never by payload value:
/// two objects are equal iff they are the same object.
///
/// The typed views in this crate ([ArrayObject](crate::ArrayObject),
/// [StrObject](crate::StrObject), [FnObject](crate::FnObject), [FamObject](crate::FamObject)) are
/// all constrained `Object`s and convert to and from it.
pub struct Object {
    ptr: Option<NonNull<ControlBlock>>,
}

// Sound because every factory in this crate requires its payload to be Send + Sync.
unsafe impl Send for Object {}
unsafe impl Sync for Object {}

impl Object {
    /// The empty handle.
    pub const fn null() -> Object {
        Object { ptr: None }
    }

    /// Allocate a holder for `value` and return the first strong handle to it.
    pub fn new<T: Payload>(value: T) -> Object {
        Object {
            ptr: Some(value::allocate(value)),
        }
    }

    pub fn is_null(&self) -> bool {
        self.ptr.is_none()
    }

    /// The type recorded when the holder was allocated, or `None` for the empty handle.
    pub fn type_id(&self) -> Option<TypeId> {
        self.ptr.map(|cb| unsafe { cb.as_ref() }.type_id)
    }

    /// Does this object hold exactly `T`?
    ///
    /// Array holders answer to `is::<[T]>()`.
    pub fn is<T: ?Sized + 'static>(&self) -> bool {
        self.type_id() == Some(TypeId::of::<T>())
    }

    /// Current strong count; 0 for the empty handle.  Inherently racy, useful for tests and
    /// diagnostics.
    pub fn strong_count(&self) -> usize {
        self.ptr
            .map(|cb| unsafe { cb.as_ref() }.strong.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Current weak count, including the live payload's own token.
    pub fn weak_count(&self) -> usize {
        self.ptr
            .map(|cb| unsafe { cb.as_ref() }.weak.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Exact-type cast: succeeds only when the holder was allocated for exactly `T`.  A type
    /// embedded as a base never matches; use [upcast_ref](Object::upcast_ref) for that.
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        let cb = self.ptr?;
        if unsafe { cb.as_ref() }.type_id != TypeId::of::<T>() {
            return None;
        }
        // A tag equal to a sized T's id implies a value holder of T.
        Some(unsafe { value::payload_ptr::<T>(cb).as_ref() })
    }

    pub fn try_downcast_ref<T: 'static>(&self) -> Result<&T> {
        self.downcast_ref::<T>().ok_or(Error::BadObjectCast)
    }

    /// The unchecked cast flavor.
    ///
    /// # Safety
    ///
    /// The object must be non-empty and hold exactly `T`.
    pub unsafe fn downcast_ref_unchecked<T: 'static>(&self) -> &T {
        debug_assert!(self.is::<T>());
        unsafe { value::payload_ptr::<T>(self.ptr.unwrap_unchecked()).as_ref() }
    }

    /// Polymorphic cast: resolves `T` against the payload's declared embedded-base chain (see
    /// [Payload]), accepting the most-derived type as well.
    pub fn upcast_ref<T: 'static>(&self) -> Option<&T> {
        let cb = self.ptr?;
        let found = unsafe { (cb.as_ref().upcast)(cb, TypeId::of::<T>())? };
        Some(unsafe { found.cast::<T>().as_ref() })
    }

    pub fn try_upcast_ref<T: 'static>(&self) -> Result<&T> {
        self.upcast_ref::<T>().ok_or(Error::BadObjectCast)
    }

    /// Mutable access to the payload, granted only when this is the sole handle of any kind
    /// (strong count 1, weak count 1) and the type matches exactly.
    pub fn downcast_mut<T: 'static>(&mut self) -> Option<&mut T> {
        let cb = self.ptr?;
        {
            let block = unsafe { cb.as_ref() };
            if block.type_id != TypeId::of::<T>()
                || block.strong.load(Ordering::Acquire) != 1
                || block.weak.load(Ordering::Acquire) != 1
            {
                return None;
            }
        }
        Some(unsafe { value::payload_ptr::<T>(cb).as_mut() })
    }

    /// Create a non-owning observer of this allocation.
    pub fn downgrade(&self) -> WeakObject {
        match self.ptr {
            Some(cb) => unsafe {
                ControlBlock::addref_weak(cb);
                WeakObject::from_control(cb)
            },
            None => WeakObject::null(),
        }
    }

    /// Detach the control-block pointer without releasing the reference this handle owns.
    ///
    /// The caller now owns one strong reference through the raw pointer; hand it back through
    /// [from_raw](Object::from_raw) (or the C hooks in [crate::ffi]) to avoid a leak.  Returns
    /// null for the empty handle.
    pub fn into_raw(self) -> *mut c_void {
        let raw = self
            .ptr
            .map(|cb| cb.as_ptr().cast::<c_void>())
            .unwrap_or(std::ptr::null_mut());
        std::mem::forget(self);
        raw
    }

    /// Adopt a pointer previously produced by [into_raw](Object::into_raw), taking over its
    /// strong reference without touching the counters.
    ///
    /// # Safety
    ///
    /// `raw` must be null or a pointer obtained from `into_raw` whose reference has not already
    /// been adopted or cleared.
    pub unsafe fn from_raw(raw: *mut c_void) -> Object {
        Object {
            ptr: NonNull::new(raw.cast::<ControlBlock>()),
        }
    }

    pub(crate) fn control(&self) -> Option<NonNull<ControlBlock>> {
        self.ptr
    }

    /// Build an owning handle from a control block whose strong reference is being transferred
    /// to it.
    pub(crate) unsafe fn from_control(cb: NonNull<ControlBlock>) -> Object {
        Object { ptr: Some(cb) }
    }

    /// The handle as bare word bits for the atomic cell; 0 for the empty handle.
    pub(crate) fn as_bits(&self) -> usize {
        self.ptr.map(|cb| cb.as_ptr() as usize).unwrap_or(0)
    }

    /// Surrender ownership of this handle's reference as word bits.
    pub(crate) fn into_bits(self) -> usize {
        let bits = self.as_bits();
        std::mem::forget(self);
        bits
    }

    /// Adopt word bits, taking over the strong reference they carry.
    pub(crate) unsafe fn from_bits(bits: usize) -> Object {
        Object {
            ptr: NonNull::new(bits as *mut ControlBlock),
        }
    }

    /// Build a new owning handle for `bits`, incrementing the strong count.
    pub(crate) unsafe fn clone_from_bits(bits: usize) -> Object {
        if let Some(cb) = NonNull::new(bits as *mut ControlBlock) {
            unsafe { ControlBlock::addref_strong(cb) };
        }
        unsafe { Object::from_bits(bits) }
    }

    /// Release the strong reference carried by `bits` without materializing a handle.
    pub(crate) unsafe fn release_bits(bits: usize) {
        if let Some(cb) = NonNull::new(bits as *mut ControlBlock) {
            unsafe { ControlBlock::release_strong(cb) };
        }
    }
}

impl Default for Object {
    fn default() -> Object {
        Object::null()
    }
}

impl Clone for Object {
    fn clone(&self) -> Object {
        if let Some(cb) = self.ptr {
            unsafe { ControlBlock::addref_strong(cb) };
        }
        Object { ptr: self.ptr }
    }
}

impl Drop for Object {
    fn drop(&mut self) {
        if let Some(cb) = self.ptr.take() {
            unsafe { ControlBlock::release_strong(cb) };
        }
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Object) -> bool {
        self.as_bits() == other.as_bits()
    }
}

impl Eq for Object {}

impl PartialOrd for Object {
    fn partial_cmp(&self, other: &Object) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Object {
    fn cmp(&self, other: &Object) -> std::cmp::Ordering {
        self.as_bits().cmp(&other.as_bits())
    }
}

impl std::hash::Hash for Object {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.as_bits().hash(state);
    }
}

impl std::fmt::Debug for Object {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.ptr {
            Some(cb) => write!(f, "Object({:p})", cb.as_ptr()),
            None => write!(f, "Object(null)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drop_census::DropCensus;
    use pretty_assertions::assert_eq;

    crate::upcasts!(drop_census::Tracked<i32>);

    #[test]
    fn refcounts_through_clone_and_drop() {
        let census = DropCensus::new();
        let a = Object::new(census.track(1, 42));
        assert_eq!(a.strong_count(), 1);
        assert_eq!(a.weak_count(), 1);

        let b = a.clone();
        let c = a.clone();
        assert_eq!(a.strong_count(), 3);
        assert_eq!(b, a);
        assert_eq!(c, a);

        drop(b);
        drop(c);
        assert_eq!(a.strong_count(), 1);
        census.assert_count(0);

        drop(a);
        census.assert_count(1);
    }

    #[test]
    fn null_handle_behaves() {
        let o = Object::null();
        assert!(o.is_null());
        assert_eq!(o.type_id(), None);
        assert_eq!(o.strong_count(), 0);
        assert!(o.downcast_ref::<i32>().is_none());
        assert_eq!(o.clone(), Object::default());
    }

    #[test]
    fn exact_cast_matches_only_the_stored_type() {
        let o = Object::new(42i32);
        assert!(o.is::<i32>());
        assert_eq!(*o.downcast_ref::<i32>().unwrap(), 42);
        assert!(o.downcast_ref::<u32>().is_none());
        assert_eq!(o.try_downcast_ref::<i64>(), Err(Error::BadObjectCast));
        assert_eq!(unsafe { *o.downcast_ref_unchecked::<i32>() }, 42);
    }

    #[test]
    fn identity_not_value_equality() {
        let a = Object::new(7i32);
        let b = Object::new(7i32);
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn raw_round_trip_preserves_the_reference() {
        let a = Object::new(String::from("ffi"));
        let b = a.clone();
        assert_eq!(b.strong_count(), 2);

        let raw = b.into_raw();
        assert!(!raw.is_null());
        // The detached pointer still owns its reference.
        assert_eq!(a.strong_count(), 2);

        let b = unsafe { Object::from_raw(raw) };
        assert_eq!(b, a);
        drop(b);
        assert_eq!(a.strong_count(), 1);

        assert!(unsafe { Object::from_raw(std::ptr::null_mut()) }.is_null());
    }

    #[test]
    fn downcast_mut_requires_a_unique_handle() {
        let mut o = Object::new(10i32);
        *o.downcast_mut::<i32>().unwrap() = 11;
        assert_eq!(*o.downcast_ref::<i32>().unwrap(), 11);

        let other = o.clone();
        assert!(o.downcast_mut::<i32>().is_none());
        drop(other);

        let weak = o.downgrade();
        assert!(o.downcast_mut::<i32>().is_none());
        drop(weak);
        assert!(o.downcast_mut::<i32>().is_some());
    }
}
