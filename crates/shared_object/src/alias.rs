use std::ptr::NonNull;

use crate::control::ControlBlock;
use crate::error::{Error, Result};
use crate::holders::value::ValueHolder;
use crate::object::Object;

/// An owning handle paired with a raw pointer into (or guaranteed to outlive) its allocation.
///
/// The handle supplies lifetime; the interior pointer supplies the address actually exposed.
/// This is the aliasing-constructor pattern: a pointer to a field, an embedded base, or the
/// payload itself, whose storage is pinned for as long as the handle keeps one strong reference.
///
/// The interior pointer may be null; [ObjectRef] is the variant that cannot be.
pub struct ObjectPtr<T: 'static> {
    object: Object,
    ptr: *const T,
}

unsafe impl<T: Send + Sync + 'static> Send for ObjectPtr<T> {}
unsafe impl<T: Send + Sync + 'static> Sync for ObjectPtr<T> {}

impl<T: 'static> ObjectPtr<T> {
    pub const fn null() -> ObjectPtr<T> {
        ObjectPtr {
            object: Object::null(),
            ptr: std::ptr::null(),
        }
    }

    /// Point at the payload itself, by exact-type cast.
    pub fn new(object: Object) -> Result<ObjectPtr<T>> {
        let ptr: *const T = object.try_downcast_ref::<T>()?;
        Ok(ObjectPtr { object, ptr })
    }

    /// The handle-plus-raw-pointer construction: `ptr` is taken verbatim when non-null; a null
    /// `ptr` is instead resolved by polymorphic cast of the payload, failing with
    /// [Error::BadObjectCast](crate::Error::BadObjectCast) when the payload has no `T` in it.
    ///
    /// # Safety
    ///
    /// A non-null `ptr` must point at storage that stays valid for at least as long as `object`
    /// keeps a strong reference to its allocation.
    pub unsafe fn new_with_raw(object: Object, ptr: *const T) -> Result<ObjectPtr<T>> {
        if ptr.is_null() {
            Self::new_polymorphic(object)
        } else {
            Ok(ObjectPtr { object, ptr })
        }
    }

    /// The null-pointer half of [new_with_raw](ObjectPtr::new_with_raw) on its own: point at
    /// the payload or an embedded base of it, by polymorphic cast.
    pub fn new_polymorphic(object: Object) -> Result<ObjectPtr<T>> {
        let ptr: *const T = object.try_upcast_ref::<T>()?;
        Ok(ObjectPtr { object, ptr })
    }

    /// Pair `object` with an arbitrary interior pointer, taken verbatim with no null fallback.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or point at storage that stays valid for at least as long as `object`
    /// keeps a strong reference to its allocation.
    pub unsafe fn with_raw(object: Object, ptr: *const T) -> ObjectPtr<T> {
        ObjectPtr { object, ptr }
    }

    /// Reconstruct an owning aliasing pointer from a bare payload pointer.
    ///
    /// This is the "shared from this" primitive: the control block is recovered by walking back
    /// from the payload by the value-holder layout, and a new strong reference is taken.
    ///
    /// # Safety
    ///
    /// `payload` must point at the payload of a live value holder of exactly `T` (such as a
    /// reference obtained from [Object::downcast_ref], or `self` inside methods of the payload).
    /// Calling this with any other pointer is undefined behavior, as is calling it once the
    /// payload's destructor has started.
    pub unsafe fn from_raw(payload: NonNull<T>) -> ObjectPtr<T> {
        unsafe {
            let cb = NonNull::new_unchecked(
                payload
                    .as_ptr()
                    .cast::<u8>()
                    .sub(ValueHolder::<T>::PAYLOAD_OFFSET)
                    .cast::<ControlBlock>(),
            );
            ControlBlock::addref_strong(cb);
            ObjectPtr {
                object: Object::from_control(cb),
                ptr: payload.as_ptr(),
            }
        }
    }

    pub fn is_null(&self) -> bool {
        self.ptr.is_null()
    }

    pub fn get(&self) -> Option<&T> {
        unsafe { self.ptr.as_ref() }
    }

    pub fn try_get(&self) -> Result<&T> {
        self.get().ok_or(Error::BadObjectCast)
    }

    /// The owning handle backing this pointer.
    pub fn handle(&self) -> &Object {
        &self.object
    }

    /// Drop the interior pointer, keeping only the handle.
    pub fn into_object(self) -> Object {
        self.object
    }

    /// Promote to the never-null variant; fails if the interior pointer is null.
    pub fn into_ref(self) -> Result<ObjectRef<T>> {
        match NonNull::new(self.ptr.cast_mut()) {
            Some(ptr) => Ok(ObjectRef {
                object: self.object,
                ptr,
            }),
            None => Err(Error::BadObjectCast),
        }
    }
}

impl<T: 'static> Clone for ObjectPtr<T> {
    fn clone(&self) -> ObjectPtr<T> {
        ObjectPtr {
            object: self.object.clone(),
            ptr: self.ptr,
        }
    }
}

impl<T: 'static> Default for ObjectPtr<T> {
    fn default() -> ObjectPtr<T> {
        ObjectPtr::null()
    }
}

impl<T: 'static> std::fmt::Debug for ObjectPtr<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ObjectPtr({:p} in {:?})", self.ptr, self.object)
    }
}

/// The non-null aliasing handle: like [ObjectPtr], but the interior pointer is checked at
/// construction and the value is reachable through `Deref`.
pub struct ObjectRef<T: 'static> {
    object: Object,
    ptr: NonNull<T>,
}

unsafe impl<T: Send + Sync + 'static> Send for ObjectRef<T> {}
unsafe impl<T: Send + Sync + 'static> Sync for ObjectRef<T> {}

impl<T: 'static> ObjectRef<T> {
    pub fn new(object: Object) -> Result<ObjectRef<T>> {
        ObjectPtr::new(object)?.into_ref()
    }

    pub fn new_polymorphic(object: Object) -> Result<ObjectRef<T>> {
        ObjectPtr::new_polymorphic(object)?.into_ref()
    }

    /// The handle-plus-raw-pointer construction; a null `ptr` is resolved by polymorphic cast,
    /// and a cast miss fails rather than producing a null reference.
    ///
    /// # Safety
    ///
    /// Same contract as [ObjectPtr::new_with_raw].
    pub unsafe fn new_with_raw(object: Object, ptr: *const T) -> Result<ObjectRef<T>> {
        unsafe { ObjectPtr::new_with_raw(object, ptr) }?.into_ref()
    }

    /// # Safety
    ///
    /// Same contract as [ObjectPtr::with_raw], with null already ruled out.
    pub unsafe fn with_raw(object: Object, ptr: NonNull<T>) -> ObjectRef<T> {
        ObjectRef { object, ptr }
    }

    /// A nullable aliasing pointer to the same interior, sharing the handle.
    pub fn as_object_ptr(&self) -> ObjectPtr<T> {
        ObjectPtr {
            object: self.object.clone(),
            ptr: self.ptr.as_ptr(),
        }
    }

    pub fn handle(&self) -> &Object {
        &self.object
    }

    pub fn into_object(self) -> Object {
        self.object
    }
}

impl<T: 'static> std::ops::Deref for ObjectRef<T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { self.ptr.as_ref() }
    }
}

impl<T: 'static> Clone for ObjectRef<T> {
    fn clone(&self) -> ObjectRef<T> {
        ObjectRef {
            object: self.object.clone(),
            ptr: self.ptr,
        }
    }
}

impl<T: 'static> std::fmt::Debug for ObjectRef<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ObjectRef({:p} in {:?})", self.ptr, self.object)
    }
}
