//! The C-side ownership hooks.
//!
//! A plain-data tagged value living on the C side of the boundary may embed an opaque handle; the
//! only operations it ever performs on one are duplicating and clearing ownership.  These are the
//! default definitions of those two hooks, mapping them straight onto the reference counts.  The
//! pointers they take are the ones produced by [Object::into_raw]; adopting one back into Rust is
//! [Object::from_raw].

use std::ffi::c_void;
use std::ptr::NonNull;

use crate::control::ControlBlock;

/// Duplicate ownership of a detached handle.  Null passes through.
///
/// # Safety
///
/// `handle` must be null or a pointer produced by [Object::into_raw](crate::Object::into_raw)
/// that still owns at least one reference.
#[no_mangle]
pub unsafe extern "C" fn shared_object_handle_copy(handle: *mut c_void) -> *mut c_void {
    if let Some(cb) = NonNull::new(handle.cast::<ControlBlock>()) {
        unsafe { ControlBlock::addref_strong(cb) };
    }
    handle
}

/// Release one ownership unit of a detached handle.  Null is ignored.
///
/// # Safety
///
/// `handle` must be null or a pointer produced by [Object::into_raw](crate::Object::into_raw)
/// owning a reference that has not already been cleared or adopted.
#[no_mangle]
pub unsafe extern "C" fn shared_object_handle_clear(handle: *mut c_void) {
    if let Some(cb) = NonNull::new(handle.cast::<ControlBlock>()) {
        unsafe { ControlBlock::release_strong(cb) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Object;

    #[test]
    fn hooks_mirror_the_reference_counts() {
        let a = Object::new(1u64);
        let raw = a.clone().into_raw();

        let copied = unsafe { shared_object_handle_copy(raw) };
        assert_eq!(copied, raw);
        assert_eq!(a.strong_count(), 3);

        unsafe {
            shared_object_handle_clear(copied);
            shared_object_handle_clear(raw);
        }
        assert_eq!(a.strong_count(), 1);

        assert!(unsafe { shared_object_handle_copy(std::ptr::null_mut()) }.is_null());
        unsafe { shared_object_handle_clear(std::ptr::null_mut()) };
    }
}
