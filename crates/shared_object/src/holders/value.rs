use std::alloc::Layout;
use std::any::{Any, TypeId};
use std::mem::offset_of;
use std::ptr::NonNull;

use super::alloc_raw;
use crate::control::ControlBlock;
use crate::payload::Payload;

/// A single value behind a control block.
#[repr(C)]
pub(crate) struct ValueHolder<T> {
    pub(crate) header: ControlBlock,
    pub(crate) value: T,
}

impl<T> ValueHolder<T> {
    /// Fixed for a given `T`; [crate::ObjectPtr::from_raw] relies on this to walk from a payload
    /// pointer back to the control block.
    pub(crate) const PAYLOAD_OFFSET: usize = offset_of!(ValueHolder<T>, value);
}

pub(crate) fn allocate<T: Payload>(value: T) -> NonNull<ControlBlock> {
    let layout = Layout::new::<ValueHolder<T>>();
    let holder = alloc_raw(layout).cast::<ValueHolder<T>>();
    unsafe {
        holder.as_ptr().write(ValueHolder {
            header: ControlBlock::new(
                TypeId::of::<T>(),
                destroy::<T>,
                dealloc::<T>,
                upcast::<T>,
            ),
            value,
        });
    }
    holder.cast()
}

/// # Safety
///
/// `cb` must head a value holder of exactly `T`.
pub(crate) unsafe fn payload_ptr<T>(cb: NonNull<ControlBlock>) -> NonNull<T> {
    unsafe {
        NonNull::new_unchecked(
            cb.as_ptr()
                .cast::<u8>()
                .add(ValueHolder::<T>::PAYLOAD_OFFSET)
                .cast::<T>(),
        )
    }
}

unsafe fn destroy<T>(cb: NonNull<ControlBlock>) {
    unsafe { std::ptr::drop_in_place(payload_ptr::<T>(cb).as_ptr()) };
}

unsafe fn dealloc<T>(cb: NonNull<ControlBlock>) {
    unsafe { std::alloc::dealloc(cb.as_ptr().cast(), Layout::new::<ValueHolder<T>>()) };
}

unsafe fn upcast<T: Payload>(cb: NonNull<ControlBlock>, target: TypeId) -> Option<NonNull<()>> {
    let payload = unsafe { payload_ptr::<T>(cb) };
    if target == TypeId::of::<T>() {
        return Some(payload.cast());
    }
    let found = unsafe { payload.as_ref() }.upcast(target)?;
    if Any::type_id(found) != target {
        // A Payload impl that returns the wrong embedded value resolves to a failed cast rather
        // than a misinterpreted pointer.
        return None;
    }
    Some(NonNull::from(found).cast())
}
