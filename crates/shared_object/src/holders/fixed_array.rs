use std::alloc::Layout;
use std::any::TypeId;
use std::mem::offset_of;
use std::ptr::NonNull;

use super::{alloc_raw, BuildGuard};
use crate::control::ControlBlock;

/// A fixed-length array allocation.
///
/// Unlike [super::array::ArrayHolder] there is no stored length word: the count lives in the
/// type.  The recorded tag is `TypeId::of::<[T; N]>()` and the layout is field-for-field that of
/// a value holder of `[T; N]`, so the payload is also reachable through the exact-cast machinery
/// as a plain `[T; N]` value.  What a value holder would not give us is the drop order: elements
/// here drop highest index first, not in the forward order of array drop glue.
#[repr(C)]
pub(crate) struct FixedArrayHolder<T, const N: usize> {
    pub(crate) header: ControlBlock,
    pub(crate) elements: [T; N],
}

pub(crate) const fn elem_offset<T, const N: usize>() -> usize {
    offset_of!(FixedArrayHolder<T, N>, elements)
}

/// Allocate a fixed-array holder with every element produced by `fill(index)`, in index order.
///
/// A panicking `fill` drops the constructed prefix in reverse and returns the allocation.
pub(crate) fn allocate_with<T, const N: usize>(
    mut fill: impl FnMut(usize) -> T,
) -> NonNull<ControlBlock>
where
    T: Send + Sync + 'static,
{
    let layout = Layout::new::<FixedArrayHolder<T, N>>();
    let base = alloc_raw(layout);
    let holder = base.cast::<FixedArrayHolder<T, N>>();
    let elems = unsafe { base.as_ptr().add(elem_offset::<T, N>()) }.cast::<T>();

    let mut guard = BuildGuard {
        base: base.as_ptr(),
        layout,
        elems,
        constructed: 0,
    };
    unsafe {
        for i in 0..N {
            elems.add(i).write(fill(i));
            guard.constructed = i + 1;
        }
        std::mem::forget(guard);
        std::ptr::addr_of_mut!((*holder.as_ptr()).header).write(ControlBlock::new(
            TypeId::of::<[T; N]>(),
            destroy::<T, N>,
            dealloc::<T, N>,
            upcast::<T, N>,
        ));
    }
    holder.cast()
}

/// Allocate with every element supplied.
pub(crate) fn allocate<T, const N: usize>(values: [T; N]) -> NonNull<ControlBlock>
where
    T: Send + Sync + 'static,
{
    let mut values = values.into_iter();
    allocate_with::<T, N>(|_| values.next().unwrap())
}

/// Allocate with the first `K` elements moved from `init` and the remainder value-initialized.
pub(crate) fn allocate_partial<T, const N: usize, const K: usize>(
    init: [T; K],
) -> NonNull<ControlBlock>
where
    T: Default + Send + Sync + 'static,
{
    assert!(K <= N, "{} initializers for a fixed array of {}", K, N);
    let mut init = init.into_iter();
    allocate_with::<T, N>(|_| init.next().unwrap_or_default())
}

/// # Safety
///
/// `cb` must head a fixed-array holder of exactly `[T; N]`.
pub(crate) unsafe fn elems_ptr<T, const N: usize>(cb: NonNull<ControlBlock>) -> NonNull<T> {
    unsafe {
        NonNull::new_unchecked(
            cb.as_ptr()
                .cast::<u8>()
                .add(elem_offset::<T, N>())
                .cast::<T>(),
        )
    }
}

unsafe fn destroy<T, const N: usize>(cb: NonNull<ControlBlock>) {
    unsafe {
        let elems = elems_ptr::<T, N>(cb);
        for i in (0..N).rev() {
            std::ptr::drop_in_place(elems.as_ptr().add(i));
        }
    }
}

unsafe fn dealloc<T, const N: usize>(cb: NonNull<ControlBlock>) {
    unsafe {
        std::alloc::dealloc(cb.as_ptr().cast(), Layout::new::<FixedArrayHolder<T, N>>());
    }
}

unsafe fn upcast<T: 'static, const N: usize>(
    cb: NonNull<ControlBlock>,
    target: TypeId,
) -> Option<NonNull<()>> {
    if target == TypeId::of::<[T; N]>() {
        Some(unsafe { elems_ptr::<T, N>(cb) }.cast())
    } else {
        None
    }
}
