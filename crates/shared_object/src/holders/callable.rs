use std::alloc::Layout;
use std::any::TypeId;
use std::marker::PhantomData;
use std::ptr::NonNull;

use atomic_refcell::AtomicRefCell;

use super::alloc_raw;
use crate::control::ControlBlock;
use crate::func::{Callable, CallableMut};

/// The type tag recorded for every callable holder with argument tuple `A` and result `R`.
/// Handles compare signatures, never the erased callable type itself.
pub(crate) struct FnTag<A, R>(PhantomData<fn(A) -> R>);

/// Leading fields of every callable holder with one signature, independent of the stored
/// callable.  `#[repr(C)]` lets handles read the dispatch slot through this prefix without
/// knowing `F`.
#[repr(C)]
pub(crate) struct FnPrefix<A, R> {
    pub(crate) header: ControlBlock,
    pub(crate) invoke: unsafe fn(NonNull<ControlBlock>, A) -> R,
}

#[repr(C)]
struct FnHolder<A, R, F> {
    prefix: FnPrefix<A, R>,
    /// Runtime-checked exclusive access; invocation may mutate captured state even though the
    /// handle is shared.
    func: AtomicRefCell<F>,
}

pub(crate) fn allocate<A, R, F>(func: F) -> NonNull<ControlBlock>
where
    A: 'static,
    R: 'static,
    F: Callable<A, R>,
{
    let layout = Layout::new::<FnHolder<A, R, F>>();
    let holder = alloc_raw(layout).cast::<FnHolder<A, R, F>>();
    unsafe {
        holder.as_ptr().write(FnHolder {
            prefix: FnPrefix {
                header: ControlBlock::new(
                    TypeId::of::<FnTag<A, R>>(),
                    destroy::<A, R, F>,
                    dealloc::<A, R, F>,
                    upcast::<A, R, F>,
                ),
                invoke: invoke_erased::<A, R, F>,
            },
            func: AtomicRefCell::new(func),
        });
    }
    holder.cast()
}

/// # Safety
///
/// `cb` must head a callable holder whose recorded tag is `FnTag<A, R>`.
pub(crate) unsafe fn invoke_slot<A, R>(
    cb: NonNull<ControlBlock>,
) -> unsafe fn(NonNull<ControlBlock>, A) -> R {
    unsafe { std::ptr::addr_of!((*cb.cast::<FnPrefix<A, R>>().as_ptr()).invoke).read() }
}

unsafe fn invoke_erased<A, R, F>(cb: NonNull<ControlBlock>, args: A) -> R
where
    A: 'static,
    R: 'static,
    F: Callable<A, R>,
{
    let holder = cb.cast::<FnHolder<A, R, F>>();
    let cell = unsafe { &*std::ptr::addr_of!((*holder.as_ptr()).func) };
    // Panics if the same callable is invoked reentrantly or from two threads at once.
    let mut func = cell.borrow_mut();
    func.invoke(args)
}

unsafe fn destroy<A, R, F>(cb: NonNull<ControlBlock>)
where
    A: 'static,
    R: 'static,
{
    let holder = cb.cast::<FnHolder<A, R, F>>();
    unsafe { std::ptr::drop_in_place(std::ptr::addr_of_mut!((*holder.as_ptr()).func)) };
}

unsafe fn dealloc<A, R, F>(cb: NonNull<ControlBlock>)
where
    A: 'static,
    R: 'static,
{
    unsafe { std::alloc::dealloc(cb.as_ptr().cast(), Layout::new::<FnHolder<A, R, F>>()) };
}

unsafe fn upcast<A, R, F>(cb: NonNull<ControlBlock>, target: TypeId) -> Option<NonNull<()>>
where
    A: 'static,
    R: 'static,
{
    if target == TypeId::of::<FnTag<A, R>>() {
        let holder = cb.cast::<FnHolder<A, R, F>>();
        Some(unsafe { NonNull::new_unchecked(std::ptr::addr_of_mut!((*holder.as_ptr()).func)) }.cast())
    } else {
        None
    }
}
