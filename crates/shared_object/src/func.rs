use std::marker::PhantomData;
use std::ptr::NonNull;

use crate::control::ControlBlock;
use crate::error::{Error, Result};
use crate::holders::callable::{self, FnTag};
use crate::object::Object;

/// Something invocable with argument tuple `A` yielding `R`, possibly mutating captured state.
///
/// Implemented for closures and function pointers of up to six arguments; `(x, y)` argument
/// tuples map to `FnMut(X, Y) -> R`.  This is the borrowed-callable contract: no `Send`, no
/// `'static`.
pub trait CallableMut<A, R> {
    fn invoke(&mut self, args: A) -> R;
}

/// A callable that can be stored inside an owning handle, which additionally requires it to be
/// shareable across threads and free of borrows.
pub trait Callable<A, R>: CallableMut<A, R> + Send + Sync + 'static {}

impl<A, R, F> Callable<A, R> for F where F: CallableMut<A, R> + Send + Sync + 'static {}

macro_rules! impl_callable {
    ($($arg:ident)*) => {
        #[allow(non_snake_case)]
        impl<Fun, Ret, $($arg,)*> CallableMut<($($arg,)*), Ret> for Fun
        where
            Fun: FnMut($($arg),*) -> Ret,
        {
            fn invoke(&mut self, ($($arg,)*): ($($arg,)*)) -> Ret {
                self($($arg),*)
            }
        }
    };
}

impl_callable!();
impl_callable!(A1);
impl_callable!(A1 A2);
impl_callable!(A1 A2 A3);
impl_callable!(A1 A2 A3 A4);
impl_callable!(A1 A2 A3 A4 A5);
impl_callable!(A1 A2 A3 A4 A5 A6);

/// An owning handle constrained to callable holders with argument tuple `A` and result `R`.
///
/// The holder's type tag records only the signature, so any two callables of the same shape are
/// interchangeable behind this handle, and a generic [Object] converts back exactly when its
/// recorded signature matches.  Invocation dispatches through a per-holder slot; captured state
/// may be mutated (the holder guards it with a runtime borrow check, so invoking the same
/// callable from two threads at once panics rather than races).
pub struct FnObject<A: 'static, R: 'static> {
    object: Object,
    _marker: PhantomData<fn(A) -> R>,
}

impl<A: 'static, R: 'static> FnObject<A, R> {
    pub const fn null() -> FnObject<A, R> {
        FnObject {
            object: Object::null(),
            _marker: PhantomData,
        }
    }

    /// Wrap any storable callable.
    pub fn new<F: Callable<A, R>>(func: F) -> FnObject<A, R> {
        FnObject {
            object: unsafe { Object::from_control(callable::allocate::<A, R, F>(func)) },
            _marker: PhantomData,
        }
    }

    /// The in-place-type construction: a default-constructed `F` behind a fresh handle.
    pub fn new_default<F: Callable<A, R> + Default>() -> FnObject<A, R> {
        Self::new(F::default())
    }

    pub fn is_null(&self) -> bool {
        self.object.is_null()
    }

    /// Invoke the stored callable.  Fails with [Error::ObjectNotFn] on the empty handle.
    pub fn call(&self, args: A) -> Result<R> {
        let cb = self.object.control().ok_or(Error::ObjectNotFn)?;
        unsafe {
            let invoke = callable::invoke_slot::<A, R>(cb);
            Ok(invoke(cb, args))
        }
    }

    /// Replace the contents with a newly constructed callable.  Other handles to the old one are
    /// unaffected.
    pub fn emplace<F: Callable<A, R>>(&mut self, func: F) {
        *self = Self::new(func);
    }

    pub fn object(&self) -> &Object {
        &self.object
    }

    pub fn into_object(self) -> Object {
        self.object
    }
}

impl<A: 'static, R: 'static> Clone for FnObject<A, R> {
    fn clone(&self) -> FnObject<A, R> {
        FnObject {
            object: self.object.clone(),
            _marker: PhantomData,
        }
    }
}

impl<A: 'static, R: 'static> Default for FnObject<A, R> {
    fn default() -> FnObject<A, R> {
        FnObject::null()
    }
}

/// Adopt a generic handle; it must record exactly the signature `(A) -> R`.
impl<A: 'static, R: 'static> TryFrom<Object> for FnObject<A, R> {
    type Error = Error;

    fn try_from(object: Object) -> Result<FnObject<A, R>> {
        if object.is_null() || object.is::<FnTag<A, R>>() {
            Ok(FnObject {
                object,
                _marker: PhantomData,
            })
        } else {
            Err(Error::ObjectNotFn)
        }
    }
}

impl<A: 'static, R: 'static> From<FnObject<A, R>> for Object {
    fn from(f: FnObject<A, R>) -> Object {
        f.object
    }
}

impl<A: 'static, R: 'static> PartialEq for FnObject<A, R> {
    fn eq(&self, other: &FnObject<A, R>) -> bool {
        self.object == other.object
    }
}

impl<A: 'static, R: 'static> Eq for FnObject<A, R> {}

impl<A: 'static, R: 'static> std::fmt::Debug for FnObject<A, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FnObject({:?})", self.object)
    }
}

enum FnRefTarget {
    /// Borrowed from an owning handle; the pointer is its control block.
    Handle(NonNull<ControlBlock>),
    /// Borrowed from an arbitrary callable owned by the caller.
    Raw(NonNull<()>),
}

/// A non-owning callable reference: a target pointer plus an invocation thunk.
///
/// Borrowed either from an [FnObject] (in which case it can be turned back into one) or from any
/// [CallableMut] value the caller keeps alive.  Invocation takes `&mut self` because the target
/// may be an `FnMut` with captured state.
pub struct FnRef<'a, A, R> {
    target: FnRefTarget,
    thunk: unsafe fn(&FnRefTarget, A) -> R,
    _marker: PhantomData<&'a mut ()>,
}

impl<'a, A: 'static, R: 'static> FnRef<'a, A, R> {
    /// Borrow an owning handle.  Fails with [Error::ObjectNotFn] on the empty handle.
    pub fn new(f: &'a FnObject<A, R>) -> Result<FnRef<'a, A, R>> {
        let cb = f.object().control().ok_or(Error::ObjectNotFn)?;
        Ok(FnRef {
            target: FnRefTarget::Handle(cb),
            thunk: thunk_handle::<A, R>,
            _marker: PhantomData,
        })
    }
}

impl<'a, A, R> FnRef<'a, A, R> {
    /// Borrow an arbitrary callable.  The caller keeps it alive and unaliased for `'a`.
    pub fn from_mut<F: CallableMut<A, R>>(func: &'a mut F) -> FnRef<'a, A, R> {
        FnRef {
            target: FnRefTarget::Raw(NonNull::from(func).cast()),
            thunk: thunk_raw::<A, R, F>,
            _marker: PhantomData,
        }
    }

    pub fn call(&mut self, args: A) -> R {
        unsafe { (self.thunk)(&self.target, args) }
    }

    /// Recover an owning handle; possible only when this reference was borrowed from one.
    pub fn to_object(&self) -> Result<FnObject<A, R>>
    where
        A: 'static,
        R: 'static,
    {
        match self.target {
            FnRefTarget::Handle(cb) => unsafe {
                ControlBlock::addref_strong(cb);
                Ok(FnObject {
                    object: Object::from_control(cb),
                    _marker: PhantomData,
                })
            },
            FnRefTarget::Raw(_) => Err(Error::ObjectNotFn),
        }
    }
}

impl<A, R> std::fmt::Debug for FnRef<'_, A, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.target {
            FnRefTarget::Handle(cb) => write!(f, "FnRef(handle {:p})", cb.as_ptr()),
            FnRefTarget::Raw(ptr) => write!(f, "FnRef(borrowed {:p})", ptr.as_ptr()),
        }
    }
}

unsafe fn thunk_handle<A: 'static, R: 'static>(target: &FnRefTarget, args: A) -> R {
    let FnRefTarget::Handle(cb) = target else {
        unreachable!()
    };
    unsafe {
        let invoke = callable::invoke_slot::<A, R>(*cb);
        invoke(*cb, args)
    }
}

unsafe fn thunk_raw<A, R, F: CallableMut<A, R>>(target: &FnRefTarget, args: A) -> R {
    let FnRefTarget::Raw(ptr) = target else {
        unreachable!()
    };
    unsafe { ptr.cast::<F>().as_mut() }.invoke(args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn calls_mutable_closures_through_shared_handles() {
        let mut seed = 100;
        let f = FnObject::<(i32,), i32>::new(move |x: i32| {
            let out = x + seed;
            seed += 1;
            out
        });
        assert_eq!(f.call((1,)).unwrap(), 101);
        assert_eq!(f.call((1,)).unwrap(), 102);

        // A borrowed reference drives the same captured state.
        let mut g = FnRef::new(&f).unwrap();
        assert_eq!(g.call((1,)), 103);
        assert_eq!(g.call((1,)), 104);

        let h = g.to_object().unwrap();
        assert_eq!(h, f);
        assert_eq!(h.call((1,)).unwrap(), 105);
    }

    #[test]
    fn function_pointers_and_arities() {
        fn double(x: u64) -> u64 {
            x * 2
        }
        let f = FnObject::<(u64,), u64>::new(double);
        assert_eq!(f.call((21,)).unwrap(), 42);

        let sum = FnObject::<(i32, i32, i32), i32>::new(|a: i32, b: i32, c: i32| a + b + c);
        assert_eq!(sum.call((1, 2, 3)).unwrap(), 6);

        let nullary = FnObject::<(), &'static str>::new(|| "ready");
        assert_eq!(nullary.call(()).unwrap(), "ready");
    }

    #[derive(Default)]
    struct Accumulator {
        total: i64,
    }

    impl CallableMut<(i64,), i64> for Accumulator {
        fn invoke(&mut self, (x,): (i64,)) -> i64 {
            self.total += x;
            self.total
        }
    }

    #[test]
    fn in_place_default_construction() {
        let f = FnObject::<(i64,), i64>::new_default::<Accumulator>();
        assert_eq!(f.call((5,)).unwrap(), 5);
        assert_eq!(f.call((7,)).unwrap(), 12);
    }

    #[test]
    fn empty_and_mismatched_handles_report_object_not_fn() {
        let f = FnObject::<(i32,), i32>::null();
        assert_eq!(f.call((1,)).unwrap_err(), Error::ObjectNotFn);
        assert_eq!(FnRef::new(&f).unwrap_err(), Error::ObjectNotFn);

        let not_fn = Object::new(3u8);
        assert_eq!(
            FnObject::<(i32,), i32>::try_from(not_fn).unwrap_err(),
            Error::ObjectNotFn
        );

        let f = FnObject::<(i32,), i32>::new(|x: i32| x);
        let o: Object = f.into();
        // The same allocation converts back only at the recorded signature.
        assert!(FnObject::<(i32,), i64>::try_from(o.clone()).is_err());
        let f = FnObject::<(i32,), i32>::try_from(o).unwrap();
        assert_eq!(f.call((9,)).unwrap(), 9);
    }

    #[test]
    fn emplace_swaps_the_callable() {
        let mut f = FnObject::<(), i32>::new(|| 1);
        let old = f.clone();
        f.emplace(|| 2);
        assert_eq!(f.call(()).unwrap(), 2);
        assert_eq!(old.call(()).unwrap(), 1);
        assert_ne!(f, old);
    }

    #[test]
    fn borrowed_callable_reference() {
        let mut count = 0u32;
        let mut bump = |by: u32| {
            count += by;
            count
        };
        let mut r = FnRef::from_mut(&mut bump);
        assert_eq!(r.call((2,)), 2);
        assert_eq!(r.call((3,)), 5);
        assert_eq!(r.to_object().unwrap_err(), Error::ObjectNotFn);
    }
}
