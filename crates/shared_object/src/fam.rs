use std::marker::PhantomData;
use std::ptr::NonNull;

use crate::alias::ObjectRef;
use crate::error::{Error, Result};
use crate::holders::fam::{self, FamTag};
use crate::object::Object;
use crate::view::ArrayView;

/// An owning handle to a head value plus a trailing inline array, sharing one allocation and one
/// pair of reference counts.
///
/// The trailing array's lifetime strictly encloses the head's: elements are built before the
/// head-construction closure runs (which receives them as a slice), and the head drops before
/// any element does.  The head may therefore read the array from its own destructor, via
/// [array_of](FamObject::array_of).
///
/// This handle is never empty; adopting a null [Object] fails.
pub struct FamObject<H, T>
where
    H: Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    object: Object,
    _marker: PhantomData<(fn() -> H, fn() -> T)>,
}

impl<H, T> FamObject<H, T>
where
    H: Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    /// `len` value-initialized elements, then a head built from them.
    pub fn new(len: usize, make_head: impl FnOnce(&[T]) -> H) -> FamObject<H, T>
    where
        T: Default,
    {
        Self::from_fn(len, |_| T::default(), make_head)
    }

    /// `len` elements produced in place by `elem_fn(index)`, then a head built from them.
    pub fn from_fn(
        len: usize,
        elem_fn: impl FnMut(usize) -> T,
        make_head: impl FnOnce(&[T]) -> H,
    ) -> FamObject<H, T> {
        FamObject {
            object: unsafe { Object::from_control(fam::allocate(len, elem_fn, make_head)) },
            _marker: PhantomData,
        }
    }

    pub fn head(&self) -> &H {
        let (head, _, _) = self.parts();
        unsafe { head.as_ref() }
    }

    /// The head by aliasing-handle semantics: shares ownership, points inside the allocation.
    pub fn head_ref(&self) -> ObjectRef<H> {
        let (head, _, _) = self.parts();
        unsafe { ObjectRef::with_raw(self.object.clone(), head) }
    }

    /// The trailing elements.
    pub fn array(&self) -> ArrayView<'_, T> {
        let (_, elems, len) = self.parts();
        ArrayView::new(unsafe { std::slice::from_raw_parts(elems.as_ptr(), len) })
    }

    pub fn len(&self) -> usize {
        self.parts().2
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Recover the trailing array from a reference to the head.
    ///
    /// Works anywhere the head is alive, including inside its own destructor (the elements
    /// outlive it by construction).
    ///
    /// # Safety
    ///
    /// `head` must be the head of a holder allocated by `FamObject::<H, T>`; any other reference
    /// is undefined behavior.
    pub unsafe fn array_of(head: &H) -> ArrayView<'_, T> {
        let (elems, len) = unsafe { fam::from_head::<H, T>(NonNull::from(head)) };
        ArrayView::new(unsafe { std::slice::from_raw_parts(elems.as_ptr(), len) })
    }

    pub fn object(&self) -> &Object {
        &self.object
    }

    pub fn into_object(self) -> Object {
        self.object
    }

    fn parts(&self) -> (NonNull<H>, NonNull<T>, usize) {
        let cb = self.object.control().expect("fam handles are never empty");
        unsafe { fam::parts::<H, T>(cb) }
    }
}

impl<H, T> Clone for FamObject<H, T>
where
    H: Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    fn clone(&self) -> FamObject<H, T> {
        FamObject {
            object: self.object.clone(),
            _marker: PhantomData,
        }
    }
}

/// Adopt a generic handle; it must be non-null and record exactly the `(H, T)` composite shape.
impl<H, T> TryFrom<Object> for FamObject<H, T>
where
    H: Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    type Error = Error;

    fn try_from(object: Object) -> Result<FamObject<H, T>> {
        if object.is::<FamTag<H, T>>() {
            Ok(FamObject {
                object,
                _marker: PhantomData,
            })
        } else {
            Err(Error::BadObjectCast)
        }
    }
}

impl<H, T> From<FamObject<H, T>> for Object
where
    H: Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    fn from(f: FamObject<H, T>) -> Object {
        f.object
    }
}

impl<H, T> PartialEq for FamObject<H, T>
where
    H: Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    fn eq(&self, other: &FamObject<H, T>) -> bool {
        self.object == other.object
    }
}

impl<H, T> Eq for FamObject<H, T>
where
    H: Send + Sync + 'static,
    T: Send + Sync + 'static,
{
}

impl<H, T> std::fmt::Debug for FamObject<H, T>
where
    H: Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FamObject({:?}, len {})", self.object, self.len())
    }
}
