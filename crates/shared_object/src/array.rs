use std::marker::PhantomData;
use std::ptr::NonNull;

use crate::error::{Error, Result};
use crate::holders::{array, fixed_array};
use crate::object::Object;
use crate::view::ArrayView;

/// An owning handle constrained to variable-length array holders of `T`.
///
/// The whole array shares one allocation and one pair of reference counts.  Elements drop in
/// reverse index order when the last strong handle goes away.  The empty handle behaves as a
/// zero-length array.
pub struct ArrayObject<T: Send + Sync + 'static> {
    object: Object,
    _marker: PhantomData<[T]>,
}

impl<T: Send + Sync + 'static> ArrayObject<T> {
    pub const fn null() -> ArrayObject<T> {
        ArrayObject {
            object: Object::null(),
            _marker: PhantomData,
        }
    }

    /// `len` value-initialized elements.
    pub fn new(len: usize) -> ArrayObject<T>
    where
        T: Default,
    {
        Self::from_fn(len, |_| T::default())
    }

    /// `len` elements produced in place by `fill(index)`, in index order.
    ///
    /// This is also the construction to reach for when value-initialization would be wasted
    /// work; Rust has no "allocate but leave uninitialized" form of this handle.
    pub fn from_fn(len: usize, fill: impl FnMut(usize) -> T) -> ArrayObject<T> {
        if len == 0 {
            return ArrayObject::null();
        }
        ArrayObject {
            object: unsafe { Object::from_control(array::allocate_with(len, fill)) },
            _marker: PhantomData,
        }
    }

    /// Move a fixed-size array into a holder.
    pub fn from_array<const N: usize>(values: [T; N]) -> ArrayObject<T> {
        let mut values = values.into_iter();
        Self::from_fn(N, |_| values.next().unwrap())
    }

    /// A holder of `len` elements whose first `K` come from `prefix` and whose remainder are
    /// value-initialized.  `len` must be at least `K`.
    pub fn from_partial<const K: usize>(prefix: [T; K], len: usize) -> ArrayObject<T>
    where
        T: Default,
    {
        assert!(len >= K, "length {} shorter than the {} given elements", len, K);
        let mut prefix = prefix.into_iter();
        Self::from_fn(len, |_| prefix.next().unwrap_or_default())
    }

    pub fn from_slice(values: &[T]) -> ArrayObject<T>
    where
        T: Clone,
    {
        Self::from_fn(values.len(), |i| values[i].clone())
    }

    pub fn from_exact_iter(values: impl ExactSizeIterator<Item = T>) -> ArrayObject<T> {
        let mut values = values;
        Self::from_fn(values.len(), |_| values.next().unwrap())
    }

    pub fn is_null(&self) -> bool {
        self.object.is_null()
    }

    pub fn size(&self) -> usize {
        self.parts().map(|(_, len)| len).unwrap_or(0)
    }

    pub fn data(&self) -> *const T {
        self.parts()
            .map(|(ptr, _)| ptr.as_ptr().cast_const())
            .unwrap_or(std::ptr::null())
    }

    /// Checked indexing.
    pub fn at(&self, index: usize) -> Result<&T> {
        let slice: &[T] = self;
        slice.get(index).ok_or(Error::OutOfRange {
            index,
            len: slice.len(),
        })
    }

    pub fn as_view(&self) -> ArrayView<'_, T> {
        ArrayView::new(self)
    }

    /// Replace the contents with a freshly allocated array of `len` value-initialized elements;
    /// zero length leaves the empty handle.  Other handles to the old array are unaffected.
    pub fn emplace(&mut self, len: usize)
    where
        T: Default,
    {
        *self = Self::new(len);
    }

    pub fn object(&self) -> &Object {
        &self.object
    }

    pub fn into_object(self) -> Object {
        self.object
    }

    fn parts(&self) -> Option<(NonNull<T>, usize)> {
        self.object
            .control()
            .map(|cb| unsafe { array::parts::<T>(cb) })
    }
}

impl<T: Send + Sync + 'static> std::ops::Deref for ArrayObject<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        match self.parts() {
            Some((ptr, len)) => unsafe { std::slice::from_raw_parts(ptr.as_ptr(), len) },
            None => &[],
        }
    }
}

impl<T: Send + Sync + 'static> Clone for ArrayObject<T> {
    fn clone(&self) -> ArrayObject<T> {
        ArrayObject {
            object: self.object.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: Send + Sync + 'static> Default for ArrayObject<T> {
    fn default() -> ArrayObject<T> {
        ArrayObject::null()
    }
}

impl<T: Send + Sync + 'static> TryFrom<Object> for ArrayObject<T> {
    type Error = Error;

    fn try_from(object: Object) -> Result<ArrayObject<T>> {
        if object.is_null() || object.is::<[T]>() {
            Ok(ArrayObject {
                object,
                _marker: PhantomData,
            })
        } else {
            Err(Error::BadObjectCast)
        }
    }
}

impl<T: Send + Sync + 'static> From<ArrayObject<T>> for Object {
    fn from(array: ArrayObject<T>) -> Object {
        array.object
    }
}

impl<T: Send + Sync + 'static> PartialEq for ArrayObject<T> {
    fn eq(&self, other: &ArrayObject<T>) -> bool {
        self.object == other.object
    }
}

impl<T: Send + Sync + 'static> Eq for ArrayObject<T> {}

impl<'a, T: Send + Sync + 'static> IntoIterator for &'a ArrayObject<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<T: Send + Sync + 'static + std::fmt::Debug> std::fmt::Debug for ArrayObject<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

/// An owning handle constrained to fixed-length array holders of `[T; N]`.
///
/// The length is part of the type, so the holder carries no length word; its recorded tag is the
/// array type itself, which also makes the payload reachable through the exact-cast machinery as
/// a `[T; N]`.  Construction supplies either all `N` elements or a prefix of them, the remainder
/// value-initialized.  Elements drop in reverse index order, like the variable form.  Unlike
/// [ArrayObject], this handle is never empty.
pub struct FixedArrayObject<T: Send + Sync + 'static, const N: usize> {
    object: Object,
    _marker: PhantomData<[T; N]>,
}

impl<T: Send + Sync + 'static, const N: usize> FixedArrayObject<T, N> {
    /// All `N` elements supplied.
    pub fn new(values: [T; N]) -> FixedArrayObject<T, N> {
        FixedArrayObject {
            object: unsafe { Object::from_control(fixed_array::allocate(values)) },
            _marker: PhantomData,
        }
    }

    /// The first `K` elements from `init`, the remainder value-initialized.
    pub fn from_partial<const K: usize>(init: [T; K]) -> FixedArrayObject<T, N>
    where
        T: Default,
    {
        FixedArrayObject {
            object: unsafe {
                Object::from_control(fixed_array::allocate_partial::<T, N, K>(init))
            },
            _marker: PhantomData,
        }
    }

    /// Every element produced in place by `fill(index)`, in index order.
    pub fn from_fn(fill: impl FnMut(usize) -> T) -> FixedArrayObject<T, N> {
        FixedArrayObject {
            object: unsafe { Object::from_control(fixed_array::allocate_with::<T, N>(fill)) },
            _marker: PhantomData,
        }
    }

    pub fn size(&self) -> usize {
        N
    }

    pub fn data(&self) -> *const T {
        self.elems().as_ptr().cast_const()
    }

    /// Checked indexing.
    pub fn at(&self, index: usize) -> Result<&T> {
        let slice: &[T] = self;
        slice.get(index).ok_or(Error::OutOfRange { index, len: N })
    }

    pub fn as_view(&self) -> ArrayView<'_, T> {
        ArrayView::new(self)
    }

    pub fn as_array(&self) -> &[T; N] {
        unsafe { self.elems().cast::<[T; N]>().as_ref() }
    }

    pub fn object(&self) -> &Object {
        &self.object
    }

    pub fn into_object(self) -> Object {
        self.object
    }

    fn elems(&self) -> NonNull<T> {
        let cb = self.object.control().expect("fixed array handles are never empty");
        unsafe { fixed_array::elems_ptr::<T, N>(cb) }
    }
}

impl<T: Send + Sync + 'static, const N: usize> std::ops::Deref for FixedArrayObject<T, N> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        unsafe { std::slice::from_raw_parts(self.elems().as_ptr(), N) }
    }
}

impl<T: Send + Sync + 'static, const N: usize> Clone for FixedArrayObject<T, N> {
    fn clone(&self) -> FixedArrayObject<T, N> {
        FixedArrayObject {
            object: self.object.clone(),
            _marker: PhantomData,
        }
    }
}

/// Adopt a generic handle; it must be non-null and record exactly `[T; N]`.
impl<T: Send + Sync + 'static, const N: usize> TryFrom<Object> for FixedArrayObject<T, N> {
    type Error = Error;

    fn try_from(object: Object) -> Result<FixedArrayObject<T, N>> {
        if object.is::<[T; N]>() {
            Ok(FixedArrayObject {
                object,
                _marker: PhantomData,
            })
        } else {
            Err(Error::BadObjectCast)
        }
    }
}

impl<T: Send + Sync + 'static, const N: usize> From<FixedArrayObject<T, N>> for Object {
    fn from(array: FixedArrayObject<T, N>) -> Object {
        array.object
    }
}

impl<T: Send + Sync + 'static, const N: usize> PartialEq for FixedArrayObject<T, N> {
    fn eq(&self, other: &FixedArrayObject<T, N>) -> bool {
        self.object == other.object
    }
}

impl<T: Send + Sync + 'static, const N: usize> Eq for FixedArrayObject<T, N> {}

impl<'a, T: Send + Sync + 'static, const N: usize> IntoIterator for &'a FixedArrayObject<T, N> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<T, const N: usize> std::fmt::Debug for FixedArrayObject<T, N>
where
    T: Send + Sync + 'static + std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drop_census::{DropCensus, Tracked};
    use pretty_assertions::assert_eq;

    #[test]
    fn constructs_and_indexes() {
        let a = ArrayObject::<u32>::new(3);
        assert_eq!(a.size(), 3);
        assert_eq!(&a[..], &[0, 0, 0]);
        assert_eq!(*a.at(2).unwrap(), 0);
        assert_eq!(a.at(3).unwrap_err(), Error::OutOfRange { index: 3, len: 3 });

        let b = ArrayObject::from_array([1u32, 2, 3]);
        assert_eq!(&b[..], &[1, 2, 3]);
        assert_eq!(b.as_view().at(1).copied().unwrap(), 2);

        let c = ArrayObject::<u32>::from_partial([7, 8], 4);
        assert_eq!(&c[..], &[7, 8, 0, 0]);

        let d = ArrayObject::from_slice(&[5i64, 6]);
        let total: i64 = (&d).into_iter().sum();
        assert_eq!(total, 11);
    }

    #[test]
    fn elements_drop_in_reverse_order() {
        let census = DropCensus::new();
        let ids = [10u64, 11, 12];
        let a = ArrayObject::<Tracked<u64>>::from_exact_iter(
            ids.iter().map(|&id| census.track(id, id)),
        );
        assert_eq!(a.size(), 3);
        census.assert_count(0);

        let b = a.clone();
        drop(a);
        census.assert_count(0);

        drop(b);
        census.assert_order(&[12, 11, 10]);
    }

    #[test]
    fn zero_length_is_the_empty_handle() {
        let a = ArrayObject::<u8>::new(0);
        assert!(a.is_null());
        assert_eq!(a.size(), 0);
        assert!(a.data().is_null());
        assert!(a.at(0).is_err());
        assert!(a.as_view().is_empty());
    }

    #[test]
    fn emplace_replaces_the_payload() {
        let mut a = ArrayObject::<u16>::new(2);
        let old = a.clone();
        a.emplace(5);
        assert_eq!(a.size(), 5);
        // The old allocation survives through its other handle.
        assert_eq!(old.size(), 2);
        assert_ne!(a, old);

        a.emplace(0);
        assert!(a.is_null());
    }

    #[test]
    fn round_trips_through_object() {
        let a = ArrayObject::from_array([1u8, 2]);
        let o: Object = a.clone().into();
        assert!(o.is::<[u8]>());

        let b = ArrayObject::<u8>::try_from(o).unwrap();
        assert_eq!(b, a);

        let wrong = ArrayObject::<u16>::try_from(Object::from(a)).unwrap_err();
        assert_eq!(wrong, Error::BadObjectCast);
    }

    #[test]
    fn fixed_arrays_construct_and_index() {
        let a = FixedArrayObject::<u32, 3>::new([1, 2, 3]);
        assert_eq!(a.size(), 3);
        assert_eq!(&a[..], &[1, 2, 3]);
        assert_eq!(a.as_array(), &[1, 2, 3]);
        assert_eq!(*a.at(2).unwrap(), 3);
        assert_eq!(a.at(3).unwrap_err(), Error::OutOfRange { index: 3, len: 3 });

        let b = FixedArrayObject::<u32, 4>::from_partial([7, 8]);
        assert_eq!(&b[..], &[7, 8, 0, 0]);

        let c = FixedArrayObject::<usize, 4>::from_fn(|i| i * i);
        assert_eq!(c.as_view().as_slice(), &[0, 1, 4, 9]);
    }

    #[test]
    fn fixed_array_elements_drop_in_reverse_order() {
        let census = DropCensus::new();
        let mut ids = [20u64, 21, 22].into_iter();
        let a = FixedArrayObject::<Tracked<u64>, 3>::from_fn(|_| {
            let id = ids.next().unwrap();
            census.track(id, id)
        });
        census.assert_count(0);

        let b = a.clone();
        drop(a);
        census.assert_count(0);

        drop(b);
        census.assert_order(&[22, 21, 20]);
    }

    #[test]
    fn fixed_arrays_are_exactly_their_array_type() {
        // No length word: the holder has the layout of a value holder of [T; N], so the exact
        // cast machinery reaches the payload as one.
        assert_eq!(
            crate::holders::fixed_array::elem_offset::<u8, 3>(),
            crate::holders::value::ValueHolder::<[u8; 3]>::PAYLOAD_OFFSET
        );

        let a = FixedArrayObject::<u8, 3>::new([4, 5, 6]);
        let o: Object = a.clone().into();
        assert!(o.is::<[u8; 3]>());
        assert_eq!(o.downcast_ref::<[u8; 3]>().unwrap(), &[4, 5, 6]);

        let back = FixedArrayObject::<u8, 3>::try_from(o).unwrap();
        assert_eq!(back, a);
    }

    #[test]
    fn fixed_and_variable_tags_never_mix() {
        let fixed: Object = FixedArrayObject::<u16, 2>::new([1, 2]).into();
        let variable: Object = ArrayObject::from_array([1u16, 2]).into();

        assert_eq!(
            ArrayObject::<u16>::try_from(fixed.clone()).unwrap_err(),
            Error::BadObjectCast
        );
        assert_eq!(
            FixedArrayObject::<u16, 2>::try_from(variable).unwrap_err(),
            Error::BadObjectCast
        );
        // Wrong length is a different type entirely.
        assert_eq!(
            FixedArrayObject::<u16, 3>::try_from(fixed).unwrap_err(),
            Error::BadObjectCast
        );
        assert_eq!(
            FixedArrayObject::<u16, 2>::try_from(Object::null()).unwrap_err(),
            Error::BadObjectCast
        );
    }
}
