use std::ffi::CStr;
use std::ptr::NonNull;

use crate::control::ControlBlock;
use crate::error::Error;
use crate::holders::array;
use crate::object::Object;

/// An owning handle to a nul-terminated byte-array holder, exactly one pointer wide.
///
/// The pointer aims at the first byte of the payload rather than the control block; because the
/// element offset of a byte-array holder is a compile-time constant, the control block is always
/// recoverable by walking back from that pointer.  This keeps the handle the size of a `char*`
/// and makes [c_str](StrObject::c_str) free, while still carrying full shared ownership.
///
/// The stored array always ends with a nul byte, which is excluded from [len](StrObject::len).
/// Comparisons are by allocation identity, like every handle in this crate.
pub struct StrObject {
    ptr: Option<NonNull<u8>>,
}

const _: () = assert!(
    std::mem::size_of::<StrObject>() == std::mem::size_of::<*const u8>(),
    "the string handle must stay pointer-sized"
);

/// Offset of the first byte from the control block, fixed for byte arrays.
const PAYLOAD_OFFSET: usize = array::elem_offset::<u8>();

/// What [c_str](StrObject::c_str) points at for the empty handle.
static EMPTY: u8 = 0;

unsafe impl Send for StrObject {}
unsafe impl Sync for StrObject {}

impl StrObject {
    pub const fn null() -> StrObject {
        StrObject { ptr: None }
    }

    /// Copy `text` into a fresh holder, appending the terminator.
    pub fn new(text: &str) -> StrObject {
        Self::from_bytes(text.as_bytes())
    }

    /// Copy a nul-terminated sequence, terminator included.
    pub fn from_c_str(text: &CStr) -> StrObject {
        let bytes = text.to_bytes();
        Self::from_bytes(bytes)
    }

    /// `count` copies of `byte`, then the terminator.
    pub fn from_fill(count: usize, byte: u8) -> StrObject {
        Self::build(count, |_| byte)
    }

    fn from_bytes(bytes: &[u8]) -> StrObject {
        Self::build(bytes.len(), |i| bytes[i])
    }

    fn build(len: usize, mut fill: impl FnMut(usize) -> u8) -> StrObject {
        let stored = len.checked_add(1).expect("string length overflows usize");
        let cb = array::allocate_with::<u8>(stored, |i| if i == len { 0 } else { fill(i) });
        let (data, _) = unsafe { array::parts::<u8>(cb) };
        StrObject { ptr: Some(data) }
    }

    pub fn is_null(&self) -> bool {
        self.ptr.is_none()
    }

    /// Length excluding the terminator; 0 for the empty handle.
    pub fn len(&self) -> usize {
        match self.control() {
            Some(cb) => unsafe { array::parts::<u8>(cb) }.1 - 1,
            None => 0,
        }
    }

    pub fn size(&self) -> usize {
        self.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The first byte of the stored sequence; for the empty handle, a static nul byte.  Never
    /// null.
    pub fn c_str(&self) -> *const u8 {
        match self.ptr {
            Some(p) => p.as_ptr(),
            None => &EMPTY,
        }
    }

    pub fn data(&self) -> *const u8 {
        self.c_str()
    }

    /// The stored bytes without the terminator.
    pub fn as_bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.c_str(), self.len()) }
    }

    /// The stored bytes including the terminator, as a C string.
    pub fn as_c_str(&self) -> &CStr {
        unsafe {
            CStr::from_bytes_with_nul_unchecked(std::slice::from_raw_parts(
                self.c_str(),
                self.len() + 1,
            ))
        }
    }

    pub fn to_str(&self) -> std::result::Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(self.as_bytes())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, u8> {
        self.as_bytes().iter()
    }

    pub fn object(&self) -> Object {
        match self.control() {
            Some(cb) => unsafe {
                ControlBlock::addref_strong(cb);
                Object::from_control(cb)
            },
            None => Object::null(),
        }
    }

    fn control(&self) -> Option<NonNull<ControlBlock>> {
        self.ptr.map(|p| unsafe {
            NonNull::new_unchecked(p.as_ptr().sub(PAYLOAD_OFFSET).cast::<ControlBlock>())
        })
    }
}

impl Default for StrObject {
    fn default() -> StrObject {
        StrObject::null()
    }
}

impl Clone for StrObject {
    fn clone(&self) -> StrObject {
        if let Some(cb) = self.control() {
            unsafe { ControlBlock::addref_strong(cb) };
        }
        StrObject { ptr: self.ptr }
    }
}

impl Drop for StrObject {
    fn drop(&mut self) {
        if let Some(cb) = self.control() {
            unsafe { ControlBlock::release_strong(cb) };
        }
    }
}

impl From<&str> for StrObject {
    fn from(text: &str) -> StrObject {
        StrObject::new(text)
    }
}

/// Adopt a generic handle; it must hold a byte array whose last element is nul.
///
/// The preconditions are verified before taking ownership, so a failed conversion hands the
/// argument back unchanged.
impl TryFrom<Object> for StrObject {
    type Error = (Object, Error);

    fn try_from(object: Object) -> std::result::Result<StrObject, (Object, Error)> {
        if object.is_null() {
            return Ok(StrObject::null());
        }
        if !object.is::<[u8]>() {
            return Err((object, Error::BadObjectCast));
        }
        let cb = object.control().expect("non-null object");
        let (data, len) = unsafe { array::parts::<u8>(cb) };
        let terminated = len > 0 && unsafe { *data.as_ptr().add(len - 1) } == 0;
        if !terminated {
            return Err((object, Error::BadObjectCast));
        }
        // Transfer the strong reference from the generic handle to the string handle.
        std::mem::forget(object);
        Ok(StrObject { ptr: Some(data) })
    }
}

impl From<StrObject> for Object {
    fn from(s: StrObject) -> Object {
        let object = match s.control() {
            Some(cb) => unsafe { Object::from_control(cb) },
            None => Object::null(),
        };
        std::mem::forget(s);
        object
    }
}

impl PartialEq for StrObject {
    fn eq(&self, other: &StrObject) -> bool {
        self.ptr == other.ptr
    }
}

impl Eq for StrObject {}

impl PartialOrd for StrObject {
    fn partial_cmp(&self, other: &StrObject) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for StrObject {
    fn cmp(&self, other: &StrObject) -> std::cmp::Ordering {
        let a = self.ptr.map(|p| p.as_ptr() as usize).unwrap_or(0);
        let b = other.ptr.map(|p| p.as_ptr() as usize).unwrap_or(0);
        a.cmp(&b)
    }
}

impl std::hash::Hash for StrObject {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.ptr.map(|p| p.as_ptr() as usize).unwrap_or(0).hash(state);
    }
}

impl std::fmt::Debug for StrObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StrObject({:?})", String::from_utf8_lossy(self.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::ArrayObject;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn stores_terminated_text() {
        let s = StrObject::new("handle");
        assert_eq!(s.len(), 6);
        assert!(!s.is_empty());
        assert_eq!(s.as_bytes(), b"handle");
        assert_eq!(s.to_str().unwrap(), "handle");
        // The terminator sits one past the reported length.
        assert_eq!(unsafe { *s.data().add(s.len()) }, 0);
        assert_eq!(s.as_c_str().to_bytes(), b"handle");
    }

    #[test]
    fn empty_handle_still_has_a_c_string() {
        let s = StrObject::null();
        assert!(s.is_null());
        assert_eq!(s.len(), 0);
        assert!(!s.c_str().is_null());
        assert_eq!(unsafe { *s.c_str() }, 0);
        assert_eq!(s.as_bytes(), b"");
        assert_eq!(s.as_c_str().to_bytes(), b"");
    }

    #[test]
    fn fill_and_c_str_constructors() {
        let s = StrObject::from_fill(3, b'x');
        assert_eq!(s.as_bytes(), b"xxx");

        let c = CStr::from_bytes_with_nul(b"abc\0").unwrap();
        let s = StrObject::from_c_str(c);
        assert_eq!(s.to_str().unwrap(), "abc");
    }

    #[test]
    fn identity_comparisons() {
        let a = StrObject::new("same");
        let b = StrObject::new("same");
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
        assert_eq!(StrObject::null(), StrObject::default());
    }

    #[test]
    fn adoption_checks_shape_before_taking_ownership() {
        // A terminated byte array converts.
        let ok: Object = ArrayObject::from_array([b'h', b'i', 0]).into();
        let s = StrObject::try_from(ok).unwrap();
        assert_eq!(s.as_bytes(), b"hi");

        // A byte array without a terminator is handed back unchanged.
        let bad: Object = ArrayObject::from_array([b'h', b'i']).into();
        let (bad, err) = StrObject::try_from(bad).unwrap_err();
        assert_eq!(err, Error::BadObjectCast);
        assert_eq!(bad.strong_count(), 1);

        // So is a non-array.
        let (obj, err) = StrObject::try_from(Object::new(5i32)).unwrap_err();
        assert_eq!(err, Error::BadObjectCast);
        assert!(obj.is::<i32>());
    }

    #[test]
    fn object_round_trip_shares_the_allocation() {
        let s = StrObject::new("shared");
        let o = s.object();
        assert_eq!(o.strong_count(), 2);
        assert!(o.is::<[u8]>());

        let s2 = StrObject::try_from(o).unwrap();
        assert_eq!(s2, s);
        assert_eq!(s.object().strong_count(), 3);

        let back: Object = Object::from(s2);
        assert_eq!(back.strong_count(), 2);
    }

    proptest! {
        #[test]
        fn round_trips_arbitrary_text(text in "[^\0]{0,64}") {
            let s = StrObject::new(&text);
            prop_assert_eq!(s.len(), text.len());
            prop_assert_eq!(s.to_str().unwrap(), text.as_str());
            prop_assert_eq!(unsafe { *s.data().add(s.len()) }, 0);
        }
    }
}
