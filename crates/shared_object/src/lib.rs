//! A unified, reference-counted, type-erased value container.
//!
//! One allocation model underlies everything in this crate: a control block (strong count, weak
//! count, recorded type, per-type operations) followed in the same allocation by a payload.  The
//! payload may be a single value, a variable-length array, a callable, or a head value with a
//! trailing inline array.  On top of that sit a family of handles which differ only in what they
//! point at and what shape they require:
//!
//! - [Object]: the fundamental owning handle, with exact and polymorphic casts.
//! - [WeakObject]: a non-owning observer with upgrade and wait-until-expired.
//! - [ObjectPtr] / [ObjectRef]: shared ownership paired with an interior pointer.
//! - [ArrayObject] and the borrowed [ArrayView]: contiguous element runs.
//! - [StrObject]: a pointer-sized handle to a nul-terminated byte array.
//! - [FnObject] / [FnRef]: owning and borrowed callables with a uniform call contract.
//! - [FamObject]: head plus trailing array sharing one allocation and one refcount.
//! - [AtomicObject]: an atomic handle slot whose low bits double as a mutex and condition
//!   variable.
//!
//! Handles compare by allocation identity, never by payload value.  All counter traffic is
//! relaxed except the release edges that hand a payload to its destructor.  Everything is
//! caller-threaded: the only blocking operations are the atomic cell's lock/wait and
//! [WeakObject::wait_until_expired].

mod alias;
mod array;
mod atomic;
mod control;
mod error;
mod fam;
pub mod ffi;
mod func;
mod holders;
mod object;
mod payload;
mod string;
mod view;
mod wait_queue;
mod weak;

pub use alias::{ObjectPtr, ObjectRef};
pub use array::{ArrayObject, FixedArrayObject};
pub use atomic::AtomicObject;
pub use error::{Error, Result};
pub use fam::FamObject;
pub use func::{Callable, CallableMut, FnObject, FnRef};
pub use object::Object;
pub use payload::Payload;
pub use string::StrObject;
pub use view::ArrayView;
pub use weak::WeakObject;
