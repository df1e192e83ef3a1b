#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("the object does not hold the requested type")]
    BadObjectCast,

    #[error("the object is empty or not callable with the requested signature")]
    ObjectNotFn,

    #[error("the weak object has expired")]
    BadWeakObject,

    #[error("index {index} is out of bounds for length {len}")]
    OutOfRange { index: usize, len: usize },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
