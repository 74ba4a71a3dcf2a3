//! Error type and Return values used by the Serialization.

use core::fmt::Display;

use serde::ser;

/// Represents all possible errors that can happen during Serialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The value contains a type that has no canonical representation.
    ///
    /// Floating point numbers, chars and maps are rejected instead of being
    /// given an arbitrary encoding: two implementations must never disagree
    /// on the bytes that get hashed and signed.
    TypeNotRepresentable(&'static str),
    /// A `Serialize` implementation reported an error of its own.
    Custom,
}

impl ser::Error for Error {
    fn custom<T>(_: T) -> Self
    where
        T: core::fmt::Display,
    {
        Error::Custom
    }
}
#[cfg(feature = "std")]
impl ser::StdError for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::TypeNotRepresentable(type_name) => {
                f.write_str("type has no canonical encoding: ")?;
                f.write_str(type_name)
            }
            Error::Custom => f.write_str("custom serialization error"),
        }
    }
}

/// Alias for `Result` using the [Error] returned by the Serializer.
pub type Result<T> = core::result::Result<T, Error>;
