
//! Error type definitions.

use std::borrow::Cow;
use std::convert::TryFrom;
use std::fmt;

/// A result that, if successful, contains `T`.
pub type Result<T> = std::result::Result<T, Error>;

/// A result that contains no value on success.
pub type UnitResult = Result<()>;

pub use std::io::Error as IoError;
pub use std::io::Result as IoResult;


/// An error that occurred while opening, reading or writing a raster file.
#[derive(Debug)]
pub enum Error {

    /// Reading or seeking the underlying byte stream failed.
    /// Also raised when a read ends before the record it belongs to does.
    Io(IoError),

    /// The file contents do not form a valid raster file.
    /// Contains a description of the place that was found to be invalid.
    InvalidFile(Cow<'static, str>),

    /// An argument did not satisfy the operation's requirements.
    InvalidParameter(Cow<'static, str>),

    /// The operation requires an access mode the file was not opened with,
    /// for example writing to a raster opened read-only.
    FileAccess,

    /// An element or metadata name does not follow the identifier grammar.
    BadName(Cow<'static, str>),

    /// Two elements were given the same name.
    NameNotUnique,

    /// The raster geometry is unusable, for example zero rows
    /// or more tiles than a signed 32-bit index can address.
    BadRasterSpec(Cow<'static, str>),

    /// An element definition is unusable, for example `min > max`.
    BadElementSpec(Cow<'static, str>),

    /// Integer-coded-float parameters are unusable,
    /// for example a zero or non-finite scale.
    BadIcfParameters,

    /// A grid, model or geographic coordinate lies outside the raster.
    CoordinateOutOfBounds,

    /// No element with the requested name or index exists in this raster.
    ElementNotFound,

    /// A tile payload references a codec that does not implement
    /// the capability required to decode or encode it.
    CompressionNotImplemented,

    /// A counter cell already holds `i32::MAX` and cannot be incremented.
    CounterOverflow,
}


impl Error {

    /// Create an error describing an invalid file structure.
    pub fn invalid(message: impl Into<Cow<'static, str>>) -> Self {
        Error::InvalidFile(message.into())
    }

    /// Create an error describing an invalid argument.
    pub fn parameter(message: impl Into<Cow<'static, str>>) -> Self {
        Error::InvalidParameter(message.into())
    }

    /// Create an error describing an unusable raster geometry.
    pub fn raster_spec(message: impl Into<Cow<'static, str>>) -> Self {
        Error::BadRasterSpec(message.into())
    }

    /// Create an error describing an unusable element definition.
    pub fn element_spec(message: impl Into<Cow<'static, str>>) -> Self {
        Error::BadElementSpec(message.into())
    }
}

/// Enable using the `?` operator on io::Result
impl From<IoError> for Error {
    fn from(error: IoError) -> Self {
        Error::Io(error)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(source) => Some(source),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(error) => write!(formatter, "io error: {}", error),
            Error::InvalidFile(message) => write!(formatter, "invalid raster file: {}", message),
            Error::InvalidParameter(message) => write!(formatter, "invalid parameter: {}", message),
            Error::FileAccess => write!(formatter, "operation requires a different file access mode"),
            Error::BadName(name) => write!(formatter, "invalid identifier `{}`", name),
            Error::NameNotUnique => write!(formatter, "name is already in use"),
            Error::BadRasterSpec(message) => write!(formatter, "invalid raster specification: {}", message),
            Error::BadElementSpec(message) => write!(formatter, "invalid element specification: {}", message),
            Error::BadIcfParameters => write!(formatter, "invalid integer-coded-float parameters"),
            Error::CoordinateOutOfBounds => write!(formatter, "coordinate out of bounds"),
            Error::ElementNotFound => write!(formatter, "no such element"),
            Error::CompressionNotImplemented => write!(formatter, "codec capability not implemented"),
            Error::CounterOverflow => write!(formatter, "counter overflow"),
        }
    }
}


/// Convert a `usize` to `i32`, returning an error on overflow.
#[inline]
pub fn usize_to_i32(value: usize, name: &'static str) -> Result<i32> {
    i32::try_from(value).map_err(|_| Error::parameter(name))
}

/// Convert an `i32` to `usize`, returning an error for negative numbers.
#[inline]
pub fn i32_to_usize(value: i32, name: &'static str) -> Result<usize> {
    usize::try_from(value).map_err(|_| Error::invalid(name))
}

/// Convert an `i64` to `u64`, returning an error for negative numbers.
#[inline]
pub fn i64_to_u64(value: i64, name: &'static str) -> Result<u64> {
    u64::try_from(value).map_err(|_| Error::invalid(name))
}
