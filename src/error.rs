use std::fmt::Display;

/// ZoneDB errors.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// Invalid data on the device or in a decoded structure: corrupt record
    /// headers, manifest decoding failures, duplicate table numbers in a
    /// reclamation batch.
    Corruption(String),
    /// Invalid caller input, typically a bad reader slot or LBA range.
    InvalidArgument(String),
    /// An IO error from the underlying zone device.
    IO(String),
    /// A buffer allocation exceeded the configured memory limit.
    MemoryLimit,
    /// The log does not have enough free space left for the operation.
    NoSpace,
}

impl std::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::Corruption(msg) => write!(f, "corruption: {msg}"),
            Error::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Error::IO(msg) => write!(f, "io error: {msg}"),
            Error::MemoryLimit => write!(f, "buffer memory limit reached"),
            Error::NoSpace => write!(f, "no space left in log"),
        }
    }
}

/// Constructs an Error::Corruption for the given format string.
#[macro_export]
macro_rules! errcorrupt {
    ($($args:tt)*) => { $crate::error::Error::Corruption(format!($($args)*)).into() };
}

/// A ZoneDB Result returning Error.
pub type Result<T> = std::result::Result<T, Error>;

impl<T> From<Error> for Result<T> {
    fn from(error: Error) -> Self {
        Err(error)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IO(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Error::IO(err.to_string())
    }
}
