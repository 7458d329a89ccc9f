use std::error;
use std::fmt::{self, Display, Formatter};
use std::io;

pub type Result<T> = std::result::Result<T, Error>;

/// Failure conditions surfaced by the reader and writer. Once a writer method
/// has returned an error its internal state is unspecified and the instance
/// should be discarded.
#[derive(Debug)]
pub enum Error {
    /// The constant pool grew past the 65,535 entry limit imposed by the
    /// `u16` pool indices of the class file format.
    ClassTooLarge {
        class: String,
        constant_pool_count: usize,
    },
    /// A method body grew past the 65,535 byte limit of the `Code` attribute.
    MethodTooLarge {
        class: String,
        method: String,
        descriptor: String,
        code_length: usize,
    },
    /// A string did not fit the two byte length prefix of its modified UTF-8
    /// encoding.
    StringTooLong { length: usize },
    /// An opcode or constant kind was used in a context that cannot support
    /// it, e.g. `jsr`/`ret` while frame computation is enabled.
    Unsupported { reason: String },
    /// The input class file could not be decoded.
    MalformedInput { offset: usize, reason: String },
    /// Visitor events arrived out of the order required by the assembly state
    /// machine.
    IllegalState { reason: String },
    Io(io::Error),
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Error::ClassTooLarge {
                class,
                constant_pool_count,
            } => write!(
                f,
                "class {} too large: constant pool has {} entries",
                class, constant_pool_count
            ),
            Error::MethodTooLarge {
                class,
                method,
                descriptor,
                code_length,
            } => write!(
                f,
                "method {}.{}{} too large: code is {} bytes",
                class, method, descriptor, code_length
            ),
            Error::StringTooLong { length } => {
                write!(f, "string too long: {} bytes of modified UTF-8", length)
            }
            Error::Unsupported { reason } => write!(f, "unsupported: {}", reason),
            Error::MalformedInput { offset, reason } => {
                write!(f, "malformed class file at offset {}: {}", offset, reason)
            }
            Error::IllegalState { reason } => write!(f, "illegal state: {}", reason),
            Error::Io(err) => write!(f, "io error: {}", err),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl Error {
    pub(crate) fn malformed<S: Into<String>>(offset: usize, reason: S) -> Self {
        Error::MalformedInput {
            offset,
            reason: reason.into(),
        }
    }

    pub(crate) fn state<S: Into<String>>(reason: S) -> Self {
        Error::IllegalState {
            reason: reason.into(),
        }
    }

    pub(crate) fn unsupported<S: Into<String>>(reason: S) -> Self {
        Error::Unsupported {
            reason: reason.into(),
        }
    }
}
