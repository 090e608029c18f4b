//! Error types for document operations.

use std::fmt;

/// Error type for document operations.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    // Addressing errors
    /// Operation needs an array or table but the node is something else.
    NotAContainer { found: &'static str },
    /// Node refers to a handle that was released, replaced or never issued.
    StaleHandle,
    /// Array index out of bounds.
    IndexOutOfBounds { index: u32, length: u32 },
    /// Key not found in table.
    KeyNotFound,
    /// Expected one type but found another.
    UnexpectedType {
        expected: &'static str,
        found: &'static str,
    },
    /// Requested array length is above the supported maximum.
    ArrayTooLarge { length: u32 },
    /// The handle table cannot grow any further.
    HandlesExhausted,
    /// The heap cannot address any more words.
    HeapExhausted,
    /// The interned string table cannot hold more strings.
    StringTableFull,
    /// Destination entry already exists and conflicts are not allowed.
    KeyExists,
    /// A document root must be an array or a table.
    InvalidRoot { found: &'static str },

    // Corruption errors
    /// Node carries type bits that do not name a known type.
    InvalidNodeType(u32),
    /// Heap contents violate a structural invariant.
    CorruptData,

    // Format errors
    /// Stream does not start with a known signature.
    InvalidSignature,
    /// Stream version is not one this crate can read.
    UnsupportedVersion(u32),
    /// Stream ended before a complete document was read.
    Truncated,
    /// A string table is malformed or a reference into it is invalid.
    InvalidStringTable,
    /// String bytes are not valid UTF-8.
    InvalidUtf8,
    /// Underlying reader or writer failed.
    Io(String),

    // JSON errors
    /// Failed to parse JSON input.
    JsonParse(String),
    /// Failed to serialize to JSON.
    JsonSerialize(String),
    /// f32 is NaN or Infinity (not representable in JSON).
    NonFiniteFloat(f32),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NotAContainer { found } => write!(f, "expected array or table, found {found}"),
            Error::StaleHandle => write!(f, "stale or invalid node handle"),
            Error::IndexOutOfBounds { index, length } => {
                write!(f, "index {index} out of bounds (length={length})")
            }
            Error::KeyNotFound => write!(f, "key not found"),
            Error::UnexpectedType { expected, found } => {
                write!(f, "expected {expected}, found {found}")
            }
            Error::ArrayTooLarge { length } => write!(f, "array length {length} too large"),
            Error::HandlesExhausted => write!(f, "handle table exhausted"),
            Error::HeapExhausted => write!(f, "heap exhausted"),
            Error::StringTableFull => write!(f, "interned string table full"),
            Error::KeyExists => write!(f, "destination entry already exists"),
            Error::InvalidRoot { found } => {
                write!(f, "document root must be array or table, found {found}")
            }
            Error::InvalidNodeType(raw) => write!(f, "invalid node type bits in {raw:#010x}"),
            Error::CorruptData => write!(f, "corrupt heap data"),
            Error::InvalidSignature => write!(f, "invalid signature"),
            Error::UnsupportedVersion(v) => write!(f, "unsupported format version {v}"),
            Error::Truncated => write!(f, "truncated document data"),
            Error::InvalidStringTable => write!(f, "invalid string table"),
            Error::InvalidUtf8 => write!(f, "invalid UTF-8 in string value"),
            Error::Io(msg) => write!(f, "I/O error: {msg}"),
            Error::JsonParse(msg) => write!(f, "JSON parse error: {msg}"),
            Error::JsonSerialize(msg) => write!(f, "JSON serialize error: {msg}"),
            Error::NonFiniteFloat(n) => write!(f, "cannot encode non-finite float {n} as JSON"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::Truncated
        } else {
            Error::Io(e.to_string())
        }
    }
}

/// Result type alias for document operations.
pub type Result<T> = std::result::Result<T, Error>;
