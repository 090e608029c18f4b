//! Typed read view of a node, and container slot addressing.
//!
//! [`Document::value`](crate::Document::value) resolves a [`Node`] against
//! its document and returns a [`Value`] for pattern matching:
//!
//! ```
//! use datastore::{Document, Value};
//!
//! let mut doc = Document::new();
//! let root = doc.make_table(0).unwrap();
//! doc.set_i64(root, "big", 1 << 40).unwrap();
//!
//! let node = doc.get(root, "big").unwrap();
//! match doc.value(node).unwrap() {
//!     Value::Int64(n) => assert_eq!(n, 1 << 40),
//!     other => panic!("unexpected {other:?}"),
//! }
//! ```
//!
//! Numeric getters are lossless conversions that ignore the storage width:
//! a value stored as `Int32Small` reads back through `as_i64`, and a `UInt64`
//! that fits reads back through `as_i32`.

use crate::file_path::FilePath;
use crate::node::Node;

/// Address of an entry inside a container: an array index or a table key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot<'a> {
    Index(u32),
    Key(&'a str),
}

impl From<u32> for Slot<'_> {
    fn from(index: u32) -> Self {
        Slot::Index(index)
    }
}

impl<'a> From<&'a str> for Slot<'a> {
    fn from(key: &'a str) -> Self {
        Slot::Key(key)
    }
}

impl<'a> From<&'a String> for Slot<'a> {
    fn from(key: &'a String) -> Self {
        Slot::Key(key)
    }
}

/// A resolved node.
#[derive(Debug, Clone, PartialEq)]
pub enum Value<'a> {
    Null,
    /// Deleted-entry marker used by diffs.
    SpecialErase,
    Bool(bool),
    /// `Int32Small` or `Int32Big`.
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    /// `Float31` or `Float32`.
    Float32(f32),
    String(&'a str),
    FilePath(FilePath),
    Array(Node),
    Table(Node),
}

impl<'a> Value<'a> {
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::SpecialErase => "special_erase",
            Value::Bool(_) => "boolean",
            Value::Int32(_) => "int32",
            Value::UInt32(_) => "uint32",
            Value::Int64(_) => "int64",
            Value::UInt64(_) => "uint64",
            Value::Float32(_) => "float32",
            Value::String(_) => "string",
            Value::FilePath(_) => "filepath",
            Value::Array(_) => "array",
            Value::Table(_) => "table",
        }
    }

    #[inline]
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Integer value widened to i128, `None` for non-integers.
    #[must_use]
    pub(crate) fn as_integer(&self) -> Option<i128> {
        match *self {
            Value::Int32(n) => Some(i128::from(n)),
            Value::UInt32(n) => Some(i128::from(n)),
            Value::Int64(n) => Some(i128::from(n)),
            Value::UInt64(n) => Some(i128::from(n)),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_number(&self) -> bool {
        matches!(
            self,
            Value::Int32(_) | Value::UInt32(_) | Value::Int64(_) | Value::UInt64(_) | Value::Float32(_)
        )
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Value::Bool(b) => Some(b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i32(&self) -> Option<i32> {
        self.as_integer().and_then(|n| i32::try_from(n).ok())
    }

    #[must_use]
    pub fn as_u32(&self) -> Option<u32> {
        self.as_integer().and_then(|n| u32::try_from(n).ok())
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        self.as_integer().and_then(|n| i64::try_from(n).ok())
    }

    #[must_use]
    pub fn as_u64(&self) -> Option<u64> {
        self.as_integer().and_then(|n| u64::try_from(n).ok())
    }

    /// Any numeric value as f32. Wide integers round to nearest.
    #[must_use]
    pub fn as_f32(&self) -> Option<f32> {
        match *self {
            Value::Float32(f) => Some(f),
            Value::Int32(n) => Some(n as f32),
            Value::UInt32(n) => Some(n as f32),
            Value::Int64(n) => Some(n as f32),
            Value::UInt64(n) => Some(n as f32),
            _ => None,
        }
    }

    /// String contents. Null reads as the empty string.
    #[must_use]
    pub fn as_str(&self) -> Option<&'a str> {
        match *self {
            Value::String(s) => Some(s),
            Value::Null => Some(""),
            _ => None,
        }
    }

    /// File path. Null reads as an invalid path and a string holding a
    /// `dir://relative` URL is parsed.
    #[must_use]
    pub fn as_file_path(&self) -> Option<FilePath> {
        match self {
            Value::FilePath(path) => Some(path.clone()),
            Value::Null => Some(FilePath::default()),
            Value::String(s) => FilePath::parse(s),
            _ => None,
        }
    }

    /// Container node for arrays and tables.
    #[must_use]
    pub fn as_container(&self) -> Option<Node> {
        match *self {
            Value::Array(node) | Value::Table(node) => Some(node),
            _ => None,
        }
    }
}
