//! A compact, mutable store for JSON-like data.
//!
//! A [`Document`] keeps a tree of values in one relocatable heap of 32-bit
//! words. Scalars that fit are packed into the [`Node`] itself; everything
//! else lives in the heap behind a generation-checked handle, so a node that
//! outlives its value is reported as stale instead of being misread.
//!
//! On top of the storage layer the crate provides garbage collection,
//! integrity checking, structural equality and canonical hashing, deep copy,
//! diff and patch ([`compute_diff`], [`apply_diff`]), a versioned binary
//! format ([`Document::save`], [`Document::load`]), text rendering and a
//! JSON bridge ([`json`]).
//!
//! ```
//! use datastore::{Document, PrintOptions};
//!
//! let mut doc = Document::new();
//! let root = doc.make_table(0).unwrap();
//! doc.set_string(root, "title", "example").unwrap();
//! let sizes = doc.set_array(root, "sizes", 0).unwrap();
//! doc.set_u64(sizes, 0, u64::MAX).unwrap();
//!
//! let bytes = doc.save().unwrap();
//! let loaded = Document::load(&bytes).unwrap();
//! assert!(Document::equals(&doc, doc.root(), &loaded, loaded.root(), false));
//! assert_eq!(
//!     loaded.to_text(loaded.root(), PrintOptions::default().sorted()).unwrap(),
//!     r#"{"sizes":[18446744073709551615],"title":"example"}"#
//! );
//! ```

mod array;
mod codec;
mod copy;
mod diff;
mod digest;
mod document;
mod equals;
mod error;
mod file_path;
mod gc;
mod heap;
mod intern;
mod journal;
pub mod json;
mod node;
mod table;
mod text;
mod value;
mod verify;
pub(crate) mod xxh32;

pub use array::ArrayIter;
pub use copy::Conflicts;
pub use diff::{apply_diff, compute_diff};
pub use document::{Document, MAX_ARRAY_LEN};
pub use error::{Error, Result};
pub use file_path::{FilePath, GameDirectory};
pub use json::JsonOptions;
pub use node::{Handle, Node, NodeType};
pub use table::{TableIter, table_capacity_for};
pub use text::PrintOptions;
pub use value::{Slot, Value};
pub use xxh32::xxh32;
