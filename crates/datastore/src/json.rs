//! Conversion between JSON text and documents.
//!
//! # Example
//!
//! ```
//! use datastore::json::{from_json, to_json};
//!
//! let doc = from_json(r#"{"name": "alice", "scores": [1, 2.5]}"#).unwrap();
//! let root = doc.root();
//! let scores = doc.get(root, "scores").unwrap();
//! assert_eq!(doc.get_value(scores, 1).unwrap().as_f32(), Some(2.5));
//!
//! let json = to_json(&doc).unwrap();
//! assert_eq!(json, r#"{"name":"alice","scores":[1,2.5]}"#);
//! ```
//!
//! # Mapping
//!
//! | JSON        | Document                                           |
//! |-------------|----------------------------------------------------|
//! | null        | null, or the erase marker with `null_as_special_erase` |
//! | true/false  | boolean                                            |
//! | integer     | narrowest integer encoding that holds it           |
//! | other number| 32-bit float                                       |
//! | string      | string                                             |
//! | array       | array                                              |
//! | object      | table                                              |
//!
//! File paths are written as their URL strings and read back as plain
//! strings. Only arrays and objects can be the top-level value.

use serde_json::Value as JsonValue;

use crate::document::Document;
use crate::error::{Error, Result};
use crate::node::Node;
use crate::table::table_capacity_for;
use crate::value::{Slot, Value};

/// Options for [`from_json_with`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct JsonOptions {
    /// Store literal `null` as the erase marker, so a hand-written JSON
    /// patch can be fed to [`apply_diff`](crate::apply_diff).
    pub null_as_special_erase: bool,
}

/// Parse JSON text into a new document.
///
/// # Errors
///
/// Returns `Error::JsonParse` if the text is not JSON and
/// `Error::InvalidRoot` if the top-level value is not an array or object.
pub fn from_json(json: &str) -> Result<Document> {
    from_json_with(json, JsonOptions::default())
}

pub fn from_json_with(json: &str, options: JsonOptions) -> Result<Document> {
    let value: JsonValue = serde_json::from_str(json).map_err(|e| Error::JsonParse(e.to_string()))?;
    let mut doc = Document::new();
    let root = match &value {
        JsonValue::Array(items) => doc.make_array(len_u32(items.len())?)?,
        JsonValue::Object(map) => doc.make_table(table_capacity_for(len_u32(map.len())?))?,
        other => {
            return Err(Error::InvalidRoot {
                found: json_type_name(other),
            });
        }
    };
    let mut builder = Builder { doc: &mut doc, options };
    builder.fill(root, &value)?;
    Ok(doc)
}

fn len_u32(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| Error::ArrayTooLarge { length: u32::MAX })
}

fn json_type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "table",
    }
}

struct Builder<'d> {
    doc: &'d mut Document,
    options: JsonOptions,
}

impl Builder<'_> {
    /// Store the children of a JSON array or object into `container`.
    fn fill(&mut self, container: Node, value: &JsonValue) -> Result<()> {
        match value {
            JsonValue::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    self.store(container, Slot::Index(len_u32(i)?), item)?;
                }
            }
            JsonValue::Object(map) => {
                for (key, item) in map {
                    self.store(container, Slot::Key(key), item)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn store(&mut self, container: Node, slot: Slot<'_>, value: &JsonValue) -> Result<()> {
        let doc = &mut *self.doc;
        match value {
            JsonValue::Null if self.options.null_as_special_erase => {
                doc.set_special_erase(container, slot)
            }
            JsonValue::Null => doc.set_null(container, slot),
            JsonValue::Bool(b) => doc.set_bool(container, slot, *b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    doc.set_i64(container, slot, i)
                } else if let Some(u) = n.as_u64() {
                    doc.set_u64(container, slot, u)
                } else {
                    doc.set_f32(container, slot, n.as_f64().unwrap_or(0.0) as f32)
                }
            }
            JsonValue::String(s) => doc.set_string(container, slot, s),
            JsonValue::Array(items) => {
                let array = doc.set_array(container, slot, len_u32(items.len())?)?;
                self.fill(array, value)
            }
            JsonValue::Object(map) => {
                let capacity = table_capacity_for(len_u32(map.len())?);
                let table = doc.set_table(container, slot, capacity)?;
                self.fill(table, value)
            }
        }
    }
}

/// Serialize the document as compact JSON. An empty document is `null`.
///
/// # Errors
///
/// Returns `Error::NonFiniteFloat` for NaN or infinite floats, which JSON
/// cannot represent.
pub fn to_json(doc: &Document) -> Result<String> {
    let root = doc.root();
    doc.check_subtree(root)?;
    let value = node_to_json(doc, root)?;
    serde_json::to_string(&value).map_err(|e| Error::JsonSerialize(e.to_string()))
}

fn float_to_json(f: f32) -> Result<JsonValue> {
    if !f.is_finite() {
        return Err(Error::NonFiniteFloat(f));
    }
    // widen through the shortest decimal so 0.1f32 stays 0.1
    let wide: f64 = f.to_string().parse().map_err(|_| Error::NonFiniteFloat(f))?;
    let number = serde_json::Number::from_f64(wide).ok_or(Error::NonFiniteFloat(f))?;
    Ok(JsonValue::Number(number))
}

fn node_to_json(doc: &Document, node: Node) -> Result<JsonValue> {
    let value = doc.value(node)?;
    Ok(match value {
        Value::Null | Value::SpecialErase => JsonValue::Null,
        Value::Bool(b) => JsonValue::Bool(b),
        Value::Int32(n) => n.into(),
        Value::UInt32(n) => n.into(),
        Value::Int64(n) => n.into(),
        Value::UInt64(n) => n.into(),
        Value::Float32(f) => float_to_json(f)?,
        Value::String(s) => JsonValue::String(s.to_owned()),
        Value::FilePath(path) if path.is_valid() => JsonValue::String(path.to_url()),
        Value::FilePath(_) => JsonValue::Null,
        Value::Array(array) => JsonValue::Array(
            doc.array_iter(array)?
                .map(|child| node_to_json(doc, child))
                .collect::<Result<_>>()?,
        ),
        Value::Table(table) => {
            let mut map = serde_json::Map::new();
            for (key, child) in doc.table_iter(table)? {
                map.insert(key.to_owned(), node_to_json(doc, child)?);
            }
            JsonValue::Object(map)
        }
    })
}
