//! JSON-like text rendering.
//!
//! Output is JSON except for non-finite floats, which render as `NaN`,
//! `Infinity` and `-Infinity`. Deleted-entry markers render as `null`, as do
//! file paths without a directory.

use std::fmt::Write;

use crate::document::Document;
use crate::error::{Error, Result};
use crate::node::Node;
use crate::value::Value;

/// Formatting switches for [`Document::to_text`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PrintOptions {
    /// Put each table entry on its own line, indented with tabs.
    pub multiline: bool,
    /// Write table entries in byte order of their keys instead of slot
    /// order.
    pub sort_keys: bool,
}

impl PrintOptions {
    #[must_use]
    pub fn multiline() -> Self {
        PrintOptions {
            multiline: true,
            ..PrintOptions::default()
        }
    }

    #[must_use]
    pub fn sorted(self) -> Self {
        PrintOptions {
            sort_keys: true,
            ..self
        }
    }
}

fn write_float(out: &mut String, f: f32) {
    if f.is_nan() {
        out.push_str("NaN");
    } else if f.is_infinite() {
        out.push_str(if f < 0.0 { "-Infinity" } else { "Infinity" });
    } else {
        let _ = write!(out, "{f}");
    }
}

fn write_quoted(out: &mut String, s: &str) -> Result<()> {
    let quoted = serde_json::to_string(s).map_err(|e| Error::JsonSerialize(e.to_string()))?;
    out.push_str(&quoted);
    Ok(())
}

fn newline(out: &mut String, depth: usize) {
    out.push('\n');
    out.extend(std::iter::repeat_n('\t', depth));
}

impl Document {
    /// Render `node` and everything below it.
    pub fn to_text(&self, node: Node, options: PrintOptions) -> Result<String> {
        self.check_subtree(node)?;
        let mut out = String::new();
        self.write_text(&mut out, node, options, 0)?;
        Ok(out)
    }

    fn write_text(&self, out: &mut String, node: Node, options: PrintOptions, depth: usize) -> Result<()> {
        let value = self.value(node)?;
        if let Some(n) = value.as_integer() {
            let _ = write!(out, "{n}");
            return Ok(());
        }
        match value {
            Value::Null | Value::SpecialErase => out.push_str("null"),
            Value::Bool(b) => out.push_str(if b { "true" } else { "false" }),
            Value::Float32(f) => write_float(out, f),
            Value::String(s) => write_quoted(out, s)?,
            Value::FilePath(path) if path.is_valid() => write_quoted(out, &path.to_url())?,
            Value::FilePath(_) => out.push_str("null"),
            Value::Array(array) => {
                out.push('[');
                for (i, child) in self.array_iter(array)?.enumerate() {
                    if i > 0 {
                        out.push_str(if options.multiline { ", " } else { "," });
                    }
                    self.write_text(out, child, options, depth)?;
                }
                out.push(']');
            }
            Value::Table(table) => {
                let mut entries: Vec<(&str, Node)> = self.table_iter(table)?.collect();
                if options.sort_keys {
                    entries.sort_unstable_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));
                }
                out.push('{');
                for (i, (key, child)) in entries.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    if options.multiline {
                        newline(out, depth + 1);
                    }
                    write_quoted(out, key)?;
                    out.push(':');
                    self.write_text(out, *child, options, depth + 1)?;
                }
                if options.multiline && !entries.is_empty() {
                    newline(out, depth);
                }
                out.push('}');
            }
            // integers were written above
            Value::Int32(_) | Value::UInt32(_) | Value::Int64(_) | Value::UInt64(_) => {}
        }
        Ok(())
    }
}
