//! Structural equality between nodes, possibly of different documents.

use crate::document::Document;
use crate::error::{Error, Result};
use crate::node::Node;
use crate::value::Value;

/// True if `f` is a finite integral float equal to `n`.
fn float_equals_integer(f: f32, n: i128) -> bool {
    f.is_finite() && f.fract() == 0.0 && f as i128 == n
}

/// Numeric equality by value, regardless of storage width.
pub(crate) fn numbers_equal(a: &Value<'_>, b: &Value<'_>, nan_equal: bool) -> bool {
    match (a.as_integer(), b.as_integer()) {
        (Some(x), Some(y)) => x == y,
        (Some(x), None) => b.as_f32().is_some_and(|f| float_equals_integer(f, x)),
        (None, Some(y)) => a.as_f32().is_some_and(|f| float_equals_integer(f, y)),
        (None, None) => match (a.as_f32(), b.as_f32()) {
            (Some(x), Some(y)) if x.is_nan() && y.is_nan() => nan_equal,
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
    }
}

impl Document {
    /// Compare `node_a` of `a` with `node_b` of `b`.
    ///
    /// Arrays compare element by element, tables as sets of key/value pairs.
    /// Numbers compare by value across storage widths, so an integral float
    /// equals the same integer. NaN never equals NaN unless `nan_equal` is
    /// set. File paths compare their relative part case-insensitively. A
    /// stale or corrupt node is unequal to everything.
    #[must_use]
    pub fn equals(a: &Document, node_a: Node, b: &Document, node_b: Node, nan_equal: bool) -> bool {
        if a.check_subtree(node_a).is_err() || b.check_subtree(node_b).is_err() {
            return false;
        }
        nodes_equal(a, node_a, b, node_b, nan_equal).unwrap_or(false)
    }
}

/// Recursive comparison; both subtrees must already have passed
/// `check_subtree`.
pub(crate) fn nodes_equal(a: &Document, node_a: Node, b: &Document, node_b: Node, nan_equal: bool) -> Result<bool> {
    let va = a.value(node_a)?;
    let vb = b.value(node_b)?;
    if va.is_number() && vb.is_number() {
        return Ok(numbers_equal(&va, &vb, nan_equal));
    }
    Ok(match (&va, &vb) {
        (Value::Null, Value::Null) | (Value::SpecialErase, Value::SpecialErase) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::FilePath(x), Value::FilePath(y)) => x.same_file(y),
        (Value::Array(x), Value::Array(y)) => {
            if a.array_count(*x)? != b.array_count(*y)? {
                return Ok(false);
            }
            for (ea, eb) in a.array_iter(*x)?.zip(b.array_iter(*y)?) {
                if !nodes_equal(a, ea, b, eb, nan_equal)? {
                    return Ok(false);
                }
            }
            true
        }
        (Value::Table(x), Value::Table(y)) => {
            if a.table_count(*x)? != b.table_count(*y)? {
                return Ok(false);
            }
            for (key, ea) in a.table_iter(*x)? {
                let eb = match b.table_get(*y, key) {
                    Ok(node) => node,
                    Err(Error::KeyNotFound) => return Ok(false),
                    Err(e) => return Err(e),
                };
                if !nodes_equal(a, ea, b, eb, nan_equal)? {
                    return Ok(false);
                }
            }
            true
        }
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_path::FilePath;

    fn pair() -> (Document, Document) {
        let mut a = Document::new();
        a.make_table(0).unwrap();
        let mut b = Document::new();
        b.make_table(0).unwrap();
        (a, b)
    }

    fn roots_equal(a: &Document, b: &Document, nan_equal: bool) -> bool {
        Document::equals(a, a.root(), b, b.root(), nan_equal)
    }

    #[test]
    fn test_number_widths_compare_by_value() {
        let (mut a, mut b) = pair();
        let (ra, rb) = (a.root(), b.root());
        a.set_i32(ra, "n", 5).unwrap();
        b.set_u64(rb, "n", 5).unwrap();
        assert!(roots_equal(&a, &b, false));

        a.set_f32(ra, "f", 8.5).unwrap();
        b.set_f32(rb, "f", 8.5).unwrap();
        assert!(roots_equal(&a, &b, false));

        b.set_i64(rb, "n", 6).unwrap();
        assert!(!roots_equal(&a, &b, false));
    }

    #[test]
    fn test_integral_float_equals_integer() {
        let x = Value::Float32(3.0e9);
        assert!(numbers_equal(&x, &Value::UInt32(3_000_000_000), false));
        assert!(!numbers_equal(&Value::Float32(2.5), &Value::Int32(2), false));
        assert!(!numbers_equal(&Value::Float32(f32::INFINITY), &Value::Int64(i64::MAX), false));
    }

    #[test]
    fn test_nan_equality_is_opt_in() {
        let (mut a, mut b) = pair();
        a.set_f32(a.root(), "x", f32::NAN).unwrap();
        b.set_f32(b.root(), "x", f32::NAN).unwrap();
        assert!(!roots_equal(&a, &b, false));
        assert!(roots_equal(&a, &b, true));
    }

    #[test]
    fn test_tables_ignore_insertion_order() {
        let (mut a, mut b) = pair();
        for (i, key) in ["x", "y", "z"].iter().enumerate() {
            a.set_i32(a.root(), *key, i as i32).unwrap();
        }
        for (i, key) in ["z", "y", "x"].iter().enumerate() {
            b.set_i32(b.root(), *key, 2 - i as i32).unwrap();
        }
        assert!(roots_equal(&a, &b, false));
        b.erase(b.root(), "z").unwrap();
        assert!(!roots_equal(&a, &b, false));
    }

    #[test]
    fn test_arrays_are_positional() {
        let mut a = Document::new();
        let ra = a.make_array(0).unwrap();
        a.set_string(ra, 0, "one").unwrap();
        a.set_string(ra, 1, "two").unwrap();
        let mut b = Document::new();
        let rb = b.make_array(0).unwrap();
        b.set_string(rb, 0, "two").unwrap();
        b.set_string(rb, 1, "one").unwrap();
        assert!(!roots_equal(&a, &b, false));
    }

    #[test]
    fn test_type_mismatch_and_null() {
        let (mut a, mut b) = pair();
        a.set_null(a.root(), "k").unwrap();
        b.set_string(b.root(), "k", "").unwrap();
        assert!(!roots_equal(&a, &b, false));
        assert!(!Document::equals(&a, a.root(), &Document::new(), Node::NULL, false));
        assert!(Document::equals(&Document::new(), Node::NULL, &Document::new(), Node::NULL, false));
    }

    #[test]
    fn test_file_paths_ignore_case() {
        let (mut a, mut b) = pair();
        a.set_file_path(a.root(), "p", &FilePath::parse("content://Tex/A.png").unwrap())
            .unwrap();
        b.set_file_path(b.root(), "p", &FilePath::parse("content://tex/a.PNG").unwrap())
            .unwrap();
        assert!(roots_equal(&a, &b, false));
    }

    #[test]
    fn test_stale_node_is_unequal() {
        let (mut a, _) = pair();
        let root = a.root();
        a.set_string(root, "s", "x").unwrap();
        let stale = a.get(root, "s").unwrap();
        a.erase(root, "s").unwrap();
        assert!(!Document::equals(&a, stale, &a, stale, true));
    }
}
