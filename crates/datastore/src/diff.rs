//! Structural diffs between documents and their application.
//!
//! A diff is itself a [`Document`]. For table roots it holds only the keys
//! that changed: new or changed values are stored as-is, removed keys as
//! [`Value::SpecialErase`](crate::Value::SpecialErase), and tables that
//! differ as nested diffs. Arrays are never diffed element-wise; a changed
//! array is carried whole.
//!
//! ```
//! use datastore::{Document, apply_diff, compute_diff};
//!
//! let mut a = Document::new();
//! let ra = a.make_table(0).unwrap();
//! a.set_i32(ra, "kept", 1).unwrap();
//! a.set_i32(ra, "dropped", 2).unwrap();
//!
//! let mut b = Document::new();
//! let rb = b.make_table(0).unwrap();
//! b.set_i32(rb, "kept", 1).unwrap();
//! b.set_string(rb, "added", "new").unwrap();
//!
//! let diff = compute_diff(&a, &b).unwrap();
//! apply_diff(&diff, &mut a).unwrap();
//! assert!(Document::equals(&a, a.root(), &b, b.root(), true));
//! ```

use tracing::debug;

use crate::copy::Conflicts;
use crate::document::Document;
use crate::equals::nodes_equal;
use crate::error::{Error, Result};
use crate::journal::Journal;
use crate::node::{Node, NodeType};
use crate::table::table_capacity_for;
use crate::value::{Slot, Value};

/// Diff that turns `a` into `b` when applied with [`apply_diff`].
pub fn compute_diff(a: &Document, b: &Document) -> Result<Document> {
    a.check_integrity()?;
    b.check_integrity()?;

    let (root_a, root_b) = (a.root(), b.root());
    let Some(kind_a) = root_a.node_type().filter(|_| !root_a.is_null()) else {
        return copy_of(b);
    };
    if root_b.is_null() {
        let mut empty = Document::new();
        make_root(&mut empty, kind_a, 0)?;
        return compute_diff(a, &empty);
    }
    if root_b.node_type() != Some(kind_a) || kind_a == NodeType::Array {
        return copy_of(b);
    }

    let mut diff = Document::new();
    let root = diff.make_table(0)?;
    let changes = diff.journaled(|diff, journal| diff_tables(a, root_a, b, root_b, diff, root, journal))?;
    debug!(changes, "computed diff");
    Ok(diff)
}

/// Apply `diff` to `target`. Either the whole diff is applied or, on error,
/// `target` is left unchanged.
pub fn apply_diff(diff: &Document, target: &mut Document) -> Result<()> {
    diff.check_integrity()?;
    target.check_integrity()?;
    let diff_root = diff.root();
    if diff_root.is_null() {
        return Ok(());
    }
    let (kind, _) = diff.container(diff_root)?;

    let root = target.root();
    if root.node_type() == Some(kind) {
        target.journaled(|doc, journal| apply_node(diff, diff_root, doc, root, journal))?;
    } else {
        // a new root replaces everything, so build it beside the target
        let mut fresh = Document {
            heap: target.heap.detached(),
            ..Document::default()
        };
        let root = make_root(&mut fresh, kind, 0)?;
        fresh.journaled(|doc, journal| apply_node(diff, diff_root, doc, root, journal))?;
        target.swap(&mut fresh);
    }
    debug!(kind = kind.name(), "applied diff");
    Ok(())
}

fn make_root(doc: &mut Document, kind: NodeType, capacity: u32) -> Result<Node> {
    match kind {
        NodeType::Array => doc.make_array(capacity),
        NodeType::Table => doc.make_table(capacity),
        other => Err(Error::InvalidRoot { found: other.name() }),
    }
}

/// Fresh document holding a copy of `src`.
fn copy_of(src: &Document) -> Result<Document> {
    let mut out = Document::new();
    let root = src.root();
    let Some(kind) = root.node_type().filter(|_| !root.is_null()) else {
        return Ok(out);
    };
    let capacity = match kind {
        NodeType::Table => table_capacity_for(src.count(root)?),
        _ => src.count(root)?,
    };
    let dest = make_root(&mut out, kind, capacity)?;
    out.journaled(|out, journal| out.copy_contents(journal, src, root, dest, Conflicts::Fail))?;
    Ok(out)
}

fn is_table(node: Node) -> bool {
    node.node_type() == Some(NodeType::Table)
}

fn diff_tables(
    a: &Document,
    table_a: Node,
    b: &Document,
    table_b: Node,
    diff: &mut Document,
    out: Node,
    journal: &mut Journal,
) -> Result<usize> {
    let mut changes = 0;
    // additions and changes
    for (key, node_b) in b.table_iter(table_b)? {
        let node_a = match a.table_get(table_a, key) {
            Ok(node) => Some(node),
            Err(Error::KeyNotFound) => None,
            Err(e) => return Err(e),
        };
        match node_a {
            Some(node_a) if nodes_equal(a, node_a, b, node_b, true)? => {}
            Some(node_a) if is_table(node_a) && is_table(node_b) => {
                let sub = diff.journal_container(journal, out, Slot::Key(key), NodeType::Table, 0)?;
                changes += diff_tables(a, node_a, b, node_b, diff, sub, journal)?;
            }
            _ => {
                diff.copy_entry(journal, b, node_b, out, Slot::Key(key), Conflicts::Fail)?;
                changes += 1;
            }
        }
    }
    // removals
    for (key, _) in a.table_iter(table_a)? {
        if !b.table_contains_key(table_b, key)? {
            diff.journal_store(journal, out, Slot::Key(key), Node::SPECIAL_ERASE)?;
            changes += 1;
        }
    }
    Ok(changes)
}

fn apply_node(diff: &Document, from: Node, target: &mut Document, to: Node, journal: &mut Journal) -> Result<()> {
    match diff.container(from)?.0 {
        NodeType::Array => apply_array(diff, from, target, to, journal),
        _ => apply_table(diff, from, target, to, journal),
    }
}

fn apply_table(diff: &Document, from: Node, target: &mut Document, to: Node, journal: &mut Journal) -> Result<()> {
    for (key, node) in diff.table_iter(from)? {
        match diff.value(node)? {
            Value::SpecialErase => {
                if target.table_contains_key(to, key)? {
                    target.journal_remove(journal, to, key)?;
                }
            }
            Value::Table(sub) => {
                let existing = target.table_get(to, key).ok().filter(|n| is_table(*n));
                let dest = match existing {
                    Some(dest) => dest,
                    None => target.journal_container(journal, to, Slot::Key(key), NodeType::Table, 0)?,
                };
                apply_table(diff, sub, target, dest, journal)?;
            }
            _ => target.copy_entry(journal, diff, node, to, Slot::Key(key), Conflicts::Fail)?,
        }
    }
    Ok(())
}

fn apply_array(diff: &Document, from: Node, target: &mut Document, to: Node, journal: &mut Journal) -> Result<()> {
    let len = diff.array_count(from)?;
    if target.array_count(to)? != len {
        target.journal_resize(journal, to, len)?;
    }
    for (index, node) in diff.array_iter(from)?.enumerate() {
        let index = index as u32;
        let current = target.array_get(to, index)?;
        if nodes_equal(target, current, diff, node, true)? {
            continue;
        }
        target.copy_entry(journal, diff, node, to, Slot::Index(index), Conflicts::Fail)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_with(entries: &[(&str, i32)]) -> Document {
        let mut doc = Document::new();
        let root = doc.make_table(0).unwrap();
        for (key, value) in entries {
            doc.set_i32(root, *key, *value).unwrap();
        }
        doc
    }

    fn same(a: &Document, b: &Document) -> bool {
        Document::equals(a, a.root(), b, b.root(), true)
    }

    #[test]
    fn test_round_trip() {
        let mut a = table_with(&[("x", 1), ("y", 2), ("z", 3)]);
        let b = table_with(&[("x", 1), ("y", 20), ("w", 4)]);
        let diff = compute_diff(&a, &b).unwrap();
        assert_eq!(diff.count(diff.root()).unwrap(), 3);
        apply_diff(&diff, &mut a).unwrap();
        assert!(same(&a, &b));
    }

    #[test]
    fn test_self_diff_is_a_no_op() {
        let a = table_with(&[("x", 1), ("y", 2)]);
        let diff = compute_diff(&a, &a).unwrap();
        assert_eq!(diff.count(diff.root()).unwrap(), 0);
        let mut target = a.clone();
        apply_diff(&diff, &mut target).unwrap();
        assert!(Document::byte_for_byte_eq(&a, &target));
    }

    #[test]
    fn test_nested_tables_diff_recursively() {
        let mut a = Document::new();
        let ra = a.make_table(0).unwrap();
        let inner = a.set_table(ra, "inner", 0).unwrap();
        a.set_i32(inner, "same", 1).unwrap();
        a.set_i32(inner, "gone", 2).unwrap();

        let mut b = a.clone();
        let inner_b = b.get(b.root(), "inner").unwrap();
        b.erase(inner_b, "gone").unwrap();
        b.set_bool(inner_b, "new", true).unwrap();

        let diff = compute_diff(&a, &b).unwrap();
        let sub = diff.get(diff.root(), "inner").unwrap();
        assert!(sub.is_table());
        assert!(matches!(diff.get_value(sub, "gone").unwrap(), Value::SpecialErase));
        assert_eq!(diff.get_value(sub, "new").unwrap().as_bool(), Some(true));
        assert!(!diff.contains(sub, "same").unwrap());

        apply_diff(&diff, &mut a).unwrap();
        assert!(same(&a, &b));
    }

    #[test]
    fn test_array_roots_are_replaced_whole() {
        let mut a = Document::new();
        let ra = a.make_array(0).unwrap();
        for i in 0..5 {
            a.set_i32(ra, i, i as i32).unwrap();
        }
        let mut b = Document::new();
        let rb = b.make_array(0).unwrap();
        b.set_string(rb, 0, "only").unwrap();

        let diff = compute_diff(&a, &b).unwrap();
        assert!(same(&diff, &b));
        apply_diff(&diff, &mut a).unwrap();
        assert!(same(&a, &b));
        assert_eq!(a.count(a.root()).unwrap(), 1);
    }

    #[test]
    fn test_null_roots() {
        let a = table_with(&[("x", 1)]);
        let empty = Document::new();

        let from_nothing = compute_diff(&empty, &a).unwrap();
        assert!(same(&from_nothing, &a));

        let to_nothing = compute_diff(&a, &empty).unwrap();
        assert!(matches!(
            to_nothing.get_value(to_nothing.root(), "x").unwrap(),
            Value::SpecialErase
        ));

        let mut target = a.clone();
        apply_diff(&empty, &mut target).unwrap();
        assert!(Document::byte_for_byte_eq(&a, &target));

        let mut target = Document::new();
        apply_diff(&to_nothing, &mut target).unwrap();
        assert!(target.root().is_table());
        assert_eq!(target.count(target.root()).unwrap(), 0);
    }

    #[test]
    fn test_root_kind_change() {
        let a = table_with(&[("x", 1)]);
        let mut b = Document::new();
        let rb = b.make_array(0).unwrap();
        b.set_i32(rb, 0, 9).unwrap();
        let diff = compute_diff(&a, &b).unwrap();
        assert!(diff.root().is_array());
        let mut target = a.clone();
        apply_diff(&diff, &mut target).unwrap();
        assert!(same(&target, &b));
    }

    #[test]
    fn test_apply_edits_target_in_place() {
        let mut target = Document::with_capacity(1 << 16);
        let root = target.make_table(0).unwrap();
        target.set_string(root, "kept", "same").unwrap();
        target.set_i32(root, "dropped", 1).unwrap();
        let kept = target.get(root, "kept").unwrap();

        let mut b = Document::new();
        let rb = b.make_table(0).unwrap();
        b.set_string(rb, "kept", "same").unwrap();
        b.set_u64(rb, "added", u64::MAX).unwrap();

        let diff = compute_diff(&target, &b).unwrap();
        apply_diff(&diff, &mut target).unwrap();
        assert!(same(&target, &b));
        assert!(target.heap_capacity_in_bytes() >= 1 << 16);
        assert_eq!(target.value(kept).unwrap().as_str(), Some("same"));
        assert!(target.verify_integrity());
    }

    #[test]
    fn test_erase_is_idempotent() {
        let a = table_with(&[("x", 1), ("y", 2)]);
        let b = table_with(&[("y", 2)]);
        let diff = compute_diff(&a, &b).unwrap();

        let mut target = b.clone();
        apply_diff(&diff, &mut target).unwrap();
        assert!(same(&target, &b));
        assert!(!target.contains(target.root(), "x").unwrap());

        let mut fresh = Document::new();
        apply_diff(&diff, &mut fresh).unwrap();
        assert_eq!(fresh.count(fresh.root()).unwrap(), 0);
    }

    #[test]
    fn test_nan_values_are_unchanged() {
        let mut a = Document::new();
        let root = a.make_table(0).unwrap();
        a.set_f32(root, "nan", f32::NAN).unwrap();
        let diff = compute_diff(&a, &a.clone()).unwrap();
        assert_eq!(diff.count(diff.root()).unwrap(), 0);
    }
}
