//! Copying values between documents and moving nodes inside one.

use crate::document::Document;
use crate::error::{Error, Result};
use crate::journal::Journal;
use crate::node::{Node, NodeType};
use crate::table::table_capacity_for;
use crate::value::{Slot, Value};

/// What [`Document::deep_copy`] does when the destination already has an
/// entry at a slot the source also fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Conflicts {
    /// Abort with [`Error::KeyExists`]; the destination is left untouched.
    #[default]
    Fail,
    /// Replace the existing entry. A container replacing a container of the
    /// same kind is merged into it instead.
    Overwrite,
    /// Leave the existing entry as it is.
    Keep,
}

impl Document {
    /// Copy every entry of container `from_node` in `from` into container
    /// `to_node` of this document. Both must be the same kind of container.
    ///
    /// On error nothing is copied.
    pub fn deep_copy(
        &mut self,
        from: &Document,
        from_node: Node,
        to_node: Node,
        conflicts: Conflicts,
    ) -> Result<()> {
        from.check_subtree(from_node)?;
        self.check_copy(from, from_node, to_node, conflicts)?;
        self.journaled(|doc, journal| doc.copy_contents(journal, from, from_node, to_node, conflicts))
    }

    /// Copy the single value `value` of `from` into `slot` of `to_container`,
    /// replacing whatever was there. Containers are copied recursively.
    pub fn copy_value<'k>(
        &mut self,
        from: &Document,
        value: Node,
        to_container: Node,
        slot: impl Into<Slot<'k>>,
    ) -> Result<()> {
        from.check_subtree(value)?;
        let slot = slot.into();
        self.check_slot(to_container, slot)?;
        self.journaled(|doc, journal| {
            doc.copy_entry(journal, from, value, to_container, slot, Conflicts::Fail)
        })
    }

    /// Refuse a copy whose container kinds differ or that would hit an
    /// occupied slot under [`Conflicts::Fail`]. Nested containers are copied
    /// into fresh slots, so only the top level can conflict.
    fn check_copy(&self, from: &Document, from_node: Node, to_node: Node, conflicts: Conflicts) -> Result<()> {
        let (from_ty, _) = from.container(from_node)?;
        let (to_ty, _) = self.container(to_node)?;
        if from_ty != to_ty {
            return Err(Error::UnexpectedType {
                expected: from_ty.name(),
                found: to_ty.name(),
            });
        }
        if conflicts != Conflicts::Fail {
            return Ok(());
        }
        if from_ty == NodeType::Array {
            if from.array_count(from_node)? > 0 && self.array_count(to_node)? > 0 {
                return Err(Error::KeyExists);
            }
            return Ok(());
        }
        for (key, _) in from.table_iter(from_node)? {
            if self.table_contains_key(to_node, key)? {
                return Err(Error::KeyExists);
            }
        }
        Ok(())
    }

    pub(crate) fn copy_contents(
        &mut self,
        journal: &mut Journal,
        from: &Document,
        from_node: Node,
        to_node: Node,
        conflicts: Conflicts,
    ) -> Result<()> {
        let (from_ty, _) = from.container(from_node)?;
        let (to_ty, _) = self.container(to_node)?;
        if from_ty != to_ty {
            return Err(Error::UnexpectedType {
                expected: from_ty.name(),
                found: to_ty.name(),
            });
        }

        if from_ty == NodeType::Array {
            for (index, child) in from.array_iter(from_node)?.enumerate() {
                let slot = Slot::Index(index as u32);
                if self.resolve_conflict(to_node, slot, conflicts)? {
                    self.copy_entry(journal, from, child, to_node, slot, conflicts)?;
                }
            }
        } else {
            for (key, child) in from.table_iter(from_node)? {
                let slot = Slot::Key(key);
                if self.resolve_conflict(to_node, slot, conflicts)? {
                    self.copy_entry(journal, from, child, to_node, slot, conflicts)?;
                }
            }
        }
        Ok(())
    }

    /// Whether a copy into an occupied slot should proceed.
    fn resolve_conflict(&self, container: Node, slot: Slot<'_>, conflicts: Conflicts) -> Result<bool> {
        if !self.contains(container, slot)? {
            return Ok(true);
        }
        match conflicts {
            Conflicts::Fail => Err(Error::KeyExists),
            Conflicts::Overwrite => Ok(true),
            Conflicts::Keep => Ok(false),
        }
    }

    pub(crate) fn copy_entry(
        &mut self,
        journal: &mut Journal,
        from: &Document,
        node: Node,
        container: Node,
        slot: Slot<'_>,
        conflicts: Conflicts,
    ) -> Result<()> {
        match from.value(node)? {
            Value::Array(src) => {
                let dest = match self.mergeable(container, slot, NodeType::Array, conflicts) {
                    Some(dest) => dest,
                    None => {
                        let capacity = from.array_count(src)?;
                        self.journal_container(journal, container, slot, NodeType::Array, capacity)?
                    }
                };
                self.copy_contents(journal, from, src, dest, conflicts)
            }
            Value::Table(src) => {
                let dest = match self.mergeable(container, slot, NodeType::Table, conflicts) {
                    Some(dest) => dest,
                    None => {
                        let capacity = table_capacity_for(from.table_count(src)?);
                        self.journal_container(journal, container, slot, NodeType::Table, capacity)?
                    }
                };
                self.copy_contents(journal, from, src, dest, conflicts)
            }
            scalar => {
                let node = self.journal_new(journal, |doc| doc.encode_scalar(&scalar))?;
                self.journal_store(journal, container, slot, node)
            }
        }
    }

    /// Existing container of kind `ty` at `slot` that an overwriting copy
    /// merges into.
    fn mergeable(&self, container: Node, slot: Slot<'_>, ty: NodeType, conflicts: Conflicts) -> Option<Node> {
        if conflicts != Conflicts::Overwrite {
            return None;
        }
        self.get(container, slot)
            .ok()
            .filter(|node| node.node_type() == Some(ty))
    }

    /// Node for a non-container value read from any document.
    fn encode_scalar(&mut self, value: &Value<'_>) -> Result<Node> {
        match *value {
            Value::Null => Ok(Node::NULL),
            Value::SpecialErase => Ok(Node::SPECIAL_ERASE),
            Value::Bool(b) => Ok(Node::boolean(b)),
            Value::Int32(n) => self.encode_i32(n),
            Value::UInt32(n) => self.encode_u32(n),
            Value::Int64(n) => self.encode_i64(n),
            Value::UInt64(n) => self.encode_u64(n),
            Value::Float32(f) => self.encode_f32(f),
            Value::String(s) => self.encode_string(s),
            Value::FilePath(ref path) => self.encode_file_path(path),
            Value::Array(_) | Value::Table(_) => Err(Error::UnexpectedType {
                expected: "scalar",
                found: value.type_name(),
            }),
        }
    }

    /// Move the entry `from_key` of `from_table` to `to_key` of `to_table`.
    /// Node handles of the moved value stay valid. Moving an entry onto
    /// itself does nothing.
    pub fn move_node_between_tables(
        &mut self,
        from_table: Node,
        from_key: &str,
        to_table: Node,
        to_key: &str,
    ) -> Result<()> {
        let node = self.table_get(from_table, from_key)?;
        self.table_block(to_table)?;
        if from_table == to_table && from_key == to_key {
            return Ok(());
        }
        let old = self.table_put(to_table, to_key, node)?;
        self.release_node(old);
        self.table_take(from_table, from_key)?;
        Ok(())
    }

    /// Replace the root with a new table holding the old root at `key`.
    /// Existing nodes stay valid.
    pub fn move_root_into_new_root_table(&mut self, key: &str, capacity: u32) -> Result<Node> {
        let old = self.root();
        if self.heap.is_empty() {
            let root = self.make_table(capacity)?;
            self.set_null(root, key)?;
            return Ok(root);
        }
        let table = self.encode_container(NodeType::Table, capacity)?;
        if let Err(e) = self.table_put(table, key, old) {
            self.release_node(table);
            return Err(e);
        }
        self.set_root(table);
        Ok(table)
    }

    /// Make the array or table at `slot` of `container` the new root. The
    /// rest of the old tree becomes garbage.
    pub fn replace_root_with_element<'k>(
        &mut self,
        container: Node,
        slot: impl Into<Slot<'k>>,
    ) -> Result<Node> {
        let node = self.get(container, slot)?;
        self.container(node)?;
        let old = self.root();
        if old != node {
            self.set_root(node);
            self.release_node(old);
        }
        Ok(node)
    }
}
