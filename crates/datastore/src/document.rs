//! The [`Document`]: a heap of packed nodes rooted at an array or a table.

use std::fmt;

use tracing::trace;

use crate::error::{Error, Result};
use crate::file_path::{FilePath, GameDirectory};
use crate::heap::Heap;
use crate::intern::Interner;
use crate::node::{Handle, Node, NodeType};
use crate::value::{Slot, Value};

/// Arrays may not hold this many elements or more.
pub const MAX_ARRAY_LEN: u32 = 1 << 20;

/// A self-contained tree of values stored in one relocatable heap.
///
/// A new document has a null root; call [`Document::make_table`] or
/// [`Document::make_array`] before storing anything. Nodes returned by the
/// accessors are only meaningful for the document that issued them, and a
/// node for a boxed value goes stale once that value is overwritten or
/// erased.
///
/// ```
/// use datastore::Document;
///
/// let mut doc = Document::new();
/// let root = doc.make_table(0).unwrap();
/// let list = doc.set_array(root, "scores", 0).unwrap();
/// doc.set_i32(list, 0, 10).unwrap();
/// doc.set_f32(list, 1, 2.5).unwrap();
///
/// assert_eq!(doc.count(list).unwrap(), 2);
/// assert_eq!(doc.get_value(list, 1).unwrap().as_f32(), Some(2.5));
/// ```
#[derive(Debug, Clone, Default)]
pub struct Document {
    pub(crate) heap: Heap,
    pub(crate) keys: Interner,
    pub(crate) paths: Interner,
}

impl Document {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty document with room for `bytes` of heap data.
    #[must_use]
    pub fn with_capacity(bytes: usize) -> Self {
        Document {
            heap: Heap::with_capacity(bytes),
            ..Document::default()
        }
    }

    pub fn swap(&mut self, other: &mut Document) {
        std::mem::swap(self, other);
    }

    /// Root container, or [`Node::NULL`] for an empty document.
    #[must_use]
    pub fn root(&self) -> Node {
        self.heap.word(0).map_or(Node::NULL, Node::from_raw)
    }

    pub(crate) fn set_root(&mut self, node: Node) {
        self.heap.set_word(0, node.raw());
    }

    /// Discard all contents and install an empty root array.
    pub fn make_array(&mut self, capacity: u32) -> Result<Node> {
        if capacity >= MAX_ARRAY_LEN {
            return Err(Error::ArrayTooLarge { length: capacity });
        }
        self.make_root(NodeType::Array, capacity)
    }

    /// Discard all contents and install an empty root table.
    pub fn make_table(&mut self, capacity: u32) -> Result<Node> {
        self.make_root(NodeType::Table, table_capacity_hint(capacity)?)
    }

    fn make_root(&mut self, ty: NodeType, capacity: u32) -> Result<Node> {
        self.heap.reset();
        self.keys = Interner::new();
        self.paths = Interner::new();
        self.heap.push_words(1)?;
        let handle = self.heap.allocate_container(ty, capacity)?;
        let root = Node::boxed(ty, handle);
        self.set_root(root);
        trace!(kind = ty.name(), capacity, "new root");
        Ok(root)
    }

    /// Bytes reserved for the heap.
    #[must_use]
    pub fn heap_capacity_in_bytes(&self) -> usize {
        self.heap.capacity_bytes()
    }

    /// Bytes of the heap in use, garbage included. 0 for an empty document.
    #[must_use]
    pub fn in_use_heap_size_in_bytes(&self) -> usize {
        self.heap.bytes().len()
    }

    /// Number of live handles.
    #[must_use]
    pub fn handle_count(&self) -> u32 {
        self.heap.allocated()
    }

    /// Exact comparison of heap bytes, handle tables and handle counters.
    #[must_use]
    pub fn byte_for_byte_eq(a: &Document, b: &Document) -> bool {
        a.heap == b.heap
    }

    // ------------------------------------------------------------------
    // Node construction
    // ------------------------------------------------------------------

    pub(crate) fn encode_i32(&mut self, value: i32) -> Result<Node> {
        if let Some(node) = Node::int32_small(value) {
            return Ok(node);
        }
        let handle = self.heap.allocate_u32(value as u32)?;
        Ok(Node::boxed(NodeType::Int32Big, handle))
    }

    pub(crate) fn encode_u32(&mut self, value: u32) -> Result<Node> {
        match i32::try_from(value) {
            Ok(v) => self.encode_i32(v),
            Err(_) => {
                let handle = self.heap.allocate_u32(value)?;
                Ok(Node::boxed(NodeType::UInt32, handle))
            }
        }
    }

    pub(crate) fn encode_i64(&mut self, value: i64) -> Result<Node> {
        if let Ok(v) = i32::try_from(value) {
            return self.encode_i32(v);
        }
        if let Ok(v) = u32::try_from(value) {
            return self.encode_u32(v);
        }
        let handle = self.heap.allocate_u64(value as u64)?;
        Ok(Node::boxed(NodeType::Int64, handle))
    }

    pub(crate) fn encode_u64(&mut self, value: u64) -> Result<Node> {
        match i64::try_from(value) {
            Ok(v) => self.encode_i64(v),
            Err(_) => {
                let handle = self.heap.allocate_u64(value)?;
                Ok(Node::boxed(NodeType::UInt64, handle))
            }
        }
    }

    pub(crate) fn encode_f32(&mut self, value: f32) -> Result<Node> {
        // exact integers in the inline range are stored as integers
        if value.fract() == 0.0 {
            if let Some(node) = Node::int32_small(value as i32) {
                return Ok(node);
            }
        }
        if let Some(node) = Node::float31(value) {
            return Ok(node);
        }
        let handle = self.heap.allocate_u32(value.to_bits())?;
        Ok(Node::boxed(NodeType::Float32, handle))
    }

    pub(crate) fn encode_string(&mut self, value: &str) -> Result<Node> {
        let handle = self.heap.allocate_string(value)?;
        Ok(Node::boxed(NodeType::String, handle))
    }

    pub(crate) fn encode_file_path(&mut self, path: &FilePath) -> Result<Node> {
        let id = if path.relative().is_empty() {
            0
        } else {
            self.paths.intern(path.relative())?
        };
        Ok(Node::file_path(path.directory() as u8, id))
    }

    pub(crate) fn encode_container(&mut self, ty: NodeType, capacity: u32) -> Result<Node> {
        let capacity = match ty {
            NodeType::Table => table_capacity_hint(capacity)?,
            _ if capacity >= MAX_ARRAY_LEN => {
                return Err(Error::ArrayTooLarge { length: capacity });
            }
            _ => capacity,
        };
        let handle = self.heap.allocate_container(ty, capacity)?;
        Ok(Node::boxed(ty, handle))
    }

    /// Free the handle of a boxed node. Children of a container become
    /// garbage and are reclaimed by the next collection.
    pub(crate) fn release_node(&mut self, node: Node) {
        if let Some(handle) = node.handle() {
            self.heap.release(handle);
        }
    }

    // ------------------------------------------------------------------
    // Container dispatch
    // ------------------------------------------------------------------

    /// Type and handle of a container node.
    pub(crate) fn container(&self, node: Node) -> Result<(NodeType, Handle)> {
        match (node.node_type(), node.handle()) {
            (Some(ty @ (NodeType::Array | NodeType::Table)), Some(handle)) => Ok((ty, handle)),
            _ => Err(Error::NotAContainer {
                found: node.type_name(),
            }),
        }
    }

    /// Validate that a write to `slot` of `container` can proceed.
    pub(crate) fn check_slot(&self, container: Node, slot: Slot<'_>) -> Result<()> {
        match (self.container(container)?.0, slot) {
            (NodeType::Array, Slot::Index(index)) => {
                self.array_block(container)?;
                if index >= MAX_ARRAY_LEN {
                    return Err(Error::ArrayTooLarge {
                        length: index.saturating_add(1),
                    });
                }
                Ok(())
            }
            (NodeType::Table, Slot::Key(_)) => self.table_block(container).map(|_| ()),
            (ty, slot) => Err(slot_mismatch(ty, slot)),
        }
    }

    /// Store `node` in `slot`, returning the previous occupant without
    /// releasing it.
    pub(crate) fn put(&mut self, container: Node, slot: Slot<'_>, node: Node) -> Result<Node> {
        match (self.container(container)?.0, slot) {
            (NodeType::Array, Slot::Index(index)) => self.array_put(container, index, node),
            (NodeType::Table, Slot::Key(key)) => self.table_put(container, key, node),
            (ty, slot) => Err(slot_mismatch(ty, slot)),
        }
    }

    /// Remove the entry at `slot` and return it without releasing it.
    pub(crate) fn take(&mut self, container: Node, slot: Slot<'_>) -> Result<Node> {
        match (self.container(container)?.0, slot) {
            (NodeType::Array, Slot::Index(index)) => self.array_take(container, index),
            (NodeType::Table, Slot::Key(key)) => self.table_take(container, key),
            (ty, slot) => Err(slot_mismatch(ty, slot)),
        }
    }

    /// Validate, build, then store. A failed store releases the new node.
    fn set_with<'k>(
        &mut self,
        container: Node,
        slot: impl Into<Slot<'k>>,
        build: impl FnOnce(&mut Self) -> Result<Node>,
    ) -> Result<Node> {
        let slot = slot.into();
        self.check_slot(container, slot)?;
        let node = build(self)?;
        match self.put(container, slot, node) {
            Ok(old) => {
                self.release_node(old);
                Ok(node)
            }
            Err(e) => {
                self.release_node(node);
                Err(e)
            }
        }
    }

    // ------------------------------------------------------------------
    // Setters
    // ------------------------------------------------------------------

    pub fn set_null<'k>(&mut self, container: Node, slot: impl Into<Slot<'k>>) -> Result<()> {
        self.set_with(container, slot, |_| Ok(Node::NULL)).map(drop)
    }

    /// Store the deleted-entry marker used by diffs.
    pub fn set_special_erase<'k>(
        &mut self,
        container: Node,
        slot: impl Into<Slot<'k>>,
    ) -> Result<()> {
        self.set_with(container, slot, |_| Ok(Node::SPECIAL_ERASE))
            .map(drop)
    }

    pub fn set_bool<'k>(
        &mut self,
        container: Node,
        slot: impl Into<Slot<'k>>,
        value: bool,
    ) -> Result<()> {
        self.set_with(container, slot, |_| Ok(Node::boolean(value)))
            .map(drop)
    }

    pub fn set_i32<'k>(
        &mut self,
        container: Node,
        slot: impl Into<Slot<'k>>,
        value: i32,
    ) -> Result<()> {
        self.set_with(container, slot, |doc| doc.encode_i32(value))
            .map(drop)
    }

    pub fn set_u32<'k>(
        &mut self,
        container: Node,
        slot: impl Into<Slot<'k>>,
        value: u32,
    ) -> Result<()> {
        self.set_with(container, slot, |doc| doc.encode_u32(value))
            .map(drop)
    }

    pub fn set_i64<'k>(
        &mut self,
        container: Node,
        slot: impl Into<Slot<'k>>,
        value: i64,
    ) -> Result<()> {
        self.set_with(container, slot, |doc| doc.encode_i64(value))
            .map(drop)
    }

    pub fn set_u64<'k>(
        &mut self,
        container: Node,
        slot: impl Into<Slot<'k>>,
        value: u64,
    ) -> Result<()> {
        self.set_with(container, slot, |doc| doc.encode_u64(value))
            .map(drop)
    }

    /// Store a float. Exact integers in the inline integer range are stored
    /// as integers, so `-0.0` reads back as integer `0`. Every NaN is stored
    /// with the same bit pattern.
    pub fn set_f32<'k>(
        &mut self,
        container: Node,
        slot: impl Into<Slot<'k>>,
        value: f32,
    ) -> Result<()> {
        self.set_with(container, slot, |doc| doc.encode_f32(value))
            .map(drop)
    }

    pub fn set_string<'k>(
        &mut self,
        container: Node,
        slot: impl Into<Slot<'k>>,
        value: &str,
    ) -> Result<()> {
        self.set_with(container, slot, |doc| doc.encode_string(value))
            .map(drop)
    }

    pub fn set_file_path<'k>(
        &mut self,
        container: Node,
        slot: impl Into<Slot<'k>>,
        value: &FilePath,
    ) -> Result<()> {
        self.set_with(container, slot, |doc| doc.encode_file_path(value))
            .map(drop)
    }

    /// Store a new empty array and return its node.
    pub fn set_array<'k>(
        &mut self,
        container: Node,
        slot: impl Into<Slot<'k>>,
        capacity: u32,
    ) -> Result<Node> {
        self.set_with(container, slot, |doc| {
            doc.encode_container(NodeType::Array, capacity)
        })
    }

    /// Store a new empty table and return its node.
    pub fn set_table<'k>(
        &mut self,
        container: Node,
        slot: impl Into<Slot<'k>>,
        capacity: u32,
    ) -> Result<Node> {
        self.set_with(container, slot, |doc| {
            doc.encode_container(NodeType::Table, capacity)
        })
    }

    // ------------------------------------------------------------------
    // Access
    // ------------------------------------------------------------------

    pub fn get<'k>(&self, container: Node, slot: impl Into<Slot<'k>>) -> Result<Node> {
        match (self.container(container)?.0, slot.into()) {
            (NodeType::Array, Slot::Index(index)) => self.array_get(container, index),
            (NodeType::Table, Slot::Key(key)) => self.table_get(container, key),
            (ty, slot) => Err(slot_mismatch(ty, slot)),
        }
    }

    /// Shorthand for `value(get(container, slot)?)`.
    pub fn get_value<'k>(&self, container: Node, slot: impl Into<Slot<'k>>) -> Result<Value<'_>> {
        self.value(self.get(container, slot)?)
    }

    /// Resolve a node into a typed [`Value`].
    pub fn value(&self, node: Node) -> Result<Value<'_>> {
        let ty = node
            .node_type()
            .ok_or(Error::InvalidNodeType(node.raw()))?;
        let handle = node.handle();
        Ok(match (ty, handle) {
            (NodeType::Null, _) => Value::Null,
            (NodeType::SpecialErase, _) => Value::SpecialErase,
            (NodeType::Boolean, _) => Value::Bool(node.bool_value()),
            (NodeType::Int32Small, _) => Value::Int32(node.small_int_value()),
            (NodeType::Float31, _) => Value::Float32(node.float31_value()),
            (NodeType::FilePath, _) => Value::FilePath(self.file_path_of(node)?),
            (NodeType::Array, Some(h)) => {
                self.heap.block(h, NodeType::Array)?;
                Value::Array(node)
            }
            (NodeType::Table, Some(h)) => {
                self.heap.block(h, NodeType::Table)?;
                Value::Table(node)
            }
            (NodeType::String, Some(h)) => Value::String(self.heap.string(h)?),
            (NodeType::Int32Big, Some(h)) => Value::Int32(self.heap.read_u32(h)? as i32),
            (NodeType::UInt32, Some(h)) => Value::UInt32(self.heap.read_u32(h)?),
            (NodeType::Int64, Some(h)) => Value::Int64(self.heap.read_u64(h)? as i64),
            (NodeType::UInt64, Some(h)) => Value::UInt64(self.heap.read_u64(h)?),
            (NodeType::Float32, Some(h)) => Value::Float32(f32::from_bits(self.heap.read_u32(h)?)),
            (_, None) => return Err(Error::InvalidNodeType(node.raw())),
        })
    }

    pub(crate) fn file_path_of(&self, node: Node) -> Result<FilePath> {
        let (dir, id) = node.file_path_parts();
        let directory = GameDirectory::from_u8(dir).ok_or(Error::CorruptData)?;
        let relative = if id == 0 {
            ""
        } else {
            self.paths.resolve(id).ok_or(Error::CorruptData)?
        };
        Ok(FilePath::new(directory, relative))
    }

    /// Remove the entry at `slot`. Arrays shift later elements down.
    pub fn erase<'k>(&mut self, container: Node, slot: impl Into<Slot<'k>>) -> Result<()> {
        let old = self.take(container, slot.into())?;
        self.release_node(old);
        Ok(())
    }

    pub fn contains<'k>(&self, container: Node, slot: impl Into<Slot<'k>>) -> Result<bool> {
        match (self.container(container)?.0, slot.into()) {
            (NodeType::Array, Slot::Index(index)) => Ok(index < self.array_count(container)?),
            (NodeType::Table, Slot::Key(key)) => self.table_contains_key(container, key),
            (ty, slot) => Err(slot_mismatch(ty, slot)),
        }
    }

    /// Number of entries in a container.
    pub fn count(&self, container: Node) -> Result<u32> {
        match self.container(container)?.0 {
            NodeType::Array => self.array_count(container),
            _ => self.table_count(container),
        }
    }

    /// Slot capacity of a container.
    pub fn capacity(&self, container: Node) -> Result<u32> {
        match self.container(container)?.0 {
            NodeType::Array => self.array_capacity(container),
            _ => self.table_capacity(container),
        }
    }
}

/// Power-of-two table capacity for a requested slot count.
fn table_capacity_hint(capacity: u32) -> Result<u32> {
    if capacity == 0 {
        return Ok(0);
    }
    capacity
        .checked_next_power_of_two()
        .ok_or(Error::HeapExhausted)
}

fn slot_mismatch(ty: NodeType, slot: Slot<'_>) -> Error {
    Error::UnexpectedType {
        expected: match slot {
            Slot::Index(_) => "array",
            Slot::Key(_) => "table",
        },
        found: ty.name(),
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = self
            .to_text(self.root(), crate::text::PrintOptions::default())
            .map_err(|_| fmt::Error)?;
        f.write_str(&text)
    }
}
