//! Garbage collection and compaction.
//!
//! Collection is a copy: the root word goes first, then every block
//! reachable from it in depth-first preorder is appended to a fresh heap.
//! Handle indices and generations survive, so nodes held by the caller stay
//! valid. Unreachable handles are freed.
//!
//! With container compaction, arrays shrink to their element count and
//! tables to the smallest capacity the load factor allows for their count. A
//! table is only re-laid-out when its capacity changes, which keeps repeated
//! compaction idempotent.
//!
//! Collection also drops interned strings nothing refers to any more. Key
//! ids are renumbered densely in traversal order; a key's home slot comes
//! from the hash of its text, so table layouts are unaffected. File path ids
//! live inside nodes the caller may hold, so they keep their numbers and
//! unused ones are freed for reuse.

use tracing::debug;

use crate::document::Document;
use crate::error::{Error, Result};
use crate::heap::{Block, HEADER_WORDS, Heap};
use crate::intern::Interner;
use crate::node::{Handle, Node, NodeType};
use crate::table::table_capacity_for;

/// Where blocks land and how handles are named in the rebuilt heap.
struct Rebuild<'a> {
    heap: Heap,
    compact: bool,
    /// Old handle index to new handle index, when renumbering.
    renumber: Option<Vec<u32>>,
    /// Keys in use, in first-seen order.
    keys: Interner,
    /// Old key id to new key id, 0 until first seen.
    key_ids: Vec<u32>,
    /// Path ids referenced by file path nodes, indexed by id.
    live_paths: Vec<bool>,
    doc: &'a Document,
}

/// Output of a heap rebuild, installed by the caller.
struct Rebuilt {
    heap: Heap,
    keys: Interner,
    live_paths: Vec<bool>,
}

impl Rebuild<'_> {
    fn map_handle(&self, handle: Handle) -> Result<Handle> {
        match &self.renumber {
            None => Ok(handle),
            Some(map) => match map.get(handle.index() as usize) {
                Some(&index) if index != u32::MAX => Ok(Handle::new(index, 0)),
                _ => Err(Error::CorruptData),
            },
        }
    }

    fn map_key(&mut self, id: u32) -> Result<u32> {
        let mapped = self.key_ids.get_mut(id as usize).ok_or(Error::CorruptData)?;
        if *mapped == 0 {
            let key = self.doc.keys.resolve(id).ok_or(Error::CorruptData)?;
            *mapped = self.keys.intern(key)?;
        }
        Ok(*mapped)
    }

    fn map_node(&mut self, node: Node) -> Result<Node> {
        if node.node_type() == Some(NodeType::FilePath) {
            let (_, id) = node.file_path_parts();
            if id != 0 {
                *self.live_paths.get_mut(id as usize).ok_or(Error::CorruptData)? = true;
            }
        }
        match node.handle() {
            Some(handle) if self.renumber.is_some() => {
                Ok(node.with_handle(self.map_handle(handle)?))
            }
            _ => Ok(node),
        }
    }

    /// Copy the block behind `node` and register its handle.
    fn copy(&mut self, node: Node) -> Result<()> {
        let (Some(ty), Some(handle)) = (node.node_type(), node.handle()) else {
            return Ok(());
        };
        let doc = self.doc;
        let old = &doc.heap;
        let offset = match ty {
            NodeType::Array => self.copy_array(handle)?,
            NodeType::Table => self.copy_table(handle)?,
            NodeType::String => {
                let block = old.block(handle, NodeType::String)?;
                self.heap
                    .append_from(old, block.offset, HEADER_WORDS + block.capacity)?
            }
            _ => {
                let words = ty.scalar_words().ok_or(Error::InvalidNodeType(node.raw()))?;
                self.heap.append_from(old, old.resolve(handle)?, words)?
            }
        };
        let new_handle = self.map_handle(handle)?;
        self.heap.bind(new_handle, offset)
    }

    fn copy_array(&mut self, handle: Handle) -> Result<u32> {
        let doc = self.doc;
        let old = &doc.heap;
        let block = old.block(handle, NodeType::Array)?;
        let capacity = if self.compact {
            block.count
        } else {
            block.capacity
        };
        let offset = self.heap.push_words(HEADER_WORDS + capacity)?;
        let copy = Block {
            offset,
            count: block.count,
            capacity,
        };
        self.heap.set_word(offset, block.count);
        self.heap.set_word(offset + 1, capacity);
        for i in 0..block.count {
            let node = old
                .word(block.value_slot(i))
                .map(Node::from_raw)
                .ok_or(Error::CorruptData)?;
            let node = self.map_node(node)?;
            self.heap.set_word(copy.value_slot(i), node.raw());
        }
        Ok(offset)
    }

    fn copy_table(&mut self, handle: Handle) -> Result<u32> {
        let doc = self.doc;
        let block = doc.heap.block(handle, NodeType::Table)?;
        let entries = doc.table_entries(block)?;
        let capacity = if self.compact {
            table_capacity_for(block.count)
        } else {
            block.capacity
        };
        let offset = self.heap.push_words(HEADER_WORDS + 2 * capacity)?;
        let copy = Block {
            offset,
            count: entries.len() as u32,
            capacity,
        };
        self.heap.set_word(offset, copy.count);
        self.heap.set_word(offset + 1, capacity);

        if capacity == block.capacity {
            // same layout, slot for slot
            for slot in 0..capacity {
                let id = doc.heap.word(block.key_slot(slot)).ok_or(Error::CorruptData)?;
                if id == 0 {
                    continue;
                }
                let node = doc
                    .heap
                    .word(block.value_slot(slot))
                    .map(Node::from_raw)
                    .ok_or(Error::CorruptData)?;
                let node = self.map_node(node)?;
                let new_id = self.map_key(id)?;
                self.heap.set_word(copy.key_slot(slot), new_id);
                self.heap.set_word(copy.value_slot(slot), node.raw());
            }
            return Ok(offset);
        }

        // entries that can sit in their home slot go first, the rest take the next free slot
        let mask = capacity.wrapping_sub(1);
        let mut deferred = Vec::new();
        for (id, node) in entries {
            let node = self.map_node(node)?;
            let home = doc.keys.hash(id).ok_or(Error::CorruptData)? & mask;
            let id = self.map_key(id)?;
            if self.heap.word(copy.key_slot(home)) == Some(0) {
                self.heap.set_word(copy.key_slot(home), id);
                self.heap.set_word(copy.value_slot(home), node.raw());
            } else {
                deferred.push((id, node, home));
            }
        }
        for (id, node, home) in deferred {
            let mut slot = home;
            loop {
                if self.heap.word(copy.key_slot(slot)).ok_or(Error::CorruptData)? == 0 {
                    break;
                }
                slot = (slot + 1) & mask;
                if slot == home {
                    return Err(Error::CorruptData);
                }
            }
            self.heap.set_word(copy.key_slot(slot), id);
            self.heap.set_word(copy.value_slot(slot), node.raw());
        }
        Ok(offset)
    }
}

impl Document {
    /// Boxed nodes reachable from the root, depth-first preorder.
    pub(crate) fn reachable_nodes(&self) -> Result<Vec<Node>> {
        let mut visited = vec![false; self.heap.handles().len()];
        let mut order = Vec::new();
        let mut stack = vec![self.root()];
        while let Some(node) = stack.pop() {
            let Some(handle) = node.handle() else {
                continue;
            };
            self.heap.resolve(handle)?;
            let seen = visited
                .get_mut(handle.index() as usize)
                .ok_or(Error::StaleHandle)?;
            if *seen {
                continue;
            }
            *seen = true;
            order.push(node);
            match node.node_type() {
                Some(NodeType::Array) => {
                    let children: Vec<Node> = self.array_iter(node)?.collect();
                    stack.extend(children.into_iter().rev());
                }
                Some(NodeType::Table) => {
                    let (_, block) = self.table_block(node)?;
                    let entries = self.table_entries(block)?;
                    stack.extend(entries.into_iter().rev().map(|(_, value)| value));
                }
                _ => {}
            }
        }
        Ok(order)
    }

    fn rebuild_heap(&self, compact: bool, renumber: bool) -> Result<Rebuilt> {
        let order = self.reachable_nodes()?;
        let (heap, renumber) = if renumber {
            let mut map = vec![u32::MAX; self.heap.handles().len()];
            for (new_index, node) in order.iter().enumerate() {
                if let Some(handle) = node.handle() {
                    map[handle.index() as usize] = new_index as u32;
                }
            }
            (Heap::with_handle_slots(order.len()), Some(map))
        } else {
            (self.heap.detached(), None)
        };
        let mut rebuild = Rebuild {
            heap,
            compact,
            renumber,
            keys: Interner::new(),
            key_ids: vec![0; self.keys.id_bound()],
            live_paths: vec![false; self.paths.id_bound()],
            doc: self,
        };
        let root = rebuild.map_node(self.root())?;
        rebuild.heap.push_words(1)?;
        rebuild.heap.set_word(0, root.raw());
        for node in order {
            rebuild.copy(node)?;
        }
        Ok(Rebuilt {
            heap: rebuild.heap,
            keys: rebuild.keys,
            live_paths: rebuild.live_paths,
        })
    }

    fn install(&mut self, rebuilt: Rebuilt) {
        self.heap = rebuilt.heap;
        self.keys = rebuilt.keys;
        self.paths.retain_ids(&rebuilt.live_paths);
    }

    /// Reclaim unreachable heap data. Nodes reachable from the root stay
    /// valid. With `compact_containers`, containers also drop unused slots.
    pub fn collect_garbage(&mut self, compact_containers: bool) -> Result<()> {
        if self.heap.is_empty() {
            return Ok(());
        }
        let before = self.heap.bytes().len();
        let handles_before = self.heap.allocated();
        let keys_before = self.keys.len();
        let rebuilt = self.rebuild_heap(compact_containers, false)?;
        debug!(
            before,
            after = rebuilt.heap.bytes().len(),
            handles_before,
            handles_after = rebuilt.heap.allocated(),
            keys_before,
            keys_after = rebuilt.keys.len(),
            compact_containers,
            "collected garbage"
        );
        self.install(rebuilt);
        Ok(())
    }

    /// Defragment and release unused heap and handle table memory.
    pub fn compact_heap(&mut self) -> Result<()> {
        self.collect_garbage(false)?;
        self.heap.shrink_to_fit();
        Ok(())
    }

    /// Collect garbage with container compaction, then shrink allocations.
    pub fn collect_garbage_and_compact_heap(&mut self) -> Result<()> {
        self.collect_garbage(true)?;
        self.heap.shrink_to_fit();
        Ok(())
    }

    /// Renumber handles densely in traversal order. Every node issued before
    /// the call becomes meaningless, so this only runs on private copies.
    pub(crate) fn compact_handle_offsets(&mut self) -> Result<()> {
        if self.heap.is_empty() {
            return Ok(());
        }
        let rebuilt = self.rebuild_heap(false, true)?;
        debug!(handles = rebuilt.heap.allocated(), "renumbered handles");
        self.install(rebuilt);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_path::FilePath;
    use crate::value::Value;

    fn sample() -> (Document, Node) {
        let mut doc = Document::new();
        let root = doc.make_table(0).unwrap();
        let list = doc.set_array(root, "list", 0).unwrap();
        for i in 0..10 {
            doc.set_string(list, i, format!("item {i}").as_str()).unwrap();
        }
        let nested = doc.set_table(root, "nested", 0).unwrap();
        doc.set_u64(nested, "big", u64::MAX).unwrap();
        doc.set_f32(nested, "tenth", 0.1).unwrap();
        (doc, root)
    }

    #[test]
    fn test_garbage_is_reclaimed() {
        let (mut doc, root) = sample();
        for i in 0..50 {
            doc.set_string(root, "scratch", format!("garbage {i}").as_str())
                .unwrap();
        }
        let before = doc.in_use_heap_size_in_bytes();
        doc.collect_garbage(false).unwrap();
        assert!(doc.in_use_heap_size_in_bytes() < before);
        assert_eq!(
            doc.get_value(root, "scratch").unwrap().as_str(),
            Some("garbage 49")
        );
    }

    #[test]
    fn test_live_nodes_survive_collection() {
        let (mut doc, root) = sample();
        let list = doc.get(root, "list").unwrap();
        let nested = doc.get(root, "nested").unwrap();
        let copy = doc.clone();

        for compact in [false, true, true, false] {
            doc.collect_garbage(compact).unwrap();
            assert!(Document::equals(&doc, root, &copy, copy.root(), false));
            assert_eq!(doc.count(list).unwrap(), 10);
            assert_eq!(
                doc.get_value(nested, "big").unwrap().as_u64(),
                Some(u64::MAX)
            );
            assert!(doc.verify_integrity());
        }
    }

    #[test]
    fn test_overwritten_subtree_handles_are_freed() {
        let (mut doc, root) = sample();
        let live_before = doc.handle_count();
        doc.set_null(root, "list").unwrap();
        // only the array handle is freed eagerly
        assert_eq!(doc.handle_count(), live_before - 1);
        doc.collect_garbage(false).unwrap();
        // the ten strings go with the collection
        assert_eq!(doc.handle_count(), live_before - 11);
    }

    #[test]
    fn test_compaction_shrinks_containers() {
        let mut doc = Document::new();
        let root = doc.make_table(64).unwrap();
        let list = doc.set_array(root, "list", 100).unwrap();
        doc.set_i32(list, 0, 1).unwrap();
        doc.set_i32(root, "a", 1).unwrap();

        doc.collect_garbage(false).unwrap();
        assert_eq!(doc.capacity(root).unwrap(), 64);
        assert_eq!(doc.capacity(list).unwrap(), 100);

        doc.collect_garbage(true).unwrap();
        assert_eq!(doc.capacity(root).unwrap(), table_capacity_for(2));
        assert_eq!(doc.capacity(list).unwrap(), 1);
        assert_eq!(doc.get_value(root, "a").unwrap(), Value::Int32(1));
    }

    #[test]
    fn test_repeated_compaction_is_idempotent() {
        let (mut doc, _) = sample();
        doc.collect_garbage_and_compact_heap().unwrap();
        let once = doc.clone();
        doc.collect_garbage_and_compact_heap().unwrap();
        assert!(Document::byte_for_byte_eq(&once, &doc));
    }

    #[test]
    fn test_compact_heap_shrinks_capacity() {
        let (mut doc, root) = sample();
        for i in 0..100 {
            doc.set_i64(root, "tmp", i64::MAX - i).unwrap();
        }
        let capacity_before = doc.heap_capacity_in_bytes();
        doc.compact_heap().unwrap();
        assert!(doc.heap_capacity_in_bytes() < capacity_before);
        assert!(doc.in_use_heap_size_in_bytes() <= doc.heap_capacity_in_bytes());
    }

    #[test]
    fn test_renumbered_handles_are_dense() {
        let (mut doc, _) = sample();
        doc.set_string(doc.root(), "gone", "soon").unwrap();
        doc.erase(doc.root(), "gone").unwrap();
        let copy = doc.clone();
        doc.compact_handle_offsets().unwrap();
        assert_eq!(doc.heap.handles().len() as u32, doc.handle_count());
        assert!(Document::equals(&doc, doc.root(), &copy, copy.root(), false));
        assert!(doc.verify_integrity());
    }

    #[test]
    fn test_empty_document_collects() {
        let mut doc = Document::new();
        doc.collect_garbage(true).unwrap();
        doc.compact_heap().unwrap();
        assert!(doc.root().is_null());
    }

    #[test]
    fn test_key_table_tracks_live_keys() {
        let (mut doc, root) = sample();
        let nested = doc.get(root, "nested").unwrap();
        for i in 0..10_000 {
            let key = format!("churn {i}");
            doc.set_i32(nested, key.as_str(), i).unwrap();
            doc.erase(nested, key.as_str()).unwrap();
        }
        assert_eq!(doc.keys.len(), 10_004);

        doc.collect_garbage(true).unwrap();
        assert_eq!(doc.keys.len(), 4);
        assert_eq!(doc.keys.id_bound(), 5);
        assert_eq!(doc.get_value(nested, "big").unwrap().as_u64(), Some(u64::MAX));
        assert!(doc.contains(root, "list").unwrap());
        assert!(doc.verify_integrity());

        doc.set_bool(nested, "later", true).unwrap();
        assert_eq!(doc.keys.len(), 5);
        assert_eq!(doc.get_value(nested, "later").unwrap().as_bool(), Some(true));
    }

    #[test]
    fn test_same_layout_tables_keep_working_after_key_renumbering() {
        let mut doc = Document::new();
        let root = doc.make_table(0).unwrap();
        for i in 0..40 {
            doc.set_i32(root, format!("drop {i}").as_str(), i).unwrap();
        }
        for i in 0..40 {
            doc.set_i32(root, format!("keep {i}").as_str(), i).unwrap();
        }
        for i in 0..40 {
            doc.erase(root, format!("drop {i}").as_str()).unwrap();
        }
        let copy = doc.clone();
        doc.collect_garbage(false).unwrap();
        assert_eq!(doc.keys.len(), 40);
        assert!(Document::equals(&doc, root, &copy, copy.root(), false));
        for i in 0..40 {
            assert_eq!(
                doc.get_value(root, format!("keep {i}").as_str()).unwrap().as_i32(),
                Some(i)
            );
        }
        doc.erase(root, "keep 7").unwrap();
        assert!(!doc.contains(root, "keep 7").unwrap());
        assert!(doc.verify_integrity());
    }

    #[test]
    fn test_unused_paths_are_freed_and_live_ids_kept() {
        let mut doc = Document::new();
        let root = doc.make_table(0).unwrap();
        let list = doc.set_array(root, "paths", 0).unwrap();
        for i in 0..100 {
            let path = FilePath::parse(&format!("save://slot{i}.dat")).unwrap();
            doc.set_file_path(list, i, &path).unwrap();
        }
        let kept = doc.get(list, 99).unwrap();
        let kept_path = doc.file_path_of(kept).unwrap();
        doc.resize_array(list, 0).unwrap();
        doc.set_file_path(list, 0, &kept_path).unwrap();

        doc.collect_garbage(true).unwrap();
        assert_eq!(doc.paths.len(), 1);
        assert_eq!(doc.get(list, 0).unwrap(), kept);
        assert_eq!(
            doc.file_path_of(kept).unwrap(),
            FilePath::parse("save://slot99.dat").unwrap()
        );

        let fresh = FilePath::parse("save://fresh.dat").unwrap();
        doc.set_file_path(list, 1, &fresh).unwrap();
        assert_eq!(doc.get(list, 1).unwrap().file_path_parts().1, 1);
        assert_eq!(doc.get_value(list, 1).unwrap(), Value::FilePath(fresh));
        assert!(doc.verify_integrity());
    }
}
