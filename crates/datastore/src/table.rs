//! Table container operations.
//!
//! Tables are open-addressed hash tables over a power-of-two capacity. A key
//! slot holds an interned key id (0 marks an empty slot) and the matching
//! value slot holds the node. Lookups scan linearly from the key's home
//! slot, `xxh32(key) & (capacity - 1)`.
//!
//! Inserting a new key first grows the table when the load factor would pass
//! 0.8. Erasing shifts later members of the cluster back into the hole, so
//! there are no tombstones and every cluster stays contiguous.

use crate::document::Document;
use crate::error::{Error, Result};
use crate::heap::{Block, HEADER_WORDS};
use crate::node::{Handle, Node, NodeType};

/// Smallest power-of-two capacity that holds `count` entries at a load
/// factor of at most 0.8. Zero entries need zero slots.
#[must_use]
pub fn table_capacity_for(count: u32) -> u32 {
    if count == 0 {
        return 0;
    }
    let mut capacity: u64 = 1;
    while u64::from(count) * 5 > capacity * 4 {
        capacity *= 2;
    }
    capacity.min(1 << 31) as u32
}

#[inline]
fn needs_growth(count: u32, capacity: u32) -> bool {
    (u64::from(count) + 1) * 5 > u64::from(capacity) * 4
}

/// Iterator over `(key, value)` pairs of a table in slot order.
#[derive(Debug, Clone)]
pub struct TableIter<'a> {
    doc: &'a Document,
    block: Block,
    slot: u32,
}

impl<'a> Iterator for TableIter<'a> {
    type Item = (&'a str, Node);

    fn next(&mut self) -> Option<Self::Item> {
        while self.slot < self.block.capacity {
            let i = self.slot;
            self.slot += 1;
            let id = self.doc.heap.word(self.block.key_slot(i))?;
            if id == 0 {
                continue;
            }
            let value = self.doc.heap.word(self.block.value_slot(i))?;
            if let Some(key) = self.doc.keys.resolve(id) {
                return Some((key, Node::from_raw(value)));
            }
        }
        None
    }
}

impl Document {
    pub(crate) fn table_block(&self, table: Node) -> Result<(Handle, Block)> {
        match (table.node_type(), table.handle()) {
            (Some(NodeType::Table), Some(handle)) => {
                Ok((handle, self.heap.block(handle, NodeType::Table)?))
            }
            _ => Err(Error::UnexpectedType {
                expected: "table",
                found: table.type_name(),
            }),
        }
    }

    #[inline]
    fn home_slot(&self, id: u32, capacity: u32) -> Result<u32> {
        let hash = self.keys.hash(id).ok_or(Error::CorruptData)?;
        Ok(hash & (capacity - 1))
    }

    #[inline]
    fn key_at(&self, block: Block, slot: u32) -> Result<u32> {
        self.heap.word(block.key_slot(slot)).ok_or(Error::CorruptData)
    }

    #[inline]
    fn value_at(&self, block: Block, slot: u32) -> Result<Node> {
        self.heap
            .word(block.value_slot(slot))
            .map(Node::from_raw)
            .ok_or(Error::CorruptData)
    }

    /// Slot holding key id `id`, if present.
    fn find_id(&self, block: Block, id: u32) -> Result<Option<u32>> {
        if block.capacity == 0 {
            return Ok(None);
        }
        let mask = block.capacity - 1;
        let mut slot = self.home_slot(id, block.capacity)?;
        for _ in 0..block.capacity {
            match self.key_at(block, slot)? {
                0 => return Ok(None),
                k if k == id => return Ok(Some(slot)),
                _ => slot = (slot + 1) & mask,
            }
        }
        Ok(None)
    }

    fn find(&self, block: Block, key: &str) -> Result<Option<u32>> {
        match self.keys.lookup(key) {
            Some(id) => self.find_id(block, id),
            None => Ok(None),
        }
    }

    /// First free slot on the cluster of `id`.
    fn free_slot(&self, block: Block, id: u32) -> Result<u32> {
        let mask = block.capacity - 1;
        let mut slot = self.home_slot(id, block.capacity)?;
        for _ in 0..block.capacity {
            if self.key_at(block, slot)? == 0 {
                return Ok(slot);
            }
            slot = (slot + 1) & mask;
        }
        Err(Error::CorruptData)
    }

    /// Place an entry for a key known to be absent. Capacity must be
    /// non-zero with at least one free slot.
    fn insert_new(&mut self, block: Block, id: u32, value: Node) -> Result<()> {
        let slot = self.free_slot(block, id)?;
        self.heap.set_word(block.key_slot(slot), id);
        self.heap.set_word(block.value_slot(slot), value.raw());
        Ok(())
    }

    /// Live `(key id, value)` entries in slot order.
    pub(crate) fn table_entries(&self, block: Block) -> Result<Vec<(u32, Node)>> {
        let mut entries = Vec::with_capacity(block.count as usize);
        for slot in 0..block.capacity {
            let id = self.key_at(block, slot)?;
            if id != 0 {
                entries.push((id, self.value_at(block, slot)?));
            }
        }
        Ok(entries)
    }

    /// Move a table to `capacity` slots and reinsert its entries in their old
    /// slot order.
    pub(crate) fn rehash_table(
        &mut self,
        handle: Handle,
        block: Block,
        capacity: u32,
    ) -> Result<Block> {
        let entries = self.table_entries(block)?;
        let old_words = HEADER_WORDS + 2 * block.capacity;
        let new_words = HEADER_WORDS + 2 * capacity;
        let offset = self.heap.reallocate(handle, old_words, new_words)?;
        let block = Block {
            offset,
            count: entries.len() as u32,
            capacity,
        };
        for word in offset + HEADER_WORDS..offset + new_words {
            self.heap.set_word(word, 0);
        }
        self.heap.set_word(offset, block.count);
        self.heap.set_word(offset + 1, capacity);
        for (id, value) in entries {
            self.insert_new(block, id, value)?;
        }
        Ok(block)
    }

    pub fn table_count(&self, table: Node) -> Result<u32> {
        Ok(self.table_block(table)?.1.count)
    }

    pub fn table_capacity(&self, table: Node) -> Result<u32> {
        Ok(self.table_block(table)?.1.capacity)
    }

    pub fn table_contains_key(&self, table: Node, key: &str) -> Result<bool> {
        let (_, block) = self.table_block(table)?;
        Ok(self.find(block, key)?.is_some())
    }

    pub fn table_get(&self, table: Node, key: &str) -> Result<Node> {
        let (_, block) = self.table_block(table)?;
        match self.find(block, key)? {
            Some(slot) => self.value_at(block, slot),
            None => Err(Error::KeyNotFound),
        }
    }

    /// Iterate `(key, value)` pairs in slot order.
    pub fn table_iter(&self, table: Node) -> Result<TableIter<'_>> {
        let (_, block) = self.table_block(table)?;
        Ok(TableIter {
            doc: self,
            block,
            slot: 0,
        })
    }

    /// Store `node` under `key`, inserting the key if needed. Returns the
    /// previous value (null for a new key).
    pub(crate) fn table_put(&mut self, table: Node, key: &str, node: Node) -> Result<Node> {
        let (handle, mut block) = self.table_block(table)?;
        if let Some(slot) = self.find(block, key)? {
            let old = self.value_at(block, slot)?;
            self.heap.set_word(block.value_slot(slot), node.raw());
            return Ok(old);
        }

        let id = self.keys.intern(key)?;
        if needs_growth(block.count, block.capacity) {
            let capacity = table_capacity_for(block.count + 1);
            block = self.rehash_table(handle, block, capacity)?;
        }
        self.insert_new(block, id, node)?;
        let count = block.count + 1;
        self.heap.set_count(&mut block, count);
        Ok(Node::NULL)
    }

    /// Remove `key` and return its value. Later members of the cluster
    /// shift back so lookups never cross a hole.
    pub(crate) fn table_take(&mut self, table: Node, key: &str) -> Result<Node> {
        let (_, mut block) = self.table_block(table)?;
        let Some(mut hole) = self.find(block, key)? else {
            return Err(Error::KeyNotFound);
        };
        let old = self.value_at(block, hole)?;
        let mask = block.capacity - 1;
        let mut next = hole;
        loop {
            next = (next + 1) & mask;
            let id = self.key_at(block, next)?;
            if id == 0 {
                break;
            }
            let home = self.home_slot(id, block.capacity)?;
            // an entry may fill the hole unless its home lies in (hole, next]
            let stays = if hole <= next {
                hole < home && home <= next
            } else {
                hole < home || home <= next
            };
            if !stays {
                let value = self.value_at(block, next)?;
                self.heap.set_word(block.key_slot(hole), id);
                self.heap.set_word(block.value_slot(hole), value.raw());
                hole = next;
            }
        }
        self.heap.set_word(block.key_slot(hole), 0);
        self.heap.set_word(block.value_slot(hole), Node::NULL.raw());
        let count = block.count.saturating_sub(1);
        self.heap.set_count(&mut block, count);
        Ok(old)
    }

    /// Remove `key`. Fails with [`Error::KeyNotFound`] if it is absent.
    pub fn table_erase(&mut self, table: Node, key: &str) -> Result<()> {
        let old = self.table_take(table, key)?;
        self.release_node(old);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn table_doc() -> (Document, Node) {
        let mut doc = Document::new();
        let root = doc.make_table(0).unwrap();
        (doc, root)
    }

    fn keys(doc: &Document, table: Node) -> BTreeSet<String> {
        doc.table_iter(table)
            .unwrap()
            .map(|(k, _)| k.to_string())
            .collect()
    }

    #[test]
    fn test_capacity_for() {
        assert_eq!(table_capacity_for(0), 0);
        assert_eq!(table_capacity_for(1), 2);
        assert_eq!(table_capacity_for(3), 4);
        assert_eq!(table_capacity_for(4), 8);
        assert_eq!(table_capacity_for(6), 8);
        assert_eq!(table_capacity_for(7), 16);
        assert_eq!(table_capacity_for(100), 128);
    }

    #[test]
    fn test_capacity_law_on_insert() {
        let (mut doc, root) = table_doc();
        for n in 1..=200u32 {
            doc.set_u32(root, format!("key{n}").as_str(), n).unwrap();
            assert_eq!(doc.table_capacity(root).unwrap(), table_capacity_for(n));
        }
        assert_eq!(doc.table_count(root).unwrap(), 200);
        for n in 1..=200u32 {
            let key = format!("key{n}");
            assert_eq!(doc.get_value(root, key.as_str()).unwrap().as_u32(), Some(n));
        }
    }

    #[test]
    fn test_overwrite_keeps_count() {
        let (mut doc, root) = table_doc();
        doc.set_i32(root, "a", 1).unwrap();
        doc.set_i32(root, "a", 2).unwrap();
        assert_eq!(doc.table_count(root).unwrap(), 1);
        assert_eq!(doc.get_value(root, "a").unwrap().as_i32(), Some(2));
    }

    #[test]
    fn test_empty_string_key() {
        let (mut doc, root) = table_doc();
        doc.set_string(root, "", "blank").unwrap();
        doc.set_i32(root, "x", 1).unwrap();
        assert!(doc.contains(root, "").unwrap());
        assert_eq!(doc.get_value(root, "").unwrap().as_str(), Some("blank"));
        doc.erase(root, "").unwrap();
        assert!(!doc.contains(root, "").unwrap());
        assert_eq!(keys(&doc, root), BTreeSet::from(["x".to_string()]));
    }

    #[test]
    fn test_erase_missing_key() {
        let (mut doc, root) = table_doc();
        assert_eq!(doc.erase(root, "nope"), Err(Error::KeyNotFound));
        doc.set_i32(root, "a", 1).unwrap();
        assert_eq!(doc.erase(root, "nope"), Err(Error::KeyNotFound));
        assert_eq!(doc.table_count(root).unwrap(), 1);
    }

    #[test]
    fn test_erase_keeps_clusters_intact() {
        let (mut doc, root) = table_doc();
        let mut live = BTreeSet::new();
        for n in 0..64 {
            let key = format!("k{n}");
            doc.set_i32(root, key.as_str(), n).unwrap();
            live.insert(key);
        }
        // erase every third key, then check every survivor is reachable
        for n in (0..64).step_by(3) {
            let key = format!("k{n}");
            doc.erase(root, key.as_str()).unwrap();
            live.remove(&key);
        }
        assert_eq!(keys(&doc, root), live);
        assert_eq!(doc.table_count(root).unwrap() as usize, live.len());
        for key in &live {
            assert!(doc.contains(root, key.as_str()).unwrap(), "{key}");
        }
        for n in (0..64).step_by(3) {
            assert!(!doc.contains(root, format!("k{n}").as_str()).unwrap());
        }
    }

    #[test]
    fn test_reinsert_after_erase() {
        let (mut doc, root) = table_doc();
        for round in 0..3 {
            for n in 0..10 {
                doc.set_i32(root, format!("k{n}").as_str(), round).unwrap();
            }
            for n in 0..10 {
                doc.erase(root, format!("k{n}").as_str()).unwrap();
            }
            assert_eq!(doc.table_count(root).unwrap(), 0);
            assert!(keys(&doc, root).is_empty());
        }
    }

    #[test]
    fn test_explicit_capacity_is_power_of_two() {
        let (mut doc, root) = table_doc();
        let child = doc.set_table(root, "child", 5).unwrap();
        assert_eq!(doc.table_capacity(child).unwrap(), 8);
    }

    #[test]
    fn test_nested_table_survives_parent_growth() {
        let (mut doc, root) = table_doc();
        let child = doc.set_table(root, "child", 0).unwrap();
        doc.set_string(child, "name", "inner").unwrap();
        for n in 0..50 {
            doc.set_i32(root, format!("pad{n}").as_str(), n).unwrap();
        }
        let child_again = doc.get(root, "child").unwrap();
        assert_eq!(child, child_again);
        assert_eq!(doc.get_value(child, "name").unwrap().as_str(), Some("inner"));
    }

    #[test]
    fn test_iter_yields_each_key_once() {
        let (mut doc, root) = table_doc();
        for key in ["b", "a", "c"] {
            doc.set_bool(root, key, true).unwrap();
        }
        let mut seen: Vec<_> = doc.table_iter(root).unwrap().map(|(k, _)| k).collect();
        seen.sort_unstable();
        assert_eq!(seen, vec!["a", "b", "c"]);
    }
}
