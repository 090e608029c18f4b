//! Array container operations.

use crate::document::{Document, MAX_ARRAY_LEN};
use crate::error::{Error, Result};
use crate::heap::{Block, HEADER_WORDS};
use crate::node::{Handle, Node, NodeType};
use crate::value::Value;

/// Iterator over the elements of an array, in order.
#[derive(Debug, Clone)]
pub struct ArrayIter<'a> {
    doc: &'a Document,
    block: Block,
    index: u32,
}

impl Iterator for ArrayIter<'_> {
    type Item = Node;

    fn next(&mut self) -> Option<Node> {
        if self.index >= self.block.count {
            return None;
        }
        let node = self
            .doc
            .heap
            .word(self.block.value_slot(self.index))
            .map(Node::from_raw);
        self.index += 1;
        node
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.block.count.saturating_sub(self.index) as usize;
        (remaining, Some(remaining))
    }
}

impl Document {
    pub(crate) fn array_block(&self, array: Node) -> Result<(Handle, Block)> {
        match (array.node_type(), array.handle()) {
            (Some(NodeType::Array), Some(handle)) => {
                Ok((handle, self.heap.block(handle, NodeType::Array)?))
            }
            _ => Err(Error::UnexpectedType {
                expected: "array",
                found: array.type_name(),
            }),
        }
    }

    fn array_slot(&self, block: Block, index: u32) -> Result<Node> {
        self.heap
            .word(block.value_slot(index))
            .map(Node::from_raw)
            .ok_or(Error::CorruptData)
    }

    /// Grow the slot storage of an array to `capacity`, possibly moving it.
    fn grow_array(&mut self, handle: Handle, block: Block, capacity: u32) -> Result<Block> {
        let offset = self.heap.reallocate(
            handle,
            HEADER_WORDS + block.capacity,
            HEADER_WORDS + capacity,
        )?;
        self.heap.set_word(offset + 1, capacity);
        Ok(Block {
            offset,
            count: block.count,
            capacity,
        })
    }

    pub fn array_count(&self, array: Node) -> Result<u32> {
        Ok(self.array_block(array)?.1.count)
    }

    pub fn array_capacity(&self, array: Node) -> Result<u32> {
        Ok(self.array_block(array)?.1.capacity)
    }

    pub fn array_get(&self, array: Node, index: u32) -> Result<Node> {
        let (_, block) = self.array_block(array)?;
        if index >= block.count {
            return Err(Error::IndexOutOfBounds {
                index,
                length: block.count,
            });
        }
        self.array_slot(block, index)
    }

    /// Iterate the elements of an array.
    pub fn array_iter(&self, array: Node) -> Result<ArrayIter<'_>> {
        let (_, block) = self.array_block(array)?;
        Ok(ArrayIter {
            doc: self,
            block,
            index: 0,
        })
    }

    /// Store `node` at `index`, growing the array when `index` is past the
    /// end. Returns the previous occupant.
    pub(crate) fn array_put(&mut self, array: Node, index: u32, node: Node) -> Result<Node> {
        let (handle, mut block) = self.array_block(array)?;
        if index >= MAX_ARRAY_LEN {
            return Err(Error::ArrayTooLarge {
                length: index.saturating_add(1),
            });
        }
        if index < block.count {
            let old = self.array_slot(block, index)?;
            self.heap.set_word(block.value_slot(index), node.raw());
            return Ok(old);
        }

        let len = index + 1;
        if len > block.capacity {
            block = self.grow_array(handle, block, len.next_power_of_two())?;
        }
        for i in block.count..index {
            self.heap.set_word(block.value_slot(i), Node::NULL.raw());
        }
        self.heap.set_word(block.value_slot(index), node.raw());
        self.heap.set_count(&mut block, len);
        Ok(Node::NULL)
    }

    /// Remove the element at `index`, shifting later elements down.
    pub(crate) fn array_take(&mut self, array: Node, index: u32) -> Result<Node> {
        let (_, mut block) = self.array_block(array)?;
        if index >= block.count {
            return Err(Error::IndexOutOfBounds {
                index,
                length: block.count,
            });
        }
        let old = self.array_slot(block, index)?;
        for i in index + 1..block.count {
            let next = self.array_slot(block, i)?;
            self.heap.set_word(block.value_slot(i - 1), next.raw());
        }
        let last = block.count - 1;
        self.heap.set_word(block.value_slot(last), Node::NULL.raw());
        self.heap.set_count(&mut block, last);
        Ok(old)
    }

    /// Remove the element at `index`, preserving the order of the rest.
    pub fn array_erase(&mut self, array: Node, index: u32) -> Result<()> {
        let old = self.array_take(array, index)?;
        self.release_node(old);
        Ok(())
    }

    /// Set the element count. New elements are null; truncated elements are
    /// released.
    pub fn resize_array(&mut self, array: Node, len: u32) -> Result<()> {
        let (handle, mut block) = self.array_block(array)?;
        if len >= MAX_ARRAY_LEN {
            return Err(Error::ArrayTooLarge { length: len });
        }
        if len < block.count {
            for i in len..block.count {
                let old = self.array_slot(block, i)?;
                self.release_node(old);
                self.heap.set_word(block.value_slot(i), Node::NULL.raw());
            }
        } else if len > block.count {
            if len > block.capacity {
                block = self.grow_array(handle, block, len)?;
            }
            for i in block.count..len {
                self.heap.set_word(block.value_slot(i), Node::NULL.raw());
            }
        }
        self.heap.set_count(&mut block, len);
        Ok(())
    }

    /// True if any element is a string equal to `s`.
    pub fn array_contains_str(&self, array: Node, s: &str) -> Result<bool> {
        for node in self.array_iter(array)? {
            if node.node_type() == Some(NodeType::String)
                && self.value(node)? == Value::String(s)
            {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn array_doc() -> (Document, Node) {
        let mut doc = Document::new();
        let root = doc.make_array(0).unwrap();
        (doc, root)
    }

    fn ints(doc: &Document, array: Node) -> Vec<Option<i32>> {
        doc.array_iter(array)
            .unwrap()
            .map(|n| doc.value(n).unwrap().as_i32())
            .collect()
    }

    #[test]
    fn test_set_beyond_end_fills_null() {
        let (mut doc, root) = array_doc();
        doc.set_i32(root, 5, 42).unwrap();
        assert_eq!(doc.array_count(root).unwrap(), 6);
        assert_eq!(doc.array_capacity(root).unwrap(), 8);
        for i in 0..5 {
            assert!(doc.get(root, i).unwrap().is_null());
        }
        assert_eq!(doc.get_value(root, 5).unwrap().as_i32(), Some(42));
    }

    #[test]
    fn test_get_out_of_bounds() {
        let (mut doc, root) = array_doc();
        doc.set_bool(root, 0, true).unwrap();
        assert_eq!(
            doc.get(root, 1),
            Err(Error::IndexOutOfBounds {
                index: 1,
                length: 1
            })
        );
    }

    #[test]
    fn test_erase_shifts_left() {
        let (mut doc, root) = array_doc();
        for i in 0..4 {
            doc.set_i32(root, i, i as i32 * 10).unwrap();
        }
        doc.erase(root, 1).unwrap();
        assert_eq!(ints(&doc, root), vec![Some(0), Some(20), Some(30)]);
        doc.erase(root, 2).unwrap();
        assert_eq!(ints(&doc, root), vec![Some(0), Some(20)]);
        assert!(doc.erase(root, 2).is_err());
    }

    #[test]
    fn test_erase_releases_boxed_value() {
        let (mut doc, root) = array_doc();
        doc.set_string(root, 0, "gone").unwrap();
        let node = doc.get(root, 0).unwrap();
        doc.erase(root, 0).unwrap();
        assert_eq!(doc.value(node), Err(Error::StaleHandle));
    }

    #[test]
    fn test_resize_grow_and_truncate() {
        let (mut doc, root) = array_doc();
        doc.set_i32(root, 0, 1).unwrap();
        doc.resize_array(root, 4).unwrap();
        assert_eq!(ints(&doc, root), vec![Some(1), None, None, None]);
        assert!(doc.get(root, 3).unwrap().is_null());

        doc.set_string(root, 3, "tail").unwrap();
        let tail = doc.get(root, 3).unwrap();
        doc.resize_array(root, 1).unwrap();
        assert_eq!(doc.array_count(root).unwrap(), 1);
        assert_eq!(doc.value(tail), Err(Error::StaleHandle));

        // regrowing does not resurrect old slots
        doc.resize_array(root, 4).unwrap();
        assert!(doc.get(root, 3).unwrap().is_null());
    }

    #[test]
    fn test_too_large() {
        let (mut doc, root) = array_doc();
        assert_eq!(
            doc.resize_array(root, MAX_ARRAY_LEN),
            Err(Error::ArrayTooLarge {
                length: MAX_ARRAY_LEN
            })
        );
        assert!(matches!(
            doc.set_i32(root, MAX_ARRAY_LEN, 1),
            Err(Error::ArrayTooLarge { .. })
        ));
        assert_eq!(doc.array_count(root).unwrap(), 0);
    }

    #[test]
    fn test_growth_relocates_nested_array() {
        let (mut doc, root) = array_doc();
        let inner = doc.set_array(root, 0, 1).unwrap();
        doc.set_i32(inner, 0, 7).unwrap();
        // allocate something after the inner array so growth must move it
        doc.set_string(root, 1, "blocker").unwrap();
        for i in 1..20 {
            doc.set_i32(inner, i, 7 + i as i32).unwrap();
        }
        assert_eq!(doc.array_count(inner).unwrap(), 20);
        assert_eq!(doc.get_value(inner, 0).unwrap().as_i32(), Some(7));
        assert_eq!(doc.get_value(inner, 19).unwrap().as_i32(), Some(26));
        assert_eq!(doc.get_value(root, 1).unwrap().as_str(), Some("blocker"));
    }

    #[test]
    fn test_contains_str() {
        let (mut doc, root) = array_doc();
        doc.set_string(root, 0, "alpha").unwrap();
        doc.set_i32(root, 1, 3).unwrap();
        doc.set_string(root, 2, "beta").unwrap();
        assert!(doc.array_contains_str(root, "beta").unwrap());
        assert!(!doc.array_contains_str(root, "gamma").unwrap());
        assert!(!doc.array_contains_str(root, "").unwrap());
    }

    #[test]
    fn test_array_ops_on_table_fail() {
        let mut doc = Document::new();
        let root = doc.make_table(0).unwrap();
        assert!(matches!(
            doc.array_count(root),
            Err(Error::UnexpectedType { .. })
        ));
    }
}
