//! Structural integrity checks.

use tracing::warn;

use crate::document::Document;
use crate::error::{Error, Result};
use crate::file_path::GameDirectory;
use crate::heap::{entry_generation, entry_offset, INVALID_OFFSET};
use crate::node::{Node, NodeType};

impl Document {
    /// Check that every node reachable from the root points at well-formed
    /// data: live handles, blocks inside the heap, consistent container
    /// headers, UTF-8 strings and resolvable keys and paths.
    ///
    /// An empty document is valid. Corrupt data makes this return `false`,
    /// it never panics.
    #[must_use]
    pub fn verify_integrity(&self) -> bool {
        match self.check_integrity() {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "integrity check failed");
                false
            }
        }
    }

    pub(crate) fn check_integrity(&self) -> Result<()> {
        if self.heap.is_empty() {
            return Ok(());
        }
        let root = self.root();
        if !root.is_container() {
            return Err(Error::InvalidRoot {
                found: root.type_name(),
            });
        }
        self.check_subtree(root)
    }

    /// Integrity of everything reachable from `node`, which need not be the
    /// root. Rejects shared blocks and cycles, so recursive walks over a
    /// checked subtree terminate.
    pub(crate) fn check_subtree(&self, node: Node) -> Result<()> {
        let mut visited = vec![false; self.heap.handles().len()];
        let mut stack = vec![node];
        while let Some(node) = stack.pop() {
            self.check_node(node, &mut visited, &mut stack)?;
        }
        Ok(())
    }

    fn check_node(&self, node: Node, visited: &mut [bool], stack: &mut Vec<Node>) -> Result<()> {
        let ty = node
            .node_type()
            .ok_or(Error::InvalidNodeType(node.raw()))?;
        if ty == NodeType::FilePath {
            let (dir, id) = node.file_path_parts();
            GameDirectory::from_u8(dir).ok_or(Error::CorruptData)?;
            if id != 0 && self.paths.resolve(id).is_none() {
                return Err(Error::CorruptData);
            }
            return Ok(());
        }
        let Some(handle) = node.handle() else {
            return Ok(());
        };

        let entry = *self
            .heap
            .handles()
            .get(handle.index() as usize)
            .ok_or(Error::StaleHandle)?;
        let offset = entry_offset(entry);
        if offset == INVALID_OFFSET
            || entry_generation(entry) != handle.generation()
            || offset >= self.heap.len_words()
        {
            return Err(Error::StaleHandle);
        }
        // a block referenced twice, or a cycle
        let seen = visited
            .get_mut(handle.index() as usize)
            .ok_or(Error::StaleHandle)?;
        if *seen {
            return Err(Error::CorruptData);
        }
        *seen = true;

        match ty {
            NodeType::String => {
                self.heap.string(handle)?;
            }
            NodeType::Array => {
                let (_, block) = self.array_block(node)?;
                for i in 0..block.count {
                    let child = self
                        .heap
                        .word(block.value_slot(i))
                        .ok_or(Error::CorruptData)?;
                    stack.push(Node::from_raw(child));
                }
            }
            NodeType::Table => {
                let (_, block) = self.table_block(node)?;
                let mut occupied = 0;
                for slot in 0..block.capacity {
                    let id = self
                        .heap
                        .word(block.key_slot(slot))
                        .ok_or(Error::CorruptData)?;
                    if id == 0 {
                        continue;
                    }
                    if self.keys.resolve(id).is_none() {
                        return Err(Error::CorruptData);
                    }
                    occupied += 1;
                    let child = self
                        .heap
                        .word(block.value_slot(slot))
                        .ok_or(Error::CorruptData)?;
                    stack.push(Node::from_raw(child));
                }
                if occupied != block.count {
                    return Err(Error::CorruptData);
                }
            }
            _ => {
                let words = ty.scalar_words().ok_or(Error::InvalidNodeType(node.raw()))?;
                if offset + words > self.heap.len_words() {
                    return Err(Error::CorruptData);
                }
            }
        }
        Ok(())
    }
}

/// Kinds of damage [`Document::fill_with_corrupted_data`] can inject.
#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Corruption {
    ArrayCapacity,
    ArrayCount,
    ArrayHandle,
    ArrayOffset,
    StringCapacity,
    StringCount,
    StringHandle,
    StringOffset,
    TableCapacity,
    TableCount,
    TableHandle,
    TableOffset,
    TypeData,
}

#[cfg(test)]
impl Corruption {
    pub(crate) const ALL: [Corruption; 13] = [
        Corruption::ArrayCapacity,
        Corruption::ArrayCount,
        Corruption::ArrayHandle,
        Corruption::ArrayOffset,
        Corruption::StringCapacity,
        Corruption::StringCount,
        Corruption::StringHandle,
        Corruption::StringOffset,
        Corruption::TableCapacity,
        Corruption::TableCount,
        Corruption::TableHandle,
        Corruption::TableOffset,
        Corruption::TypeData,
    ];
}

#[cfg(test)]
impl Document {
    /// Root table with an array `A` and a table `B` of mixed values.
    fn corruption_fixture(&mut self) -> (Node, Node, Node) {
        use crate::file_path::FilePath;

        let root = self.make_table(0).unwrap();
        let a = self.set_array(root, "A", 0).unwrap();
        self.set_u32(a, 0, 255).unwrap();
        self.set_bool(a, 1, true).unwrap();
        self.set_null(a, 2).unwrap();
        self.set_string(a, 3, "Hello There").unwrap();
        self.set_file_path(a, 4, &FilePath::parse("config://Hi").unwrap())
            .unwrap();
        let inner = self.set_array(a, 5, 0).unwrap();
        self.set_f32(inner, 0, 77.7).unwrap();
        self.set_f32(a, 6, 4.1).unwrap();
        self.set_f32(a, 7, 1.5).unwrap();

        let b = self.set_table(root, "B", 0).unwrap();
        self.set_f32(b, "1", 1.5).unwrap();
        self.set_u64(b, "2", u64::MAX).unwrap();
        self.set_null(b, "3").unwrap();
        self.set_i64(b, "4", i64::MIN).unwrap();
        self.set_f32(b, "5", 1.6666).unwrap();
        (root, a, b)
    }

    /// Replace the contents with a small fixture and damage one part of it.
    pub(crate) fn fill_with_corrupted_data(&mut self, corruption: Corruption) {
        use crate::heap::make_entry;
        use crate::node::Handle;

        let (root, a, b) = self.corruption_fixture();
        let string = self.get(a, 3).unwrap();
        let target = match corruption {
            Corruption::ArrayCapacity
            | Corruption::ArrayCount
            | Corruption::ArrayHandle
            | Corruption::ArrayOffset => a,
            Corruption::StringCapacity
            | Corruption::StringCount
            | Corruption::StringHandle
            | Corruption::StringOffset => string,
            _ => b,
        };
        let handle = target.handle().unwrap();
        let offset = self.heap.resolve(handle).unwrap();
        let len = self.heap.len_words();
        let bogus = target.with_handle(Handle::new(5_923_777, 2));

        match corruption {
            Corruption::ArrayCapacity | Corruption::StringCapacity | Corruption::TableCapacity => {
                let remaining = len - (offset + 2);
                self.heap.set_word(offset + 1, remaining + 1);
            }
            Corruption::ArrayCount | Corruption::StringCount | Corruption::TableCount => {
                let capacity = self.heap.word(offset + 1).unwrap();
                let count = match corruption {
                    // a string of `capacity * 4` bytes leaves no room for the NUL
                    Corruption::StringCount => capacity * 4,
                    _ => capacity + 1,
                };
                self.heap.set_word(offset, count);
            }
            Corruption::ArrayHandle => {
                self.put(root, "A".into(), bogus).unwrap();
            }
            Corruption::StringHandle => {
                self.put(a, 3.into(), bogus).unwrap();
            }
            Corruption::TableHandle => {
                self.put(root, "B".into(), bogus).unwrap();
            }
            Corruption::ArrayOffset | Corruption::StringOffset | Corruption::TableOffset => {
                let generation = handle.generation();
                self.heap
                    .set_handle_entry(handle.index(), make_entry(6_351_633, generation));
            }
            Corruption::TypeData => {
                // 26 is not a node type
                self.put(a, 1.into(), Node::from_raw(26)).unwrap();
            }
        }
    }
}
