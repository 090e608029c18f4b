//! Relocatable word heap and handle table.
//!
//! The heap is a little-endian byte buffer addressed in 4-byte words. Word 0
//! of a non-empty heap holds the root node. Boxed nodes never store an offset
//! directly: they carry a [`Handle`] whose entry in the handle table records
//! the current word offset (low 29 bits) and a 3-bit generation (high bits).
//! Moving a block therefore only rewrites one handle table entry.
//!
//! Block layouts (offsets in words):
//!
//! | Kind     | Layout                                                   |
//! |----------|----------------------------------------------------------|
//! | Array    | count, capacity, `capacity` node slots                   |
//! | Table    | count, capacity, `capacity` values, `capacity` key ids   |
//! | String   | byte length, word capacity, bytes + NUL, zero padded     |
//! | 32-bit   | one word                                                 |
//! | 64-bit   | two words, low half first                                |

use crate::error::{Error, Result};
use crate::node::{GENERATION_MASK, Handle, MAX_HANDLES, NodeType};

pub(crate) const WORD_BYTES: usize = 4;
pub(crate) const HEADER_WORDS: u32 = 2;

/// Handle table offset value marking a free entry.
pub(crate) const INVALID_OFFSET: u32 = (1 << 29) - 1;
/// Largest heap size, in words.
pub(crate) const MAX_HEAP_WORDS: u32 = INVALID_OFFSET - 1;

const GENERATION_SHIFT: u32 = 29;
const MIN_HANDLE_TABLE_LEN: usize = 16;

#[inline]
pub(crate) const fn entry_offset(entry: u32) -> u32 {
    entry & INVALID_OFFSET
}

#[inline]
pub(crate) const fn entry_generation(entry: u32) -> u8 {
    (entry >> GENERATION_SHIFT) as u8
}

#[inline]
pub(crate) const fn make_entry(offset: u32, generation: u8) -> u32 {
    (((generation & GENERATION_MASK) as u32) << GENERATION_SHIFT) | (offset & INVALID_OFFSET)
}

/// Words occupied by a header-prefixed block of the given kind and capacity.
pub(crate) fn block_words(ty: NodeType, capacity: u32) -> Option<u32> {
    match ty {
        NodeType::Array | NodeType::String => HEADER_WORDS.checked_add(capacity),
        NodeType::Table => capacity.checked_mul(2)?.checked_add(HEADER_WORDS),
        _ => None,
    }
}

/// Word capacity needed to store `len` string bytes plus the NUL terminator.
#[inline]
pub(crate) fn string_capacity(len: usize) -> Option<u32> {
    u32::try_from((len + 1).div_ceil(WORD_BYTES)).ok()
}

/// Resolved header of a container or string block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Block {
    pub(crate) offset: u32,
    pub(crate) count: u32,
    pub(crate) capacity: u32,
}

impl Block {
    /// Word offset of value slot `i`.
    #[inline]
    pub(crate) const fn value_slot(self, i: u32) -> u32 {
        self.offset + HEADER_WORDS + i
    }

    /// Word offset of key slot `i` (tables only).
    #[inline]
    pub(crate) const fn key_slot(self, i: u32) -> u32 {
        self.offset + HEADER_WORDS + self.capacity + i
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Heap {
    data: Vec<u8>,
    handles: Vec<u32>,
    next_handle: u32,
    allocated: u32,
}

impl Heap {
    pub(crate) fn with_capacity(bytes: usize) -> Self {
        Heap {
            data: Vec::with_capacity(bytes),
            ..Heap::default()
        }
    }

    /// Assemble a heap from already validated parts.
    pub(crate) fn from_parts(
        data: Vec<u8>,
        handles: Vec<u32>,
        next_handle: u32,
        allocated: u32,
    ) -> Self {
        Heap {
            data,
            handles,
            next_handle,
            allocated,
        }
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub(crate) fn len_words(&self) -> u32 {
        (self.data.len() / WORD_BYTES) as u32
    }

    #[inline]
    pub(crate) fn bytes(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub(crate) fn capacity_bytes(&self) -> usize {
        self.data.capacity()
    }

    #[inline]
    pub(crate) fn handles(&self) -> &[u32] {
        &self.handles
    }

    #[inline]
    pub(crate) fn next_handle(&self) -> u32 {
        self.next_handle
    }

    #[inline]
    pub(crate) fn allocated(&self) -> u32 {
        self.allocated
    }

    pub(crate) fn shrink_to_fit(&mut self) {
        self.data.shrink_to_fit();
        self.handles.shrink_to_fit();
    }

    /// An empty heap sharing this heap's handle table layout with every entry
    /// freed. Blocks copied into it are re-registered with [`Heap::bind`].
    pub(crate) fn detached(&self) -> Heap {
        Heap {
            data: Vec::with_capacity(self.data.capacity()),
            handles: self
                .handles
                .iter()
                .map(|&entry| make_entry(INVALID_OFFSET, entry_generation(entry)))
                .collect(),
            next_handle: self.next_handle,
            allocated: 0,
        }
    }

    /// An empty heap with `len` free handle entries at generation 0.
    pub(crate) fn with_handle_slots(len: usize) -> Heap {
        Heap {
            handles: vec![make_entry(INVALID_OFFSET, 0); len],
            ..Heap::default()
        }
    }

    /// Register `handle` (index and generation) as live at `offset`.
    pub(crate) fn bind(&mut self, handle: Handle, offset: u32) -> Result<()> {
        let entry = self
            .handles
            .get_mut(handle.index() as usize)
            .ok_or(Error::CorruptData)?;
        if entry_offset(*entry) != INVALID_OFFSET {
            return Err(Error::CorruptData);
        }
        *entry = make_entry(offset, handle.generation());
        self.allocated += 1;
        Ok(())
    }

    /// Append `n` words copied from `src` at `from`. Returns the new offset.
    pub(crate) fn append_from(&mut self, src: &Heap, from: u32, n: u32) -> Result<u32> {
        let bytes = src
            .byte_range(from, n as usize * WORD_BYTES)
            .ok_or(Error::CorruptData)?;
        let offset = self.len_words();
        match offset.checked_add(n) {
            Some(end) if end <= MAX_HEAP_WORDS => {}
            _ => return Err(Error::HeapExhausted),
        }
        self.data.extend_from_slice(bytes);
        Ok(offset)
    }

    /// Drop all data and invalidate every handle. Generations are kept, so
    /// nodes issued before the reset stay stale even if their index is
    /// handed out again.
    pub(crate) fn reset(&mut self) {
        self.data.clear();
        for entry in &mut self.handles {
            *entry = make_entry(INVALID_OFFSET, entry_generation(*entry));
        }
        self.next_handle = 0;
        self.allocated = 0;
    }

    // ------------------------------------------------------------------
    // Words
    // ------------------------------------------------------------------

    #[inline]
    pub(crate) fn word(&self, offset: u32) -> Option<u32> {
        let start = (offset as usize).checked_mul(WORD_BYTES)?;
        let bytes = self.data.get(start..start + WORD_BYTES)?;
        Some(u32::from_le_bytes(bytes.try_into().ok()?))
    }

    /// Write a word at an offset the caller already validated.
    #[inline]
    pub(crate) fn set_word(&mut self, offset: u32, value: u32) {
        let start = offset as usize * WORD_BYTES;
        debug_assert!(start + WORD_BYTES <= self.data.len());
        if let Some(bytes) = self.data.get_mut(start..start + WORD_BYTES) {
            bytes.copy_from_slice(&value.to_le_bytes());
        }
    }

    /// Byte view of `len` bytes starting at word `offset`.
    #[inline]
    pub(crate) fn byte_range(&self, offset: u32, len: usize) -> Option<&[u8]> {
        let start = (offset as usize).checked_mul(WORD_BYTES)?;
        self.data.get(start..start.checked_add(len)?)
    }

    /// Append `n` zeroed words, returning the offset of the first.
    pub(crate) fn push_words(&mut self, n: u32) -> Result<u32> {
        let offset = self.len_words();
        match offset.checked_add(n) {
            Some(end) if end <= MAX_HEAP_WORDS => {}
            _ => return Err(Error::HeapExhausted),
        }
        self.data.resize(self.data.len() + n as usize * WORD_BYTES, 0);
        Ok(offset)
    }

    fn truncate_words(&mut self, len: u32) {
        self.data.truncate(len as usize * WORD_BYTES);
    }

    /// Copy `n` words starting at `from` to the end of the heap.
    fn copy_to_end(&mut self, from: u32, n: u32) -> Result<u32> {
        let offset = self.len_words();
        match offset.checked_add(n) {
            Some(end) if end <= MAX_HEAP_WORDS => {}
            _ => return Err(Error::HeapExhausted),
        }
        let start = from as usize * WORD_BYTES;
        self.data
            .extend_from_within(start..start + n as usize * WORD_BYTES);
        Ok(offset)
    }

    // ------------------------------------------------------------------
    // Handles
    // ------------------------------------------------------------------

    /// Word offset of a live handle.
    pub(crate) fn resolve(&self, handle: Handle) -> Result<u32> {
        let entry = *self
            .handles
            .get(handle.index() as usize)
            .ok_or(Error::StaleHandle)?;
        let offset = entry_offset(entry);
        if offset == INVALID_OFFSET
            || entry_generation(entry) != handle.generation()
            || offset >= self.len_words()
        {
            return Err(Error::StaleHandle);
        }
        Ok(offset)
    }

    #[inline]
    pub(crate) fn is_live(&self, handle: Handle) -> bool {
        self.resolve(handle).is_ok()
    }

    fn grow_handle_table(&mut self) -> Result<()> {
        let len = self.handles.len();
        if len >= MAX_HANDLES as usize {
            return Err(Error::HandlesExhausted);
        }
        let new_len = (len + 1)
            .next_power_of_two()
            .clamp(MIN_HANDLE_TABLE_LEN, MAX_HANDLES as usize);
        self.handles
            .resize(new_len, make_entry(INVALID_OFFSET, 0));
        // continue scanning in the fresh region
        self.next_handle = len as u32;
        Ok(())
    }

    /// Issue a handle for a block at `offset`.
    pub(crate) fn allocate_handle(&mut self, offset: u32) -> Result<Handle> {
        if self.allocated as usize >= self.handles.len() {
            self.grow_handle_table()?;
        }
        let len = self.handles.len() as u32;
        let start = if self.next_handle < len {
            self.next_handle
        } else {
            0
        };
        for step in 0..len {
            let index = (start + step) % len;
            let entry = self.handles[index as usize];
            if entry_offset(entry) == INVALID_OFFSET {
                let generation = entry_generation(entry).wrapping_add(1) & GENERATION_MASK;
                self.handles[index as usize] = make_entry(offset, generation);
                self.next_handle = (index + 1) % len;
                self.allocated += 1;
                return Ok(Handle::new(index, generation));
            }
        }
        // allocated count disagrees with the table contents
        Err(Error::CorruptData)
    }

    /// Free a handle. Its data becomes garbage. Stale handles are ignored.
    pub(crate) fn release(&mut self, handle: Handle) {
        if !self.is_live(handle) {
            return;
        }
        if let Some(entry) = self.handles.get_mut(handle.index() as usize) {
            *entry = make_entry(INVALID_OFFSET, entry_generation(*entry));
            self.allocated = self.allocated.saturating_sub(1);
        }
    }

    fn set_offset(&mut self, handle: Handle, offset: u32) {
        if let Some(entry) = self.handles.get_mut(handle.index() as usize) {
            *entry = make_entry(offset, entry_generation(*entry));
        }
    }

    // ------------------------------------------------------------------
    // Blocks
    // ------------------------------------------------------------------

    /// Allocate `words` zeroed words and a handle for them.
    pub(crate) fn allocate(&mut self, words: u32) -> Result<Handle> {
        let before = self.len_words();
        let offset = self.push_words(words)?;
        match self.allocate_handle(offset) {
            Ok(handle) => Ok(handle),
            Err(e) => {
                self.truncate_words(before);
                Err(e)
            }
        }
    }

    /// Grow a block from `old_words` to `new_words`, in place when it ends
    /// the heap and by copying it to the end otherwise. Returns the new
    /// offset.
    pub(crate) fn reallocate(&mut self, handle: Handle, old_words: u32, new_words: u32) -> Result<u32> {
        let offset = self.resolve(handle)?;
        if new_words <= old_words {
            return Ok(offset);
        }
        let end = offset.checked_add(old_words).ok_or(Error::CorruptData)?;
        if end > self.len_words() {
            return Err(Error::CorruptData);
        }
        if end == self.len_words() {
            self.push_words(new_words - old_words)?;
            return Ok(offset);
        }
        let before = self.len_words();
        let moved = self.copy_to_end(offset, old_words)?;
        if let Err(e) = self.push_words(new_words - old_words) {
            self.truncate_words(before);
            return Err(e);
        }
        self.set_offset(handle, moved);
        Ok(moved)
    }

    pub(crate) fn allocate_container(&mut self, ty: NodeType, capacity: u32) -> Result<Handle> {
        let words = block_words(ty, capacity).ok_or(Error::HeapExhausted)?;
        let handle = self.allocate(words)?;
        let offset = self.resolve(handle)?;
        self.set_word(offset + 1, capacity);
        Ok(handle)
    }

    pub(crate) fn allocate_string(&mut self, s: &str) -> Result<Handle> {
        let len = u32::try_from(s.len()).map_err(|_| Error::HeapExhausted)?;
        let capacity = string_capacity(s.len()).ok_or(Error::HeapExhausted)?;
        let words = HEADER_WORDS
            .checked_add(capacity)
            .ok_or(Error::HeapExhausted)?;
        let handle = self.allocate(words)?;
        let offset = self.resolve(handle)?;
        self.set_word(offset, len);
        self.set_word(offset + 1, capacity);
        let start = (offset + HEADER_WORDS) as usize * WORD_BYTES;
        self.data[start..start + s.len()].copy_from_slice(s.as_bytes());
        Ok(handle)
    }

    pub(crate) fn allocate_u32(&mut self, value: u32) -> Result<Handle> {
        let handle = self.allocate(1)?;
        let offset = self.resolve(handle)?;
        self.set_word(offset, value);
        Ok(handle)
    }

    pub(crate) fn allocate_u64(&mut self, value: u64) -> Result<Handle> {
        let handle = self.allocate(2)?;
        let offset = self.resolve(handle)?;
        self.set_word(offset, value as u32);
        self.set_word(offset + 1, (value >> 32) as u32);
        Ok(handle)
    }

    /// Resolve and validate the header of a container or string block.
    pub(crate) fn block(&self, handle: Handle, ty: NodeType) -> Result<Block> {
        let offset = self.resolve(handle)?;
        let count = self.word(offset).ok_or(Error::CorruptData)?;
        let capacity = self.word(offset + 1).ok_or(Error::CorruptData)?;
        let words = block_words(ty, capacity).ok_or(Error::CorruptData)?;
        match offset.checked_add(words) {
            Some(end) if end <= self.len_words() => {}
            _ => return Err(Error::CorruptData),
        }
        let consistent = match ty {
            NodeType::Array => count <= capacity,
            NodeType::Table => count <= capacity && (capacity == 0 || capacity.is_power_of_two()),
            NodeType::String => u64::from(count) + 1 <= u64::from(capacity) * WORD_BYTES as u64,
            _ => false,
        };
        if !consistent {
            return Err(Error::CorruptData);
        }
        Ok(Block {
            offset,
            count,
            capacity,
        })
    }

    #[inline]
    pub(crate) fn set_count(&mut self, block: &mut Block, count: u32) {
        block.count = count;
        self.set_word(block.offset, count);
    }

    pub(crate) fn string(&self, handle: Handle) -> Result<&str> {
        let block = self.block(handle, NodeType::String)?;
        let bytes = self
            .byte_range(block.offset + HEADER_WORDS, block.count as usize)
            .ok_or(Error::CorruptData)?;
        std::str::from_utf8(bytes).map_err(|_| Error::InvalidUtf8)
    }

    pub(crate) fn read_u32(&self, handle: Handle) -> Result<u32> {
        let offset = self.resolve(handle)?;
        self.word(offset).ok_or(Error::CorruptData)
    }

    pub(crate) fn read_u64(&self, handle: Handle) -> Result<u64> {
        let offset = self.resolve(handle)?;
        let lo = self.word(offset).ok_or(Error::CorruptData)?;
        let hi = self.word(offset + 1).ok_or(Error::CorruptData)?;
        Ok(u64::from(lo) | (u64::from(hi) << 32))
    }

    /// Overwrite a raw handle table entry. Only used to inject corruption.
    #[cfg(test)]
    pub(crate) fn set_handle_entry(&mut self, index: u32, entry: u32) {
        if let Some(slot) = self.handles.get_mut(index as usize) {
            *slot = entry;
        }
    }
}
