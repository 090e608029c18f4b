//! Versioned binary save and load.
//!
//! Layout, all integers little-endian `u32`:
//!
//! | field        | contents                                             |
//! |--------------|------------------------------------------------------|
//! | signature    | 8 bytes, identifies the format family                |
//! | version      | format version (absent in version 0 files)           |
//! | paths        | byte length + NUL-terminated file path strings       |
//! | keys         | byte length + NUL-terminated table key strings       |
//! | handles      | byte length + handle table entries                   |
//! | data         | byte length + heap words                             |
//! | next handle  | allocation cursor                                    |
//! | allocated    | number of live handles                               |
//!
//! Both string tables start with a reserved empty entry. Table key slots and
//! file path nodes refer to their strings by position in the table: the
//! entry index in versions 0 and 2, the byte offset of the entry in
//! version 1. Only version 2 is written.

use std::collections::HashMap;
use std::io::{Read, Write};

use tracing::{debug, warn};

use crate::document::Document;
use crate::error::{Error, Result};
use crate::heap::{Heap, INVALID_OFFSET, MAX_HEAP_WORDS, WORD_BYTES, entry_offset};
use crate::intern::Interner;
use crate::node::{MAX_HANDLES, Node, NodeType};

const SIGNATURE: [u8; 8] = [0xEB, 0x4E, 0x6D, 0xBA, 0xBD, 0x66, 0xD1, 0xEC];
const SIGNATURE_VERSION_0: [u8; 8] = [0xFF, 0xFF, 0x00, 0xDE, 0xA7, 0x7F, 0x00, 0xDD];
const CURRENT_VERSION: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Version {
    V0,
    V1,
    V2,
}

impl Version {
    fn read(reader: &mut Reader<'_>) -> Result<Version> {
        let signature = reader.bytes(SIGNATURE.len())?;
        if signature == SIGNATURE_VERSION_0 {
            return Ok(Version::V0);
        }
        if signature != SIGNATURE {
            return Err(Error::InvalidSignature);
        }
        match reader.u32()? {
            1 => Ok(Version::V1),
            CURRENT_VERSION => Ok(Version::V2),
            other => Err(Error::UnsupportedVersion(other)),
        }
    }

    fn write_header(self, out: &mut Vec<u8>) {
        match self {
            Version::V0 => out.extend_from_slice(&SIGNATURE_VERSION_0),
            Version::V1 => {
                out.extend_from_slice(&SIGNATURE);
                out.extend_from_slice(&1u32.to_le_bytes());
            }
            Version::V2 => {
                out.extend_from_slice(&SIGNATURE);
                out.extend_from_slice(&CURRENT_VERSION.to_le_bytes());
            }
        }
    }

    /// Version 1 refers to strings by byte offset instead of by index.
    fn uses_byte_offsets(self) -> bool {
        self == Version::V1
    }
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Reader { data, pos: 0 }
    }

    fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).ok_or(Error::Truncated)?;
        let bytes = self.data.get(self.pos..end).ok_or(Error::Truncated)?;
        self.pos = end;
        Ok(bytes)
    }

    fn u32(&mut self) -> Result<u32> {
        let bytes = self.bytes(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Length-prefixed byte buffer.
    fn buffer(&mut self) -> Result<&'a [u8]> {
        let len = self.u32()?;
        self.bytes(len as usize)
    }

    /// Length-prefixed buffer of words.
    fn words(&mut self) -> Result<&'a [u8]> {
        let bytes = self.buffer()?;
        if bytes.len() % WORD_BYTES != 0 {
            return Err(Error::CorruptData);
        }
        Ok(bytes)
    }
}

fn write_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn write_buffer(out: &mut Vec<u8>, bytes: &[u8]) -> Result<()> {
    let len = u32::try_from(bytes.len()).map_err(|_| Error::StringTableFull)?;
    write_u32(out, len);
    out.extend_from_slice(bytes);
    Ok(())
}

/// String table as read from a file: each entry with its byte offset.
struct StringTable<'a> {
    entries: Vec<(u32, &'a str)>,
}

impl<'a> StringTable<'a> {
    fn parse(bytes: &'a [u8]) -> Result<Self> {
        let mut entries = Vec::new();
        if bytes.is_empty() {
            return Ok(StringTable { entries });
        }
        if bytes.last() != Some(&0) {
            return Err(Error::InvalidStringTable);
        }
        let mut pos = 0;
        while pos < bytes.len() {
            let len = bytes[pos..]
                .iter()
                .position(|&b| b == 0)
                .ok_or(Error::InvalidStringTable)?;
            let s = std::str::from_utf8(&bytes[pos..pos + len]).map_err(|_| Error::InvalidUtf8)?;
            entries.push((pos as u32, s));
            pos += len + 1;
        }
        if entries.first().is_some_and(|(_, s)| !s.is_empty()) {
            return Err(Error::InvalidStringTable);
        }
        Ok(StringTable { entries })
    }

    /// Intern every entry but the reserved first one. Returns the id of each
    /// entry, with 0 for the reserved entry.
    fn intern_into(&self, interner: &mut Interner) -> Result<Vec<u32>> {
        let mut ids = Vec::with_capacity(self.entries.len());
        for (i, (_, s)) in self.entries.iter().enumerate() {
            ids.push(if i == 0 { 0 } else { interner.intern(s)? });
        }
        Ok(ids)
    }

    /// Entry index for a stored reference.
    fn entry(&self, version: Version, reference: u32) -> Result<usize> {
        if version.uses_byte_offsets() {
            self.entries
                .binary_search_by_key(&reference, |&(offset, _)| offset)
                .map_err(|_| Error::InvalidStringTable)
        } else if (reference as usize) < self.entries.len() {
            Ok(reference as usize)
        } else {
            Err(Error::InvalidStringTable)
        }
    }
}

/// String table being written.
struct StringTableWriter {
    version: Version,
    bytes: Vec<u8>,
    count: u32,
    refs: HashMap<String, u32>,
}

impl StringTableWriter {
    fn new(version: Version) -> Self {
        StringTableWriter {
            version,
            bytes: vec![0],
            count: 1,
            refs: HashMap::new(),
        }
    }

    fn reference(&mut self, s: &str) -> Result<u32> {
        if let Some(&r) = self.refs.get(s) {
            return Ok(r);
        }
        if s.as_bytes().contains(&0) {
            return Err(Error::InvalidStringTable);
        }
        let r = if self.version.uses_byte_offsets() {
            u32::try_from(self.bytes.len()).map_err(|_| Error::StringTableFull)?
        } else {
            self.count
        };
        self.bytes.extend_from_slice(s.as_bytes());
        self.bytes.push(0);
        self.count += 1;
        self.refs.insert(s.to_owned(), r);
        Ok(r)
    }
}

impl Document {
    /// Serialize the reachable contents. The output depends only on what
    /// the document holds, so saving twice gives the same bytes.
    pub fn save(&self) -> Result<Vec<u8>> {
        self.encode(Version::V2)
    }

    pub fn save_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        let bytes = self.save()?;
        writer.write_all(&bytes)?;
        Ok(())
    }

    /// Decode a document written by [`Document::save`] or by an older
    /// version of the format.
    pub fn load(bytes: &[u8]) -> Result<Document> {
        let mut reader = Reader::new(bytes);
        let version = Version::read(&mut reader)?;
        let doc = decode(version, &mut reader)?;
        debug!(
            ?version,
            bytes = bytes.len(),
            handles = doc.handle_count(),
            "loaded document"
        );
        Ok(doc)
    }

    pub fn load_from<R: Read>(reader: &mut R) -> Result<Document> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        Document::load(&bytes)
    }

    /// Replace this document with one decoded from `bytes`. On error the
    /// document is unchanged.
    pub fn load_in_place(&mut self, bytes: &[u8]) -> Result<()> {
        let mut loaded = Document::load(bytes)?;
        self.swap(&mut loaded);
        Ok(())
    }

    fn encode(&self, version: Version) -> Result<Vec<u8>> {
        self.check_integrity()?;
        let mut copy = self.clone();
        copy.collect_garbage_and_compact_heap()?;
        copy.compact_handle_offsets()?;

        let mut paths = StringTableWriter::new(version);
        let mut keys = StringTableWriter::new(version);
        if !copy.heap.is_empty() {
            let key_names = std::mem::take(&mut copy.keys);
            let path_names = std::mem::take(&mut copy.paths);
            copy.remap_references(
                |id| keys.reference(key_names.resolve(id).ok_or(Error::CorruptData)?),
                |id| paths.reference(path_names.resolve(id).ok_or(Error::CorruptData)?),
            )?;
        }

        let heap = &copy.heap;
        let mut out = Vec::with_capacity(
            32 + paths.bytes.len() + keys.bytes.len() + heap.bytes().len() + heap.handles().len() * 4,
        );
        version.write_header(&mut out);
        let (path_bytes, key_bytes) = if heap.is_empty() {
            (&[][..], &[][..])
        } else {
            (&paths.bytes[..], &keys.bytes[..])
        };
        write_buffer(&mut out, path_bytes)?;
        write_buffer(&mut out, key_bytes)?;
        let handles: Vec<u8> = heap
            .handles()
            .iter()
            .flat_map(|entry| entry.to_le_bytes())
            .collect();
        write_buffer(&mut out, &handles)?;
        write_buffer(&mut out, heap.bytes())?;
        write_u32(&mut out, heap.next_handle());
        write_u32(&mut out, heap.allocated());
        debug!(?version, bytes = out.len(), handles = heap.allocated(), "saved document");
        Ok(out)
    }

    /// Rewrite every table key id and file path id reachable from the root.
    /// Key slot 0 (empty) and path id 0 (empty path) are left alone.
    fn remap_references(
        &mut self,
        mut key: impl FnMut(u32) -> Result<u32>,
        mut path: impl FnMut(u32) -> Result<u32>,
    ) -> Result<()> {
        for node in self.reachable_nodes()? {
            match node.node_type() {
                Some(NodeType::Array) => {
                    let (_, block) = self.array_block(node)?;
                    for i in 0..block.count {
                        self.remap_file_path(block.value_slot(i), &mut path)?;
                    }
                }
                Some(NodeType::Table) => {
                    let (_, block) = self.table_block(node)?;
                    for i in 0..block.capacity {
                        let slot = block.key_slot(i);
                        let id = self.heap.word(slot).ok_or(Error::CorruptData)?;
                        if id == 0 {
                            continue;
                        }
                        self.heap.set_word(slot, key(id)?);
                        self.remap_file_path(block.value_slot(i), &mut path)?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn remap_file_path(&mut self, slot: u32, path: &mut impl FnMut(u32) -> Result<u32>) -> Result<()> {
        let node = Node::from_raw(self.heap.word(slot).ok_or(Error::CorruptData)?);
        if node.node_type() != Some(NodeType::FilePath) {
            return Ok(());
        }
        let (directory, id) = node.file_path_parts();
        if id != 0 {
            self.heap
                .set_word(slot, Node::file_path(directory, path(id)?).raw());
        }
        Ok(())
    }
}

fn decode(version: Version, reader: &mut Reader<'_>) -> Result<Document> {
    let paths = StringTable::parse(reader.buffer()?)?;
    let keys = StringTable::parse(reader.buffer()?)?;
    let handle_bytes = reader.words()?;
    let data = reader.words()?;
    let next_handle = reader.u32()?;
    let allocated = reader.u32()?;

    let handles: Vec<u32> = handle_bytes
        .chunks_exact(4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    let live = handles
        .iter()
        .filter(|&&entry| entry_offset(entry) != INVALID_OFFSET)
        .count();
    if handles.len() > MAX_HANDLES as usize
        || data.len() / WORD_BYTES > MAX_HEAP_WORDS as usize
        || live != allocated as usize
        || next_handle as usize > handles.len()
    {
        return Err(Error::CorruptData);
    }

    let mut doc = Document {
        heap: Heap::from_parts(data.to_vec(), handles, next_handle, allocated),
        keys: Interner::new(),
        paths: Interner::new(),
    };
    if !doc.heap.is_empty() {
        let key_ids = keys.intern_into(&mut doc.keys)?;
        let path_ids = paths.intern_into(&mut doc.paths)?;
        doc.remap_references(
            |r| Ok(key_ids[keys.entry(version, r)?]),
            |r| Ok(path_ids[paths.entry(version, r)?]),
        )?;
    }
    if let Err(e) = doc.check_integrity() {
        warn!(error = %e, "loaded document failed integrity check");
        return Err(Error::CorruptData);
    }

    let handle_len = doc.heap.handles().len();
    if handle_len > (allocated as usize).next_power_of_two() {
        doc.compact_handle_offsets()?;
    }
    Ok(doc)
}
