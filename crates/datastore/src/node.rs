//! Packed node encoding.
//!
//! Every value in a document is a 32-bit [`Node`]. Bit 0 set means the node
//! is an inline `Float31`; otherwise the low 5 bits hold the [`NodeType`] code
//! and the upper 27 bits hold a type-specific payload.
//!
//! | Type           | Code | Payload (bits 5-31)                      |
//! |----------------|------|------------------------------------------|
//! | `Null`         | 0    | -                                        |
//! | `Float31`      | 1    | f32 bits with bit 0 forced to 1          |
//! | `Boolean`      | 2    | 0 or 1                                   |
//! | `Int32Small`   | 4    | 27-bit two's complement integer          |
//! | `FilePath`     | 6    | path id (24 bits) + directory (3 bits)   |
//! | `Table`        | 8    | handle                                   |
//! | `Array`        | 10   | handle                                   |
//! | `String`       | 12   | handle                                   |
//! | `Int32Big`     | 14   | handle                                   |
//! | `UInt32`       | 16   | handle                                   |
//! | `Int64`        | 18   | handle                                   |
//! | `UInt64`       | 20   | handle                                   |
//! | `SpecialErase` | 22   | -                                        |
//! | `Float32`      | 24   | handle                                   |
//!
//! A handle is a 24-bit index into the document's handle table plus a 3-bit
//! generation, so a node never holds a raw heap offset.

use std::fmt;

/// Bit pattern every NaN is stored as. Bit 0 is clear so it survives the
/// Float31 tag.
pub const CANONICAL_NAN_BITS: u32 = 0xFFFF_FFFE;

/// Largest value stored inline as `Int32Small`.
pub const MAX_INT32_SMALL: i32 = (1 << 26) - 1;
/// Smallest value stored inline as `Int32Small`.
pub const MIN_INT32_SMALL: i32 = !MAX_INT32_SMALL;

const TYPE_BITS: u32 = 5;
const TYPE_MASK: u32 = (1 << TYPE_BITS) - 1;

const GENERATION_BITS: u32 = 3;
pub(crate) const GENERATION_MASK: u8 = (1 << GENERATION_BITS) - 1;

/// Number of handle table entries a node payload can address.
pub const MAX_HANDLES: u32 = 1 << 24;

const DIRECTORY_BITS: u32 = 3;
/// Number of distinct file path ids a node payload can address.
pub const MAX_FILE_PATH_IDS: u32 = 1 << 24;

/// Node type stored in the low bits of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum NodeType {
    Null = 0,
    Float31 = 1,
    Boolean = 2,
    Int32Small = 4,
    FilePath = 6,
    Table = 8,
    Array = 10,
    String = 12,
    Int32Big = 14,
    UInt32 = 16,
    Int64 = 18,
    UInt64 = 20,
    SpecialErase = 22,
    Float32 = 24,
}

impl NodeType {
    /// Parse a type from the low 5 bits of a node that is not a `Float31`.
    #[inline]
    #[must_use]
    pub fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            0 => NodeType::Null,
            1 => NodeType::Float31,
            2 => NodeType::Boolean,
            4 => NodeType::Int32Small,
            6 => NodeType::FilePath,
            8 => NodeType::Table,
            10 => NodeType::Array,
            12 => NodeType::String,
            14 => NodeType::Int32Big,
            16 => NodeType::UInt32,
            18 => NodeType::Int64,
            20 => NodeType::UInt64,
            22 => NodeType::SpecialErase,
            24 => NodeType::Float32,
            _ => return None,
        })
    }

    /// Get the type name as a string (for error messages).
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            NodeType::Null => "null",
            NodeType::Float31 => "float31",
            NodeType::Boolean => "boolean",
            NodeType::Int32Small => "int32small",
            NodeType::FilePath => "filepath",
            NodeType::Table => "table",
            NodeType::Array => "array",
            NodeType::String => "string",
            NodeType::Int32Big => "int32big",
            NodeType::UInt32 => "uint32",
            NodeType::Int64 => "int64",
            NodeType::UInt64 => "uint64",
            NodeType::SpecialErase => "special_erase",
            NodeType::Float32 => "float32",
        }
    }

    /// True if the payload lives in the heap and the node carries a handle.
    #[inline]
    #[must_use]
    pub fn is_boxed(self) -> bool {
        matches!(
            self,
            NodeType::Table
                | NodeType::Array
                | NodeType::String
                | NodeType::Int32Big
                | NodeType::UInt32
                | NodeType::Int64
                | NodeType::UInt64
                | NodeType::Float32
        )
    }

    /// True for arrays and tables.
    #[inline]
    #[must_use]
    pub fn is_container(self) -> bool {
        matches!(self, NodeType::Table | NodeType::Array)
    }

    /// Heap words used by a fixed-size boxed scalar, `None` for inline types
    /// and for header-prefixed blocks (containers and strings).
    #[inline]
    #[must_use]
    pub(crate) fn scalar_words(self) -> Option<u32> {
        match self {
            NodeType::Int32Big | NodeType::UInt32 | NodeType::Float32 => Some(1),
            NodeType::Int64 | NodeType::UInt64 => Some(2),
            _ => None,
        }
    }
}

/// Reference to a boxed payload: handle table index plus generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    index: u32,
    generation: u8,
}

impl Handle {
    #[inline]
    #[must_use]
    pub(crate) const fn new(index: u32, generation: u8) -> Self {
        Handle {
            index,
            generation: generation & GENERATION_MASK,
        }
    }

    /// Index into the handle table.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Generation the handle was issued with.
    #[inline]
    #[must_use]
    pub const fn generation(self) -> u8 {
        self.generation
    }

    #[inline]
    const fn pack(self) -> u32 {
        (self.index << GENERATION_BITS) | self.generation as u32
    }

    #[inline]
    const fn unpack(payload: u32) -> Self {
        Handle {
            index: payload >> GENERATION_BITS,
            generation: (payload as u8) & GENERATION_MASK,
        }
    }
}

/// A single packed value. Cheap to copy; only meaningful together with the
/// document that issued it.
///
/// Stale-node detection is best-effort. A boxed node carries only a 3-bit
/// generation, so once its handle slot has been freed and reused eight times
/// the old node matches again and reads whatever now lives there. Drop nodes
/// whose value was overwritten or erased instead of relying on
/// [`Error::StaleHandle`](crate::Error::StaleHandle).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Node(u32);

impl Node {
    /// The null node.
    pub const NULL: Node = Node(NodeType::Null as u32);
    /// Tombstone marking a deleted entry in a diff.
    pub const SPECIAL_ERASE: Node = Node(NodeType::SpecialErase as u32);

    /// Create a node from its raw 32-bit representation.
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Node(raw)
    }

    /// Get the raw 32-bit representation.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Get the node type, `None` if the type bits are not a known type.
    #[inline]
    #[must_use]
    pub fn node_type(self) -> Option<NodeType> {
        if self.0 & 1 != 0 {
            Some(NodeType::Float31)
        } else {
            NodeType::from_code(self.0 & TYPE_MASK)
        }
    }

    /// Type name, `"invalid"` for unknown type bits.
    #[must_use]
    pub fn type_name(self) -> &'static str {
        self.node_type().map_or("invalid", NodeType::name)
    }

    #[inline]
    #[must_use]
    pub fn is_null(self) -> bool {
        self.node_type() == Some(NodeType::Null)
    }

    #[inline]
    #[must_use]
    pub fn is_array(self) -> bool {
        self.node_type() == Some(NodeType::Array)
    }

    #[inline]
    #[must_use]
    pub fn is_table(self) -> bool {
        self.node_type() == Some(NodeType::Table)
    }

    #[inline]
    #[must_use]
    pub fn is_container(self) -> bool {
        self.node_type().is_some_and(NodeType::is_container)
    }

    #[inline]
    #[must_use]
    pub fn is_special_erase(self) -> bool {
        self.node_type() == Some(NodeType::SpecialErase)
    }

    #[inline]
    #[must_use]
    pub fn is_boxed(self) -> bool {
        self.node_type().is_some_and(NodeType::is_boxed)
    }

    #[inline]
    const fn with_payload(ty: NodeType, payload: u32) -> Self {
        Node((payload << TYPE_BITS) | ty as u32)
    }

    #[inline]
    const fn payload(self) -> u32 {
        self.0 >> TYPE_BITS
    }

    // --- Inline scalars ---

    #[inline]
    #[must_use]
    pub(crate) const fn boolean(value: bool) -> Self {
        Node::with_payload(NodeType::Boolean, value as u32)
    }

    /// Only valid when `node_type()` == Boolean.
    #[inline]
    #[must_use]
    pub(crate) const fn bool_value(self) -> bool {
        self.payload() != 0
    }

    /// Encode `value` inline, `None` if it is outside the 27-bit range.
    #[inline]
    #[must_use]
    pub(crate) const fn int32_small(value: i32) -> Option<Self> {
        if value < MIN_INT32_SMALL || value > MAX_INT32_SMALL {
            return None;
        }
        Some(Node::with_payload(NodeType::Int32Small, value as u32))
    }

    /// Only valid when `node_type()` == Int32Small.
    #[inline]
    #[must_use]
    pub(crate) const fn small_int_value(self) -> i32 {
        // arithmetic shift restores the sign
        (self.0 as i32) >> TYPE_BITS
    }

    /// Encode `value` inline, `None` if its lowest mantissa bit is set. Any
    /// NaN is stored as [`CANONICAL_NAN_BITS`].
    #[inline]
    #[must_use]
    pub(crate) fn float31(value: f32) -> Option<Self> {
        let bits = if value.is_nan() {
            CANONICAL_NAN_BITS
        } else {
            value.to_bits()
        };
        if bits & 1 != 0 {
            return None;
        }
        Some(Node(bits | 1))
    }

    /// Only valid when `node_type()` == Float31.
    #[inline]
    #[must_use]
    pub(crate) const fn float31_value(self) -> f32 {
        f32::from_bits(self.0 & !1)
    }

    #[inline]
    #[must_use]
    pub(crate) const fn file_path(directory: u8, path_id: u32) -> Self {
        Node::with_payload(
            NodeType::FilePath,
            (path_id << DIRECTORY_BITS) | (directory as u32 & ((1 << DIRECTORY_BITS) - 1)),
        )
    }

    /// Only valid when `node_type()` == FilePath. Returns (directory, path id).
    #[inline]
    #[must_use]
    pub(crate) const fn file_path_parts(self) -> (u8, u32) {
        let payload = self.payload();
        (
            (payload & ((1 << DIRECTORY_BITS) - 1)) as u8,
            payload >> DIRECTORY_BITS,
        )
    }

    // --- Boxed values ---

    #[inline]
    #[must_use]
    pub(crate) const fn boxed(ty: NodeType, handle: Handle) -> Self {
        Node::with_payload(ty, handle.pack())
    }

    /// Handle of a boxed node, `None` for inline types.
    #[inline]
    #[must_use]
    pub fn handle(self) -> Option<Handle> {
        if self.is_boxed() {
            Some(Handle::unpack(self.payload()))
        } else {
            None
        }
    }

    /// Same node type, different handle. Only valid on boxed nodes.
    #[inline]
    #[must_use]
    pub(crate) fn with_handle(self, handle: Handle) -> Self {
        Node((handle.pack() << TYPE_BITS) | (self.0 & TYPE_MASK))
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.node_type() {
            None => write!(f, "Node(invalid {:#010x})", self.0),
            Some(NodeType::Null) => write!(f, "Node(null)"),
            Some(NodeType::SpecialErase) => write!(f, "Node(special_erase)"),
            Some(NodeType::Boolean) => write!(f, "Node({})", self.bool_value()),
            Some(NodeType::Int32Small) => write!(f, "Node({}i32)", self.small_int_value()),
            Some(NodeType::Float31) => write!(f, "Node({}f31)", self.float31_value()),
            Some(NodeType::FilePath) => {
                let (dir, id) = self.file_path_parts();
                write!(f, "Node(filepath dir={dir} id={id})")
            }
            Some(ty) => {
                let h = Handle::unpack(self.payload());
                write!(
                    f,
                    "Node({} #{}g{})",
                    ty.name(),
                    h.index(),
                    h.generation()
                )
            }
        }
    }
}
