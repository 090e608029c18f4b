//! Canonical content hashing.
//!
//! The digest depends only on logical content: numbers hash by value (an
//! integral float hashes like the integer it equals), every NaN hashes the
//! same, table entries hash in key order, and garbage or capacity never
//! contribute. Documents that compare equal with `nan_equal` hash equal.

use md5::{Digest, Md5};

use crate::document::Document;
use crate::error::Result;
use crate::node::{CANONICAL_NAN_BITS, Node, NodeType};
use crate::value::Value;

// class tags fed to the hash ahead of each value
const TAG_NULL: u8 = NodeType::Null as u8;
const TAG_FLOAT: u8 = NodeType::Float31 as u8;
const TAG_BOOL: u8 = NodeType::Boolean as u8;
const TAG_INTEGER: u8 = NodeType::Int32Small as u8;
const TAG_FILE_PATH: u8 = NodeType::FilePath as u8;
const TAG_TABLE: u8 = NodeType::Table as u8;
const TAG_ARRAY: u8 = NodeType::Array as u8;
const TAG_STRING: u8 = NodeType::String as u8;
const TAG_SPECIAL_ERASE: u8 = NodeType::SpecialErase as u8;

/// 2^64, the largest magnitude an integral float is hashed as an integer.
const INTEGRAL_LIMIT: f32 = 18_446_744_073_709_551_616.0;

fn hash_bytes(md5: &mut Md5, bytes: &[u8]) {
    md5.update(&(bytes.len() as u32).to_le_bytes());
    md5.update(bytes);
}

fn hash_integer(md5: &mut Md5, n: i128) {
    md5.update(&[TAG_INTEGER]);
    md5.update(&n.to_le_bytes());
}

fn hash_float(md5: &mut Md5, f: f32) {
    if f.is_finite() && f.fract() == 0.0 && f.abs() <= INTEGRAL_LIMIT {
        // also folds -0 into +0
        hash_integer(md5, f as i128);
        return;
    }
    let bits = if f.is_nan() {
        CANONICAL_NAN_BITS
    } else {
        f.to_bits()
    };
    md5.update(&[TAG_FLOAT]);
    md5.update(&bits.to_le_bytes());
}

impl Document {
    /// MD5 of the canonical form of the document, as 32 lowercase hex
    /// characters.
    pub fn compute_md5(&self) -> Result<String> {
        let root = self.root();
        self.check_subtree(root)?;
        let mut md5 = Md5::new();
        self.hash_node(&mut md5, root)?;
        Ok(hex::encode(md5.finalize()))
    }

    fn hash_node(&self, md5: &mut Md5, node: Node) -> Result<()> {
        let value = self.value(node)?;
        if let Some(n) = value.as_integer() {
            hash_integer(md5, n);
            return Ok(());
        }
        match value {
            Value::Null => md5.update(&[TAG_NULL]),
            Value::SpecialErase => md5.update(&[TAG_SPECIAL_ERASE]),
            Value::Bool(b) => md5.update(&[TAG_BOOL, u8::from(b)]),
            Value::Float32(f) => hash_float(md5, f),
            Value::String(s) => {
                md5.update(&[TAG_STRING]);
                hash_bytes(md5, s.as_bytes());
            }
            Value::FilePath(path) => {
                md5.update(&[TAG_FILE_PATH]);
                hash_bytes(md5, path.to_url().to_ascii_lowercase().as_bytes());
            }
            Value::Array(array) => {
                md5.update(&[TAG_ARRAY]);
                md5.update(&self.array_count(array)?.to_le_bytes());
                for child in self.array_iter(array)? {
                    self.hash_node(md5, child)?;
                }
            }
            Value::Table(table) => {
                md5.update(&[TAG_TABLE]);
                md5.update(&self.table_count(table)?.to_le_bytes());
                let mut entries: Vec<(&str, Node)> = self.table_iter(table)?.collect();
                entries.sort_unstable_by(|x, y| x.0.as_bytes().cmp(y.0.as_bytes()));
                for (key, child) in entries {
                    hash_bytes(md5, key.as_bytes());
                    self.hash_node(md5, child)?;
                }
            }
            // integers were handled above
            Value::Int32(_) | Value::UInt32(_) | Value::Int64(_) | Value::UInt64(_) => {}
        }
        Ok(())
    }
}
