//! Per-document string interning for table keys and file paths.
//!
//! Ids are 1-based; id 0 is reserved for "no string" (an empty table slot or
//! an empty file path). The empty string itself is an ordinary key and gets a
//! real id.
//!
//! Ids a collection finds unused are freed and handed out again, lowest
//! first.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::xxh32::key_hash;

/// Largest id an interner hands out. File path nodes reserve 24 bits for it.
pub(crate) const MAX_INTERNED: u32 = (1 << 24) - 1;

#[derive(Debug, Clone, Default)]
pub(crate) struct Interner {
    strings: Vec<Option<Box<str>>>,
    hashes: Vec<u32>,
    ids: HashMap<Box<str>, u32>,
    /// Freed ids, highest first.
    free: Vec<u32>,
}

impl Interner {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Id for `s`, interning it if it is new.
    pub(crate) fn intern(&mut self, s: &str) -> Result<u32> {
        if let Some(&id) = self.ids.get(s) {
            return Ok(id);
        }
        let id = match self.free.pop() {
            Some(id) => {
                let index = (id - 1) as usize;
                let (Some(slot), Some(hash)) = (self.strings.get_mut(index), self.hashes.get_mut(index)) else {
                    return Err(Error::CorruptData);
                };
                *slot = Some(s.into());
                *hash = key_hash(s);
                id
            }
            None => {
                if self.strings.len() as u32 >= MAX_INTERNED {
                    return Err(Error::StringTableFull);
                }
                self.strings.push(Some(s.into()));
                self.hashes.push(key_hash(s));
                self.strings.len() as u32
            }
        };
        self.ids.insert(s.into(), id);
        Ok(id)
    }

    /// Id for `s` if it was interned before.
    #[inline]
    pub(crate) fn lookup(&self, s: &str) -> Option<u32> {
        self.ids.get(s).copied()
    }

    #[inline]
    pub(crate) fn resolve(&self, id: u32) -> Option<&str> {
        let index = id.checked_sub(1)? as usize;
        self.strings.get(index)?.as_deref()
    }

    /// Cached placement hash of an interned string.
    #[inline]
    pub(crate) fn hash(&self, id: u32) -> Option<u32> {
        let index = id.checked_sub(1)? as usize;
        self.strings.get(index)?.as_ref()?;
        self.hashes.get(index).copied()
    }

    /// Number of live strings.
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.ids.len()
    }

    /// One past the largest id handed out so far.
    #[inline]
    pub(crate) fn id_bound(&self) -> usize {
        self.strings.len() + 1
    }

    /// Free every id whose flag in `live` is unset. `live` is indexed by id.
    pub(crate) fn retain_ids(&mut self, live: &[bool]) {
        for (index, slot) in self.strings.iter_mut().enumerate() {
            if live.get(index + 1).copied().unwrap_or(false) {
                continue;
            }
            if let Some(s) = slot.take() {
                self.ids.remove(&s);
            }
        }
        while matches!(self.strings.last(), Some(None)) {
            self.strings.pop();
        }
        self.hashes.truncate(self.strings.len());
        self.free = self
            .strings
            .iter()
            .enumerate()
            .rev()
            .filter(|(_, s)| s.is_none())
            .map(|(index, _)| index as u32 + 1)
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_one_based_and_stable() {
        let mut interner = Interner::new();
        let a = interner.intern("alpha").unwrap();
        let b = interner.intern("beta").unwrap();
        assert_eq!(a, 1);
        assert_eq!(b, 2);
        assert_eq!(interner.intern("alpha").unwrap(), a);
        assert_eq!(interner.len(), 2);
    }

    #[test]
    fn test_empty_string_is_a_real_key() {
        let mut interner = Interner::new();
        let id = interner.intern("").unwrap();
        assert_ne!(id, 0);
        assert_eq!(interner.resolve(id), Some(""));
        assert_eq!(interner.lookup(""), Some(id));
    }

    #[test]
    fn test_resolve_rejects_zero_and_unknown() {
        let mut interner = Interner::new();
        interner.intern("x").unwrap();
        assert_eq!(interner.resolve(0), None);
        assert_eq!(interner.resolve(2), None);
        assert_eq!(interner.hash(0), None);
    }

    #[test]
    fn test_hash_matches_key_hash() {
        let mut interner = Interner::new();
        let id = interner.intern("speed").unwrap();
        assert_eq!(interner.hash(id), Some(key_hash("speed")));
    }

    #[test]
    fn test_retain_frees_and_reuses_lowest_ids() {
        let mut interner = Interner::new();
        for name in ["a", "b", "c", "d", "e"] {
            interner.intern(name).unwrap();
        }
        let mut live = vec![false; interner.id_bound()];
        live[1] = true;
        live[4] = true;
        interner.retain_ids(&live);

        assert_eq!(interner.len(), 2);
        assert_eq!(interner.id_bound(), 5);
        assert_eq!(interner.resolve(4), Some("d"));
        assert_eq!(interner.resolve(2), None);
        assert_eq!(interner.hash(3), None);
        assert_eq!(interner.lookup("e"), None);

        assert_eq!(interner.intern("x").unwrap(), 2);
        assert_eq!(interner.intern("y").unwrap(), 3);
        assert_eq!(interner.intern("z").unwrap(), 5);
        assert_eq!(interner.hash(3), Some(key_hash("y")));
    }

    #[test]
    fn test_retain_nothing_empties() {
        let mut interner = Interner::new();
        interner.intern("only").unwrap();
        interner.retain_ids(&[]);
        assert_eq!(interner.len(), 0);
        assert_eq!(interner.id_bound(), 1);
        assert_eq!(interner.intern("next").unwrap(), 1);
    }
}
