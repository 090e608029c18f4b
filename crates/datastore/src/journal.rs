//! Undo log for edits that must apply completely or not at all.
//!
//! Journaled edits write straight into the document. Nodes an edit replaces
//! stay allocated until it commits, so a rollback can put them back; nodes
//! the edit created are released when it rolls back.

use tracing::{debug, warn};

use crate::document::Document;
use crate::error::Result;
use crate::node::{Node, NodeType};
use crate::value::Slot;

/// One reversible write.
#[derive(Debug)]
enum Undo {
    /// Element `index` held `previous`. Also re-appends a truncated tail
    /// element when `index` equals the current count.
    Element { array: Node, index: u32, previous: Node },
    /// Entry `key` held `previous`, or was absent.
    Entry {
        table: Node,
        key: String,
        previous: Option<Node>,
    },
    /// The array had `count` elements.
    Shrink { array: Node, count: u32 },
}

#[derive(Debug, Default)]
pub(crate) struct Journal {
    undo: Vec<Undo>,
    created: Vec<Node>,
    replaced: Vec<Node>,
}

impl Journal {
    fn commit(self, doc: &mut Document) {
        for node in self.replaced {
            doc.release_node(node);
        }
    }

    fn rollback(self, doc: &mut Document) {
        for undo in self.undo.into_iter().rev() {
            if let Err(e) = doc.revert(undo) {
                warn!(error = %e, "rollback step failed");
            }
        }
        for node in self.created {
            doc.release_node(node);
        }
    }
}

impl Document {
    /// Run `op` with a fresh journal. Its writes are kept if it succeeds and
    /// undone if it fails.
    pub(crate) fn journaled<T>(
        &mut self,
        op: impl FnOnce(&mut Document, &mut Journal) -> Result<T>,
    ) -> Result<T> {
        let mut journal = Journal::default();
        match op(self, &mut journal) {
            Ok(out) => {
                journal.commit(self);
                Ok(out)
            }
            Err(e) => {
                debug!(error = %e, writes = journal.undo.len(), "rolling back edit");
                journal.rollback(self);
                Err(e)
            }
        }
    }

    /// Build a node and remember it for release on rollback.
    pub(crate) fn journal_new(
        &mut self,
        journal: &mut Journal,
        build: impl FnOnce(&mut Self) -> Result<Node>,
    ) -> Result<Node> {
        let node = build(self)?;
        if node.handle().is_some() {
            journal.created.push(node);
        }
        Ok(node)
    }

    /// Store `node` at `slot` of `container`.
    pub(crate) fn journal_store(
        &mut self,
        journal: &mut Journal,
        container: Node,
        slot: Slot<'_>,
        node: Node,
    ) -> Result<()> {
        let existed = self.contains(container, slot)?;
        let count = self.count(container)?;
        let previous = self.put(container, slot, node)?;
        journal.undo.push(match slot {
            Slot::Index(index) if existed => Undo::Element {
                array: container,
                index,
                previous,
            },
            Slot::Index(_) => Undo::Shrink {
                array: container,
                count,
            },
            Slot::Key(key) => Undo::Entry {
                table: container,
                key: key.to_owned(),
                previous: existed.then_some(previous),
            },
        });
        if existed {
            journal.replaced.push(previous);
        }
        Ok(())
    }

    /// Store a new empty container at `slot` and return it.
    pub(crate) fn journal_container(
        &mut self,
        journal: &mut Journal,
        container: Node,
        slot: Slot<'_>,
        ty: NodeType,
        capacity: u32,
    ) -> Result<Node> {
        let node = self.journal_new(journal, |doc| doc.encode_container(ty, capacity))?;
        self.journal_store(journal, container, slot, node)?;
        Ok(node)
    }

    pub(crate) fn journal_remove(&mut self, journal: &mut Journal, table: Node, key: &str) -> Result<()> {
        let previous = self.table_take(table, key)?;
        journal.undo.push(Undo::Entry {
            table,
            key: key.to_owned(),
            previous: Some(previous),
        });
        journal.replaced.push(previous);
        Ok(())
    }

    /// Resize `array` to `len`. Truncated elements are taken from the end
    /// one at a time so each can be re-appended.
    pub(crate) fn journal_resize(&mut self, journal: &mut Journal, array: Node, len: u32) -> Result<()> {
        let count = self.array_count(array)?;
        if len > count {
            self.resize_array(array, len)?;
            journal.undo.push(Undo::Shrink { array, count });
            return Ok(());
        }
        for index in (len..count).rev() {
            let previous = self.array_take(array, index)?;
            journal.undo.push(Undo::Element {
                array,
                index,
                previous,
            });
            journal.replaced.push(previous);
        }
        Ok(())
    }

    fn revert(&mut self, undo: Undo) -> Result<()> {
        match undo {
            Undo::Element {
                array,
                index,
                previous,
            } => self.array_put(array, index, previous).map(drop),
            Undo::Entry {
                table,
                key,
                previous: Some(previous),
            } => self.table_put(table, &key, previous).map(drop),
            Undo::Entry {
                table,
                key,
                previous: None,
            } => self.table_take(table, &key).map(drop),
            Undo::Shrink { array, count } => {
                while self.array_count(array)? > count {
                    let last = self.array_count(array)? - 1;
                    self.array_take(array, last)?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn sample() -> (Document, Node, Node) {
        let mut doc = Document::new();
        let root = doc.make_table(0).unwrap();
        doc.set_string(root, "name", "before").unwrap();
        doc.set_i64(root, "gone", i64::MIN).unwrap();
        let list = doc.set_array(root, "list", 0).unwrap();
        for i in 0..4 {
            doc.set_u64(list, i, u64::MAX - u64::from(i)).unwrap();
        }
        (doc, root, list)
    }

    #[test]
    fn test_rollback_restores_every_edit() {
        let (mut doc, root, list) = sample();
        let before = doc.clone();
        let handles = doc.handle_count();

        let out: Result<()> = doc.journaled(|doc, journal| {
            let name = doc.journal_new(journal, |doc| doc.encode_string("after"))?;
            doc.journal_store(journal, root, Slot::Key("name"), name)?;
            doc.journal_remove(journal, root, "gone")?;
            doc.journal_resize(journal, list, 1)?;
            let tail = doc.journal_new(journal, |doc| doc.encode_string("tail"))?;
            doc.journal_store(journal, list, Slot::Index(6), tail)?;
            doc.journal_resize(journal, list, 9)?;
            let extra = doc.journal_container(journal, root, Slot::Key("extra"), NodeType::Table, 0)?;
            doc.journal_container(journal, extra, Slot::Key("inner"), NodeType::Array, 4)?;
            // enough new keys to rehash the root table
            for i in 0..32 {
                let key = format!("k{i}");
                let value = doc.journal_new(journal, |doc| doc.encode_i64(i64::MIN + i))?;
                doc.journal_store(journal, root, Slot::Key(&key), value)?;
            }
            Err(Error::CorruptData)
        });

        assert_eq!(out, Err(Error::CorruptData));
        assert!(Document::equals(&before, before.root(), &doc, root, false));
        assert_eq!(doc.handle_count(), handles);
        assert_eq!(doc.get_value(root, "name").unwrap().as_str(), Some("before"));
        assert_eq!(doc.count(list).unwrap(), 4);
        assert!(doc.verify_integrity());
    }

    #[test]
    fn test_commit_releases_replaced_nodes() {
        let (mut doc, root, list) = sample();
        let old = doc.get(root, "name").unwrap();
        let handles = doc.handle_count();

        doc.journaled(|doc, journal| {
            let name = doc.journal_new(journal, |doc| doc.encode_string("after"))?;
            doc.journal_store(journal, root, Slot::Key("name"), name)?;
            doc.journal_resize(journal, list, 2)
        })
        .unwrap();

        assert_eq!(doc.get_value(root, "name").unwrap().as_str(), Some("after"));
        assert!(matches!(doc.value(old), Err(Error::StaleHandle)));
        assert_eq!(doc.count(list).unwrap(), 2);
        assert_eq!(doc.handle_count(), handles - 2);
        assert!(doc.verify_integrity());
    }
}
