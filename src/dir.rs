//! Synthesized directory handles.

use std::collections::BTreeMap;

use crate::error::{ErrorKind, FsError, Result};
use crate::file::File;
use crate::node::{FileMode, Node};

/// Builds an open directory handle from a stat node and its entries.
///
/// Entries are keyed by base name with later occurrences shadowing
/// earlier ones, names starting with `#` are hidden from listings, and
/// the result is sorted. Every union listing in the crate funnels
/// through here, so shadowing is uniform regardless of which layer
/// produced the duplicates.
pub fn dir_file(info: Node, entries: Vec<Node>) -> Box<dyn File> {
    let mut by_name: BTreeMap<String, Node> = BTreeMap::new();
    for entry in entries {
        let name = entry.name().to_owned();
        if name.starts_with('#') {
            continue;
        }
        by_name.insert(name, entry);
    }
    let count = by_name.len() as u64;
    let mut info = info;
    if !info.mode().is_dir() {
        info.set_mode(FileMode::DIR | info.mode());
    }
    let info = if info.size() == 0 {
        info.with_size(2 + count)
    } else {
        info
    };
    Box::new(DirHandle {
        info,
        entries: by_name.into_values().collect(),
        closed: false,
    })
}

#[derive(Debug)]
struct DirHandle {
    info: Node,
    entries: Vec<Node>,
    closed: bool,
}

impl File for DirHandle {
    fn stat(&self) -> Result<Node> {
        Ok(self.info.clone())
    }

    fn read(&mut self, _buf: &mut [u8]) -> Result<usize> {
        Err(FsError::new(ErrorKind::Invalid).with_op("read"))
    }

    fn read_dir(&mut self) -> Result<Vec<Node>> {
        if self.closed {
            return Err(FsError::new(ErrorKind::Closed));
        }
        Ok(std::mem::take(&mut self.entries))
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Err(FsError::new(ErrorKind::Closed));
        }
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str) -> Node {
        Node::new(name, FileMode::file(0o644))
    }

    #[test]
    fn sorts_dedupes_and_hides() {
        let mut f = dir_file(
            Node::new(".", FileMode::dir(0o755)),
            vec![
                entry("b").with_size(1),
                entry("#hidden"),
                entry("a"),
                entry("b").with_size(2),
            ],
        );
        let names: Vec<_> = f
            .read_dir()
            .unwrap()
            .iter()
            .map(|n| (n.name().to_owned(), n.size()))
            .collect();
        assert_eq!(names, vec![("a".to_owned(), 0), ("b".to_owned(), 2)]);
    }

    #[test]
    fn stat_reports_directory() {
        let f = dir_file(Node::new("d", FileMode::file(0o755)), vec![entry("a")]);
        let info = f.stat().unwrap();
        assert!(info.is_dir());
        assert_eq!(info.size(), 3);
    }

    #[test]
    fn second_read_dir_is_empty() {
        let mut f = dir_file(Node::new(".", FileMode::dir(0o755)), vec![entry("a")]);
        assert_eq!(f.read_dir().unwrap().len(), 1);
        assert!(f.read_dir().unwrap().is_empty());
    }
}
