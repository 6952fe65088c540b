//! A filesystem assembled from a map of names to other filesystems.
//!
//! Values can be whole filesystems mounted at their key, or bare
//! [`Node`]s acting as files and directory metadata. Parent directories
//! are synthesized on demand, so the map never needs explicit entries
//! for them.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::io::SeekFrom;
use std::sync::Arc;

use crate::caps::{Fs, FsHandle, StatFs, SubFs};
use crate::context::OpCtx;
use crate::dir::dir_file;
use crate::error::{FsError, Result};
use crate::file::File;
use crate::node::{FileMode, Node};
use crate::ops;
use crate::path;
use crate::sub::SubdirFs;

#[derive(Debug, Clone, Default)]
pub struct MapFs {
    entries: BTreeMap<String, FsHandle>,
}

impl MapFs {
    pub fn new() -> MapFs {
        MapFs::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, fsys: FsHandle) {
        self.entries.insert(name.into(), fsys);
    }

    /// Mounts a bare node as a synthetic file or directory entry.
    pub fn insert_node(&mut self, name: impl Into<String>, node: Node) {
        self.entries.insert(name.into(), Arc::new(node));
    }
}

impl FromIterator<(String, FsHandle)> for MapFs {
    fn from_iter<T: IntoIterator<Item = (String, FsHandle)>>(iter: T) -> MapFs {
        MapFs {
            entries: iter.into_iter().collect(),
        }
    }
}

impl Fs for MapFs {
    fn open(&self, name: &str) -> Result<Box<dyn File>> {
        self.open_ctx(&OpCtx::new(), name)
    }

    fn open_ctx(&self, ctx: &OpCtx, name: &str) -> Result<Box<dyn File>> {
        if !path::valid(name) {
            return Err(FsError::not_found("open", name));
        }

        // A directory node in the map contributes metadata but still
        // goes through synthesis for its listing.
        let mut dir_node = None;
        if let Some(subfs) = self.entries.get(name) {
            match subfs.as_any().downcast_ref::<Node>() {
                Some(node) if node.is_dir() => dir_node = Some(node.clone()),
                _ => {
                    let file = ops::open_ctx(subfs, ctx, ".")?;
                    return Ok(renamed(file, path::base(name)));
                }
            }
        }

        if name != "." {
            for (key, subfs) in &self.entries {
                if key == "." {
                    continue;
                }
                if let Some(rel) = path::rel(key, name) {
                    if rel != "." {
                        return ops::open_ctx(subfs, ctx, &rel);
                    }
                }
            }
        }

        // Directory, possibly synthesized from deeper keys.
        let mut list: Vec<Node> = Vec::new();
        let mut need: BTreeSet<String> = BTreeSet::new();
        if name == "." {
            for (fname, subfs) in &self.entries {
                match fname.find('/') {
                    None => {
                        if fname != "." {
                            if let Ok(info) = ops::stat_ctx(subfs, ctx, ".") {
                                list.push(info.renamed(fname.clone()));
                            }
                        }
                    }
                    Some(i) => {
                        need.insert(fname[..i].to_owned());
                    }
                }
            }
        } else {
            let prefix = format!("{name}/");
            for (fname, subfs) in &self.entries {
                if let Some(rest) = fname.strip_prefix(&prefix) {
                    match rest.find('/') {
                        None => {
                            if let Ok(info) = ops::stat_ctx(subfs, ctx, ".") {
                                list.push(info.renamed(rest));
                            }
                        }
                        Some(i) => {
                            need.insert(rest[..i].to_owned());
                        }
                    }
                }
            }
            if dir_node.is_none() && list.is_empty() && need.is_empty() {
                return Err(FsError::not_found("open", name));
            }
        }
        for info in &list {
            need.remove(info.name());
        }
        for missing in need {
            list.push(Node::new(missing, FileMode::dir(0o555)));
        }

        let info = match dir_node {
            Some(node) => node.renamed(name),
            None => Node::new(name, FileMode::dir(0o555)),
        };
        Ok(dir_file(info, list))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<MapFs>()
    }

    fn as_stat(&self) -> Option<&dyn StatFs> {
        Some(self)
    }

    fn as_sub(&self) -> Option<&dyn SubFs> {
        Some(self)
    }
}

/// Stat avoids open where it can: opening would stat every mounted
/// root, which recurses forever when the map participates in a cycle.
impl StatFs for MapFs {
    fn stat_ctx(&self, ctx: &OpCtx, name: &str) -> Result<Node> {
        if !path::valid(name) {
            return Err(FsError::not_found("stat", name));
        }
        if name == "." {
            return Ok(Node::new(".", FileMode::dir(0o555)));
        }
        if let Some(subfs) = self.entries.get(name) {
            return Ok(ops::stat_ctx(subfs, ctx, ".")?.renamed(path::base(name)));
        }
        let mut file = self.open_ctx(ctx, name)?;
        let info = file.stat();
        let _ = file.close();
        info
    }
}

impl SubFs for MapFs {
    fn sub(&self, dir: &str) -> Result<FsHandle> {
        if dir == "." {
            return Ok(Arc::new(self.clone()));
        }
        if let Some(subfs) = self.entries.get(dir) {
            return Ok(subfs.clone());
        }
        let mut keys: Vec<&String> = self.entries.keys().collect();
        keys.sort_by(|a, b| b.len().cmp(&a.len()));
        for key in keys {
            if key == "." {
                continue;
            }
            if let Some(rel) = path::rel(key, dir) {
                return Ok(Arc::new(SubdirFs {
                    fsys: self.entries[key].clone(),
                    dir: rel,
                }));
            }
        }
        Err(FsError::not_found("sub", dir))
    }
}

fn renamed(inner: Box<dyn File>, name: &str) -> Box<dyn File> {
    Box::new(RenamedFile {
        inner,
        name: name.to_owned(),
    })
}

/// Mounted filesystems report their own root's name; this rewrites it
/// to the mount point's name.
#[derive(Debug)]
struct RenamedFile {
    inner: Box<dyn File>,
    name: String,
}

impl File for RenamedFile {
    fn stat(&self) -> Result<Node> {
        Ok(self.inner.stat()?.renamed(self.name.clone()))
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.inner.read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.inner.write(buf)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.inner.seek(pos)
    }

    fn read_dir(&mut self) -> Result<Vec<Node>> {
        self.inner.read_dir()
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn node(data: &str) -> Node {
        Node::new("x", FileMode::file(0o644)).with_data(data.as_bytes().to_vec())
    }

    fn fixture() -> FsHandle {
        let mut m = MapFs::new();
        m.insert_node("hello", node("hi\n"));
        m.insert_node("a/b/c", node("deep\n"));
        Arc::new(m)
    }

    #[test]
    fn synthesizes_parent_directories() {
        let m = fixture();
        let entries = ops::read_dir(&m, ".").unwrap();
        let names: Vec<_> = entries.iter().map(|n| n.name().to_owned()).collect();
        assert_eq!(names, vec!["a", "hello"]);
        assert!(ops::stat(&m, "a/b").unwrap().is_dir());
    }

    #[test]
    fn routes_into_mounted_filesystems() {
        let mut inner = MapFs::new();
        inner.insert_node("f", node("inner\n"));
        let mut outer = MapFs::new();
        outer.insert("mnt", Arc::new(inner) as FsHandle);
        let outer: FsHandle = Arc::new(outer);

        assert_eq!(ops::read_file(&outer, "mnt/f").unwrap(), b"inner\n");
        let info = ops::stat(&outer, "mnt").unwrap();
        assert!(info.is_dir());
        assert_eq!(info.name(), "mnt");
    }

    #[test]
    fn missing_directory_does_not_exist() {
        let m = fixture();
        let err = ops::open(&m, "nope/x").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn sub_returns_mounted_fs_directly() {
        let inner: FsHandle = Arc::new(MapFs::new());
        let mut outer = MapFs::new();
        outer.insert("mnt", inner.clone());
        let outer: FsHandle = Arc::new(outer);

        let got = ops::sub(&outer, "mnt").unwrap();
        assert!(crate::caps::same_fs(&got, &inner));
    }
}
