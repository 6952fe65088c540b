//! In-memory filesystem backed by a flat path-to-node map.
//!
//! The store is deliberately capability-rich where it matters (create,
//! mkdir, chmod, set-times, remove, rename, symlink) and deliberately
//! bare elsewhere: recursive mkdir/remove, truncate, readlink and
//! directory listing all arrive through the generic emulations, which
//! keeps this the reference workout for the resolution protocol.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::io::SeekFrom;
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::RwLock;
use tracing::trace;

use crate::caps::{
    ChmodFs, CreateFs, Fs, MkdirFs, RemoveFs, RenameFs, SetTimesFs, StatFs, SymlinkFs,
};
use crate::context::OpCtx;
use crate::dir::dir_file;
use crate::error::{ErrorKind, FsError, Result};
use crate::file::File;
use crate::node::{FileMode, Node, NodeFile};
use crate::ops;
use crate::path;

type NodeMap = BTreeMap<String, Node>;

#[derive(Debug, Clone, Default)]
pub struct MemFs {
    nodes: Arc<RwLock<NodeMap>>,
}

impl MemFs {
    pub fn new() -> MemFs {
        let fsys = MemFs::default();
        fsys.nodes
            .write()
            .insert(".".to_owned(), Node::new(".", FileMode::dir(0o755)));
        fsys
    }

    /// Builds a store from nodes, filling in implicit parent
    /// directories.
    pub fn from_nodes(entries: impl IntoIterator<Item = (String, Node)>) -> MemFs {
        let fsys = MemFs::new();
        {
            let mut nodes = fsys.nodes.write();
            for (name, node) in entries {
                let mut dir = path::parent(&name).to_owned();
                nodes.insert(name.clone(), node.renamed(name));
                while dir != "." {
                    if !nodes.contains_key(&dir) {
                        nodes.insert(dir.clone(), Node::new(dir.clone(), FileMode::dir(0o755)));
                    }
                    dir = path::parent(&dir).to_owned();
                }
            }
        }
        fsys
    }

    /// Existence including directories that exist only implicitly
    /// through deeper entries.
    fn contains(nodes: &NodeMap, name: &str) -> bool {
        if name == "." || nodes.contains_key(name) {
            return true;
        }
        let prefix = format!("{name}/");
        nodes.keys().any(|k| k.starts_with(&prefix))
    }

    fn has_children(nodes: &NodeMap, name: &str) -> bool {
        let prefix = format!("{name}/");
        nodes.keys().any(|k| k.starts_with(&prefix))
    }

    fn open_file(&self, name: &str, node: Node) -> Box<dyn File> {
        Box::new(MemFile {
            nodes: self.nodes.clone(),
            key: name.to_owned(),
            file: NodeFile::new(node.renamed(name)),
            written: false,
        })
    }

    /// Follows a symlink target, routing through the origin handle when
    /// the call entered through a composed filesystem.
    fn follow(&self, ctx: &OpCtx, name: &str, node: &Node) -> Result<Box<dyn File>> {
        let target = String::from_utf8_lossy(node.data()).into_owned();
        if let Some((origin, fullname)) = ctx.origin() {
            let resolved = match target.strip_prefix('/') {
                Some(stripped) => stripped.to_owned(),
                None => path::join(path::trim_suffix(&fullname, name), &target),
            };
            trace!(name, target = %resolved, "following symlink via origin");
            return ops::open_ctx(&origin, ctx, &resolved);
        }
        if target.starts_with('/') {
            return Err(FsError::invalid_path("open", name));
        }
        self.open_ctx(ctx, &path::join(path::parent(name), &target))
    }
}

impl Fs for MemFs {
    fn open(&self, name: &str) -> Result<Box<dyn File>> {
        self.open_ctx(&OpCtx::new(), name)
    }

    fn open_ctx(&self, ctx: &OpCtx, name: &str) -> Result<Box<dyn File>> {
        if !path::valid(name) {
            return Err(FsError::not_found("open", name));
        }

        let node = self.nodes.read().get(name).cloned();
        if let Some(node) = &node {
            if !ctx.no_follow() && node.mode().is_symlink() {
                return self.follow(ctx, name, node);
            }
            if !node.is_dir() {
                return Ok(self.open_file(name, node.clone()));
            }
        }

        // Directory, possibly synthesized.
        let mut list: Vec<Node> = Vec::new();
        let mut need: BTreeSet<String> = BTreeSet::new();
        {
            let nodes = self.nodes.read();
            if name == "." {
                for (fname, fnode) in nodes.iter() {
                    match fname.find('/') {
                        None => {
                            if fname != "." {
                                list.push(fnode.renamed(fname.clone()));
                            }
                        }
                        Some(i) => {
                            need.insert(fname[..i].to_owned());
                        }
                    }
                }
            } else {
                let prefix = format!("{name}/");
                for (fname, fnode) in nodes.iter() {
                    if let Some(rest) = fname.strip_prefix(&prefix) {
                        match rest.find('/') {
                            None => list.push(fnode.renamed(rest)),
                            Some(i) => {
                                need.insert(rest[..i].to_owned());
                            }
                        }
                    }
                }
                if node.is_none() && list.is_empty() && need.is_empty() {
                    return Err(FsError::not_found("open", name));
                }
            }
        }
        for info in &list {
            need.remove(info.name());
        }
        for missing in need {
            list.push(Node::new(missing, FileMode::dir(0o755)));
        }

        let info = match node {
            Some(node) => node.renamed(name),
            None => Node::new(name, FileMode::dir(0o755)),
        };
        Ok(dir_file(info, list))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<MemFs>()
    }

    fn as_create(&self) -> Option<&dyn CreateFs> {
        Some(self)
    }
    fn as_mkdir(&self) -> Option<&dyn MkdirFs> {
        Some(self)
    }
    fn as_chmod(&self) -> Option<&dyn ChmodFs> {
        Some(self)
    }
    fn as_set_times(&self) -> Option<&dyn SetTimesFs> {
        Some(self)
    }
    fn as_remove(&self) -> Option<&dyn RemoveFs> {
        Some(self)
    }
    fn as_rename(&self) -> Option<&dyn RenameFs> {
        Some(self)
    }
    fn as_symlink(&self) -> Option<&dyn SymlinkFs> {
        Some(self)
    }
    fn as_stat(&self) -> Option<&dyn StatFs> {
        Some(self)
    }
}

impl StatFs for MemFs {
    fn stat_ctx(&self, ctx: &OpCtx, name: &str) -> Result<Node> {
        // Open already follows symlinks according to the context.
        let mut file = self
            .open_ctx(ctx, name)
            .map_err(|e| e.with_op("stat").with_path(name))?;
        let info = file.stat();
        let _ = file.close();
        info
    }
}

impl CreateFs for MemFs {
    fn create(&self, name: &str) -> Result<Box<dyn File>> {
        if !path::valid(name) {
            return Err(FsError::not_found("create", name));
        }
        let mut nodes = self.nodes.write();
        if !MemFs::contains(&nodes, path::parent(name)) {
            return Err(FsError::not_found("create", name));
        }
        let node = Node::new(name, FileMode::file(0o644)).with_mtime(SystemTime::now());
        nodes.insert(name.to_owned(), node.clone());
        drop(nodes);
        Ok(self.open_file(name, node))
    }
}

impl MkdirFs for MemFs {
    fn mkdir(&self, name: &str, mode: FileMode) -> Result<()> {
        if !path::valid(name) {
            return Err(FsError::not_found("mkdir", name));
        }
        let mut nodes = self.nodes.write();
        if MemFs::contains(&nodes, name) {
            return Err(FsError::new(ErrorKind::AlreadyExists)
                .with_op("mkdir")
                .with_path(name));
        }
        if !MemFs::contains(&nodes, path::parent(name)) {
            return Err(FsError::not_found("mkdir", name));
        }
        let node =
            Node::new(name, FileMode::dir(mode.perm())).with_mtime(SystemTime::now());
        nodes.insert(name.to_owned(), node);
        Ok(())
    }
}

impl ChmodFs for MemFs {
    fn chmod(&self, name: &str, mode: FileMode) -> Result<()> {
        let mut nodes = self.nodes.write();
        match nodes.get_mut(name) {
            Some(node) => {
                let new_mode = node.mode().file_type() | FileMode::file(mode.perm());
                node.set_mode(new_mode);
                Ok(())
            }
            None => Err(FsError::not_found("chmod", name)),
        }
    }
}

impl SetTimesFs for MemFs {
    fn set_times(
        &self,
        name: &str,
        _atime: Option<SystemTime>,
        mtime: Option<SystemTime>,
    ) -> Result<()> {
        let mut nodes = self.nodes.write();
        match nodes.get_mut(name) {
            Some(node) => {
                node.set_mtime(mtime);
                Ok(())
            }
            None => Err(FsError::not_found("settimes", name)),
        }
    }
}

impl RemoveFs for MemFs {
    fn remove(&self, name: &str) -> Result<()> {
        if name == "." {
            return Err(FsError::invalid_path("remove", name));
        }
        let mut nodes = self.nodes.write();
        if !MemFs::contains(&nodes, name) {
            return Err(FsError::not_found("remove", name));
        }
        let is_dir = nodes.get(name).map(Node::is_dir).unwrap_or(true);
        if is_dir && MemFs::has_children(&nodes, name) {
            return Err(FsError::new(ErrorKind::NotEmpty)
                .with_op("remove")
                .with_path(name));
        }
        nodes.remove(name);
        Ok(())
    }
}

impl RenameFs for MemFs {
    fn rename(&self, oldname: &str, newname: &str) -> Result<()> {
        if !path::valid(oldname) || !path::valid(newname) {
            return Err(FsError::not_found("rename", oldname));
        }
        if oldname == newname {
            return Ok(());
        }

        let mut nodes = self.nodes.write();
        let old_node = match nodes.get(oldname) {
            Some(node) => node.clone(),
            None => return Err(FsError::not_found("rename", oldname)),
        };
        let new_dir = path::parent(newname);
        if new_dir != "." {
            match nodes.get(new_dir) {
                Some(parent) if parent.is_dir() => {}
                _ => return Err(FsError::not_found("rename", newname)),
            }
        }
        if let Some(existing) = nodes.get(newname) {
            if existing.is_dir() && MemFs::has_children(&nodes, newname) {
                return Err(FsError::new(ErrorKind::AlreadyExists)
                    .with_op("rename")
                    .with_path(newname));
            }
            nodes.remove(newname);
        }

        if old_node.is_dir() {
            let prefix = format!("{oldname}/");
            let moved: Vec<(String, Node)> = nodes
                .iter()
                .filter(|(k, _)| k.as_str() == oldname || k.starts_with(&prefix))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            for (k, _) in &moved {
                nodes.remove(k);
            }
            for (k, v) in moved {
                let suffix = &k[oldname.len()..];
                let nk = format!("{newname}{suffix}");
                nodes.insert(nk.clone(), v.renamed(nk));
            }
        } else {
            nodes.remove(oldname);
            nodes.insert(newname.to_owned(), old_node.renamed(newname));
        }
        Ok(())
    }
}

impl SymlinkFs for MemFs {
    fn symlink(&self, oldname: &str, newname: &str) -> Result<()> {
        if !path::valid(newname) {
            return Err(FsError::invalid_path("symlink", oldname));
        }
        let mut nodes = self.nodes.write();
        if !MemFs::contains(&nodes, path::parent(newname)) {
            return Err(FsError::not_found("symlink", newname));
        }
        // Dangling targets are allowed; the target string is the
        // payload, which is what the readlink fallback reads.
        let node = Node::new(newname, FileMode::symlink()).with_data(oldname.as_bytes().to_vec());
        nodes.insert(newname.to_owned(), node);
        Ok(())
    }
}

/// An open handle whose writes persist back into the store on close.
#[derive(Debug)]
struct MemFile {
    nodes: Arc<RwLock<NodeMap>>,
    key: String,
    file: NodeFile,
    written: bool,
}

impl File for MemFile {
    fn stat(&self) -> Result<Node> {
        self.file.stat()
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.file.read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let n = self.file.write(buf)?;
        self.written = true;
        Ok(n)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.file.seek(pos)
    }

    fn close(&mut self) -> Result<()> {
        self.file.close()?;
        if self.written {
            let mut node = self.file.node().clone();
            node.set_mtime(Some(SystemTime::now()));
            self.nodes.write().insert(self.key.clone(), node);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caps::FsHandle;
    use pretty_assertions::assert_eq;

    fn handle() -> FsHandle {
        Arc::new(MemFs::new())
    }

    #[test]
    fn create_write_read_roundtrip() {
        let fsys = handle();
        ops::write_file(&fsys, "f", b"hello").unwrap();
        assert_eq!(ops::read_file(&fsys, "f").unwrap(), b"hello");
        assert_eq!(ops::stat(&fsys, "f").unwrap().size(), 5);
    }

    #[test]
    fn create_requires_parent() {
        let fsys = handle();
        let err = ops::create(&fsys, "no/such/f").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn mkdir_single_level_only() {
        let fsys = handle();
        ops::mkdir(&fsys, "a", FileMode::dir(0o755)).unwrap();
        assert_eq!(
            ops::mkdir(&fsys, "a", FileMode::dir(0o755)).unwrap_err().kind(),
            ErrorKind::AlreadyExists
        );
        assert_eq!(
            ops::mkdir(&fsys, "x/y", FileMode::dir(0o755)).unwrap_err().kind(),
            ErrorKind::NotFound
        );
        ops::mkdir_all(&fsys, "x/y/z", FileMode::dir(0o755)).unwrap();
        assert!(ops::is_dir(&fsys, "x/y/z").unwrap());
    }

    #[test]
    fn remove_refuses_non_empty_dirs() {
        let fsys = handle();
        ops::mkdir(&fsys, "d", FileMode::dir(0o755)).unwrap();
        ops::write_file(&fsys, "d/f", b"x").unwrap();
        assert_eq!(
            ops::remove(&fsys, "d").unwrap_err().kind(),
            ErrorKind::NotEmpty
        );
        ops::remove_all(&fsys, "d").unwrap();
        assert!(!ops::exists(&fsys, "d").unwrap());
    }

    #[test]
    fn rename_moves_directory_subtrees() {
        let fsys = handle();
        ops::mkdir(&fsys, "a", FileMode::dir(0o755)).unwrap();
        ops::write_file(&fsys, "a/f", b"1").unwrap();
        ops::rename(&fsys, "a", "b").unwrap();
        assert_eq!(ops::read_file(&fsys, "b/f").unwrap(), b"1");
        assert!(!ops::exists(&fsys, "a").unwrap());
    }

    #[test]
    fn chmod_keeps_type_bits() {
        let fsys = handle();
        ops::mkdir(&fsys, "d", FileMode::dir(0o755)).unwrap();
        ops::chmod(&fsys, "d", FileMode::file(0o500)).unwrap();
        let info = ops::stat(&fsys, "d").unwrap();
        assert!(info.is_dir());
        assert_eq!(info.mode().perm(), 0o500);
    }

    #[test]
    fn symlinks_follow_and_readlink_falls_back() {
        let fsys = handle();
        ops::write_file(&fsys, "real", b"data").unwrap();
        ops::symlink(&fsys, "real", "link").unwrap();
        assert_eq!(ops::read_file(&fsys, "link").unwrap(), b"data");
        assert_eq!(ops::readlink(&fsys, "link").unwrap(), "real");
        assert!(ops::lstat(&fsys, "link").unwrap().mode().is_symlink());
    }

    #[test]
    fn truncate_is_emulated() {
        let fsys = handle();
        ops::write_file(&fsys, "f", b"hello world").unwrap();
        ops::truncate(&fsys, "f", 5).unwrap();
        assert_eq!(ops::read_file(&fsys, "f").unwrap(), b"hello");
        ops::truncate(&fsys, "f", 8).unwrap();
        assert_eq!(ops::read_file(&fsys, "f").unwrap(), b"hello\0\0\0");
    }

    #[test]
    fn listing_synthesizes_parents() {
        let fsys = MemFs::from_nodes([(
            "deep/nested/f".to_owned(),
            Node::new("f", FileMode::file(0o644)).with_data(b"x".to_vec()),
        )]);
        let fsys: FsHandle = Arc::new(fsys);
        let names: Vec<_> = ops::read_dir(&fsys, ".")
            .unwrap()
            .iter()
            .map(|n| n.name().to_owned())
            .collect();
        assert_eq!(names, vec!["deep"]);
        assert!(ops::is_dir(&fsys, "deep/nested").unwrap());
    }
}
