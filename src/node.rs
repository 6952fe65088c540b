//! The [`Node`] value type: file metadata, directory entry, and
//! in-memory file payload in one.
//!
//! Nodes are what every synthetic file in the system is made of:
//! control files, field files, directory placeholders, and the entries
//! of the in-memory store. Opening a node yields a seekable view over a
//! private copy of its payload.

use std::any::Any;
use std::fmt;
use std::io::SeekFrom;
use std::sync::Arc;
use std::time::SystemTime;

use bitflags::bitflags;

use crate::caps::Fs;
use crate::context::OpCtx;
use crate::error::{ErrorKind, FsError, Result};
use crate::file::File;
use crate::path;

bitflags! {
    /// File type and permission bits.
    pub struct FileMode: u32 {
        /// Directory bit.
        const DIR = 1 << 31;
        /// Symbolic link bit.
        const SYMLINK = 1 << 27;
        /// Permission bits.
        const PERM = 0o777;
    }
}

impl FileMode {
    /// A directory mode with the given permission bits.
    pub fn dir(perm: u32) -> FileMode {
        FileMode::DIR | FileMode::from_bits_truncate(perm & 0o777)
    }

    /// A regular file mode with the given permission bits.
    pub fn file(perm: u32) -> FileMode {
        FileMode::from_bits_truncate(perm & 0o777)
    }

    /// A symlink mode (always 0o777 permissions).
    pub fn symlink() -> FileMode {
        FileMode::SYMLINK | FileMode::from_bits_truncate(0o777)
    }

    pub fn is_dir(&self) -> bool {
        self.contains(FileMode::DIR)
    }

    pub fn is_symlink(&self) -> bool {
        self.contains(FileMode::SYMLINK)
    }

    /// Only the permission bits.
    pub fn perm(&self) -> u32 {
        self.bits() & 0o777
    }

    /// Only the type bits.
    pub fn file_type(&self) -> FileMode {
        *self & (FileMode::DIR | FileMode::SYMLINK)
    }
}

impl Default for FileMode {
    fn default() -> Self {
        FileMode::empty()
    }
}

bitflags! {
    /// Flags for [`crate::ops::open_file`].
    pub struct OpenFlags: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const CREATE = 1 << 2;
        const TRUNCATE = 1 << 3;
        const APPEND = 1 << 4;
        const EXCLUSIVE = 1 << 5;
    }
}

/// File metadata plus optional raw payload.
///
/// A node doubles as a stat result and a directory entry; `size`
/// defaults to the payload length when not set explicitly.
#[derive(Clone, Default)]
pub struct Node {
    name: String,
    mode: FileMode,
    mtime: Option<SystemTime>,
    size: Option<u64>,
    sys: Option<Arc<dyn Any + Send + Sync>>,
    data: Vec<u8>,
}

impl Node {
    pub fn new(name: impl Into<String>, mode: FileMode) -> Node {
        Node {
            name: name.into(),
            mode,
            ..Node::default()
        }
    }

    pub fn with_data(mut self, data: impl Into<Vec<u8>>) -> Node {
        self.data = data.into();
        self
    }

    pub fn with_size(mut self, size: u64) -> Node {
        self.size = Some(size);
        self
    }

    pub fn with_mtime(mut self, mtime: SystemTime) -> Node {
        self.mtime = Some(mtime);
        self
    }

    /// Attaches an opaque backend tag.
    pub fn with_sys(mut self, sys: Arc<dyn Any + Send + Sync>) -> Node {
        self.sys = Some(sys);
        self
    }

    /// The final path segment of the node's name.
    pub fn name(&self) -> &str {
        path::base(&self.name)
    }

    /// The full name the node was created with.
    pub fn full_name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> FileMode {
        self.mode
    }

    pub fn is_dir(&self) -> bool {
        self.mode.is_dir()
    }

    pub fn mtime(&self) -> Option<SystemTime> {
        self.mtime
    }

    pub fn sys(&self) -> Option<&Arc<dyn Any + Send + Sync>> {
        self.sys.as_ref()
    }

    /// Size in bytes; falls back to the payload length when unset.
    pub fn size(&self) -> u64 {
        self.size.unwrap_or(self.data.len() as u64)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn set_data(&mut self, data: impl Into<Vec<u8>>) {
        self.data = data.into();
        self.size = None;
    }

    pub(crate) fn set_mode(&mut self, mode: FileMode) {
        self.mode = mode;
    }

    pub(crate) fn set_mtime(&mut self, mtime: Option<SystemTime>) {
        self.mtime = mtime;
    }

    /// A copy of the node under a different name.
    pub fn renamed(&self, name: impl Into<String>) -> Node {
        let mut n = self.clone();
        n.name = name.into();
        n
    }

    pub(crate) fn open_node(&self) -> NodeFile {
        NodeFile::new(self.clone())
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("size", &self.size())
            .finish()
    }
}

/// A bare node is openable: `.` yields a file over a copy of the
/// payload, anything else does not exist.
impl Fs for Node {
    fn open(&self, name: &str) -> Result<Box<dyn File>> {
        self.open_ctx(&OpCtx::new(), name)
    }

    fn open_ctx(&self, _ctx: &OpCtx, name: &str) -> Result<Box<dyn File>> {
        if name == "." {
            return Ok(Box::new(self.open_node()));
        }
        Err(FsError::not_found("open", name))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<Node>()
    }
}

/// A seekable in-memory file over a private copy of a [`Node`].
#[derive(Debug)]
pub struct NodeFile {
    node: Node,
    offset: usize,
    closed: bool,
}

impl NodeFile {
    pub(crate) fn new(node: Node) -> NodeFile {
        NodeFile {
            node,
            offset: 0,
            closed: false,
        }
    }

    pub(crate) fn node(&self) -> &Node {
        &self.node
    }

    pub(crate) fn node_mut(&mut self) -> &mut Node {
        &mut self.node
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(FsError::new(ErrorKind::Closed));
        }
        Ok(())
    }
}

impl File for NodeFile {
    fn stat(&self) -> Result<Node> {
        Ok(self.node.clone())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.check_open()?;
        let data = self.node.data();
        if self.offset >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - self.offset);
        buf[..n].copy_from_slice(&data[self.offset..self.offset + n]);
        self.offset += n;
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.check_open()?;
        let end = self.offset + buf.len();
        if self.node.data.len() < end {
            self.node.data.resize(end, 0);
        }
        self.node.data[self.offset..end].copy_from_slice(buf);
        self.node.size = None;
        self.offset = end;
        Ok(buf.len())
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.check_open()?;
        let len = self.node.data.len() as i64;
        let target = match pos {
            SeekFrom::Start(n) => n as i64,
            SeekFrom::End(n) => len + n,
            SeekFrom::Current(n) => self.offset as i64 + n,
        };
        if target < 0 {
            return Err(FsError::new(ErrorKind::Invalid).with_op("seek"));
        }
        self.offset = target as usize;
        Ok(self.offset as u64)
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
    use crate::file::read_all;

    #[test]
    fn size_defaults_to_payload_length() {
        let n = Node::new("f", FileMode::file(0o644)).with_data(b"hello".to_vec());
        assert_eq!(n.size(), 5);
        assert_eq!(n.with_size(99).size(), 99);
    }

    #[test]
    fn node_file_reads_and_seeks() {
        let n = Node::new("f", FileMode::file(0o644)).with_data(b"hello".to_vec());
        let mut f = n.open_node();
        assert_eq!(read_all(&mut f).unwrap(), b"hello");
        f.seek(SeekFrom::Start(1)).unwrap();
        let mut buf = [0u8; 2];
        assert_eq!(f.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf, b"el");
    }

    #[test]
    fn writes_extend_the_copy_not_the_node() {
        let n = Node::new("f", FileMode::file(0o644));
        let mut f = n.open_node();
        f.write(b"abc").unwrap();
        assert_eq!(f.node().data(), b"abc");
        assert!(n.data().is_empty());
    }

    #[test]
    fn closed_file_errors() {
        let n = Node::new("f", FileMode::file(0o644));
        let mut f = n.open_node();
        f.close().unwrap();
        assert_eq!(f.read(&mut [0u8; 1]).unwrap_err().kind(), ErrorKind::Closed);
        assert_eq!(f.close().unwrap_err().kind(), ErrorKind::Closed);
    }

    #[test]
    fn mode_helpers() {
        assert!(FileMode::dir(0o755).is_dir());
        assert_eq!(FileMode::dir(0o755).perm(), 0o755);
        assert!(FileMode::symlink().is_symlink());
        assert_eq!(FileMode::file(0o644).file_type(), FileMode::empty());
    }
}
