//! Open-file handles and the function-backed synthetic files built on
//! top of them.

use std::fmt;
use std::io::SeekFrom;

use crate::caps::Fs;
use crate::context::OpCtx;
use crate::error::{ErrorKind, FsError, Result};
use crate::node::{Node, NodeFile};

/// An open file.
///
/// `close` completes the session; for synthetic control and field files
/// the side effect of a write happens at close time, so callers must
/// close explicitly rather than rely on drop.
pub trait File: fmt::Debug + Send {
    fn stat(&self) -> Result<Node>;

    /// Reads into `buf`, returning 0 at end of file.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    fn write(&mut self, _buf: &[u8]) -> Result<usize> {
        Err(FsError::new(ErrorKind::Permission).with_op("write"))
    }

    fn seek(&mut self, _pos: SeekFrom) -> Result<u64> {
        Err(FsError::new(ErrorKind::Invalid).with_op("seek"))
    }

    /// Directory entries, for handles opened on a directory.
    fn read_dir(&mut self) -> Result<Vec<Node>> {
        Err(FsError::new(ErrorKind::Invalid).with_op("readdir"))
    }

    fn close(&mut self) -> Result<()>;
}

/// Reads the remainder of `f` to a byte vector.
pub fn read_all(f: &mut dyn File) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = f.read(&mut buf)?;
        if n == 0 {
            return Ok(out);
        }
        out.extend_from_slice(&buf[..n]);
    }
}

type NodeHook = Box<dyn FnMut(&mut Node) -> Result<()> + Send>;

/// A file whose content is produced on first read and whose close can
/// observe everything written during the session.
///
/// The read hook runs exactly once per open; one-shot allocation
/// triggers (reading `new/<kind>` on a capability device, self-deleting
/// extra files) hang their side effect on it. The close hook receives
/// the node including any bytes written, which is how control files
/// receive their command line.
pub struct FuncFile {
    node: Node,
    read_hook: Option<NodeHook>,
    close_hook: Option<NodeHook>,
    open_file: Option<NodeFile>,
    has_read: bool,
    closed: bool,
}

impl FuncFile {
    pub fn new(node: Node) -> FuncFile {
        FuncFile {
            node,
            read_hook: None,
            close_hook: None,
            open_file: None,
            has_read: false,
            closed: false,
        }
    }

    pub fn on_read(mut self, hook: impl FnMut(&mut Node) -> Result<()> + Send + 'static) -> Self {
        self.read_hook = Some(Box::new(hook));
        self
    }

    pub fn on_close(mut self, hook: impl FnMut(&mut Node) -> Result<()> + Send + 'static) -> Self {
        self.close_hook = Some(Box::new(hook));
        self
    }
}

impl fmt::Debug for FuncFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FuncFile")
            .field("node", &self.node)
            .field("has_read", &self.has_read)
            .field("closed", &self.closed)
            .finish()
    }
}

impl File for FuncFile {
    fn stat(&self) -> Result<Node> {
        Ok(self.node.clone())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.closed {
            return Err(FsError::new(ErrorKind::Closed));
        }
        if !self.has_read {
            self.has_read = true;
            if let Some(hook) = &mut self.read_hook {
                hook(&mut self.node)?;
            }
            self.open_file = Some(self.node.open_node());
        }
        self.open_file
            .as_mut()
            .map(|f| f.read(buf))
            .unwrap_or(Ok(0))
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if self.closed {
            return Err(FsError::new(ErrorKind::Closed));
        }
        let file = self.open_file.get_or_insert_with(|| self.node.open_node());
        file.write(buf)
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Err(FsError::new(ErrorKind::Closed));
        }
        self.closed = true;
        // The close hook only fires when the session actually touched
        // the file; it sees the session's node, writes included.
        if let (Some(hook), Some(open)) = (&mut self.close_hook, &mut self.open_file) {
            return hook(open.node_mut());
        }
        Ok(())
    }
}

impl Drop for FuncFile {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.close();
        }
    }
}

type OpenHook = Box<dyn Fn(&OpCtx, &str) -> Result<Box<dyn File>> + Send + Sync>;

/// A filesystem defined entirely by its open function.
pub struct OpenFunc {
    open: OpenHook,
}

impl OpenFunc {
    pub fn new(
        open: impl Fn(&OpCtx, &str) -> Result<Box<dyn File>> + Send + Sync + 'static,
    ) -> OpenFunc {
        OpenFunc {
            open: Box::new(open),
        }
    }
}

impl fmt::Debug for OpenFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("OpenFunc")
    }
}

impl Fs for OpenFunc {
    fn open(&self, name: &str) -> Result<Box<dyn File>> {
        (self.open)(&OpCtx::new(), name)
    }

    fn open_ctx(&self, ctx: &OpCtx, name: &str) -> Result<Box<dyn File>> {
        (self.open)(ctx, name)
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<OpenFunc>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::FileMode;

    #[test]
    fn read_hook_runs_once_per_open() {
        let mut count = 0u32;
        let counter = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
        let c = counter.clone();
        let mut f = FuncFile::new(Node::new("f", FileMode::file(0o555))).on_read(move |n| {
            count += 1;
            c.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            n.set_data(format!("{count}\n"));
            Ok(())
        });
        let mut buf = [0u8; 8];
        assert_eq!(f.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"1\n");
        assert_eq!(f.read(&mut buf).unwrap(), 0);
        assert_eq!(counter.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn close_hook_sees_written_bytes() {
        let seen = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
        let s = seen.clone();
        let mut f = FuncFile::new(Node::new("ctl", FileMode::file(0o755))).on_close(move |n| {
            *s.lock() = n.data().to_vec();
            Ok(())
        });
        f.write(b"mount a b").unwrap();
        f.close().unwrap();
        assert_eq!(&*seen.lock(), b"mount a b");
    }

    #[test]
    fn close_hook_skipped_when_untouched() {
        let fired = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = fired.clone();
        let mut f = FuncFile::new(Node::new("ctl", FileMode::file(0o755))).on_close(move |_| {
            flag.store(true, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        });
        f.close().unwrap();
        assert!(!fired.load(std::sync::atomic::Ordering::SeqCst));
    }
}
