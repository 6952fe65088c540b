//! The base filesystem trait and the capability traits layered on it.
//!
//! [`Fs`] requires only `open`; everything else a backend can do is
//! declared by implementing a capability trait and returning `Some(self)`
//! from the matching `as_*` accessor. The generic operations in
//! [`crate::ops`] never assume a capability: they ask, descend toward
//! the target through [`SubFs`]/[`ResolveFs`], fall back to emulation
//! where one exists, and otherwise fail with
//! [`ErrorKind::Unsupported`](crate::ErrorKind::Unsupported) naming the
//! handle type that was finally asked.

use std::any::Any;
use std::fmt;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::SystemTime;

use crate::context::OpCtx;
use crate::error::{FsError, Result};
use crate::file::File;
use crate::node::{FileMode, Node, OpenFlags};

/// A shared handle to a filesystem.
///
/// Handle identity (see [`same_fs`]) is what the resolution protocol
/// uses to detect that descent made no progress, so composed
/// filesystems must hand out clones of one `Arc` rather than fresh
/// allocations of equal value.
pub type FsHandle = Arc<dyn Fs>;

/// True when both handles point at the same filesystem instance.
pub fn same_fs(a: &FsHandle, b: &FsHandle) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

/// The minimal filesystem contract: readable, openable by path.
pub trait Fs: fmt::Debug + Send + Sync + 'static {
    /// Opens `name` for reading. `"."` opens the root.
    fn open(&self, name: &str) -> Result<Box<dyn File>>;

    /// Context-aware open; defaults to plain [`Fs::open`]. Composed
    /// filesystems override this to thread origin and flags downward.
    fn open_ctx(&self, _ctx: &OpCtx, name: &str) -> Result<Box<dyn File>> {
        self.open(name)
    }

    fn as_any(&self) -> &dyn Any;

    /// Concrete type name, for diagnostics on unsupported operations.
    fn type_name(&self) -> &'static str;

    /// The context every operation on this handle should start from.
    /// Cycle-guarding roots override this to pre-seed their origin.
    fn base_ctx(&self) -> OpCtx {
        OpCtx::new()
    }

    fn as_create(&self) -> Option<&dyn CreateFs> {
        None
    }
    fn as_mkdir(&self) -> Option<&dyn MkdirFs> {
        None
    }
    fn as_mkdir_all(&self) -> Option<&dyn MkdirAllFs> {
        None
    }
    fn as_remove(&self) -> Option<&dyn RemoveFs> {
        None
    }
    fn as_remove_all(&self) -> Option<&dyn RemoveAllFs> {
        None
    }
    fn as_rename(&self) -> Option<&dyn RenameFs> {
        None
    }
    fn as_chmod(&self) -> Option<&dyn ChmodFs> {
        None
    }
    fn as_chown(&self) -> Option<&dyn ChownFs> {
        None
    }
    fn as_set_times(&self) -> Option<&dyn SetTimesFs> {
        None
    }
    fn as_truncate(&self) -> Option<&dyn TruncateFs> {
        None
    }
    fn as_symlink(&self) -> Option<&dyn SymlinkFs> {
        None
    }
    fn as_readlink(&self) -> Option<&dyn ReadlinkFs> {
        None
    }
    fn as_xattr(&self) -> Option<&dyn XattrFs> {
        None
    }
    fn as_watch(&self) -> Option<&dyn WatchFs> {
        None
    }
    fn as_stat(&self) -> Option<&dyn StatFs> {
        None
    }
    fn as_read_dir(&self) -> Option<&dyn ReadDirFs> {
        None
    }
    fn as_sub(&self) -> Option<&dyn SubFs> {
        None
    }
    fn as_resolve(&self) -> Option<&dyn ResolveFs> {
        None
    }
    fn as_open_file(&self) -> Option<&dyn OpenFileFs> {
        None
    }
}

/// Creates (or truncates) a writable file.
pub trait CreateFs: Fs {
    fn create(&self, name: &str) -> Result<Box<dyn File>>;
}

pub trait MkdirFs: Fs {
    fn mkdir(&self, name: &str, mode: FileMode) -> Result<()>;
}

/// Native `mkdir -p`. Backends without it get the generic emulation.
pub trait MkdirAllFs: Fs {
    fn mkdir_all(&self, name: &str, mode: FileMode) -> Result<()>;
}

pub trait RemoveFs: Fs {
    /// Removes a file or empty directory.
    fn remove(&self, name: &str) -> Result<()>;
}

/// Native recursive remove. Backends without it get the generic
/// emulation.
pub trait RemoveAllFs: Fs {
    fn remove_all(&self, name: &str) -> Result<()>;
}

pub trait RenameFs: Fs {
    fn rename(&self, oldname: &str, newname: &str) -> Result<()>;
}

pub trait ChmodFs: Fs {
    fn chmod(&self, name: &str, mode: FileMode) -> Result<()>;
}

pub trait ChownFs: Fs {
    fn chown(&self, name: &str, uid: u32, gid: u32) -> Result<()>;
}

pub trait SetTimesFs: Fs {
    fn set_times(
        &self,
        name: &str,
        atime: Option<SystemTime>,
        mtime: Option<SystemTime>,
    ) -> Result<()>;
}

pub trait TruncateFs: Fs {
    fn truncate(&self, name: &str, size: u64) -> Result<()>;
}

pub trait SymlinkFs: Fs {
    fn symlink(&self, oldname: &str, newname: &str) -> Result<()>;
}

pub trait ReadlinkFs: Fs {
    fn readlink(&self, name: &str) -> Result<String>;
}

/// Extended attributes. `flags` passes through backend-defined create
/// or replace semantics.
pub trait XattrFs: Fs {
    fn get_xattr(&self, ctx: &OpCtx, name: &str, attr: &str) -> Result<Vec<u8>>;
    fn set_xattr(&self, ctx: &OpCtx, name: &str, attr: &str, value: &[u8], flags: u32)
        -> Result<()>;
    fn list_xattr(&self, ctx: &OpCtx, name: &str) -> Result<Vec<String>>;
    fn remove_xattr(&self, ctx: &OpCtx, name: &str, attr: &str) -> Result<()>;
}

/// A change seen by a watch.
#[derive(Debug, Clone)]
pub struct Event {
    pub path: String,
    pub op: String,
    pub err: Option<FsError>,
}

pub trait WatchFs: Fs {
    /// Watches `name` for changes, skipping paths listed in `exclude`.
    fn watch(&self, ctx: &OpCtx, name: &str, exclude: &[String]) -> Result<mpsc::Receiver<Event>>;
}

pub trait StatFs: Fs {
    fn stat_ctx(&self, ctx: &OpCtx, name: &str) -> Result<Node>;
}

pub trait ReadDirFs: Fs {
    fn read_dir_ctx(&self, ctx: &OpCtx, name: &str) -> Result<Vec<Node>>;
}

/// Cheap structural descent: a handle rooted at `dir`.
pub trait SubFs: Fs {
    fn sub(&self, dir: &str) -> Result<FsHandle>;
}

/// Routing descent for composed filesystems.
pub trait ResolveFs: Fs {
    /// Resolves `name` to the backend handle and path that actually
    /// serve it. `Ok(None)` means the receiver serves it directly.
    fn resolve_fs(&self, ctx: &OpCtx, name: &str) -> Result<Option<(FsHandle, String)>>;
}

/// Full open with flags and creation mode.
pub trait OpenFileFs: Fs {
    fn open_file(
        &self,
        ctx: &OpCtx,
        name: &str,
        flags: OpenFlags,
        mode: FileMode,
    ) -> Result<Box<dyn File>>;
}
