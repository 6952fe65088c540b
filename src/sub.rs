//! Structural descent into a subdirectory of any filesystem.
//!
//! [`sub`] prefers the backend's own [`SubFs`] implementation; the
//! generic [`SubdirFs`] wrapper is the fallback. The wrapper claims
//! every capability and delegates through the generic operations with
//! the joined path, so a capability the inner filesystem gains by
//! descent or emulation is visible through the wrapper too. It does
//! *not* implement [`ResolveFs`](crate::ResolveFs): the resolver
//! recognizes the wrapper by type and flattens it instead, keeping
//! resolution loops impossible.

use std::any::Any;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::SystemTime;

use crate::caps::{
    ChmodFs, ChownFs, CreateFs, Event, Fs, FsHandle, MkdirAllFs, MkdirFs, OpenFileFs, ReadDirFs,
    ReadlinkFs, RemoveAllFs, RemoveFs, RenameFs, SetTimesFs, StatFs, SubFs, SymlinkFs, TruncateFs,
    WatchFs, XattrFs,
};
use crate::context::OpCtx;
use crate::error::{FsError, Result};
use crate::file::File;
use crate::node::{FileMode, Node, OpenFlags};
use crate::ops;
use crate::path;

/// A handle rooted at `dir` within `fsys`.
pub fn sub(fsys: &FsHandle, dir: &str) -> Result<FsHandle> {
    if !path::valid(dir) {
        return Err(FsError::invalid_path("sub", dir));
    }
    if dir == "." {
        return Ok(fsys.clone());
    }
    if let Some(native) = fsys.as_sub() {
        return native.sub(dir);
    }
    Ok(Arc::new(SubdirFs {
        fsys: fsys.clone(),
        dir: dir.to_owned(),
    }))
}

/// Generic subdirectory view over another filesystem.
#[derive(Debug)]
pub(crate) struct SubdirFs {
    pub(crate) fsys: FsHandle,
    pub(crate) dir: String,
}

impl SubdirFs {
    fn full(&self, op: &'static str, name: &str) -> Result<String> {
        if !path::valid(name) {
            return Err(FsError::invalid_path(op, name));
        }
        Ok(path::join(&self.dir, name))
    }

    /// Rewrites the error path from the joined form back into the
    /// caller's coordinates.
    fn fix_err(&self, err: FsError, name: &str, full: &str) -> FsError {
        if err.path() == Some(full) {
            return err.set_path(name.to_owned());
        }
        err
    }
}

impl Fs for SubdirFs {
    fn open(&self, name: &str) -> Result<Box<dyn File>> {
        self.open_ctx(&self.fsys.base_ctx(), name)
    }

    fn open_ctx(&self, ctx: &OpCtx, name: &str) -> Result<Box<dyn File>> {
        let full = self.full("open", name)?;
        ops::open_ctx(&self.fsys, ctx, &full).map_err(|e| self.fix_err(e, name, &full))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<SubdirFs>()
    }

    fn as_create(&self) -> Option<&dyn CreateFs> {
        Some(self)
    }
    fn as_mkdir(&self) -> Option<&dyn MkdirFs> {
        Some(self)
    }
    fn as_mkdir_all(&self) -> Option<&dyn MkdirAllFs> {
        Some(self)
    }
    fn as_remove(&self) -> Option<&dyn RemoveFs> {
        Some(self)
    }
    fn as_remove_all(&self) -> Option<&dyn RemoveAllFs> {
        Some(self)
    }
    fn as_rename(&self) -> Option<&dyn RenameFs> {
        Some(self)
    }
    fn as_chmod(&self) -> Option<&dyn ChmodFs> {
        Some(self)
    }
    fn as_chown(&self) -> Option<&dyn ChownFs> {
        Some(self)
    }
    fn as_set_times(&self) -> Option<&dyn SetTimesFs> {
        Some(self)
    }
    fn as_truncate(&self) -> Option<&dyn TruncateFs> {
        Some(self)
    }
    fn as_symlink(&self) -> Option<&dyn SymlinkFs> {
        Some(self)
    }
    fn as_readlink(&self) -> Option<&dyn ReadlinkFs> {
        Some(self)
    }
    fn as_xattr(&self) -> Option<&dyn XattrFs> {
        Some(self)
    }
    fn as_watch(&self) -> Option<&dyn WatchFs> {
        Some(self)
    }
    fn as_stat(&self) -> Option<&dyn StatFs> {
        Some(self)
    }
    fn as_read_dir(&self) -> Option<&dyn ReadDirFs> {
        Some(self)
    }
    fn as_sub(&self) -> Option<&dyn SubFs> {
        Some(self)
    }
    fn as_open_file(&self) -> Option<&dyn OpenFileFs> {
        Some(self)
    }
}

impl CreateFs for SubdirFs {
    fn create(&self, name: &str) -> Result<Box<dyn File>> {
        let full = self.full("create", name)?;
        ops::create(&self.fsys, &full).map_err(|e| self.fix_err(e, name, &full))
    }
}

impl MkdirFs for SubdirFs {
    fn mkdir(&self, name: &str, mode: FileMode) -> Result<()> {
        let full = self.full("mkdir", name)?;
        ops::mkdir(&self.fsys, &full, mode).map_err(|e| self.fix_err(e, name, &full))
    }
}

impl MkdirAllFs for SubdirFs {
    fn mkdir_all(&self, name: &str, mode: FileMode) -> Result<()> {
        let full = self.full("mkdir", name)?;
        ops::mkdir_all(&self.fsys, &full, mode).map_err(|e| self.fix_err(e, name, &full))
    }
}

impl RemoveFs for SubdirFs {
    fn remove(&self, name: &str) -> Result<()> {
        let full = self.full("remove", name)?;
        ops::remove(&self.fsys, &full).map_err(|e| self.fix_err(e, name, &full))
    }
}

impl RemoveAllFs for SubdirFs {
    fn remove_all(&self, name: &str) -> Result<()> {
        let full = self.full("remove", name)?;
        ops::remove_all(&self.fsys, &full).map_err(|e| self.fix_err(e, name, &full))
    }
}

impl RenameFs for SubdirFs {
    fn rename(&self, oldname: &str, newname: &str) -> Result<()> {
        let old = self.full("rename", oldname)?;
        let new = self.full("rename", newname)?;
        ops::rename(&self.fsys, &old, &new).map_err(|e| self.fix_err(e, oldname, &old))
    }
}

impl ChmodFs for SubdirFs {
    fn chmod(&self, name: &str, mode: FileMode) -> Result<()> {
        let full = self.full("chmod", name)?;
        ops::chmod(&self.fsys, &full, mode).map_err(|e| self.fix_err(e, name, &full))
    }
}

impl ChownFs for SubdirFs {
    fn chown(&self, name: &str, uid: u32, gid: u32) -> Result<()> {
        let full = self.full("chown", name)?;
        ops::chown(&self.fsys, &full, uid, gid).map_err(|e| self.fix_err(e, name, &full))
    }
}

impl SetTimesFs for SubdirFs {
    fn set_times(
        &self,
        name: &str,
        atime: Option<SystemTime>,
        mtime: Option<SystemTime>,
    ) -> Result<()> {
        let full = self.full("settimes", name)?;
        ops::set_times(&self.fsys, &full, atime, mtime).map_err(|e| self.fix_err(e, name, &full))
    }
}

impl TruncateFs for SubdirFs {
    fn truncate(&self, name: &str, size: u64) -> Result<()> {
        let full = self.full("truncate", name)?;
        ops::truncate(&self.fsys, &full, size).map_err(|e| self.fix_err(e, name, &full))
    }
}

impl SymlinkFs for SubdirFs {
    fn symlink(&self, oldname: &str, newname: &str) -> Result<()> {
        // The link target is an uninterpreted string; only the link
        // name lives in this filesystem's coordinates.
        let new = self.full("symlink", newname)?;
        ops::symlink(&self.fsys, oldname, &new).map_err(|e| self.fix_err(e, newname, &new))
    }
}

impl ReadlinkFs for SubdirFs {
    fn readlink(&self, name: &str) -> Result<String> {
        let full = self.full("readlink", name)?;
        ops::readlink(&self.fsys, &full).map_err(|e| self.fix_err(e, name, &full))
    }
}

impl XattrFs for SubdirFs {
    fn get_xattr(&self, ctx: &OpCtx, name: &str, attr: &str) -> Result<Vec<u8>> {
        let full = self.full("getxattr", name)?;
        ops::get_xattr(&self.fsys, ctx, &full, attr).map_err(|e| self.fix_err(e, name, &full))
    }

    fn set_xattr(
        &self,
        ctx: &OpCtx,
        name: &str,
        attr: &str,
        value: &[u8],
        flags: u32,
    ) -> Result<()> {
        let full = self.full("setxattr", name)?;
        ops::set_xattr(&self.fsys, ctx, &full, attr, value, flags)
            .map_err(|e| self.fix_err(e, name, &full))
    }

    fn list_xattr(&self, ctx: &OpCtx, name: &str) -> Result<Vec<String>> {
        let full = self.full("listxattr", name)?;
        ops::list_xattr(&self.fsys, ctx, &full).map_err(|e| self.fix_err(e, name, &full))
    }

    fn remove_xattr(&self, ctx: &OpCtx, name: &str, attr: &str) -> Result<()> {
        let full = self.full("removexattr", name)?;
        ops::remove_xattr(&self.fsys, ctx, &full, attr).map_err(|e| self.fix_err(e, name, &full))
    }
}

impl WatchFs for SubdirFs {
    fn watch(&self, ctx: &OpCtx, name: &str, exclude: &[String]) -> Result<mpsc::Receiver<Event>> {
        let full = self.full("watch", name)?;
        ops::watch(&self.fsys, ctx, &full, exclude).map_err(|e| self.fix_err(e, name, &full))
    }
}

impl StatFs for SubdirFs {
    fn stat_ctx(&self, ctx: &OpCtx, name: &str) -> Result<Node> {
        let full = self.full("stat", name)?;
        ops::stat_ctx(&self.fsys, ctx, &full).map_err(|e| self.fix_err(e, name, &full))
    }
}

impl ReadDirFs for SubdirFs {
    fn read_dir_ctx(&self, ctx: &OpCtx, name: &str) -> Result<Vec<Node>> {
        let full = self.full("readdir", name)?;
        ops::read_dir_ctx(&self.fsys, ctx, &full).map_err(|e| self.fix_err(e, name, &full))
    }
}

impl SubFs for SubdirFs {
    fn sub(&self, dir: &str) -> Result<FsHandle> {
        let full = self.full("sub", dir)?;
        Ok(Arc::new(SubdirFs {
            fsys: self.fsys.clone(),
            dir: full,
        }))
    }
}

impl OpenFileFs for SubdirFs {
    fn open_file(
        &self,
        ctx: &OpCtx,
        name: &str,
        flags: OpenFlags,
        mode: FileMode,
    ) -> Result<Box<dyn File>> {
        let full = self.full("openfile", name)?;
        ops::open_file_ctx(&self.fsys, ctx, &full, flags, mode)
            .map_err(|e| self.fix_err(e, name, &full))
    }
}
