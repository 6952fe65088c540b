//! Generic operations over any [`Fs`](crate::Fs) handle.
//!
//! Each operation follows the same protocol: ask the handle for the
//! capability directly, descend toward the target through resolution,
//! fall back to an emulation built from weaker capabilities where one
//! exists, and otherwise fail with `Unsupported` naming the operation,
//! the path, and the type of the handle that was finally asked.

use std::sync::mpsc;
use std::time::SystemTime;

use tracing::debug;

use crate::caps::{same_fs, Event, FsHandle};
use crate::context::OpCtx;
use crate::error::{ErrorKind, FsError, Result};
use crate::file::{read_all, File};
use crate::node::{FileMode, Node, OpenFlags};
use crate::path;
use crate::resolve::resolve_further;
use crate::sub::{self, SubdirFs};

pub use crate::sub::sub;

/// Opens `name` for reading.
pub fn open(fsys: &FsHandle, name: &str) -> Result<Box<dyn File>> {
    open_ctx(fsys, &fsys.base_ctx(), name)
}

/// Opens `name`, threading `ctx` through composed filesystems. The
/// origin is stamped here, at the outermost entry point.
pub fn open_ctx(fsys: &FsHandle, ctx: &OpCtx, name: &str) -> Result<Box<dyn File>> {
    if !path::valid(name) {
        return Err(FsError::invalid_path("open", name));
    }
    let ctx = ctx.with_origin(fsys, name, "open");
    fsys.open_ctx(&ctx, name)
}

/// Stats `name`, following symlinks.
pub fn stat(fsys: &FsHandle, name: &str) -> Result<Node> {
    stat_ctx(fsys, &fsys.base_ctx(), name)
}

/// Stats `name` without following a final symlink.
pub fn lstat(fsys: &FsHandle, name: &str) -> Result<Node> {
    stat_ctx(fsys, &fsys.base_ctx().with_no_follow(), name)
}

pub fn stat_ctx(fsys: &FsHandle, ctx: &OpCtx, name: &str) -> Result<Node> {
    if !path::valid(name) {
        return Err(FsError::invalid_path("stat", name));
    }
    let ctx = ctx.with_origin(fsys, name, "stat");

    if let Some(statter) = fsys.as_stat() {
        return statter.stat_ctx(&ctx, name);
    }

    // Resolution failures fall through: the open fallback reproduces
    // the error when the path truly does not exist, and synthesized
    // directories only exist through open.
    if let Ok((rfsys, rname)) = resolve_further(fsys, &ctx, name) {
        if let Some(statter) = rfsys.as_stat() {
            return statter.stat_ctx(&ctx, &rname);
        }
    }

    // Last resort: open on the original handle and stat the file.
    let mut file = fsys
        .open_ctx(&ctx, name)
        .map_err(|e| e.with_op("stat").with_path(name))?;
    let info = file.stat();
    let _ = file.close();
    info
}

/// Lists the entries of the directory `name`, sorted by name.
pub fn read_dir(fsys: &FsHandle, name: &str) -> Result<Vec<Node>> {
    read_dir_ctx(fsys, &fsys.base_ctx(), name)
}

pub fn read_dir_ctx(fsys: &FsHandle, ctx: &OpCtx, name: &str) -> Result<Vec<Node>> {
    if !path::valid(name) {
        return Err(FsError::invalid_path("readdir", name));
    }
    let ctx = ctx.with_origin(fsys, name, "readdir").with_read_only();

    if let Some(reader) = fsys.as_read_dir() {
        return sorted(reader.read_dir_ctx(&ctx, name)?);
    }

    if let Ok((rfsys, rname)) = resolve_further(fsys, &ctx, name) {
        if let Some(reader) = rfsys.as_read_dir() {
            return sorted(reader.read_dir_ctx(&ctx, &rname)?);
        }
    }

    let mut file = fsys.open_ctx(&ctx, name)?;
    let entries = file
        .read_dir()
        .map_err(|e| e.with_op("readdir").with_path(name));
    let _ = file.close();
    sorted(entries?)
}

fn sorted(mut entries: Vec<Node>) -> Result<Vec<Node>> {
    entries.sort_by(|a, b| a.name().cmp(b.name()));
    Ok(entries)
}

/// Creates or truncates `name` as a writable file.
pub fn create(fsys: &FsHandle, name: &str) -> Result<Box<dyn File>> {
    if !path::valid(name) {
        return Err(FsError::invalid_path("create", name));
    }
    if let Some(creator) = fsys.as_create() {
        return creator.create(name);
    }

    let ctx = fsys.base_ctx();
    if let Ok((rfsys, rname)) = resolve_further(fsys, &ctx, name) {
        if !same_fs(&rfsys, fsys) || rname != name {
            return create(&rfsys, &rname);
        }
    }

    if let Some(opener) = fsys.as_open_file() {
        debug!(name, "create: emulating via openfile");
        return opener.open_file(
            &ctx,
            name,
            OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE,
            FileMode::file(0o644),
        );
    }

    if path::parent(name) != "." {
        let parent = sub::sub(fsys, path::parent(name))?;
        if let Some(subfs) = parent.as_any().downcast_ref::<SubdirFs>() {
            if same_fs(&subfs.fsys, fsys) {
                // Descent only wrapped ourselves; ask the inner handle
                // directly to avoid recursing through the wrapper.
                let full = path::join(&subfs.dir, path::base(name));
                if let Some(creator) = subfs.fsys.as_create() {
                    return creator.create(&full);
                }
                return Err(FsError::unsupported("create", &full, subfs.fsys.type_name()));
            }
        }
        return create(&parent, path::base(name));
    }

    Err(FsError::unsupported("create", name, fsys.type_name()))
}

pub fn mkdir(fsys: &FsHandle, name: &str, mode: FileMode) -> Result<()> {
    if !path::valid(name) {
        return Err(FsError::invalid_path("mkdir", name));
    }
    if let Some(m) = fsys.as_mkdir() {
        return m.mkdir(name, mode);
    }

    if path::parent(name) != "." {
        let parent = sub::sub(fsys, path::parent(name))?;
        if let Some(subfs) = parent.as_any().downcast_ref::<SubdirFs>() {
            if same_fs(&subfs.fsys, fsys) {
                let full = path::join(&subfs.dir, path::base(name));
                if let Some(m) = subfs.fsys.as_mkdir() {
                    return m.mkdir(&full, mode);
                }
                return Err(FsError::unsupported("mkdir", &full, subfs.fsys.type_name()));
            }
        }
        return mkdir(&parent, path::base(name), mode);
    }

    Err(FsError::unsupported("mkdir", name, fsys.type_name()))
}

/// Creates `name` and any missing parents. Succeeds when the directory
/// already exists.
pub fn mkdir_all(fsys: &FsHandle, name: &str, mode: FileMode) -> Result<()> {
    if let Some(m) = fsys.as_mkdir_all() {
        return m.mkdir_all(name, mode);
    }

    match mkdir(fsys, name, mode) {
        Ok(()) => Ok(()),
        Err(err) if err.is(ErrorKind::AlreadyExists) => Ok(()),
        Err(err) if err.is(ErrorKind::NotFound) && path::parent(name) != "." => {
            debug!(name, "mkdirall: creating missing parents");
            mkdir_all(fsys, path::parent(name), mode)?;
            mkdir(fsys, name, mode)
        }
        Err(err) => Err(err),
    }
}

/// Removes a file or empty directory.
pub fn remove(fsys: &FsHandle, name: &str) -> Result<()> {
    if !path::valid(name) {
        return Err(FsError::invalid_path("remove", name));
    }
    if let Some(r) = fsys.as_remove() {
        return r.remove(name);
    }

    if path::parent(name) != "." {
        let parent = sub::sub(fsys, path::parent(name))?;
        if let Some(subfs) = parent.as_any().downcast_ref::<SubdirFs>() {
            if same_fs(&subfs.fsys, fsys) {
                let full = path::join(&subfs.dir, path::base(name));
                if let Some(r) = subfs.fsys.as_remove() {
                    return r.remove(&full);
                }
                return Err(FsError::unsupported("remove", &full, subfs.fsys.type_name()));
            }
        }
        return remove(&parent, path::base(name));
    }

    Err(FsError::unsupported("remove", name, fsys.type_name()))
}

/// Removes `name` and any children it contains.
pub fn remove_all(fsys: &FsHandle, name: &str) -> Result<()> {
    if let Some(r) = fsys.as_remove_all() {
        return r.remove_all(name);
    }

    let err = match remove(fsys, name) {
        Ok(()) => return Ok(()),
        Err(err) if err.is(ErrorKind::NotEmpty) => err,
        Err(err) => return Err(err),
    };
    debug!(name, "removeall: removing children first");
    let children = match read_dir(fsys, name) {
        Ok(children) => children,
        Err(_) => return Err(err),
    };
    for child in children {
        remove_all(fsys, &path::join(name, child.name()))?;
    }
    remove(fsys, name)
}

/// Renames `oldname` to `newname` when both resolve into the same
/// renaming filesystem. Cross-filesystem moves are not emulated.
pub fn rename(fsys: &FsHandle, oldname: &str, newname: &str) -> Result<()> {
    if !path::valid(oldname) || !path::valid(newname) {
        return Err(FsError::invalid_path("rename", newname));
    }
    if let Some(r) = fsys.as_rename() {
        return r.rename(oldname, newname);
    }

    if !exists(fsys, oldname).unwrap_or(false) {
        return Err(FsError::not_found("rename", oldname));
    }

    let ctx = fsys.base_ctx();
    let (oldfs, oldrname) = resolve_further(fsys, &ctx, oldname)
        .map_err(|e| e.with_op("rename").with_path(oldname))?;
    let (newfs, newrdir) = resolve_further(fsys, &ctx, path::parent(newname))
        .map_err(|e| e.with_op("rename").with_path(newname))?;

    if same_fs(&oldfs, &newfs) {
        if let Some(r) = oldfs.as_rename() {
            return r.rename(&oldrname, &path::join(&newrdir, path::base(newname)));
        }
    }

    Err(FsError::unsupported("rename", newname, oldfs.type_name()))
}

pub fn chmod(fsys: &FsHandle, name: &str, mode: FileMode) -> Result<()> {
    if let Some(c) = fsys.as_chmod() {
        return c.chmod(name, mode);
    }
    let ctx = fsys.base_ctx();
    let (rfsys, rname) =
        resolve_further(fsys, &ctx, name).map_err(|e| e.with_op("chmod").with_path(name))?;
    if let Some(c) = rfsys.as_chmod() {
        return c.chmod(&rname, mode);
    }
    Err(FsError::unsupported("chmod", name, rfsys.type_name()))
}

pub fn chown(fsys: &FsHandle, name: &str, uid: u32, gid: u32) -> Result<()> {
    if let Some(c) = fsys.as_chown() {
        return c.chown(name, uid, gid);
    }
    let ctx = fsys.base_ctx();
    let (rfsys, rname) =
        resolve_further(fsys, &ctx, name).map_err(|e| e.with_op("chown").with_path(name))?;
    if let Some(c) = rfsys.as_chown() {
        return c.chown(&rname, uid, gid);
    }
    Err(FsError::unsupported("chown", name, rfsys.type_name()))
}

pub fn set_times(
    fsys: &FsHandle,
    name: &str,
    atime: Option<SystemTime>,
    mtime: Option<SystemTime>,
) -> Result<()> {
    if let Some(c) = fsys.as_set_times() {
        return c.set_times(name, atime, mtime);
    }
    let ctx = fsys.base_ctx();
    let (rfsys, rname) =
        resolve_further(fsys, &ctx, name).map_err(|e| e.with_op("settimes").with_path(name))?;
    if let Some(c) = rfsys.as_set_times() {
        return c.set_times(&rname, atime, mtime);
    }
    Err(FsError::unsupported("settimes", name, rfsys.type_name()))
}

/// Truncates (or extends with zeroes) `name` to `size` bytes. Without a
/// native capability this is emulated by rewriting the whole file.
pub fn truncate(fsys: &FsHandle, name: &str, size: u64) -> Result<()> {
    if let Some(t) = fsys.as_truncate() {
        return t.truncate(name, size);
    }
    let ctx = fsys.base_ctx();
    if let Ok((rfsys, rname)) = resolve_further(fsys, &ctx, name) {
        if let Some(t) = rfsys.as_truncate() {
            return t.truncate(&rname, size);
        }
    }

    debug!(name, size, "truncate: emulating via rewrite");
    let mut data = match read_file(fsys, name) {
        Ok(data) => data,
        Err(_) => Vec::new(),
    };
    data.resize(size as usize, 0);
    write_file(fsys, name, &data)
}

pub fn symlink(fsys: &FsHandle, oldname: &str, newname: &str) -> Result<()> {
    if let Some(s) = fsys.as_symlink() {
        return s.symlink(oldname, newname);
    }
    let ctx = fsys.base_ctx().with_origin(fsys, newname, "symlink");
    let (rfsys, rname) =
        resolve_further(fsys, &ctx, newname).map_err(|e| e.with_op("symlink").with_path(newname))?;
    if let Some(s) = rfsys.as_symlink() {
        return s.symlink(oldname, &rname);
    }
    Err(FsError::unsupported("symlink", newname, rfsys.type_name()))
}

/// Reads a symlink's target. Without a native capability the link is
/// opened with follow suppressed and its payload read as the target.
pub fn readlink(fsys: &FsHandle, name: &str) -> Result<String> {
    if let Some(r) = fsys.as_readlink() {
        return r.readlink(name);
    }
    let ctx = fsys.base_ctx().with_read_only();
    if let Ok((rfsys, rname)) = resolve_further(fsys, &ctx, name) {
        if let Some(r) = rfsys.as_readlink() {
            return r.readlink(&rname);
        }
    }

    let mut file = open_ctx(fsys, &ctx.with_no_follow(), name)?;
    let result = (|| {
        let info = file.stat()?;
        if !info.mode().is_symlink() {
            return Err(FsError::invalid_path("readlink", name));
        }
        let data = read_all(file.as_mut())?;
        Ok(String::from_utf8_lossy(&data).trim().to_owned())
    })();
    let _ = file.close();
    result
}

pub fn get_xattr(fsys: &FsHandle, ctx: &OpCtx, name: &str, attr: &str) -> Result<Vec<u8>> {
    if let Some(x) = fsys.as_xattr() {
        return x.get_xattr(ctx, name, attr);
    }
    let (rfsys, rname) =
        resolve_further(fsys, ctx, name).map_err(|e| e.with_op("getxattr").with_path(name))?;
    if let Some(x) = rfsys.as_xattr() {
        return x.get_xattr(ctx, &rname, attr);
    }
    Err(FsError::unsupported("getxattr", name, rfsys.type_name()))
}

pub fn set_xattr(
    fsys: &FsHandle,
    ctx: &OpCtx,
    name: &str,
    attr: &str,
    value: &[u8],
    flags: u32,
) -> Result<()> {
    if let Some(x) = fsys.as_xattr() {
        return x.set_xattr(ctx, name, attr, value, flags);
    }
    let (rfsys, rname) =
        resolve_further(fsys, ctx, name).map_err(|e| e.with_op("setxattr").with_path(name))?;
    if let Some(x) = rfsys.as_xattr() {
        return x.set_xattr(ctx, &rname, attr, value, flags);
    }
    Err(FsError::unsupported("setxattr", name, rfsys.type_name()))
}

pub fn list_xattr(fsys: &FsHandle, ctx: &OpCtx, name: &str) -> Result<Vec<String>> {
    if let Some(x) = fsys.as_xattr() {
        return x.list_xattr(ctx, name);
    }
    let (rfsys, rname) =
        resolve_further(fsys, ctx, name).map_err(|e| e.with_op("listxattr").with_path(name))?;
    if let Some(x) = rfsys.as_xattr() {
        return x.list_xattr(ctx, &rname);
    }
    Err(FsError::unsupported("listxattr", name, rfsys.type_name()))
}

pub fn remove_xattr(fsys: &FsHandle, ctx: &OpCtx, name: &str, attr: &str) -> Result<()> {
    if let Some(x) = fsys.as_xattr() {
        return x.remove_xattr(ctx, name, attr);
    }
    let (rfsys, rname) =
        resolve_further(fsys, ctx, name).map_err(|e| e.with_op("removexattr").with_path(name))?;
    if let Some(x) = rfsys.as_xattr() {
        return x.remove_xattr(ctx, &rname, attr);
    }
    Err(FsError::unsupported("removexattr", name, rfsys.type_name()))
}

pub fn watch(
    fsys: &FsHandle,
    ctx: &OpCtx,
    name: &str,
    exclude: &[String],
) -> Result<mpsc::Receiver<Event>> {
    if let Some(w) = fsys.as_watch() {
        return w.watch(ctx, name, exclude);
    }
    let (rfsys, rname) =
        resolve_further(fsys, ctx, name).map_err(|e| e.with_op("watch").with_path(name))?;
    if let Some(w) = rfsys.as_watch() {
        return w.watch(ctx, &rname, exclude);
    }
    Err(FsError::unsupported("watch", name, rfsys.type_name()))
}

/// Opens `name` with explicit flags, emulating with open/create when no
/// native capability is found.
pub fn open_file(
    fsys: &FsHandle,
    name: &str,
    flags: OpenFlags,
    mode: FileMode,
) -> Result<Box<dyn File>> {
    open_file_ctx(fsys, &fsys.base_ctx(), name, flags, mode)
}

pub fn open_file_ctx(
    fsys: &FsHandle,
    ctx: &OpCtx,
    name: &str,
    flags: OpenFlags,
    mode: FileMode,
) -> Result<Box<dyn File>> {
    if !path::valid(name) {
        return Err(FsError::invalid_path("openfile", name));
    }
    if let Some(opener) = fsys.as_open_file() {
        return opener.open_file(ctx, name, flags, mode);
    }
    if let Ok((rfsys, rname)) = resolve_further(fsys, ctx, name) {
        if let Some(opener) = rfsys.as_open_file() {
            return opener.open_file(ctx, &rname, flags, mode);
        }
    }

    if flags.contains(OpenFlags::CREATE) {
        if flags.contains(OpenFlags::EXCLUSIVE) && exists(fsys, name).unwrap_or(false) {
            return Err(FsError::new(ErrorKind::AlreadyExists)
                .with_op("openfile")
                .with_path(name));
        }
        if !flags.contains(OpenFlags::APPEND) {
            return create(fsys, name);
        }
        return match open_ctx(fsys, ctx, name) {
            Ok(file) => Ok(file),
            Err(err) if err.is(ErrorKind::NotFound) => create(fsys, name),
            Err(err) => Err(err),
        };
    }

    open_ctx(fsys, ctx, name)
}

/// Writes `data` to `name`, creating or truncating it.
pub fn write_file(fsys: &FsHandle, name: &str, data: &[u8]) -> Result<()> {
    let mut file = match create(fsys, name) {
        Ok(file) => file,
        Err(err) if err.is(ErrorKind::Unsupported) => {
            // Some synthetic files are writable without being
            // creatable; try a plain open before giving up.
            match open(fsys, name) {
                Ok(file) => file,
                Err(e) if e.is(ErrorKind::NotFound) => return Err(err),
                Err(e) => return Err(e),
            }
        }
        Err(err) => return Err(err),
    };

    let write_err = (|| {
        let n = file.write(data)?;
        if n < data.len() {
            return Err(FsError::new(ErrorKind::Invalid)
                .with_op("write")
                .with_path(name));
        }
        Ok(())
    })();
    // Close errors surface: control files report command failures here.
    let close_err = file.close();
    write_err.and(close_err)
}

/// Reads the whole of `name`.
pub fn read_file(fsys: &FsHandle, name: &str) -> Result<Vec<u8>> {
    let mut file = open(fsys, name)?;
    let data = read_all(file.as_mut());
    let _ = file.close();
    data
}

/// Reports whether `name` exists.
pub fn exists(fsys: &FsHandle, name: &str) -> Result<bool> {
    match stat(fsys, name) {
        Ok(_) => Ok(true),
        Err(err) if err.is(ErrorKind::NotFound) => Ok(false),
        Err(err) => Err(err),
    }
}

/// Reports whether `name` exists and is a directory.
pub fn is_dir(fsys: &FsHandle, name: &str) -> Result<bool> {
    Ok(stat(fsys, name)?.is_dir())
}
