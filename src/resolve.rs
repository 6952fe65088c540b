//! Descent toward the filesystem that directly serves a name.
//!
//! Resolution prefers a backend's own routing ([`ResolveFs`]) and falls
//! back to structural descent through [`crate::sub`]. A generic
//! [`SubdirFs`](crate::sub) produced by descent is flattened back into
//! its inner filesystem with a joined path, so repeated resolution
//! cannot stack wrappers. When no progress can be made the original
//! handle and name come back unchanged; it is the caller's job to
//! check for the capability it wants and fail with `Unsupported`.

use crate::caps::{same_fs, FsHandle};
use crate::context::OpCtx;
use crate::error::Result;
use crate::path;
use crate::sub::{self, SubdirFs};

/// Resolves `name` to the filesystem directly containing it, returning
/// that handle and the name relative to it.
pub fn resolve(fsys: &FsHandle, ctx: &OpCtx, name: &str) -> Result<(FsHandle, String)> {
    if let Some(resolver) = fsys.as_resolve() {
        if let Some((rfsys, rname)) = resolver.resolve_fs(ctx, name)? {
            if !same_fs(&rfsys, fsys) || rname != name {
                return Ok((rfsys, rname));
            }
        }
        // A resolver that stands pat still gets structural descent.
    }

    if name == "." {
        return Ok((fsys.clone(), name.to_owned()));
    }

    let dirfs = sub::sub(fsys, path::parent(name))?;
    if same_fs(&dirfs, fsys) {
        return Ok((fsys.clone(), name.to_owned()));
    }

    if let Some(subfs) = dirfs.as_any().downcast_ref::<SubdirFs>() {
        if same_fs(&subfs.fsys, fsys) {
            // Descent only produced a view of ourselves; report no
            // progress rather than recurse forever.
            return Ok((fsys.clone(), name.to_owned()));
        }
        let full = path::join(&subfs.dir, path::base(name));
        return Ok((subfs.fsys.clone(), full));
    }

    Ok((dirfs, path::base(name).to_owned()))
}

/// [`resolve`], then one more routing pass when the resolved handle is
/// itself a resolver. Operations call this before checking for their
/// capability so a composition of routers is seen through.
pub fn resolve_further(fsys: &FsHandle, ctx: &OpCtx, name: &str) -> Result<(FsHandle, String)> {
    let (rfsys, rname) = resolve(fsys, ctx, name)?;
    if let Some(resolver) = rfsys.as_resolve() {
        if let Ok(Some((rrfsys, rrname))) = resolver.resolve_fs(ctx, &rname) {
            if !same_fs(&rrfsys, &rfsys) || rrname != rname {
                return Ok((rrfsys, rrname));
            }
        }
    }
    Ok((rfsys, rname))
}
