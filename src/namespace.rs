//! A mutable namespace of ordered bindings, Plan 9 style.
//!
//! Filesystems (or subtrees of them) are bound at paths; lookups walk
//! exact bindings first, then bindings whose path is a prefix of the
//! name, then synthesize intermediate directories. Directory bindings
//! at the same path union their listings; file bindings short-circuit
//! on the first member that opens. Binding the namespace into itself is
//! legal: the origin carried by [`OpCtx`] breaks the cycle.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::debug;

use crate::caps::{same_fs, Fs, FsHandle, ResolveFs, StatFs, SubFs};
use crate::context::OpCtx;
use crate::dir::dir_file;
use crate::error::{ErrorKind, FsError, Result};
use crate::file::File;
use crate::node::{FileMode, Node};
use crate::ops;
use crate::path;
use crate::resolve::resolve_further;
use crate::sub;

/// Where a new binding lands relative to existing bindings at the same
/// path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BindMode {
    /// Highest precedence (the default).
    #[default]
    After,
    /// Lowest precedence.
    Before,
    /// Drop existing bindings at the path.
    Replace,
}

impl FromStr for BindMode {
    type Err = FsError;

    fn from_str(s: &str) -> Result<BindMode> {
        match s {
            "" | "after" => Ok(BindMode::After),
            "before" => Ok(BindMode::Before),
            "replace" => Ok(BindMode::Replace),
            _ => Err(FsError::invalid_path("bind", s)),
        }
    }
}

#[derive(Debug, Clone)]
struct PathRef {
    fs: FsHandle,
    path: String,
    // stat cached at bind time; decides file-vs-directory treatment
    node: Node,
}

#[derive(Debug)]
pub struct Namespace {
    bindings: RwLock<BTreeMap<String, Vec<PathRef>>>,
    me: Weak<Namespace>,
}

impl Namespace {
    pub fn new() -> Arc<Namespace> {
        Arc::new_cyclic(|me| Namespace {
            bindings: RwLock::new(BTreeMap::new()),
            me: me.clone(),
        })
    }

    fn handle(&self) -> Option<FsHandle> {
        self.me.upgrade().map(|ns| ns as FsHandle)
    }

    /// Binds `src_path` within `src` at `dst_path`. The source is
    /// probed with an open/stat round trip, both to fail fast on dead
    /// sources and to cache whether the binding is a directory.
    pub fn bind(
        &self,
        src: &FsHandle,
        src_path: &str,
        dst_path: &str,
        mode: BindMode,
    ) -> Result<()> {
        if !path::valid(src_path) {
            return Err(FsError::not_found("bind", src_path));
        }
        if !path::valid(dst_path) {
            return Err(FsError::not_found("bind", dst_path));
        }

        let mut file = ops::open(src, src_path)?;
        let node = file.stat()?;
        let _ = file.close();

        debug!(src = src.type_name(), src_path, dst_path, ?mode, "bind");
        let new_ref = PathRef {
            fs: src.clone(),
            path: src_path.to_owned(),
            node,
        };
        let mut bindings = self.bindings.write();
        let refs = bindings.entry(dst_path.to_owned()).or_default();
        match mode {
            BindMode::After => refs.insert(0, new_ref),
            BindMode::Before => refs.push(new_ref),
            BindMode::Replace => *refs = vec![new_ref],
        }
        Ok(())
    }

    /// Removes every binding at `dst_path`.
    pub fn unbind(&self, dst_path: &str) -> Result<()> {
        if self.bindings.write().remove(dst_path).is_none() {
            return Err(FsError::not_found("unbind", dst_path));
        }
        Ok(())
    }

    fn snapshot(&self) -> BTreeMap<String, Vec<PathRef>> {
        self.bindings.read().clone()
    }
}

impl Fs for Namespace {
    fn open(&self, name: &str) -> Result<Box<dyn File>> {
        self.open_ctx(&self.base_ctx(), name)
    }

    fn open_ctx(&self, ctx: &OpCtx, name: &str) -> Result<Box<dyn File>> {
        if !path::valid(name) {
            return Err(FsError::not_found("open", name));
        }
        let ctx = match self.handle() {
            Some(h) => ctx.with_origin(&h, name, "open"),
            None => ctx.clone(),
        };

        // Guards are not held while descending into bound filesystems.
        let bindings = self.snapshot();
        let mut entries: Vec<Node> = Vec::new();
        let mut found_dir = false;

        if let Some(refs) = bindings.get(name) {
            for r in refs {
                if ctx.is_origin(&r.fs, &r.path) {
                    continue;
                }
                if r.node.is_dir() {
                    found_dir = true;
                    entries.extend(ops::read_dir_ctx(&r.fs, &ctx, &r.path)?);
                } else if let Ok(file) = ops::open_ctx(&r.fs, &ctx, &r.path) {
                    return Ok(file);
                }
            }
        }

        // Bindings whose path is a proper prefix of the name, shortest
        // bound path first.
        let mut paths: Vec<&String> = bindings.keys().collect();
        paths.sort_by_key(|p| p.len());
        for bind_path in paths {
            let rel = match path::rel(bind_path, name) {
                Some(rel) if rel != "." => rel,
                _ => continue,
            };
            for r in &bindings[bind_path] {
                let full = path::join(&r.path, &rel);
                if ctx.is_origin(&r.fs, &full) {
                    continue;
                }
                let info = match ops::stat_ctx(&r.fs, &ctx, &full) {
                    Ok(info) => info,
                    Err(_) => continue,
                };
                if info.is_dir() {
                    found_dir = true;
                    entries.extend(ops::read_dir_ctx(&r.fs, &ctx, &full)?);
                } else if let Ok(file) = ops::open_ctx(&r.fs, &ctx, &full) {
                    return Ok(file);
                }
            }
        }

        // Synthesized intermediate directories.
        let mut need: BTreeSet<String> = BTreeSet::new();
        if name == "." {
            for (fname, refs) in &bindings {
                match fname.find('/') {
                    None => {
                        if fname != "." {
                            for r in refs {
                                if let Ok(info) = ops::stat_ctx(&r.fs, &ctx, &r.path) {
                                    entries.push(info.renamed(fname.clone()));
                                }
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
            for (fname, refs) in &bindings {
                if let Some(rest) = fname.strip_prefix(&prefix) {
                    match rest.find('/') {
                        None => {
                            for r in refs {
                                if let Ok(info) = ops::stat_ctx(&r.fs, &ctx, &r.path) {
                                    entries.push(info.renamed(rest));
                                }
                            }
                        }
                        Some(i) => {
                            need.insert(rest[..i].to_owned());
                        }
                    }
                }
            }
            if entries.is_empty() && need.is_empty() && !found_dir {
                return Err(FsError::not_found("open", name));
            }
        }
        for info in &entries {
            need.remove(info.name());
        }
        for missing in need {
            entries.push(Node::new(missing, FileMode::dir(0o755)));
        }

        Ok(dir_file(Node::new(name, FileMode::dir(0o755)), entries))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<Namespace>()
    }

    fn base_ctx(&self) -> OpCtx {
        match self.handle() {
            Some(h) => OpCtx::for_root(&h),
            None => OpCtx::new(),
        }
    }

    fn as_stat(&self) -> Option<&dyn StatFs> {
        Some(self)
    }

    fn as_sub(&self) -> Option<&dyn SubFs> {
        Some(self)
    }

    fn as_resolve(&self) -> Option<&dyn ResolveFs> {
        Some(self)
    }
}

/// Stat special-cases the root to a synthetic node: statting through
/// every bound root would recurse forever on cyclic namespaces.
impl StatFs for Namespace {
    fn stat_ctx(&self, ctx: &OpCtx, name: &str) -> Result<Node> {
        if !path::valid(name) {
            return Err(FsError::not_found("stat", name));
        }
        let handle = self.handle();
        let ctx = match &handle {
            Some(h) => ctx.with_origin(h, name, "stat"),
            None => ctx.clone(),
        };

        if name == "." {
            return Ok(Node::new(".", FileMode::dir(0o755)));
        }

        let bindings = self.snapshot();
        if let Some(refs) = bindings.get(name) {
            for r in refs {
                if ctx.is_origin(&r.fs, &r.path) {
                    continue;
                }
                if let Ok(info) = ops::stat_ctx(&r.fs, &ctx, &r.path) {
                    return Ok(info.renamed(path::base(name)));
                }
            }
        }
        drop(bindings);

        if let Some(h) = &handle {
            if let Ok((rfsys, rname)) = resolve_further(h, &ctx, name) {
                if !same_fs(&rfsys, h) {
                    if let Some(statter) = rfsys.as_stat() {
                        return statter.stat_ctx(&ctx, &rname);
                    }
                    let mut file = ops::open_ctx(&rfsys, &ctx, &rname)?;
                    let info = file.stat();
                    let _ = file.close();
                    return info;
                }
            }
        }

        let mut file = self.open_ctx(&ctx, name)?;
        let info = file.stat();
        let _ = file.close();
        info
    }
}

impl SubFs for Namespace {
    fn sub(&self, dir: &str) -> Result<FsHandle> {
        if !path::valid(dir) {
            return Err(FsError::invalid_path("sub", dir));
        }
        let bindings = self.snapshot();
        if dir == "." {
            if let Some(refs) = bindings.get(".") {
                if refs.len() == 1 && refs[0].path == "." {
                    return Ok(refs[0].fs.clone());
                }
            }
            return self
                .handle()
                .ok_or_else(|| FsError::new(ErrorKind::Closed).with_op("sub"));
        }

        // A single root binding hands out the bound handle itself.
        if let Some(refs) = bindings.get(dir) {
            if refs.len() == 1 && refs[0].path == "." {
                return Ok(refs[0].fs.clone());
            }
        }

        let mut paths: Vec<&String> = bindings.keys().collect();
        paths.sort_by(|a, b| b.len().cmp(&a.len()));
        for bind_path in paths {
            let rel = match path::rel(bind_path, dir) {
                Some(rel) => rel,
                None => continue,
            };
            // Multiple bindings narrow to the highest-precedence one.
            let r = &bindings[bind_path][0];
            return sub::sub(&r.fs, &path::join(&r.path, &rel));
        }
        Err(FsError::not_found("sub", dir))
    }
}

impl ResolveFs for Namespace {
    /// Only the root resolves: a root binding stands in for the whole
    /// namespace. Everything else stays unresolved so operations walk
    /// the bindings structurally.
    fn resolve_fs(&self, _ctx: &OpCtx, name: &str) -> Result<Option<(FsHandle, String)>> {
        if name == "." {
            if let Some(refs) = self.bindings.read().get(".") {
                if let Some(r) = refs.first() {
                    return Ok(Some((r.fs.clone(), r.path.clone())));
                }
            }
        }
        Ok(None)
    }
}
