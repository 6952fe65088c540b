//! Per-call operation context.
//!
//! Every generic operation threads an [`OpCtx`] through the resolution
//! machinery. The context carries the *origin*, the outermost handle
//! and path at which the call chain began. The origin is the cycle-safety
//! mechanism for self-referential bindings: a namespace about to recurse
//! into a binding that points back at the origin skips it instead.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::caps::{Fs, FsHandle};

#[derive(Clone)]
struct Origin {
    fsys: Weak<dyn Fs>,
    // None until the first operation entry point stamps a path; a
    // namespace's base context pre-seeds the handle alone.
    path: Option<String>,
}

/// Context threaded through every capability operation.
#[derive(Clone, Default)]
pub struct OpCtx {
    origin: Option<Origin>,
    op: &'static str,
    read_only: bool,
    no_follow: bool,
    cancel: Option<Arc<AtomicBool>>,
}

impl OpCtx {
    pub fn new() -> OpCtx {
        OpCtx::default()
    }

    /// A context whose origin handle is pre-seeded but whose origin path
    /// is left for the first operation entry point to stamp.
    pub fn for_root(fsys: &FsHandle) -> OpCtx {
        OpCtx {
            origin: Some(Origin {
                fsys: Arc::downgrade(fsys),
                path: None,
            }),
            ..OpCtx::default()
        }
    }

    /// Stamps the origin. The origin is set once: an inner call never
    /// overwrites an outer one. A pre-seeded handle (from
    /// [`OpCtx::for_root`]) is completed with a path only when the same
    /// handle enters an operation.
    pub fn with_origin(&self, fsys: &FsHandle, name: &str, op: &'static str) -> OpCtx {
        let mut ctx = self.clone();
        ctx.op = op;
        match &mut ctx.origin {
            None => {
                ctx.origin = Some(Origin {
                    fsys: Arc::downgrade(fsys),
                    path: Some(name.to_owned()),
                });
            }
            Some(origin) if origin.path.is_none() => {
                if weak_is(&origin.fsys, fsys) {
                    origin.path = Some(name.to_owned());
                }
            }
            Some(_) => {}
        }
        ctx
    }

    /// True when `(fsys, name)` is exactly where the outermost call
    /// began, meaning a further descent would re-enter the starting
    /// point.
    pub fn is_origin(&self, fsys: &FsHandle, name: &str) -> bool {
        match &self.origin {
            Some(origin) => {
                origin.path.as_deref() == Some(name) && weak_is(&origin.fsys, fsys)
            }
            None => false,
        }
    }

    /// The origin handle and path, when both are still known.
    pub fn origin(&self) -> Option<(FsHandle, String)> {
        let origin = self.origin.as_ref()?;
        let path = origin.path.clone()?;
        Some((origin.fsys.upgrade()?, path))
    }

    pub fn op(&self) -> &'static str {
        self.op
    }

    pub fn with_read_only(&self) -> OpCtx {
        let mut ctx = self.clone();
        ctx.read_only = true;
        ctx
    }

    pub fn read_only(&self) -> bool {
        self.read_only
    }

    /// Suppresses symlink traversal for a single call.
    pub fn with_no_follow(&self) -> OpCtx {
        let mut ctx = self.clone();
        ctx.no_follow = true;
        ctx
    }

    pub fn no_follow(&self) -> bool {
        self.no_follow
    }

    /// Attaches a cancellation flag. The core never sets it; layers
    /// that support cancellation check it at their own boundaries.
    pub fn with_cancel(&self, flag: Arc<AtomicBool>) -> OpCtx {
        let mut ctx = self.clone();
        ctx.cancel = Some(flag);
        ctx
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map(|c| c.load(Ordering::Acquire))
            .unwrap_or(false)
    }
}

fn weak_is(weak: &Weak<dyn Fs>, fsys: &FsHandle) -> bool {
    Weak::as_ptr(weak) as *const () == Arc::as_ptr(fsys) as *const ()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memfs::MemFs;

    fn handle() -> FsHandle {
        Arc::new(MemFs::new())
    }

    #[test]
    fn origin_is_set_once() {
        let a = handle();
        let b = handle();
        let ctx = OpCtx::new().with_origin(&a, "x", "open");
        let ctx = ctx.with_origin(&b, "y", "stat");
        assert!(ctx.is_origin(&a, "x"));
        assert!(!ctx.is_origin(&b, "y"));
        assert_eq!(ctx.op(), "stat");
    }

    #[test]
    fn preseeded_root_completes_with_path() {
        let a = handle();
        let b = handle();
        let ctx = OpCtx::for_root(&a);
        assert!(!ctx.is_origin(&a, "."));
        let ctx = ctx.with_origin(&b, "y", "open");
        assert!(!ctx.is_origin(&b, "y"));
        let ctx = ctx.with_origin(&a, "z", "open");
        assert!(ctx.is_origin(&a, "z"));
    }

    #[test]
    fn flags_are_per_clone() {
        let ctx = OpCtx::new();
        assert!(!ctx.read_only());
        let ro = ctx.with_read_only();
        assert!(ro.read_only() && !ro.no_follow());
        assert!(!ctx.read_only());
        assert!(ctx.with_no_follow().no_follow());
    }
}
