//! A read-mostly union over an ordered list of filesystems.
//!
//! Lookups resolve to the first member that serves a name; root
//! listings merge every member's entries. Writes route to a member
//! that can create, falling back to the first member that has the
//! name at all.

use std::any::Any;

use tracing::warn;

use crate::caps::{same_fs, Fs, FsHandle, ResolveFs, SubFs};
use crate::context::OpCtx;
use crate::dir::dir_file;
use crate::error::{ErrorKind, FsError, Result};
use crate::file::File;
use crate::node::{FileMode, Node};
use crate::ops;
use crate::path;

#[derive(Debug)]
pub struct UnionFs {
    members: Vec<FsHandle>,
}

impl UnionFs {
    pub fn new(members: Vec<FsHandle>) -> UnionFs {
        UnionFs { members }
    }
}

impl Fs for UnionFs {
    fn open(&self, name: &str) -> Result<Box<dyn File>> {
        self.open_ctx(&OpCtx::new(), name)
    }

    fn open_ctx(&self, ctx: &OpCtx, name: &str) -> Result<Box<dyn File>> {
        if !path::valid(name) {
            return Err(FsError::invalid_path("open", name));
        }

        if name != "." {
            if let Some((rfsys, rname)) = self.resolve_fs(ctx, name)? {
                return ops::open_ctx(&rfsys, ctx, &rname);
            }
            // Unresolved non-root names do not exist in any member.
            return Err(FsError::not_found("open", name));
        }

        let mut entries: Vec<Node> = Vec::new();
        for fsys in &self.members {
            match ops::read_dir_ctx(fsys, ctx, name) {
                Ok(e) => entries.extend(e),
                Err(err) => {
                    warn!(member = fsys.type_name(), %err, "union: skipping member listing");
                }
            }
        }
        Ok(dir_file(Node::new(name, FileMode::dir(0o555)), entries))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<UnionFs>()
    }

    fn as_resolve(&self) -> Option<&dyn ResolveFs> {
        Some(self)
    }

    fn as_sub(&self) -> Option<&dyn SubFs> {
        Some(self)
    }
}

/// Descent lands on the member that serves `dir`, so operations issued
/// deep inside a union reach a concrete store instead of dead-ending
/// on the union itself.
impl SubFs for UnionFs {
    fn sub(&self, dir: &str) -> Result<FsHandle> {
        match self.resolve_fs(&OpCtx::new(), dir)? {
            Some((rfsys, rname)) => crate::sub::sub(&rfsys, &rname),
            None => Err(FsError::not_found("sub", dir)),
        }
    }
}

impl ResolveFs for UnionFs {
    fn resolve_fs(&self, ctx: &OpCtx, name: &str) -> Result<Option<(FsHandle, String)>> {
        if self.members.is_empty() {
            return Err(FsError::not_found("resolve", name));
        }
        if self.members.len() == 1 {
            return Ok(Some((self.members[0].clone(), name.to_owned())));
        }
        if name == "." && ctx.read_only() {
            return Ok(None);
        }

        let mut to_stat: Vec<&FsHandle> = Vec::new();
        for fsys in &self.members {
            if let Some(resolver) = fsys.as_resolve() {
                match resolver.resolve_fs(ctx, name) {
                    Err(err) if err.is(ErrorKind::NotFound) => continue,
                    Err(err) => return Err(err),
                    Ok(resolved) => {
                        let (rfsys, rname) = match resolved {
                            Some(pair) => pair,
                            None => (fsys.clone(), name.to_owned()),
                        };
                        if !ctx.read_only() && rfsys.as_create().is_some() {
                            return Ok(Some((rfsys, rname)));
                        }
                        if rname != name || !same_fs(&rfsys, fsys) {
                            // The member routed somewhere: it has it.
                            return Ok(Some((rfsys, rname)));
                        }
                    }
                }
            }
            to_stat.push(fsys);
        }

        let mut fallback: Option<&FsHandle> = None;
        for fsys in to_stat {
            if ops::stat_ctx(fsys, ctx, name).is_err() {
                continue;
            }
            if ctx.read_only() || fsys.as_create().is_some() {
                return Ok(Some((fsys.clone(), name.to_owned())));
            }
            fallback.get_or_insert(fsys);
        }
        // No member can create, but one still has the name; a write
        // open may fail later, a plain open should not.
        Ok(fallback.map(|fsys| (fsys.clone(), name.to_owned())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapfs::MapFs;
    use crate::memfs::MemFs;
    use std::sync::Arc;

    fn mapfs_with(name: &str, data: &str) -> FsHandle {
        let mut m = MapFs::new();
        m.insert_node(
            name,
            Node::new(name, FileMode::file(0o644)).with_data(data.as_bytes().to_vec()),
        );
        Arc::new(m)
    }

    #[test]
    fn merges_root_listings() {
        let u: FsHandle = Arc::new(UnionFs::new(vec![
            mapfs_with("a", "1"),
            mapfs_with("b", "2"),
        ]));
        let names: Vec<_> = ops::read_dir(&u, ".")
            .unwrap()
            .iter()
            .map(|n| n.name().to_owned())
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn reads_from_the_member_that_has_it() {
        let u: FsHandle = Arc::new(UnionFs::new(vec![
            mapfs_with("a", "first"),
            mapfs_with("b", "second"),
        ]));
        assert_eq!(ops::read_file(&u, "b").unwrap(), b"second");
    }

    #[test]
    fn writes_route_to_creating_member() {
        let mem: FsHandle = Arc::new(MemFs::new());
        ops::write_file(&mem, "f", b"old").unwrap();
        let u: FsHandle = Arc::new(UnionFs::new(vec![mapfs_with("a", "ro"), mem.clone()]));
        ops::write_file(&u, "f", b"data").unwrap();
        assert_eq!(ops::read_file(&mem, "f").unwrap(), b"data");
    }

    #[test]
    fn missing_name_is_not_found() {
        let u: FsHandle = Arc::new(UnionFs::new(vec![
            mapfs_with("a", "1"),
            mapfs_with("b", "2"),
        ]));
        assert_eq!(
            ops::open(&u, "nope").unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }
}
