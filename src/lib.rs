//! Composable virtual filesystems with per-backend capabilities.
//!
//! Everything is a filesystem handle ([`FsHandle`]): in-memory trees,
//! static maps, unions, namespaces, capability devices. A backend
//! implements [`Fs`] plus whichever capability traits it natively
//! supports; the free functions in [`ops`] work against any handle,
//! descending through [`SubFs`]/[`ResolveFs`] toward the backend that
//! serves a path and emulating what they can on the way.
//!
//! Paths are relative and slash-separated; `"."` names the root of any
//! filesystem. See [`path`] for the exact rules.
//!
//! ```
//! use std::sync::Arc;
//! use capfs::{ops, FsHandle, MemFs, Namespace};
//!
//! # fn main() -> capfs::Result<()> {
//! let ns = Namespace::new();
//! let mem: FsHandle = Arc::new(MemFs::new());
//! ns.bind(&mem, ".", "tmp", Default::default())?;
//!
//! let ns: FsHandle = ns;
//! ops::write_file(&ns, "tmp/hello", b"world")?;
//! assert_eq!(ops::read_file(&ns, "tmp/hello")?, b"world");
//! # Ok(())
//! # }
//! ```

mod caps;
mod context;
mod device;
mod dir;
mod error;
mod file;
mod mapfs;
mod memfs;
mod namespace;
mod node;
pub mod ops;
pub mod path;
mod resolve;
mod sub;
mod synth;
mod unionfs;

pub use caps::{
    same_fs, ChmodFs, ChownFs, CreateFs, Event, Fs, FsHandle, MkdirAllFs, MkdirFs, OpenFileFs,
    ReadDirFs, ReadlinkFs, RemoveAllFs, RemoveFs, RenameFs, ResolveFs, SetTimesFs, StatFs, SubFs,
    SymlinkFs, TruncateFs, WatchFs, XattrFs,
};
pub use context::OpCtx;
pub use device::{Allocator, CapDevice, Mounter, Resource};
pub use dir::dir_file;
pub use error::{ErrorKind, FsError, Result};
pub use file::{read_all, File, FuncFile, OpenFunc};
pub use mapfs::MapFs;
pub use memfs::MemFs;
pub use namespace::{BindMode, Namespace};
pub use node::{FileMode, Node, OpenFlags};
pub use resolve::{resolve, resolve_further};
pub use sub::sub;
pub use synth::{control_file, field_file, FieldFile};
pub use unionfs::UnionFs;
