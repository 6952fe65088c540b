//! Capability devices: allocating live resources by reading files.
//!
//! A device serves a `new/` directory with one file per registered
//! resource kind. Reading `new/<kind>` allocates a resource and yields
//! its id; the resource then appears as a numbered directory holding a
//! `ctl` file, a `type` file, whatever extras the allocator attached,
//! and, once mounted, the resource's filesystem under `mount`.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::caps::{Fs, FsHandle, ResolveFs, SubFs};
use crate::context::OpCtx;
use crate::dir::dir_file;
use crate::error::{ErrorKind, FsError, Result};
use crate::file::{File, FuncFile, OpenFunc};
use crate::mapfs::MapFs;
use crate::node::{FileMode, Node};
use crate::ops;
use crate::resolve::resolve;
use crate::sub;
use crate::synth::{control_file, field_file};
use crate::unionfs::UnionFs;

/// Builds the filesystem a resource serves under `mount`, given the
/// argv written to its ctl file.
pub type Mounter = Box<dyn FnMut(&[String]) -> Result<FsHandle> + Send>;

/// Prepares a mounter for a freshly allocated resource. Runs at
/// allocation time outside the device lock and may attach extra files
/// to the resource before it becomes visible.
pub type Allocator = Arc<dyn Fn(&Arc<Resource>) -> Result<Mounter> + Send + Sync>;

struct DeviceState {
    allocators: BTreeMap<String, Allocator>,
    resources: BTreeMap<String, FsHandle>,
    next_id: u64,
}

pub struct CapDevice {
    state: Mutex<DeviceState>,
    me: Weak<CapDevice>,
}

impl fmt::Debug for CapDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("CapDevice")
            .field("kinds", &state.allocators.keys().collect::<Vec<_>>())
            .field("resources", &state.resources.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl CapDevice {
    pub fn new() -> Arc<CapDevice> {
        Arc::new_cyclic(|me| CapDevice {
            state: Mutex::new(DeviceState {
                allocators: BTreeMap::new(),
                resources: BTreeMap::new(),
                next_id: 0,
            }),
            me: me.clone(),
        })
    }

    pub fn register(
        &self,
        kind: &str,
        alloc: impl Fn(&Arc<Resource>) -> Result<Mounter> + Send + Sync + 'static,
    ) {
        self.state
            .lock()
            .allocators
            .insert(kind.to_owned(), Arc::new(alloc));
    }

    /// The handle of an allocated resource, if it exists.
    pub fn resource(&self, id: u64) -> Option<FsHandle> {
        self.state.lock().resources.get(&id.to_string()).cloned()
    }

    fn allocate(&self, kind: &str) -> Result<u64> {
        let (alloc, id) = {
            let mut state = self.state.lock();
            let alloc = state
                .allocators
                .get(kind)
                .cloned()
                .ok_or_else(|| FsError::not_found("open", kind))?;
            state.next_id += 1;
            (alloc, state.next_id)
        };
        let resource = Resource::new(id, kind);
        let mounter = alloc(&resource)?;
        *resource.mounter.lock() = Some(mounter);
        self.state
            .lock()
            .resources
            .insert(id.to_string(), resource as FsHandle);
        info!(kind, id, "allocated resource");
        Ok(id)
    }

    /// The tree served right now: `ctl` and `new/` unioned with the
    /// allocated resources. Assembled fresh on every open so new
    /// resources show up immediately.
    fn root(&self) -> FsHandle {
        let me = self.me.clone();
        let new_fs: FsHandle = Arc::new(OpenFunc::new(move |_ctx, name| {
            let device = me
                .upgrade()
                .ok_or_else(|| FsError::new(ErrorKind::Closed).with_op("open"))?;
            if name == "." {
                let entries = {
                    let state = device.state.lock();
                    state
                        .allocators
                        .keys()
                        .map(|kind| Node::new(kind.clone(), FileMode::file(0o555)))
                        .collect()
                };
                return Ok(dir_file(Node::new(".", FileMode::dir(0o555)), entries));
            }
            let kind = name.to_owned();
            let file = FuncFile::new(Node::new(name, FileMode::file(0o555))).on_read(move |node| {
                let id = device.allocate(&kind)?;
                node.set_data(format!("{id}\n"));
                Ok(())
            });
            Ok(Box::new(file) as Box<dyn File>)
        }));

        let mut base = MapFs::new();
        base.insert_node(
            "ctl",
            Node::new("ctl", FileMode::file(0o555)).with_data("ctl\n"),
        );
        base.insert("new", new_fs);

        let resources: MapFs = {
            let state = self.state.lock();
            state
                .resources
                .iter()
                .map(|(id, fs)| (id.clone(), fs.clone()))
                .collect()
        };

        Arc::new(UnionFs::new(vec![Arc::new(base), Arc::new(resources)]))
    }
}

impl Fs for CapDevice {
    fn open(&self, name: &str) -> Result<Box<dyn File>> {
        self.open_ctx(&OpCtx::new(), name)
    }

    fn open_ctx(&self, ctx: &OpCtx, name: &str) -> Result<Box<dyn File>> {
        ops::open_ctx(&self.root(), ctx, name)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<CapDevice>()
    }

    fn as_sub(&self) -> Option<&dyn SubFs> {
        Some(self)
    }
}

impl SubFs for CapDevice {
    fn sub(&self, dir: &str) -> Result<FsHandle> {
        sub::sub(&self.root(), dir)
    }
}

/// One allocated resource.
///
/// Serves a small filesystem rebuilt on every resolution: `ctl`,
/// `type`, any extras, and `mount` once mounted.
pub struct Resource {
    id: u64,
    kind: String,
    mounter: Mutex<Option<Mounter>>,
    fs: RwLock<Option<FsHandle>>,
    extras: Mutex<BTreeMap<String, FsHandle>>,
    me: Weak<Resource>,
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("mounted", &self.fs.read().is_some())
            .finish()
    }
}

impl Resource {
    fn new(id: u64, kind: &str) -> Arc<Resource> {
        Arc::new_cyclic(|me| Resource {
            id,
            kind: kind.to_owned(),
            mounter: Mutex::new(None),
            fs: RwLock::new(None),
            extras: Mutex::new(BTreeMap::new()),
            me: me.clone(),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// The mounted filesystem, if the resource has been mounted.
    pub fn fs(&self) -> Option<FsHandle> {
        self.fs.read().clone()
    }

    /// Attaches an extra file or subtree next to `ctl` and `type`.
    pub fn add_extra(&self, name: &str, fs: FsHandle) {
        self.extras.lock().insert(name.to_owned(), fs);
    }

    /// Attaches a one-shot file that mounts the resource with no
    /// arguments when first read, then disappears.
    pub fn add_trigger(&self, name: &str) {
        let me = self.me.clone();
        let trigger = name.to_owned();
        let fs: FsHandle = Arc::new(OpenFunc::new(move |_ctx, open_name| {
            let me = me.clone();
            let trigger = trigger.clone();
            let file =
                FuncFile::new(Node::new(open_name, FileMode::file(0o555))).on_read(move |_node| {
                    let resource = me
                        .upgrade()
                        .ok_or_else(|| FsError::new(ErrorKind::Closed).with_op("read"))?;
                    // Removed before mounting so concurrent reads fire
                    // the mount at most once.
                    if resource.extras.lock().remove(&trigger).is_none() {
                        return Ok(());
                    }
                    resource.mount_with(&[])
                });
            Ok(Box::new(file) as Box<dyn File>)
        }));
        self.extras.lock().insert(name.to_owned(), fs);
    }

    /// Runs the mounter and publishes its filesystem under `mount`.
    /// The filesystem is only swapped in after the mounter succeeds.
    pub fn mount_with(&self, args: &[String]) -> Result<()> {
        let fs = {
            let mut guard = self.mounter.lock();
            let mounter = guard.as_mut().ok_or_else(|| {
                FsError::new(ErrorKind::Unsupported)
                    .with_op("mount")
                    .with_path(&self.id.to_string())
            })?;
            mounter(args)?
        };
        *self.fs.write() = Some(fs);
        debug!(id = self.id, kind = %self.kind, "mounted");
        Ok(())
    }

    fn tree(&self) -> FsHandle {
        let mut m = MapFs::new();
        let me = self.me.clone();
        m.insert(
            "ctl",
            control_file("ctl", move |args| {
                let resource = me
                    .upgrade()
                    .ok_or_else(|| FsError::new(ErrorKind::Closed).with_op("ctl"))?;
                match args.first().map(String::as_str) {
                    Some("mount") => resource.mount_with(&args[1..]),
                    // Unknown verbs are tolerated.
                    _ => Ok(()),
                }
            }),
        );
        m.insert("type", field_file(self.kind.as_str()));
        if let Some(fs) = self.fs.read().clone() {
            m.insert("mount", fs);
        }
        for (name, fs) in self.extras.lock().iter() {
            m.insert(name.clone(), fs.clone());
        }
        Arc::new(m)
    }
}

impl Fs for Resource {
    fn open(&self, name: &str) -> Result<Box<dyn File>> {
        self.open_ctx(&OpCtx::new(), name)
    }

    fn open_ctx(&self, ctx: &OpCtx, name: &str) -> Result<Box<dyn File>> {
        ops::open_ctx(&self.tree(), ctx, name)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<Resource>()
    }

    fn as_resolve(&self) -> Option<&dyn ResolveFs> {
        Some(self)
    }
}

impl ResolveFs for Resource {
    fn resolve_fs(&self, ctx: &OpCtx, name: &str) -> Result<Option<(FsHandle, String)>> {
        let tree = self.tree();
        let (rfsys, rname) = resolve(&tree, ctx, name)?;
        Ok(Some((rfsys, rname)))
    }
}
