//! Resource allocation and control through a capability device.

use std::sync::Arc;

use parking_lot::Mutex;
use pretty_assertions::assert_eq;

use capfs::{
    ops, BindMode, CapDevice, ErrorKind, FsError, FsHandle, MemFs, Mounter, Namespace,
};

fn tmpfs_device() -> Arc<CapDevice> {
    let dev = CapDevice::new();
    dev.register("tmpfs", |_res| {
        Ok(Box::new(|_args: &[String]| Ok(Arc::new(MemFs::new()) as FsHandle)) as Mounter)
    });
    dev
}

#[test]
fn resources_go_through_the_two_phase_lifecycle() {
    let dev: FsHandle = tmpfs_device();

    assert_eq!(ops::read_file(&dev, "new/tmpfs").unwrap(), b"1\n");
    assert_eq!(ops::read_file(&dev, "new/tmpfs").unwrap(), b"2\n");

    assert_eq!(ops::read_file(&dev, "1/type").unwrap(), b"tmpfs\n");
    assert_eq!(ops::read_file(&dev, "2/type").unwrap(), b"tmpfs\n");
    assert!(!ops::exists(&dev, "1/mount").unwrap());

    ops::write_file(&dev, "1/ctl", b"mount\n").unwrap();
    assert!(ops::is_dir(&dev, "1/mount").unwrap());
    assert!(!ops::exists(&dev, "2/mount").unwrap());

    ops::write_file(&dev, "1/mount/hello", b"stored").unwrap();
    assert_eq!(ops::read_file(&dev, "1/mount/hello").unwrap(), b"stored");
}

#[test]
fn concurrent_allocations_get_distinct_ids() {
    let dev: FsHandle = tmpfs_device();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let dev = dev.clone();
            std::thread::spawn(move || {
                let data = ops::read_file(&dev, "new/tmpfs").unwrap();
                String::from_utf8(data).unwrap().trim().to_owned()
            })
        })
        .collect();
    let mut ids: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 8);

    // Every allocation landed in the resource map alongside ctl and new.
    let names: Vec<_> = ops::read_dir(&dev, ".")
        .unwrap()
        .iter()
        .map(|n| n.name().to_owned())
        .collect();
    assert_eq!(names.len(), 10);
    for id in &ids {
        assert!(names.contains(id));
    }
}

#[test]
fn new_lists_registered_kinds() {
    let dev = tmpfs_device();
    dev.register("null", |_res| {
        Ok(Box::new(|_args: &[String]| Ok(Arc::new(MemFs::new()) as FsHandle)) as Mounter)
    });
    let dev: FsHandle = dev;

    let kinds: Vec<_> = ops::read_dir(&dev, "new")
        .unwrap()
        .iter()
        .map(|n| n.name().to_owned())
        .collect();
    assert_eq!(kinds, vec!["null", "tmpfs"]);
}

#[test]
fn mounter_receives_ctl_arguments() {
    let args_seen = Arc::new(Mutex::new(Vec::new()));
    let dev = CapDevice::new();
    let seen = args_seen.clone();
    dev.register("tmpfs", move |_res| {
        let seen = seen.clone();
        Ok(Box::new(move |args: &[String]| {
            *seen.lock() = args.to_vec();
            Ok(Arc::new(MemFs::new()) as FsHandle)
        }) as Mounter)
    });
    let dev: FsHandle = dev;

    ops::read_file(&dev, "new/tmpfs").unwrap();
    ops::write_file(&dev, "1/ctl", b"mount size=64m ro\n").unwrap();
    assert_eq!(&*args_seen.lock(), &["size=64m".to_owned(), "ro".to_owned()]);
}

#[test]
fn failed_mount_can_be_retried() {
    let dev = CapDevice::new();
    dev.register("flaky", |_res| {
        let mut attempts = 0u32;
        Ok(Box::new(move |_args: &[String]| {
            attempts += 1;
            if attempts == 1 {
                return Err(FsError::new(ErrorKind::Permission).with_op("mount"));
            }
            Ok(Arc::new(MemFs::new()) as FsHandle)
        }) as Mounter)
    });
    let dev: FsHandle = dev;

    ops::read_file(&dev, "new/flaky").unwrap();
    let err = ops::write_file(&dev, "1/ctl", b"mount\n").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Permission);
    assert!(!ops::exists(&dev, "1/mount").unwrap());

    ops::write_file(&dev, "1/ctl", b"mount\n").unwrap();
    assert!(ops::is_dir(&dev, "1/mount").unwrap());
}

#[test]
fn device_works_bound_inside_a_namespace() {
    let ns = Namespace::new();
    let dev: FsHandle = tmpfs_device();
    ns.bind(&dev, ".", "cap", BindMode::After).unwrap();
    let ns: FsHandle = ns;

    assert_eq!(ops::read_file(&ns, "cap/new/tmpfs").unwrap(), b"1\n");
    ops::write_file(&ns, "cap/1/ctl", b"mount\n").unwrap();
    ops::write_file(&ns, "cap/1/mount/f", b"via ns").unwrap();
    assert_eq!(ops::read_file(&ns, "cap/1/mount/f").unwrap(), b"via ns");

    let names: Vec<_> = ops::read_dir(&ns, "cap/1")
        .unwrap()
        .iter()
        .map(|n| n.name().to_owned())
        .collect();
    assert_eq!(names, vec!["ctl", "mount", "type"]);
}
