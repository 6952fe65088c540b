//! Bind precedence, union listings, synthesis, and cycle safety.

use std::sync::Arc;

use pretty_assertions::assert_eq;

use capfs::{ops, BindMode, ErrorKind, FileMode, FsHandle, MapFs, MemFs, Namespace, Node};

fn file_fs(name: &str, data: &str) -> FsHandle {
    let mut m = MapFs::new();
    m.insert_node(
        name,
        Node::new(name, FileMode::file(0o644)).with_data(data.as_bytes().to_vec()),
    );
    Arc::new(m)
}

fn names(fsys: &FsHandle, dir: &str) -> Vec<String> {
    ops::read_dir(fsys, dir)
        .unwrap()
        .iter()
        .map(|n| n.name().to_owned())
        .collect()
}

#[test]
fn last_after_bind_wins_file_lookup() {
    let ns = Namespace::new();
    ns.bind(&file_fs("f", "first"), "f", "cfg", BindMode::After)
        .unwrap();
    ns.bind(&file_fs("f", "second"), "f", "cfg", BindMode::After)
        .unwrap();
    let ns: FsHandle = ns;
    assert_eq!(ops::read_file(&ns, "cfg").unwrap(), b"second");
}

#[test]
fn replace_resets_and_before_is_lowest_precedence() {
    let ns = Namespace::new();
    ns.bind(&file_fs("f", "old"), "f", "cfg", BindMode::After)
        .unwrap();
    ns.bind(&file_fs("f", "kept"), "f", "cfg", BindMode::Replace)
        .unwrap();
    ns.bind(&file_fs("f", "shadowed"), "f", "cfg", BindMode::Before)
        .unwrap();
    let ns: FsHandle = ns;
    assert_eq!(ops::read_file(&ns, "cfg").unwrap(), b"kept");
}

#[test]
fn union_listing_merges_roots() {
    let ns = Namespace::new();
    ns.bind(&file_fs("x", "1"), ".", ".", BindMode::After).unwrap();
    ns.bind(&file_fs("y", "2"), ".", ".", BindMode::After).unwrap();
    let ns: FsHandle = ns;
    assert_eq!(names(&ns, "."), vec!["x", "y"]);
}

#[test]
fn synthesized_parents_are_stable() {
    let ns = Namespace::new();
    ns.bind(
        &file_fs("file.txt", "deep"),
        "file.txt",
        "a/b/c/file.txt",
        BindMode::After,
    )
    .unwrap();
    let ns: FsHandle = ns;

    for _ in 0..2 {
        assert_eq!(names(&ns, "a"), vec!["b"]);
        assert_eq!(names(&ns, "a/b"), vec!["c"]);
        assert_eq!(names(&ns, "a/b/c"), vec!["file.txt"]);
    }
    assert!(ops::is_dir(&ns, "a/b").unwrap());
    assert_eq!(ops::read_file(&ns, "a/b/c/file.txt").unwrap(), b"deep");
}

#[test]
fn self_referential_bind_is_cycle_safe() {
    let ns = Namespace::new();
    let handle: FsHandle = ns.clone();
    ns.bind(&handle, ".", "self", BindMode::After).unwrap();

    assert!(ops::stat(&handle, ".").unwrap().is_dir());
    assert_eq!(names(&handle, "."), vec!["self"]);
    assert_eq!(names(&handle, "self"), vec!["self"]);
    assert_eq!(names(&handle, "self/self"), vec!["self"]);
}

#[test]
fn hidden_entries_are_unlisted_but_openable() {
    let ns = Namespace::new();
    ns.bind(&file_fs("#secret", "hush"), ".", ".", BindMode::After)
        .unwrap();
    let ns: FsHandle = ns;

    assert!(names(&ns, ".").is_empty());
    assert_eq!(ops::read_file(&ns, "#secret").unwrap(), b"hush");
}

#[test]
fn writes_land_on_the_backing_store() {
    let ns = Namespace::new();
    let mem: FsHandle = Arc::new(MemFs::new());
    ns.bind(&mem, ".", "data", BindMode::After).unwrap();
    let ns: FsHandle = ns;

    ops::mkdir(&ns, "data/sub", FileMode::dir(0o755)).unwrap();
    ops::write_file(&ns, "data/sub/f", b"hi").unwrap();
    assert_eq!(ops::read_file(&mem, "sub/f").unwrap(), b"hi");

    ops::mkdir_all(&ns, "data/a/b/c", FileMode::dir(0o755)).unwrap();
    assert!(ops::is_dir(&mem, "a/b/c").unwrap());
}

#[test]
fn rename_stays_within_one_binding() {
    let ns = Namespace::new();
    let docs: FsHandle = Arc::new(MemFs::new());
    let other: FsHandle = Arc::new(MemFs::new());
    ns.bind(&docs, ".", "docs", BindMode::After).unwrap();
    ns.bind(&other, ".", "other", BindMode::After).unwrap();
    let ns: FsHandle = ns;

    ops::mkdir(&ns, "docs/d", FileMode::dir(0o755)).unwrap();
    ops::write_file(&ns, "docs/d/f", b"x").unwrap();
    ops::mkdir(&ns, "other/d", FileMode::dir(0o755)).unwrap();

    ops::rename(&ns, "docs/d/f", "docs/d/g").unwrap();
    assert_eq!(ops::read_file(&docs, "d/g").unwrap(), b"x");
    assert!(!ops::exists(&docs, "d/f").unwrap());

    let err = ops::rename(&ns, "docs/d/g", "other/d/g").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unsupported);
}

#[test]
fn bind_probes_the_source() {
    let ns = Namespace::new();
    let mem: FsHandle = Arc::new(MemFs::new());
    let err = ns
        .bind(&mem, "missing", "dst", BindMode::After)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn bind_rejects_malformed_paths() {
    let ns = Namespace::new();
    let mem: FsHandle = Arc::new(MemFs::new());
    assert!(ns.bind(&mem, ".", "/abs", BindMode::After).is_err());
    assert!(ns.bind(&mem, "..", "dst", BindMode::After).is_err());
}

#[test]
fn unbind_removes_all_bindings_at_a_path() {
    let ns = Namespace::new();
    let mem: FsHandle = Arc::new(MemFs::new());
    ns.bind(&mem, ".", "tmp", BindMode::After).unwrap();
    ns.unbind("tmp").unwrap();

    let handle: FsHandle = ns.clone();
    assert!(names(&handle, ".").is_empty());
    assert_eq!(ns.unbind("tmp").unwrap_err().kind(), ErrorKind::NotFound);
}

#[test]
fn bind_modes_parse_from_strings() {
    assert_eq!("".parse::<BindMode>().unwrap(), BindMode::After);
    assert_eq!("after".parse::<BindMode>().unwrap(), BindMode::After);
    assert_eq!("before".parse::<BindMode>().unwrap(), BindMode::Before);
    assert_eq!("replace".parse::<BindMode>().unwrap(), BindMode::Replace);
    assert!("sideways".parse::<BindMode>().is_err());
}
