//! Control-file and field-file builders.
//!
//! Both follow the same session discipline: a write takes effect at
//! close, a read snapshots at first read, and one open/close cycle is
//! either a read or a write, never both.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::caps::FsHandle;
use crate::error::Result;
use crate::file::{File, FuncFile, OpenFunc};
use crate::node::{FileMode, Node};

/// A file that parses whatever was written during a session into argv
/// tokens and hands them to `handler` at close. Handler errors surface
/// as the close error. An empty or whitespace-only write is a no-op.
pub fn control_file(
    name: &str,
    handler: impl Fn(&[String]) -> Result<()> + Send + Sync + 'static,
) -> FsHandle {
    let name = name.to_owned();
    let handler = Arc::new(handler);
    Arc::new(OpenFunc::new(move |_ctx, _name| {
        let handler = handler.clone();
        let file = FuncFile::new(Node::new(name.clone(), FileMode::file(0o755))).on_close(
            move |node| {
                let line = String::from_utf8_lossy(node.data()).into_owned();
                let args: Vec<String> = line.split_whitespace().map(str::to_owned).collect();
                if args.is_empty() {
                    return Ok(());
                }
                handler(&args)
            },
        );
        Ok(Box::new(file) as Box<dyn File>)
    }))
}

type Getter = Arc<dyn Fn() -> Result<String> + Send + Sync>;
type Setter = Arc<dyn Fn(&[u8]) -> Result<()> + Send + Sync>;

/// A single-value file: reads yield the value plus a trailing newline,
/// writes (when a setter is present) replace it.
#[derive(Default)]
pub struct FieldFile {
    value: String,
    getter: Option<Getter>,
    setter: Option<Setter>,
}

impl FieldFile {
    pub fn new(value: impl Into<String>) -> FieldFile {
        FieldFile {
            value: value.into(),
            ..FieldFile::default()
        }
    }

    /// Computes the value at read time instead of serving the static
    /// one.
    pub fn with_getter(mut self, getter: impl Fn() -> Result<String> + Send + Sync + 'static) -> Self {
        self.getter = Some(Arc::new(getter));
        self
    }

    /// Makes the file writable; the setter receives the raw written
    /// bytes at close.
    pub fn with_setter(mut self, setter: impl Fn(&[u8]) -> Result<()> + Send + Sync + 'static) -> Self {
        self.setter = Some(Arc::new(setter));
        self
    }

    pub fn into_fs(self) -> FsHandle {
        let FieldFile {
            value,
            getter,
            setter,
        } = self;
        let mode = if setter.is_some() { 0o755 } else { 0o555 };
        Arc::new(OpenFunc::new(move |_ctx, name| {
            // One flag per open: a session that read never runs the
            // setter, even if it also wrote.
            let was_read = Arc::new(AtomicBool::new(false));
            let node =
                Node::new(name, FileMode::file(mode)).with_data(format!("{value}\n").into_bytes());
            let mut file = FuncFile::new(node);
            {
                let was_read = was_read.clone();
                let getter = getter.clone();
                file = file.on_read(move |node| {
                    was_read.store(true, Ordering::SeqCst);
                    if let Some(get) = &getter {
                        let mut v = get()?;
                        if !v.ends_with('\n') {
                            v.push('\n');
                        }
                        node.set_data(v.into_bytes());
                    }
                    Ok(())
                });
            }
            if let Some(set) = setter.clone() {
                let was_read = was_read.clone();
                file = file.on_close(move |node| {
                    if was_read.load(Ordering::SeqCst) {
                        return Ok(());
                    }
                    set(node.data())
                });
            }
            Ok(Box::new(file) as Box<dyn File>)
        }))
    }
}

/// A read-only field file serving a fixed value.
pub fn field_file(value: impl Into<String>) -> FsHandle {
    FieldFile::new(value).into_fs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops;
    use parking_lot::Mutex;

    #[test]
    fn control_file_splits_argv_on_close() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let ctl = control_file("ctl", move |args| {
            *s.lock() = args.to_vec();
            Ok(())
        });
        ops::write_file(&ctl, ".", b"  mount a  b \n").unwrap();
        assert_eq!(&*seen.lock(), &["mount", "a", "b"]);
    }

    #[test]
    fn control_file_ignores_empty_writes() {
        let fired = Arc::new(AtomicBool::new(false));
        let f = fired.clone();
        let ctl = control_file("ctl", move |_| {
            f.store(true, Ordering::SeqCst);
            Ok(())
        });
        ops::write_file(&ctl, ".", b"  \n").unwrap();
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[test]
    fn field_file_reads_value_with_newline() {
        let f = field_file("web");
        assert_eq!(ops::read_file(&f, ".").unwrap(), b"web\n");
    }

    #[test]
    fn field_setter_skipped_after_read() {
        let set = Arc::new(Mutex::new(None::<Vec<u8>>));
        let s = set.clone();
        let f = FieldFile::new("v")
            .with_setter(move |data| {
                *s.lock() = Some(data.to_vec());
                Ok(())
            })
            .into_fs();

        let mut file = ops::open(&f, ".").unwrap();
        let mut buf = [0u8; 8];
        file.read(&mut buf).unwrap();
        file.write(b"ignored").unwrap();
        file.close().unwrap();
        assert_eq!(*set.lock(), None);

        ops::write_file(&f, ".", b"new").unwrap();
        assert_eq!(set.lock().as_deref(), Some(b"new".as_ref()));
    }

    #[test]
    fn field_getter_runs_per_open() {
        let count = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let c = count.clone();
        let f = FieldFile::new("")
            .with_getter(move || {
                let n = c.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(n.to_string())
            })
            .into_fs();
        assert_eq!(ops::read_file(&f, ".").unwrap(), b"1\n");
        assert_eq!(ops::read_file(&f, ".").unwrap(), b"2\n");
    }
}
