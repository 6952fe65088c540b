//! Error types shared by every filesystem operation.
//!
//! Failures carry an error *kind* plus enough context to diagnose which
//! layer of a composed filesystem refused the operation: the operation
//! name, the path, and (for unsupported capabilities) the concrete type
//! of the handle that was finally asked.

use std::fmt;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, FsError>;

/// The closed set of failure kinds.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The named entry could not be found.
    #[error("entry not found")]
    NotFound,
    /// The named entry already exists.
    #[error("entry already exists")]
    AlreadyExists,
    /// Malformed path or argument.
    #[error("invalid argument")]
    Invalid,
    /// The backing store refused the operation.
    #[error("permission denied")]
    Permission,
    /// The file handle was already closed.
    #[error("file already closed")]
    Closed,
    /// No layer of the composition supports the capability, even after
    /// descent and emulation.
    #[error("operation not supported")]
    Unsupported,
    /// Remove of a non-empty directory without recursive semantics.
    #[error("directory not empty")]
    NotEmpty,
}

/// A failed filesystem operation.
///
/// Wrapping is one-shot: `with_op`/`with_path` keep the innermost value,
/// so the error reports the layer that actually failed rather than the
/// outermost call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsError {
    kind: ErrorKind,
    op: Option<&'static str>,
    path: Option<String>,
    fs_type: Option<&'static str>,
}

impl FsError {
    pub fn new(kind: ErrorKind) -> Self {
        FsError {
            kind,
            op: None,
            path: None,
            fs_type: None,
        }
    }

    /// Capability missing on `fs_type` after full resolution.
    pub fn unsupported(op: &'static str, path: &str, fs_type: &'static str) -> Self {
        FsError {
            kind: ErrorKind::Unsupported,
            op: Some(op),
            path: Some(path.to_owned()),
            fs_type: Some(fs_type),
        }
    }

    pub fn not_found(op: &'static str, path: &str) -> Self {
        FsError::new(ErrorKind::NotFound).with_op(op).with_path(path)
    }

    pub fn invalid_path(op: &'static str, path: &str) -> Self {
        FsError::new(ErrorKind::Invalid).with_op(op).with_path(path)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn op(&self) -> Option<&'static str> {
        self.op
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Concrete type name of the handle that failed, when known.
    pub fn fs_type(&self) -> Option<&'static str> {
        self.fs_type
    }

    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }

    pub fn with_op(mut self, op: &'static str) -> Self {
        self.op.get_or_insert(op);
        self
    }

    pub fn with_path(mut self, path: &str) -> Self {
        if self.path.is_none() {
            self.path = Some(path.to_owned());
        }
        self
    }

    pub fn with_fs_type(mut self, fs_type: &'static str) -> Self {
        self.fs_type.get_or_insert(fs_type);
        self
    }

    /// Rewrites the reported path. Used by path-rewriting wrappers to
    /// shorten fully-joined paths back into the caller's coordinates.
    pub(crate) fn set_path(mut self, path: String) -> Self {
        self.path = Some(path);
        self
    }
}

impl From<ErrorKind> for FsError {
    fn from(kind: ErrorKind) -> Self {
        FsError::new(kind)
    }
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(op) = self.op {
            write!(f, "{op} ")?;
        }
        if let Some(path) = &self.path {
            write!(f, "{path}: ")?;
        }
        write!(f, "{}", self.kind)?;
        if let Some(fs_type) = self.fs_type {
            write!(f, " on {fs_type}")?;
        }
        Ok(())
    }
}

impl std::error::Error for FsError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapping_keeps_innermost_context() {
        let err = FsError::not_found("open", "a/b").with_op("stat").with_path("outer");
        assert_eq!(err.op(), Some("open"));
        assert_eq!(err.path(), Some("a/b"));
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn unsupported_names_the_failing_type() {
        let err = FsError::unsupported("mkdir", "x", "capfs::memfs::MemFs");
        assert_eq!(
            err.to_string(),
            "mkdir x: operation not supported on capfs::memfs::MemFs"
        );
    }
}
