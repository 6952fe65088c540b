//! Slash-separated, `.`-rooted path helpers.
//!
//! Every component validates names before use: paths are relative, use
//! `/` as the only separator, and never contain `.` or `..` segments.
//! The root of any filesystem is spelled `"."`.

/// Reports whether `name` is a valid rooted path.
pub fn valid(name: &str) -> bool {
    if name == "." {
        return true;
    }
    if name.is_empty() {
        return false;
    }
    name.split('/').all(|seg| !seg.is_empty() && seg != "." && seg != "..")
}

/// The parent of `name`, or `"."` when `name` has a single segment.
pub fn parent(name: &str) -> &str {
    match name.rfind('/') {
        Some(i) => &name[..i],
        None => ".",
    }
}

/// The final segment of `name`.
pub fn base(name: &str) -> &str {
    match name.rfind('/') {
        Some(i) => &name[i + 1..],
        None => name,
    }
}

/// Joins two rooted paths, collapsing `"."` and empty on either side.
pub fn join(dir: &str, name: &str) -> String {
    if dir == "." || dir.is_empty() {
        return name.to_owned();
    }
    if name == "." || name.is_empty() {
        return dir.to_owned();
    }
    format!("{dir}/{name}")
}

/// Strips `suffix` (as a path tail) from `s`, returning the remainder.
pub(crate) fn trim_suffix<'a>(s: &'a str, suffix: &str) -> &'a str {
    s.strip_suffix(suffix).unwrap_or(s).trim_end_matches('/')
}

/// The sub-path of `name` under the bound prefix `prefix`, if any.
/// `prefix == "."` matches everything; an exact match yields `"."`.
pub(crate) fn rel(prefix: &str, name: &str) -> Option<String> {
    if prefix == "." {
        return Some(name.to_owned());
    }
    if name == prefix {
        return Some(".".to_owned());
    }
    name.strip_prefix(prefix)
        .and_then(|r| r.strip_prefix('/'))
        .map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_accepts_rooted_relative_paths() {
        assert!(valid("."));
        assert!(valid("a"));
        assert!(valid("a/b/c"));
        assert!(valid("#hidden/x"));
    }

    #[test]
    fn valid_rejects_absolute_dotted_and_empty() {
        assert!(!valid(""));
        assert!(!valid("/a"));
        assert!(!valid("a/"));
        assert!(!valid("a//b"));
        assert!(!valid("a/./b"));
        assert!(!valid("a/../b"));
        assert!(!valid(".."));
    }

    #[test]
    fn parent_and_base() {
        assert_eq!(parent("a/b/c"), "a/b");
        assert_eq!(parent("a"), ".");
        assert_eq!(base("a/b/c"), "c");
        assert_eq!(base("a"), "a");
    }

    #[test]
    fn join_collapses_root() {
        assert_eq!(join(".", "x"), "x");
        assert_eq!(join("a/b", "."), "a/b");
        assert_eq!(join("a", "b/c"), "a/b/c");
        assert_eq!(join("", "x"), "x");
    }

    #[test]
    fn rel_under_prefix() {
        assert_eq!(rel("a/b", "a/b/c").as_deref(), Some("c"));
        assert_eq!(rel("a/b", "a/b").as_deref(), Some("."));
        assert_eq!(rel("a/b", "a/bc"), None);
        assert_eq!(rel(".", "x/y").as_deref(), Some("x/y"));
    }
}
