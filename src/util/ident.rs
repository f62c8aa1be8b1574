use std::fmt;

/// A qualified identifier: the names leading from the module root to a declaration
///
/// A path is never empty. It has two flattenings: the dotted form used for display, and the
/// underscore-joined (mangled) form used as the key for linker-visible symbols.
///
/// Mangling is not injective: `a.b_c` and `a_b.c` both mangle to `a_b_c`. Keeping the names of
/// one linked program apart is left to the surrounding toolchain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentPath(Vec<String>);

impl IdentPath {
    /// Build a path from its segments, returning `None` for an empty sequence
    pub fn new<I, S>(segments: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        (!segments.is_empty()).then_some(Self(segments))
    }

    /// A path with exactly one segment
    pub fn single(name: impl Into<String>) -> Self {
        Self(vec![name.into()])
    }

    /// Parse the dotted form, e.g. `std.io.puts`
    pub fn from_dotted(dotted: &str) -> Option<Self> {
        Self::new(dotted.split('.').filter(|s| !s.is_empty()))
    }

    /// The path of `name` declared inside the module `self`
    pub fn child(&self, name: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(name.into());
        Self(segments)
    }

    /// The declaration's own name, i.e. the last segment
    pub fn name(&self) -> &str {
        // paths are never empty
        self.0.last().map(String::as_str).unwrap_or_default()
    }

    /// Everything but the last segment
    pub fn parent(&self) -> Option<Self> {
        Self::new(self.0[..self.0.len() - 1].iter().cloned())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// The dotted flattening, used for display
    pub fn dotted(&self) -> String {
        self.0.join(".")
    }

    /// The underscore-joined flattening, used for linkage
    pub fn mangled(&self) -> String {
        self.0.join("_")
    }
}

impl fmt::Display for IdentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dotted())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(dotted: &str) -> IdentPath {
        IdentPath::from_dotted(dotted).unwrap()
    }

    #[test]
    fn empty_paths_are_rejected() {
        assert_eq!(IdentPath::new(Vec::<String>::new()), None);
        assert_eq!(IdentPath::from_dotted(""), None);
    }

    #[test]
    fn flattenings() {
        let p = path("std.io.puts");
        assert_eq!(p.dotted(), "std.io.puts");
        assert_eq!(p.mangled(), "std_io_puts");
        assert_eq!(p.to_string(), "std.io.puts");
        assert_eq!(p.name(), "puts");
        assert_eq!(p.parent(), Some(path("std.io")));
        assert_eq!(IdentPath::single("main").parent(), None);
    }

    #[test]
    fn child_extends_module() {
        assert_eq!(path("app").child("main"), path("app.main"));
    }

    #[test]
    fn mangling_collision_is_possible() {
        let left = path("a.b_c");
        let right = path("a_b.c");
        assert_ne!(left, right);
        assert_ne!(left.dotted(), right.dotted());
        assert_eq!(left.mangled(), right.mangled());
    }

    #[test]
    fn distinct_paths_without_underscores_mangle_apart() {
        let paths = [path("a.b.c"), path("a.bc"), path("ab.c"), path("a.b")];
        for (i, a) in paths.iter().enumerate() {
            for b in &paths[i + 1..] {
                assert_ne!(a.mangled(), b.mangled(), "{a} vs {b}");
            }
        }
    }
}
