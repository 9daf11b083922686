//! Resolution of import/include references to project files.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::languages::{IMPL_EXTENSIONS, is_header};

/// One import or include, as candidate relative paths tried in order.
///
/// Python `import a.b` yields `["a/b.py", "a/b/__init__.py"]`; a C include
/// yields the included path verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyRef {
    pub candidates: Vec<String>,
}

impl DependencyRef {
    #[must_use]
    pub fn single(path: impl Into<String>) -> Self {
        Self {
            candidates: vec![path.into()],
        }
    }

    #[must_use]
    pub fn any_of(candidates: Vec<String>) -> Self {
        Self { candidates }
    }
}

/// Snapshot of the project's files, used for dependency resolution.
///
/// Paths are project-relative with `/` separators.
#[derive(Debug, Clone, Default)]
pub struct ProjectFiles {
    paths: BTreeSet<String>,
    /// Basename to the lexicographically smallest path carrying it.
    by_name: BTreeMap<String, String>,
}

/// Package markers are too common to be matched by basename alone.
const NO_BASENAME_FALLBACK: &[&str] = &["__init__.py"];

impl ProjectFiles {
    pub fn from_paths<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut files = Self::default();
        for path in paths {
            files.insert(path.into());
        }
        files
    }

    /// Walk `root` and collect every file, honoring `.gitignore`.
    #[must_use]
    pub fn scan(root: &Path) -> Self {
        let walker = ignore::WalkBuilder::new(root)
            .hidden(true)
            .git_ignore(true)
            .build();

        let mut files = Self::default();
        for entry in walker.flatten() {
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }
            if let Some(rel) = relative_path(root, entry.path()) {
                files.insert(rel);
            }
        }
        files
    }

    pub fn insert(&mut self, path: String) {
        if let Some(name) = basename(&path) {
            match self.by_name.get(name) {
                Some(existing) if existing.as_str() <= path.as_str() => {}
                _ => {
                    self.by_name.insert(name.to_string(), path.clone());
                }
            }
        }
        self.paths.insert(path);
    }

    pub fn remove(&mut self, path: &str) {
        if !self.paths.remove(path) {
            return;
        }
        let Some(name) = basename(path) else {
            return;
        };
        if self.by_name.get(name).is_some_and(|p| p == path) {
            self.by_name.remove(name);
            if let Some(next) = self.paths.iter().find(|p| basename(p) == Some(name)) {
                self.by_name.insert(name.to_string(), next.clone());
            }
        }
    }

    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.paths.contains(path)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.paths.iter()
    }

    /// Resolve one reference made from `current_file`.
    ///
    /// Each candidate is tried relative to the current file's directory, then
    /// relative to the project root, then by basename anywhere in the tree.
    #[must_use]
    pub fn resolve(&self, current_file: &str, dep: &DependencyRef) -> Option<String> {
        let dir = parent_dir(current_file);

        let relative = dep
            .candidates
            .iter()
            .filter_map(|c| normalize(&join(dir, c)))
            .find(|p| self.paths.contains(p));
        if relative.is_some() {
            return relative;
        }

        let rooted = dep
            .candidates
            .iter()
            .filter_map(|c| normalize(c))
            .find(|p| self.paths.contains(p));
        if rooted.is_some() {
            return rooted;
        }

        dep.candidates
            .iter()
            .filter_map(|c| basename(c))
            .filter(|name| !NO_BASENAME_FALLBACK.contains(name))
            .find_map(|name| self.by_name.get(name).cloned())
    }

    /// Resolve every reference, dropping unresolvable ones and the file
    /// itself. With `pair_headers`, a resolved header also pulls in its
    /// implementation file when one exists.
    #[must_use]
    pub fn resolve_all(
        &self,
        current_file: &str,
        deps: &[DependencyRef],
        pair_headers: bool,
    ) -> BTreeSet<String> {
        let mut resolved = BTreeSet::new();
        for dep in deps {
            let Some(path) = self.resolve(current_file, dep) else {
                tracing::debug!(
                    file = current_file,
                    reference = ?dep.candidates,
                    "unresolved dependency dropped"
                );
                continue;
            };
            if pair_headers
                && is_header(Path::new(&path))
                && let Some(imp) = self.implementation_for(&path)
            {
                resolved.insert(imp);
            }
            resolved.insert(path);
        }
        resolved.remove(current_file);
        resolved
    }

    /// Implementation file paired with `header`: same stem in the same
    /// directory first, then the same file name anywhere in the project.
    #[must_use]
    pub fn implementation_for(&self, header: &str) -> Option<String> {
        let stem_path = header.rsplit_once('.').map_or(header, |(stem, _)| stem);
        let stem_name = basename(stem_path).unwrap_or(stem_path);

        IMPL_EXTENSIONS
            .iter()
            .map(|ext| format!("{stem_path}.{ext}"))
            .find(|p| self.paths.contains(p))
            .or_else(|| {
                IMPL_EXTENSIONS
                    .iter()
                    .find_map(|ext| self.by_name.get(&format!("{stem_name}.{ext}")).cloned())
            })
    }
}

pub(crate) fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<&str> = rel
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<_>>()?;
    (!parts.is_empty()).then(|| parts.join("/"))
}

fn basename(path: &str) -> Option<&str> {
    path.rsplit('/').next().filter(|s| !s.is_empty())
}

fn parent_dir(path: &str) -> &str {
    path.rsplit_once('/').map_or("", |(dir, _)| dir)
}

fn join(dir: &str, rel: &str) -> String {
    if dir.is_empty() {
        rel.to_string()
    } else {
        format!("{dir}/{rel}")
    }
}

/// Collapse `.` and `..` segments. Returns `None` when the path escapes the
/// project root.
fn normalize(path: &str) -> Option<String> {
    let mut parts: Vec<&str> = Vec::new();
    for seg in path.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            s => parts.push(s),
        }
    }
    (!parts.is_empty()).then(|| parts.join("/"))
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn files() -> ProjectFiles {
        ProjectFiles::from_paths([
            "main.cpp",
            "include/foo.h",
            "src/foo.cpp",
            "pkg/__init__.py",
            "pkg/util.py",
            "pkg/sub/deep.py",
            "other/util.py",
            "a.py",
        ])
    }

    #[test]
    fn resolves_relative_to_current_dir() {
        let f = files();
        let dep = DependencyRef::single("util.py");
        assert_eq!(f.resolve("pkg/sub/deep.py", &DependencyRef::single("../util.py")).as_deref(), Some("pkg/util.py"));
        assert_eq!(f.resolve("other/x.py", &dep).as_deref(), Some("other/util.py"));
    }

    #[test]
    fn resolves_root_relative() {
        let f = files();
        let dep = DependencyRef::any_of(vec!["pkg/sub/deep.py".into()]);
        assert_eq!(f.resolve("pkg/util.py", &dep).as_deref(), Some("pkg/sub/deep.py"));
    }

    #[test]
    fn basename_fallback_picks_smallest_path() {
        let f = files();
        let dep = DependencyRef::single("lib/util.py");
        assert_eq!(f.resolve("a.py", &dep).as_deref(), Some("other/util.py"));
    }

    #[test]
    fn package_marker_has_no_basename_fallback() {
        let f = files();
        let dep = DependencyRef::single("missing/__init__.py");
        assert_eq!(f.resolve("a.py", &dep), None);
    }

    #[test]
    fn candidates_tried_in_order() {
        let f = files();
        let dep = DependencyRef::any_of(vec!["pkg.py".into(), "pkg/__init__.py".into()]);
        assert_eq!(f.resolve("a.py", &dep).as_deref(), Some("pkg/__init__.py"));
    }

    #[test]
    fn unresolved_is_dropped() {
        let f = files();
        let deps = [DependencyRef::single("stdio.h"), DependencyRef::single("foo.h")];
        let got = f.resolve_all("main.cpp", &deps, false);
        assert_eq!(got, BTreeSet::from(["include/foo.h".to_string()]));
    }

    #[test]
    fn header_pairs_with_implementation() {
        let f = files();
        let got = f.resolve_all("main.cpp", &[DependencyRef::single("foo.h")], true);
        assert_eq!(
            got,
            BTreeSet::from(["include/foo.h".to_string(), "src/foo.cpp".to_string()])
        );
    }

    #[test]
    fn self_dependency_excluded() {
        let f = files();
        let got = f.resolve_all("src/foo.cpp", &[DependencyRef::single("foo.h")], true);
        assert_eq!(got, BTreeSet::from(["include/foo.h".to_string()]));
    }

    #[test]
    fn escaping_root_does_not_resolve_relatively() {
        assert_eq!(normalize("../x.py"), None);
        assert_eq!(normalize("a/./b/../c.py").as_deref(), Some("a/c.py"));
    }

    #[test]
    fn remove_updates_basename_index() {
        let mut f = files();
        f.remove("other/util.py");
        assert!(!f.contains("other/util.py"));
        let dep = DependencyRef::single("lib/util.py");
        assert_eq!(f.resolve("a.py", &dep).as_deref(), Some("pkg/util.py"));
    }

    #[test]
    fn scan_walks_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/a.py"), "x = 1\n").unwrap();
        std::fs::write(dir.path().join("b.c"), "int x;\n").unwrap();

        let f = ProjectFiles::scan(dir.path());
        assert!(f.contains("src/a.py"));
        assert!(f.contains("b.c"));
        assert_eq!(f.len(), 2);
    }

    proptest! {
        #[test]
        fn resolution_is_deterministic(
            names in proptest::collection::vec("[a-c]{1,2}/[a-c]{1,2}\\.py", 1..12),
            target in "[a-c]{1,2}\\.py",
        ) {
            let forward = ProjectFiles::from_paths(names.clone());
            let backward = ProjectFiles::from_paths(names.into_iter().rev());
            let dep = DependencyRef::single(format!("zz/{target}"));
            prop_assert_eq!(forward.resolve("x.py", &dep), backward.resolve("x.py", &dep));
        }
    }
}
