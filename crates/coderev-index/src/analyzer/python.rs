//! Python analyzer.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::Regex;
use tree_sitter::Node;

use super::{
    CodeElement, DependencyRef, ElementKind, LanguageAnalyzer, MAX_SCOPE_DEPTH, PatchNames,
    named_children, node_text, parse, strip_diff_markers, walk_tree,
};
use crate::error::{IndexError, Result};
use crate::languages::Lang;

/// Base classes that turn a class into an enum element.
const ENUM_BASES: &[&str] = &["Enum", "IntEnum", "StrEnum", "Flag", "IntFlag"];

/// Compound statements whose bodies belong to the enclosing scope.
const TRANSPARENT: &[&str] = &[
    "if_statement",
    "elif_clause",
    "else_clause",
    "try_statement",
    "except_clause",
    "finally_clause",
    "with_statement",
    "for_statement",
    "while_statement",
    "block",
];

static DEF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*(?:async\s+)?def\s+([A-Za-z_]\w*)").unwrap());
static ASSIGN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*([A-Za-z_]\w*)\s*(?::[^=\n]+)?(?:[+\-*/%|&^]|//|\*\*|<<|>>)?=[^=]").unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Module,
    Class,
    Function,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PythonAnalyzer;

impl PythonAnalyzer {
    fn collect(
        &self,
        node: &Node<'_>,
        source: &str,
        file: &str,
        depth: usize,
        scope: Scope,
        out: &mut Vec<CodeElement>,
    ) {
        for child in named_children(node) {
            match child.kind() {
                "function_definition" => {
                    if let Some(name) = field_text(&child, "name", source) {
                        out.push(CodeElement::from_node(
                            ElementKind::Function,
                            name,
                            &child,
                            source,
                            file,
                        ));
                    }
                    self.descend(&child, source, file, depth, Scope::Function, out);
                }
                "class_definition" => {
                    if let Some(name) = field_text(&child, "name", source) {
                        let kind = if derives_enum(&child, source) {
                            ElementKind::Enum
                        } else {
                            ElementKind::Class
                        };
                        out.push(CodeElement::from_node(kind, name, &child, source, file));
                    }
                    self.descend(&child, source, file, depth, Scope::Class, out);
                }
                "decorated_definition" => {
                    self.collect(&child, source, file, depth, scope, out);
                }
                "expression_statement" => {
                    for stmt in named_children(&child) {
                        if stmt.kind() == "assignment" {
                            for name in assigned_names(&stmt, source) {
                                let kind = if scope == Scope::Module && is_all_caps(name) {
                                    ElementKind::Constant
                                } else {
                                    ElementKind::Variable
                                };
                                out.push(CodeElement::from_node(kind, name, &child, source, file));
                            }
                        }
                    }
                }
                kind if TRANSPARENT.contains(&kind) => {
                    self.collect(&child, source, file, depth, scope, out);
                }
                _ => {}
            }
        }
    }

    fn descend(
        &self,
        def: &Node<'_>,
        source: &str,
        file: &str,
        depth: usize,
        scope: Scope,
        out: &mut Vec<CodeElement>,
    ) {
        if depth >= MAX_SCOPE_DEPTH {
            return;
        }
        if let Some(body) = def.child_by_field_name("body") {
            self.collect(&body, source, file, depth + 1, scope, out);
        }
    }
}

impl LanguageAnalyzer for PythonAnalyzer {
    fn lang(&self) -> Lang {
        Lang::Python
    }

    fn extract_elements(&self, file: &str, source: &str) -> Result<Vec<CodeElement>> {
        let tree = parse(source, Lang::Python)?;
        let root = tree.root_node();
        if root.has_error() {
            return Err(IndexError::Parse(format!("{file}: python syntax error")));
        }

        let mut out = Vec::new();
        self.collect(&root, source, file, 0, Scope::Module, &mut out);
        Ok(out)
    }

    fn dependency_refs(&self, source: &str) -> Result<Vec<DependencyRef>> {
        let tree = parse(source, Lang::Python)?;
        let root = tree.root_node();
        if root.has_error() {
            return Err(IndexError::Parse("python syntax error".into()));
        }

        let mut refs = Vec::new();
        walk_tree(root, |node| match node.kind() {
            "import_statement" => {
                let mut cursor = node.walk();
                for name in node.children_by_field_name("name", &mut cursor) {
                    if let Some(dotted) = imported_module(&name, source) {
                        refs.push(module_ref("", dotted));
                    }
                }
            }
            "import_from_statement" => refs.extend(from_import_refs(&node, source)),
            _ => {}
        });
        Ok(refs)
    }

    fn extract_patch_names(&self, patch: &str) -> PatchNames {
        let text = strip_diff_markers(patch);
        let mut names = PatchNames::default();

        let Ok(tree) = parse(&text, Lang::Python) else {
            return names;
        };
        let root = tree.root_node();
        walk_tree(root, |node| match node.kind() {
            "function_definition" => {
                if let Some(name) = field_text(&node, "name", &text) {
                    names.functions.insert(name.to_string());
                }
            }
            "assignment" | "augmented_assignment" => {
                for name in assigned_names(&node, &text) {
                    names.variables.insert(name.to_string());
                }
            }
            _ => {}
        });

        if root.has_error() {
            for cap in DEF_RE.captures_iter(&text) {
                names.functions.insert(cap[1].to_string());
            }
            for cap in ASSIGN_RE.captures_iter(&text) {
                if !is_keyword(&cap[1]) {
                    names.variables.insert(cap[1].to_string());
                }
            }
        }
        names
    }

    fn extract_definitions(
        &self,
        source: &str,
        names: &BTreeSet<String>,
    ) -> BTreeMap<String, String> {
        let mut defs = BTreeMap::new();
        if names.is_empty() {
            return defs;
        }
        let Ok(tree) = parse(source, Lang::Python) else {
            return defs;
        };

        walk_tree(tree.root_node(), |node| match node.kind() {
            "function_definition" => {
                if let Some(name) = field_text(&node, "name", source)
                    && names.contains(name)
                {
                    defs.entry(name.to_string())
                        .or_insert_with(|| node_text(&node, source).to_string());
                }
            }
            "expression_statement" => {
                for stmt in named_children(&node) {
                    if stmt.kind() != "assignment" {
                        continue;
                    }
                    for name in assigned_names(&stmt, source) {
                        if names.contains(name) {
                            defs.entry(name.to_string())
                                .or_insert_with(|| node_text(&node, source).to_string());
                        }
                    }
                }
            }
            _ => {}
        });
        defs
    }
}

fn field_text<'a>(node: &Node<'_>, field: &str, source: &'a str) -> Option<&'a str> {
    node.child_by_field_name(field)
        .map(|n| node_text(&n, source))
        .filter(|s| !s.is_empty())
}

fn derives_enum(class: &Node<'_>, source: &str) -> bool {
    let Some(bases) = class.child_by_field_name("superclasses") else {
        return false;
    };
    named_children(&bases).iter().any(|base| {
        let text = node_text(base, source);
        let last = text.rsplit('.').next().unwrap_or(text);
        ENUM_BASES.contains(&last)
    })
}

/// Plain identifiers bound by an assignment, including chained and tuple
/// targets. Attribute and subscript targets bind no new name.
fn assigned_names<'a>(assignment: &Node<'_>, source: &'a str) -> Vec<&'a str> {
    let mut names = Vec::new();
    let mut current = Some(*assignment);
    while let Some(node) = current {
        if let Some(left) = node.child_by_field_name("left") {
            match left.kind() {
                "identifier" => names.push(node_text(&left, source)),
                "pattern_list" | "tuple_pattern" | "list_pattern" => {
                    names.extend(
                        named_children(&left)
                            .iter()
                            .filter(|n| n.kind() == "identifier")
                            .map(|n| node_text(n, source)),
                    );
                }
                _ => {}
            }
        }
        current = node
            .child_by_field_name("right")
            .filter(|r| r.kind() == "assignment");
    }
    names
}

fn imported_module<'a>(name: &Node<'_>, source: &'a str) -> Option<&'a str> {
    match name.kind() {
        "dotted_name" => Some(node_text(name, source)),
        "aliased_import" => name
            .child_by_field_name("name")
            .map(|n| node_text(&n, source)),
        _ => None,
    }
}

/// `a.b` as `a/b.py` or the package `a/b/__init__.py`, under `prefix`.
fn module_ref(prefix: &str, dotted: &str) -> DependencyRef {
    let path = dotted.replace('.', "/");
    DependencyRef::any_of(vec![
        format!("{prefix}{path}.py"),
        format!("{prefix}{path}/__init__.py"),
    ])
}

fn from_import_refs(node: &Node<'_>, source: &str) -> Vec<DependencyRef> {
    let Some(module) = node.child_by_field_name("module_name") else {
        return Vec::new();
    };

    if module.kind() == "dotted_name" {
        return vec![module_ref("", node_text(&module, source))];
    }

    // Relative import: one dot is the current package, each extra dot a parent.
    let mut level = 0;
    let mut dotted = None;
    for part in named_children(&module) {
        match part.kind() {
            "import_prefix" => level = node_text(&part, source).chars().filter(|c| *c == '.').count(),
            "dotted_name" => dotted = Some(node_text(&part, source)),
            _ => {}
        }
    }
    let prefix = "../".repeat(level.saturating_sub(1));

    if let Some(dotted) = dotted {
        return vec![module_ref(&prefix, dotted)];
    }

    // `from . import x, y`: the names are sibling modules.
    let mut cursor = node.walk();
    node.children_by_field_name("name", &mut cursor)
        .filter_map(|name| imported_module(&name, source))
        .map(|m| module_ref(&prefix, m))
        .collect()
}

fn is_all_caps(name: &str) -> bool {
    name.chars().any(|c| c.is_ascii_uppercase())
        && name
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

fn is_keyword(word: &str) -> bool {
    matches!(
        word,
        "if" | "elif" | "else" | "while" | "for" | "return" | "assert" | "lambda" | "yield"
    )
}

#[cfg(all(test, feature = "lang-python"))]
mod tests {
    use super::*;
    use crate::analyzer::ProjectFiles;

    const SAMPLE: &str = r#"
import os
from enum import Enum

MAX_RETRIES = 3
default_name = "x"

class Color(Enum):
    RED = 1

class Service:
    timeout = 5

    def run(self):
        local = 1
        def helper():
            return local
        return helper()

@decorator
def decorated():
    pass

if True:
    def conditional():
        pass
"#;

    fn find<'a>(elements: &'a [CodeElement], name: &str) -> &'a CodeElement {
        elements
            .iter()
            .find(|e| e.name == name)
            .unwrap_or_else(|| panic!("{name} not extracted"))
    }

    #[test]
    fn extracts_elements_with_kinds() {
        let elements = PythonAnalyzer.extract_elements("m.py", SAMPLE).unwrap();
        assert_eq!(find(&elements, "MAX_RETRIES").kind, ElementKind::Constant);
        assert_eq!(find(&elements, "default_name").kind, ElementKind::Variable);
        assert_eq!(find(&elements, "Color").kind, ElementKind::Enum);
        assert_eq!(find(&elements, "Service").kind, ElementKind::Class);
        assert_eq!(find(&elements, "timeout").kind, ElementKind::Variable);
        assert_eq!(find(&elements, "run").kind, ElementKind::Function);
        assert_eq!(find(&elements, "helper").kind, ElementKind::Function);
        assert_eq!(find(&elements, "decorated").kind, ElementKind::Function);
        assert_eq!(find(&elements, "conditional").kind, ElementKind::Function);
    }

    #[test]
    fn element_positions_and_content() {
        let elements = PythonAnalyzer.extract_elements("m.py", SAMPLE).unwrap();
        let run = find(&elements, "run");
        assert_eq!(run.file, "m.py");
        assert_eq!(run.column, 4);
        assert!(run.content.starts_with("def run(self):"));
        assert!(run.content.contains("return helper()"));
        let constant = find(&elements, "MAX_RETRIES");
        assert_eq!(constant.line, 5);
        assert_eq!(constant.content, "MAX_RETRIES = 3");
    }

    #[test]
    fn depth_limit_stops_descent() {
        let mut src = String::new();
        for level in 0..8 {
            let indent = "    ".repeat(level);
            src.push_str(&format!("{indent}def f{level}():\n"));
        }
        src.push_str(&format!("{}pass\n", "    ".repeat(8)));

        let elements = PythonAnalyzer.extract_elements("deep.py", &src).unwrap();
        let names: Vec<_> = elements.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["f0", "f1", "f2", "f3", "f4", "f5"]);
    }

    #[test]
    fn syntax_error_is_reported() {
        let err = PythonAnalyzer.extract_elements("bad.py", "def broken(:\n").unwrap_err();
        assert!(matches!(err, IndexError::Parse(_)));
    }

    #[test]
    fn chained_and_tuple_assignments() {
        let elements = PythonAnalyzer
            .extract_elements("m.py", "A = B = 1\nx, y = 1, 2\nobj.attr = 3\n")
            .unwrap();
        let names: BTreeSet<_> = elements.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, BTreeSet::from(["A", "B", "x", "y"]));
    }

    #[test]
    fn dependencies_resolve_imports() {
        let files = ProjectFiles::from_paths([
            "a.py",
            "b.py",
            "pkg/__init__.py",
            "pkg/mod.py",
            "pkg/sub/leaf.py",
        ]);
        let src = "import os\nimport b\nfrom pkg import mod\nimport pkg.mod as m\n";
        let deps = PythonAnalyzer.extract_dependencies("a.py", src, &files).unwrap();
        assert_eq!(
            deps,
            BTreeSet::from([
                "b.py".to_string(),
                "pkg/__init__.py".to_string(),
                "pkg/mod.py".to_string(),
            ])
        );
    }

    #[test]
    fn relative_imports_resolve_from_package() {
        let files = ProjectFiles::from_paths(["pkg/mod.py", "pkg/sub/leaf.py", "pkg/sub/other.py"]);
        let src = "from . import other\nfrom ..mod import thing\n";
        let deps = PythonAnalyzer
            .extract_dependencies("pkg/sub/leaf.py", src, &files)
            .unwrap();
        assert_eq!(
            deps,
            BTreeSet::from(["pkg/mod.py".to_string(), "pkg/sub/other.py".to_string()])
        );
    }

    #[test]
    fn patch_names_from_hunk() {
        let patch = "@@ -3,4 +3,5 @@ class Service:\n     def run(self):\n-        count = 1\n+        count = 2\n+        total += count\n";
        let names = PythonAnalyzer.extract_patch_names(patch);
        assert!(names.functions.contains("run"));
        assert!(names.variables.contains("count"));
        assert!(names.variables.contains("total"));
    }

    #[test]
    fn patch_names_survive_broken_fragment() {
        let names = PythonAnalyzer.extract_patch_names("+def half(a, b:\n+    value = a\n");
        assert!(names.functions.contains("half"));
        assert!(names.variables.contains("value"));
    }

    #[test]
    fn patch_names_empty_for_garbage() {
        let names = PythonAnalyzer.extract_patch_names("%%% ???");
        assert!(names.is_empty());
    }

    #[test]
    fn definitions_for_requested_names() {
        let names = BTreeSet::from(["run".to_string(), "MAX_RETRIES".to_string(), "nope".to_string()]);
        let defs = PythonAnalyzer.extract_definitions(SAMPLE, &names);
        assert_eq!(defs.len(), 2);
        assert!(defs["run"].starts_with("def run(self):"));
        assert_eq!(defs["MAX_RETRIES"], "MAX_RETRIES = 3");
    }
}
