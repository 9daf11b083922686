//! C and C++ analyzer.
//!
//! Both languages share one implementation parameterized by grammar. Parse
//! errors are tolerated: headers routinely fail to parse in isolation, so
//! whatever the error-recovering tree yields is used. C sources that fail
//! the C grammar are retried with the C++ one, since `.h` headers are often
//! C++.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::Regex;
use tree_sitter::{Node, Tree};

use super::{
    CodeElement, DependencyRef, ElementKind, LanguageAnalyzer, MAX_SCOPE_DEPTH, PatchNames,
    named_children, node_text, parse, strip_diff_markers, walk_tree,
};
use crate::error::Result;
use crate::languages::Lang;

static INCLUDE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"#include\s*[<"]([^>"]+)[>"]"#).unwrap());
static FUNC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)\b([A-Za-z_]\w*)\s*\([^;{}()]*\)\s*(?:const\s*)?(?:noexcept\s*)?\{").unwrap()
});
static VAR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*(?:const\s+|static\s+)*[A-Za-z_][\w:<>]*[\s\*&]+([A-Za-z_]\w*)\s*=[^=]")
        .unwrap()
});

/// Containers whose children sit at the same scope level.
const TRANSPARENT: &[&str] = &[
    "template_declaration",
    "linkage_specification",
    "declaration_list",
    "preproc_ifdef",
    "preproc_if",
    "preproc_else",
    "preproc_elif",
];

const DECLARATOR_WRAPPERS: &[&str] = &[
    "pointer_declarator",
    "reference_declarator",
    "parenthesized_declarator",
    "attributed_declarator",
];

const CONTROL_KEYWORDS: &[&str] = &[
    "if", "for", "while", "switch", "return", "sizeof", "catch", "do", "else",
];

#[derive(Debug, Clone, Copy)]
pub struct CFamilyAnalyzer {
    lang: Lang,
}

impl CFamilyAnalyzer {
    #[must_use]
    pub fn new(lang: Lang) -> Self {
        Self { lang }
    }

    /// Parse with this analyzer's grammar, falling back to C++ for C
    /// sources that only parse cleanly as C++.
    fn parse_tree(&self, source: &str) -> Result<Tree> {
        let tree = parse(source, self.lang)?;
        if self.lang != Lang::C || !tree.root_node().has_error() {
            return Ok(tree);
        }
        match parse(source, Lang::Cpp) {
            Ok(cpp) if !cpp.root_node().has_error() => Ok(cpp),
            _ => Ok(tree),
        }
    }

    fn collect(
        &self,
        node: &Node<'_>,
        source: &str,
        file: &str,
        depth: usize,
        out: &mut Vec<CodeElement>,
    ) {
        for child in named_children(node) {
            match child.kind() {
                "function_definition" => {
                    if let Some(name) = function_name(&child, source) {
                        out.push(CodeElement::from_node(
                            ElementKind::Function,
                            name,
                            &child,
                            source,
                            file,
                        ));
                    }
                }
                "declaration" | "field_declaration" => {
                    self.type_with_body(&child, source, file, depth, None, out);
                    let mut cursor = child.walk();
                    for decl in child.children_by_field_name("declarator", &mut cursor) {
                        if let Some(func) = find_function_declarator(decl)
                            && let Some(name) = declarator_name(&func, source)
                        {
                            out.push(CodeElement::from_node(
                                ElementKind::Function,
                                name,
                                &child,
                                source,
                                file,
                            ));
                        }
                    }
                }
                "type_definition" => {
                    let alias = child
                        .child_by_field_name("declarator")
                        .map(|d| node_text(&d, source));
                    self.type_with_body(&child, source, file, depth, alias, out);
                }
                "class_specifier" | "struct_specifier" | "union_specifier" | "enum_specifier" => {
                    self.specifier(&child, &child, source, file, depth, None, out);
                }
                "preproc_def" | "preproc_function_def" => {
                    if let Some(name) = child.child_by_field_name("name") {
                        let mut element = CodeElement::from_node(
                            ElementKind::Macro,
                            node_text(&name, source),
                            &child,
                            source,
                            file,
                        );
                        element.content.truncate(element.content.trim_end().len());
                        out.push(element);
                    }
                }
                "namespace_definition" => {
                    if depth < MAX_SCOPE_DEPTH
                        && let Some(body) = child.child_by_field_name("body")
                    {
                        self.collect(&body, source, file, depth + 1, out);
                    }
                }
                kind if TRANSPARENT.contains(&kind) => {
                    self.collect(&child, source, file, depth, out);
                }
                _ => {}
            }
        }
    }

    /// A class/struct/union/enum specifier used as the `type` of a
    /// declaration. The element spans the whole declaration.
    fn type_with_body(
        &self,
        decl: &Node<'_>,
        source: &str,
        file: &str,
        depth: usize,
        alias: Option<&str>,
        out: &mut Vec<CodeElement>,
    ) {
        if let Some(ty) = decl.child_by_field_name("type")
            && matches!(
                ty.kind(),
                "class_specifier" | "struct_specifier" | "union_specifier" | "enum_specifier"
            )
        {
            self.specifier(&ty, decl, source, file, depth, alias, out);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn specifier(
        &self,
        spec: &Node<'_>,
        span: &Node<'_>,
        source: &str,
        file: &str,
        depth: usize,
        alias: Option<&str>,
        out: &mut Vec<CodeElement>,
    ) {
        let Some(body) = spec.child_by_field_name("body") else {
            return;
        };
        let name = spec
            .child_by_field_name("name")
            .map(|n| node_text(&n, source))
            .or(alias)
            .filter(|n| !n.is_empty());
        let Some(name) = name else {
            return;
        };

        let kind = match spec.kind() {
            "class_specifier" => ElementKind::Class,
            "enum_specifier" => ElementKind::Enum,
            _ => ElementKind::Struct,
        };
        out.push(CodeElement::from_node(kind, name, span, source, file));

        if kind != ElementKind::Enum && depth < MAX_SCOPE_DEPTH {
            self.collect(&body, source, file, depth + 1, out);
        }
    }
}

impl LanguageAnalyzer for CFamilyAnalyzer {
    fn lang(&self) -> Lang {
        self.lang
    }

    fn extract_elements(&self, file: &str, source: &str) -> Result<Vec<CodeElement>> {
        let tree = parse(source, self.lang)?;
        let root = tree.root_node();
        let mut out = Vec::new();
        self.collect(&root, source, file, 0, &mut out);
        if !root.has_error() && !out.is_empty() {
            return Ok(out);
        }

        if self.lang == Lang::C
            && let Ok(cpp) = parse(source, Lang::Cpp)
        {
            let mut cpp_out = Vec::new();
            self.collect(&cpp.root_node(), source, file, 0, &mut cpp_out);
            let cleaner = root.has_error() && !cpp.root_node().has_error();
            if cpp_out.len() > out.len() || (cleaner && !cpp_out.is_empty()) {
                tracing::debug!(file, "using C++ grammar for C source");
                return Ok(cpp_out);
            }
        }
        if root.has_error() {
            tracing::debug!(file, "syntax errors in C/C++ source, using partial tree");
        }
        Ok(out)
    }

    fn dependency_refs(&self, source: &str) -> Result<Vec<DependencyRef>> {
        Ok(INCLUDE_RE
            .captures_iter(source)
            .map(|cap| DependencyRef::single(cap[1].trim()))
            .collect())
    }

    fn pairs_headers(&self) -> bool {
        true
    }

    fn extract_patch_names(&self, patch: &str) -> PatchNames {
        let text = strip_diff_markers(patch);
        let mut names = PatchNames::default();

        if let Ok(tree) = self.parse_tree(&text) {
            walk_tree(tree.root_node(), |node| match node.kind() {
                "function_definition" => {
                    if let Some(name) = function_name(&node, &text) {
                        names.functions.insert(name.to_string());
                    }
                }
                "init_declarator" => {
                    if let Some(name) = node
                        .child_by_field_name("declarator")
                        .and_then(|d| declarator_name(&d, &text))
                    {
                        names.variables.insert(name.to_string());
                    }
                }
                _ => {}
            });
        }

        for cap in FUNC_RE.captures_iter(&text) {
            if !CONTROL_KEYWORDS.contains(&&cap[1]) {
                names.functions.insert(cap[1].to_string());
            }
        }
        for cap in VAR_RE.captures_iter(&text) {
            if !CONTROL_KEYWORDS.contains(&&cap[1]) {
                names.variables.insert(cap[1].to_string());
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
        let Ok(tree) = self.parse_tree(source) else {
            return defs;
        };

        walk_tree(tree.root_node(), |node| match node.kind() {
            "function_definition" => {
                if let Some(name) = function_name(&node, source)
                    && names.contains(name)
                {
                    defs.entry(name.to_string())
                        .or_insert_with(|| node_text(&node, source).to_string());
                }
            }
            "declaration" => {
                let mut cursor = node.walk();
                for decl in node.children_by_field_name("declarator", &mut cursor) {
                    if decl.kind() != "init_declarator" {
                        continue;
                    }
                    if let Some(name) = decl
                        .child_by_field_name("declarator")
                        .and_then(|d| declarator_name(&d, source))
                        && names.contains(name)
                    {
                        defs.entry(name.to_string())
                            .or_insert_with(|| node_text(&node, source).to_string());
                    }
                }
            }
            _ => {}
        });
        defs
    }
}

fn function_name<'a>(def: &Node<'_>, source: &'a str) -> Option<&'a str> {
    let decl = def.child_by_field_name("declarator")?;
    let func = find_function_declarator(decl)?;
    declarator_name(&func, source)
}

/// Unwrap pointer/reference wrappers down to a `function_declarator`.
fn find_function_declarator(mut node: Node<'_>) -> Option<Node<'_>> {
    loop {
        match node.kind() {
            "function_declarator" => return Some(node),
            kind if DECLARATOR_WRAPPERS.contains(&kind) => {
                node = node
                    .child_by_field_name("declarator")
                    .or_else(|| named_children(&node).pop())?;
            }
            _ => return None,
        }
    }
}

/// Unqualified name of a declarator: `ns::Foo::bar` yields `bar`.
fn declarator_name<'a>(node: &Node<'_>, source: &'a str) -> Option<&'a str> {
    let mut current = *node;
    loop {
        match current.kind() {
            "function_declarator" | "array_declarator" | "init_declarator" => {
                current = current.child_by_field_name("declarator")?;
            }
            kind if DECLARATOR_WRAPPERS.contains(&kind) => {
                current = current
                    .child_by_field_name("declarator")
                    .or_else(|| named_children(&current).pop())?;
            }
            "qualified_identifier" => {
                current = current.child_by_field_name("name")?;
            }
            "identifier" | "field_identifier" | "destructor_name" | "operator_name"
            | "type_identifier" => {
                let text = node_text(&current, source);
                return (!text.is_empty()).then_some(text);
            }
            "template_function" => {
                current = current.child_by_field_name("name")?;
            }
            _ => return None,
        }
    }
}

#[cfg(all(test, feature = "lang-c"))]
mod tests {
    use super::*;
    use crate::analyzer::ProjectFiles;

    fn kinds(elements: &[CodeElement]) -> BTreeMap<&str, ElementKind> {
        elements.iter().map(|e| (e.name.as_str(), e.kind)).collect()
    }

    #[test]
    fn c_elements() {
        let src = r"#ifndef UTIL_H
#define UTIL_H
#define SQUARE(x) ((x) * (x))

struct point { int x; int y; };
typedef struct { int r; } color_t;
union value { int i; float f; };
enum mode { MODE_A, MODE_B };

int add(int a, int b);
static int *lookup(const char *key) { return 0; }
#endif
";
        let elements = CFamilyAnalyzer::new(Lang::C)
            .extract_elements("util.h", src)
            .unwrap();
        let k = kinds(&elements);
        assert_eq!(k["UTIL_H"], ElementKind::Macro);
        assert_eq!(k["SQUARE"], ElementKind::Macro);
        assert_eq!(k["point"], ElementKind::Struct);
        assert_eq!(k["color_t"], ElementKind::Struct);
        assert_eq!(k["value"], ElementKind::Struct);
        assert_eq!(k["mode"], ElementKind::Enum);
        assert_eq!(k["add"], ElementKind::Function);
        assert_eq!(k["lookup"], ElementKind::Function);

        let square = elements.iter().find(|e| e.name == "SQUARE").unwrap();
        assert_eq!(square.content, "#define SQUARE(x) ((x) * (x))");
        assert_eq!(square.line, 3);
    }

    #[test]
    fn cpp_elements_in_namespaces_and_classes() {
        let src = r#"namespace app {
class Widget {
public:
    void draw() const;
    int size() { return 0; }
};

template <typename T>
T identity(T v) { return v; }
}

void app::Widget::draw() const {}
extern "C" { int c_entry(void); }
"#;
        let elements = CFamilyAnalyzer::new(Lang::Cpp)
            .extract_elements("widget.cpp", src)
            .unwrap();
        let k = kinds(&elements);
        assert_eq!(k["Widget"], ElementKind::Class);
        assert_eq!(k["draw"], ElementKind::Function);
        assert_eq!(k["size"], ElementKind::Function);
        assert_eq!(k["identity"], ElementKind::Function);
        assert_eq!(k["c_entry"], ElementKind::Function);
    }

    #[test]
    fn cpp_header_with_h_extension() {
        let src = "namespace media {\nclass RtpSession {\npublic:\n    void onRecv(const char *data, int len);\n    int ssrc;\n};\n}\n";
        let registry = crate::analyzer::AnalyzerRegistry::default();
        let lang = crate::languages::detect_language(std::path::Path::new("src/Rtp/RtpSession.h"));
        assert_eq!(lang, Some(Lang::C));
        let analyzer = registry.get(lang.unwrap()).unwrap();
        let elements = analyzer.extract_elements("src/Rtp/RtpSession.h", src).unwrap();
        let k = kinds(&elements);
        assert_eq!(k["RtpSession"], ElementKind::Class);
        assert_eq!(k["onRecv"], ElementKind::Function);
    }

    #[test]
    fn c_header_keeps_c_grammar() {
        let src = "struct node { int restrict_count; };\nint walk(struct node *n);\n";
        let elements = CFamilyAnalyzer::new(Lang::C)
            .extract_elements("node.h", src)
            .unwrap();
        let k = kinds(&elements);
        assert_eq!(k["node"], ElementKind::Struct);
        assert_eq!(k["walk"], ElementKind::Function);
    }

    #[test]
    fn forward_declarations_are_skipped() {
        let elements = CFamilyAnalyzer::new(Lang::Cpp)
            .extract_elements("fwd.hpp", "class Later;\nstruct Thing;\n")
            .unwrap();
        assert!(elements.is_empty());
    }

    #[test]
    fn syntax_errors_do_not_fail() {
        let elements = CFamilyAnalyzer::new(Lang::C)
            .extract_elements("broken.c", "int ok(void) { return 1; }\nint broken( {\n")
            .unwrap();
        assert!(elements.iter().any(|e| e.name == "ok"));
    }

    #[test]
    fn includes_resolve_with_header_pairing() {
        let files = ProjectFiles::from_paths(["main.cpp", "foo.h", "foo.cpp", "bar.hpp"]);
        let src = "#include <vector>\n#include \"foo.h\"\n#include\"bar.hpp\"\n";
        let deps = CFamilyAnalyzer::new(Lang::Cpp)
            .extract_dependencies("main.cpp", src, &files)
            .unwrap();
        assert_eq!(
            deps,
            BTreeSet::from([
                "bar.hpp".to_string(),
                "foo.cpp".to_string(),
                "foo.h".to_string(),
            ])
        );
    }

    #[test]
    fn patch_names_from_hunk() {
        let patch = "@@ -1,3 +1,4 @@\n int compute(int a) {\n-    int total = a;\n+    int total = a * 2;\n+    return total;\n }\n";
        let names = CFamilyAnalyzer::new(Lang::C).extract_patch_names(patch);
        assert!(names.functions.contains("compute"));
        assert!(names.variables.contains("total"));
        assert!(!names.functions.contains("return"));
    }

    #[test]
    fn patch_names_from_partial_body() {
        let patch = "+    if (ready) {\n+        int count = next();\n";
        let names = CFamilyAnalyzer::new(Lang::C).extract_patch_names(patch);
        assert!(!names.functions.contains("if"));
        assert!(names.variables.contains("count"));
    }

    #[test]
    fn definitions_for_requested_names() {
        let src = "static int limit = 10;\nint compute(int a) {\n    return a + limit;\n}\n";
        let names = BTreeSet::from(["compute".to_string(), "limit".to_string()]);
        let defs = CFamilyAnalyzer::new(Lang::C).extract_definitions(src, &names);
        assert_eq!(defs["limit"], "static int limit = 10;");
        assert!(defs["compute"].starts_with("int compute(int a) {"));
    }
}
