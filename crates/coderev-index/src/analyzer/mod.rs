//! Per-language structural extraction.
//!
//! Each supported language implements [`LanguageAnalyzer`]; the
//! [`AnalyzerRegistry`] maps a detected [`Lang`] to its implementation.
//! Analyzers are best-effort extractors over tree-sitter syntax trees, not
//! compiler front ends.

pub mod cpp;
pub mod python;
pub mod resolve;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tree_sitter::{Node, Parser, Tree};

use crate::error::{IndexError, Result};
use crate::languages::Lang;

pub use resolve::{DependencyRef, ProjectFiles};

/// Nesting limit for element extraction. Scopes deeper than this are ignored.
pub const MAX_SCOPE_DEPTH: usize = 5;

/// Kind of an extracted code element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Function,
    Class,
    Variable,
    Enum,
    Struct,
    Constant,
    Macro,
}

impl ElementKind {
    pub const ALL: [ElementKind; 7] = [
        ElementKind::Function,
        ElementKind::Class,
        ElementKind::Variable,
        ElementKind::Enum,
        ElementKind::Struct,
        ElementKind::Constant,
        ElementKind::Macro,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Class => "class",
            Self::Variable => "variable",
            Self::Enum => "enum",
            Self::Struct => "struct",
            Self::Constant => "constant",
            Self::Macro => "macro",
        }
    }

    /// Variables and constants are never embedded: they are numerous and rarely
    /// useful as retrieval hits.
    #[must_use]
    pub fn is_vectorized(self) -> bool {
        !matches!(self, Self::Variable | Self::Constant)
    }
}

impl std::fmt::Display for ElementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One structural unit extracted from a source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeElement {
    pub kind: ElementKind,
    pub name: String,
    pub content: String,
    /// Project-relative path of the owning file.
    pub file: String,
    /// 1-based line of the element start.
    pub line: usize,
    /// 0-based column of the element start.
    pub column: usize,
}

impl CodeElement {
    pub(crate) fn from_node(
        kind: ElementKind,
        name: impl Into<String>,
        node: &Node<'_>,
        source: &str,
        file: &str,
    ) -> Self {
        let pos = node.start_position();
        Self {
            kind,
            name: name.into(),
            content: node_text(node, source).to_string(),
            file: file.to_string(),
            line: pos.row + 1,
            column: pos.column,
        }
    }
}

/// Candidate names pulled out of a diff hunk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchNames {
    pub functions: BTreeSet<String>,
    pub variables: BTreeSet<String>,
}

impl PatchNames {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty() && self.variables.is_empty()
    }

    /// Union of function and variable names.
    #[must_use]
    pub fn all(&self) -> BTreeSet<String> {
        self.functions.union(&self.variables).cloned().collect()
    }
}

/// Structural extractor for one language.
pub trait LanguageAnalyzer: Send + Sync {
    fn lang(&self) -> Lang;

    /// Extract elements at the top level and in nested scopes up to
    /// [`MAX_SCOPE_DEPTH`].
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Parse`] when the source cannot be parsed; callers
    /// skip the file.
    fn extract_elements(&self, file: &str, source: &str) -> Result<Vec<CodeElement>>;

    /// Raw import/include references, before resolution.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Parse`] when the source cannot be parsed.
    fn dependency_refs(&self, source: &str) -> Result<Vec<DependencyRef>>;

    /// Whether a resolved header should pull in its implementation file.
    fn pairs_headers(&self) -> bool {
        false
    }

    /// Project-relative paths this file depends on. Unresolvable references
    /// (system or third-party libraries) are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Parse`] when the source cannot be parsed.
    fn extract_dependencies(
        &self,
        file: &str,
        source: &str,
        files: &ProjectFiles,
    ) -> Result<BTreeSet<String>> {
        let refs = self.dependency_refs(source)?;
        Ok(files.resolve_all(file, &refs, self.pairs_headers()))
    }

    /// Heuristic name extraction from a diff hunk. Never fails: anything
    /// unparseable degrades to an empty set.
    fn extract_patch_names(&self, patch: &str) -> PatchNames;

    /// Source text of the definitions in `source` whose names are in `names`.
    fn extract_definitions(&self, source: &str, names: &BTreeSet<String>)
    -> BTreeMap<String, String>;
}

/// Dispatch table from language to analyzer.
#[derive(Clone)]
pub struct AnalyzerRegistry {
    analyzers: HashMap<Lang, Arc<dyn LanguageAnalyzer>>,
}

impl std::fmt::Debug for AnalyzerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut langs: Vec<_> = self.analyzers.keys().map(|l| l.id()).collect();
        langs.sort_unstable();
        f.debug_struct("AnalyzerRegistry")
            .field("languages", &langs)
            .finish()
    }
}

impl Default for AnalyzerRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        if Lang::Python.grammar().is_some() {
            registry.register(Arc::new(python::PythonAnalyzer));
        }
        for lang in [Lang::C, Lang::Cpp] {
            if lang.grammar().is_some() {
                registry.register(Arc::new(cpp::CFamilyAnalyzer::new(lang)));
            }
        }
        registry
    }
}

impl AnalyzerRegistry {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            analyzers: HashMap::new(),
        }
    }

    pub fn register(&mut self, analyzer: Arc<dyn LanguageAnalyzer>) {
        self.analyzers.insert(analyzer.lang(), analyzer);
    }

    #[must_use]
    pub fn get(&self, lang: Lang) -> Option<Arc<dyn LanguageAnalyzer>> {
        self.analyzers.get(&lang).cloned()
    }
}

pub(crate) fn node_text<'a>(node: &Node<'_>, source: &'a str) -> &'a str {
    source.get(node.byte_range()).unwrap_or_default()
}

pub(crate) fn named_children<'t>(node: &Node<'t>) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor).collect()
}

pub(crate) fn parse(source: &str, lang: Lang) -> Result<Tree> {
    let grammar = lang
        .grammar()
        .ok_or_else(|| IndexError::Parse(format!("no grammar for {}", lang.id())))?;

    let mut parser = Parser::new();
    parser
        .set_language(&grammar)
        .map_err(|e| IndexError::Parse(format!("set_language failed: {e}")))?;

    parser
        .parse(source, None)
        .ok_or_else(|| IndexError::Parse(format!("{} parser returned no tree", lang.id())))
}

/// Visit every node of the tree in document order.
pub(crate) fn walk_tree<'t>(root: Node<'t>, mut visit: impl FnMut(Node<'t>)) {
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        visit(node);
        let mut children = named_children(&node);
        children.reverse();
        stack.extend(children);
    }
}

/// Turn a unified-diff hunk back into plain source text.
///
/// Hunk headers and file headers are dropped; the leading `+`, `-` or space
/// marker is removed from each line. Text that does not look like a diff is
/// returned unchanged. The result is dedented so that hunks taken from inside
/// an indented block still parse.
#[must_use]
pub fn strip_diff_markers(patch: &str) -> String {
    let looks_like_diff = patch.lines().any(|l| l.starts_with("@@"))
        || patch
            .lines()
            .filter(|l| !l.is_empty())
            .all(|l| l.starts_with(['+', '-', ' ']));

    let body: Vec<&str> = if looks_like_diff {
        patch
            .lines()
            .filter(|l| {
                !(l.starts_with("@@")
                    || l.starts_with("+++")
                    || l.starts_with("---")
                    || l.starts_with("diff ")
                    || l.starts_with("index ")
                    || l.starts_with('\\'))
            })
            .map(|l| l.get(1..).unwrap_or_default())
            .collect()
    } else {
        patch.lines().collect()
    };

    dedent(&body)
}

fn dedent(lines: &[&str]) -> String {
    let indent = lines
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);

    let mut out = String::new();
    for line in lines {
        out.push_str(line.get(indent..).unwrap_or_else(|| line.trim_start()));
        out.push('\n');
    }
    out
}
