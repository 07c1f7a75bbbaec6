//! Facts handed over by the fact-extraction collaborator.
//!
//! The engine never parses JavaScript. A [`FactExtractor`] reads a file and
//! reports what the engine needs to know about it:
//!
//! - kind signals (`goog.module(...)`, ES `import`/`export`, `module.exports`, ...)
//! - provide declarations with their statement ranges
//! - require declarations with the require expression, whether its result
//!   is used, and where a rewritten import should go
//! - compile-time constant declarations
//! - namespace reference sites
//!
//! # Ranges
//!
//! All ranges are byte offsets into the file text. Statement ranges are
//! terminator-exclusive: they end before the statement's trailing `;`.
//!
//! # Bundles
//!
//! [`FactsBundle`] is the serialized form an external extractor writes: a JSON
//! object mapping file paths to [`FileFacts`]. It implements [`FactExtractor`]
//! itself, which is how the CLI and most tests feed the engine.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::edit::Span;
use crate::record::ModuleKind;
use crate::tree::canonical_path;

// ============================================================================
// Fact types
// ============================================================================

/// A signal that the file is of a given module kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindSignal {
    pub kind: ModuleKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
}

/// A namespace declaration (`goog.provide`, `goog.module`, `goog.declareModuleId`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvideDecl {
    pub namespace: String,
    /// The declaring statement, terminator-exclusive.
    pub statement: Span,
    /// Local name holding the module's exported value, if the module
    /// declares one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binding: Option<String>,
}

/// How a dependency was declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequireForm {
    /// `goog.require`
    #[default]
    Require,
    /// `goog.requireType`: type-only, no runtime edge.
    RequireType,
    /// `goog.forwardDeclare`: deprecated type-only form.
    ForwardDeclare,
}

impl RequireForm {
    /// Type-only requires produce no import and no graph edge.
    pub fn is_type_only(self) -> bool {
        !matches!(self, RequireForm::Require)
    }

    pub fn is_deprecated(self) -> bool {
        matches!(self, RequireForm::ForwardDeclare)
    }
}

/// A dependency declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequireDecl {
    pub namespace: String,
    /// The enclosing statement, terminator-exclusive.
    pub statement: Span,
    /// The require call expression itself.
    pub expression: Span,
    /// Whether surrounding code consumes the call's result.
    #[serde(default)]
    pub used: bool,
    /// Where the rewritten import statement goes.
    pub insert_at: usize,
    #[serde(default)]
    pub form: RequireForm,
}

/// Value of a compile-time constant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum DefineValue {
    /// A JS literal, emitted verbatim (`true`, `42`, `"str"`).
    Literal(String),
    /// A raw expression that may reference other constants by name.
    Expression(String),
}

impl DefineValue {
    pub fn text(&self) -> &str {
        match self {
            DefineValue::Literal(s) | DefineValue::Expression(s) => s,
        }
    }
}

/// A compile-time constant declaration (`goog.define`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefineDecl {
    pub name: String,
    /// The `goog.define(...)` call expression.
    pub site: Span,
    pub value: DefineValue,
    /// True when the call stands alone with no assignment target.
    #[serde(default)]
    pub missing_target: bool,
}

/// A reference to a namespace in code (`a.b.c.run()` reports `a.b.c`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSite {
    pub namespace: String,
    /// Range of the dotted reference.
    pub span: Span,
    /// The reference is an assignment target.
    #[serde(default)]
    pub write: bool,
}

/// Everything the extractor reports for one file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFacts {
    #[serde(default)]
    pub kinds: Vec<KindSignal>,
    #[serde(default)]
    pub provides: Vec<ProvideDecl>,
    #[serde(default)]
    pub requires: Vec<RequireDecl>,
    #[serde(default)]
    pub defines: Vec<DefineDecl>,
    #[serde(default)]
    pub usages: Vec<UsageSite>,
    /// `goog.module.declareLegacyNamespace()` statement, terminator-exclusive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legacy_namespace: Option<Span>,
    /// Source language level (`es3`, `es6`, ...), carried into dependency
    /// records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

// ============================================================================
// Extractor seam
// ============================================================================

/// Errors reported by a fact extractor.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The extractor has nothing for this file.
    #[error("no facts available for {}", path.display())]
    NoFacts { path: PathBuf },

    /// The file could not be parsed.
    #[error("failed to parse {}: {message}", path.display())]
    Syntax { path: PathBuf, message: String },
}

/// Produces facts for one file.
pub trait FactExtractor {
    fn extract(&self, path: &Path, source: &str) -> Result<FileFacts, ExtractError>;
}

impl<F> FactExtractor for F
where
    F: Fn(&Path, &str) -> Result<FileFacts, ExtractError>,
{
    fn extract(&self, path: &Path, source: &str) -> Result<FileFacts, ExtractError> {
        self(path, source)
    }
}

// ============================================================================
// Bundles
// ============================================================================

/// Errors loading a facts bundle.
#[derive(Debug, Error)]
pub enum BundleError {
    #[error("failed to read facts bundle {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed facts bundle: {0}")]
    Json(#[from] serde_json::Error),
}

/// Pre-extracted facts keyed by file path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FactsBundle {
    files: BTreeMap<PathBuf, FileFacts>,
}

impl FactsBundle {
    pub fn new() -> Self {
        FactsBundle::default()
    }

    /// Parse a bundle; relative keys are resolved against `root` and every
    /// key is canonicalized the way the tree canonicalizes paths.
    pub fn from_json(json: &str, root: &Path) -> Result<Self, BundleError> {
        let raw: BTreeMap<PathBuf, FileFacts> = serde_json::from_str(json)?;
        let files = raw
            .into_iter()
            .map(|(path, facts)| {
                let path = if path.is_relative() {
                    root.join(path)
                } else {
                    path
                };
                (canonical_path(&path), facts)
            })
            .collect();
        Ok(FactsBundle { files })
    }

    /// Read and parse a bundle file; relative keys resolve against `root`.
    pub fn load(path: &Path, root: &Path) -> Result<Self, BundleError> {
        let json = fs::read_to_string(path).map_err(|source| BundleError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json, root)
    }

    pub fn insert(&mut self, path: impl Into<PathBuf>, facts: FileFacts) {
        self.files.insert(path.into(), facts);
    }

    pub fn get(&self, path: &Path) -> Option<&FileFacts> {
        self.files.get(path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.files.keys().map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FactExtractor for FactsBundle {
    fn extract(&self, path: &Path, _source: &str) -> Result<FileFacts, ExtractError> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| ExtractError::NoFacts {
                path: path.to_path_buf(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundle_resolves_relative_keys() {
        let json = r#"{
            "src/a.js": {
                "kinds": [{"kind": "provide"}],
                "provides": [{"namespace": "a", "statement": {"start": 0, "end": 17}}]
            }
        }"#;
        let bundle = FactsBundle::from_json(json, Path::new("/ws")).unwrap();
        let facts = bundle.get(Path::new("/ws/src/a.js")).unwrap();
        assert_eq!(facts.kinds[0].kind, ModuleKind::Provide);
        assert_eq!(facts.provides[0].namespace, "a");
        assert!(facts.requires.is_empty());
    }

    #[test]
    fn bundle_extract_missing_file() {
        let bundle = FactsBundle::new();
        let err = bundle.extract(Path::new("/x.js"), "").unwrap_err();
        assert!(matches!(err, ExtractError::NoFacts { .. }));
    }

    #[test]
    fn define_values_are_tagged() {
        let v: DefineValue =
            serde_json::from_str(r#"{"type": "expression", "value": "a.X + 1"}"#).unwrap();
        assert_eq!(v, DefineValue::Expression("a.X + 1".to_string()));
        assert_eq!(v.text(), "a.X + 1");
    }

    #[test]
    fn require_defaults() {
        let r: RequireDecl = serde_json::from_str(
            r#"{"namespace": "a", "statement": {"start": 0, "end": 1},
                "expression": {"start": 0, "end": 1}, "insert_at": 0}"#,
        )
        .unwrap();
        assert_eq!(r.form, RequireForm::Require);
        assert!(!r.used);
        assert!(RequireForm::ForwardDeclare.is_type_only());
        assert!(RequireForm::ForwardDeclare.is_deprecated());
    }

    #[test]
    fn closures_are_extractors() {
        let extractor = |_: &Path, src: &str| -> Result<FileFacts, ExtractError> {
            Ok(FileFacts {
                language: Some(src.to_string()),
                ..Default::default()
            })
        };
        let facts = extractor.extract(Path::new("/a.js"), "es6").unwrap();
        assert_eq!(facts.language.as_deref(), Some("es6"));
    }
}
