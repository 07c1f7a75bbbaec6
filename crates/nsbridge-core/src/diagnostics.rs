//! Typed diagnostics produced while loading, validating and rewriting modules.
//!
//! Only the diagnostic *kind* and its structured payload are modeled here;
//! rendering prose for humans is the caller's business. `Display` gives a
//! terse single-line form that is good enough for logs.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::edit::Span;

// ---------------------------------------------------------------------------
// Severity and kinds
// ---------------------------------------------------------------------------

/// How severe a diagnostic is. Ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// What went wrong. Stable, serializable codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// Namespace identifier does not match the dotted grammar.
    InvalidNamespace,
    /// Namespace root collides with a builtin or the system root.
    NamespaceConflict,
    /// Namespace declared twice (same file or across files).
    NamespaceDuplicate,
    /// A module was marked with two different kinds.
    KindConflict,
    /// The fact extractor could not process the file.
    ParseFailed,
    /// A module requires a namespace it provides itself.
    RequireSelf,
    /// A required namespace has no known owner.
    RequireUnknown,
    /// Modules require each other in a cycle.
    CircularReference,
    /// A `goog.module` reached through a plain-declaring module does not
    /// expose its namespace globally.
    UnexposedLegacy,
    /// An explicitly listed source file does not exist.
    MissingFile,
    /// Assignment into a required or implicitly constructed namespace.
    NamespaceMutation,
    /// A namespace reference outside a declarative module.
    NamespaceOutsideModule,
    /// Use of a deprecated declaration form.
    DeprecatedForm,
}

impl DiagnosticKind {
    pub const ALL: [DiagnosticKind; 13] = [
        DiagnosticKind::InvalidNamespace,
        DiagnosticKind::NamespaceConflict,
        DiagnosticKind::NamespaceDuplicate,
        DiagnosticKind::KindConflict,
        DiagnosticKind::ParseFailed,
        DiagnosticKind::RequireSelf,
        DiagnosticKind::RequireUnknown,
        DiagnosticKind::CircularReference,
        DiagnosticKind::UnexposedLegacy,
        DiagnosticKind::MissingFile,
        DiagnosticKind::NamespaceMutation,
        DiagnosticKind::NamespaceOutsideModule,
        DiagnosticKind::DeprecatedForm,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DiagnosticKind::InvalidNamespace => "invalid_namespace",
            DiagnosticKind::NamespaceConflict => "namespace_conflict",
            DiagnosticKind::NamespaceDuplicate => "namespace_duplicate",
            DiagnosticKind::KindConflict => "kind_conflict",
            DiagnosticKind::ParseFailed => "parse_failed",
            DiagnosticKind::RequireSelf => "require_self",
            DiagnosticKind::RequireUnknown => "require_unknown",
            DiagnosticKind::CircularReference => "circular_reference",
            DiagnosticKind::UnexposedLegacy => "unexposed_legacy",
            DiagnosticKind::MissingFile => "missing_file",
            DiagnosticKind::NamespaceMutation => "namespace_mutation",
            DiagnosticKind::NamespaceOutsideModule => "namespace_outside_module",
            DiagnosticKind::DeprecatedForm => "deprecated_form",
        }
    }

    /// Parse the snake_case code.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.as_str() == s)
    }

    /// Severity a diagnostic of this kind carries.
    pub fn default_severity(self) -> Severity {
        match self {
            DiagnosticKind::NamespaceMutation
            | DiagnosticKind::NamespaceOutsideModule
            | DiagnosticKind::DeprecatedForm => Severity::Warning,
            DiagnosticKind::MissingFile => Severity::Warning,
            _ => Severity::Error,
        }
    }
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Diagnostic
// ---------------------------------------------------------------------------

/// A single error or warning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub severity: Severity,
    /// Originating file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
    /// Namespace the diagnostic is about.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Modules involved, for graph-level diagnostics (cycle members, require
    /// chains).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related: Vec<String>,
}

impl Diagnostic {
    /// Create a diagnostic with the kind's default severity.
    pub fn new(kind: DiagnosticKind) -> Self {
        Diagnostic {
            kind,
            severity: kind.default_severity(),
            file: None,
            span: None,
            namespace: None,
            related: Vec::new(),
        }
    }

    pub fn with_file(mut self, file: impl AsRef<Path>) -> Self {
        self.file = Some(file.as_ref().to_path_buf());
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_related(mut self, related: Vec<String>) -> Self {
        self.related = related;
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.severity, self.kind)?;
        if let Some(file) = &self.file {
            write!(f, " {}", file.display())?;
            if let Some(span) = &self.span {
                write!(f, "@{}", span)?;
            }
        }
        if let Some(ns) = &self.namespace {
            write!(f, " '{}'", ns)?;
        }
        if !self.related.is_empty() {
            write!(f, " ({})", self.related.join(" -> "))?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Filtering
// ---------------------------------------------------------------------------

/// Which diagnostics the caller wants to see.
///
/// Warnings are advisory and can be silenced per kind or by raising the
/// minimum severity. Errors are never filtered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticFilter {
    pub min_severity: Severity,
    pub suppressed: Vec<DiagnosticKind>,
}

impl Default for DiagnosticFilter {
    fn default() -> Self {
        DiagnosticFilter {
            min_severity: Severity::Warning,
            suppressed: Vec::new(),
        }
    }
}

impl DiagnosticFilter {
    /// Returns true if the diagnostic should be reported.
    pub fn allows(&self, diagnostic: &Diagnostic) -> bool {
        if diagnostic.is_error() {
            return true;
        }
        diagnostic.severity >= self.min_severity && !self.suppressed.contains(&diagnostic.kind)
    }

    /// Apply the filter to a list, preserving order.
    pub fn apply<'a>(&self, diagnostics: &'a [Diagnostic]) -> Vec<&'a Diagnostic> {
        diagnostics.iter().filter(|d| self.allows(d)).collect()
    }
}
