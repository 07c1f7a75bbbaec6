//! Dependency records: the terse per-file summary used to prime a graph.
//!
//! A record carries only what the graph needs to resolve and validate
//! requires (owned namespaces, required namespaces, kind), so a host can
//! persist an index of a large project and rebuild the graph without
//! re-extracting facts for every file.
//!
//! ```json
//! { "path": "/src/a.js", "provides": ["a"], "requires": ["b"],
//!   "flags": { "kind": "provide", "language": "es6" } }
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::record::{ModuleKind, ModuleRecord};

/// Optional per-file flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyFlags {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ModuleKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// Terse record for one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyRecord {
    pub path: PathBuf,
    #[serde(default)]
    pub provides: Vec<String>,
    #[serde(default)]
    pub requires: Vec<String>,
    #[serde(default)]
    pub flags: DependencyFlags,
}

impl DependencyRecord {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DependencyRecord {
            path: path.into(),
            provides: Vec::new(),
            requires: Vec::new(),
            flags: DependencyFlags::default(),
        }
    }

    pub fn provide(mut self, namespace: &str) -> Self {
        self.provides.push(namespace.to_string());
        self
    }

    pub fn require(mut self, namespace: &str) -> Self {
        self.requires.push(namespace.to_string());
        self
    }

    pub fn kind(mut self, kind: ModuleKind) -> Self {
        self.flags.kind = Some(kind);
        self
    }

    /// Summarize a record. Type-only requires are left out since they are
    /// not graph edges.
    pub fn from_module(record: &ModuleRecord) -> Self {
        DependencyRecord {
            path: record.request().to_path_buf(),
            provides: record
                .provides_in_order()
                .into_iter()
                .map(|p| p.namespace.clone())
                .collect(),
            requires: record
                .runtime_requires()
                .map(|r| r.namespace.clone())
                .collect(),
            flags: DependencyFlags {
                kind: record.kind(),
                language: record.language().map(str::to_string),
            },
        }
    }

    /// Resolve a relative path against `root`.
    pub fn rooted(mut self, root: &Path) -> Self {
        if self.path.is_relative() {
            self.path = root.join(&self.path);
        }
        self
    }

    /// Express the path relative to `root` when it lies below it.
    pub fn relative_to(mut self, root: &Path) -> Self {
        if let Ok(rel) = self.path.strip_prefix(root) {
            self.path = rel.to_path_buf();
        }
        self
    }
}

/// Parse a JSON array of records.
pub fn parse_records(json: &str) -> serde_json::Result<Vec<DependencyRecord>> {
    serde_json::from_str(json)
}

/// Serialize records as a pretty JSON array.
pub fn render_records(records: &[DependencyRecord]) -> serde_json::Result<String> {
    serde_json::to_string_pretty(records)
}
