//! The set of files a graph covers.
//!
//! The graph asks a [`SourceSet`] two things: whether a path is in scope,
//! and what changed on disk since the last scan. [`GlobSourceSet`] is the
//! shipped implementation:
//!
//! - include patterns are globs relative to the root (`src/**/*.js`)
//! - patterns starting with `!` are excludes and always win
//! - patterns without glob metacharacters are literal files; a literal that
//!   does not exist is reported as missing
//! - change detection compares SHA-256 content hashes against the previous
//!   scan's snapshot

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

use crate::record::ContentHash;

// ============================================================================
// Interface
// ============================================================================

/// Scope verdict for a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Include,
    Exclude,
    /// No pattern decides; the caller may add the path.
    Unknown,
}

/// File-system changes since the previous scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanDelta {
    pub added: BTreeSet<PathBuf>,
    pub modified: BTreeSet<PathBuf>,
    pub removed: BTreeSet<PathBuf>,
    /// Literal include paths that are absent on disk, reported once.
    pub missing: BTreeSet<PathBuf>,
}

impl ScanDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.modified.is_empty()
            && self.removed.is_empty()
            && self.missing.is_empty()
    }

    /// Total number of changed paths.
    pub fn len(&self) -> usize {
        self.added.len() + self.modified.len() + self.removed.len() + self.missing.len()
    }
}

/// Errors from a source set.
#[derive(Debug, Error)]
pub enum SourceSetError {
    #[error("invalid glob pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to walk source tree: {0}")]
    Walk(#[from] walkdir::Error),
}

/// Scope and change tracking for a graph.
pub trait SourceSet {
    /// Add include patterns (`!`-prefixed for excludes).
    fn add(&mut self, patterns: &[String]) -> Result<(), SourceSetError>;

    /// Scope verdict for an absolute path.
    fn match_path(&self, path: &Path) -> Verdict;

    /// Add `patterns` (if any), then diff the file system against the
    /// previous scan.
    fn scan(&mut self, patterns: Option<&[String]>) -> Result<ScanDelta, SourceSetError>;
}

// ============================================================================
// Glob implementation
// ============================================================================

/// Directories never walked.
const DEFAULT_EXCLUDE_DIRS: &[&str] = &[".git", ".hg", ".svn", "node_modules"];

fn is_default_excluded(path: &Path) -> bool {
    path.components().any(|c| match c {
        Component::Normal(name) => DEFAULT_EXCLUDE_DIRS
            .iter()
            .any(|d| name.to_string_lossy() == *d),
        _ => false,
    })
}

fn is_glob(pattern: &str) -> bool {
    pattern.contains(['*', '?', '[', '{'])
}

fn build_set(patterns: &[String]) -> Result<GlobSet, SourceSetError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| SourceSetError::InvalidPattern {
            pattern: pattern.clone(),
            message: e.to_string(),
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|e| SourceSetError::InvalidPattern {
        pattern: patterns.join(","),
        message: e.to_string(),
    })
}

/// Glob-driven source set rooted at a directory.
#[derive(Debug)]
pub struct GlobSourceSet {
    root: PathBuf,
    include: Vec<String>,
    exclude: Vec<String>,
    include_set: GlobSet,
    exclude_set: GlobSet,
    literals: BTreeSet<PathBuf>,
    snapshot: BTreeMap<PathBuf, ContentHash>,
    reported_missing: BTreeSet<PathBuf>,
}

impl GlobSourceSet {
    /// Create an empty set. `root` should already be canonical.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        GlobSourceSet {
            root: root.into(),
            include: Vec::new(),
            exclude: Vec::new(),
            include_set: GlobSet::empty(),
            exclude_set: GlobSet::empty(),
            literals: BTreeSet::new(),
            snapshot: BTreeMap::new(),
            reported_missing: BTreeSet::new(),
        }
    }

    /// Create a set with initial patterns.
    pub fn with_patterns(
        root: impl Into<PathBuf>,
        patterns: &[String],
    ) -> Result<Self, SourceSetError> {
        let mut set = GlobSourceSet::new(root);
        set.add(patterns)?;
        Ok(set)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Files seen by the last scan, sorted.
    pub fn files(&self) -> impl Iterator<Item = &Path> {
        self.snapshot.keys().map(PathBuf::as_path)
    }

    fn relative(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        Some(rel.to_string_lossy().replace(std::path::MAIN_SEPARATOR, "/"))
    }

    fn hash_file(path: &Path) -> Result<ContentHash, SourceSetError> {
        let content = fs::read(path).map_err(|source| SourceSetError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(ContentHash::compute(&content))
    }

    fn current_files(&self) -> Result<BTreeMap<PathBuf, ContentHash>, SourceSetError> {
        let mut files = BTreeMap::new();
        if !self.include.is_empty() && self.root.is_dir() {
            let walker = WalkDir::new(&self.root)
                .follow_links(false)
                .into_iter()
                .filter_entry(|e| {
                    e.path()
                        .strip_prefix(&self.root)
                        .map_or(true, |rel| !is_default_excluded(rel))
                });
            for entry in walker {
                let entry = entry?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let Some(rel) = self.relative(entry.path()) else {
                    continue;
                };
                if self.exclude_set.is_match(&rel) || !self.include_set.is_match(&rel) {
                    continue;
                }
                files.insert(entry.path().to_path_buf(), Self::hash_file(entry.path())?);
            }
        }
        for literal in &self.literals {
            if literal.is_file() {
                if !files.contains_key(literal) {
                    files.insert(literal.clone(), Self::hash_file(literal)?);
                }
            }
        }
        Ok(files)
    }
}

impl SourceSet for GlobSourceSet {
    fn add(&mut self, patterns: &[String]) -> Result<(), SourceSetError> {
        let mut include = self.include.clone();
        let mut exclude = self.exclude.clone();
        for pattern in patterns {
            if let Some(rest) = pattern.strip_prefix('!') {
                exclude.push(rest.to_string());
            } else if is_glob(pattern) {
                include.push(pattern.clone());
            } else {
                let path = Path::new(pattern);
                let path = if path.is_relative() {
                    self.root.join(path)
                } else {
                    path.to_path_buf()
                };
                self.literals.insert(path);
            }
        }
        self.include_set = build_set(&include)?;
        self.exclude_set = build_set(&exclude)?;
        self.include = include;
        self.exclude = exclude;
        Ok(())
    }

    fn match_path(&self, path: &Path) -> Verdict {
        let rel = self.relative(path);
        if let Some(rel) = &rel {
            if self.exclude_set.is_match(rel) {
                return Verdict::Exclude;
            }
        }
        if self.literals.contains(path) {
            return Verdict::Include;
        }
        match rel {
            Some(rel) if self.include_set.is_match(&rel) => Verdict::Include,
            Some(_) if !self.include.is_empty() => Verdict::Exclude,
            _ => Verdict::Unknown,
        }
    }

    fn scan(&mut self, patterns: Option<&[String]>) -> Result<ScanDelta, SourceSetError> {
        if let Some(patterns) = patterns {
            self.add(patterns)?;
        }
        let current = self.current_files()?;
        let mut delta = ScanDelta::default();

        for (path, hash) in &current {
            match self.snapshot.get(path) {
                None => {
                    delta.added.insert(path.clone());
                }
                Some(old) if old != hash => {
                    delta.modified.insert(path.clone());
                }
                Some(_) => {}
            }
        }
        for path in self.snapshot.keys() {
            if !current.contains_key(path) {
                delta.removed.insert(path.clone());
            }
        }

        let missing_now: BTreeSet<PathBuf> = self
            .literals
            .iter()
            .filter(|p| !current.contains_key(*p))
            .cloned()
            .collect();
        delta.missing = missing_now
            .difference(&self.reported_missing)
            .cloned()
            .collect();
        self.reported_missing = missing_now;
        self.snapshot = current;

        debug!(
            added = delta.added.len(),
            modified = delta.modified.len(),
            removed = delta.removed.len(),
            missing = delta.missing.len(),
            "source set scanned"
        );
        Ok(delta)
    }
}

// ============================================================================
// Tests
// ============================================================================
