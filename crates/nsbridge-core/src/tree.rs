//! The namespace graph.
//!
//! A [`Tree`] owns every [`ModuleRecord`] of one project, the
//! namespace-to-file ownership map, and the namespace hierarchy. It
//! orchestrates loading (from source, through the fact extractor, or from
//! dependency records) and validates the graph of require edges.
//!
//! Several trees can coexist; nothing here is process-global.
//!
//! # Validation
//!
//! [`Tree::validate`] is a single Tarjan-style DFS over runtime require
//! edges. Besides strongly connected components it tracks which modules
//! reach a plain-declaring (`goog.provide`) module. A `goog.module` that
//! does and does not expose its namespace globally is repaired when it
//! belongs to the base library, and is an error otherwise. Repairs are
//! collected during the walk, applied after it, and the repaired modules'
//! subgraph is walked again.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::deps::DependencyRecord;
use crate::diagnostics::{Diagnostic, DiagnosticKind, Severity};
use crate::edit::Span;
use crate::facts::{FactExtractor, FileFacts};
use crate::record::{ModuleKind, ModuleRecord, ModuleState};
use crate::source_set::{ScanDelta, SourceSet, SourceSetError, Verdict};

// ============================================================================
// Public types
// ============================================================================

/// How to look a module up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleKey {
    Namespace(String),
    Path(PathBuf),
}

impl ModuleKey {
    pub fn namespace(ns: impl Into<String>) -> Self {
        ModuleKey::Namespace(ns.into())
    }

    pub fn path(path: impl Into<PathBuf>) -> Self {
        ModuleKey::Path(path.into())
    }
}

/// Graph-wide settings.
#[derive(Debug, Clone, Default)]
pub struct TreeConfig {
    /// Root of the base library. Files below it are always in scope and
    /// may declare system namespaces.
    pub base_library: Option<PathBuf>,
}

/// A node of the namespace hierarchy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NamespaceNode {
    /// Last segment.
    pub name: String,
    /// Dotted path from the root.
    pub full_name: String,
    pub children: BTreeMap<String, NamespaceNode>,
}

impl NamespaceNode {
    fn insert(&mut self, namespace: &str) {
        let mut node = self;
        for segment in namespace.split('.') {
            let full_name = if node.full_name.is_empty() {
                segment.to_string()
            } else {
                format!("{}.{}", node.full_name, segment)
            };
            node = node
                .children
                .entry(segment.to_string())
                .or_insert_with(|| NamespaceNode {
                    name: segment.to_string(),
                    full_name,
                    children: BTreeMap::new(),
                });
        }
    }

    fn find(&self, namespace: &str) -> Option<&NamespaceNode> {
        namespace
            .split('.')
            .try_fold(self, |node, segment| node.children.get(segment))
    }
}

/// Result of loading one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Facts were (re)loaded.
    Loaded,
    /// Source was identical to the loaded one.
    Unchanged,
    /// The extractor failed; the record stays unloaded.
    Failed,
}

/// Summary of a validation pass that did not hit a fatal error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Validation {
    pub modules: usize,
    pub errors: usize,
    pub warnings: usize,
    /// Base-library modules that were given legacy exposure.
    pub repaired: Vec<PathBuf>,
}

impl Validation {
    /// No error diagnostics anywhere in the graph.
    pub fn passed(&self) -> bool {
        self.errors == 0
    }
}

/// Result of a scan batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanOutcome {
    pub delta: ScanDelta,
    pub validation: Validation,
}

/// Graph-level failures.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("circular reference: {}", members.join(" -> "))]
    CircularReference { members: Vec<String> },

    #[error("'{module}' is reached from a goog.provide module but does not declare a legacy namespace ({})", chain.join(" -> "))]
    UnexposedLegacy { module: String, chain: Vec<String> },

    #[error("{} is not in scope", path.display())]
    OutOfScope { path: PathBuf },

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    SourceSet(#[from] SourceSetError),

    /// The fact extractor broke its contract.
    #[error("fact contract violated for {}: {message}", path.display())]
    Contract { path: PathBuf, message: String },
}

/// Canonical form of a path: resolved on disk when it exists, lexically
/// normalized otherwise.
pub fn canonical_path(path: &Path) -> PathBuf {
    if let Ok(resolved) = fs::canonicalize(path) {
        return resolved;
    }
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

// ============================================================================
// Tree
// ============================================================================

/// One namespace graph.
pub struct Tree {
    config: TreeConfig,
    source_set: Box<dyn SourceSet>,
    extractor: Box<dyn FactExtractor>,
    modules: BTreeMap<PathBuf, ModuleRecord>,
    owners: BTreeMap<String, PathBuf>,
    hierarchy: NamespaceNode,
    validation: Vec<Diagnostic>,
    missing: BTreeSet<PathBuf>,
}

impl std::fmt::Debug for Tree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tree")
            .field("config", &self.config)
            .field("modules", &self.modules.len())
            .field("namespaces", &self.owners.len())
            .finish()
    }
}

impl Tree {
    pub fn new(
        config: TreeConfig,
        source_set: Box<dyn SourceSet>,
        extractor: Box<dyn FactExtractor>,
    ) -> Self {
        let config = TreeConfig {
            base_library: config.base_library.as_deref().map(canonical_path),
        };
        Tree {
            config,
            source_set,
            extractor,
            modules: BTreeMap::new(),
            owners: BTreeMap::new(),
            hierarchy: NamespaceNode::default(),
            validation: Vec::new(),
            missing: BTreeSet::new(),
        }
    }

    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Scope
    // ------------------------------------------------------------------

    /// Returns true if `path` lies under the base library.
    pub fn is_in_library(&self, path: &Path) -> bool {
        self.config
            .base_library
            .as_deref()
            .is_some_and(|lib| path.starts_with(lib))
    }

    /// Scope verdict: base-library files are always included.
    pub fn scope(&self, path: &Path) -> Verdict {
        if self.is_in_library(path) {
            Verdict::Include
        } else {
            self.source_set.match_path(path)
        }
    }

    pub fn is_in_scope(&self, path: &Path) -> bool {
        self.scope(path) == Verdict::Include
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    pub fn module(&self, path: &Path) -> Option<&ModuleRecord> {
        self.modules.get(path)
    }

    pub fn modules(&self) -> impl Iterator<Item = &ModuleRecord> {
        self.modules.values()
    }

    /// Record owning `namespace`, without loading.
    pub fn owner_of(&self, namespace: &str) -> Option<&ModuleRecord> {
        self.owners.get(namespace).and_then(|p| self.modules.get(p))
    }

    /// Owned namespaces and their files, sorted by namespace.
    pub fn namespaces(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.owners
            .iter()
            .map(|(ns, path)| (ns.as_str(), path.as_path()))
    }

    /// The hierarchy root (an unnamed node).
    pub fn hierarchy(&self) -> &NamespaceNode {
        &self.hierarchy
    }

    pub fn namespace_node(&self, namespace: &str) -> Option<&NamespaceNode> {
        self.hierarchy.find(namespace)
    }

    /// Find the owning record, loading it from disk if it is below `Load`.
    pub fn resolve(&mut self, key: &ModuleKey) -> Result<Option<&ModuleRecord>, GraphError> {
        let path = match key {
            ModuleKey::Namespace(ns) => self.owners.get(ns).cloned(),
            ModuleKey::Path(path) => {
                let path = canonical_path(path);
                self.modules.contains_key(&path).then_some(path)
            }
        };
        let Some(path) = path else {
            return Ok(None);
        };
        let needs_load = self
            .modules
            .get(&path)
            .is_some_and(|m| m.state() != ModuleState::Load);
        if needs_load {
            self.load(&path, None)?;
        }
        Ok(self.modules.get(&path))
    }

    // ------------------------------------------------------------------
    // Loading
    // ------------------------------------------------------------------

    /// Load a file, reading it from disk unless `inline` is given.
    pub fn load(&mut self, path: &Path, inline: Option<&str>) -> Result<LoadOutcome, GraphError> {
        let path = canonical_path(path);
        match self.scope(&path) {
            Verdict::Include => {}
            Verdict::Exclude => return Err(GraphError::OutOfScope { path }),
            Verdict::Unknown => {
                debug!(path = %path.display(), "adding path to source set");
                self.source_set
                    .add(&[path.to_string_lossy().into_owned()])?;
            }
        }
        let source = match inline {
            Some(text) => text.to_string(),
            None => fs::read_to_string(&path).map_err(|source| GraphError::Io {
                path: path.clone(),
                source,
            })?,
        };
        self.load_source(path, source)
    }

    fn load_source(&mut self, path: PathBuf, source: String) -> Result<LoadOutcome, GraphError> {
        let in_library = self.is_in_library(&path);
        let current = self
            .modules
            .entry(path.clone())
            .or_insert_with(|| ModuleRecord::new(path.clone(), in_library))
            .is_current(&source);
        if current {
            return Ok(LoadOutcome::Unchanged);
        }
        self.unload_module(&path);

        let facts = match self.extractor.extract(&path, &source) {
            Ok(facts) => facts,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "fact extraction failed");
                if let Some(record) = self.modules.get_mut(&path) {
                    record.push_diagnostic(
                        Diagnostic::new(DiagnosticKind::ParseFailed).with_file(&path),
                    );
                }
                return Ok(LoadOutcome::Failed);
            }
        };
        check_facts(&path, &source, &facts)?;

        let declared = match self.modules.get_mut(&path) {
            Some(record) => record.load(&source, facts),
            None => Vec::new(),
        };
        debug!(path = %path.display(), provides = declared.len(), "module loaded");
        for namespace in declared {
            self.register_provide(&namespace, &path);
        }
        Ok(LoadOutcome::Loaded)
    }

    /// Prime the graph from a dependency record.
    ///
    /// Returns false if the module is already fully loaded.
    pub fn load_record(&mut self, record: &DependencyRecord) -> bool {
        let path = canonical_path(&record.path);
        let in_library = self.is_in_library(&path);
        let state = self
            .modules
            .entry(path.clone())
            .or_insert_with(|| ModuleRecord::new(path.clone(), in_library))
            .state();
        if state == ModuleState::Load {
            return false;
        }
        self.unload_module(&path);
        let declared = match self.modules.get_mut(&path) {
            Some(module) => module.load_cached(
                &record.provides,
                &record.requires,
                record.flags.kind,
                record.flags.language.clone(),
            ),
            None => Vec::new(),
        };
        for namespace in declared {
            self.register_provide(&namespace, &path);
        }
        true
    }

    /// Record ownership of `namespace` by `module`.
    ///
    /// A namespace already owned by a different file keeps its owner; the
    /// newcomer gets a `NamespaceDuplicate` diagnostic.
    pub fn register_provide(&mut self, namespace: &str, module: &Path) -> bool {
        match self.owners.get(namespace) {
            Some(owner) if owner == module => true,
            Some(owner) => {
                let owner = owner.display().to_string();
                if let Some(record) = self.modules.get_mut(module) {
                    record.push_diagnostic(
                        Diagnostic::new(DiagnosticKind::NamespaceDuplicate)
                            .with_file(module)
                            .with_namespace(namespace)
                            .with_related(vec![owner]),
                    );
                }
                false
            }
            None => {
                self.owners
                    .insert(namespace.to_string(), module.to_path_buf());
                self.hierarchy.insert(namespace);
                true
            }
        }
    }

    /// Unload a module and drop its registrations. A namespace it owned
    /// passes to the next file (in path order) that also declares it.
    fn unload_module(&mut self, path: &Path) {
        let Some(record) = self.modules.get_mut(path) else {
            return;
        };
        let provided = record.unload();
        let dropped = !provided.is_empty();
        for namespace in provided {
            if self.owners.get(&namespace).map(PathBuf::as_path) != Some(path) {
                continue;
            }
            self.owners.remove(&namespace);
            let successor = self
                .modules
                .iter()
                .find(|(p, m)| p.as_path() != path && m.provides().contains_key(&namespace))
                .map(|(p, _)| p.clone());
            if let Some(successor) = successor {
                if let Some(record) = self.modules.get_mut(&successor) {
                    record.retract_diagnostic(DiagnosticKind::NamespaceDuplicate, &namespace);
                }
                self.owners.insert(namespace, successor);
            }
        }
        if dropped {
            self.rebuild_hierarchy();
        }
    }

    /// Unload a file but keep its record, so a later `load` starts from
    /// `Unload`. Returns false for unknown paths.
    pub fn unload(&mut self, path: &Path) -> bool {
        let path = canonical_path(path);
        if !self.modules.contains_key(&path) {
            return false;
        }
        self.unload_module(&path);
        true
    }

    /// Forget a file entirely.
    pub fn remove(&mut self, path: &Path) -> bool {
        let path = canonical_path(path);
        self.unload_module(&path);
        self.modules.remove(&path).is_some()
    }

    fn rebuild_hierarchy(&mut self) {
        let mut root = NamespaceNode::default();
        for namespace in self.owners.keys() {
            root.insert(namespace);
        }
        self.hierarchy = root;
    }

    // ------------------------------------------------------------------
    // Batches
    // ------------------------------------------------------------------

    /// Apply a set of file-system changes, then validate once.
    ///
    /// Every added or modified file is read before the graph is touched, so
    /// a read failure leaves the graph as it was.
    pub fn apply_scan(&mut self, delta: &ScanDelta) -> Result<Validation, GraphError> {
        let sources = delta
            .added
            .iter()
            .chain(&delta.modified)
            .map(|path| {
                fs::read_to_string(path)
                    .map(|source| (path, source))
                    .map_err(|source| GraphError::Io {
                        path: path.clone(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        for path in &delta.removed {
            self.unload_module(path);
            self.modules.remove(path);
        }
        for path in &delta.missing {
            self.missing.insert(path.clone());
        }
        for (path, source) in sources {
            self.missing.remove(path);
            self.load_source(canonical_path(path), source)?;
        }
        self.rebuild_hierarchy();
        self.validate()
    }

    /// Scan the source set and apply the resulting delta.
    pub fn scan(&mut self, patterns: Option<&[String]>) -> Result<ScanOutcome, GraphError> {
        let delta = self.source_set.scan(patterns)?;
        info!(
            added = delta.added.len(),
            modified = delta.modified.len(),
            removed = delta.removed.len(),
            missing = delta.missing.len(),
            "scan applied"
        );
        let validation = self.apply_scan(&delta)?;
        Ok(ScanOutcome { delta, validation })
    }

    /// Dependency records for every module with facts.
    pub fn dependency_records(&self) -> Vec<DependencyRecord> {
        self.modules
            .values()
            .filter(|m| m.state() != ModuleState::Unload)
            .map(DependencyRecord::from_module)
            .collect()
    }

    /// All diagnostics: per-module (path order), then missing files, then
    /// validation.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        let mut out: Vec<Diagnostic> = self
            .modules
            .values()
            .flat_map(|m| m.diagnostics().iter().cloned())
            .collect();
        out.extend(
            self.missing
                .iter()
                .map(|p| Diagnostic::new(DiagnosticKind::MissingFile).with_file(p)),
        );
        out.extend(self.validation.iter().cloned());
        out
    }

    // ------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------

    /// Validate the whole graph.
    ///
    /// Self-requires and unknown requires are recorded as diagnostics.
    /// Multi-member cycles and unexposed legacy modules outside the base
    /// library are returned as errors (and recorded).
    pub fn validate(&mut self) -> Result<Validation, GraphError> {
        self.validation.clear();
        let graph = GraphView::build(self);
        let mut walk = Walk::new(&graph);
        walk.run(0..graph.nodes.len());
        let WalkResult {
            mut diagnostics,
            mut fatal,
            repairs,
        } = walk.finish();

        let mut repaired = Vec::new();
        if !repairs.is_empty() {
            for &index in &repairs {
                let path = &graph.nodes[index].path;
                if let Some(record) = self.modules.get_mut(path) {
                    record.set_legacy(None);
                    record.compute_implicit_ancestors();
                }
                debug!(path = %path.display(), "legacy namespace exposure repaired");
                repaired.push(path.clone());
            }
            let graph = GraphView::build(self);
            let roots: Vec<usize> = repaired
                .iter()
                .filter_map(|p| graph.index.get(p).copied())
                .collect();
            let mut rewalk = Walk::new(&graph);
            rewalk.run(roots);
            let second = rewalk.finish();
            for d in second.diagnostics {
                if !diagnostics.contains(&d) {
                    diagnostics.push(d);
                }
            }
            fatal.extend(second.fatal);
        }

        self.validation = diagnostics;
        let first_fatal = fatal.into_iter().next();

        let all = self.diagnostics();
        let result = Validation {
            modules: self.modules.len(),
            errors: all.iter().filter(|d| d.severity == Severity::Error).count(),
            warnings: all
                .iter()
                .filter(|d| d.severity == Severity::Warning)
                .count(),
            repaired,
        };
        info!(
            modules = result.modules,
            errors = result.errors,
            warnings = result.warnings,
            repaired = result.repaired.len(),
            "graph validated"
        );
        match first_fatal {
            Some(err) => Err(err),
            None => Ok(result),
        }
    }
}

/// Reject facts whose ranges fall outside the source.
fn check_facts(path: &Path, source: &str, facts: &FileFacts) -> Result<(), GraphError> {
    let len = source.len();
    let mut spans: Vec<Span> = Vec::new();
    spans.extend(facts.kinds.iter().filter_map(|k| k.span));
    spans.extend(facts.provides.iter().map(|p| p.statement));
    for r in &facts.requires {
        spans.push(r.statement);
        spans.push(r.expression);
        spans.push(Span::at(r.insert_at));
    }
    spans.extend(facts.defines.iter().map(|d| d.site));
    spans.extend(facts.usages.iter().map(|u| u.span));
    spans.extend(facts.legacy_namespace);
    if let Some(span) = spans.iter().find(|s| s.start > s.end) {
        return Err(GraphError::Contract {
            path: path.to_path_buf(),
            message: format!("range {} ends before it starts", span),
        });
    }
    match spans.iter().find(|s| s.end > len) {
        Some(span) => Err(GraphError::Contract {
            path: path.to_path_buf(),
            message: format!("range {} exceeds source length {}", span, len),
        }),
        None => Ok(()),
    }
}

// ============================================================================
// Validation walk
// ============================================================================

struct Node {
    path: PathBuf,
    name: String,
    kind: ModuleKind,
    legacy: bool,
    in_library: bool,
}

/// Immutable snapshot of the require graph, indexed by position.
struct GraphView {
    nodes: Vec<Node>,
    index: BTreeMap<PathBuf, usize>,
    edges: Vec<Vec<usize>>,
    /// Diagnostics found while building edges.
    diagnostics: Vec<Diagnostic>,
}

impl GraphView {
    fn build(tree: &Tree) -> Self {
        let loaded: Vec<&ModuleRecord> = tree
            .modules
            .values()
            .filter(|m| m.state() != ModuleState::Unload)
            .collect();
        let index: BTreeMap<PathBuf, usize> = loaded
            .iter()
            .enumerate()
            .map(|(i, m)| (m.request().to_path_buf(), i))
            .collect();
        let mut edges = vec![Vec::new(); loaded.len()];
        let mut diagnostics = Vec::new();

        for (i, module) in loaded.iter().enumerate() {
            for require in module.runtime_requires() {
                let mut site = Diagnostic::new(DiagnosticKind::RequireSelf)
                    .with_file(module.request())
                    .with_namespace(&require.namespace);
                if let Some(span) = require.statement {
                    site = site.with_span(span);
                }
                if module.provides().contains_key(&require.namespace) {
                    diagnostics.push(site);
                    continue;
                }
                match tree.owners.get(&require.namespace).and_then(|p| index.get(p)) {
                    Some(&target) => edges[i].push(target),
                    None => {
                        site.kind = DiagnosticKind::RequireUnknown;
                        site.severity = DiagnosticKind::RequireUnknown.default_severity();
                        diagnostics.push(site);
                    }
                }
            }
        }

        let nodes = loaded
            .iter()
            .map(|m| Node {
                path: m.request().to_path_buf(),
                name: m.display_name(),
                kind: m.effective_kind(),
                legacy: m.is_legacy(),
                in_library: m.in_library(),
            })
            .collect();
        GraphView {
            nodes,
            index,
            edges,
            diagnostics,
        }
    }
}

struct WalkResult {
    diagnostics: Vec<Diagnostic>,
    fatal: Vec<GraphError>,
    repairs: Vec<usize>,
}

/// Tarjan's SCC algorithm plus plain-module reachability.
///
/// The DFS keeps its own frame stack, so chain depth is bounded by memory
/// rather than by the thread's stack.
struct Walk<'g> {
    graph: &'g GraphView,
    counter: usize,
    discovery: Vec<Option<usize>>,
    low: Vec<usize>,
    on_stack: Vec<bool>,
    stack: Vec<usize>,
    /// Next hop towards a plain-declaring module; a plain module points at
    /// itself.
    plain_next: Vec<Option<usize>>,
    diagnostics: Vec<Diagnostic>,
    fatal: Vec<GraphError>,
    repairs: BTreeSet<usize>,
}

impl<'g> Walk<'g> {
    fn new(graph: &'g GraphView) -> Self {
        let n = graph.nodes.len();
        Walk {
            graph,
            counter: 0,
            discovery: vec![None; n],
            low: vec![0; n],
            on_stack: vec![false; n],
            stack: Vec::new(),
            plain_next: vec![None; n],
            diagnostics: graph.diagnostics.clone(),
            fatal: Vec::new(),
            repairs: BTreeSet::new(),
        }
    }

    fn run(&mut self, roots: impl IntoIterator<Item = usize>) {
        for root in roots {
            if self.discovery[root].is_none() {
                self.visit(root);
            }
        }
    }

    fn visit(&mut self, root: usize) {
        let graph = self.graph;
        // (node, index of the next edge to follow)
        let mut frames: Vec<(usize, usize)> = vec![(root, 0)];
        self.enter(root);

        while let Some(&(v, edge)) = frames.last() {
            match graph.edges[v].get(edge) {
                Some(&w) => {
                    if let Some(top) = frames.last_mut() {
                        top.1 += 1;
                    }
                    match self.discovery[w] {
                        None => {
                            self.enter(w);
                            frames.push((w, 0));
                            continue;
                        }
                        Some(dw) if self.on_stack[w] => {
                            self.low[v] = self.low[v].min(dw);
                        }
                        Some(_) => {}
                    }
                    self.inherit_plain(v, w);
                }
                None => {
                    frames.pop();
                    self.leave(v);
                    if let Some(&(parent, _)) = frames.last() {
                        self.low[parent] = self.low[parent].min(self.low[v]);
                        self.inherit_plain(parent, v);
                    }
                }
            }
        }
    }

    fn enter(&mut self, v: usize) {
        let index = self.counter;
        self.counter += 1;
        self.discovery[v] = Some(index);
        self.low[v] = index;
        self.stack.push(v);
        self.on_stack[v] = true;
        if self.graph.nodes[v].kind == ModuleKind::Provide {
            self.plain_next[v] = Some(v);
        }
    }

    fn inherit_plain(&mut self, v: usize, w: usize) {
        if self.plain_next[v].is_none() && self.plain_next[w].is_some() {
            self.plain_next[v] = Some(w);
        }
    }

    /// All edges of `v` are done: check exposure and pop its SCC if `v` is
    /// the root of one.
    fn leave(&mut self, v: usize) {
        self.check_exposure(v);

        if Some(self.low[v]) == self.discovery[v] {
            let mut members = Vec::new();
            while let Some(w) = self.stack.pop() {
                self.on_stack[w] = false;
                members.push(w);
                if w == v {
                    break;
                }
            }
            if members.len() > 1 {
                members.sort_by_key(|m| self.discovery[*m]);
                self.report_cycle(&members);
            }
        }
    }

    /// Require chain from `v` to the plain-declaring module it reaches.
    fn plain_chain(&self, v: usize) -> Option<Vec<usize>> {
        let mut chain = vec![v];
        let mut current = v;
        loop {
            let next = self.plain_next[current]?;
            if next == current {
                return Some(chain);
            }
            chain.push(next);
            current = next;
        }
    }

    fn check_exposure(&mut self, v: usize) {
        let graph = self.graph;
        let node = &graph.nodes[v];
        if node.kind != ModuleKind::GoogModule || node.legacy {
            return;
        }
        let Some(chain) = self.plain_chain(v) else {
            return;
        };
        if node.in_library {
            self.repairs.insert(v);
            return;
        }
        let chain: Vec<String> = chain.iter().map(|&i| graph.nodes[i].name.clone()).collect();
        self.diagnostics.push(
            Diagnostic::new(DiagnosticKind::UnexposedLegacy)
                .with_file(&node.path)
                .with_related(chain.clone()),
        );
        self.fatal.push(GraphError::UnexposedLegacy {
            module: node.name.clone(),
            chain,
        });
    }

    fn report_cycle(&mut self, members: &[usize]) {
        let graph = self.graph;
        let names: Vec<String> = members
            .iter()
            .map(|&m| graph.nodes[m].name.clone())
            .collect();
        let first = &graph.nodes[members[0]];
        self.diagnostics.push(
            Diagnostic::new(DiagnosticKind::CircularReference)
                .with_file(&first.path)
                .with_related(names.clone()),
        );
        self.fatal
            .push(GraphError::CircularReference { members: names });
    }

    fn finish(self) -> WalkResult {
        WalkResult {
            diagnostics: self.diagnostics,
            fatal: self.fatal,
            repairs: self.repairs.into_iter().collect(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::{ExtractError, FactsBundle, KindSignal, ProvideDecl, RequireDecl};
    use crate::facts::RequireForm;
    use crate::source_set::GlobSourceSet;

    /// A source line per declaration: `P a.b` provides, `R a.b` requires,
    /// `K goog_module|provide|esm` sets the kind, `L` marks legacy.
    fn line_facts(path: &Path, source: &str) -> Result<FileFacts, ExtractError> {
        let mut facts = FileFacts::default();
        let mut offset = 0;
        for line in source.split_inclusive('\n') {
            let text = line.trim_end();
            let span = Span::new(offset, offset + text.len());
            let mut words = text.split_whitespace();
            match (words.next(), words.next()) {
                (Some("P"), Some(ns)) => facts.provides.push(ProvideDecl {
                    namespace: ns.to_string(),
                    statement: span,
                    binding: None,
                }),
                (Some("R"), Some(ns)) => facts.requires.push(RequireDecl {
                    namespace: ns.to_string(),
                    statement: span,
                    expression: span,
                    used: false,
                    insert_at: span.start,
                    form: RequireForm::Require,
                }),
                (Some("K"), Some(kind)) => facts.kinds.push(KindSignal {
                    kind: serde_json::from_value(serde_json::Value::String(kind.to_string()))
                        .map_err(|e| ExtractError::Syntax {
                            path: path.to_path_buf(),
                            message: e.to_string(),
                        })?,
                    span: Some(span),
                }),
                (Some("L"), None) => facts.legacy_namespace = Some(span),
                (Some("!"), _) => {
                    return Err(ExtractError::Syntax {
                        path: path.to_path_buf(),
                        message: "bang".to_string(),
                    })
                }
                _ => {}
            }
            offset += line.len();
        }
        Ok(facts)
    }

    fn tree_with_library(lib: Option<&str>) -> Tree {
        let set = GlobSourceSet::with_patterns("/src", &["**/*.js".to_string()]).unwrap();
        Tree::new(
            TreeConfig {
                base_library: lib.map(PathBuf::from),
            },
            Box::new(set),
            Box::new(line_facts),
        )
    }

    fn tree() -> Tree {
        tree_with_library(Some("/src/lib"))
    }

    fn load(tree: &mut Tree, path: &str, source: &str) {
        tree.load(Path::new(path), Some(source)).unwrap();
    }

    mod registration_tests {
        use super::*;

        #[test]
        fn first_owner_wins() {
            let mut t = tree();
            load(&mut t, "/src/a.js", "K provide\nP a\n");
            load(&mut t, "/src/b.js", "K provide\nP a\n");
            assert_eq!(t.owner_of("a").unwrap().request(), Path::new("/src/a.js"));
            let diags = t.diagnostics();
            assert_eq!(diags.len(), 1);
            assert_eq!(diags[0].kind, DiagnosticKind::NamespaceDuplicate);
            assert_eq!(diags[0].file.as_deref(), Some(Path::new("/src/b.js")));
        }

        #[test]
        fn removing_owner_promotes_duplicate() {
            let mut t = tree();
            load(&mut t, "/src/a.js", "K provide\nP a\n");
            load(&mut t, "/src/b.js", "K provide\nP a\n");
            assert!(t.remove(Path::new("/src/a.js")));
            assert_eq!(t.owner_of("a").unwrap().request(), Path::new("/src/b.js"));
            assert!(t.diagnostics().is_empty());
        }

        #[test]
        fn hierarchy_tracks_owners() {
            let mut t = tree();
            load(&mut t, "/src/a.js", "K provide\nP a.b.c\n");
            let node = t.namespace_node("a.b").unwrap();
            assert_eq!(node.full_name, "a.b");
            assert!(node.children.contains_key("c"));
            t.remove(Path::new("/src/a.js"));
            assert!(t.namespace_node("a").is_none());
        }

        #[test]
        fn reload_replaces_registrations() {
            let mut t = tree();
            load(&mut t, "/src/a.js", "K provide\nP a\n");
            load(&mut t, "/src/a.js", "K provide\nP b\n");
            let owned: Vec<&str> = t.namespaces().map(|(ns, _)| ns).collect();
            assert_eq!(owned, vec!["b"]);
        }
    }

    mod load_tests {
        use super::*;

        #[test]
        fn unreadable_batch_leaves_graph_untouched() {
            let mut t = tree();
            load(&mut t, "/src/a.js", "K provide\nP a\n");
            let delta = ScanDelta {
                removed: BTreeSet::from([PathBuf::from("/src/a.js")]),
                added: BTreeSet::from([PathBuf::from("/src/does-not-exist.js")]),
                ..Default::default()
            };
            let err = t.apply_scan(&delta).unwrap_err();
            assert!(matches!(err, GraphError::Io { .. }));
            assert_eq!(
                t.owner_of("a").unwrap().request(),
                Path::new("/src/a.js")
            );
            assert!(t.namespace_node("a").is_some());
        }

        #[test]
        fn identical_source_is_unchanged() {
            let mut t = tree();
            let src = "K provide\nP a\n";
            assert_eq!(
                t.load(Path::new("/src/a.js"), Some(src)).unwrap(),
                LoadOutcome::Loaded
            );
            assert_eq!(
                t.load(Path::new("/src/a.js"), Some(src)).unwrap(),
                LoadOutcome::Unchanged
            );
        }

        #[test]
        fn parse_failure_leaves_record_unloaded() {
            let mut t = tree();
            let outcome = t.load(Path::new("/src/a.js"), Some("!\n")).unwrap();
            assert_eq!(outcome, LoadOutcome::Failed);
            let record = t.module(Path::new("/src/a.js")).unwrap();
            assert_eq!(record.state(), ModuleState::Unload);
            assert_eq!(t.diagnostics()[0].kind, DiagnosticKind::ParseFailed);
        }

        #[test]
        fn excluded_paths_are_rejected() {
            let mut t = tree();
            let err = t.load(Path::new("/src/a.ts"), Some("")).unwrap_err();
            assert!(matches!(err, GraphError::OutOfScope { .. }));
        }

        #[test]
        fn unknown_paths_join_the_source_set() {
            let mut t = tree();
            let path = Path::new("/other/x.js");
            assert_eq!(t.scope(path), Verdict::Unknown);
            load(&mut t, "/other/x.js", "K provide\nP x\n");
            assert!(t.is_in_scope(path));
        }

        #[test]
        fn library_is_always_in_scope() {
            let t = tree_with_library(Some("/lib"));
            assert!(t.is_in_scope(Path::new("/lib/goog/base.ts")));
        }

        #[test]
        fn out_of_range_facts_fail_fast() {
            let bundle = {
                let mut b = FactsBundle::new();
                b.insert(
                    "/src/a.js",
                    FileFacts {
                        provides: vec![ProvideDecl {
                            namespace: "a".to_string(),
                            statement: Span::new(0, 99),
                            binding: None,
                        }],
                        ..Default::default()
                    },
                );
                b
            };
            let mut t = Tree::new(
                TreeConfig::default(),
                Box::new(GlobSourceSet::with_patterns("/src", &["*.js".to_string()]).unwrap()),
                Box::new(bundle),
            );
            let err = t.load(Path::new("/src/a.js"), Some("short")).unwrap_err();
            assert!(matches!(err, GraphError::Contract { .. }));
        }

        #[test]
        fn inverted_fact_ranges_fail_fast() {
            let json = r#"{
                "/src/a.js": {
                    "kinds": [{"kind": "goog_module"}],
                    "provides": [{"namespace": "a", "statement": {"start": 0, "end": 4}}],
                    "requires": [{
                        "namespace": "b",
                        "statement": {"start": 0, "end": 10},
                        "expression": {"start": 8, "end": 4},
                        "used": true,
                        "insert_at": 0
                    }]
                }
            }"#;
            let bundle = FactsBundle::from_json(json, Path::new("/")).unwrap();
            let mut t = Tree::new(
                TreeConfig::default(),
                Box::new(GlobSourceSet::with_patterns("/src", &["*.js".to_string()]).unwrap()),
                Box::new(bundle),
            );
            let err = t
                .load(Path::new("/src/a.js"), Some("const x = 1;"))
                .unwrap_err();
            match err {
                GraphError::Contract { message, .. } => {
                    assert!(message.contains("ends before it starts"), "{message}")
                }
                other => panic!("unexpected {other:?}"),
            }
            assert!(t.owner_of("a").is_none());
        }

        #[test]
        fn dependency_records_prime_and_never_overwrite() {
            let mut t = tree();
            let record = DependencyRecord::new("/src/a.js")
                .provide("a")
                .require("b")
                .kind(ModuleKind::Provide);
            assert!(t.load_record(&record));
            assert_eq!(
                t.module(Path::new("/src/a.js")).unwrap().state(),
                ModuleState::Cache
            );
            assert!(t.owner_of("a").is_some());

            load(&mut t, "/src/a.js", "K provide\nP a\n");
            assert!(!t.load_record(&record));
            let module = t.module(Path::new("/src/a.js")).unwrap();
            assert_eq!(module.state(), ModuleState::Load);
            assert!(module.requires().is_empty());
        }

        #[test]
        fn resolve_by_namespace_and_path() {
            let mut t = tree();
            load(&mut t, "/src/a.js", "K provide\nP a.b\n");
            let by_ns = t.resolve(&ModuleKey::namespace("a.b")).unwrap().unwrap();
            assert_eq!(by_ns.request(), Path::new("/src/a.js"));
            let by_path = t
                .resolve(&ModuleKey::path("/src/./a.js"))
                .unwrap()
                .unwrap();
            assert_eq!(by_path.primary_namespace(), Some("a.b"));
            assert!(t.resolve(&ModuleKey::namespace("zz")).unwrap().is_none());
        }

        #[test]
        fn dependency_records_round_trip() {
            let mut t = tree();
            load(&mut t, "/src/a.js", "K provide\nP a\nR b\n");
            let records = t.dependency_records();
            assert_eq!(records.len(), 1);
            assert_eq!(records[0].requires, vec!["b".to_string()]);
        }
    }

    mod validate_tests {
        use super::*;

        #[test]
        fn linear_chain_validates() {
            let mut t = tree();
            load(&mut t, "/src/a.js", "K provide\nP a\nR b\n");
            load(&mut t, "/src/b.js", "K provide\nP b\nR c\n");
            load(&mut t, "/src/c.js", "K provide\nP c\nR d\n");
            load(&mut t, "/src/d.js", "K provide\nP d\n");
            let v = t.validate().unwrap();
            assert!(v.passed());
            assert_eq!(v.modules, 4);
        }

        const DEEP: usize = 20_000;

        fn deep_chain(t: &mut Tree, close_loop: bool) {
            for i in 0..DEEP {
                let next = if i + 1 < DEEP {
                    Some(i + 1)
                } else if close_loop {
                    Some(0)
                } else {
                    None
                };
                let mut source = format!("K provide\nP m{i}\n");
                if let Some(next) = next {
                    source.push_str(&format!("R m{next}\n"));
                }
                load(t, &format!("/src/m{i}.js"), &source);
            }
        }

        #[test]
        fn deep_chain_validates_without_recursion() {
            let mut t = tree();
            deep_chain(&mut t, false);
            let v = t.validate().unwrap();
            assert!(v.passed());
            assert_eq!(v.modules, DEEP);
        }

        #[test]
        fn deep_cycle_names_every_member() {
            let mut t = tree();
            deep_chain(&mut t, true);
            match t.validate() {
                Err(GraphError::CircularReference { members }) => {
                    assert_eq!(members.len(), DEEP);
                    assert_eq!(members[0], "m0");
                }
                other => panic!("expected cycle, got {other:?}"),
            }
        }

        #[test]
        fn library_module_heading_a_deep_chain_is_repaired() {
            let mut t = tree();
            load(&mut t, "/src/lib/head.js", "K goog_module\nP head\nR m0\n");
            deep_chain(&mut t, false);
            let v = t.validate().unwrap();
            assert_eq!(v.repaired, vec![PathBuf::from("/src/lib/head.js")]);
        }

        #[test]
        fn cycle_names_its_members() {
            let mut t = tree();
            load(&mut t, "/src/e.js", "K provide\nP e\nR f\n");
            load(&mut t, "/src/f.js", "K provide\nP f\nR g\n");
            load(&mut t, "/src/g.js", "K provide\nP g\nR f\n");
            match t.validate() {
                Err(GraphError::CircularReference { members }) => {
                    let set: BTreeSet<String> = members.into_iter().collect();
                    assert_eq!(
                        set,
                        BTreeSet::from(["f".to_string(), "g".to_string()])
                    );
                }
                other => panic!("expected cycle, got {other:?}"),
            }
            assert!(t
                .diagnostics()
                .iter()
                .any(|d| d.kind == DiagnosticKind::CircularReference));
        }

        #[test]
        fn self_require_is_recorded() {
            let mut t = tree();
            load(&mut t, "/src/a.js", "K provide\nP a\nR a\n");
            let v = t.validate().unwrap();
            assert!(!v.passed());
            let d = &t.diagnostics()[0];
            assert_eq!(d.kind, DiagnosticKind::RequireSelf);
            assert_eq!(d.span, Some(Span::new(14, 17)));
        }

        #[test]
        fn unknown_require_is_recorded() {
            let mut t = tree();
            load(&mut t, "/src/a.js", "K provide\nP a\nR nowhere\n");
            let v = t.validate().unwrap();
            assert_eq!(v.errors, 1);
            assert_eq!(t.diagnostics()[0].kind, DiagnosticKind::RequireUnknown);
        }

        #[test]
        fn unexposed_module_outside_library_is_fatal() {
            let mut t = tree();
            load(&mut t, "/src/m.js", "K goog_module\nP m\nR p\n");
            load(&mut t, "/src/p.js", "K provide\nP p\n");
            match t.validate() {
                Err(GraphError::UnexposedLegacy { module, chain }) => {
                    assert_eq!(module, "m");
                    assert_eq!(chain, vec!["m".to_string(), "p".to_string()]);
                }
                other => panic!("expected unexposed legacy, got {other:?}"),
            }
        }

        #[test]
        fn legacy_module_is_fine() {
            let mut t = tree();
            load(&mut t, "/src/m.js", "K goog_module\nP m\nL\nR p\n");
            load(&mut t, "/src/p.js", "K provide\nP p\n");
            assert!(t.validate().unwrap().passed());
        }

        #[test]
        fn library_module_is_repaired() {
            let mut t = tree();
            load(&mut t, "/src/lib/m.js", "K goog_module\nP goog.m\nR p\n");
            load(&mut t, "/src/p.js", "K provide\nP p\n");
            let v = t.validate().unwrap();
            assert_eq!(v.repaired, vec![PathBuf::from("/src/lib/m.js")]);
            assert!(t.module(Path::new("/src/lib/m.js")).unwrap().is_legacy());
            // a second pass has nothing left to repair
            assert!(t.validate().unwrap().repaired.is_empty());
        }

        #[test]
        fn transitive_reach_through_finished_nodes() {
            let mut t = tree();
            // x is walked first and finishes having reached p; m reaches x later
            load(&mut t, "/src/a_x.js", "K goog_module\nP x\nL\nR p\n");
            load(&mut t, "/src/b_p.js", "K provide\nP p\n");
            load(&mut t, "/src/c_m.js", "K goog_module\nP m\nR x\n");
            match t.validate() {
                Err(GraphError::UnexposedLegacy { chain, .. }) => {
                    assert_eq!(chain, vec!["m", "x", "p"]);
                }
                other => panic!("expected unexposed legacy, got {other:?}"),
            }
        }

        #[test]
        fn type_only_requires_are_not_edges() {
            let bundle = {
                let mut b = FactsBundle::new();
                let provide = |ns: &str| ProvideDecl {
                    namespace: ns.to_string(),
                    statement: Span::new(0, 1),
                    binding: None,
                };
                let require_type = |ns: &str| RequireDecl {
                    namespace: ns.to_string(),
                    statement: Span::new(0, 1),
                    expression: Span::new(0, 1),
                    used: false,
                    insert_at: 0,
                    form: RequireForm::RequireType,
                };
                b.insert(
                    "/src/a.js",
                    FileFacts {
                        provides: vec![provide("a")],
                        requires: vec![require_type("b")],
                        ..Default::default()
                    },
                );
                b.insert(
                    "/src/b.js",
                    FileFacts {
                        provides: vec![provide("b")],
                        requires: vec![require_type("a")],
                        ..Default::default()
                    },
                );
                b
            };
            let mut t = Tree::new(
                TreeConfig::default(),
                Box::new(GlobSourceSet::with_patterns("/src", &["*.js".to_string()]).unwrap()),
                Box::new(bundle),
            );
            t.load(Path::new("/src/a.js"), Some("x")).unwrap();
            t.load(Path::new("/src/b.js"), Some("y")).unwrap();
            assert!(t.validate().unwrap().passed());
        }
    }
}
