//! Module records: the per-file state of the namespace graph.
//!
//! A [`ModuleRecord`] holds everything known about one source file: its
//! kind, the namespaces it provides and requires, compile-time constants,
//! and the namespace references found in its code. It enforces the
//! per-file invariants (grammar, reserved roots, no duplicate declarations,
//! a single kind) while the [`Tree`](crate::tree::Tree) enforces the
//! cross-file ones.
//!
//! # Lifecycle
//!
//! ```text
//! Unload --(parse ok)--> Load
//! Unload --(dependency record)--> Cache --(parse ok)--> Load
//! any    --(unload)--> Unload
//! ```
//!
//! A parse failure leaves the record in `Unload`.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::diagnostics::{Diagnostic, DiagnosticKind};
use crate::edit::Span;
use crate::facts::{DefineValue, FileFacts, RequireDecl, RequireForm, UsageSite};
use crate::namespace::{self, NamespaceError};

// ============================================================================
// Content hash
// ============================================================================

/// SHA-256 of a file's text, hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub String);

impl ContentHash {
    pub fn compute(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        ContentHash(hex::encode(hasher.finalize()))
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Enums
// ============================================================================

/// Load state of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleState {
    /// No facts.
    Unload,
    /// Primed from a dependency record; provides/requires only.
    Cache,
    /// Fully parsed.
    Load,
}

/// The module convention a file is written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleKind {
    /// `goog.module('ns')` file (legacy-declarative).
    GoogModule,
    /// ECMAScript module.
    Esm,
    /// CommonJS module.
    CommonJs,
    /// `goog.provide('ns')` file (plain-declaring).
    Provide,
    /// Anything else.
    Script,
}

impl ModuleKind {
    /// The two kinds whose namespaces live on the shared global object.
    pub fn is_declarative(self) -> bool {
        matches!(self, ModuleKind::GoogModule | ModuleKind::Provide)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ModuleKind::GoogModule => "goog_module",
            ModuleKind::Esm => "esm",
            ModuleKind::CommonJs => "common_js",
            ModuleKind::Provide => "provide",
            ModuleKind::Script => "script",
        }
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a namespace reference relates to a module's own declarations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageType {
    Provide,
    Require,
    /// Shares a root with a declared namespace, constructed implicitly.
    Implicit,
    Unknown,
}

/// Result of [`ModuleRecord::classify`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Classification {
    #[serde(rename = "type")]
    pub usage: UsageType,
    pub owner: Option<String>,
}

impl Classification {
    fn unknown() -> Self {
        Classification {
            usage: UsageType::Unknown,
            owner: None,
        }
    }

    fn of(usage: UsageType, owner: &str) -> Self {
        Classification {
            usage,
            owner: Some(owner.to_string()),
        }
    }
}

// ============================================================================
// Facts held by a record
// ============================================================================

/// A namespace this module owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvideFact {
    pub namespace: String,
    /// Declaring statement; absent for facts primed from dependency records.
    pub statement: Option<Span>,
    /// Local exported binding, if declared.
    pub binding: Option<String>,
    /// Ancestors this declaration constructs, root first.
    pub implicit: Vec<String>,
}

impl ProvideFact {
    fn order_key(&self, index: usize) -> (usize, usize) {
        (self.statement.map_or(usize::MAX, |s| s.start), index)
    }
}

/// A dependency of this module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequireFact {
    pub namespace: String,
    pub statement: Option<Span>,
    pub expression: Option<Span>,
    pub used: bool,
    pub insert_at: Option<usize>,
    pub form: RequireForm,
    /// False for placeholders inferred from a dependency index.
    pub confirmed: bool,
}

impl RequireFact {
    /// A placeholder for a dependency known only from an index.
    pub fn unconfirmed(namespace: impl Into<String>) -> Self {
        RequireFact {
            namespace: namespace.into(),
            statement: None,
            expression: None,
            used: false,
            insert_at: None,
            form: RequireForm::Require,
            confirmed: false,
        }
    }

    /// A dependency declared in source.
    pub fn confirmed(decl: &RequireDecl) -> Self {
        RequireFact {
            namespace: decl.namespace.clone(),
            statement: Some(decl.statement),
            expression: Some(decl.expression),
            used: decl.used,
            insert_at: Some(decl.insert_at),
            form: decl.form,
            confirmed: true,
        }
    }
}

/// A compile-time constant declared in this module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefineFact {
    pub name: String,
    pub site: Span,
    pub value: DefineValue,
    pub missing_target: bool,
}

// ============================================================================
// Errors
// ============================================================================

/// Why a namespace root is off limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictReason {
    /// Root is a builtin global.
    Builtin,
    /// Root is the system root and the file is outside the base library.
    SystemRoot,
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictReason::Builtin => write!(f, "root is a builtin identifier"),
            ConflictReason::SystemRoot => {
                write!(f, "system root is reserved for the base library")
            }
        }
    }
}

/// Per-file invariant violations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error(transparent)]
    InvalidNamespace(#[from] NamespaceError),

    #[error("namespace '{namespace}' conflicts: {reason}")]
    NamespaceConflict {
        namespace: String,
        reason: ConflictReason,
    },

    #[error("namespace '{namespace}' is declared more than once")]
    NamespaceDuplicate { namespace: String },

    #[error("module already marked as {existing}, cannot mark as {attempted}")]
    KindConflict {
        existing: ModuleKind,
        attempted: ModuleKind,
    },
}

impl RecordError {
    pub fn diagnostic_kind(&self) -> DiagnosticKind {
        match self {
            RecordError::InvalidNamespace(_) => DiagnosticKind::InvalidNamespace,
            RecordError::NamespaceConflict { .. } => DiagnosticKind::NamespaceConflict,
            RecordError::NamespaceDuplicate { .. } => DiagnosticKind::NamespaceDuplicate,
            RecordError::KindConflict { .. } => DiagnosticKind::KindConflict,
        }
    }

    fn namespace(&self) -> Option<&str> {
        match self {
            RecordError::InvalidNamespace(NamespaceError::Invalid { name }) => Some(name),
            RecordError::NamespaceConflict { namespace, .. }
            | RecordError::NamespaceDuplicate { namespace } => Some(namespace),
            RecordError::KindConflict { .. } => None,
        }
    }
}

// ============================================================================
// ModuleRecord
// ============================================================================

/// Parsed state of one source file.
#[derive(Debug)]
pub struct ModuleRecord {
    request: PathBuf,
    in_library: bool,
    state: ModuleState,
    kind: Option<ModuleKind>,
    provides: IndexMap<String, ProvideFact>,
    requires: BTreeMap<String, RequireFact>,
    legacy: bool,
    legacy_statement: Option<Span>,
    namespace_usages: BTreeMap<String, Vec<UsageSite>>,
    defines: Vec<DefineFact>,
    language: Option<String>,
    source: Option<String>,
    source_hash: Option<ContentHash>,
    diagnostics: Vec<Diagnostic>,
    classify_cache: RefCell<HashMap<String, Classification>>,
}

impl ModuleRecord {
    /// Create an unloaded record for `request`.
    ///
    /// `in_library` marks files under the base-library subtree, which may
    /// declare system namespaces.
    pub fn new(request: impl Into<PathBuf>, in_library: bool) -> Self {
        ModuleRecord {
            request: request.into(),
            in_library,
            state: ModuleState::Unload,
            kind: None,
            provides: IndexMap::new(),
            requires: BTreeMap::new(),
            legacy: false,
            legacy_statement: None,
            namespace_usages: BTreeMap::new(),
            defines: Vec::new(),
            language: None,
            source: None,
            source_hash: None,
            diagnostics: Vec::new(),
            classify_cache: RefCell::new(HashMap::new()),
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn request(&self) -> &Path {
        &self.request
    }

    pub fn in_library(&self) -> bool {
        self.in_library
    }

    pub fn state(&self) -> ModuleState {
        self.state
    }

    /// Declared kind, if any signal was seen.
    pub fn kind(&self) -> Option<ModuleKind> {
        self.kind
    }

    /// Declared kind, `Script` when nothing was declared.
    pub fn effective_kind(&self) -> ModuleKind {
        self.kind.unwrap_or(ModuleKind::Script)
    }

    pub fn provides(&self) -> &IndexMap<String, ProvideFact> {
        &self.provides
    }

    pub fn requires(&self) -> &BTreeMap<String, RequireFact> {
        &self.requires
    }

    pub fn is_legacy(&self) -> bool {
        self.legacy
    }

    pub fn legacy_statement(&self) -> Option<Span> {
        self.legacy_statement
    }

    pub fn namespace_usages(&self) -> &BTreeMap<String, Vec<UsageSite>> {
        &self.namespace_usages
    }

    pub fn defines(&self) -> &[DefineFact] {
        &self.defines
    }

    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn source_hash(&self) -> Option<&ContentHash> {
        self.source_hash.as_ref()
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// First provided namespace, used to name the module in reports.
    pub fn primary_namespace(&self) -> Option<&str> {
        self.provides.keys().next().map(String::as_str)
    }

    /// Name used in graph-level reports: primary namespace or path.
    pub fn display_name(&self) -> String {
        self.primary_namespace()
            .map(str::to_string)
            .unwrap_or_else(|| self.request.display().to_string())
    }

    /// Required namespaces that are runtime edges (not type-only).
    pub fn runtime_requires(&self) -> impl Iterator<Item = &RequireFact> {
        self.requires.values().filter(|r| !r.form.is_type_only())
    }

    /// Returns true if `source` is already loaded verbatim.
    pub fn is_current(&self, source: &str) -> bool {
        self.state == ModuleState::Load
            && self.source_hash.as_ref() == Some(&ContentHash::compute(source.as_bytes()))
    }

    // ------------------------------------------------------------------
    // Declarations
    // ------------------------------------------------------------------

    /// Mark the module kind. A second, different kind is rejected.
    pub fn set_kind(&mut self, kind: ModuleKind) -> Result<(), RecordError> {
        match self.kind {
            Some(existing) if existing != kind => Err(RecordError::KindConflict {
                existing,
                attempted: kind,
            }),
            _ => {
                self.kind = Some(kind);
                self.invalidate();
                Ok(())
            }
        }
    }

    /// Opt into exposing the provided namespace globally.
    pub fn set_legacy(&mut self, statement: Option<Span>) {
        self.legacy = true;
        if statement.is_some() {
            self.legacy_statement = statement;
        }
    }

    /// Declare a provided namespace.
    ///
    /// The caller registers the namespace with the owning tree on success.
    pub fn declare_provide(
        &mut self,
        name: &str,
        statement: Option<Span>,
        binding: Option<String>,
    ) -> Result<(), RecordError> {
        namespace::validate(name)?;
        if namespace::is_reserved_root(name) {
            return Err(RecordError::NamespaceConflict {
                namespace: name.to_string(),
                reason: ConflictReason::Builtin,
            });
        }
        if namespace::is_system(name) && !self.in_library {
            return Err(RecordError::NamespaceConflict {
                namespace: name.to_string(),
                reason: ConflictReason::SystemRoot,
            });
        }
        if self.provides.contains_key(name) {
            return Err(RecordError::NamespaceDuplicate {
                namespace: name.to_string(),
            });
        }
        self.provides.insert(
            name.to_string(),
            ProvideFact {
                namespace: name.to_string(),
                statement,
                binding,
                implicit: Vec::new(),
            },
        );
        self.invalidate();
        Ok(())
    }

    /// Declare a dependency.
    ///
    /// Returns `Ok(false)` when an unconfirmed fact is dropped because a
    /// confirmed one already exists.
    pub fn declare_require(&mut self, fact: RequireFact) -> Result<bool, RecordError> {
        namespace::validate(&fact.namespace)?;
        if let Some(existing) = self.requires.get(&fact.namespace) {
            if existing.confirmed {
                if fact.confirmed {
                    return Err(RecordError::NamespaceDuplicate {
                        namespace: fact.namespace,
                    });
                }
                return Ok(false);
            }
        }
        self.requires.insert(fact.namespace.clone(), fact);
        self.invalidate();
        Ok(true)
    }

    /// Record a compile-time constant.
    pub fn add_define(&mut self, define: DefineFact) {
        self.defines.push(define);
    }

    /// Record a namespace reference site. Ignored outside declarative kinds.
    pub fn record_usage(&mut self, site: UsageSite) -> bool {
        if !self.effective_kind().is_declarative() {
            return false;
        }
        self.namespace_usages
            .entry(namespace::root(&site.namespace).to_string())
            .or_default()
            .push(site);
        true
    }

    fn invalidate(&self) {
        self.classify_cache.borrow_mut().clear();
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Classify a namespace reference against this module's declarations.
    pub fn classify(&self, name: &str) -> Classification {
        if let Some(hit) = self.classify_cache.borrow().get(name) {
            return hit.clone();
        }
        let result = self.classify_uncached(name);
        self.classify_cache
            .borrow_mut()
            .insert(name.to_string(), result.clone());
        result
    }

    fn classify_uncached(&self, name: &str) -> Classification {
        if !self.effective_kind().is_declarative() {
            return Classification::unknown();
        }
        for prefix in namespace::prefixes(name) {
            if self.requires.contains_key(prefix) {
                return Classification::of(UsageType::Require, prefix);
            }
            if self.provides.contains_key(prefix) {
                return Classification::of(UsageType::Provide, prefix);
            }
        }
        let root = namespace::root(name);
        let shares_root = self
            .requires
            .keys()
            .chain(self.provides.keys())
            .any(|declared| namespace::root(declared) == root);
        if shares_root {
            Classification::of(UsageType::Implicit, root)
        } else {
            Classification::unknown()
        }
    }

    /// Compute, per provide, the ancestors it has to construct.
    ///
    /// Provides are visited in declaration order. An ancestor is skipped if
    /// it is required, provided, or already constructed by an earlier
    /// provide of this file.
    pub fn compute_implicit_ancestors(&mut self) {
        let mut order: Vec<(usize, usize)> = self
            .provides
            .values()
            .enumerate()
            .map(|(i, p)| (p.order_key(i).0, i))
            .collect();
        order.sort();

        let mut constructed: BTreeSet<String> = BTreeSet::new();
        let mut chains: Vec<(usize, Vec<String>)> = Vec::with_capacity(order.len());
        for (_, index) in order {
            let Some((name, _)) = self.provides.get_index(index) else {
                continue;
            };
            let chain: Vec<String> = namespace::ancestors(name)
                .into_iter()
                .filter(|a| {
                    !self.requires.contains_key(*a)
                        && !self.provides.contains_key(*a)
                        && !constructed.contains(*a)
                })
                .map(str::to_string)
                .collect();
            constructed.extend(chain.iter().cloned());
            chains.push((index, chain));
        }
        for (index, chain) in chains {
            if let Some((_, fact)) = self.provides.get_index_mut(index) {
                fact.implicit = chain;
            }
        }
    }

    /// Provides in declaration order.
    pub fn provides_in_order(&self) -> Vec<&ProvideFact> {
        let mut facts: Vec<(usize, &ProvideFact)> = self.provides.values().enumerate().collect();
        facts.sort_by_key(|(i, p)| p.order_key(*i));
        facts.into_iter().map(|(_, p)| p).collect()
    }

    // ------------------------------------------------------------------
    // Loading
    // ------------------------------------------------------------------

    /// Load parsed facts for `source`.
    ///
    /// The record must be unloaded first (the tree takes care of it). Fact
    /// level violations become diagnostics; the load itself always
    /// succeeds. Returns the namespaces that were declared.
    pub fn load(&mut self, source: &str, facts: FileFacts) -> Vec<String> {
        debug_assert_eq!(self.state, ModuleState::Unload);
        self.source_hash = Some(ContentHash::compute(source.as_bytes()));
        self.source = Some(source.to_string());
        self.language = facts.language;

        for signal in &facts.kinds {
            if let Err(err) = self.set_kind(signal.kind) {
                self.report(&err, signal.span);
            }
        }
        if let Some(statement) = facts.legacy_namespace {
            self.set_legacy(Some(statement));
        }

        let mut declared = Vec::new();
        for decl in facts.provides {
            match self.declare_provide(&decl.namespace, Some(decl.statement), decl.binding) {
                Ok(()) => declared.push(decl.namespace),
                Err(err) => self.report(&err, Some(decl.statement)),
            }
        }

        for decl in &facts.requires {
            if decl.form.is_deprecated() {
                self.diagnostics.push(
                    Diagnostic::new(DiagnosticKind::DeprecatedForm)
                        .with_file(&self.request)
                        .with_span(decl.statement)
                        .with_namespace(&decl.namespace),
                );
            }
            if let Err(err) = self.declare_require(RequireFact::confirmed(decl)) {
                self.report(&err, Some(decl.statement));
            }
        }

        for define in facts.defines {
            self.add_define(DefineFact {
                name: define.name,
                site: define.site,
                value: define.value,
                missing_target: define.missing_target,
            });
        }

        for site in facts.usages {
            self.check_usage(&site);
            self.record_usage(site);
        }

        self.compute_implicit_ancestors();
        self.state = ModuleState::Load;
        declared
    }

    /// Prime the record from a dependency index entry.
    ///
    /// Requires become unconfirmed placeholders. Returns the namespaces that
    /// were declared.
    pub fn load_cached(
        &mut self,
        provides: &[String],
        requires: &[String],
        kind: Option<ModuleKind>,
        language: Option<String>,
    ) -> Vec<String> {
        debug_assert_eq!(self.state, ModuleState::Unload);
        self.language = language;
        if let Some(kind) = kind {
            if let Err(err) = self.set_kind(kind) {
                self.report(&err, None);
            }
        }
        let mut declared = Vec::new();
        for name in provides {
            match self.declare_provide(name, None, None) {
                Ok(()) => declared.push(name.clone()),
                Err(err) => self.report(&err, None),
            }
        }
        for name in requires {
            if let Err(err) = self.declare_require(RequireFact::unconfirmed(name.clone())) {
                self.report(&err, None);
            }
        }
        self.compute_implicit_ancestors();
        self.state = ModuleState::Cache;
        declared
    }

    /// Clear all facts. Idempotent. Returns the namespaces that were
    /// provided so the tree can drop their registrations.
    pub fn unload(&mut self) -> Vec<String> {
        let provided: Vec<String> = self.provides.keys().cloned().collect();
        self.state = ModuleState::Unload;
        self.kind = None;
        self.provides.clear();
        self.requires.clear();
        self.legacy = false;
        self.legacy_statement = None;
        self.namespace_usages.clear();
        self.defines.clear();
        self.language = None;
        self.source = None;
        self.source_hash = None;
        self.diagnostics.clear();
        self.invalidate();
        provided
    }

    /// Attach a diagnostic to this record.
    pub fn push_diagnostic(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    /// Drop diagnostics of `kind` about `namespace`.
    pub fn retract_diagnostic(&mut self, kind: DiagnosticKind, namespace: &str) {
        self.diagnostics
            .retain(|d| !(d.kind == kind && d.namespace.as_deref() == Some(namespace)));
    }

    fn report(&mut self, err: &RecordError, span: Option<Span>) {
        let mut diagnostic = Diagnostic::new(err.diagnostic_kind()).with_file(&self.request);
        if let Some(span) = span {
            diagnostic = diagnostic.with_span(span);
        }
        if let Some(ns) = err.namespace() {
            diagnostic = diagnostic.with_namespace(ns);
        }
        self.diagnostics.push(diagnostic);
    }

    fn check_usage(&mut self, site: &UsageSite) {
        if !self.effective_kind().is_declarative() {
            self.diagnostics.push(
                Diagnostic::new(DiagnosticKind::NamespaceOutsideModule)
                    .with_file(&self.request)
                    .with_span(site.span)
                    .with_namespace(&site.namespace),
            );
            return;
        }
        if site.write {
            let class = self.classify(&site.namespace);
            if matches!(class.usage, UsageType::Require | UsageType::Implicit) {
                self.diagnostics.push(
                    Diagnostic::new(DiagnosticKind::NamespaceMutation)
                        .with_file(&self.request)
                        .with_span(site.span)
                        .with_namespace(&site.namespace),
                );
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
