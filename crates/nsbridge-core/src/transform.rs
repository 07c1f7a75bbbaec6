//! Rewriting a module into ESM or CommonJS.
//!
//! [`transform`] turns one loaded module's facts into an [`EditSet`] and
//! applies it. Edits are collected requires first, then provides, usages
//! and defines, and applied as one batch over the untouched original text.
//!
//! ```text
//! goog.provide('a.b');          goog.global.a = goog.global.a || {};
//! goog.require('c.d');    =>    goog.global.a.b = goog.global.a.b || {};
//! a.b.run = c.d.go;             import './c/d.js';
//!                               goog.global.a.b.run = goog.global.c.d.go;
//!                               export default goog.global.a.b;
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Component, Path};
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::edit::{EditError, EditKind, EditOrigin, EditSet, OutputEdit, Span};
use crate::facts::DefineValue;
use crate::namespace::{self, GLOBAL_QUALIFIER, SYSTEM_ROOT};
use crate::record::{ModuleKind, ModuleRecord, ModuleState, UsageType};
use crate::sourcemap::SourceMap;
use crate::tree::Tree;

/// Dotted identifier tokens inside a raw define expression.
static DOTTED_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z_$][A-Za-z0-9_$]*(?:\.[A-Za-z_$][A-Za-z0-9_$]*)*")
        .expect("static regex is valid")
});

// ============================================================================
// Options and output
// ============================================================================

/// Output module syntax.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetFormat {
    #[default]
    Esm,
    #[serde(alias = "cjs")]
    CommonJs,
}

impl TargetFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "esm" => Some(TargetFormat::Esm),
            "commonjs" | "cjs" => Some(TargetFormat::CommonJs),
            _ => None,
        }
    }

    /// The format a module is emitted in: its own when it is natively a
    /// lexical module, `fallback` otherwise.
    pub fn for_module(kind: ModuleKind, fallback: TargetFormat) -> Self {
        match kind {
            ModuleKind::Esm => TargetFormat::Esm,
            ModuleKind::CommonJs => TargetFormat::CommonJs,
            ModuleKind::GoogModule | ModuleKind::Provide | ModuleKind::Script => fallback,
        }
    }
}

impl fmt::Display for TargetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetFormat::Esm => write!(f, "esm"),
            TargetFormat::CommonJs => write!(f, "commonjs"),
        }
    }
}

/// Knobs for [`transform`].
#[derive(Debug, Clone, Default)]
pub struct TransformOptions {
    /// Format for modules that are not natively ESM or CommonJS.
    pub target: TargetFormat,
    /// Overrides for compile-time constants, as JS source text.
    pub defines: BTreeMap<String, String>,
    /// Import the system binding into every file outside the base library.
    pub global_import: bool,
    /// Produce a source map.
    pub source_maps: bool,
}

/// A rewritten module.
#[derive(Debug, Clone, Serialize)]
pub struct TransformOutput {
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub map: Option<SourceMap>,
    pub format: TargetFormat,
    pub edits: Vec<OutputEdit>,
}

/// Why a module could not be rewritten.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("{} is not loaded", path.display())]
    NotLoaded { path: std::path::PathBuf },

    #[error("required namespace '{namespace}' has no owner")]
    Unresolved { namespace: String },

    /// Facts are missing or inconsistent with the source.
    #[error("fact contract violated: {message}")]
    Contract { message: String },

    #[error(transparent)]
    Edit(#[from] EditError),
}

fn contract(message: impl Into<String>) -> TransformError {
    TransformError::Contract {
        message: message.into(),
    }
}

// ============================================================================
// Entry point
// ============================================================================

/// Rewrite the module at `path`, which must be loaded in `tree`.
pub fn transform(
    tree: &Tree,
    path: &Path,
    options: &TransformOptions,
) -> Result<TransformOutput, TransformError> {
    let record = tree
        .module(path)
        .filter(|m| m.state() == ModuleState::Load)
        .ok_or_else(|| TransformError::NotLoaded {
            path: path.to_path_buf(),
        })?;
    let source = record
        .source()
        .ok_or_else(|| contract("loaded module has no source"))?;
    let format = TargetFormat::for_module(record.effective_kind(), options.target);

    let mut rewriter = Rewriter {
        tree,
        record,
        format,
        options,
        edits: EditSet::new(source),
        imported: HashMap::new(),
    };
    rewriter.header()?;
    rewriter.requires()?;
    rewriter.provides()?;
    rewriter.usages()?;
    rewriter.defines()?;
    rewriter.check()?;

    let edits = rewriter.edits;
    let applied = edits.apply();
    let name = path.display().to_string();
    let map = options.source_maps.then(|| {
        let file = path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned());
        SourceMap::from_applied(&applied, source, &name, file.as_deref(), true)
    });
    debug!(path = %name, edits = edits.len(), format = %format, "module transformed");
    Ok(TransformOutput {
        code: applied.code,
        map,
        format,
        edits: edits.materialize(&name),
    })
}

/// Module specifier of `to` relative to the directory of `from`.
pub fn relative_specifier(from: &Path, to: &Path) -> String {
    let from_dir: Vec<Component> = from
        .parent()
        .map(|p| p.components().collect())
        .unwrap_or_default();
    let target: Vec<Component> = to.components().collect();
    let common = from_dir
        .iter()
        .zip(&target)
        .take_while(|(a, b)| a == b)
        .count();

    let mut parts: Vec<String> = Vec::new();
    parts.extend(std::iter::repeat_n("..".to_string(), from_dir.len() - common));
    parts.extend(
        target[common..]
            .iter()
            .map(|c| c.as_os_str().to_string_lossy().into_owned()),
    );
    let joined = parts.join("/");
    if joined.starts_with("..") {
        joined
    } else {
        format!("./{}", joined)
    }
}

// ============================================================================
// Rewriter
// ============================================================================

struct Rewriter<'a> {
    tree: &'a Tree,
    record: &'a ModuleRecord,
    format: TargetFormat,
    options: &'a TransformOptions,
    edits: EditSet<'a>,
    /// Import emitted per target file, with the name it binds if any.
    imported: HashMap<&'a Path, Option<String>>,
}

impl<'a> Rewriter<'a> {
    fn import_statement(&self, binding: Option<&str>, target: &ModuleRecord) -> String {
        let specifier = relative_specifier(self.record.request(), target.request());
        match (self.format, binding) {
            (TargetFormat::Esm, Some(name)) if target.effective_kind() == ModuleKind::Esm => {
                format!("import * as {} from '{}';\n", name, specifier)
            }
            (TargetFormat::Esm, Some(name)) => {
                format!("import {} from '{}';\n", name, specifier)
            }
            (TargetFormat::Esm, None) => format!("import '{}';\n", specifier),
            (TargetFormat::CommonJs, Some(name)) => {
                format!("const {} = require('{}');\n", name, specifier)
            }
            (TargetFormat::CommonJs, None) => format!("require('{}');\n", specifier),
        }
    }

    fn export_statement(&self, value: &str) -> String {
        match self.format {
            TargetFormat::Esm => format!("export default {};\n", value),
            TargetFormat::CommonJs => format!("module.exports = {};\n", value),
        }
    }

    /// Insert an import unless an equivalent one was already emitted.
    ///
    /// A file imported once under one name and needed again under another
    /// gets an alias of the first binding instead of a second import.
    fn import(
        &mut self,
        pos: usize,
        target: &'a ModuleRecord,
        binding: Option<&str>,
        origin: EditOrigin,
    ) -> Result<(), TransformError> {
        let statement = match (self.imported.get(target.request()), binding) {
            (Some(_), None) => return Ok(()),
            (Some(Some(bound)), Some(name)) if bound == name => return Ok(()),
            (Some(Some(bound)), Some(name)) => format!("const {} = {};\n", name, bound),
            (Some(None) | None, _) => self.import_statement(binding, target),
        };
        self.edits.insert(pos, statement, origin)?;
        let first_binding = match self.imported.get(target.request()) {
            Some(Some(bound)) => Some(bound.clone()),
            _ => binding.map(str::to_string),
        };
        self.imported.insert(target.request(), first_binding);
        Ok(())
    }

    fn header(&mut self) -> Result<(), TransformError> {
        if !self.options.global_import || self.record.in_library() {
            return Ok(());
        }
        let tree = self.tree;
        match tree.owner_of(SYSTEM_ROOT) {
            Some(base) => self.import(0, base, Some(SYSTEM_ROOT), EditOrigin::Header),
            None => {
                debug!("no module provides the system root, skipping global import");
                Ok(())
            }
        }
    }

    fn requires(&mut self) -> Result<(), TransformError> {
        let tree = self.tree;
        let mut requires: Vec<_> = self.record.requires().values().collect();
        requires.sort_by_key(|r| r.statement.map(|s| s.start));
        for require in requires {
            let statement = require
                .statement
                .ok_or_else(|| contract(format!("require '{}' has no statement", require.namespace)))?;
            if require.form.is_type_only() {
                self.edits
                    .clear_statement(statement, "", EditOrigin::Require)?;
                continue;
            }
            let (Some(expression), Some(insert_at)) = (require.expression, require.insert_at)
            else {
                return Err(contract(format!(
                    "require '{}' is missing its expression or insertion point",
                    require.namespace
                )));
            };
            let target = tree
                .owner_of(&require.namespace)
                .ok_or_else(|| TransformError::Unresolved {
                    namespace: require.namespace.clone(),
                })?;
            let plain = target.effective_kind() == ModuleKind::Provide;

            let binding = if require.used && !plain {
                let name = namespace::binding_name(&require.namespace);
                self.edits
                    .replace(expression, name.clone(), EditOrigin::Require)?;
                Some(name)
            } else {
                if require.used {
                    self.edits.replace(
                        expression,
                        namespace::qualify(&require.namespace),
                        EditOrigin::Require,
                    )?;
                } else {
                    self.edits
                        .clear_statement(statement, "", EditOrigin::Require)?;
                }
                None
            };
            self.import(insert_at, target, binding.as_deref(), EditOrigin::Require)?;
        }
        Ok(())
    }

    fn provides(&mut self) -> Result<(), TransformError> {
        let record = self.record;
        let kind = record.effective_kind();
        let constructs = kind == ModuleKind::Provide
            || (kind == ModuleKind::GoogModule && record.is_legacy());
        let mut export: Option<String> = None;
        let mut trailer = String::new();

        for provide in record.provides_in_order() {
            let statement = provide.statement.ok_or_else(|| {
                contract(format!("provide '{}' has no statement", provide.namespace))
            })?;
            let mut text = String::new();
            if constructs {
                for name in provide.implicit.iter().chain([&provide.namespace]) {
                    let qualified = namespace::qualify(name);
                    text.push_str(&format!("{0} = {0} || {{}};\n", qualified));
                }
            }
            match kind {
                ModuleKind::GoogModule => {
                    let binding = match &provide.binding {
                        Some(binding) => binding.clone(),
                        None => {
                            text.push_str("var exports = {};\n");
                            "exports".to_string()
                        }
                    };
                    if record.is_legacy() {
                        trailer.push_str(&format!(
                            "{} = {};\n",
                            namespace::qualify(&provide.namespace),
                            binding
                        ));
                    }
                    if export.is_none() {
                        export = Some(binding);
                    }
                }
                ModuleKind::Provide => {
                    if export.is_none() {
                        export = Some(namespace::qualify(&provide.namespace));
                    }
                }
                ModuleKind::Esm | ModuleKind::CommonJs | ModuleKind::Script => {}
            }
            if !text.is_empty() {
                self.edits
                    .insert(statement.start, text, EditOrigin::Provide)?;
            }
            self.edits
                .clear_statement(statement, "", EditOrigin::Provide)?;
        }

        if let Some(statement) = record.legacy_statement() {
            self.edits
                .clear_statement(statement, "", EditOrigin::Provide)?;
        }
        if let Some(value) = export {
            let source = self.edits.source();
            if !source.is_empty() && !source.ends_with('\n') {
                trailer.insert(0, '\n');
            }
            trailer.push_str(&self.export_statement(&value));
        }
        if !trailer.is_empty() {
            self.edits.append(trailer, EditOrigin::Export);
        }
        Ok(())
    }

    fn usages(&mut self) -> Result<(), TransformError> {
        let record = self.record;
        let kind = record.effective_kind();
        let bridged = kind == ModuleKind::Provide
            || (kind == ModuleKind::GoogModule && record.is_legacy());
        if !bridged {
            return Ok(());
        }
        let replaced = self.replaced_spans();
        for site in record.namespace_usages().values().flatten() {
            if namespace::is_system(&site.namespace) {
                continue;
            }
            if record.classify(&site.namespace).usage == UsageType::Unknown {
                continue;
            }
            if replaced.iter().any(|r| r.contains(&site.span) && !r.is_empty()) {
                continue;
            }
            self.edits
                .insert(site.span.start, GLOBAL_QUALIFIER, EditOrigin::Usage)?;
        }
        Ok(())
    }

    fn defines(&mut self) -> Result<(), TransformError> {
        let record = self.record;
        let values = self.define_values();
        for define in record.defines() {
            let value = values
                .get(define.name.as_str())
                .cloned()
                .unwrap_or_else(|| define.value.text().to_string());
            let value = substitute_defines(&value, &define.name, &values);
            let mut text = format!("{} /* goog.define({}) */", value, define.name);
            if define.missing_target {
                text = format!("{} = {}", namespace::qualify(&define.name), text);
            }
            self.edits.replace(define.site, text, EditOrigin::Define)?;
        }
        Ok(())
    }

    /// Known constant values: declared defaults overridden by options.
    /// Raw expressions are parenthesized for substitution.
    fn define_values(&self) -> BTreeMap<&'a str, String> {
        let mut values: BTreeMap<&'a str, String> = BTreeMap::new();
        for define in self.record.defines() {
            let text = match &define.value {
                DefineValue::Literal(text) => text.clone(),
                DefineValue::Expression(text) => format!("({})", text),
            };
            values.insert(define.name.as_str(), text);
        }
        for (name, value) in &self.options.defines {
            values.insert(name.as_str(), value.clone());
        }
        values
    }

    fn replaced_spans(&self) -> Vec<Span> {
        self.edits
            .edits()
            .iter()
            .filter_map(|e| match &e.kind {
                EditKind::Replace { span, .. } => Some(*span),
                EditKind::InsertAt { .. } => None,
            })
            .collect()
    }

    /// Inserts must not land strictly inside a replaced range.
    fn check(&self) -> Result<(), TransformError> {
        let replaced = self.replaced_spans();
        for edit in self.edits.edits() {
            if let EditKind::InsertAt { pos, .. } = edit.kind {
                if let Some(span) = replaced.iter().find(|s| s.start < pos && pos < s.end) {
                    return Err(contract(format!(
                        "insertion at {} falls inside replaced range {}",
                        pos, span
                    )));
                }
            }
        }
        debug_assert!(
            self.edits.overlapping_replaces().is_empty(),
            "overlapping replaces: {:?}",
            self.edits.overlapping_replaces()
        );
        Ok(())
    }
}

/// Replace dotted tokens naming other constants with their values.
fn substitute_defines(text: &str, own: &str, values: &BTreeMap<&str, String>) -> String {
    DOTTED_TOKEN
        .replace_all(text, |caps: &Captures| {
            let token = &caps[0];
            match values.get(token) {
                Some(value) if token != own => value.clone(),
                _ => token.to_string(),
            }
        })
        .into_owned()
}

// ============================================================================
// Tests
// ============================================================================
