//! Configuration resolution.
//!
//! Values come from four places, lowest precedence first:
//!
//! 1. built-in defaults
//! 2. `nsbridge.json` in the workspace root (or an explicit `--config`)
//! 3. environment variables (`NSBRIDGE_TARGET`, `NSBRIDGE_BASE_LIBRARY`)
//! 4. CLI flags
//!
//! Every resolved value remembers its [`ConfigSource`].

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::diagnostics::{DiagnosticFilter, DiagnosticKind, Severity};
use crate::transform::{TargetFormat, TransformOptions};
use crate::tree::TreeConfig;

/// Project configuration file name.
pub const CONFIG_FILE: &str = "nsbridge.json";

/// Environment variable overriding the target format.
pub const ENV_TARGET: &str = "NSBRIDGE_TARGET";

/// Environment variable overriding the base library location.
pub const ENV_BASE_LIBRARY: &str = "NSBRIDGE_BASE_LIBRARY";

const DEFAULT_INCLUDE: &str = "**/*.js";

// ============================================================================
// Sources
// ============================================================================

/// Where a value came from, ordered by precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConfigSource {
    Default = 0,
    ProjectConfig = 1,
    EnvVar = 2,
    CliFlag = 3,
}

/// A configuration value with its source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

impl<T> ConfigValue<T> {
    pub fn new(value: T, source: ConfigSource) -> Self {
        ConfigValue { value, source }
    }

    /// Keep whichever value has the higher precedence (ties go to `other`).
    pub fn merge(self, other: Self) -> Self {
        if other.source >= self.source {
            other
        } else {
            self
        }
    }
}

/// Errors reading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid value '{value}' for {key}")]
    InvalidValue { key: String, value: String },
}

// ============================================================================
// Project file
// ============================================================================

/// Contents of `nsbridge.json`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProjectConfig {
    pub base_library: Option<PathBuf>,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub target: Option<String>,
    /// Constant overrides; JSON scalars are turned into JS literals.
    pub defines: BTreeMap<String, serde_json::Value>,
    pub global_import: Option<bool>,
    pub source_maps: Option<bool>,
    pub suppress: Vec<String>,
    pub min_severity: Option<Severity>,
}

impl ProjectConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// JS source text for a JSON define value. Strings come out double-quoted.
fn js_literal(value: &serde_json::Value) -> String {
    value.to_string()
}

fn parse_target(value: &str, key: &str) -> Result<TargetFormat, ConfigError> {
    TargetFormat::parse(value).ok_or_else(|| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

// ============================================================================
// Resolution
// ============================================================================

/// Values supplied on the command line.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub target: Option<TargetFormat>,
    pub base_library: Option<PathBuf>,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    /// `NAME=VALUE` pairs, value already JS text.
    pub defines: Vec<(String, String)>,
    pub global_import: Option<bool>,
    pub source_maps: Option<bool>,
}

/// Fully resolved configuration.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub workspace_root: PathBuf,
    pub base_library: Option<ConfigValue<PathBuf>>,
    pub include: Vec<ConfigValue<String>>,
    pub exclude: Vec<ConfigValue<String>>,
    pub target: ConfigValue<TargetFormat>,
    pub defines: BTreeMap<String, ConfigValue<String>>,
    pub global_import: ConfigValue<bool>,
    pub source_maps: ConfigValue<bool>,
    pub suppress: Vec<DiagnosticKind>,
    pub min_severity: ConfigValue<Severity>,
}

impl ResolvedConfig {
    /// Defaults only.
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        ResolvedConfig {
            workspace_root: workspace_root.into(),
            base_library: None,
            include: vec![ConfigValue::new(
                DEFAULT_INCLUDE.to_string(),
                ConfigSource::Default,
            )],
            exclude: Vec::new(),
            target: ConfigValue::new(TargetFormat::Esm, ConfigSource::Default),
            defines: BTreeMap::new(),
            global_import: ConfigValue::new(false, ConfigSource::Default),
            source_maps: ConfigValue::new(false, ConfigSource::Default),
            suppress: Vec::new(),
            min_severity: ConfigValue::new(Severity::Warning, ConfigSource::Default),
        }
    }

    /// Resolve from every source.
    ///
    /// `config_path` overrides the default `<root>/nsbridge.json`; an
    /// explicit path must exist, the default one may be absent.
    pub fn resolve(
        workspace_root: &Path,
        config_path: Option<&Path>,
        cli: &CliOverrides,
    ) -> Result<Self, ConfigError> {
        let mut config = ResolvedConfig::new(workspace_root);
        match config_path {
            Some(path) => config.apply_project_config(&ProjectConfig::load(path)?)?,
            None => {
                let default = workspace_root.join(CONFIG_FILE);
                if default.exists() {
                    config.apply_project_config(&ProjectConfig::load(&default)?)?;
                }
            }
        }
        config.apply_env(|key| std::env::var(key).ok())?;
        config.apply_cli_overrides(cli);
        Ok(config)
    }

    pub fn apply_project_config(&mut self, project: &ProjectConfig) -> Result<(), ConfigError> {
        let src = ConfigSource::ProjectConfig;
        if let Some(lib) = &project.base_library {
            self.base_library = Some(ConfigValue::new(lib.clone(), src));
        }
        if !project.include.is_empty() {
            self.include = project
                .include
                .iter()
                .map(|p| ConfigValue::new(p.clone(), src))
                .collect();
        }
        self.exclude.extend(
            project
                .exclude
                .iter()
                .map(|p| ConfigValue::new(p.clone(), src)),
        );
        if let Some(target) = &project.target {
            self.target = ConfigValue::new(parse_target(target, "target")?, src);
        }
        for (name, value) in &project.defines {
            self.defines
                .insert(name.clone(), ConfigValue::new(js_literal(value), src));
        }
        if let Some(flag) = project.global_import {
            self.global_import = ConfigValue::new(flag, src);
        }
        if let Some(flag) = project.source_maps {
            self.source_maps = ConfigValue::new(flag, src);
        }
        for code in &project.suppress {
            let kind = DiagnosticKind::parse(code).ok_or_else(|| ConfigError::InvalidValue {
                key: "suppress".to_string(),
                value: code.clone(),
            })?;
            self.suppress.push(kind);
        }
        if let Some(severity) = project.min_severity {
            self.min_severity = ConfigValue::new(severity, src);
        }
        Ok(())
    }

    /// Apply environment overrides through `lookup`.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(target) = lookup(ENV_TARGET) {
            self.target = ConfigValue::new(parse_target(&target, ENV_TARGET)?, ConfigSource::EnvVar);
        }
        if let Some(lib) = lookup(ENV_BASE_LIBRARY) {
            self.base_library = Some(ConfigValue::new(PathBuf::from(lib), ConfigSource::EnvVar));
        }
        Ok(())
    }

    pub fn apply_cli_overrides(&mut self, cli: &CliOverrides) {
        let src = ConfigSource::CliFlag;
        if let Some(target) = cli.target {
            self.target = ConfigValue::new(target, src);
        }
        if let Some(lib) = &cli.base_library {
            self.base_library = Some(ConfigValue::new(lib.clone(), src));
        }
        if !cli.include.is_empty() {
            self.include = cli
                .include
                .iter()
                .map(|p| ConfigValue::new(p.clone(), src))
                .collect();
        }
        self.exclude
            .extend(cli.exclude.iter().map(|p| ConfigValue::new(p.clone(), src)));
        for (name, value) in &cli.defines {
            self.defines
                .insert(name.clone(), ConfigValue::new(value.clone(), src));
        }
        if let Some(flag) = cli.global_import {
            self.global_import = ConfigValue::new(flag, src);
        }
        if let Some(flag) = cli.source_maps {
            self.source_maps = ConfigValue::new(flag, src);
        }
    }

    // ------------------------------------------------------------------
    // Views
    // ------------------------------------------------------------------

    /// Base library as an absolute path.
    pub fn base_library_path(&self) -> Option<PathBuf> {
        self.base_library
            .as_ref()
            .map(|lib| self.workspace_root.join(&lib.value))
    }

    /// Source set patterns, excludes prefixed with `!`.
    pub fn patterns(&self) -> Vec<String> {
        self.include
            .iter()
            .map(|p| p.value.clone())
            .chain(self.exclude.iter().map(|p| format!("!{}", p.value)))
            .collect()
    }

    pub fn tree_config(&self) -> TreeConfig {
        TreeConfig {
            base_library: self.base_library_path(),
        }
    }

    pub fn transform_options(&self) -> TransformOptions {
        TransformOptions {
            target: self.target.value,
            defines: self
                .defines
                .iter()
                .map(|(k, v)| (k.clone(), v.value.clone()))
                .collect(),
            global_import: self.global_import.value,
            source_maps: self.source_maps.value,
        }
    }

    pub fn diagnostic_filter(&self) -> DiagnosticFilter {
        DiagnosticFilter {
            min_severity: self.min_severity.value,
            suppressed: self.suppress.clone(),
        }
    }
}
