//! JSON response types for CLI output.
//!
//! Every response starts with `status` followed by `schema_version`, so a
//! consumer can branch before reading anything else. Field and array order
//! is deterministic.

use std::io::{self, Write};

use serde::Serialize;

use crate::deps::DependencyRecord;
use crate::diagnostics::Diagnostic;
use crate::edit::OutputEdit;
use crate::error::{BridgeError, OutputErrorCode};
use crate::transform::TargetFormat;
use crate::tree::Validation;

/// Current schema version for all responses.
pub const SCHEMA_VERSION: &str = "1";

// ============================================================================
// check
// ============================================================================

/// Response for `nsbridge check`.
#[derive(Debug, Clone, Serialize)]
pub struct CheckResponse {
    pub status: String,
    pub schema_version: String,
    /// True when the graph has no error diagnostics.
    pub passed: bool,
    pub modules: usize,
    pub errors: usize,
    pub warnings: usize,
    /// Base-library modules given legacy exposure during validation.
    pub repaired: Vec<String>,
    pub diagnostics: Vec<Diagnostic>,
}

impl CheckResponse {
    pub fn new(validation: &Validation, diagnostics: Vec<Diagnostic>) -> Self {
        CheckResponse {
            status: "ok".to_string(),
            schema_version: SCHEMA_VERSION.to_string(),
            passed: validation.passed(),
            modules: validation.modules,
            errors: validation.errors,
            warnings: validation.warnings,
            repaired: validation
                .repaired
                .iter()
                .map(|p| p.display().to_string())
                .collect(),
            diagnostics,
        }
    }
}

// ============================================================================
// deps
// ============================================================================

/// Response for `nsbridge deps`.
#[derive(Debug, Clone, Serialize)]
pub struct DepsResponse {
    pub status: String,
    pub schema_version: String,
    pub records: Vec<DependencyRecord>,
}

impl DepsResponse {
    pub fn new(records: Vec<DependencyRecord>) -> Self {
        DepsResponse {
            status: "ok".to_string(),
            schema_version: SCHEMA_VERSION.to_string(),
            records,
        }
    }
}

// ============================================================================
// transform
// ============================================================================

/// Edit totals across all rewritten files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub files_changed: u32,
    pub edits_count: u32,
    pub bytes_added: i64,
    pub bytes_removed: i64,
}

impl Summary {
    pub fn from_edits<'a>(edits: impl IntoIterator<Item = &'a OutputEdit>) -> Self {
        let mut files = std::collections::BTreeSet::new();
        let mut count = 0u32;
        let mut added: i64 = 0;
        let mut removed: i64 = 0;
        for edit in edits {
            files.insert(edit.file.as_str());
            count += 1;
            added += edit.new_text.len() as i64;
            removed += edit.old_text.len() as i64;
        }
        Summary {
            files_changed: files.len() as u32,
            edits_count: count,
            bytes_added: added - removed.min(added),
            bytes_removed: removed - added.min(removed),
        }
    }
}

/// One rewritten file.
#[derive(Debug, Clone, Serialize)]
pub struct TransformedFile {
    /// Workspace-relative source path.
    pub path: String,
    pub format: TargetFormat,
    pub edits: usize,
    /// Where the output was written; absent on dry runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Unified diff; present on dry runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
}

/// Response for `nsbridge transform`.
#[derive(Debug, Clone, Serialize)]
pub struct TransformResponse {
    pub status: String,
    pub schema_version: String,
    pub dry_run: bool,
    pub files: Vec<TransformedFile>,
    pub summary: Summary,
}

impl TransformResponse {
    pub fn new(dry_run: bool, files: Vec<TransformedFile>, summary: Summary) -> Self {
        TransformResponse {
            status: "ok".to_string(),
            schema_version: SCHEMA_VERSION.to_string(),
            dry_run,
            files,
            summary,
        }
    }
}

// ============================================================================
// errors
// ============================================================================

/// Error payload.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorInfo {
    pub code: u8,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorInfo {
    pub fn from_error(err: &BridgeError) -> Self {
        let code = OutputErrorCode::from(err).code();
        let details = match err {
            BridgeError::InvalidArguments { details, .. } => details.clone(),
            BridgeError::FileNotFound { path } => Some(serde_json::json!({ "path": path })),
            BridgeError::Unresolved {
                namespace: Some(namespace),
                ..
            } => Some(serde_json::json!({ "namespace": namespace })),
            BridgeError::GraphInvalid { modules, .. } => {
                Some(serde_json::json!({ "modules": modules }))
            }
            BridgeError::Unresolved { namespace: None, .. } | BridgeError::InternalError { .. } => {
                None
            }
        };
        ErrorInfo {
            code,
            message: err.to_string(),
            details,
        }
    }
}

/// Response for any failed command.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub status: String,
    pub schema_version: String,
    pub error: ErrorInfo,
}

impl ErrorResponse {
    pub fn from_error(err: &BridgeError) -> Self {
        ErrorResponse {
            status: "error".to_string(),
            schema_version: SCHEMA_VERSION.to_string(),
            error: ErrorInfo::from_error(err),
        }
    }
}

/// Write a response as pretty JSON followed by a newline.
pub fn emit_response<T: Serialize>(response: &T, writer: &mut impl Write) -> io::Result<()> {
    let json = serde_json::to_string_pretty(response)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writeln!(writer, "{}", json)
}
