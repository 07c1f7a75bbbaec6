//! Error types and error codes for nsbridge.
//!
//! Each subsystem has its own `thiserror` enum. `BridgeError` is the single
//! type the CLI renders; `impl From<X> for BridgeError` bridges the domain
//! errors into it and `OutputErrorCode` assigns the stable exit code:
//!
//! - `2`: invalid arguments (bad config, patterns, facts bundle)
//! - `3`: resolution errors (file or namespace not found, out of scope)
//! - `4`: the namespace graph is invalid (cycles, unexposed legacy modules)
//! - `10`: internal errors (collaborator contract violations, I/O)

use std::fmt;

use thiserror::Error;

use crate::config::ConfigError;
use crate::facts::BundleError;
use crate::namespace::NamespaceError;
use crate::record::RecordError;
use crate::source_set::SourceSetError;
use crate::transform::TransformError;
use crate::tree::GraphError;

// ============================================================================
// Output Error Codes
// ============================================================================

/// Numeric codes used as CLI exit codes and in JSON error responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OutputErrorCode {
    InvalidArguments = 2,
    ResolutionError = 3,
    GraphInvalid = 4,
    InternalError = 10,
}

impl OutputErrorCode {
    pub fn code(&self) -> u8 {
        *self as u8
    }
}

impl fmt::Display for OutputErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

// ============================================================================
// Unified Error Type
// ============================================================================

/// Unified error type for CLI output.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("invalid arguments: {message}")]
    InvalidArguments {
        message: String,
        details: Option<serde_json::Value>,
    },

    #[error("file not found: {path}")]
    FileNotFound { path: String },

    /// A path or namespace that cannot be resolved.
    #[error("unresolved: {message}")]
    Unresolved {
        message: String,
        namespace: Option<String>,
    },

    /// Validation rejected the namespace graph.
    #[error("{message}")]
    GraphInvalid {
        message: String,
        /// Modules involved (cycle members or require chain).
        modules: Vec<String>,
    },

    #[error("internal error: {message}")]
    InternalError { message: String },
}

impl From<&BridgeError> for OutputErrorCode {
    fn from(err: &BridgeError) -> Self {
        match err {
            BridgeError::InvalidArguments { .. } => OutputErrorCode::InvalidArguments,
            BridgeError::FileNotFound { .. } => OutputErrorCode::ResolutionError,
            BridgeError::Unresolved { .. } => OutputErrorCode::ResolutionError,
            BridgeError::GraphInvalid { .. } => OutputErrorCode::GraphInvalid,
            BridgeError::InternalError { .. } => OutputErrorCode::InternalError,
        }
    }
}

impl From<BridgeError> for OutputErrorCode {
    fn from(err: BridgeError) -> Self {
        OutputErrorCode::from(&err)
    }
}

// ============================================================================
// Bridges
// ============================================================================

impl From<NamespaceError> for BridgeError {
    fn from(err: NamespaceError) -> Self {
        BridgeError::invalid_args(err.to_string())
    }
}

impl From<RecordError> for BridgeError {
    fn from(err: RecordError) -> Self {
        BridgeError::invalid_args(err.to_string())
    }
}

impl From<ConfigError> for BridgeError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Io { path, .. } => BridgeError::file_not_found(path.display().to_string()),
            other => BridgeError::invalid_args(other.to_string()),
        }
    }
}

impl From<BundleError> for BridgeError {
    fn from(err: BundleError) -> Self {
        match err {
            BundleError::Io { path, .. } => BridgeError::file_not_found(path.display().to_string()),
            BundleError::Json(json) => BridgeError::InvalidArguments {
                message: format!("malformed facts bundle: {}", json),
                details: Some(serde_json::json!({ "line": json.line(), "column": json.column() })),
            },
        }
    }
}

impl From<SourceSetError> for BridgeError {
    fn from(err: SourceSetError) -> Self {
        match err {
            SourceSetError::InvalidPattern { .. } => BridgeError::invalid_args(err.to_string()),
            SourceSetError::Io { .. } | SourceSetError::Walk(_) => {
                BridgeError::internal(err.to_string())
            }
        }
    }
}

impl From<GraphError> for BridgeError {
    fn from(err: GraphError) -> Self {
        let message = err.to_string();
        match err {
            GraphError::CircularReference { members } => BridgeError::GraphInvalid {
                message,
                modules: members,
            },
            GraphError::UnexposedLegacy { chain, .. } => BridgeError::GraphInvalid {
                message,
                modules: chain,
            },
            GraphError::OutOfScope { .. } => BridgeError::Unresolved {
                message,
                namespace: None,
            },
            GraphError::Io { path, .. } => BridgeError::file_not_found(path.display().to_string()),
            GraphError::SourceSet(inner) => inner.into(),
            GraphError::Contract { .. } => BridgeError::internal(message),
        }
    }
}

impl From<TransformError> for BridgeError {
    fn from(err: TransformError) -> Self {
        let message = err.to_string();
        match err {
            TransformError::NotLoaded { .. } => BridgeError::Unresolved {
                message,
                namespace: None,
            },
            TransformError::Unresolved { namespace } => BridgeError::Unresolved {
                message,
                namespace: Some(namespace),
            },
            TransformError::Contract { .. } | TransformError::Edit(_) => {
                BridgeError::internal(message)
            }
        }
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        BridgeError::internal(format!("IO error: {}", err))
    }
}

// ============================================================================
// Convenience Constructors
// ============================================================================

impl BridgeError {
    pub fn invalid_args(message: impl Into<String>) -> Self {
        BridgeError::InvalidArguments {
            message: message.into(),
            details: None,
        }
    }

    pub fn file_not_found(path: impl Into<String>) -> Self {
        BridgeError::FileNotFound { path: path.into() }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        BridgeError::InternalError {
            message: message.into(),
        }
    }

    pub fn error_code(&self) -> OutputErrorCode {
        OutputErrorCode::from(self)
    }
}
