//! Core engine for nsbridge.
//!
//! This crate models a project of namespace-declaring JavaScript files
//! (`goog.provide` / `goog.require` / `goog.module`) and rewrites them into
//! ES or CommonJS modules:
//! - Namespace identifiers and their hierarchy
//! - Per-file module records with a load-state lifecycle
//! - The namespace graph: ownership, scanning, and validation
//! - The transformation engine: edit collection, application, source maps
//! - Dependency records, configuration, error codes and JSON responses
//!
//! Parsing JavaScript is out of scope: facts about each file come from a
//! [`facts::FactExtractor`].

pub mod config;
pub mod deps;
pub mod diagnostics;
pub mod diff;
pub mod edit;
pub mod error;
pub mod facts;
pub mod namespace;
pub mod output;
pub mod record;
pub mod source_set;
pub mod sourcemap;
pub mod text;
pub mod transform;
pub mod tree;

pub use error::{BridgeError, OutputErrorCode};
pub use record::{ModuleKind, ModuleRecord, ModuleState};
pub use transform::{transform, TargetFormat, TransformOptions, TransformOutput};
pub use tree::{Tree, TreeConfig};
