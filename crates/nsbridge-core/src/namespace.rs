//! Dotted namespace identifiers.
//!
//! A namespace is a dot-separated identifier such as `app.ui.Button`. Every
//! segment must match `[A-Za-z_$][A-Za-z0-9_$]*`. A namespace implies its
//! ancestors (`app`, `app.ui`) as addressable objects even when nothing
//! declares them.
//!
//! This module also owns the naming conventions shared by validation and
//! rewriting: the reserved system root, the global qualifier prefixed to
//! non-library namespaces, and generated import binding names.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

/// Root segment of the system namespace (owned by the base library).
pub const SYSTEM_ROOT: &str = "goog";

/// Qualifier used to resolve a namespace through the shared global object.
pub const GLOBAL_QUALIFIER: &str = "goog.global.";

/// Prefix of generated import bindings.
pub const BINDING_PREFIX: &str = "__ns$";

static NAMESPACE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$]*(\.[A-Za-z_$][A-Za-z0-9_$]*)*$")
        .expect("namespace grammar is a valid regex")
});

/// Root identifiers a namespace may not claim.
///
/// Declaring `window.foo` or `Object.bar` would overwrite host builtins once
/// the namespace is constructed on the global object.
pub const RESERVED_ROOTS: &[&str] = &[
    "Array",
    "ArrayBuffer",
    "Boolean",
    "DataView",
    "Date",
    "Error",
    "Function",
    "Infinity",
    "Intl",
    "JSON",
    "Map",
    "Math",
    "NaN",
    "Number",
    "Object",
    "Promise",
    "Proxy",
    "Reflect",
    "RegExp",
    "Set",
    "String",
    "Symbol",
    "WeakMap",
    "WeakSet",
    "console",
    "document",
    "exports",
    "globalThis",
    "module",
    "require",
    "self",
    "undefined",
    "window",
];

/// Errors for malformed namespace identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NamespaceError {
    /// The identifier does not match the dotted grammar.
    #[error("invalid namespace '{name}'")]
    Invalid { name: String },
}

/// Validate a dotted namespace identifier.
pub fn validate(name: &str) -> Result<(), NamespaceError> {
    if NAMESPACE_RE.is_match(name) {
        Ok(())
    } else {
        Err(NamespaceError::Invalid {
            name: name.to_string(),
        })
    }
}

/// Returns true if `name` is a well-formed namespace.
pub fn is_valid(name: &str) -> bool {
    NAMESPACE_RE.is_match(name)
}

/// First segment of a namespace.
pub fn root(name: &str) -> &str {
    name.split('.').next().unwrap_or(name)
}

/// Returns true if the root segment collides with a reserved builtin.
pub fn is_reserved_root(name: &str) -> bool {
    RESERVED_ROOTS.contains(&root(name))
}

/// Returns true if the namespace belongs to the system (base library) tree.
pub fn is_system(name: &str) -> bool {
    root(name) == SYSTEM_ROOT
}

/// Proper ancestors of a namespace, root first.
///
/// `ancestors("a.b.c")` yields `["a", "a.b"]`.
pub fn ancestors(name: &str) -> Vec<&str> {
    name.match_indices('.').map(|(i, _)| &name[..i]).collect()
}

/// The namespace itself followed by its ancestors, most specific first.
///
/// `prefixes("a.b.c")` yields `["a.b.c", "a.b", "a"]`.
pub fn prefixes(name: &str) -> Vec<&str> {
    let mut out = vec![name];
    out.extend(ancestors(name).into_iter().rev());
    out
}

/// Fully qualified global reference for a namespace.
///
/// System namespaces resolve lexically through `goog`; everything else goes
/// through [`GLOBAL_QUALIFIER`].
pub fn qualify(name: &str) -> String {
    if is_system(name) {
        name.to_string()
    } else {
        format!("{}{}", GLOBAL_QUALIFIER, name)
    }
}

/// Local binding name generated for an import of `name`.
pub fn binding_name(name: &str) -> String {
    format!("{}{}", BINDING_PREFIX, name.replace('.', "$"))
}
