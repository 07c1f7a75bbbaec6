//! Shared helpers for integration tests: a small regex-driven fact
//! extractor covering the statement shapes the tests use, and a workspace
//! builder on top of `tempfile`.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use nsbridge_core::edit::Span;
use nsbridge_core::facts::{
    DefineDecl, DefineValue, ExtractError, FileFacts, KindSignal, ProvideDecl, RequireDecl,
    RequireForm, UsageSite,
};
use nsbridge_core::record::ModuleKind;
use nsbridge_core::source_set::GlobSourceSet;
use nsbridge_core::tree::{Tree, TreeConfig};
use regex::Regex;
use tempfile::TempDir;

static DECLARE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"goog\.(provide|module|declareModuleId)\(\s*['"]([\w.$]+)['"]\s*\)"#).unwrap()
});
static LEGACY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"goog\.module\.declareLegacyNamespace\(\)").unwrap());
static REQUIRE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?:(?:const|let|var)\s+[\w$]+\s*=\s*)?(goog\.(require|requireType|forwardDeclare)\(\s*['"]([\w.$]+)['"]\s*\))"#,
    )
    .unwrap()
});
static DEFINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"goog\.define\(\s*['"]([\w.$]+)['"]\s*,\s*([^)]*?)\s*\)"#).unwrap()
});
static ESM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^\s*(?:export|import)\b").unwrap());
static DOTTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z_$][\w$]*(?:\.[A-Za-z_$][\w$]*)+").unwrap());

fn span(m: &regex::Match<'_>) -> Span {
    Span::new(m.start(), m.end())
}

/// Extract facts from the statement forms used in the tests.
pub fn extract(path: &Path, source: &str) -> Result<FileFacts, ExtractError> {
    if source.contains("@syntax-error") {
        return Err(ExtractError::Syntax {
            path: path.to_path_buf(),
            message: "unexpected token".to_string(),
        });
    }
    let mut facts = FileFacts::default();
    let mut claimed: Vec<Span> = Vec::new();

    if let Some(m) = ESM.find(source) {
        facts.kinds.push(KindSignal {
            kind: ModuleKind::Esm,
            span: Some(Span::new(m.start(), m.end())),
        });
    }
    if let Some(m) = LEGACY.find(source) {
        facts.legacy_namespace = Some(span(&m));
        claimed.push(span(&m));
    }
    for caps in DECLARE.captures_iter(source) {
        let whole = caps.get(0).unwrap();
        match &caps[1] {
            "provide" => facts.kinds.push(KindSignal {
                kind: ModuleKind::Provide,
                span: Some(span(&whole)),
            }),
            "module" => facts.kinds.push(KindSignal {
                kind: ModuleKind::GoogModule,
                span: Some(span(&whole)),
            }),
            _ => {}
        }
        facts.provides.push(ProvideDecl {
            namespace: caps[2].to_string(),
            statement: span(&whole),
            binding: None,
        });
        claimed.push(span(&whole));
    }
    for caps in REQUIRE.captures_iter(source) {
        let whole = caps.get(0).unwrap();
        let call = caps.get(1).unwrap();
        let form = match &caps[2] {
            "requireType" => RequireForm::RequireType,
            "forwardDeclare" => RequireForm::ForwardDeclare,
            _ => RequireForm::Require,
        };
        facts.requires.push(RequireDecl {
            namespace: caps[3].to_string(),
            statement: span(&whole),
            expression: span(&call),
            used: whole.start() != call.start(),
            insert_at: whole.start(),
            form,
        });
        claimed.push(span(&whole));
    }
    for caps in DEFINE.captures_iter(source) {
        let whole = caps.get(0).unwrap();
        let before = source[..whole.start()].trim_end();
        let value = caps[2].to_string();
        let value = if value.contains(|c: char| c.is_whitespace() || c == '.') {
            DefineValue::Expression(value)
        } else {
            DefineValue::Literal(value)
        };
        facts.defines.push(DefineDecl {
            name: caps[1].to_string(),
            site: span(&whole),
            value,
            missing_target: !before.ends_with('='),
        });
        claimed.push(span(&whole));
    }
    for m in DOTTED.find_iter(source) {
        let site = span(&m);
        if m.as_str().starts_with("goog.") || m.as_str().starts_with("exports.") {
            continue;
        }
        if claimed.iter().any(|c| c.contains(&site)) {
            continue;
        }
        let prev = source[..m.start()].chars().next_back();
        if matches!(prev, Some('.' | '\'' | '"')) {
            continue;
        }
        let rest = source[m.end()..].trim_start();
        let write = rest.starts_with('=') && !rest.starts_with("==");
        facts.usages.push(UsageSite {
            namespace: m.as_str().to_string(),
            span: site,
            write,
        });
    }
    Ok(facts)
}

/// A temporary project directory.
pub struct Workspace {
    _dir: TempDir,
    pub root: PathBuf,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let root = fs::canonicalize(dir.path()).unwrap();
        Workspace { _dir: dir, root }
    }

    pub fn write(&self, rel: &str, content: &str) -> PathBuf {
        let path = self.root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }

    /// A tree over `**/*.js` with the base library at `lib/`.
    pub fn tree(&self) -> Tree {
        let set = GlobSourceSet::with_patterns(&self.root, &["**/*.js".to_string()]).unwrap();
        Tree::new(
            TreeConfig {
                base_library: Some(self.root.join("lib")),
            },
            Box::new(set),
            Box::new(extract),
        )
    }
}
