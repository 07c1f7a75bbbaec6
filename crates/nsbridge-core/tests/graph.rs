//! Namespace graph behavior over real files.

mod common;

use std::path::Path;

use common::Workspace;
use nsbridge_core::diagnostics::DiagnosticKind;
use nsbridge_core::record::{ModuleRecord, RequireFact, UsageType};
use nsbridge_core::tree::{GraphError, LoadOutcome, ModuleKey};
use nsbridge_core::ModuleState;

fn kinds(tree: &nsbridge_core::Tree) -> Vec<DiagnosticKind> {
    tree.diagnostics().iter().map(|d| d.kind).collect()
}

mod classification {
    use super::*;

    #[test]
    fn nested_reference_resolves_to_declared_prefix() {
        let ws = Workspace::new();
        ws.write("src/ab.js", "goog.provide('a.b');\n");
        ws.write("src/user.js", "goog.provide('user');\ngoog.require('a.b');\n");
        let mut tree = ws.tree();
        tree.scan(None).unwrap();

        let provider = tree.module(&ws.path("src/ab.js")).unwrap();
        let class = provider.classify("a.b.c.d");
        assert_eq!(class.usage, UsageType::Provide);
        assert_eq!(class.owner.as_deref(), Some("a.b"));

        let user = tree.module(&ws.path("src/user.js")).unwrap();
        let class = user.classify("a.b.c.d");
        assert_eq!(class.usage, UsageType::Require);
        assert_eq!(class.owner.as_deref(), Some("a.b"));
        assert_eq!(user.classify("a.x").usage, UsageType::Implicit);
    }

    #[test]
    fn non_declarative_modules_classify_nothing() {
        let ws = Workspace::new();
        ws.write(
            "src/esm.js",
            "goog.declareModuleId('a.b');\nexport const x = 1;\n",
        );
        let mut tree = ws.tree();
        tree.scan(None).unwrap();
        let record = tree.module(&ws.path("src/esm.js")).unwrap();
        assert_eq!(record.classify("a.b.c").usage, UsageType::Unknown);
        assert_eq!(tree.owner_of("a.b").unwrap().request(), ws.path("src/esm.js"));
    }
}

mod declarations {
    use super::*;

    #[test]
    fn duplicate_provide_in_one_file_is_reported() {
        let ws = Workspace::new();
        ws.write("src/a.js", "goog.provide('a');\ngoog.provide('a');\n");
        let mut tree = ws.tree();
        tree.scan(None).unwrap();
        assert_eq!(kinds(&tree), vec![DiagnosticKind::NamespaceDuplicate]);
        let diag = &tree.diagnostics()[0];
        assert_eq!(diag.namespace.as_deref(), Some("a"));
        assert_eq!(diag.span.map(|s| s.start), Some(19));
    }

    #[test]
    fn duplicate_provide_across_files_keeps_first_owner() {
        let ws = Workspace::new();
        ws.write("src/a.js", "goog.provide('dup');\n");
        ws.write("src/b.js", "goog.provide('dup');\n");
        let mut tree = ws.tree();
        tree.scan(None).unwrap();
        assert_eq!(tree.owner_of("dup").unwrap().request(), ws.path("src/a.js"));
        let diags = tree.diagnostics();
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].file.as_deref(), Some(ws.path("src/b.js").as_path()));
    }

    #[test]
    fn unconfirmed_requires_never_conflict() {
        let mut record = ModuleRecord::new("/src/a.js", false);
        assert!(record.declare_require(RequireFact::unconfirmed("x")).unwrap());
        assert!(record.declare_require(RequireFact::unconfirmed("x")).unwrap());
        assert_eq!(record.requires().len(), 1);
    }

    #[test]
    fn system_namespace_outside_library_conflicts() {
        let ws = Workspace::new();
        ws.write("src/a.js", "goog.provide('goog.dom');\n");
        ws.write("lib/dom.js", "goog.provide('goog.string');\n");
        let mut tree = ws.tree();
        tree.scan(None).unwrap();
        assert_eq!(kinds(&tree), vec![DiagnosticKind::NamespaceConflict]);
        assert!(tree.owner_of("goog.string").is_some());
        assert!(tree.owner_of("goog.dom").is_none());
    }

    #[test]
    fn parse_failure_is_a_diagnostic() {
        let ws = Workspace::new();
        let path = ws.write("src/bad.js", "goog.provide('a'); // @syntax-error\n");
        let mut tree = ws.tree();
        assert_eq!(tree.load(&path, None).unwrap(), LoadOutcome::Failed);
        assert_eq!(kinds(&tree), vec![DiagnosticKind::ParseFailed]);
    }
}

mod validation {
    use super::*;

    #[test]
    fn linear_chain_validates() {
        let ws = Workspace::new();
        ws.write("src/a.js", "goog.provide('a');\ngoog.require('b');\n");
        ws.write("src/b.js", "goog.provide('b');\ngoog.require('c');\n");
        ws.write("src/c.js", "goog.provide('c');\ngoog.require('d');\n");
        ws.write("src/d.js", "goog.provide('d');\n");
        let mut tree = ws.tree();
        let outcome = tree.scan(None).unwrap();
        assert_eq!(outcome.delta.added.len(), 4);
        assert!(outcome.validation.passed());
        assert_eq!(outcome.validation.modules, 4);
        assert!(tree.diagnostics().is_empty());
    }

    #[test]
    fn cycle_names_exactly_its_members() {
        let ws = Workspace::new();
        ws.write("src/e.js", "goog.provide('e');\ngoog.require('f');\n");
        ws.write("src/f.js", "goog.provide('f');\ngoog.require('g');\n");
        ws.write("src/g.js", "goog.provide('g');\ngoog.require('f');\n");
        let mut tree = ws.tree();
        match tree.scan(None) {
            Err(GraphError::CircularReference { mut members }) => {
                members.sort();
                assert_eq!(members, vec!["f".to_string(), "g".to_string()]);
            }
            other => panic!("expected a cycle, got {other:?}"),
        }
        assert!(kinds(&tree).contains(&DiagnosticKind::CircularReference));
    }

    #[test]
    fn self_require_fails_validation() {
        let ws = Workspace::new();
        ws.write("src/s.js", "goog.provide('s');\ngoog.require('s');\n");
        let mut tree = ws.tree();
        let outcome = tree.scan(None).unwrap();
        assert!(!outcome.validation.passed());
        let diag = tree
            .diagnostics()
            .into_iter()
            .find(|d| d.kind == DiagnosticKind::RequireSelf)
            .unwrap();
        assert_eq!(diag.namespace.as_deref(), Some("s"));
    }

    #[test]
    fn unknown_require_is_reported() {
        let ws = Workspace::new();
        ws.write("src/a.js", "goog.provide('a');\ngoog.require('nowhere');\n");
        let mut tree = ws.tree();
        let outcome = tree.scan(None).unwrap();
        assert!(!outcome.validation.passed());
        assert!(kinds(&tree).contains(&DiagnosticKind::RequireUnknown));
    }

    #[test]
    fn unexposed_module_outside_library_fails() {
        let ws = Workspace::new();
        ws.write("src/m.js", "goog.module('m');\ngoog.require('p');\n");
        ws.write("src/p.js", "goog.provide('p');\n");
        let mut tree = ws.tree();
        match tree.scan(None) {
            Err(GraphError::UnexposedLegacy { module, chain }) => {
                assert_eq!(module, "m");
                assert_eq!(chain, vec!["m".to_string(), "p".to_string()]);
            }
            other => panic!("expected an unexposed module, got {other:?}"),
        }
    }

    #[test]
    fn unexposed_library_module_is_repaired() {
        let ws = Workspace::new();
        ws.write("src/p.js", "goog.provide('p');\n");
        let lib = ws.write("lib/x.js", "goog.module('util.x');\ngoog.require('p');\n");
        let mut tree = ws.tree();
        let outcome = tree.scan(None).unwrap();
        assert!(outcome.validation.passed());
        assert_eq!(outcome.validation.repaired, vec![lib.clone()]);
        assert!(tree.module(&lib).unwrap().is_legacy());
    }
}

mod rescans {
    use super::*;

    #[test]
    fn unchanged_rescan_is_empty_and_stable() {
        let ws = Workspace::new();
        ws.write("src/a.js", "goog.provide('a.b.c');\ngoog.require('d');\n");
        ws.write("src/d.js", "goog.provide('d');\n");
        let mut tree = ws.tree();
        let first = tree.scan(None).unwrap();
        let hierarchy = tree.hierarchy().clone();

        let second = tree.scan(None).unwrap();
        assert!(second.delta.is_empty());
        assert_eq!(second.validation, first.validation);
        assert_eq!(tree.hierarchy(), &hierarchy);
    }

    #[test]
    fn modification_and_removal_are_applied() {
        let ws = Workspace::new();
        let a = ws.write("src/a.js", "goog.provide('a');\n");
        ws.write("src/b.js", "goog.provide('b');\n");
        let mut tree = ws.tree();
        tree.scan(None).unwrap();

        std::fs::write(&a, "goog.provide('a2');\n").unwrap();
        std::fs::remove_file(ws.path("src/b.js")).unwrap();
        let outcome = tree.scan(None).unwrap();
        assert_eq!(outcome.delta.modified.len(), 1);
        assert_eq!(outcome.delta.removed.len(), 1);
        let owned: Vec<&str> = tree.namespaces().map(|(ns, _)| ns).collect();
        assert_eq!(owned, vec!["a2"]);
    }

    #[test]
    fn unload_keeps_the_record_and_reload_restores_ownership() {
        let ws = Workspace::new();
        let a = ws.write("src/a.js", "goog.provide('a');\n");
        let mut tree = ws.tree();
        tree.scan(None).unwrap();

        assert!(tree.unload(&a));
        assert_eq!(tree.module(&a).unwrap().state(), ModuleState::Unload);
        assert!(tree.owner_of("a").is_none());
        assert!(tree.namespace_node("a").is_none());

        assert_eq!(tree.load(&a, None).unwrap(), LoadOutcome::Loaded);
        assert_eq!(tree.owner_of("a").unwrap().request(), a.as_path());
        assert!(!tree.unload(&ws.path("src/none.js")));

        assert!(tree.remove(&a));
        assert!(tree.module(&a).is_none());
    }

    #[test]
    fn missing_literal_is_reported() {
        let ws = Workspace::new();
        ws.write("src/a.js", "goog.provide('a');\n");
        let mut tree = ws.tree();
        let outcome = tree
            .scan(Some(&["src/gone.js".to_string()]))
            .unwrap();
        assert_eq!(outcome.delta.missing.len(), 1);
        assert!(kinds(&tree).contains(&DiagnosticKind::MissingFile));
    }

    #[test]
    fn resolve_by_namespace_loads_lazily() {
        let ws = Workspace::new();
        ws.write("src/a.js", "goog.provide('a');\n");
        let mut tree = ws.tree();
        tree.scan(None).unwrap();
        let record = tree
            .resolve(&ModuleKey::namespace("a"))
            .unwrap()
            .unwrap();
        assert_eq!(record.primary_namespace(), Some("a"));
        assert!(tree.resolve(&ModuleKey::namespace("zzz")).unwrap().is_none());
        assert!(tree
            .resolve(&ModuleKey::path(Path::new("/nope.js")))
            .unwrap()
            .is_none());
    }
}

mod records {
    use super::*;
    use nsbridge_core::deps::{parse_records, render_records};

    #[test]
    fn dependency_records_prime_a_fresh_tree() {
        let ws = Workspace::new();
        ws.write("src/a.js", "goog.provide('a');\ngoog.require('b');\n");
        ws.write("src/b.js", "goog.module('b');\ngoog.module.declareLegacyNamespace();\n");
        let mut tree = ws.tree();
        tree.scan(None).unwrap();
        let json = render_records(&tree.dependency_records()).unwrap();

        let mut fresh = ws.tree();
        for record in parse_records(&json).unwrap() {
            assert!(fresh.load_record(&record));
        }
        assert_eq!(
            fresh.owner_of("b").unwrap().request(),
            ws.path("src/b.js").as_path()
        );
        assert!(fresh.validate().unwrap().passed());
    }
}
