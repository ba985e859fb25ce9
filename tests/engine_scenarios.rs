//! End-to-end scenarios for the deterministic pipeline.
//!
//! Each test feeds a before/after pair through `analyze_deterministic` and
//! checks the resulting event list.

use std::path::PathBuf;

use changesense::{
    analyze_deterministic, AnalysisContext, EngineConfig, EventType, FileAnalysis, FileChange,
    Language, Layer, SemanticEvent, Strategy,
};

fn testdata_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("testdata")
}

fn context() -> AnalysisContext {
    AnalysisContext::new(EngineConfig::default()).expect("default config is valid")
}

fn analyze(before: &str, after: &str) -> FileAnalysis {
    let ctx = context();
    analyze_deterministic(&ctx, &FileChange::modified("app/service.py", "python", before, after))
}

fn of_type(events: &[SemanticEvent], event_type: EventType) -> Vec<&SemanticEvent> {
    events.iter().filter(|e| e.event_type == event_type).collect()
}

fn assert_confidence_invariants(events: &[SemanticEvent]) {
    for event in events {
        if event.layer.is_deterministic() {
            assert_eq!(event.confidence, 1.0, "{:?}", event);
        } else {
            assert!((0.0..=1.0).contains(&event.confidence), "{:?}", event);
            assert!(event.event_type.is_interpretive(), "{:?}", event);
        }
        if !event.event_type.is_interpretive() {
            assert_eq!(event.layer, event.event_type.layer());
        }
    }
}

// =============================================================================
// Declared scenarios
// =============================================================================

#[test]
#[cfg(feature = "tree-sitter")]
fn test_signature_and_operator_change() {
    let analysis = analyze("def f(a):\n    return a\n", "def f(a, b=1):\n    return a + b\n");
    let events = &analysis.events;

    let signature = of_type(events, EventType::SignatureChanged);
    assert_eq!(signature.len(), 1);
    assert_eq!(signature[0].node_id, "func:f");
    assert!(
        signature[0].details.contains("arity 1 -> 2"),
        "details: {}",
        signature[0].details
    );

    let defaults = of_type(events, EventType::DefaultParametersAdded);
    assert_eq!(defaults.len(), 1);
    assert_eq!(defaults[0].details, "b");

    assert!(!of_type(events, EventType::BinaryOperatorUsageChanged).is_empty());
    assert!(of_type(events, EventType::NodeAdded).is_empty());
    assert!(of_type(events, EventType::NodeRemoved).is_empty());
    assert_confidence_invariants(events);
}

#[test]
#[cfg(feature = "tree-sitter")]
fn test_new_function_is_one_node_added() {
    let before = "def f():\n    return 1\n";
    let after = "def f():\n    return 1\n\n\ndef g(x):\n    return x * 2\n";
    let analysis = analyze(before, after);

    let added = of_type(&analysis.events, EventType::NodeAdded);
    assert_eq!(added.len(), 1, "events: {:#?}", analysis.events);
    assert_eq!(added[0].node_id, "func:g");
    assert!(of_type(&analysis.events, EventType::NodeRemoved).is_empty());
    assert_confidence_invariants(&analysis.events);
}

#[test]
#[cfg(feature = "tree-sitter")]
fn test_removed_try_block() {
    let before = r#"
def load(path):
    try:
        return open(path).read()
    except IOError:
        return None
"#;
    let after = r#"
def load(path):
    return open(path).read()
"#;
    let analysis = analyze(before, after);
    let events = &analysis.events;

    let removed = of_type(events, EventType::ExceptionHandlingRemoved);
    let error_handling = of_type(events, EventType::ErrorHandlingRemoved);
    assert!(
        !removed.is_empty() || !error_handling.is_empty(),
        "events: {:#?}",
        events
    );
    assert!(of_type(events, EventType::ExceptionHandlingAdded).is_empty());
    assert_confidence_invariants(events);
}

#[test]
#[cfg(feature = "tree-sitter")]
fn test_legacy_only_source_still_classified() {
    let before = std::fs::read_to_string(testdata_path().join("legacy/before.py")).unwrap();
    let after = std::fs::read_to_string(testdata_path().join("legacy/after.py")).unwrap();
    let analysis = analyze(&before, &after);

    assert_eq!(analysis.before_strategy, Some("legacy"));
    assert_eq!(analysis.after_strategy, Some("legacy"));
    let signature = of_type(&analysis.events, EventType::SignatureChanged);
    assert_eq!(signature.len(), 1);
    assert_eq!(signature[0].node_id, "func:greet");
    assert!(of_type(&analysis.events, EventType::FileContentChanged).is_empty());
}

#[test]
#[cfg(feature = "tree-sitter")]
fn test_mixed_parse_stages_do_not_invent_syntactic_changes() {
    let before = "@retry(3)\ndef f(a, b=2):\n    return a\n";
    let after = format!("{}\n{}", before, "$$$$ ???? `` !!!! $$$$ ????\n".repeat(12));

    let after_alone = Language::Python.adapter().parse("app/service.py", &after).unwrap();
    assert_ne!(after_alone.strategy, Strategy::Grammar);

    let analysis = analyze(before, &after);
    assert_eq!(analysis.before_strategy, analysis.after_strategy);
    assert_ne!(analysis.after_strategy, Some("opaque"));
    for event_type in [
        EventType::DecoratorAdded,
        EventType::DecoratorRemoved,
        EventType::SignatureChanged,
    ] {
        assert!(
            of_type(&analysis.events, event_type)
                .iter()
                .all(|e| e.node_id != "func:f"),
            "events: {:#?}",
            analysis.events
        );
    }
    assert_confidence_invariants(&analysis.events);
}

// =============================================================================
// Properties
// =============================================================================

#[test]
fn test_identical_input_yields_nothing() {
    let source = "class A:\n    def m(self):\n        return 1\n";
    assert!(analyze(source, source).events.is_empty());
}

#[test]
#[cfg(feature = "tree-sitter")]
fn test_comment_and_whitespace_edits_yield_nothing() {
    let before = "def f(a):\n    return a + 1\n";
    let after = "# helper\ndef f(a):\n\n    return a   +   1  # add one\n";
    let analysis = analyze(before, after);
    assert!(analysis.events.is_empty(), "events: {:#?}", analysis.events);
}

#[test]
#[cfg(feature = "tree-sitter")]
fn test_rerun_is_identical() {
    let before = r#"
import json

class Store:
    def get(self, key):
        for k, v in self.items:
            if k == key:
                return v
        return None
"#;
    let after = r#"
import json
import logging

class Store:
    def get(self, key):
        logging.debug("lookup %s", key)
        return self.index.get(key)

    def put(self, key, value):
        self.index[key] = value
"#;
    let first = analyze(before, after);
    let second = analyze(before, after);
    assert_eq!(first.events, second.events);
    assert!(!first.events.is_empty());
    assert_confidence_invariants(&first.events);

    let mut keys: Vec<String> = first.events.iter().map(|e| e.key()).collect();
    let total = keys.len();
    keys.sort();
    keys.dedup();
    assert_eq!(keys.len(), total, "duplicate events");
}

#[test]
#[cfg(feature = "tree-sitter")]
fn test_sensitive_call_raises_security_event() {
    let before = "import json\n\ndef load(blob):\n    return json.loads(blob)\n";
    let after = "import pickle\n\ndef load(blob):\n    return pickle.loads(blob)\n";
    let analysis = analyze(before, after);
    let security = of_type(&analysis.events, EventType::SecurityVulnerability);
    assert_eq!(security.len(), 1, "events: {:#?}", analysis.events);
    assert_eq!(security[0].layer, Layer::Pattern);
    assert!(security[0].reasoning.is_some());
    assert!(security[0].impact.is_some());
}

#[test]
#[cfg(feature = "tree-sitter")]
fn test_removed_file() {
    let ctx = context();
    let change = FileChange::removed("old.py", "py", "def a():\n    pass\n\ndef b():\n    pass\n");
    let analysis = analyze_deterministic(&ctx, &change);
    assert_eq!(of_type(&analysis.events, EventType::FileRemoved).len(), 1);
    let removed: Vec<&str> = of_type(&analysis.events, EventType::NodeRemoved)
        .iter()
        .map(|e| e.node_id.as_str())
        .filter(|id| id.starts_with("func:"))
        .collect();
    assert_eq!(removed, vec!["func:a", "func:b"]);
    assert!(of_type(&analysis.events, EventType::FileAdded).is_empty());
}

#[test]
fn test_unparseable_source_reports_content_change_only() {
    let analysis = analyze("%%%% ((((\n", "%%%% ((((\n@@@@\n");
    let events = &analysis.events;
    assert!(events.len() <= 1, "events: {:#?}", events);
    if let Some(event) = events.first() {
        assert_eq!(event.event_type, EventType::FileContentChanged);
        assert_eq!(event.node_id, "module:service");
    }
}

#[test]
#[cfg(feature = "tree-sitter")]
fn test_typescript_async_conversion() {
    let ctx = context();
    let before = "export function fetchUser(id: number): User {\n    return db.find(id);\n}\n";
    let after =
        "export async function fetchUser(id: number): Promise<User> {\n    return await db.find(id);\n}\n";
    let analysis = analyze_deterministic(&ctx, &FileChange::modified("src/users.ts", "ts", before, after));
    let events = &analysis.events;
    assert_eq!(of_type(events, EventType::FunctionMadeAsync).len(), 1);
    assert_eq!(of_type(events, EventType::ReturnTypeChanged).len(), 1);
    assert!(!of_type(events, EventType::AwaitUsageChanged).is_empty());
    assert_confidence_invariants(events);
}

#[test]
#[cfg(feature = "tree-sitter")]
fn test_php_visibility_change() {
    let ctx = context();
    let before = "<?php\nclass Repo {\n    public function find($id) {\n        return $this->rows[$id];\n    }\n}\n";
    let after = "<?php\nclass Repo {\n    private function find($id) {\n        return $this->rows[$id];\n    }\n}\n";
    let analysis = analyze_deterministic(&ctx, &FileChange::modified("Repo.php", "php", before, after));
    let visibility = of_type(&analysis.events, EventType::VisibilityChanged);
    assert_eq!(visibility.len(), 1, "events: {:#?}", analysis.events);
    assert_eq!(visibility[0].node_id, "class:Repo.find");
}
