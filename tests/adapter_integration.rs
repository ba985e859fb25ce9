//! Integration tests for the language adapters and directory pairing.
//!
//! These tests go through the public registry (`get_adapter`) the same way
//! the engine does, and exercise each adapter's fallback chain end to end.

use std::fs;
use std::path::Path;

use changesense::analysis::registered_extensions;
use changesense::cli::collect_pairs;
use changesense::{get_adapter, EngineConfig, Language, Strategy};

// =============================================================================
// Registry
// =============================================================================

#[test]
fn test_tags_resolve_to_adapters() {
    for (tag, language) in [
        ("python", Language::Python),
        ("py", Language::Python),
        (".PHP", Language::Php),
        ("jsx", Language::JavaScript),
        ("mjs", Language::JavaScript),
        ("tsx", Language::TypeScript),
        ("TypeScript", Language::TypeScript),
    ] {
        let adapter = get_adapter(tag).unwrap_or_else(|| panic!("no adapter for {}", tag));
        assert_eq!(adapter.language(), language, "tag {}", tag);
    }
    assert!(get_adapter("rb").is_none());
    assert!(get_adapter("").is_none());
}

#[test]
fn test_registered_extensions_cover_all_languages() {
    let extensions = registered_extensions();
    for ext in ["py", "php", "js", "ts", "tsx"] {
        assert!(extensions.contains(&ext), "missing {}", ext);
    }
    for ext in &extensions {
        assert!(get_adapter(ext).is_some(), "unresolvable {}", ext);
    }
}

#[test]
fn test_every_chain_ends_in_opaque() {
    for ext in registered_extensions() {
        let adapter = get_adapter(ext).unwrap();
        let names = adapter.chain().strategy_names();
        assert_eq!(names.last(), Some(&"opaque"), "chain for {}: {:?}", ext, names);
        assert!(names.len() >= 2);
    }
}

// =============================================================================
// Python
// =============================================================================

#[test]
#[cfg(feature = "tree-sitter")]
fn test_python_modern_source_uses_grammar() {
    let source = r#"
import os
from typing import Optional

@dataclass
class Account:
    owner: str

    async def refresh(self, force: bool = False) -> Optional[str]:
        if force:
            return await self.client.get(self.owner)
        return None

def helper(*args, **kwargs):
    return len(args)
"#;
    let tree = get_adapter("py").unwrap().parse("bank/account.py", source).unwrap();
    assert_eq!(tree.strategy, Strategy::Grammar);
    assert!(tree.get("module:account").is_some());

    let class = tree.get("class:Account").expect("class node");
    assert_eq!(class.decorators, vec!["dataclass"]);
    assert!(class.members.contains("refresh"));

    let method = tree.get("class:Account.refresh").expect("method node");
    assert!(method.is_async());
    let signature = method.signature.as_ref().unwrap();
    assert_eq!(signature.return_type.as_deref(), Some("Optional[str]"));
    assert!(signature.defaulted().contains("force"));

    assert!(tree.get("func:helper").is_some());
    assert!(tree.imports.iter().any(|i| i.contains("os")));
}

#[test]
#[cfg(feature = "tree-sitter")]
fn test_python2_source_falls_back_to_legacy() {
    let source = "def shout(msg):\n    print msg.upper()\n";
    let tree = get_adapter("python").unwrap().parse("old.py", source).unwrap();
    assert_eq!(tree.strategy, Strategy::Legacy);
    assert!(tree.get("func:shout").is_some());
}

#[test]
fn test_garbage_never_fails_to_parse() {
    for ext in ["py", "php", "js", "ts"] {
        let adapter = get_adapter(ext).unwrap();
        // Outside a `<?php` tag everything is inline HTML
        let source = if ext == "php" {
            "<?php\n%%%% (((( @@@@ }}}}\n"
        } else {
            "%%%% (((( @@@@ }}}}\n"
        };
        let tree = adapter.parse(&format!("junk.{}", ext), source).unwrap();
        assert_ne!(tree.strategy, Strategy::Grammar, "{}", ext);
    }
}

// =============================================================================
// PHP and JavaScript
// =============================================================================

#[test]
#[cfg(feature = "tree-sitter")]
fn test_php_class_members() {
    let source = r#"<?php
namespace App;

use App\Db\Connection;

class Repo extends Base implements Finder {
    protected $conn;

    public function __construct(Connection $conn) {
        $this->conn = $conn;
    }

    private static function key(int $id = 0): string {
        return "repo:" . $id;
    }
}
"#;
    let tree = get_adapter("php").unwrap().parse("src/Repo.php", source).unwrap();
    assert_eq!(tree.strategy, Strategy::Grammar);

    let class = tree.get("class:Repo").expect("class node");
    assert!(class.members.contains("key"));
    assert!(class.bases.iter().any(|b| b.contains("Base")));

    let key = tree.get("class:Repo.key").expect("method node");
    assert!(key.modifiers.contains("private"));
    assert!(key.modifiers.contains("static"));
    assert_eq!(key.signature.as_ref().unwrap().arity(), 1);
}

#[test]
#[cfg(feature = "tree-sitter")]
fn test_typescript_and_javascript_functions() {
    let ts = "export async function load(id: number): Promise<User> {\n    return await db.get(id);\n}\n";
    let tree = get_adapter("ts").unwrap().parse("src/load.ts", ts).unwrap();
    assert_eq!(tree.language, Language::TypeScript);
    let load = tree.get("func:load").expect("function node");
    assert!(load.is_async());
    assert!(load.signature.as_ref().unwrap().return_type.is_some());

    let js = "class Cart {\n  total() {\n    return this.items.reduce((a, b) => a + b, 0);\n  }\n}\n";
    let tree = get_adapter("js").unwrap().parse("src/cart.js", js).unwrap();
    assert_eq!(tree.language, Language::JavaScript);
    assert!(tree.get("class:Cart").is_some());
    assert!(tree.get("class:Cart.total").is_some());
}

// =============================================================================
// Directory pairing
// =============================================================================

fn write(root: &Path, relative: &str, content: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

#[test]
fn test_collect_pairs() {
    let before = tempfile::tempdir().unwrap();
    let after = tempfile::tempdir().unwrap();

    write(before.path(), "pkg/same.py", "x = 1\n");
    write(after.path(), "pkg/same.py", "x = 1\n");
    write(before.path(), "pkg/edit.py", "x = 1\n");
    write(after.path(), "pkg/edit.py", "x = 2\n");
    write(before.path(), "gone.php", "<?php\n");
    write(after.path(), "web/new.ts", "export const a = 1;\n");
    write(after.path(), "README.md", "docs\n");
    write(after.path(), "node_modules/dep/index.js", "module.exports = 1;\n");
    write(after.path(), ".cache/tmp.py", "y = 1\n");
    write(after.path(), "gen/out.py", "z = 1\n");

    let mut config = EngineConfig::default();
    config.exclude = vec!["gen/**".into()];
    let exclude = config.exclude_set().unwrap();
    let changes = collect_pairs(before.path(), after.path(), &exclude).unwrap();

    let paths: Vec<&str> = changes.iter().map(|c| c.path.as_str()).collect();
    assert_eq!(paths, vec!["gone.php", "pkg/edit.py", "web/new.ts"]);

    let gone = &changes[0];
    assert!(gone.before.is_some() && gone.after.is_none());
    assert_eq!(gone.language, "php");

    let edit = &changes[1];
    assert_eq!(edit.before.as_deref(), Some("x = 1\n"));
    assert_eq!(edit.after.as_deref(), Some("x = 2\n"));

    let new = &changes[2];
    assert!(new.before.is_none() && new.after.is_some());
    assert_eq!(new.language, "ts");
}
