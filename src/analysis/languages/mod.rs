//! Language adapter implementations and lookup.

mod javascript;
mod php;
mod python;

pub use javascript::JavaScriptAdapter;
pub use php::PhpAdapter;
pub use python::PythonAdapter;

use std::fmt;

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use super::LanguageAdapter;

/// Supported input languages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Php,
    JavaScript,
    TypeScript,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Php => "php",
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
        }
    }

    /// Resolve a caller-supplied language tag. Case-insensitive; accepts
    /// language names and common file extensions.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim().trim_start_matches('.').to_lowercase().as_str() {
            "python" | "py" | "pyw" => Some(Language::Python),
            "php" | "phtml" => Some(Language::Php),
            "javascript" | "js" | "jsx" | "mjs" | "cjs" => Some(Language::JavaScript),
            "typescript" | "ts" | "tsx" | "mts" | "cts" => Some(Language::TypeScript),
            _ => None,
        }
    }

    /// Language for a file path, by extension.
    pub fn from_path(path: &str) -> Option<Self> {
        std::path::Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_tag)
    }

    /// The adapter that parses this language.
    pub fn adapter(&self) -> &'static dyn LanguageAdapter {
        match self {
            Language::Python => PYTHON_ADAPTER.get_or_init(PythonAdapter::new),
            Language::Php => PHP_ADAPTER.get_or_init(PhpAdapter::new),
            Language::JavaScript => JAVASCRIPT_ADAPTER.get_or_init(JavaScriptAdapter::javascript),
            Language::TypeScript => TYPESCRIPT_ADAPTER.get_or_init(JavaScriptAdapter::typescript),
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Static storage for the Python adapter.
static PYTHON_ADAPTER: OnceCell<PythonAdapter> = OnceCell::new();

/// Static storage for the PHP adapter.
static PHP_ADAPTER: OnceCell<PhpAdapter> = OnceCell::new();

/// Static storage for the JavaScript adapter.
static JAVASCRIPT_ADAPTER: OnceCell<JavaScriptAdapter> = OnceCell::new();

/// Static storage for the TypeScript adapter.
static TYPESCRIPT_ADAPTER: OnceCell<JavaScriptAdapter> = OnceCell::new();

/// Get an adapter for the given language tag.
///
/// Returns None for unsupported tags.
pub fn get_adapter(tag: &str) -> Option<&'static dyn LanguageAdapter> {
    Language::from_tag(tag).map(|l| l.adapter())
}

/// Get all supported file extensions.
pub fn registered_extensions() -> Vec<&'static str> {
    [
        Language::Python,
        Language::Php,
        Language::JavaScript,
        Language::TypeScript,
    ]
    .iter()
    .flat_map(|l| l.adapter().file_extensions().iter().copied())
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_tag() {
        assert_eq!(Language::from_tag("Python"), Some(Language::Python));
        assert_eq!(Language::from_tag(".py"), Some(Language::Python));
        assert_eq!(Language::from_tag("PHP"), Some(Language::Php));
        assert_eq!(Language::from_tag("jsx"), Some(Language::JavaScript));
        assert_eq!(Language::from_tag("tsx"), Some(Language::TypeScript));
        assert_eq!(Language::from_tag("cobol"), None);
    }

    #[test]
    fn test_from_path() {
        assert_eq!(Language::from_path("src/app.ts"), Some(Language::TypeScript));
        assert_eq!(Language::from_path("Makefile"), None);
    }

    #[test]
    fn test_adapter_lookup() {
        let adapter = get_adapter("py").unwrap();
        assert_eq!(adapter.language(), Language::Python);
        assert!(adapter.handles_extension("py"));
        assert!(get_adapter("rust").is_none());
        assert!(registered_extensions().contains(&"php"));
    }
}
