//! Identifier tables used by the heuristic rules.
//!
//! Lookups match either the full callee text (`pickle.loads`) or its last
//! segment (`loads`) so that `self.`/`$this->` receivers do not hide a match.

use phf::{phf_map, phf_set};

/// Sensitive APIs and their severity in [0, 1].
pub static SENSITIVE_APIS: phf::Map<&'static str, f64> = phf_map! {
    "eval" => 1.0,
    "exec" => 1.0,
    "execfile" => 1.0,
    "compile" => 0.6,
    "__import__" => 0.6,
    "pickle.loads" => 0.9,
    "pickle.load" => 0.9,
    "cPickle.loads" => 0.9,
    "marshal.loads" => 0.9,
    "shelve.open" => 0.6,
    "yaml.load" => 0.7,
    "os.system" => 1.0,
    "os.popen" => 0.9,
    "subprocess.call" => 0.6,
    "subprocess.Popen" => 0.6,
    "subprocess.getoutput" => 0.9,
    "commands.getoutput" => 0.9,
    "tempfile.mktemp" => 0.6,
    "hashlib.md5" => 0.6,
    "hashlib.sha1" => 0.5,
    "md5" => 0.6,
    "sha1" => 0.5,
    "random.random" => 0.4,
    "shell_exec" => 1.0,
    "system" => 0.8,
    "passthru" => 1.0,
    "proc_open" => 0.8,
    "popen" => 0.8,
    "unserialize" => 0.9,
    "create_function" => 0.9,
    "assert" => 0.3,
    "extract" => 0.5,
    "mysql_query" => 0.8,
    "mt_rand" => 0.4,
    "child_process.exec" => 1.0,
    "execSync" => 0.9,
    "Function" => 0.8,
    "document.write" => 0.7,
    "setInnerHTML" => 0.7,
    "dangerouslySetInnerHTML" => 0.7,
    "Math.random" => 0.4,
};

/// Safer replacements whose appearance corroborates a security improvement.
pub static SAFER_APIS: phf::Set<&'static str> = phf_set! {
    "literal_eval",
    "safe_load",
    "sha256",
    "sha512",
    "blake2b",
    "pbkdf2_hmac",
    "compare_digest",
    "token_bytes",
    "token_hex",
    "token_urlsafe",
    "mkstemp",
    "NamedTemporaryFile",
    "shlex.quote",
    "password_hash",
    "password_verify",
    "hash_equals",
    "random_bytes",
    "random_int",
    "escapeshellarg",
    "htmlspecialchars",
    "prepare",
    "bindParam",
    "execFile",
    "spawn",
    "getRandomValues",
    "randomUUID",
    "DOMPurify.sanitize",
};

/// Decorators and attributes that memoise a callable.
pub static CACHE_DECORATORS: phf::Set<&'static str> = phf_set! {
    "lru_cache",
    "cache",
    "cached",
    "cached_property",
    "memoize",
    "memoized",
    "Cacheable",
    "Cache",
};

/// Calls that start concurrent work.
pub static CONCURRENCY_APIS: phf::Set<&'static str> = phf_set! {
    "Thread",
    "ThreadPoolExecutor",
    "ProcessPoolExecutor",
    "Process",
    "Pool",
    "gather",
    "create_task",
    "ensure_future",
    "run_in_executor",
    "to_thread",
    "start_new_thread",
    "Promise.all",
    "Promise.allSettled",
    "Promise.race",
    "Promise.any",
    "Worker",
    "pcntl_fork",
    "Fiber",
};

/// Calls that check an input's type or value.
pub static VALIDATION_APIS: phf::Set<&'static str> = phf_set! {
    "isinstance",
    "issubclass",
    "callable",
    "validate",
    "is_valid",
    "validator",
    "is_numeric",
    "is_string",
    "is_int",
    "is_array",
    "is_null",
    "filter_var",
    "ctype_digit",
    "preg_match",
    "Array.isArray",
    "Number.isInteger",
    "Number.isFinite",
    "isNaN",
    "Number.isNaN",
    "assertValid",
};

const LOGGER_PREFIXES: &[&str] = &[
    "logging.",
    "logger.",
    "log.",
    "console.",
    "self.logger.",
    "self.log.",
    "this.logger.",
    "this.log.",
    "$this->logger->",
    "$logger->",
    "log::",
    "monolog",
];

const LOGGER_FUNCTIONS: &[&str] = &["error_log", "syslog", "warnings.warn"];

/// Last segment of a callee: `self.cache.get` -> `get`, `$this->run` -> `run`.
pub fn last_segment(callee: &str) -> &str {
    callee
        .rsplit(|c| c == '.' || c == ':' || c == '>' || c == '\\')
        .next()
        .unwrap_or(callee)
        .trim_start_matches('$')
}

fn lookup_set(set: &phf::Set<&'static str>, callee: &str) -> bool {
    set.contains(callee) || set.contains(last_segment(callee))
}

/// Severity of a sensitive callee, if it is one.
pub fn sensitive(callee: &str) -> Option<(&'static str, f64)> {
    SENSITIVE_APIS
        .get_entry(callee)
        .or_else(|| SENSITIVE_APIS.get_entry(last_segment(callee)))
        .map(|(k, v)| (*k, *v))
}

pub fn is_safer(callee: &str) -> bool {
    lookup_set(&SAFER_APIS, callee)
}

pub fn is_caching_decorator(decorator: &str) -> bool {
    let name = decorator.split('(').next().unwrap_or(decorator).trim();
    lookup_set(&CACHE_DECORATORS, name)
}

pub fn is_cache_call(callee: &str) -> bool {
    let lower = callee.to_lowercase();
    lower.contains("cache") || lower.contains("redis") || lower.contains("memcache")
        || lower.starts_with("apcu_")
}

pub fn is_concurrency_call(callee: &str) -> bool {
    lookup_set(&CONCURRENCY_APIS, callee)
}

pub fn is_validation_call(callee: &str) -> bool {
    lookup_set(&VALIDATION_APIS, callee)
}

pub fn is_logging_call(callee: &str) -> bool {
    let lower = callee.to_lowercase();
    LOGGER_PREFIXES.iter().any(|p| lower.starts_with(p))
        || LOGGER_FUNCTIONS.contains(&lower.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_segment() {
        assert_eq!(last_segment("self.cache.get"), "get");
        assert_eq!(last_segment("$this->run"), "run");
        assert_eq!(last_segment("Foo::bar"), "bar");
        assert_eq!(last_segment("plain"), "plain");
    }

    #[test]
    fn test_sensitive_lookup() {
        assert_eq!(sensitive("pickle.loads"), Some(("pickle.loads", 0.9)));
        assert_eq!(sensitive("builtins.eval").map(|(k, _)| k), Some("eval"));
        assert!(sensitive("json.loads").is_none());
    }

    #[test]
    fn test_classifiers() {
        assert!(is_logging_call("logger.info"));
        assert!(is_logging_call("console.log"));
        assert!(is_logging_call("$this->logger->warning"));
        assert!(!is_logging_call("login"));
        assert!(is_caching_decorator("functools.lru_cache(maxsize=32)"));
        assert!(is_cache_call("self.cache.get"));
        assert!(is_concurrency_call("asyncio.gather"));
        assert!(is_validation_call("isinstance"));
        assert!(is_safer("ast.literal_eval"));
    }
}
