//! Engine configuration loaded from YAML.

use std::fs;
use std::path::Path;
use std::time::Duration;

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Commented default configuration written by `changesense init`.
pub const DEFAULT_CONFIG_YAML: &str = include_str!("templates/default.yaml");

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub layers: LayerToggles,
    pub thresholds: Thresholds,
    pub patterns: PatternConfig,
    pub gate: GateConfig,
    pub interpreter: InterpreterConfig,
    /// Ordered provider chain; the first entry is tried first.
    pub providers: Vec<ProviderConfig>,
    /// Glob patterns skipped in directory mode.
    pub exclude: Vec<String>,
}

impl EngineConfig {
    /// Parse an engine configuration from a YAML file.
    pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse_str(&content)
    }

    pub fn parse_str(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Compiled exclude patterns.
    pub fn exclude_set(&self) -> Result<GlobSet, ConfigError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &self.exclude {
            let glob = Glob::new(pattern)
                .map_err(|e| ConfigError::invalid("exclude", format!("{:?}: {}", pattern, e)))?;
            builder.add(glob);
        }
        builder
            .build()
            .map_err(|e| ConfigError::invalid("exclude", e.to_string()))
    }
}

/// Which pipeline layers run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayerToggles {
    pub structural: bool,
    pub syntactic: bool,
    pub semantic: bool,
    pub behavioral: bool,
    pub patterns: bool,
    pub interpreter: bool,
}

impl Default for LayerToggles {
    fn default() -> Self {
        Self {
            structural: true,
            syntactic: true,
            semantic: true,
            behavioral: true,
            patterns: true,
            interpreter: true,
        }
    }
}

/// Layer 4 sensitivity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Histogram L1 distance that must be exceeded to report a change.
    pub histogram_tolerance: usize,
    /// Minimum absolute change in decision points.
    pub complexity_delta: usize,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            histogram_tolerance: 0,
            complexity_delta: 2,
        }
    }
}

/// Layer 5a settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternConfig {
    pub min_confidence: f64,
    pub disabled_rules: Vec<String>,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.5,
            disabled_rules: Vec::new(),
        }
    }
}

impl PatternConfig {
    pub fn is_enabled(&self, rule: &str) -> bool {
        !self.disabled_rules.iter().any(|r| r == rule)
    }
}

/// Layer 5b gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Minimum score required to invoke a provider.
    pub threshold: f64,
    pub weights: GateWeights,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            threshold: 5.0,
            weights: GateWeights::default(),
        }
    }
}

/// Per-input weights of the default gate scorer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateWeights {
    /// Per KiB of the larger snapshot.
    pub file_kib: f64,
    /// Per layer 1-5a event.
    pub lower_event: f64,
    /// Per import in the after snapshot.
    pub import: f64,
    /// Per decorator in the after snapshot.
    pub decorator: f64,
}

impl Default for GateWeights {
    fn default() -> Self {
        Self {
            file_kib: 0.25,
            lower_event: 1.0,
            import: 0.5,
            decorator: 0.5,
        }
    }
}

/// Layer 5b provider call policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpreterConfig {
    pub timeout_ms: u64,
    /// Retries per provider after the first attempt.
    pub max_retries: u32,
    /// Base backoff, doubled on every retry.
    pub backoff_ms: u64,
    /// `None` means unlimited.
    pub max_calls_per_run: Option<usize>,
    pub max_concurrent_calls: usize,
    /// Node text beyond this many characters is truncated in prompts.
    pub max_prompt_chars: usize,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            max_retries: 2,
            backoff_ms: 500,
            max_calls_per_run: Some(100),
            max_concurrent_calls: 4,
            max_prompt_chars: 12_000,
        }
    }
}

impl InterpreterConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

/// One OpenAI-compatible endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub base_url: String,
    pub model: String,
    /// Environment variable holding the API key; omitted for local servers.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

/// Validate a configuration.
pub fn validate(config: &EngineConfig) -> Result<(), ConfigError> {
    let gate = &config.gate;
    if !gate.threshold.is_finite() || gate.threshold < 0.0 {
        return Err(ConfigError::invalid(
            "gate.threshold",
            format!("must be a non-negative number, got {}", gate.threshold),
        ));
    }
    let weights = [
        ("gate.weights.file_kib", gate.weights.file_kib),
        ("gate.weights.lower_event", gate.weights.lower_event),
        ("gate.weights.import", gate.weights.import),
        ("gate.weights.decorator", gate.weights.decorator),
    ];
    for (field, value) in weights {
        if !value.is_finite() || value < 0.0 {
            return Err(ConfigError::invalid(
                field,
                format!("must be a non-negative number, got {}", value),
            ));
        }
    }

    let min_confidence = config.patterns.min_confidence;
    if !(0.0..=1.0).contains(&min_confidence) {
        return Err(ConfigError::invalid(
            "patterns.min_confidence",
            format!("must be within [0, 1], got {}", min_confidence),
        ));
    }
    let known = crate::patterns::rule_names();
    for rule in &config.patterns.disabled_rules {
        if !known.contains(&rule.as_str()) {
            return Err(ConfigError::invalid(
                "patterns.disabled_rules",
                format!("unknown rule {:?}, expected one of {}", rule, known.join(", ")),
            ));
        }
    }

    let interp = &config.interpreter;
    if interp.timeout_ms == 0 {
        return Err(ConfigError::invalid("interpreter.timeout_ms", "must be positive"));
    }
    if interp.max_concurrent_calls == 0 {
        return Err(ConfigError::invalid(
            "interpreter.max_concurrent_calls",
            "must be positive",
        ));
    }
    if interp.max_prompt_chars == 0 {
        return Err(ConfigError::invalid("interpreter.max_prompt_chars", "must be positive"));
    }

    for (i, provider) in config.providers.iter().enumerate() {
        let field = |name: &str| format!("providers[{}].{}", i, name);
        if provider.name.trim().is_empty() {
            return Err(ConfigError::invalid(field("name"), "must not be empty"));
        }
        if provider.base_url.trim().is_empty() {
            return Err(ConfigError::invalid(field("base_url"), "must not be empty"));
        }
        if !provider.base_url.starts_with("http://") && !provider.base_url.starts_with("https://")
        {
            return Err(ConfigError::invalid(
                field("base_url"),
                format!("expected an http(s) URL, got {:?}", provider.base_url),
            ));
        }
        if provider.model.trim().is_empty() {
            return Err(ConfigError::invalid(field("model"), "must not be empty"));
        }
    }

    config.exclude_set()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.thresholds.histogram_tolerance, 0);
        assert_eq!(config.thresholds.complexity_delta, 2);
        assert_eq!(config.gate.threshold, 5.0);
        assert_eq!(config.interpreter.max_calls_per_run, Some(100));
        assert!(config.layers.interpreter);
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_default_template_matches_defaults() {
        let parsed = EngineConfig::parse_str(DEFAULT_CONFIG_YAML).unwrap();
        assert_eq!(parsed, EngineConfig::default());
    }

    #[test]
    fn test_partial_yaml_keeps_other_defaults() {
        let yaml = r#"
thresholds:
  complexity_delta: 5
interpreter:
  max_calls_per_run: null
providers:
  - name: local
    base_url: http://localhost:11434/v1
    model: llama3
"#;
        let config = EngineConfig::parse_str(yaml).unwrap();
        assert_eq!(config.thresholds.complexity_delta, 5);
        assert_eq!(config.thresholds.histogram_tolerance, 0);
        assert_eq!(config.interpreter.max_calls_per_run, None);
        assert_eq!(config.interpreter.timeout_ms, 30_000);
        assert_eq!(config.providers[0].api_key_env, None);
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = EngineConfig::default();
        config.patterns.min_confidence = 1.5;
        assert!(validate(&config).is_err());

        let mut config = EngineConfig::default();
        config.gate.threshold = f64::NAN;
        assert!(validate(&config).is_err());

        let mut config = EngineConfig::default();
        config.interpreter.timeout_ms = 0;
        assert!(validate(&config).is_err());

        let mut config = EngineConfig::default();
        config.patterns.disabled_rules = vec!["no-such-rule".into()];
        assert!(validate(&config).is_err());

        let mut config = EngineConfig::default();
        config.exclude = vec!["[".into()];
        assert!(validate(&config).is_err());

        let mut config = EngineConfig::default();
        config.providers.push(ProviderConfig {
            name: "x".into(),
            base_url: "ftp://nope".into(),
            model: "m".into(),
            api_key_env: None,
            system_prompt: None,
        });
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("providers[0].base_url"));
    }

    #[test]
    fn test_exclude_set_matches() {
        let config = EngineConfig {
            exclude: vec!["**/vendor/**".into(), "*.min.js".into()],
            ..Default::default()
        };
        let set = config.exclude_set().unwrap();
        assert!(set.is_match("app/vendor/lib.php"));
        assert!(set.is_match("bundle.min.js"));
        assert!(!set.is_match("src/app.js"));
    }

    #[test]
    fn test_disabled_rules() {
        let config = PatternConfig {
            disabled_rules: vec!["logging".into()],
            ..Default::default()
        };
        assert!(!config.is_enabled("logging"));
        assert!(config.is_enabled("caching"));
    }
}
