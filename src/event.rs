//! Semantic event taxonomy and the event record handed to callers.

use std::collections::HashSet;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Pipeline layer that produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Layer {
    Structural,
    Syntactic,
    Semantic,
    Behavioral,
    Pattern,
    Interpreter,
}

impl Layer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Layer::Structural => "1",
            Layer::Syntactic => "2",
            Layer::Semantic => "3",
            Layer::Behavioral => "4",
            Layer::Pattern => "5a",
            Layer::Interpreter => "5b",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "1" => Some(Layer::Structural),
            "2" => Some(Layer::Syntactic),
            "3" => Some(Layer::Semantic),
            "4" => Some(Layer::Behavioral),
            "5a" => Some(Layer::Pattern),
            "5b" => Some(Layer::Interpreter),
            _ => None,
        }
    }

    /// Layers 1-4 are rule-exact and always report full confidence.
    pub fn is_deterministic(&self) -> bool {
        !matches!(self, Layer::Pattern | Layer::Interpreter)
    }
}

impl std::fmt::Display for Layer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for Layer {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Layer {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Layer::parse(&s).ok_or_else(|| serde::de::Error::custom(format!("unknown layer: {}", s)))
    }
}

macro_rules! event_types {
    ($( $layer:ident => { $( $variant:ident = $name:literal ),+ $(,)? } )+) => {
        /// Every event type the engine can report.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum EventType {
            $( $( $variant, )+ )+
        }

        impl EventType {
            pub const ALL: &'static [EventType] = &[ $( $( EventType::$variant, )+ )+ ];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $( $( EventType::$variant => $name, )+ )+
                }
            }

            pub fn parse(s: &str) -> Option<Self> {
                match s {
                    $( $( $name => Some(EventType::$variant), )+ )+
                    _ => None,
                }
            }

            /// Lowest layer allowed to emit this type. Interpretive types
            /// report [`Layer::Pattern`] and may also come from the interpreter.
            pub fn layer(&self) -> Layer {
                match self {
                    $( $( EventType::$variant => Layer::$layer, )+ )+
                }
            }
        }
    };
}

event_types! {
    Structural => {
        FileAdded = "file_added",
        FileRemoved = "file_removed",
        FileContentChanged = "file_content_changed",
        NodeAdded = "node_added",
        NodeRemoved = "node_removed",
        DependencyAdded = "dependency_added",
        DependencyRemoved = "dependency_removed",
    }
    Syntactic => {
        SignatureChanged = "signature_changed",
        ReturnTypeChanged = "return_type_changed",
        DecoratorAdded = "decorator_added",
        DecoratorRemoved = "decorator_removed",
        FunctionMadeAsync = "function_made_async",
        FunctionMadeSync = "function_made_sync",
        InheritanceChanged = "inheritance_changed",
        DefaultParametersAdded = "default_parameters_added",
        DefaultParametersRemoved = "default_parameters_removed",
        VisibilityChanged = "visibility_changed",
    }
    Semantic => {
        ControlFlowChanged = "control_flow_changed",
        FunctionMadeGenerator = "function_made_generator",
        GeneratorMadeFunction = "generator_made_function",
        ExceptionHandlingAdded = "exception_handling_added",
        ExceptionHandlingRemoved = "exception_handling_removed",
        ExceptionHandlingChanged = "exception_handling_changed",
        ExceptionRaisingChanged = "exception_raising_changed",
        InternalCallAdded = "internal_call_added",
        InternalCallRemoved = "internal_call_removed",
        ComprehensionUsageChanged = "comprehension_usage_changed",
        LambdaUsageChanged = "lambda_usage_changed",
        AwaitUsageChanged = "await_usage_changed",
        GlobalScopeChanged = "global_scope_changed",
        NonlocalScopeChanged = "nonlocal_scope_changed",
    }
    Behavioral => {
        BinaryOperatorUsageChanged = "binary_operator_usage_changed",
        UnaryOperatorUsageChanged = "unary_operator_usage_changed",
        ComparisonOperatorUsageChanged = "comparison_operator_usage_changed",
        LogicalOperatorUsageChanged = "logical_operator_usage_changed",
        StringLiteralUsageChanged = "string_literal_usage_changed",
        NumericLiteralUsageChanged = "numeric_literal_usage_changed",
        BooleanLiteralUsageChanged = "boolean_literal_usage_changed",
        NoneLiteralUsageChanged = "none_literal_usage_changed",
        AttributeAccessChanged = "attribute_access_changed",
        SubscriptAccessChanged = "subscript_access_changed",
        AssignmentPatternChanged = "assignment_pattern_changed",
        AugmentedAssignmentChanged = "augmented_assignment_changed",
        FunctionComplexityChanged = "function_complexity_changed",
        ClassMethodsChanged = "class_methods_changed",
        ClassAttributesChanged = "class_attributes_changed",
    }
    Pattern => {
        RefactoringExtractMethod = "refactoring_extract_method",
        RefactoringInlineMethod = "refactoring_inline_method",
        AlgorithmOptimized = "algorithm_optimized",
        AlgorithmChanged = "algorithm_changed",
        PerformanceOptimization = "performance_optimization",
        SecurityVulnerability = "security_vulnerability",
        SecurityImprovement = "security_improvement",
        ErrorHandlingImproved = "error_handling_improved",
        ErrorHandlingRemoved = "error_handling_removed",
        ApiBreakingChange = "api_breaking_change",
        ApiExtension = "api_extension",
        FeatureAddition = "feature_addition",
        FeatureRemoval = "feature_removal",
        BugFix = "bug_fix",
        LoggingAdded = "logging_added",
        LoggingRemoved = "logging_removed",
        ValidationAdded = "validation_added",
        ValidationRemoved = "validation_removed",
        CachingAdded = "caching_added",
        CachingRemoved = "caching_removed",
        AsyncConversion = "async_conversion",
        ConcurrencyIntroduced = "concurrency_introduced",
        DeadCodeRemoved = "dead_code_removed",
        CodeCleanup = "code_cleanup",
    }
}

impl EventType {
    /// Types the pattern recognizer and interpreter may emit.
    pub fn is_interpretive(&self) -> bool {
        self.layer() == Layer::Pattern
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One detected change, in the shape callers persist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticEvent {
    pub event_type: EventType,
    pub node_id: String,
    /// File path the event belongs to.
    pub location: String,
    pub layer: Layer,
    pub confidence: f64,
    pub details: String,
    pub reasoning: Option<String>,
    pub impact: Option<String>,
}

impl SemanticEvent {
    /// A rule-exact event from layers 1-4.
    pub fn deterministic(
        event_type: EventType,
        node_id: impl Into<String>,
        location: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        debug_assert!(event_type.layer().is_deterministic());
        Self {
            event_type,
            node_id: node_id.into(),
            location: location.into(),
            layer: event_type.layer(),
            confidence: 1.0,
            details: details.into(),
            reasoning: None,
            impact: None,
        }
    }

    /// An interpretive event; confidence is clamped to [0, 1].
    pub fn interpretive(
        event_type: EventType,
        layer: Layer,
        node_id: impl Into<String>,
        location: impl Into<String>,
        confidence: f64,
        details: impl Into<String>,
    ) -> Self {
        Self {
            event_type,
            node_id: node_id.into(),
            location: location.into(),
            layer,
            confidence: clamp_confidence(confidence),
            details: details.into(),
            reasoning: None,
            impact: None,
        }
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }

    /// Attach an impact note; empty text leaves `impact` unset.
    pub fn with_impact(mut self, impact: impl Into<String>) -> Self {
        let impact = impact.into();
        if !impact.is_empty() {
            self.impact = Some(impact);
        }
        self
    }

    /// Identity used for deduplication. Confidence and prose are ignored.
    pub fn key(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}",
            self.layer, self.event_type, self.location, self.node_id, self.details
        )
    }
}

/// Clamp to [0, 1]; NaN becomes 0.
pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Drop repeated events, keeping the first occurrence and the original order.
pub fn dedup_events(events: Vec<SemanticEvent>) -> Vec<SemanticEvent> {
    let mut seen = HashSet::new();
    events.into_iter().filter(|e| seen.insert(e.key())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taxonomy_round_trips_names() {
        for ty in EventType::ALL {
            assert_eq!(EventType::parse(ty.as_str()), Some(*ty));
        }
        assert_eq!(EventType::ALL.len(), 70);
        assert_eq!(EventType::parse("renamed"), None);
    }

    #[test]
    fn test_interpretive_subset() {
        assert!(EventType::BugFix.is_interpretive());
        assert!(EventType::CodeCleanup.is_interpretive());
        assert!(!EventType::NodeAdded.is_interpretive());
        assert_eq!(EventType::ALL.iter().filter(|t| t.is_interpretive()).count(), 24);
    }

    #[test]
    fn test_event_serialization_shape() {
        let event =
            SemanticEvent::deterministic(EventType::NodeAdded, "func:f", "a.py", "added function f");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "node_added");
        assert_eq!(json["layer"], "1");
        assert_eq!(json["confidence"], 1.0);
        assert!(json["reasoning"].is_null());
        assert!(json["impact"].is_null());

        let back: SemanticEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_interpretive_confidence_clamped() {
        let high = SemanticEvent::interpretive(
            EventType::BugFix,
            Layer::Interpreter,
            "func:f",
            "a.py",
            1.7,
            "",
        );
        assert_eq!(high.confidence, 1.0);
        assert_eq!(high.layer.as_str(), "5b");
        assert_eq!(clamp_confidence(-0.2), 0.0);
        assert_eq!(clamp_confidence(f64::NAN), 0.0);
    }

    #[test]
    fn test_dedup_keeps_first() {
        let a = SemanticEvent::deterministic(EventType::NodeAdded, "func:f", "a.py", "x");
        let b = SemanticEvent::deterministic(EventType::NodeRemoved, "func:g", "a.py", "y");
        let events = dedup_events(vec![a.clone(), b.clone(), a.clone()]);
        assert_eq!(events, vec![a, b]);
    }
}
