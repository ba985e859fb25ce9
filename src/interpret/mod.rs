//! Layer 5b: gated interpretation by an external provider.
//!
//! A file moves through a small state machine:
//!
//! ```text
//! Idle -> GateCheck -> Skip -> Idle
//!                   -> Invoke -> Calling -> Success -> ParseResponse -> Emit -> Idle
//!                                                                     -> Discard -> Idle
//!                                        -> Timeout -> Idle
//!                                        -> Error -> Idle
//! ```
//!
//! Every exit path returns normally. Provider trouble only means the file
//! keeps its layer 1-5a events.

mod budget;
mod gate;
mod prompt;
mod provider;
mod response;

pub use budget::CallBudget;
pub use gate::{evaluate, is_trivial, GateDecision, GateInput, GateScorer, SkipReason, WeightedGateScorer};
pub use prompt::{build_prompt, Prompt, DEFAULT_SYSTEM_PROMPT};
pub use provider::{AiProvider, OpenAiCompatibleProvider, ProviderChain, RawResponse};
pub use response::{parse_response, to_events, AbstractEvent};

use tracing::{debug, warn};

use crate::context::AnalysisContext;
use crate::error::ProviderError;
use crate::event::SemanticEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterpreterState {
    Idle,
    GateCheck,
    Skip,
    Invoke,
    Calling,
    Success,
    Timeout,
    Error,
    ParseResponse,
    Emit,
    Discard,
}

impl InterpreterState {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterpreterState::Idle => "idle",
            InterpreterState::GateCheck => "gate_check",
            InterpreterState::Skip => "skip",
            InterpreterState::Invoke => "invoke",
            InterpreterState::Calling => "calling",
            InterpreterState::Success => "success",
            InterpreterState::Timeout => "timeout",
            InterpreterState::Error => "error",
            InterpreterState::ParseResponse => "parse_response",
            InterpreterState::Emit => "emit",
            InterpreterState::Discard => "discard",
        }
    }

    /// Legal successor states.
    pub fn can_move_to(&self, next: InterpreterState) -> bool {
        use InterpreterState::*;
        matches!(
            (self, next),
            (Idle, GateCheck)
                | (GateCheck, Skip)
                | (GateCheck, Invoke)
                | (Skip, Idle)
                | (Invoke, Calling)
                | (Calling, Success)
                | (Calling, Timeout)
                | (Calling, Error)
                | (Success, ParseResponse)
                | (ParseResponse, Emit)
                | (ParseResponse, Discard)
                | (Timeout, Idle)
                | (Error, Idle)
                | (Emit, Idle)
                | (Discard, Idle)
        )
    }
}

impl std::fmt::Display for InterpreterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// States visited for one file, starting at `Idle`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateTrace {
    path: String,
    states: Vec<InterpreterState>,
}

impl StateTrace {
    fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            states: vec![InterpreterState::Idle],
        }
    }

    fn current(&self) -> InterpreterState {
        self.states
            .last()
            .copied()
            .unwrap_or(InterpreterState::Idle)
    }

    fn advance(&mut self, next: InterpreterState) {
        let from = self.current();
        debug_assert!(from.can_move_to(next), "illegal transition {} -> {}", from, next);
        debug!(path = %self.path, from = %from, to = %next, "interpreter transition");
        self.states.push(next);
    }

    pub fn states(&self) -> &[InterpreterState] {
        &self.states
    }

    pub fn visited(&self, state: InterpreterState) -> bool {
        self.states.contains(&state)
    }
}

/// Result of running layer 5b on one file.
#[derive(Debug, Clone)]
pub struct Interpretation {
    pub events: Vec<SemanticEvent>,
    pub skipped: Option<SkipReason>,
    pub trace: StateTrace,
}

/// Run the gate and, if it passes, the provider chain for one file.
pub async fn interpret(ctx: &AnalysisContext, input: &GateInput<'_>) -> Interpretation {
    let mut trace = StateTrace::new(&input.after.path);
    trace.advance(InterpreterState::GateCheck);

    let decision = if !ctx.config().layers.interpreter {
        GateDecision::Skip(SkipReason::Disabled)
    } else if ctx.providers().is_empty() {
        GateDecision::Skip(SkipReason::NoProviders)
    } else if ctx.is_cancelled() {
        GateDecision::Skip(SkipReason::Cancelled)
    } else {
        evaluate(ctx.scorer(), &ctx.config().gate, input)
    };

    if let GateDecision::Skip(reason) = decision {
        debug!(path = %input.after.path, reason = %reason, "interpreter skipped");
        ctx.counters().gate_skip();
        trace.advance(InterpreterState::Skip);
        trace.advance(InterpreterState::Idle);
        return Interpretation {
            events: Vec::new(),
            skipped: Some(reason),
            trace,
        };
    }

    trace.advance(InterpreterState::Invoke);
    ctx.counters().interpreter_run();
    let prompt = build_prompt(input, ctx.config().interpreter.max_prompt_chars);

    trace.advance(InterpreterState::Calling);
    let response = ctx.providers().complete(&prompt, ctx.cancel_token()).await;
    let response = match response {
        Ok(response) => {
            trace.advance(InterpreterState::Success);
            response
        }
        Err(e) => {
            warn!(path = %input.after.path, error = %e, "interpreter degraded to lower layers");
            ctx.counters().provider_failure();
            let state = match e {
                ProviderError::Timeout(_) => InterpreterState::Timeout,
                _ => InterpreterState::Error,
            };
            trace.advance(state);
            trace.advance(InterpreterState::Idle);
            return Interpretation {
                events: Vec::new(),
                skipped: None,
                trace,
            };
        }
    };

    trace.advance(InterpreterState::ParseResponse);
    let events = match parse_response(&response.text) {
        Some(abstract_events) => {
            trace.advance(InterpreterState::Emit);
            to_events(abstract_events, input, &response.provider)
        }
        None => {
            warn!(
                path = %input.after.path,
                provider = %response.provider,
                "discarding unparseable interpreter response"
            );
            ctx.counters().discarded_response();
            trace.advance(InterpreterState::Discard);
            Vec::new()
        }
    };
    trace.advance(InterpreterState::Idle);

    Interpretation {
        events,
        skipped: None,
        trace,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_table() {
        use InterpreterState::*;
        assert!(Idle.can_move_to(GateCheck));
        assert!(GateCheck.can_move_to(Skip));
        assert!(Calling.can_move_to(Timeout));
        assert!(ParseResponse.can_move_to(Discard));
        assert!(!Idle.can_move_to(Calling));
        assert!(!Skip.can_move_to(Calling));
        assert!(!Timeout.can_move_to(ParseResponse));
    }

    #[test]
    fn test_trace_records_path() {
        let mut trace = StateTrace::new("a.py");
        trace.advance(InterpreterState::GateCheck);
        trace.advance(InterpreterState::Skip);
        trace.advance(InterpreterState::Idle);
        assert_eq!(
            trace.states(),
            &[
                InterpreterState::Idle,
                InterpreterState::GateCheck,
                InterpreterState::Skip,
                InterpreterState::Idle
            ]
        );
        assert!(!trace.visited(InterpreterState::Calling));
    }
}
