//! Per-file and batch analysis pipelines.
//!
//! A file runs adapter -> matcher -> layers 1-4 -> layer 5a synchronously and
//! only suspends for layer 5b. Batches run the synchronous part on the rayon
//! pool and then drive the interpreter calls concurrently.

use futures::stream::{self, StreamExt};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::analysis::{Language, NodeTree, Strategy};
use crate::classify::{
    file_added, file_removed, node_pairs, opaque_change, run_rules, structural, LayerOutcome,
    NodePair, Rule, BEHAVIORAL_RULES, SEMANTIC_RULES, SYNTACTIC_RULES,
};
use crate::context::AnalysisContext;
use crate::event::{dedup_events, SemanticEvent};
use crate::interpret::{interpret, GateInput};
use crate::matcher::{diff, ChangeSet};
use crate::patterns::{recognize, PatternInput};

/// One changed file as supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    /// Language name or extension, e.g. `python`, `ts`.
    pub language: String,
    pub before: Option<String>,
    pub after: Option<String>,
}

impl FileChange {
    pub fn modified(
        path: impl Into<String>,
        language: impl Into<String>,
        before: impl Into<String>,
        after: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            language: language.into(),
            before: Some(before.into()),
            after: Some(after.into()),
        }
    }

    pub fn added(path: impl Into<String>, language: impl Into<String>, after: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            language: language.into(),
            before: None,
            after: Some(after.into()),
        }
    }

    pub fn removed(path: impl Into<String>, language: impl Into<String>, before: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            language: language.into(),
            before: Some(before.into()),
            after: None,
        }
    }
}

/// What layer 5b did for a file.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InterpreterOutcome {
    NotRun,
    Skipped { reason: String },
    Invoked { events: usize },
}

/// Events for one file plus how they were obtained.
#[derive(Debug, Clone, Serialize)]
pub struct FileAnalysis {
    pub path: String,
    pub language: Option<Language>,
    pub before_strategy: Option<&'static str>,
    pub after_strategy: Option<&'static str>,
    pub events: Vec<SemanticEvent>,
    pub classification_failures: usize,
    pub interpreter: InterpreterOutcome,
    /// Cancellation stopped the pipeline early; `events` holds the layers
    /// that completed.
    pub cancelled: bool,
}

impl FileAnalysis {
    fn empty(path: &str, language: Option<Language>) -> Self {
        Self {
            path: path.to_string(),
            language,
            before_strategy: None,
            after_strategy: None,
            events: Vec::new(),
            classification_failures: 0,
            interpreter: InterpreterOutcome::NotRun,
            cancelled: false,
        }
    }
}

/// Output of the synchronous layers, kept for layer 5b.
struct Prepared {
    analysis: FileAnalysis,
    before: NodeTree,
    after: NodeTree,
    changes: ChangeSet,
}

enum Stage {
    Done(FileAnalysis),
    Pending(Box<Prepared>),
}

fn parse_side(language: Language, path: &str, source: &str, floor: Strategy) -> NodeTree {
    match language.adapter().parse_from(floor, path, source) {
        Ok(tree) => tree,
        Err(e) => {
            warn!(path, error = %e, "fallback chain failed; comparing whole file");
            NodeTree::opaque(path, language, source.len())
        }
    }
}

/// Re-parse the better-parsed snapshot at the other one's stage until both
/// share a strategy. Each stage extracts text and fields its own way, so
/// only same-strategy trees are comparable.
fn align_strategies(
    language: Language,
    path: &str,
    sources: (&str, &str),
    before: &mut NodeTree,
    after: &mut NodeTree,
) {
    while before.strategy != after.strategy && !before.is_opaque() && !after.is_opaque() {
        let floor = before.strategy.max(after.strategy);
        debug!(
            path,
            before = %before.strategy,
            after = %after.strategy,
            "snapshots parsed by different stages; re-parsing at {}",
            floor
        );
        if before.strategy < floor {
            *before = parse_side(language, path, sources.0, floor);
        } else {
            *after = parse_side(language, path, sources.1, floor);
        }
    }
}

fn strategy_name(tree: &Option<NodeTree>) -> Option<&'static str> {
    tree.as_ref().map(|t| t.strategy.as_str())
}

fn run_layer(
    enabled: bool,
    rules: &[Rule],
    pairs: &[NodePair<'_>],
    ctx: &AnalysisContext,
) -> LayerOutcome {
    if enabled {
        run_rules(rules, pairs, &ctx.config().thresholds)
    } else {
        LayerOutcome::default()
    }
}

fn finish(
    ctx: &AnalysisContext,
    mut analysis: FileAnalysis,
    events: Vec<SemanticEvent>,
    cancelled: bool,
) -> FileAnalysis {
    analysis.events = dedup_events(events);
    analysis.cancelled = cancelled;
    if cancelled {
        ctx.counters().cancelled_file();
    }
    analysis
}

/// Layers 1 through 5a.
fn prepare(ctx: &AnalysisContext, change: &FileChange) -> Stage {
    let path = change.path.as_str();
    let Some(language) = Language::from_tag(&change.language) else {
        debug!(path, tag = %change.language, "unsupported language; skipping");
        return Stage::Done(FileAnalysis::empty(path, None));
    };
    ctx.counters().file();

    let mut analysis = FileAnalysis::empty(path, Some(language));
    if change.before == change.after {
        return Stage::Done(analysis);
    }
    if ctx.is_cancelled() {
        return Stage::Done(finish(ctx, analysis, Vec::new(), true));
    }

    let layers = &ctx.config().layers;
    let mut before = change
        .before
        .as_deref()
        .map(|s| parse_side(language, path, s, Strategy::Grammar));
    let mut after = change
        .after
        .as_deref()
        .map(|s| parse_side(language, path, s, Strategy::Grammar));
    if let (Some(b), Some(a), Some(b_src), Some(a_src)) = (
        before.as_mut(),
        after.as_mut(),
        change.before.as_deref(),
        change.after.as_deref(),
    ) {
        align_strategies(language, path, (b_src, a_src), b, a);
    }
    analysis.before_strategy = strategy_name(&before);
    analysis.after_strategy = strategy_name(&after);

    let mut events = Vec::new();
    let modified = before.is_some() && after.is_some();
    let (before, after) = match (before, after) {
        (Some(b), Some(a)) => (b, a),
        (None, Some(a)) => {
            if layers.structural {
                events.extend(file_added(&a));
            }
            (NodeTree::new(path, language, a.strategy, 0), a)
        }
        (Some(b), None) => {
            if layers.structural {
                events.extend(file_removed(&b));
            }
            let empty = NodeTree::new(path, language, b.strategy, 0);
            (b, empty)
        }
        (None, None) => return Stage::Done(analysis),
    };

    if before.is_opaque() || after.is_opaque() {
        if modified && layers.structural {
            events.push(opaque_change(path, before.source_len, after.source_len));
        }
        return Stage::Done(finish(ctx, analysis, events, false));
    }

    let changes = diff(&before, &after);
    if modified && layers.structural {
        events.extend(structural(&before, &after, &changes));
    }
    if ctx.is_cancelled() {
        return Stage::Done(finish(ctx, analysis, events, true));
    }

    let rules = {
        let pairs = node_pairs(&before, &after, &changes);
        let (mut syntactic, (semantic, behavioral)) = rayon::join(
            || run_layer(layers.syntactic, SYNTACTIC_RULES, &pairs, ctx),
            || {
                rayon::join(
                    || run_layer(layers.semantic, SEMANTIC_RULES, &pairs, ctx),
                    || run_layer(layers.behavioral, BEHAVIORAL_RULES, &pairs, ctx),
                )
            },
        );
        syntactic.merge(semantic);
        syntactic.merge(behavioral);
        syntactic
    };
    events.extend(rules.events);
    let mut failures = rules.failures.len();
    if ctx.is_cancelled() {
        analysis.classification_failures = failures;
        ctx.counters().classification_failures(failures);
        return Stage::Done(finish(ctx, analysis, events, true));
    }

    if layers.patterns {
        let outcome = {
            let input = PatternInput::new(&before, &after, &changes, &events);
            recognize(&input, &ctx.config().patterns)
        };
        failures += outcome.failures.len();
        events.extend(outcome.events);
    }
    analysis.classification_failures = failures;
    ctx.counters().classification_failures(failures);

    let analysis = finish(ctx, analysis, events, false);
    Stage::Pending(Box::new(Prepared {
        analysis,
        before,
        after,
        changes,
    }))
}

/// Layer 5b on top of a prepared file.
async fn complete(ctx: &AnalysisContext, stage: Stage) -> FileAnalysis {
    let analysis = match stage {
        Stage::Done(analysis) => analysis,
        Stage::Pending(prepared) => {
            let Prepared {
                mut analysis,
                before,
                after,
                changes,
            } = *prepared;
            if ctx.is_cancelled() {
                analysis.cancelled = true;
                ctx.counters().cancelled_file();
            } else {
                let input = GateInput {
                    before: &before,
                    after: &after,
                    changes: &changes,
                    events: &analysis.events,
                };
                let result = interpret(ctx, &input).await;
                analysis.interpreter = match result.skipped {
                    Some(reason) => InterpreterOutcome::Skipped {
                        reason: reason.to_string(),
                    },
                    None => InterpreterOutcome::Invoked {
                        events: result.events.len(),
                    },
                };
                let mut events = std::mem::take(&mut analysis.events);
                events.extend(result.events);
                analysis.events = dedup_events(events);
                if ctx.is_cancelled() {
                    analysis.cancelled = true;
                    ctx.counters().cancelled_file();
                }
            }
            analysis
        }
    };
    ctx.counters().events(analysis.events.len());
    analysis
}

fn settle(ctx: &AnalysisContext, stage: Stage) -> FileAnalysis {
    let analysis = match stage {
        Stage::Done(analysis) => analysis,
        Stage::Pending(prepared) => prepared.analysis,
    };
    ctx.counters().events(analysis.events.len());
    analysis
}

/// Layers 1 through 5a only. Never performs I/O.
pub fn analyze_deterministic(ctx: &AnalysisContext, change: &FileChange) -> FileAnalysis {
    settle(ctx, prepare(ctx, change))
}

/// Full pipeline for one file.
pub async fn analyze_file(ctx: &AnalysisContext, change: &FileChange) -> FileAnalysis {
    complete(ctx, prepare(ctx, change)).await
}

/// Full pipeline for many files, sorted by path.
pub async fn analyze_batch(ctx: &AnalysisContext, changes: &[FileChange]) -> Vec<FileAnalysis> {
    analyze_batch_with_progress(ctx, changes, &|_: &FileAnalysis| {}).await
}

/// As [`analyze_batch`], calling `progress` as each file completes.
pub async fn analyze_batch_with_progress(
    ctx: &AnalysisContext,
    changes: &[FileChange],
    progress: &(dyn Fn(&FileAnalysis) + Sync),
) -> Vec<FileAnalysis> {
    let stages: Vec<Stage> = changes.par_iter().map(|c| prepare(ctx, c)).collect();
    let concurrency = ctx.config().interpreter.max_concurrent_calls.max(1);
    let mut results: Vec<FileAnalysis> = stream::iter(stages)
        .map(|stage| async move {
            let analysis = complete(ctx, stage).await;
            progress(&analysis);
            analysis
        })
        .buffer_unordered(concurrency)
        .collect()
        .await;
    results.sort_by(|a, b| a.path.cmp(&b.path));
    results
}
