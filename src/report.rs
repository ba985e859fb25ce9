//! Output formatting for analysis results.
//!
//! Supports two output formats:
//! - Pretty: colored terminal output for human readability
//! - JSON: the persisted event shape per file, plus run counters

use std::collections::BTreeMap;

use colored::*;
use serde::Serialize;

use crate::context::CounterSnapshot;
use crate::engine::{FileAnalysis, InterpreterOutcome};
use crate::event::{Layer, SemanticEvent};

// =============================================================================
// JSON Format
// =============================================================================

#[derive(Serialize)]
pub struct JsonReport<'a> {
    pub version: String,
    pub files_analyzed: usize,
    pub total_events: usize,
    pub files: &'a [FileAnalysis],
    pub counters: CounterSnapshot,
}

pub fn build_json_report<'a>(results: &'a [FileAnalysis], counters: CounterSnapshot) -> JsonReport<'a> {
    JsonReport {
        version: env!("CARGO_PKG_VERSION").to_string(),
        files_analyzed: results.len(),
        total_events: results.iter().map(|r| r.events.len()).sum(),
        files: results,
        counters,
    }
}

/// Write results in JSON format.
pub fn write_json(results: &[FileAnalysis], counters: CounterSnapshot) -> anyhow::Result<()> {
    let report = build_json_report(results, counters);
    let json = serde_json::to_string_pretty(&report)?;
    println!("{}", json);
    Ok(())
}

// =============================================================================
// Pretty Format
// =============================================================================

/// Write results in pretty (human-readable) format.
pub fn write_pretty(results: &[FileAnalysis], counters: &CounterSnapshot) {
    println!();
    print!("  ");
    print!("{}", "changesense".cyan().bold());
    println!(" v{}", env!("CARGO_PKG_VERSION"));
    println!();

    for analysis in results {
        write_file(analysis);
    }

    write_summary(results, counters);
    println!();
}

fn write_file(analysis: &FileAnalysis) {
    print!("  {}", analysis.path.blue().bold());
    if let Some(language) = analysis.language {
        print!("  {}", format!("[{}]", language).dimmed());
    }
    if let (Some(b), Some(a)) = (analysis.before_strategy, analysis.after_strategy) {
        if b != "grammar" || a != "grammar" {
            print!("  {}", format!("({} -> {})", b, a).yellow());
        }
    }
    if analysis.cancelled {
        print!("  {}", "cancelled".red());
    }
    println!();

    if analysis.events.is_empty() {
        println!("    {}", "no semantic changes".dimmed());
        println!();
        return;
    }

    let mut by_layer: BTreeMap<Layer, Vec<&SemanticEvent>> = BTreeMap::new();
    for event in &analysis.events {
        by_layer.entry(event.layer).or_default().push(event);
    }
    for (layer, events) in by_layer {
        println!("    {}", format!("Layer {}", layer).bold());
        for event in events {
            write_event(event);
        }
    }

    if let InterpreterOutcome::Skipped { reason } = &analysis.interpreter {
        println!("    {}", format!("interpreter skipped: {}", reason).dimmed());
    }
    println!();
}

fn write_event(event: &SemanticEvent) {
    print!("      {:<36}", colored_type(event));
    print!("{}", event.node_id);
    if event.confidence < 1.0 {
        print!("  {}", format!("{:.2}", event.confidence).dimmed());
    }
    println!();
    if !event.details.is_empty() {
        println!("        {}", event.details.dimmed());
    }
    if let Some(reasoning) = &event.reasoning {
        println!("        {}", reasoning.dimmed());
    }
}

fn colored_type(event: &SemanticEvent) -> ColoredString {
    let name = event.event_type.as_str();
    match event.layer {
        Layer::Structural => name.green(),
        Layer::Syntactic => name.cyan(),
        Layer::Semantic | Layer::Behavioral => name.normal(),
        Layer::Pattern | Layer::Interpreter => name.magenta(),
    }
}

fn write_summary(results: &[FileAnalysis], counters: &CounterSnapshot) {
    let total: usize = results.iter().map(|r| r.events.len()).sum();
    let changed = results.iter().filter(|r| !r.events.is_empty()).count();
    print!("  {}", "Summary:".bold());
    println!(
        " {} event{} in {} of {} file{}",
        total,
        if total == 1 { "" } else { "s" },
        changed,
        results.len(),
        if results.len() == 1 { "" } else { "s" },
    );
    if counters.interpreter_runs > 0 || counters.provider_calls > 0 {
        println!(
            "  {}",
            format!(
                "interpreter: {} run{}, {} provider call{}, {} failure{}",
                counters.interpreter_runs,
                if counters.interpreter_runs == 1 { "" } else { "s" },
                counters.provider_calls,
                if counters.provider_calls == 1 { "" } else { "s" },
                counters.provider_failures,
                if counters.provider_failures == 1 { "" } else { "s" },
            )
            .dimmed()
        );
    }
    if counters.classification_failures > 0 {
        println!(
            "  {}",
            format!("{} classification rule failure(s); see log", counters.classification_failures).yellow()
        );
    }
}
