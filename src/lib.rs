//! stig-gate: runs the automatable checks of an XCCDF/STIG benchmark.
//!
//! Check guidance is free text written for a human. This crate recovers the
//! shell commands embedded in it, passes each one through a safety gate,
//! executes the survivors in a sandboxed child process with a timeout, and
//! classifies the outcome as one of [`verdict::Verdict`]'s five values. An
//! optional text-generation service can attach a second opinion to each
//! result without ever changing the verdict.
//!
//! # Architecture
//!
//! - **[`rules`]**: XCCDF loading (1.1, 1.2 and unqualified documents) into [`rules::Rule`]s.
//! - **[`extract`]**: Guidance normalization and the ordered chain of command recognizers.
//! - **[`parse`]**: Shell parsing: tree-sitter-bash inspection and shlex tokenizer.
//! - **[`gate`]**: Trusted-prefix/allow-list policy, deny patterns, safe and unsafe modes.
//! - **[`exec`]**: Process-group execution with timeouts, interrupts and heredoc scripts.
//! - **[`verdict`]**: Per-command classification, rule aggregation, false-positive hints.
//! - **[`advisory`]**: Best-effort second opinion from an Ollama-compatible endpoint.
//! - **[`pipeline`]**: Rule-by-rule orchestration and the run summary.
//! - **[`config`]**: Configuration loading: embedded defaults + user overlay merge.
//! - **[`report`]**: JSON and plain-text renderings of a run.
//! - **[`logging`]**: Terminal logging and the run ledger at `~/.local/share/stig-gate/runs.log`.

/// Advisory opinions from a text-generation service.
pub mod advisory;
/// Command-line surface.
pub mod cli;
/// Configuration types, loading, and overlay merge logic.
pub mod config;
/// Sandboxed execution of gated commands.
pub mod exec;
/// Command extraction from guidance text.
pub mod extract;
/// Safety policy deciding which commands may run.
pub mod gate;
/// Terminal logging and the per-rule run ledger.
pub mod logging;
/// Shell command parsing: tree-sitter AST, shlex tokenizer.
pub mod parse;
/// Gate, execute, classify and advise, one rule at a time.
pub mod pipeline;
/// Output renderings.
pub mod report;
/// XCCDF rules.
pub mod rules;
/// Verdict classification.
pub mod verdict;

use pipeline::RuleResult;
use rules::Rule;

/// Gate, run and classify a single rule under the default configuration.
///
/// This is the main entry point for tests and simple usage.
/// For CLI usage with overlays and advisory, build a [`pipeline::Pipeline`] directly.
pub fn check(rule: &Rule) -> Result<RuleResult, config::ConfigError> {
    let config = config::Config::default_config();
    let gate = gate::SafetyGate::from_config(&config)?;
    let engine = exec::ShellEngine::new(&config.exec);
    let options = pipeline::RunOptions::from_config(&config, pipeline::Selection::All);
    Ok(pipeline::Pipeline::new(&gate, &engine).run_rule(rule, &options))
}
