//! Optional second opinion from a text-generation service.
//!
//! The advisor never changes a verdict. It sends the rule and truncated
//! evidence, expects one JSON object back, retries once with a bare
//! "JSON only" prompt, and otherwise settles for a fixed Inconclusive
//! opinion.

pub mod ollama;

use std::collections::BTreeSet;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::config::AdvisoryConfig;
use crate::exec::ExecutionResult;
use crate::rules::Rule;
use crate::verdict::Verdict;

pub use ollama::OllamaBackend;

#[derive(Debug, thiserror::Error)]
pub enum AdvisoryError {
    #[error("cannot build HTTP client: {0}")]
    Client(String),
    #[error("request to {url} failed: {reason}")]
    Transport { url: String, reason: String },
    #[error("service returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("unexpected service reply: {0}")]
    Envelope(String),
}

/// Transport to a text-generation service: prompt in, raw model text out.
pub trait AdvisoryBackend {
    fn generate(&self, prompt: &str) -> Result<String, AdvisoryError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Label {
    #[serde(rename = "Benign Likely FP")]
    BenignLikelyFp,
    #[serde(rename = "Risk Needs Review")]
    RiskNeedsReview,
    #[serde(rename = "Fail Confirmed")]
    FailConfirmed,
    Inconclusive,
}

impl Label {
    pub fn as_str(self) -> &'static str {
        match self {
            Label::BenignLikelyFp => "Benign Likely FP",
            Label::RiskNeedsReview => "Risk Needs Review",
            Label::FailConfirmed => "Fail Confirmed",
            Label::Inconclusive => "Inconclusive",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdvisoryOpinion {
    pub label: Label,
    pub rationale: String,
    pub tags: BTreeSet<String>,
    pub confidence: Confidence,
}

impl AdvisoryOpinion {
    /// What the advisor reports when the service gave nothing usable.
    pub fn inconclusive() -> Self {
        Self {
            label: Label::Inconclusive,
            rationale: "Model returned non JSON.".into(),
            tags: BTreeSet::new(),
            confidence: Confidence::Low,
        }
    }
}

/// A reply is usable only if, whitespace aside, it is exactly one JSON
/// object with the four opinion fields and nothing else.
pub fn parse_opinion(reply: &str) -> Option<AdvisoryOpinion> {
    serde_json::from_str(reply.trim()).ok()
}

const LABELS: &str = r#"["Benign Likely FP","Risk Needs Review","Fail Confirmed","Inconclusive"]"#;

pub struct Advisor {
    backend: Box<dyn AdvisoryBackend>,
    max_stdout_chars: usize,
    max_stderr_chars: usize,
}

impl Advisor {
    pub fn new(backend: Box<dyn AdvisoryBackend>, config: &AdvisoryConfig) -> Self {
        Self {
            backend,
            max_stdout_chars: config.max_stdout_chars,
            max_stderr_chars: config.max_stderr_chars,
        }
    }

    /// An advisor talking to the configured Ollama endpoint.
    pub fn from_config(config: &AdvisoryConfig) -> Result<Self, AdvisoryError> {
        Ok(Self::new(Box::new(OllamaBackend::new(config)?), config))
    }

    /// Ask for an opinion on a classified rule. Never fails; at most two
    /// requests are made.
    pub fn opinion(
        &self,
        rule: &Rule,
        results: &[ExecutionResult],
        verdict: Verdict,
    ) -> AdvisoryOpinion {
        let evidence = self.evidence(rule, results, verdict);
        if let Some(opinion) = self.ask(&full_prompt(&evidence)) {
            return opinion;
        }
        log::debug!("{}: advisory reply unusable, retrying with JSON-only prompt", rule.id);
        self.ask(&retry_prompt(&evidence)).unwrap_or_else(|| {
            log::info!("{}: advisory gave no usable opinion", rule.id);
            AdvisoryOpinion::inconclusive()
        })
    }

    fn ask(&self, prompt: &str) -> Option<AdvisoryOpinion> {
        match self.backend.generate(prompt) {
            Ok(reply) => parse_opinion(&reply),
            Err(e) => {
                log::warn!("advisory request failed: {e}");
                None
            }
        }
    }

    fn evidence(&self, rule: &Rule, results: &[ExecutionResult], verdict: Verdict) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "RULE: {} ({})", rule.id, rule.severity.as_str());
        let _ = writeln!(out, "TITLE: {}", rule.title);
        let _ = writeln!(out, "RUNNER VERDICT: {}", verdict.as_str());
        for r in results {
            let _ = writeln!(out, "COMMAND: {}", r.command);
            let _ = writeln!(out, "EXIT: {} ({})", r.exit_code, r.status.as_str());
            let _ = writeln!(out, "STDOUT:\n{}", truncate_chars(&r.stdout, self.max_stdout_chars));
            let _ = writeln!(out, "STDERR:\n{}", truncate_chars(&r.stderr, self.max_stderr_chars));
        }
        out
    }
}

fn full_prompt(evidence: &str) -> String {
    format!(
        "You are a macOS compliance auditor reviewing the result of an automated STIG check. \
         Given the RULE and EVIDENCE, return compact JSON only with the fields \
         label, rationale, tags, confidence. label is one of {LABELS}. \
         tags is an array of short strings. confidence is one of \"low\", \"medium\", \"high\".\n\
         EVIDENCE:\n{evidence}RESPONSE:"
    )
}

fn retry_prompt(evidence: &str) -> String {
    format!("JSON only with label,rationale,tags,confidence\nEVIDENCE:\n{evidence}RESPONSE:")
}

/// At most `max` characters of `text`, marking the cut.
pub(crate) fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}\n[truncated]", &text[..cut]),
        None => text.to_string(),
    }
}
