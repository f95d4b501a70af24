//! Rule-by-rule orchestration: gate, execute, classify, optionally advise.

use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use serde::Serialize;

use crate::advisory::{Advisor, AdvisoryOpinion};
use crate::config::{Config, ExecuteMode};
use crate::exec::{Engine, ExecStatus, ExecutionResult, interrupt};
use crate::extract::Command;
use crate::gate::SafetyGate;
use crate::rules::{Rule, Severity};
use crate::verdict::{Verdict, classify_rule, likely_false_positive};

/// Which rules of a document to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    All,
    Ids(Vec<String>),
    /// Case-insensitive substring of id, title or guidance.
    Keyword(String),
}

impl Selection {
    /// Selected rules in document order. Unknown ids are reported and ignored.
    pub fn select<'r>(&self, rules: &'r [Rule]) -> Vec<&'r Rule> {
        match self {
            Selection::All => rules.iter().collect(),
            Selection::Ids(ids) => {
                for id in ids {
                    if !rules.iter().any(|r| &r.id == id) {
                        log::warn!("no rule with id {id}");
                    }
                }
                rules.iter().filter(|r| ids.contains(&r.id)).collect()
            }
            Selection::Keyword(kw) => rules.iter().filter(|r| r.matches_keyword(kw)).collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub selection: Selection,
    pub timeout: Duration,
    pub execute: ExecuteMode,
}

impl RunOptions {
    pub fn from_config(config: &Config, selection: Selection) -> Self {
        Self {
            selection,
            timeout: Duration::from_secs(config.settings.timeout_seconds),
            execute: config.settings.execute,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RuleResult {
    pub id: String,
    pub title: String,
    pub severity: Severity,
    pub commands: Vec<Command>,
    pub executions: Vec<ExecutionResult>,
    pub verdict: Verdict,
    pub likely_false_positive: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advisory: Option<AdvisoryOpinion>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub rules: usize,
    /// Commands handed to the engine.
    pub executed: usize,
    /// Commands the gate refused.
    pub blocked: usize,
    pub verdicts: BTreeMap<Verdict, usize>,
    pub severities: BTreeMap<Severity, usize>,
    pub likely_false_positives: usize,
    pub interrupted: bool,
}

impl RunSummary {
    fn record(&mut self, result: &RuleResult) {
        self.rules += 1;
        for exec in &result.executions {
            if exec.status == ExecStatus::Blocked {
                self.blocked += 1;
            } else {
                self.executed += 1;
            }
        }
        *self.verdicts.entry(result.verdict).or_default() += 1;
        *self.severities.entry(result.severity).or_default() += 1;
        if result.likely_false_positive {
            self.likely_false_positives += 1;
        }
    }

    pub fn count(&self, verdict: Verdict) -> usize {
        self.verdicts.get(&verdict).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub results: Vec<RuleResult>,
    pub summary: RunSummary,
}

pub struct Pipeline<'a> {
    gate: &'a SafetyGate,
    engine: &'a dyn Engine,
    advisor: Option<&'a Advisor>,
    stop: &'a AtomicBool,
}

impl<'a> Pipeline<'a> {
    pub fn new(gate: &'a SafetyGate, engine: &'a dyn Engine) -> Self {
        Self {
            gate,
            engine,
            advisor: None,
            stop: interrupt::flag(),
        }
    }

    pub fn with_advisor(mut self, advisor: &'a Advisor) -> Self {
        self.advisor = Some(advisor);
        self
    }

    pub fn with_interrupt(mut self, stop: &'a AtomicBool) -> Self {
        self.stop = stop;
        self
    }

    /// Run the selected rules one at a time. `on_result` sees every rule
    /// result as soon as it is final. An interrupt stops the run after the
    /// rule in progress.
    pub fn run(
        &self,
        rules: &[Rule],
        options: &RunOptions,
        mut on_result: impl FnMut(&RuleResult),
    ) -> RunReport {
        let mut results = Vec::new();
        let mut summary = RunSummary::default();
        for rule in options.selection.select(rules) {
            if interrupt::requested(self.stop) {
                summary.interrupted = true;
                break;
            }
            let result = self.run_rule(rule, options);
            summary.record(&result);
            on_result(&result);
            results.push(result);
        }
        if interrupt::requested(self.stop) {
            summary.interrupted = true;
        }
        RunReport { results, summary }
    }

    /// Gate and run one rule's commands. In `First` mode the first command
    /// the gate allows is the one that runs; refused commands ahead of it
    /// are only reported if nothing at all was allowed.
    pub fn run_rule(&self, rule: &Rule, options: &RunOptions) -> RuleResult {
        let mut executions = Vec::with_capacity(rule.commands.len());
        let mut first_blocked = None;
        for command in &rule.commands {
            if interrupt::requested(self.stop) {
                break;
            }
            let decision = self.gate.check(command);
            log::debug!(
                "{}: gate {} ({})",
                rule.id,
                decision.decision.label(),
                decision.reason
            );
            if !decision.is_allowed() {
                log::warn!("{}: blocked {}: {}", rule.id, command.first_line(), decision.reason);
                let blocked = ExecutionResult::blocked(command, &decision.reason);
                match options.execute {
                    ExecuteMode::All => executions.push(blocked),
                    ExecuteMode::First => {
                        first_blocked.get_or_insert(blocked);
                    }
                }
                continue;
            }

            log::debug!("{}: running {}", rule.id, command.first_line());
            let result = self.engine.run(command, options.timeout);
            let killed = result.status == ExecStatus::Killed;
            executions.push(result);
            if killed || options.execute == ExecuteMode::First {
                break;
            }
        }
        if executions.is_empty()
            && !interrupt::requested(self.stop)
            && let Some(blocked) = first_blocked
        {
            executions.push(blocked);
        }

        let verdict = if !rule.is_manual() && executions.is_empty() {
            Verdict::Skipped
        } else {
            classify_rule(rule, &executions)
        };
        let advisory = match self.advisor {
            Some(advisor) if !matches!(verdict, Verdict::Manual | Verdict::Skipped) => {
                Some(advisor.opinion(rule, &executions, verdict))
            }
            _ => None,
        };
        log::info!("{}: {}", rule.id, verdict.as_str());

        RuleResult {
            id: rule.id.clone(),
            title: rule.title.clone(),
            severity: rule.severity,
            commands: rule.commands.clone(),
            likely_false_positive: likely_false_positive(&executions),
            executions,
            verdict,
            advisory,
        }
    }
}
