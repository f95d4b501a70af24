//! Verdicts: per-command classification, rule-level aggregation, and the
//! advisory likely-false-positive heuristic.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::exec::{
    EXIT_BLOCKED, EXIT_INTERRUPTED, EXIT_TIMEOUT, ExecStatus, ExecutionResult,
};
use crate::rules::Rule;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Verdict {
    Pass,
    Fail,
    Manual,
    Error,
    Skipped,
}

impl Verdict {
    pub const ALL: [Verdict; 5] = [
        Verdict::Pass,
        Verdict::Fail,
        Verdict::Manual,
        Verdict::Error,
        Verdict::Skipped,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Pass => "Pass",
            Verdict::Fail => "Fail",
            Verdict::Manual => "Manual",
            Verdict::Error => "Error",
            Verdict::Skipped => "Skipped",
        }
    }

    /// Error and Skipped outrank a Pass in rule aggregation.
    fn dominates_pass(self) -> bool {
        matches!(self, Verdict::Error | Verdict::Skipped)
    }
}

static AFFIRMATIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(pass|passed|enabled|ok|true|compliant|yes)\b|\A\s*1\s*\z")
        .expect("affirmative regex must compile")
});

/// Classify one command outcome.
///
/// A zero exit passes only when the output reads affirmatively; stdout is
/// consulted, or stderr when stdout is empty.
pub fn classify(exit_code: i32, stdout: &str, stderr: &str) -> Verdict {
    match exit_code {
        0 => {
            let evidence = if stdout.trim().is_empty() { stderr } else { stdout };
            if AFFIRMATIVE.is_match(evidence) {
                Verdict::Pass
            } else {
                Verdict::Fail
            }
        }
        EXIT_INTERRUPTED => Verdict::Skipped,
        EXIT_TIMEOUT | EXIT_BLOCKED => Verdict::Error,
        _ => Verdict::Error,
    }
}

/// [`classify`] with the terminal status taken into account: a killed
/// command is Skipped and a blocked, timed-out or unspawnable one is an
/// Error whatever its code.
pub fn classify_result(result: &ExecutionResult) -> Verdict {
    match result.status {
        ExecStatus::Completed => classify(result.exit_code, &result.stdout, &result.stderr),
        ExecStatus::Killed => Verdict::Skipped,
        ExecStatus::TimedOut | ExecStatus::SpawnError | ExecStatus::Blocked => Verdict::Error,
    }
}

/// Rule-level verdict. No commands means Manual. Otherwise the last
/// executed command decides, except that a Pass yields to any earlier
/// Error or Skipped.
pub fn classify_rule(rule: &Rule, results: &[ExecutionResult]) -> Verdict {
    if rule.is_manual() || results.is_empty() {
        return Verdict::Manual;
    }
    aggregate(results.iter().map(classify_result))
}

pub fn aggregate(verdicts: impl IntoIterator<Item = Verdict>) -> Verdict {
    let verdicts: Vec<Verdict> = verdicts.into_iter().collect();
    let Some(&last) = verdicts.last() else {
        return Verdict::Manual;
    };
    if last == Verdict::Pass
        && let Some(&worst) = verdicts.iter().rev().find(|v| v.dominates_pass())
    {
        return worst;
    }
    last
}

const MISSING_DEPENDENCY: &[&str] = &[
    "command not found",
    "no such file or directory",
    "does not exist",
    "not installed",
    "unknown option",
    "illegal option",
    "domain/default pair",
    "could not find domain",
];

const EMPTY_RESULT: &[&str] = &["no matching", "0 results", "no results"];

/// Whether a failing result looks like an environment problem rather than a
/// real finding: a missing tool, file or preference domain, or an empty
/// result set. Advisory only; never changes the verdict.
pub fn likely_false_positive(results: &[ExecutionResult]) -> bool {
    results.iter().any(|r| {
        if r.status != ExecStatus::Completed || classify_result(r) == Verdict::Pass {
            return false;
        }
        let output = format!("{}\n{}", r.stdout, r.stderr).to_lowercase();
        MISSING_DEPENDENCY.iter().any(|m| output.contains(m))
            || EMPTY_RESULT.iter().any(|m| output.contains(m))
            || (r.exit_code == 0 && r.stdout.trim().is_empty())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::exec::EXIT_SPAWN_ERROR;
    use crate::rules::Severity;

    fn result(code: i32, stdout: &str, stderr: &str, status: ExecStatus) -> ExecutionResult {
        ExecutionResult {
            command: "cmd".into(),
            exit_code: code,
            stdout: stdout.into(),
            stderr: stderr.into(),
            status,
        }
    }

    fn done(code: i32, stdout: &str) -> ExecutionResult {
        result(code, stdout, "", ExecStatus::Completed)
    }

    fn rule(guidance: &str) -> Rule {
        Rule::new("r", "t", Severity::Medium, guidance, &Config::default_config().extract)
    }

    #[test]
    fn affirmative_words_pass() {
        for out in ["Pass", "enabled", "OK", "true", "Compliant", "yes", "1", "  1\n"] {
            assert_eq!(classify(0, out, ""), Verdict::Pass, "{out}");
        }
    }

    #[test]
    fn affirmative_match_is_word_bounded() {
        assert_eq!(classify(0, "passwordpolicy", ""), Verdict::Fail);
        assert_eq!(classify(0, "10", ""), Verdict::Fail);
        assert_eq!(classify(0, "token", ""), Verdict::Fail);
        assert_eq!(classify(0, "assessments enabled", ""), Verdict::Pass);
    }

    #[test]
    fn bare_one_must_be_the_whole_output() {
        assert_eq!(classify(0, "14.1", ""), Verdict::Fail);
        assert_eq!(classify(0, "1 entries found", ""), Verdict::Fail);
        assert_eq!(classify(0, "MaxAuthTries 1", ""), Verdict::Fail);
        assert_eq!(classify(0, "1\n", ""), Verdict::Pass);
    }

    #[test]
    fn zero_exit_without_affirmation_fails() {
        assert_eq!(classify(0, "FileVault is Off.", ""), Verdict::Fail);
        assert_eq!(classify(0, "", ""), Verdict::Fail);
    }

    #[test]
    fn stderr_used_when_stdout_empty() {
        assert_eq!(classify(0, "", "status: enabled"), Verdict::Pass);
        assert_eq!(classify(0, "disabled", "enabled"), Verdict::Fail);
    }

    #[test]
    fn reserved_codes() {
        assert_eq!(classify(EXIT_INTERRUPTED, "", ""), Verdict::Skipped);
        assert_eq!(classify(EXIT_TIMEOUT, "", ""), Verdict::Error);
        assert_eq!(classify(EXIT_BLOCKED, "", ""), Verdict::Error);
        assert_eq!(classify(1, "pass", ""), Verdict::Error);
    }

    #[test]
    fn status_overrides_code() {
        assert_eq!(classify_result(&result(0, "ok", "", ExecStatus::Killed)), Verdict::Skipped);
        assert_eq!(
            classify_result(&result(EXIT_SPAWN_ERROR, "", "x", ExecStatus::SpawnError)),
            Verdict::Error
        );
    }

    #[test]
    fn rule_without_commands_is_manual() {
        let r = rule("Interview the ISSO.");
        assert_eq!(classify_rule(&r, &[done(0, "ok")]), Verdict::Manual);
    }

    #[test]
    fn last_result_decides() {
        let r = rule("$ /usr/bin/a\n$ /usr/bin/b");
        assert_eq!(classify_rule(&r, &[done(0, "ok"), done(0, "off")]), Verdict::Fail);
        assert_eq!(classify_rule(&r, &[done(0, "off"), done(0, "ok")]), Verdict::Pass);
    }

    #[test]
    fn error_dominates_pass() {
        let r = rule("$ /usr/bin/a\n$ /usr/bin/b");
        assert_eq!(classify_rule(&r, &[done(2, ""), done(0, "ok")]), Verdict::Error);
        let killed = result(EXIT_INTERRUPTED, "", "", ExecStatus::Killed);
        assert_eq!(classify_rule(&r, &[killed, done(0, "ok")]), Verdict::Skipped);
    }

    #[test]
    fn error_does_not_dominate_fail() {
        assert_eq!(aggregate([Verdict::Error, Verdict::Fail]), Verdict::Fail);
        assert_eq!(aggregate([]), Verdict::Manual);
    }

    #[test]
    fn false_positive_on_missing_tool() {
        let r = result(127, "", "bash: mdmclient: command not found", ExecStatus::Completed);
        assert!(likely_false_positive(&[r]));
    }

    #[test]
    fn false_positive_on_missing_domain() {
        let r = result(
            1,
            "",
            "The domain/default pair of (com.apple.x, Y) does not exist",
            ExecStatus::Completed,
        );
        assert!(likely_false_positive(&[r]));
    }

    #[test]
    fn false_positive_on_empty_result() {
        assert!(likely_false_positive(&[done(0, "")]));
        assert!(likely_false_positive(&[done(1, "no matching profiles")]));
    }

    #[test]
    fn real_failure_not_flagged() {
        assert!(!likely_false_positive(&[done(0, "FileVault is Off.")]));
        assert!(!likely_false_positive(&[done(0, "enabled")]));
        let blocked = result(
            EXIT_BLOCKED,
            "",
            "blocked by policy: x does not exist",
            ExecStatus::Blocked,
        );
        assert!(!likely_false_positive(&[blocked]));
    }
}
