use std::fmt::Write as _;

use serde::Serialize;

use crate::pipeline::{RuleResult, RunReport};
use crate::rules::{Rule, Severity};
use crate::verdict::Verdict;

pub fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    let mut out = serde_json::to_string_pretty(value)?;
    out.push('\n');
    Ok(out)
}

/// One line per rule followed by the run totals.
pub fn summary(report: &RunReport) -> String {
    let width = report.results.iter().map(|r| r.id.len()).max().unwrap_or(0);
    let mut out = String::new();
    for result in &report.results {
        let _ = writeln!(out, "{}", result_line(result, width));
    }
    if !report.results.is_empty() {
        out.push('\n');
    }

    let s = &report.summary;
    let verdicts: Vec<String> = Verdict::ALL
        .iter()
        .map(|v| format!("{} {}", v.as_str(), s.count(*v)))
        .collect();
    let _ = writeln!(
        out,
        "rules {} | executed {} | blocked {} | {} | likely FP {}",
        s.rules,
        s.executed,
        s.blocked,
        verdicts.join(" | "),
        s.likely_false_positives,
    );
    let severities: Vec<String> = Severity::ALL
        .iter()
        .map(|sev| format!("{} {}", sev.as_str(), s.severities.get(sev).copied().unwrap_or(0)))
        .collect();
    let _ = writeln!(out, "severity: {}", severities.join(", "));
    if s.interrupted {
        out.push_str("interrupted: remaining rules were not run\n");
    }
    out
}

fn result_line(result: &RuleResult, width: usize) -> String {
    let mut line = format!(
        "{:<width$}  {:<8} {:<7} {}",
        result.id,
        format!("[{}]", result.severity.as_str()),
        result.verdict.as_str(),
        result.title,
    );
    if result.likely_false_positive {
        line.push_str("  (likely FP)");
    }
    if let Some(opinion) = &result.advisory {
        let _ = write!(line, "  (advisory: {})", opinion.label.as_str());
    }
    line
}

/// Rules with their extracted commands, for `--list`.
pub fn listing(rules: &[&Rule]) -> String {
    let mut out = String::new();
    for rule in rules {
        let _ = writeln!(out, "{} [{}] {}", rule.id, rule.severity.as_str(), rule.title);
        if rule.is_manual() {
            out.push_str("    (manual)\n");
        }
        for command in &rule.commands {
            for line in command.to_string().lines() {
                let _ = writeln!(out, "    {line}");
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advisory::AdvisoryOpinion;
    use crate::config::Config;
    use crate::pipeline::RunSummary;

    fn rule(id: &str, guidance: &str) -> Rule {
        Rule::new(
            id,
            format!("title {id}"),
            Severity::High,
            guidance,
            &Config::default_config().extract,
        )
    }

    fn result(id: &str, verdict: Verdict) -> RuleResult {
        RuleResult {
            id: id.into(),
            title: "FileVault".into(),
            severity: Severity::High,
            commands: Vec::new(),
            executions: Vec::new(),
            verdict,
            likely_false_positive: false,
            advisory: None,
        }
    }

    #[test]
    fn summary_lines_and_totals() {
        let mut fp = result("SV-22", Verdict::Fail);
        fp.likely_false_positive = true;
        fp.advisory = Some(AdvisoryOpinion::inconclusive());
        let mut totals = RunSummary {
            rules: 2,
            executed: 2,
            likely_false_positives: 1,
            ..RunSummary::default()
        };
        totals.verdicts.insert(Verdict::Pass, 1);
        totals.verdicts.insert(Verdict::Fail, 1);
        totals.severities.insert(Severity::High, 2);
        let report = RunReport {
            results: vec![result("SV-1", Verdict::Pass), fp],
            summary: totals,
        };

        let text = summary(&report);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "SV-1   [high]   Pass    FileVault");
        assert_eq!(
            lines[1],
            "SV-22  [high]   Fail    FileVault  (likely FP)  (advisory: Inconclusive)"
        );
        assert_eq!(
            lines[3],
            "rules 2 | executed 2 | blocked 0 | Pass 1 | Fail 1 | Manual 0 | Error 0 | Skipped 0 | likely FP 1"
        );
        assert_eq!(lines[4], "severity: high 2, medium 0, low 0, unknown 0");
        assert_eq!(lines.len(), 5);
    }

    #[test]
    fn interrupted_run_says_so() {
        let report = RunReport {
            results: Vec::new(),
            summary: RunSummary {
                interrupted: true,
                ..RunSummary::default()
            },
        };
        assert!(summary(&report).ends_with("interrupted: remaining rules were not run\n"));
    }

    #[test]
    fn listing_shows_commands_and_manual_rules() {
        let rules = [
            rule("SV-1", "$ /usr/bin/fdesetup status"),
            rule("SV-2", "Interview the ISSO."),
        ];
        let refs: Vec<&Rule> = rules.iter().collect();
        assert_eq!(
            listing(&refs),
            "SV-1 [high] title SV-1\n    /usr/bin/fdesetup status\nSV-2 [high] title SV-2\n    (manual)\n"
        );
    }

    #[test]
    fn json_report_shape() {
        let report = RunReport {
            results: vec![result("SV-1", Verdict::Pass)],
            summary: RunSummary::default(),
        };
        let v: serde_json::Value = serde_json::from_str(&to_json(&report).unwrap()).unwrap();
        assert_eq!(v["results"][0]["verdict"], "Pass");
        assert_eq!(v["summary"]["interrupted"], false);
    }
}
