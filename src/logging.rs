use crate::pipeline::RuleResult;
use simplelog::{ColorChoice, ConfigBuilder, LevelFilter, TermLogger, TerminalMode};
use std::io::Write;
use std::path::Path;

/// Terminal logging on stderr. `-q` keeps errors only; each `-v` adds a level
/// above the default of warnings.
pub fn init(verbose: u8, quiet: bool) {
    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };
    let config = ConfigBuilder::new()
        .set_time_level(LevelFilter::Off)
        .set_target_level(LevelFilter::Off)
        .set_thread_level(LevelFilter::Off)
        .build();
    // A logger can only be installed once per process.
    let _ = TermLogger::init(level, config, TerminalMode::Stderr, ColorChoice::Auto);
}

/// Append a rule record to ~/.local/share/stig-gate/runs.log.
/// Best-effort: failures are silently ignored (the ledger must never stop a run).
pub fn log_result(result: &RuleResult) {
    let Some(home) = std::env::var_os("HOME") else {
        return;
    };
    let log_dir = Path::new(&home).join(".local/share/stig-gate");
    let _ = std::fs::create_dir_all(&log_dir);
    append_record(&log_dir.join("runs.log"), result);
}

fn append_record(path: &Path, result: &RuleResult) {
    let Ok(mut file) = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
    else {
        return;
    };

    let first_command: String = result
        .commands
        .first()
        .map(|c| c.first_line())
        .unwrap_or_default()
        .chars()
        .take(200)
        .collect();
    let ts = timestamp_now();

    let _ = writeln!(
        file,
        "{ts}\t{verdict}\t{id}\t{cmd}\t{note}",
        verdict = result.verdict.as_str(),
        id = result.id,
        cmd = first_command.replace('\t', " "),
        note = note(result),
    );
}

/// Compact single-line note: why a command did not complete, plus flags.
fn note(result: &RuleResult) -> String {
    let mut parts: Vec<String> = result
        .executions
        .iter()
        .filter(|e| e.status != crate::exec::ExecStatus::Completed)
        .map(|e| {
            let reason = e.stderr.lines().last().unwrap_or("").trim();
            format!("{}: {}", e.status.as_str(), reason)
        })
        .collect();
    if result.likely_false_positive {
        parts.push("likely false positive".into());
    }
    if let Some(opinion) = &result.advisory {
        parts.push(format!("advisory {}", opinion.label.as_str()));
    }
    parts.join("; ").replace(['\t', '\n'], " ")
}

/// Simple UTC timestamp without external deps.
fn timestamp_now() -> String {
    let dur = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    let secs = dur.as_secs();
    let days = secs / 86400;
    let rem = secs % 86400;
    let h = rem / 3600;
    let m = (rem % 3600) / 60;
    let s = rem % 60;
    let (year, month, day) = epoch_days_to_date(days);
    format!("{year:04}-{month:02}-{day:02}T{h:02}:{m:02}:{s:02}Z")
}

/// Convert days since Unix epoch to (year, month, day).
fn epoch_days_to_date(days: u64) -> (u64, u64, u64) {
    // Civil calendar from days algorithm (Howard Hinnant)
    let z = days + 719468;
    let era = z / 146097;
    let doe = z - era * 146097;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    let y = if m <= 2 { y + 1 } else { y };
    (y, m, d)
}
