//! stig-gate: runs the automatable checks of an XCCDF benchmark.
//!
//! Loads the benchmark, extracts each rule's commands, gates them, runs the
//! survivors and prints a JSON or plain-text report.

use std::io::Write;
use std::process::ExitCode;

use clap::Parser;

use stig_gate::advisory::Advisor;
use stig_gate::cli::{Cli, CliError, EXIT_INTERRUPTED, Format};
use stig_gate::config::Config;
use stig_gate::exec::{ShellEngine, interrupt};
use stig_gate::gate::{Mode, SafetyGate};
use stig_gate::pipeline::{Pipeline, RunOptions};
use stig_gate::rules::{self, RuleSet};
use stig_gate::{logging, report};

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.quiet);

    match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("stig-gate: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<ExitCode, CliError> {
    let mut config = Config::load(cli.config.as_deref())?;
    cli.apply(&mut config, |key| std::env::var(key).ok());

    if cli.dump_config {
        emit(cli, &toml::to_string_pretty(&config)?)?;
        return Ok(ExitCode::SUCCESS);
    }

    let path = match &cli.xccdf {
        Some(path) => path.clone(),
        None => rules::discover(&std::env::current_dir().map_err(CliError::CurrentDir)?)?,
    };
    let set = RuleSet::load(&path, &config.extract)?;
    if let Some(id) = &set.benchmark_id {
        log::info!("benchmark {id}");
    }

    let options = RunOptions::from_config(&config, cli.selection());

    if cli.list {
        let selected = options.selection.select(&set.rules);
        let text = match cli.format {
            Format::Json => report::to_json(&selected)?,
            Format::Summary => report::listing(&selected),
        };
        emit(cli, &text)?;
        return Ok(ExitCode::SUCCESS);
    }

    interrupt::install()?;
    let gate = SafetyGate::from_config(&config)?;
    if gate.mode() == Mode::Unsafe {
        log::warn!("unsafe mode: commands outside the trusted set will run");
    }
    let engine = ShellEngine::new(&config.exec);
    let advisor = if config.advisory.enabled {
        match Advisor::from_config(&config.advisory) {
            Ok(advisor) => Some(advisor),
            Err(e) => {
                log::warn!("advisory disabled: {e}");
                None
            }
        }
    } else {
        None
    };

    let mut pipeline = Pipeline::new(&gate, &engine);
    if let Some(advisor) = &advisor {
        pipeline = pipeline.with_advisor(advisor);
    }
    let run = pipeline.run(&set.rules, &options, logging::log_result);

    let text = match cli.format {
        Format::Json => report::to_json(&run)?,
        Format::Summary => report::summary(&run),
    };
    emit(cli, &text)?;

    if run.summary.interrupted {
        Ok(ExitCode::from(EXIT_INTERRUPTED))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

/// Write to `--output` if given, else stdout.
fn emit(cli: &Cli, text: &str) -> Result<(), CliError> {
    match &cli.output {
        Some(path) => std::fs::write(path, text).map_err(|source| CliError::Write {
            target: path.display().to_string(),
            source,
        }),
        None => std::io::stdout()
            .lock()
            .write_all(text.as_bytes())
            .map_err(|source| CliError::Write {
                target: "stdout".into(),
                source,
            }),
    }
}
