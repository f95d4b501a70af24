use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::config::{Config, ConfigError, ExecuteMode};
use crate::pipeline::Selection;
use crate::rules::LoadError;

/// Exit code for a run stopped by SIGINT or SIGTERM.
pub const EXIT_INTERRUPTED: u8 = crate::exec::EXIT_INTERRUPTED as u8;

#[derive(Parser, Debug)]
#[command(
    name = "stig-gate",
    version,
    about = "Run the automatable checks of an XCCDF/STIG benchmark behind a safety gate"
)]
pub struct Cli {
    /// XCCDF document. Defaults to the first *.xml in the current directory.
    pub xccdf: Option<PathBuf>,

    /// Only run these rule ids (comma-separated).
    #[arg(long, value_delimiter = ',', conflicts_with = "keyword")]
    pub ids: Vec<String>,

    /// Only run rules whose id, title or guidance contains this text.
    #[arg(long)]
    pub keyword: Option<String>,

    /// Run commands outside the trusted prefixes and allow-list. Deny
    /// patterns still apply.
    #[arg(long)]
    pub allow_unsafe: bool,

    /// Ignore deny patterns as well.
    #[arg(long)]
    pub override_deny: bool,

    /// Per-command timeout in seconds.
    #[arg(long, value_name = "SECONDS")]
    pub timeout: Option<u64>,

    /// Execute only the first extracted command of each rule.
    #[arg(long)]
    pub first_only: bool,

    /// Ask the configured model for a second opinion on each result.
    #[arg(long, overrides_with = "no_advisory")]
    pub advisory: bool,

    /// Never contact the model, whatever the config says.
    #[arg(long, overrides_with = "advisory")]
    pub no_advisory: bool,

    /// Config overlay to merge instead of ~/.config/stig-gate/config.toml.
    #[arg(long, value_name = "PATH")]
    pub config: Option<String>,

    /// Print the merged configuration as TOML and exit.
    #[arg(long)]
    pub dump_config: bool,

    /// List the selected rules and their commands without running anything.
    #[arg(long)]
    pub list: bool,

    #[arg(long, value_enum, default_value_t = Format::Summary)]
    pub format: Format,

    /// Write the report here instead of stdout.
    #[arg(long, short = 'o', value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// More log output (repeatable).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Errors only.
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    Json,
    Summary,
}

/// Everything that ends a run before or instead of a report.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error("cannot install signal handlers: {0}")]
    Signal(#[from] nix::Error),
    #[error("cannot write {target}: {source}")]
    Write {
        target: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot determine current directory: {0}")]
    CurrentDir(#[source] std::io::Error),
    #[error("cannot render config: {0}")]
    DumpConfig(#[from] toml::ser::Error),
    #[error("cannot render report: {0}")]
    Render(#[from] serde_json::Error),
}

impl Cli {
    pub fn selection(&self) -> Selection {
        if !self.ids.is_empty() {
            Selection::Ids(self.ids.clone())
        } else if let Some(kw) = &self.keyword {
            Selection::Keyword(kw.clone())
        } else {
            Selection::All
        }
    }

    /// Fold the OLLAMA_* environment and then the command-line flags into
    /// `config`. `env` stands in for the process environment.
    pub fn apply(&self, config: &mut Config, env: impl Fn(&str) -> Option<String>) {
        if let Some(host) = env("OLLAMA_HOST").filter(|h| !h.trim().is_empty()) {
            config.advisory.endpoint = ollama_endpoint(host.trim());
        }
        if let Some(model) = env("OLLAMA_MODEL").filter(|m| !m.trim().is_empty()) {
            config.advisory.model = model.trim().to_string();
        }
        if let Some(raw) = env("OLLAMA_NUM_CTX") {
            match raw.trim().parse() {
                Ok(n) => config.advisory.num_ctx = n,
                Err(_) => log::warn!("ignoring OLLAMA_NUM_CTX={raw:?}: not a number"),
            }
        }

        let settings = &mut config.settings;
        if self.allow_unsafe {
            settings.allow_unsafe = true;
        }
        if self.override_deny {
            settings.override_deny = true;
        }
        if let Some(secs) = self.timeout {
            settings.timeout_seconds = secs;
        }
        if self.first_only {
            settings.execute = ExecuteMode::First;
        }
        if self.advisory {
            config.advisory.enabled = true;
        }
        if self.no_advisory {
            config.advisory.enabled = false;
        }
    }
}

/// OLLAMA_HOST may be a bare `host:port`.
fn ollama_endpoint(host: &str) -> String {
    if host.contains("://") {
        host.to_string()
    } else {
        format!("http://{host}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("stig-gate").chain(args.iter().copied())).unwrap()
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn defaults() {
        let cli = parse(&[]);
        assert!(cli.xccdf.is_none());
        assert_eq!(cli.format, Format::Summary);
        assert_eq!(cli.selection(), Selection::All);
        let mut config = Config::default_config();
        cli.apply(&mut config, no_env);
        assert!(!config.settings.allow_unsafe);
        assert!(!config.advisory.enabled);
    }

    #[test]
    fn ids_split_on_commas() {
        let cli = parse(&["bench.xml", "--ids", "SV-1,SV-2", "--ids", "SV-3"]);
        assert_eq!(cli.xccdf.as_deref(), Some(std::path::Path::new("bench.xml")));
        assert_eq!(
            cli.selection(),
            Selection::Ids(vec!["SV-1".into(), "SV-2".into(), "SV-3".into()])
        );
    }

    #[test]
    fn ids_and_keyword_conflict() {
        assert!(Cli::try_parse_from(["stig-gate", "--ids", "a", "--keyword", "b"]).is_err());
    }

    #[test]
    fn quiet_and_verbose_conflict() {
        assert!(Cli::try_parse_from(["stig-gate", "-q", "-v"]).is_err());
        assert_eq!(parse(&["-vvv"]).verbose, 3);
    }

    #[test]
    fn flags_override_config() {
        let cli = parse(&[
            "--allow-unsafe",
            "--override-deny",
            "--timeout",
            "30",
            "--first-only",
            "--advisory",
        ]);
        let mut config = Config::default_config();
        cli.apply(&mut config, no_env);
        assert!(config.settings.allow_unsafe);
        assert!(config.settings.override_deny);
        assert_eq!(config.settings.timeout_seconds, 30);
        assert_eq!(config.settings.execute, ExecuteMode::First);
        assert!(config.advisory.enabled);
    }

    #[test]
    fn last_advisory_flag_wins() {
        let mut config = Config::default_config();
        config.advisory.enabled = true;
        parse(&["--advisory", "--no-advisory"]).apply(&mut config, no_env);
        assert!(!config.advisory.enabled);

        parse(&["--no-advisory", "--advisory"]).apply(&mut config, no_env);
        assert!(config.advisory.enabled);
    }

    #[test]
    fn ollama_environment_folded_in() {
        let env: HashMap<&str, &str> = [
            ("OLLAMA_HOST", "10.0.0.5:11434"),
            ("OLLAMA_MODEL", "qwen2.5"),
            ("OLLAMA_NUM_CTX", "4096"),
        ]
        .into();
        let mut config = Config::default_config();
        parse(&[]).apply(&mut config, |k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.advisory.endpoint, "http://10.0.0.5:11434");
        assert_eq!(config.advisory.model, "qwen2.5");
        assert_eq!(config.advisory.num_ctx, 4096);
        assert!(!config.advisory.enabled);
    }

    #[test]
    fn bad_num_ctx_ignored() {
        let mut config = Config::default_config();
        let before = config.advisory.num_ctx;
        parse(&[]).apply(&mut config, |k| (k == "OLLAMA_NUM_CTX").then(|| "lots".to_string()));
        assert_eq!(config.advisory.num_ctx, before);
    }

    #[test]
    fn host_with_scheme_kept() {
        assert_eq!(ollama_endpoint("https://llm.internal"), "https://llm.internal");
    }

    #[test]
    fn format_values() {
        assert_eq!(parse(&["--format", "json"]).format, Format::Json);
        assert!(Cli::try_parse_from(["stig-gate", "--format", "xml"]).is_err());
    }
}
