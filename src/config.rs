use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Embedded default configuration.
const DEFAULT_CONFIG: &str = include_str!("../config.default.toml");

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("config parse error in '{path}': {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("cannot expand config path '{path}': {reason}")]
    Expand { path: String, reason: String },

    #[error("invalid deny pattern '{pattern}': {source}")]
    InvalidDenyPattern {
        pattern: String,
        source: regex::Error,
    },
}

// ── Final (merged) config types ──

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub extract: ExtractConfig,
    #[serde(default)]
    pub exec: ExecConfig,
    #[serde(default)]
    pub advisory: AdvisoryConfig,
}

/// Which extracted commands of a rule are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecuteMode {
    #[default]
    All,
    First,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub execute: ExecuteMode,
    #[serde(default)]
    pub allow_unsafe: bool,
    #[serde(default)]
    pub override_deny: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout_seconds(),
            execute: ExecuteMode::All,
            allow_unsafe: false,
            override_deny: false,
        }
    }
}

fn default_timeout_seconds() -> u64 {
    12
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct PolicyConfig {
    #[serde(default)]
    pub trusted_prefixes: Vec<String>,
    #[serde(default)]
    pub allow: Vec<String>,
    #[serde(default)]
    pub deny_patterns: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExtractConfig {
    #[serde(default)]
    pub known_utilities: Vec<String>,
    #[serde(default = "default_max_commands")]
    pub max_commands: usize,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            known_utilities: Vec::new(),
            max_commands: default_max_commands(),
        }
    }
}

fn default_max_commands() -> usize {
    8
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecConfig {
    #[serde(default = "default_shell")]
    pub shell: String,
    #[serde(default)]
    pub path: String,
    /// Host variables copied into the otherwise empty child environment.
    #[serde(default)]
    pub pass_env: Vec<String>,
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            path: String::new(),
            pass_env: Vec::new(),
            max_output_bytes: default_max_output_bytes(),
        }
    }
}

fn default_shell() -> String {
    "/bin/bash".into()
}

fn default_max_output_bytes() -> usize {
    256 * 1024
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AdvisoryConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub num_ctx: u32,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_advisory_timeout")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub max_stdout_chars: usize,
    #[serde(default)]
    pub max_stderr_chars: usize,
}

impl Default for AdvisoryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: String::new(),
            model: String::new(),
            num_ctx: 0,
            temperature: 0.0,
            timeout_seconds: default_advisory_timeout(),
            max_stdout_chars: 0,
            max_stderr_chars: 0,
        }
    }
}

fn default_advisory_timeout() -> u64 {
    90
}

// ── Overlay types (user config that merges with defaults) ──

#[derive(Debug, Deserialize, Default)]
struct ConfigOverlay {
    #[serde(default)]
    settings: SettingsOverlay,
    #[serde(default)]
    policy: PolicyOverlay,
    #[serde(default)]
    extract: ExtractOverlay,
    #[serde(default)]
    exec: ExecOverlay,
    #[serde(default)]
    advisory: AdvisoryOverlay,
}

#[derive(Debug, Deserialize, Default)]
struct SettingsOverlay {
    timeout_seconds: Option<u64>,
    execute: Option<ExecuteMode>,
    allow_unsafe: Option<bool>,
    override_deny: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct PolicyOverlay {
    #[serde(default)]
    replace: bool,
    #[serde(default)]
    trusted_prefixes: Vec<String>,
    #[serde(default)]
    allow: Vec<String>,
    #[serde(default)]
    deny_patterns: Vec<String>,
    #[serde(default)]
    remove_trusted_prefixes: Vec<String>,
    #[serde(default)]
    remove_allow: Vec<String>,
    #[serde(default)]
    remove_deny_patterns: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ExtractOverlay {
    #[serde(default)]
    replace: bool,
    #[serde(default)]
    known_utilities: Vec<String>,
    #[serde(default)]
    remove_known_utilities: Vec<String>,
    max_commands: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct ExecOverlay {
    #[serde(default)]
    replace: bool,
    shell: Option<String>,
    path: Option<String>,
    #[serde(default)]
    pass_env: Vec<String>,
    #[serde(default)]
    remove_pass_env: Vec<String>,
    max_output_bytes: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct AdvisoryOverlay {
    enabled: Option<bool>,
    endpoint: Option<String>,
    model: Option<String>,
    num_ctx: Option<u32>,
    temperature: Option<f32>,
    timeout_seconds: Option<u64>,
    max_stdout_chars: Option<usize>,
    max_stderr_chars: Option<usize>,
}

// ── Merge logic ──

/// Merge a user list into a default list.
/// In replace mode: user list replaces default entirely.
/// In merge mode: remove items first, then extend with additions (deduped).
fn merge_list(base: &mut Vec<String>, add: Vec<String>, remove: &[String], replace: bool) {
    if replace {
        *base = add;
    } else {
        base.retain(|item| !remove.contains(item));
        for item in add {
            if !base.contains(&item) {
                base.push(item);
            }
        }
    }
}

fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(v) = value {
        *slot = v;
    }
}

impl Config {
    /// Load the default embedded configuration.
    pub fn default_config() -> Self {
        toml::from_str(DEFAULT_CONFIG).expect("embedded default config must parse")
    }

    /// Load configuration with resolution order:
    /// 1. Start with embedded defaults
    /// 2. Merge the overlay at `explicit` if given, else
    ///    ~/.config/stig-gate/config.toml (if exists)
    ///
    /// An explicitly named overlay must exist and parse; the implicit one is
    /// skipped with a warning when broken.
    pub fn load(explicit: Option<&str>) -> Result<Self, ConfigError> {
        let mut config = Self::default_config();
        match explicit {
            Some(raw) => {
                let path = expand_path(raw)?;
                let overlay = Self::read_overlay(&path)?;
                config.apply_overlay(overlay);
            }
            None => {
                if let Some(path) = Self::user_overlay_path()
                    && path.exists()
                {
                    match Self::read_overlay(&path) {
                        Ok(overlay) => config.apply_overlay(overlay),
                        Err(e) => log::warn!("ignoring user config: {e}"),
                    }
                }
            }
        }
        config.validate()?;
        Ok(config)
    }

    fn user_overlay_path() -> Option<PathBuf> {
        let home = std::env::var_os("HOME")?;
        Some(Path::new(&home).join(".config/stig-gate/config.toml"))
    }

    fn read_overlay(path: &Path) -> Result<ConfigOverlay, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Check everything that can only fail at run time.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let deny = crate::gate::DenyList::compile(&self.policy.deny_patterns)?;
        log::debug!("{} deny patterns compiled", deny.len());
        Ok(())
    }

    /// Apply an overlay on top of this config (merge semantics).
    fn apply_overlay(&mut self, overlay: ConfigOverlay) {
        // Settings: scalar overrides
        let s = overlay.settings;
        set(&mut self.settings.timeout_seconds, s.timeout_seconds);
        set(&mut self.settings.execute, s.execute);
        set(&mut self.settings.allow_unsafe, s.allow_unsafe);
        set(&mut self.settings.override_deny, s.override_deny);

        // Policy
        let p = overlay.policy;
        merge_list(
            &mut self.policy.trusted_prefixes,
            p.trusted_prefixes,
            &p.remove_trusted_prefixes,
            p.replace,
        );
        merge_list(&mut self.policy.allow, p.allow, &p.remove_allow, p.replace);
        merge_list(
            &mut self.policy.deny_patterns,
            p.deny_patterns,
            &p.remove_deny_patterns,
            p.replace,
        );

        // Extract
        let x = overlay.extract;
        merge_list(
            &mut self.extract.known_utilities,
            x.known_utilities,
            &x.remove_known_utilities,
            x.replace,
        );
        set(&mut self.extract.max_commands, x.max_commands);

        // Exec
        let e = overlay.exec;
        merge_list(&mut self.exec.pass_env, e.pass_env, &e.remove_pass_env, e.replace);
        set(&mut self.exec.shell, e.shell);
        set(&mut self.exec.path, e.path);
        set(&mut self.exec.max_output_bytes, e.max_output_bytes);

        // Advisory
        let a = overlay.advisory;
        set(&mut self.advisory.enabled, a.enabled);
        set(&mut self.advisory.endpoint, a.endpoint);
        set(&mut self.advisory.model, a.model);
        set(&mut self.advisory.num_ctx, a.num_ctx);
        set(&mut self.advisory.temperature, a.temperature);
        set(&mut self.advisory.timeout_seconds, a.timeout_seconds);
        set(&mut self.advisory.max_stdout_chars, a.max_stdout_chars);
        set(&mut self.advisory.max_stderr_chars, a.max_stderr_chars);
    }

    /// Apply an overlay from a TOML string. Used for testing.
    #[cfg(test)]
    fn apply_overlay_str(&mut self, toml_str: &str) {
        let overlay: ConfigOverlay = toml::from_str(toml_str).unwrap();
        self.apply_overlay(overlay);
    }
}

/// Expand `~` and `$VAR` in a user-supplied path.
pub fn expand_path(raw: &str) -> Result<PathBuf, ConfigError> {
    shellexpand::full(raw)
        .map(|p| PathBuf::from(p.as_ref()))
        .map_err(|e| ConfigError::Expand {
            path: raw.to_string(),
            reason: e.to_string(),
        })
}
