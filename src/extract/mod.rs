//! Command extraction from free-form check guidance.
//!
//! Guidance text is normalized (line endings, `\` continuations), split into
//! fenced and prose blocks, and every block is scanned by an ordered chain
//! of line recognizers (prompt, heredoc, bare line). Nothing here fails:
//! text that does not clearly contain a command yields no command.

mod normalize;
mod recognize;

use std::fmt;
use std::path::Path;

use serde::Serialize;

use crate::config::ExtractConfig;

pub use normalize::normalize;

/// A command recovered from guidance text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Command {
    /// A single command line.
    Plain(String),
    /// A command fed an embedded multi-line script.
    Heredoc(Heredoc),
}

/// `head <<TAG trailer` followed by `body` and a `TAG` line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Heredoc {
    /// Command text before the `<<` marker.
    pub head: String,
    /// The marker as written, e.g. `<<'EOF'`.
    pub marker: String,
    pub tag: String,
    /// Text after the marker on the opening line, e.g. `| grep x`.
    pub trailer: String,
    /// Script body, verbatim. Opaque to every recognizer.
    pub body: String,
}

impl Heredoc {
    /// The command line to run once the body has been written to `script`.
    pub fn invocation(&self, script: &Path) -> String {
        let path = script.to_string_lossy();
        let quoted = shlex::try_quote(&path).unwrap_or(path.clone());
        if self.trailer.is_empty() {
            format!("{} < {}", self.head, quoted)
        } else {
            format!("{} < {} {}", self.head, quoted, self.trailer)
        }
    }
}

impl Command {
    /// The part of the command the gate inspects for command names.
    /// Heredoc bodies are payload and excluded.
    pub fn gate_text(&self) -> String {
        match self {
            Command::Plain(text) => text.clone(),
            Command::Heredoc(h) if h.trailer.is_empty() => h.head.clone(),
            Command::Heredoc(h) => format!("{} {}", h.head, h.trailer),
        }
    }

    /// First line of the rendered command, for one-line logs.
    pub fn first_line(&self) -> String {
        match self {
            Command::Plain(text) => text.lines().next().unwrap_or("").to_string(),
            Command::Heredoc(h) => format!("{} {}", h.head, h.marker),
        }
    }

    pub fn is_heredoc(&self) -> bool {
        matches!(self, Command::Heredoc(_))
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Plain(text) => f.write_str(text),
            Command::Heredoc(h) => {
                write!(f, "{} {}", h.head, h.marker)?;
                if !h.trailer.is_empty() {
                    write!(f, " {}", h.trailer)?;
                }
                if !h.body.is_empty() {
                    write!(f, "\n{}", h.body)?;
                }
                write!(f, "\n{}", h.tag)
            }
        }
    }
}

/// Extract commands from guidance text: first-appearance order,
/// deduplicated, at most `config.max_commands`.
pub fn extract(text: &str, config: &ExtractConfig) -> Vec<Command> {
    let normalized = normalize(text);
    let mut found: Vec<Command> = Vec::new();

    for block in recognize::split_blocks(&normalized) {
        recognize::scan_block(&block, &config.known_utilities, |cmd| {
            if found.len() < config.max_commands && !found.contains(&cmd) {
                found.push(cmd);
            }
        });
    }

    log::trace!("extracted {} command(s)", found.len());
    found
}
