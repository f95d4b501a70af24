//! Types produced by the shell inspector and consumed by the safety gate.

/// One simple command found anywhere in a parsed command line:
/// a pipeline stage, a `&&`/`;` chain member, or the body of a
/// command substitution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandNode {
    /// The command word exactly as written (`/usr/bin/grep`, `awk`, `$X`).
    pub name: String,
    /// All words of the command, shlex-tokenized, name included.
    pub words: Vec<String>,
}

impl CommandNode {
    /// Arguments after the command name.
    pub fn args(&self) -> &[String] {
        if self.words.len() > 1 {
            &self.words[1..]
        } else {
            &[]
        }
    }
}

/// An output redirection that writes to a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirection {
    /// Operator as written, e.g. `>>`.
    pub operator: String,
    /// Redirect target, e.g. `/etc/hosts`.
    pub destination: String,
}

impl Redirection {
    /// Human-readable description, e.g. `"output redirection (>) to /tmp/x"`.
    pub fn describe(&self) -> String {
        format!(
            "output redirection ({}) to {}",
            self.operator, self.destination
        )
    }
}

/// Everything the gate needs to know about a command line.
#[derive(Debug, Clone, Default)]
pub struct Inspection {
    pub commands: Vec<CommandNode>,
    pub redirections: Vec<Redirection>,
    /// The grammar could not make sense of part of the input.
    pub has_error: bool,
}

impl Inspection {
    pub(crate) fn unparsed() -> Self {
        Self {
            has_error: true,
            ..Self::default()
        }
    }
}
