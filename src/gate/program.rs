//! Program text carried in the arguments of allow-listed tools. awk, sed
//! and osascript read a small program from their command line, and that
//! program can start processes or write files on its own.

use std::sync::LazyLock;

use regex::Regex;

use crate::parse::basename;

const AWKS: &[&str] = &["awk", "gawk", "nawk", "mawk"];
const SEDS: &[&str] = &["sed", "gsed"];

static AWK_HAZARDS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"\bsystem\s*\(", "calls system()"),
        (r"(^|[^|])\|([^|]|$)", "pipes to or from a command"),
        (r"\bprintf?\b[^;{}]*>", "prints to a file"),
        (r"(?m)^\s*@load\b", "loads an extension"),
    ]
    .into_iter()
    .map(|(re, what)| (Regex::new(re).expect("awk hazard regex must compile"), what))
    .collect()
});

static OSASCRIPT_HAZARD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)do\s+shell\s+script|doShellScript|\brun\s+script\b|runScript|NSTask")
        .expect("osascript hazard regex must compile")
});

/// Start of a sed command: separator, optional address or range, optional
/// negation.
const SED_COMMAND_START: &str = concat!(
    r"(?:^|[;\n{}])\s*",
    r"(?:(?:\d+(?:~\d+)?|\$|/(?:[^/\\\n]|\\.)*/[IM]*)",
    r"(?:\s*,\s*(?:\d+|\$|/(?:[^/\\\n]|\\.)*/[IM]*|[~+]\d+))?)?",
    r"\s*!?\s*",
);

static SED_WRITE_OR_EXEC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"{SED_COMMAND_START}[wWe](\s|;|$)"))
        .expect("sed command regex must compile")
});

static SED_SUBSTITUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"{SED_COMMAND_START}s([^\w\s\\])"))
        .expect("sed substitute regex must compile")
});

/// Why the program given to `tool` can do more than read, if it can.
pub(super) fn hazard(tool: &str, args: &[String]) -> Option<String> {
    if AWKS.contains(&tool) {
        return awk_hazard(tool, args);
    }
    if SEDS.contains(&tool) {
        return sed_hazard(tool, args);
    }
    if tool == "osascript" {
        return osascript_hazard(args);
    }
    None
}

/// A heredoc body is the script when it feeds osascript.
pub(super) fn heredoc_hazard(head: &[String], body: &str) -> Option<String> {
    let feeds_osascript = head.iter().any(|w| basename(w) == "osascript");
    (feeds_osascript && OSASCRIPT_HAZARD.is_match(body))
        .then(|| "osascript script runs shell commands".to_string())
}

fn awk_hazard(tool: &str, args: &[String]) -> Option<String> {
    let mut programs = Vec::new();
    let mut explicit = false;
    let mut i = 0;
    while i < args.len() {
        let word = args[i].as_str();
        match word {
            "--" => {
                i += 1;
                break;
            }
            "-f" | "--file" => return Some(unseen(tool, word)),
            "-e" | "--source" => {
                explicit = true;
                programs.extend(args.get(i + 1));
                i += 2;
            }
            "-F" | "-v" | "--field-separator" | "--assign" => i += 2,
            _ if word.starts_with("--file=") || (word.starts_with("-f") && word.len() > 2) => {
                return Some(unseen(tool, word));
            }
            _ if word.starts_with("--source=") => {
                explicit = true;
                programs.push(&args[i]);
                i += 1;
            }
            _ if word.len() > 1 && word.starts_with('-') => i += 1,
            _ => break,
        }
    }
    if !explicit {
        programs.extend(args.get(i));
    }

    programs.iter().find_map(|program| {
        AWK_HAZARDS
            .iter()
            .find(|(re, _)| re.is_match(program))
            .map(|(_, what)| format!("{tool} program {what}"))
    })
}

fn sed_hazard(tool: &str, args: &[String]) -> Option<String> {
    let mut scripts: Vec<&str> = Vec::new();
    let mut explicit = false;
    let mut i = 0;
    while i < args.len() {
        let word = args[i].as_str();
        if word == "--" {
            i += 1;
            break;
        }
        if let Some(rest) = word.strip_prefix("--") {
            let (opt, value) = match rest.split_once('=') {
                Some((opt, value)) => (opt, Some(value)),
                None => (rest, None),
            };
            match opt {
                "file" => return Some(unseen(tool, word)),
                "expression" => {
                    explicit = true;
                    match value {
                        Some(v) => scripts.push(v),
                        None => {
                            scripts.extend(args.get(i + 1).map(String::as_str));
                            i += 1;
                        }
                    }
                }
                "line-length" if value.is_none() => i += 1,
                _ => {}
            }
            i += 1;
            continue;
        }
        if word.len() > 1 && word.starts_with('-') {
            let mut consumed = 1;
            for (at, c) in word.char_indices().skip(1) {
                let attached = &word[at + c.len_utf8()..];
                match c {
                    'f' => return Some(unseen(tool, word)),
                    'e' => {
                        explicit = true;
                        if attached.is_empty() {
                            scripts.extend(args.get(i + 1).map(String::as_str));
                            consumed = 2;
                        } else {
                            scripts.push(attached);
                        }
                        break;
                    }
                    'l' => {
                        if attached.is_empty() {
                            consumed = 2;
                        }
                        break;
                    }
                    _ => {}
                }
            }
            i += consumed;
            continue;
        }
        break;
    }
    if !explicit {
        scripts.extend(args.get(i).map(String::as_str));
    }

    scripts
        .into_iter()
        .find(|script| sed_script_hazard(script))
        .map(|_| format!("{tool} script writes files or runs commands"))
}

/// `w`, `W` and `e` commands, and `s` commands carrying the `w` or `e` flag.
fn sed_script_hazard(script: &str) -> bool {
    if SED_WRITE_OR_EXEC.is_match(script) {
        return true;
    }
    SED_SUBSTITUTE.captures_iter(script).any(|caps| {
        let (Some(all), Some(delim)) = (caps.get(0), caps.get(1)) else {
            return false;
        };
        let Some(delim) = delim.as_str().chars().next() else {
            return false;
        };
        substitution_flags(&script[all.end()..], delim).contains(['w', 'e'])
    })
}

/// The flags after `s/regex/replacement/`, given the text following the
/// first delimiter.
fn substitution_flags(rest: &str, delim: char) -> &str {
    let mut seen = 0;
    let mut chars = rest.char_indices();
    while let Some((at, c)) = chars.next() {
        if c == '\\' {
            chars.next();
        } else if c == delim {
            seen += 1;
            if seen == 2 {
                let flags = &rest[at + c.len_utf8()..];
                let end = flags
                    .find(|c: char| !c.is_ascii_alphanumeric())
                    .unwrap_or(flags.len());
                return &flags[..end];
            }
        }
    }
    ""
}

fn osascript_hazard(args: &[String]) -> Option<String> {
    let mut has_statement = false;
    let mut i = 0;
    while i < args.len() {
        let word = args[i].as_str();
        match word {
            "-e" => {
                has_statement = true;
                if args.get(i + 1).is_some_and(|s| OSASCRIPT_HAZARD.is_match(s)) {
                    return Some("osascript statement runs shell commands".into());
                }
                i += 2;
            }
            "-l" | "-s" => i += 2,
            "-i" => i += 1,
            // Positional words after -e statements are script arguments.
            _ if has_statement => i += 1,
            _ if word.starts_with('-') => i += 1,
            _ => return Some(unseen("osascript", word)),
        }
    }
    None
}

fn unseen(tool: &str, what: &str) -> String {
    format!("{tool} {what}: runs a program file the gate cannot see")
}
