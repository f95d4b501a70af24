//! Block- and line-level recognizers.
//!
//! Fences are found first and split the text into blocks; every kept block
//! is then scanned line by line with [`CHAIN`]. A recognizer either lets the
//! line continue down the chain (possibly rewriting the candidate), emits a
//! command, or drops the line.

use std::sync::LazyLock;

use regex::Regex;

use super::{Command, Heredoc};

static PROMPT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*\$\s+(?P<cmd>\S.*?)\s*$").expect("prompt regex must compile")
});

static HEREDOC_OPEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?:^|[^<])(?P<marker><<(?P<dash>-?)\s*(?:'(?P<sq>[A-Za-z0-9_]+)'|"(?P<dq>[A-Za-z0-9_]+)"|(?P<bare>[A-Za-z0-9_]+)))"#,
    )
    .expect("heredoc regex must compile")
});

static ASSIGNMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*\s*=").expect("assignment regex must compile")
});

/// Fence info strings that mark a shell block. Empty means untagged.
const SHELL_FENCE_TAGS: &[&str] = &["", "bash", "sh", "zsh", "shell", "console", "shell-session"];

const FENCE: &str = "```";

/// A region of normalized text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Block<'a> {
    /// Body of a shell (or untagged) fence.
    Fence(Vec<&'a str>),
    /// Text outside any fence.
    Prose(Vec<&'a str>),
}

impl<'a> Block<'a> {
    fn lines(&self) -> &[&'a str] {
        match self {
            Block::Fence(lines) | Block::Prose(lines) => lines,
        }
    }
}

/// Split text into fence and prose blocks, in document order.
///
/// Fences tagged with a non-shell language are dropped. An opener without a
/// closing fence is not a fence; its lines stay prose.
pub(crate) fn split_blocks(text: &str) -> Vec<Block<'_>> {
    let lines: Vec<&str> = text.lines().collect();
    let mut blocks = Vec::new();
    let mut prose: Vec<&str> = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let trimmed = lines[i].trim();
        if let Some(info) = trimmed.strip_prefix(FENCE)
            && !info.contains(FENCE)
            && let Some(close) = (i + 1..lines.len()).find(|&j| lines[j].trim() == FENCE)
        {
            if !prose.is_empty() {
                blocks.push(Block::Prose(std::mem::take(&mut prose)));
            }
            let tag = info.trim().to_ascii_lowercase();
            if SHELL_FENCE_TAGS.contains(&tag.as_str()) {
                blocks.push(Block::Fence(lines[i + 1..close].to_vec()));
            } else {
                log::debug!("skipping fenced block tagged '{tag}'");
            }
            i = close + 1;
            continue;
        }
        prose.push(lines[i]);
        i += 1;
    }
    if !prose.is_empty() {
        blocks.push(Block::Prose(prose));
    }
    blocks
}

/// Line-level recognizers, applied in this order to every line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Recognizer {
    /// `$ cmd`: strips the sigil and vouches for the line.
    Prompt,
    /// `head <<TAG` ... `TAG`: binds the following lines as opaque payload.
    Heredoc,
    /// Absolute path or known utility at the start of the line.
    Bare,
}

pub(crate) const CHAIN: [Recognizer; 3] =
    [Recognizer::Prompt, Recognizer::Heredoc, Recognizer::Bare];

/// The line as it travels down the chain.
struct Candidate<'a> {
    text: &'a str,
    prompted: bool,
}

enum Step {
    Continue,
    /// Emit a command; the usize is the number of extra lines consumed.
    Emit(Command, usize),
    Drop(usize),
}

impl Recognizer {
    fn apply(self, cand: &mut Candidate<'_>, rest: &[&str], known: &[String]) -> Step {
        match self {
            Recognizer::Prompt => {
                if let Some(cmd) = PROMPT.captures(cand.text).and_then(|c| c.name("cmd")) {
                    cand.text = cmd.as_str();
                    cand.prompted = true;
                }
                Step::Continue
            }
            Recognizer::Heredoc => {
                let Some(open) = HeredocOpen::parse(cand.text) else {
                    return Step::Continue;
                };
                let Some((body, used)) = open.capture(rest) else {
                    log::debug!("heredoc <<{} never terminated; ignoring opener", open.tag);
                    return Step::Drop(0);
                };
                if (cand.prompted || is_recognizable(open.head, known)) && is_acceptable(open.head)
                {
                    Step::Emit(Command::Heredoc(open.into_heredoc(body)), used)
                } else {
                    Step::Drop(used)
                }
            }
            Recognizer::Bare => {
                if (cand.prompted || is_recognizable(cand.text, known))
                    && is_acceptable(cand.text)
                {
                    Step::Emit(Command::Plain(cand.text.trim().to_string()), 0)
                } else {
                    Step::Drop(0)
                }
            }
        }
    }
}

/// Run the line chain over one block, handing every emitted command to `emit`.
pub(crate) fn scan_block(block: &Block<'_>, known: &[String], mut emit: impl FnMut(Command)) {
    let lines = block.lines();
    let mut i = 0;
    while i < lines.len() {
        let mut cand = Candidate {
            text: lines[i].trim(),
            prompted: false,
        };
        let mut consumed = 1;
        for recognizer in CHAIN {
            match recognizer.apply(&mut cand, &lines[i + 1..], known) {
                Step::Continue => {}
                Step::Emit(cmd, extra) => {
                    emit(cmd);
                    consumed += extra;
                    break;
                }
                Step::Drop(extra) => {
                    consumed += extra;
                    break;
                }
            }
        }
        i += consumed;
    }
}

/// A parsed `<<TAG` opener on a single line.
struct HeredocOpen<'a> {
    head: &'a str,
    marker: &'a str,
    tag: &'a str,
    trailer: &'a str,
    strip_tabs: bool,
}

impl<'a> HeredocOpen<'a> {
    fn parse(line: &'a str) -> Option<Self> {
        let caps = HEREDOC_OPEN.captures(line)?;
        let marker = caps.name("marker")?;
        let tag = caps
            .name("sq")
            .or_else(|| caps.name("dq"))
            .or_else(|| caps.name("bare"))?;
        Some(Self {
            head: line[..marker.start()].trim(),
            marker: marker.as_str(),
            tag: tag.as_str(),
            trailer: line[marker.end()..].trim(),
            strip_tabs: caps.name("dash").is_some_and(|d| !d.as_str().is_empty()),
        })
    }

    /// Collect body lines up to the terminator. Returns the body and the
    /// number of lines consumed including the terminator, or `None` when
    /// the terminator never appears.
    fn capture(&self, rest: &[&str]) -> Option<(String, usize)> {
        let end = rest.iter().position(|l| l.trim() == self.tag)?;
        let body: Vec<&str> = rest[..end]
            .iter()
            .map(|l| {
                if self.strip_tabs {
                    l.trim_start_matches('\t')
                } else {
                    *l
                }
            })
            .collect();
        Some((body.join("\n"), end + 1))
    }

    fn into_heredoc(self, body: String) -> Heredoc {
        Heredoc {
            head: self.head.to_string(),
            marker: self.marker.to_string(),
            tag: self.tag.to_string(),
            trailer: self.trailer.to_string(),
            body,
        }
    }
}

/// Non-empty, not a comment, not a `NAME = value` description.
pub(crate) fn is_acceptable(candidate: &str) -> bool {
    let c = candidate.trim();
    !c.is_empty() && !c.starts_with('#') && !ASSIGNMENT.is_match(c)
}

/// A line that reads as a command without a prompt: it starts with an
/// absolute path or a known utility name, and does not end like a sentence
/// introducing something.
pub(crate) fn is_recognizable(line: &str, known: &[String]) -> bool {
    let line = line.trim();
    if line.ends_with(':') {
        return false;
    }
    let Some(first) = line.split_whitespace().next() else {
        return false;
    };
    (first.len() > 1 && first.starts_with('/')) || known.iter().any(|k| k == first)
}
