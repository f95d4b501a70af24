/// Tokenize a command into words using shlex (POSIX word splitting).
pub fn tokenize(command: &str) -> Vec<String> {
    shlex::split(command).unwrap_or_else(|| {
        // Fallback: simple whitespace splitting if shlex can't parse
        command.split_whitespace().map(String::from).collect()
    })
}

/// The first word of a command line exactly as written (path kept).
///
/// Unbalanced quoting falls back to whitespace splitting so that the gate
/// still sees something to judge.
pub fn leading_token(command: &str) -> String {
    tokenize(command.trim())
        .into_iter()
        .next()
        .unwrap_or_default()
}

/// Extract basename: /usr/bin/ls → ls, ./script.sh → script.sh
pub fn basename(word: &str) -> &str {
    match word.rsplit_once('/') {
        Some((_, name)) if !name.is_empty() => name,
        _ => word,
    }
}
