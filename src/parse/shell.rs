use tree_sitter::{Node, Parser};

use super::tokenize::tokenize;
use super::types::{CommandNode, Inspection, Redirection};

/// Operators that write to their destination.
const WRITE_OPERATORS: &[&str] = &[">", ">>", "&>", "&>>", ">|", ">&"];

/// Destinations that discard or forward output instead of persisting it.
const HARMLESS_DESTINATIONS: &[&str] = &["/dev/null", "/dev/stdout", "/dev/stderr"];

/// Parse a command line with tree-sitter-bash and collect every simple
/// command and every file-writing redirection in it, including those nested
/// in pipelines, lists, subshells, control flow and command substitutions.
///
/// Single-quoted text is data to the grammar, so `echo '$(rm -rf /)'`
/// yields only `echo`.
pub fn inspect(source: &str) -> Inspection {
    let mut parser = Parser::new();
    if let Err(e) = parser.set_language(&tree_sitter_bash::LANGUAGE.into()) {
        log::error!("tree-sitter-bash unavailable: {e}");
        return Inspection::unparsed();
    }
    let Some(tree) = parser.parse(source, None) else {
        return Inspection::unparsed();
    };

    let root = tree.root_node();
    let mut out = Inspection {
        has_error: root.has_error(),
        ..Inspection::default()
    };
    collect(root, source.as_bytes(), &mut out);
    out
}

fn collect(node: Node<'_>, src: &[u8], out: &mut Inspection) {
    match node.kind() {
        "command" => {
            if let Some(name) = node.child_by_field_name("name") {
                // Leading `VAR=x` assignments are not part of the words.
                let tail = std::str::from_utf8(&src[name.start_byte()..node.end_byte()])
                    .unwrap_or("");
                out.commands.push(CommandNode {
                    name: text(name, src).to_string(),
                    words: tokenize(tail),
                });
            }
        }
        "file_redirect" => {
            if let Some(redir) = write_redirection(node, src) {
                out.redirections.push(redir);
            }
        }
        _ => {}
    }

    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        collect(child, src, out);
    }
}

/// A `file_redirect` node that persists output somewhere, if it does.
/// fd duplication (`2>&1`, `>&-`) and harmless sinks are not writes.
fn write_redirection(node: Node<'_>, src: &[u8]) -> Option<Redirection> {
    let mut cursor = node.walk();
    let operator = node
        .children(&mut cursor)
        .filter(|c| !c.is_named())
        .map(|c| c.kind())
        .find(|k| WRITE_OPERATORS.contains(k))?
        .to_string();

    let destination = text(node.child_by_field_name("destination")?, src).to_string();
    if operator == ">&" && destination.chars().all(|c| c.is_ascii_digit() || c == '-') {
        return None;
    }
    if HARMLESS_DESTINATIONS.contains(&destination.as_str()) {
        return None;
    }
    Some(Redirection {
        operator,
        destination,
    })
}

fn text<'a>(node: Node<'_>, src: &'a [u8]) -> &'a str {
    node.utf8_text(src).unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(cmd: &str) -> Vec<String> {
        inspect(cmd).commands.into_iter().map(|c| c.name).collect()
    }

    #[test]
    fn simple_command() {
        assert_eq!(names("/usr/bin/profiles -P"), vec!["/usr/bin/profiles"]);
    }

    #[test]
    fn pipeline_stages() {
        assert_eq!(
            names("/usr/bin/defaults read com.apple.x | /usr/bin/grep -c 1"),
            vec!["/usr/bin/defaults", "/usr/bin/grep"]
        );
    }

    #[test]
    fn and_chain() {
        assert_eq!(names("ls && rm -rf /tmp/x"), vec!["ls", "rm"]);
    }

    #[test]
    fn command_substitution_is_walked() {
        assert_eq!(names("echo $(whoami)"), vec!["echo", "whoami"]);
    }

    #[test]
    fn single_quoted_substitution_is_data() {
        assert_eq!(names("echo '$(rm -rf /)'"), vec!["echo"]);
    }

    #[test]
    fn words_are_tokenized() {
        let cmds = inspect("/usr/bin/grep -c 'a b' /etc/hosts").commands;
        assert_eq!(cmds[0].args(), ["-c", "a b", "/etc/hosts"]);
    }

    #[test]
    fn assignments_excluded_from_words() {
        let cmds = inspect("LANG=C /usr/bin/sort -u x").commands;
        assert_eq!(cmds[0].name, "/usr/bin/sort");
        assert_eq!(cmds[0].words, ["/usr/bin/sort", "-u", "x"]);
    }

    #[test]
    fn file_redirect_detected() {
        let redirs = inspect("ls > /tmp/out").redirections;
        assert_eq!(redirs.len(), 1);
        assert_eq!(redirs[0].operator, ">");
        assert_eq!(redirs[0].destination, "/tmp/out");
    }

    #[test]
    fn append_redirect_detected() {
        assert_eq!(inspect("echo x >> /etc/hosts").redirections.len(), 1);
    }

    #[test]
    fn dev_null_is_not_a_write() {
        assert!(inspect("ls /nope 2>/dev/null").redirections.is_empty());
    }

    #[test]
    fn fd_dup_is_not_a_write() {
        assert!(inspect("ls 2>&1").redirections.is_empty());
    }

    #[test]
    fn input_redirect_is_not_a_write() {
        assert!(inspect("grep x < /etc/hosts").redirections.is_empty());
    }

    #[test]
    fn clean_parse_has_no_error() {
        assert!(!inspect("ls -la | wc -l").has_error);
    }

    #[test]
    fn unterminated_quote_is_error() {
        assert!(inspect("ls 'unterminated").has_error);
    }
}
