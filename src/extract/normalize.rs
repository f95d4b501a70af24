/// Normalize line endings and join explicit line continuations.
///
/// A line ending in an odd number of backslashes continues on the next
/// line; the final backslash is dropped and the next line is appended
/// as written. An escaped backslash (`\\`) at end of line is not a
/// continuation.
pub fn normalize(text: &str) -> String {
    let text = text.replace("\r\n", "\n").replace('\r', "\n");
    let mut out: Vec<String> = Vec::new();
    let mut buf = String::new();
    let mut continuing = false;

    for line in text.split('\n') {
        let line = line.trim_end();
        buf.push_str(line);
        if trailing_backslashes(line) % 2 == 1 {
            buf.pop();
            continuing = true;
            continue;
        }
        out.push(std::mem::take(&mut buf));
        continuing = false;
    }
    if continuing || !buf.is_empty() {
        out.push(buf);
    }
    out.join("\n")
}

fn trailing_backslashes(line: &str) -> usize {
    line.chars().rev().take_while(|&c| c == '\\').count()
}
