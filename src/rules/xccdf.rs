//! Streaming XCCDF reader.
//!
//! Elements are matched by local name, so XCCDF 1.1, 1.2 and
//! namespace-free documents all read the same way. Only the parts the
//! runner needs are kept: per `Rule`, its `id` and `severity` attributes,
//! its own `title`, and the text of every `check-content` below it.

use std::sync::LazyLock;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use regex::Regex;
use serde::Serialize;

/// Which XCCDF namespace the root element declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SchemaVariant {
    Xccdf11,
    Xccdf12,
    /// No default or prefixed namespace on the root.
    Unqualified,
    Other,
}

#[derive(Debug, Default)]
pub(crate) struct RawRule {
    pub id: Option<String>,
    pub severity: Option<String>,
    pub title: String,
    pub guidance: Vec<String>,
}

#[derive(Debug)]
pub(crate) struct Document {
    pub schema: SchemaVariant,
    pub benchmark_id: Option<String>,
    pub rules: Vec<RawRule>,
}

enum Capture {
    Title(String),
    Content(String),
}

impl Capture {
    fn push(&mut self, text: &str) {
        match self {
            Capture::Title(s) | Capture::Content(s) => s.push_str(text),
        }
    }
}

/// Tags that end a line when they appear as real elements inside text.
const BLOCK_ELEMENTS: &[&str] = &["br", "p", "div", "li", "pre", "tr"];

pub(crate) fn parse(xml: &str) -> Result<Document, String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);

    let mut schema = SchemaVariant::Unqualified;
    let mut benchmark_id = None;
    let mut root_seen = false;
    let mut stack: Vec<String> = Vec::new();
    let mut rules = Vec::new();
    let mut current: Option<(RawRule, usize)> = None;
    let mut capture: Option<Capture> = None;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| format!("at byte {}: {e}", reader.error_position()))?;
        match event {
            Event::Start(e) => {
                let name = local_name(&e);
                if !root_seen {
                    root_seen = true;
                    schema = detect_schema(&e);
                    benchmark_id = attribute(&e, "id");
                }
                match name.as_str() {
                    "Rule" if current.is_none() => {
                        current = Some((rule_from(&e), stack.len()));
                    }
                    "title" if capture.is_none()
                        && current.as_ref().is_some_and(|(_, depth)| stack.len() == depth + 1) =>
                    {
                        capture = Some(Capture::Title(String::new()));
                    }
                    "check-content" if capture.is_none() && current.is_some() => {
                        capture = Some(Capture::Content(String::new()));
                    }
                    other if BLOCK_ELEMENTS.contains(&other) => {
                        if let Some(c) = capture.as_mut() {
                            c.push("\n");
                        }
                    }
                    _ => {}
                }
                stack.push(name);
            }
            Event::Empty(e) => {
                let name = local_name(&e);
                if !root_seen {
                    root_seen = true;
                    schema = detect_schema(&e);
                }
                if name == "Rule" && current.is_none() {
                    rules.push(rule_from(&e));
                } else if BLOCK_ELEMENTS.contains(&name.as_str())
                    && let Some(c) = capture.as_mut()
                {
                    c.push("\n");
                }
            }
            Event::Text(t) => {
                if let Some(c) = capture.as_mut() {
                    match t.unescape() {
                        Ok(text) => c.push(&text),
                        Err(_) => c.push(&lenient_unescape(&String::from_utf8_lossy(&t))),
                    }
                }
            }
            Event::CData(t) => {
                if let Some(c) = capture.as_mut() {
                    c.push(&String::from_utf8_lossy(&t.into_inner()));
                }
            }
            Event::End(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                stack.pop();
                match (name.as_str(), capture.take()) {
                    ("title", Some(Capture::Title(text))) => {
                        if let Some((rule, _)) = current.as_mut() {
                            rule.title = collapse_whitespace(&text);
                        }
                    }
                    ("check-content", Some(Capture::Content(text))) => {
                        if let Some((rule, _)) = current.as_mut() {
                            rule.guidance.push(strip_html(&text));
                        }
                    }
                    (_, still_open) => capture = still_open,
                }
                if name == "Rule"
                    && current.as_ref().is_some_and(|(_, depth)| *depth == stack.len())
                    && let Some((rule, _)) = current.take()
                {
                    rules.push(rule);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !root_seen {
        return Err("no root element".into());
    }
    if let Some(open) = stack.last() {
        return Err(format!("document ends inside <{open}>"));
    }
    Ok(Document {
        schema,
        benchmark_id,
        rules,
    })
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

fn attribute(e: &BytesStart<'_>, key: &str) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == key.as_bytes())
        .and_then(|a| a.unescape_value().ok().map(|v| v.trim().to_string()))
        .filter(|v| !v.is_empty())
}

fn rule_from(e: &BytesStart<'_>) -> RawRule {
    RawRule {
        id: attribute(e, "id"),
        severity: attribute(e, "severity"),
        ..RawRule::default()
    }
}

fn detect_schema(root: &BytesStart<'_>) -> SchemaVariant {
    let namespaces: Vec<String> = root
        .attributes()
        .flatten()
        .filter(|a| a.key.as_ref().starts_with(b"xmlns"))
        .filter_map(|a| a.unescape_value().ok().map(|v| v.into_owned()))
        .collect();
    if namespaces.iter().any(|ns| ns.contains("xccdf/1.2")) {
        SchemaVariant::Xccdf12
    } else if namespaces.iter().any(|ns| ns.contains("xccdf/1.1")) {
        SchemaVariant::Xccdf11
    } else if namespaces.is_empty() {
        SchemaVariant::Unqualified
    } else {
        SchemaVariant::Other
    }
}

static BLOCK_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<\s*/?\s*(br|p|div|li|pre|tr)(\s[^>]*)?/?\s*>")
        .expect("block tag regex must compile")
});

static INLINE_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<\s*/?\s*(span|b|i|u|em|strong|code|tt|ul|ol|a|font|table|tbody|td|th)(\s[^>]*)?/?\s*>")
        .expect("inline tag regex must compile")
});

static BLANK_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("blank run regex must compile"));

/// Drop inline HTML formatting from guidance text. Block tags become line
/// breaks; anything that is not a known formatting tag is left alone, so
/// `a <<EOF` or `x < y` survive.
pub(crate) fn strip_html(text: &str) -> String {
    let text = BLOCK_TAG.replace_all(text, "\n");
    let text = INLINE_TAG.replace_all(&text, "");
    let text = lenient_unescape(&text);
    BLANK_RUN.replace_all(text.trim(), "\n\n").into_owned()
}

/// Entity decoding for text the XML layer left escaped (double-escaped
/// HTML, or entities XML does not define).
fn lenient_unescape(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
