//! Compliance rules and the XCCDF loader.

mod xccdf;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::ExtractConfig;
use crate::extract::{Command, extract};

pub use xccdf::SchemaVariant;

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse {path}: {reason}")]
    Parse { path: PathBuf, reason: String },
    #[error("no XCCDF document given and no *.xml file in {dir}")]
    NotFound { dir: PathBuf },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    High,
    Medium,
    Low,
    Unknown,
}

impl Severity {
    pub const ALL: [Severity; 4] = [
        Severity::High,
        Severity::Medium,
        Severity::Low,
        Severity::Unknown,
    ];

    /// Case-insensitive; `informational`/`info` count as low.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "high" => Severity::High,
            "medium" => Severity::Medium,
            "low" | "info" | "informational" => Severity::Low,
            _ => Severity::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
            Severity::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Rule {
    pub id: String,
    pub title: String,
    pub severity: Severity,
    #[serde(skip)]
    pub guidance: String,
    pub commands: Vec<Command>,
}

impl Rule {
    /// Build a rule, extracting its commands from `guidance`.
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        severity: Severity,
        guidance: impl Into<String>,
        config: &ExtractConfig,
    ) -> Self {
        let guidance = guidance.into();
        let commands = extract(&guidance, config);
        Self {
            id: id.into(),
            title: title.into(),
            severity,
            guidance,
            commands,
        }
    }

    /// No command could be extracted; the rule needs a human.
    pub fn is_manual(&self) -> bool {
        self.commands.is_empty()
    }

    /// Case-insensitive substring match on id, title or guidance.
    pub fn matches_keyword(&self, keyword: &str) -> bool {
        let needle = keyword.to_lowercase();
        [&self.id, &self.title, &self.guidance]
            .iter()
            .any(|field| field.to_lowercase().contains(&needle))
    }
}

/// Every usable rule of one XCCDF document, in document order.
#[derive(Debug, Clone)]
pub struct RuleSet {
    pub source: PathBuf,
    pub schema: SchemaVariant,
    pub benchmark_id: Option<String>,
    pub rules: Vec<Rule>,
    /// Rules dropped for a missing or duplicate id.
    pub skipped: usize,
}

impl RuleSet {
    pub fn load(path: &Path, config: &ExtractConfig) -> Result<Self, LoadError> {
        let xml = std::fs::read_to_string(path).map_err(|source| LoadError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_xml(&xml, path, config)
    }

    pub fn from_xml(xml: &str, source: &Path, config: &ExtractConfig) -> Result<Self, LoadError> {
        let doc = xccdf::parse(xml).map_err(|reason| LoadError::Parse {
            path: source.to_path_buf(),
            reason,
        })?;

        let mut seen = HashSet::new();
        let mut rules = Vec::with_capacity(doc.rules.len());
        let mut skipped = 0;
        for (index, raw) in doc.rules.into_iter().enumerate() {
            let Some(id) = raw.id else {
                log::warn!("{}: rule #{} has no id; skipped", source.display(), index + 1);
                skipped += 1;
                continue;
            };
            if !seen.insert(id.clone()) {
                log::warn!("{}: duplicate rule id {id}; skipped", source.display());
                skipped += 1;
                continue;
            }
            let severity = raw.severity.as_deref().map_or(Severity::Unknown, Severity::parse);
            rules.push(Rule::new(id, raw.title, severity, raw.guidance.join("\n\n"), config));
        }

        log::info!(
            "loaded {} rule(s) from {} ({:?})",
            rules.len(),
            source.display(),
            doc.schema
        );
        Ok(Self {
            source: source.to_path_buf(),
            schema: doc.schema,
            benchmark_id: doc.benchmark_id,
            rules,
            skipped,
        })
    }
}

/// The first `*.xml` file in `dir`, by name.
pub fn discover(dir: &Path) -> Result<PathBuf, LoadError> {
    let entries = std::fs::read_dir(dir).map_err(|source| LoadError::Read {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut found: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("xml")))
        .collect();
    found.sort();
    found.into_iter().next().ok_or_else(|| LoadError::NotFound {
        dir: dir.to_path_buf(),
    })
}
