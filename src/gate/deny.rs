use regex::Regex;

use crate::config::ConfigError;

/// Compiled deny patterns. A match rejects a command in every mode unless
/// the deny override is set.
#[derive(Debug, Clone, Default)]
pub struct DenyList {
    patterns: Vec<Regex>,
}

impl DenyList {
    pub fn compile(patterns: &[String]) -> Result<Self, ConfigError> {
        let patterns = patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|source| ConfigError::InvalidDenyPattern {
                    pattern: p.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// The first pattern matching `text`, as written in the config.
    pub fn first_match(&self, text: &str) -> Option<&str> {
        self.patterns
            .iter()
            .find(|re| re.is_match(text))
            .map(|re| re.as_str())
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}
