//! Output guardrail: blocked-phrase check on assistant transcripts.

use regex::Regex;
use tracing::warn;

#[derive(Debug, Clone, Default)]
pub struct Guardrail {
    patterns: Vec<Regex>,
}

impl Guardrail {
    /// Compile the configured patterns; invalid ones are logged and skipped.
    pub fn new(patterns: &[String]) -> Self {
        let patterns = patterns
            .iter()
            .filter_map(|p| match Regex::new(p) {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!(pattern = %p, error = %e, "Ignoring invalid guardrail pattern");
                    None
                }
            })
            .collect();
        Self { patterns }
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// The first pattern matching `text`, if any.
    pub fn check(&self, text: &str) -> Option<&str> {
        self.patterns
            .iter()
            .find(|re| re.is_match(text))
            .map(|re| re.as_str())
    }
}
