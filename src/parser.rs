//! Text extraction helpers for scraped pages and probe output

use crate::error::ConfigError;
use regex::{Regex, RegexBuilder};

/// Pulls one value (the first capture group) out of a page body.
///
/// Patterns come from the config file, so they are validated when the
/// extractor is built rather than when a page arrives.
#[derive(Debug, Clone)]
pub struct Extractor {
    re: Regex,
}

impl Extractor {
    /// Ordinary search; `.` does not cross line boundaries
    pub fn new(key: &str, pattern: &str) -> Result<Self, ConfigError> {
        Self::build(key, pattern, false)
    }

    /// `.` also matches newlines, so a match may span several lines of HTML
    pub fn spanning(key: &str, pattern: &str) -> Result<Self, ConfigError> {
        Self::build(key, pattern, true)
    }

    fn build(key: &str, pattern: &str, dot_all: bool) -> Result<Self, ConfigError> {
        let re = RegexBuilder::new(pattern)
            .dot_matches_new_line(dot_all)
            .build()
            .map_err(|source| ConfigError::Regex {
                key: key.to_string(),
                source,
            })?;

        // Group 0 is the whole match; we need at least one explicit group
        if re.captures_len() < 2 {
            return Err(ConfigError::invalid(key, "pattern needs a capture group"));
        }

        Ok(Self { re })
    }

    pub fn extract(&self, body: &str) -> Option<String> {
        self.re
            .captures(body)?
            .get(1)
            .map(|m| m.as_str().to_string())
    }
}

/// Parse `key:value, 'key2' : "value2"` into ordered pairs.
///
/// Items without a colon are ignored; quotes and spaces around keys and
/// values are trimmed.
pub fn parse_form_fields(list: &str) -> Vec<(String, String)> {
    const TRIM: &[char] = &[' ', '\'', '"'];

    list.split(',')
        .filter_map(|item| item.split_once(':'))
        .map(|(key, value)| {
            (
                key.trim_matches(TRIM).to_string(),
                value.trim_matches(TRIM).to_string(),
            )
        })
        .filter(|(key, _)| !key.is_empty())
        .collect()
}

/// Round-trip time in milliseconds from `ping` output (`time=12.3 ms`, or `time<1ms` on Windows)
pub fn parse_ping_time(output: &str) -> Option<f64> {
    Regex::new(r"time[=<]\s*([\d.]+)")
        .ok()?
        .captures(output)?
        .get(1)?
        .as_str()
        .parse()
        .ok()
}
