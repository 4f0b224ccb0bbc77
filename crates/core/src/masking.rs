use regex::Regex;
use thiserror::Error;

/// Redaction marker substituted for every matched span.
pub const REDACTION_MARKER: &str = "***";

/// Patterns applied when no custom list is configured: appointment-id style
/// tokens, digit runs of three or more, and email addresses.
pub fn default_patterns() -> Vec<String> {
    vec![
        r"(?i)\b(?:appt|appointment)\s*(?:id)?\s*[:#]?\s*[A-Za-z0-9\-]{3,}\b".to_owned(),
        r"\b\d{3,}\b".to_owned(),
        r"\b[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}\b".to_owned(),
    ]
}

#[derive(Debug, Error)]
pub enum MaskingError {
    #[error("invalid masking pattern `{pattern}`: {source}")]
    InvalidPattern { pattern: String, source: regex::Error },
    #[error("redaction marker must not be empty")]
    EmptyMarker,
}

/// Replaces spans matching any configured pattern with the redaction marker.
///
/// The masker is a side channel: it is applied to everything that gets logged
/// or displayed, never to the state fields routing decisions read.
#[derive(Clone, Debug)]
pub struct PiiMasker {
    patterns: Vec<Regex>,
    marker: String,
}

impl PiiMasker {
    pub fn new(patterns: &[String], marker: &str) -> Result<Self, MaskingError> {
        if marker.is_empty() {
            return Err(MaskingError::EmptyMarker);
        }
        let patterns = patterns
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|source| MaskingError::InvalidPattern {
                    pattern: pattern.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns, marker: marker.to_owned() })
    }

    pub fn with_defaults() -> Self {
        // The defaults are compile-checked by tests; construction cannot fail.
        Self::new(&default_patterns(), REDACTION_MARKER)
            .unwrap_or(Self { patterns: Vec::new(), marker: REDACTION_MARKER.to_owned() })
    }

    pub fn mask(&self, text: &str) -> String {
        let mut masked = text.to_owned();
        for pattern in &self.patterns {
            masked = pattern.replace_all(&masked, self.marker.as_str()).into_owned();
        }
        masked
    }
}
