//! Restoration of original values from placeholders in upstream responses

use crate::mapping::PlaceholderMapping;
use regex::Regex;
use std::sync::OnceLock;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Restoration {
    pub text: String,
    /// Placeholder occurrences replaced with their original value.
    pub restored: usize,
    /// Placeholder-shaped tokens with no mapping entry that were not already
    /// in the source text, left verbatim.
    pub unmatched: usize,
}

impl Restoration {
    pub fn has_anomalies(&self) -> bool {
        self.unmatched > 0
    }
}

fn placeholder_shape() -> &'static Regex {
    static SHAPE: OnceLock<Regex> = OnceLock::new();
    SHAPE.get_or_init(|| {
        Regex::new(r"^<[A-Z][A-Z0-9_]*_[0-9]+>").expect("placeholder shape pattern is valid")
    })
}

/// Restores placeholders in `response` in a single left-to-right pass.
///
/// At each `<` the longest mapped placeholder that matches wins. Substituted
/// values are emitted and never rescanned, so an original value that happens
/// to contain placeholder text stays as it was.
pub fn deanonymize(response: &str, mapping: &PlaceholderMapping) -> Restoration {
    let (table, tokens) = mapping.lookup_table();
    let mut text = String::with_capacity(response.len());
    let mut restored = 0usize;
    let mut unmatched = 0usize;
    let mut pos = 0usize;

    while pos < response.len() {
        let rest = &response[pos..];

        if rest.starts_with('<') {
            if let Some(token) = tokens.iter().find(|t| rest.starts_with(**t)) {
                text.push_str(table[token]);
                pos += token.len();
                restored += 1;
                continue;
            }
            if let Some(m) = placeholder_shape().find(rest) {
                if !mapping.is_reserved(m.as_str()) {
                    debug!(placeholder = m.as_str(), "Placeholder without mapping entry left verbatim");
                    unmatched += 1;
                }
                text.push_str(m.as_str());
                pos += m.end();
                continue;
            }
        }

        let skip = usize::from(rest.starts_with('<'));
        let next = rest[skip..]
            .find('<')
            .map(|p| p + skip)
            .unwrap_or(rest.len());
        text.push_str(&rest[..next]);
        pos += next;
    }

    Restoration {
        text,
        restored,
        unmatched,
    }
}
