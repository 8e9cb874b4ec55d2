//! Placeholder masking of detected entity spans
//!
//! Overlap policy: candidates are ranked by score (highest first), then by
//! earliest start, then by longest span, then by entity type name. Walking
//! that ranking, a candidate is accepted when it does not intersect any span
//! already accepted. Everything else is dropped without being masked or
//! mapped. The result does not depend on the order the detector emitted.

use crate::config::DetectedEntity;
use crate::error::{GatewayError, Result};
use crate::mapping::{MappingEntry, PlaceholderMapping};
use regex::Regex;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;
use tracing::debug;

fn placeholder_literal() -> &'static Regex {
    static LITERAL: OnceLock<Regex> = OnceLock::new();
    LITERAL.get_or_init(|| {
        Regex::new(r"<[A-Z][A-Z0-9_]*_[0-9]+>").expect("placeholder literal pattern is valid")
    })
}

#[derive(Debug, Clone)]
pub struct Anonymized {
    pub masked_text: String,
    pub mapping: PlaceholderMapping,
    /// Entities rejected by overlap resolution.
    pub dropped: usize,
}

/// Masks every accepted entity span in `text` with a `<TYPE_i>` placeholder.
///
/// Spans are character offsets. A span that is empty, reversed or outside
/// the text, or a score outside `[0, 1]`, fails the whole call with
/// [`GatewayError::Detection`]; nothing is partially masked.
pub fn anonymize(text: &str, entities: &[DetectedEntity]) -> Result<Anonymized> {
    let boundaries: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let char_len = boundaries.len() - 1;

    let mut invalid = 0usize;
    for entity in entities {
        let bad_span = entity.start >= entity.end || entity.end > char_len;
        let bad_score = !(0.0..=1.0).contains(&entity.score);
        if bad_span || bad_score || placeholder_type(&entity.entity_type).is_empty() {
            invalid += 1;
        }
    }
    if invalid > 0 {
        return Err(GatewayError::Detection(format!(
            "{} of {} detected entities have invalid spans, scores or types (text length {} chars)",
            invalid,
            entities.len(),
            char_len
        )));
    }

    let accepted = resolve_overlaps(entities);
    let dropped = entities.len() - accepted.len();

    for pair in accepted.windows(2) {
        if pair[0].end > pair[1].start {
            return Err(GatewayError::Anonymization(format!(
                "accepted spans [{}, {}) and [{}, {}) overlap",
                pair[0].start, pair[0].end, pair[1].start, pair[1].end
            )));
        }
    }

    let mut generator = PlaceholderGenerator::new(text);
    let mut masked_text = String::with_capacity(text.len());
    let mut mapping = PlaceholderMapping::new();
    let mut cursor = 0usize;

    // placeholder-shaped text the user typed is echoed back, not an anomaly
    for literal in placeholder_literal().find_iter(text) {
        mapping.reserve(literal.as_str());
    }

    for entity in &accepted {
        let byte_start = boundaries[entity.start];
        let byte_end = boundaries[entity.end];
        let placeholder = generator.next(&entity.entity_type);

        masked_text.push_str(&text[cursor..byte_start]);
        masked_text.push_str(&placeholder);

        mapping.push(MappingEntry {
            placeholder,
            entity_type: entity.entity_type.clone(),
            original: text[byte_start..byte_end].to_string(),
            source_span: (entity.start, entity.end),
        });
        cursor = byte_end;
    }
    masked_text.push_str(&text[cursor..]);

    debug!(
        detected = entities.len(),
        masked = mapping.len(),
        dropped,
        "Anonymized text"
    );

    Ok(Anonymized {
        masked_text,
        mapping,
        dropped,
    })
}

/// Picks the non-overlapping subset of `entities` and returns it sorted by
/// start offset.
pub fn resolve_overlaps(entities: &[DetectedEntity]) -> Vec<&DetectedEntity> {
    let mut ranked: Vec<&DetectedEntity> = entities.iter().collect();
    ranked.sort_by(|a, b| rank(a, b));

    let mut accepted: Vec<&DetectedEntity> = Vec::with_capacity(ranked.len());
    for candidate in ranked {
        if accepted.iter().all(|kept| !intersects(kept, candidate)) {
            accepted.push(candidate);
        } else {
            debug!(
                entity_type = %candidate.entity_type,
                start = candidate.start,
                end = candidate.end,
                "Dropped overlapping entity"
            );
        }
    }

    accepted.sort_by_key(|e| e.start);
    accepted
}

fn rank(a: &DetectedEntity, b: &DetectedEntity) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.start.cmp(&b.start))
        .then_with(|| b.end.saturating_sub(b.start).cmp(&a.end.saturating_sub(a.start)))
        .then_with(|| a.entity_type.cmp(&b.entity_type))
}

fn intersects(a: &DetectedEntity, b: &DetectedEntity) -> bool {
    a.start < b.end && b.start < a.end
}

/// Upper-cases the type tag and replaces anything outside `[A-Z0-9_]` so the
/// token stays a single well-formed `<...>` word.
fn placeholder_type(entity_type: &str) -> String {
    entity_type
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Per-type zero-based counters. Skips any token that already occurs in the
/// source text so restoration can never confuse it with user text.
struct PlaceholderGenerator<'a> {
    source: &'a str,
    counters: HashMap<String, usize>,
    issued: HashSet<String>,
}

impl<'a> PlaceholderGenerator<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            counters: HashMap::new(),
            issued: HashSet::new(),
        }
    }

    fn next(&mut self, entity_type: &str) -> String {
        let tag = placeholder_type(entity_type);
        let counter = self.counters.entry(tag.clone()).or_insert(0);

        loop {
            let candidate = format!("<{}_{}>", tag, counter);
            *counter += 1;
            if self.source.contains(&candidate) || self.issued.contains(&candidate) {
                debug!(placeholder = %candidate, "Skipping placeholder that collides with source text");
                continue;
            }
            self.issued.insert(candidate.clone());
            return candidate;
        }
    }
}
