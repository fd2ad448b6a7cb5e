//! Turns the model's reply into the display-ready [`AnalysisResult`].
//!
//! The reply is an untrusted external document: the service is asked, not
//! forced, to match the declared schema. Every field is therefore
//! extracted explicitly with a fallback instead of assuming shape.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

/// Shown when the reply carries no usable location.
pub const LOCATION_FALLBACK: &str = "Location could not be determined.";

/// Shown when the reply carries no confidence value.
pub const CONFIDENCE_FALLBACK: &str = "Not specified";

/// Evidence grouped by category, in reply order. Categories with no
/// evidence are never present. A duplicate category name overwrites the
/// earlier value but keeps its first-seen position; that is an observed
/// edge case of the reply format, not a dedup guarantee.
pub type Justification = IndexMap<String, Vec<String>>;

/// A citation attached to a result. Structured-output replies carry none;
/// the field is kept so grounded replies can be rendered without a wire
/// change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub uri: String,
    pub title: String,
}

impl Source {
    /// Title for display, falling back to the hostname when the service
    /// returned an untitled source.
    #[must_use]
    pub fn display_title(&self) -> String {
        if !self.title.is_empty() {
            return self.title.clone();
        }

        Url::parse(&self.uri)
            .ok()
            .and_then(|url| url.host_str().map(ToString::to_string))
            .unwrap_or_else(|| self.uri.clone())
    }
}

/// The single artifact the UI renders. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub location: String,
    pub confidence: String,
    pub justification: Justification,
    pub sources: Vec<Source>,
}

impl AnalysisResult {
    /// A reply that produced neither a location nor any justification is
    /// treated as no result at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.location == LOCATION_FALLBACK && self.justification.is_empty()
    }
}

/// Normalizes a raw reply document. Pure; never fails — missing or
/// mistyped fields land on their fallbacks.
#[must_use]
pub fn normalize(raw: &Value) -> AnalysisResult {
    let location = match raw.get("location").and_then(Value::as_str) {
        Some(value) if !value.is_empty() => value.to_string(),
        _ => LOCATION_FALLBACK.to_string(),
    };

    let confidence = match raw.get("confidence").and_then(Value::as_str) {
        Some(value) if !value.is_empty() => value.to_string(),
        _ => CONFIDENCE_FALLBACK.to_string(),
    };

    let mut justification = Justification::new();
    if let Some(entries) = raw.get("justification").and_then(Value::as_array) {
        for entry in entries {
            let Some(category) = entry.get("category").and_then(Value::as_str) else {
                continue;
            };
            if category.is_empty() {
                continue;
            }

            let details: Vec<String> = entry
                .get("details")
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(Value::as_str)
                        .map(ToString::to_string)
                        .collect()
                })
                .unwrap_or_default();

            if details.is_empty() {
                continue;
            }

            justification.insert(category.to_string(), details);
        }
    }

    AnalysisResult {
        location,
        confidence,
        justification,
        // Citations are unavailable under schema-constrained generation.
        sources: Vec::new(),
    }
}
