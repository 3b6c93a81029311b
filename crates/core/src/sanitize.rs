//! Output sanitization.
//!
//! Vendor responses are arbitrary JSON trees; before a result is stored it is
//! passed through [`Sanitizer::sanitize`], which trims every string scalar
//! and strips mapping keys that look like PII, at every nesting depth.
//!
//! The transform is a pure function and idempotent: applying it twice yields
//! the same tree as applying it once.

use serde_json::{Map, Value as JsonValue};

/// Default PII key markers, matched case-insensitively as substrings of a
/// mapping key.
pub const DEFAULT_PII_MARKERS: &[&str] = &["email", "phone", "ssn", "password"];

/// Recursive JSON sanitizer.
#[derive(Debug, Clone)]
pub struct Sanitizer {
    pii_markers: Vec<String>,
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self::new(DEFAULT_PII_MARKERS.iter().map(|s| s.to_string()))
    }
}

impl Sanitizer {
    /// Build a sanitizer with a custom PII key set. Markers are lower-cased;
    /// a mapping key matches if its lower-cased form contains any marker.
    pub fn new(pii_markers: impl IntoIterator<Item = String>) -> Self {
        Self {
            pii_markers: pii_markers
                .into_iter()
                .map(|m| m.to_lowercase())
                .collect(),
        }
    }

    fn is_pii_key(&self, key: &str) -> bool {
        let key = key.to_lowercase();
        self.pii_markers.iter().any(|m| key.contains(m.as_str()))
    }

    /// Clean a JSON tree: trim string scalars, drop PII keys from mappings.
    pub fn sanitize(&self, value: &JsonValue) -> JsonValue {
        match value {
            JsonValue::String(s) => JsonValue::String(s.trim().to_string()),
            JsonValue::Array(items) => {
                JsonValue::Array(items.iter().map(|v| self.sanitize(v)).collect())
            }
            JsonValue::Object(map) => {
                let mut cleaned = Map::with_capacity(map.len());
                for (key, val) in map {
                    if self.is_pii_key(key) {
                        continue;
                    }
                    cleaned.insert(key.clone(), self.sanitize(val));
                }
                JsonValue::Object(cleaned)
            }
            scalar => scalar.clone(),
        }
    }
}
