//! Rule application.
//!
//! Pure transform from a raw payload to a canonical payload. Total over any
//! string→value mapping; never fails.

use serde_json::{Map, Value};

use leadforge_core::RuleSet;

/// Apply a source's confirmed rules to a raw payload.
///
/// Every payload key lands in exactly one place: under its rule's
/// `target_field` in the canonical map, or appended to `unmapped` in payload
/// order. When two rules produce the same target, the later payload key
/// wins (last-applied-wins).
pub fn apply_rules(
    rules: &RuleSet,
    payload: &Map<String, Value>,
) -> (Map<String, Value>, Vec<String>) {
    let mut canonical = Map::new();
    let mut unmapped = Vec::new();

    for (key, value) in payload {
        match rules.get(key) {
            Some(rule) => {
                canonical.insert(rule.target_field.clone(), value.clone());
            }
            None => unmapped.push(key.clone()),
        }
    }

    (canonical, unmapped)
}
