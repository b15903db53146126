//! Asserts that one JSON value is contained in another.
//!
//! Events read back out of Splunk carry many more fields than a check cares about (timestamps, hosts,
//! GUIDs), so checks are written as a partial "mask" of the fields they expect. [extract_subset] projects
//! the actual value down to the shape of that mask, and the projection is then compared for equality
//! against the mask.

use serde_json::{Map, Value};
use similar::TextDiff;
use thiserror::Error;

/// Returned by [assert_json_contains] when the actual value does not contain the expected one.
#[derive(Debug, Error)]
#[error("{message}\n{diff}")]
pub struct JsonMismatch {
    /// The caller-supplied description of the check.
    pub message: String,

    /// The projection of the actual value that was compared against the expected value.
    pub subset: Value,

    /// A line diff between the pretty-printed expected value and [JsonMismatch::subset].
    pub diff: String,
}

/// Projects `source` down to the keys and positions present in `mask`.
///
/// * Objects keep only the keys that are in `mask`, recursing into each. Keys in `mask` that `source`
///   lacks are dropped, so the later comparison fails on them.
/// * Arrays are paired positionally, recursing into each pair. Positions in `mask` that `source` lacks
///   are dropped. Positions past the end of `mask` are unconstrained and left out.
/// * Anything else (scalars, or mismatched types) is returned as-is, for the comparison to judge.
///
/// Neither input is modified.
pub fn extract_subset(source: &Value, mask: &Value) -> Value {
    match (mask, source) {
        (Value::Object(mask), Value::Object(source)) => {
            let subset: Map<String, Value> = mask
                .iter()
                .filter_map(|(key, mask_value)| {
                    source
                        .get(key)
                        .map(|source_value| (key.clone(), extract_subset(source_value, mask_value)))
                })
                .collect();
            Value::Object(subset)
        }
        (Value::Array(mask), Value::Array(source)) => Value::Array(
            mask.iter()
                .zip(source.iter())
                .map(|(mask_value, source_value)| extract_subset(source_value, mask_value))
                .collect(),
        ),
        _ => source.clone(),
    }
}

/// Asserts that `expected` is a subset of `actual`, per [extract_subset].
///
/// Parameters:
/// * `expected`: the mask of fields that must be present, with their exact values
/// * `actual`: the value to check
/// * `message`: a description of the check, for the failure report
///
/// Returns a [JsonMismatch] with a diff of the differences, if the check fails.
pub fn assert_json_contains(
    expected: &Value,
    actual: &Value,
    message: &str,
) -> Result<(), JsonMismatch> {
    let subset = extract_subset(actual, expected);
    if subset == *expected {
        return Ok(());
    }

    let expected_text = to_pretty_string(expected);
    let subset_text = to_pretty_string(&subset);
    let diff = TextDiff::from_lines(&expected_text, &subset_text)
        .unified_diff()
        .header("expected", "actual")
        .to_string();
    Err(JsonMismatch {
        message: message.to_owned(),
        subset,
        diff,
    })
}

/// Pretty-prints the specified JSON, one field per line, so that diffs are line-oriented.
fn to_pretty_string(value: &Value) -> String {
    // Serializing a `Value` can't fail: its map keys are always strings.
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
