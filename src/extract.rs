//! Dotted-path parameter extraction over webhook payloads.
//!
//! Payloads from webhook senders are untrusted and irregularly shaped, so every
//! lookup here is total: a path that doesn't resolve yields `None`, never a panic.

use serde_json::Value;

/// Resolves a dot separated `path` (e.g. `head_commit.id` or `commits.0.id`)
/// against `tree`.
///
/// Sequences are indexed by non-negative integer segments, mappings by exact
/// key. A segment that is not a valid index, an index past the end, a missing
/// key, or a segment left over once a scalar is reached all yield `None`.
pub fn extract<'a>(path: &str, tree: &'a Value) -> Option<&'a Value> {
    let (segment, rest) = match path.split_once('.') {
        Some((segment, rest)) => (segment, Some(rest)),
        None => (path, None),
    };

    let child = match tree {
        Value::Array(items) => items.get(parse_index(segment)?)?,
        Value::Object(map) => map.get(segment)?,
        _ => return None,
    };

    match rest {
        Some(rest) => extract(rest, child),
        None => Some(child),
    }
}

/// Same as [`extract`], formatted as command argument text.
pub fn extract_as_string(path: &str, tree: &Value) -> Option<String> {
    extract(path, tree).map(value_to_string)
}

/// Textual form of an extracted value.
///
/// Strings are used verbatim, numbers keep the exact token they were parsed
/// from, null becomes an empty string and nested values are rendered as
/// compact JSON.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

fn parse_index(segment: &str) -> Option<usize> {
    // `usize::from_str` accepts a leading '+', indices must be plain digits
    if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    segment.parse().ok()
}

/// The per-request values an argument can be extracted from.
#[derive(Debug, Clone, Copy)]
pub struct Sources<'a> {
    pub headers: &'a Value,
    pub query: &'a Value,
    pub payload: Option<&'a Value>,
}
