//! Selector paths over JSON documents.
//!
//! Selectors use the pact path syntax: `$` is the root, `.name` selects an
//! object field, `[n]` an array element and `['odd name']` a field whose name
//! is not a plain identifier.

use serde_json::Value;

/// One step of a parsed selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    /// Object field
    Field(String),
    /// Array element
    Index(usize),
}

/// Parse a selector into segments. Returns `None` for malformed input.
#[must_use]
pub fn parse_selector(selector: &str) -> Option<Vec<PathSegment>> {
    let mut rest = selector.strip_prefix('$')?;
    let mut segments = Vec::new();

    while !rest.is_empty() {
        if let Some(tail) = rest.strip_prefix('.') {
            let end = tail.find(['.', '[']).unwrap_or(tail.len());
            if end == 0 {
                return None;
            }
            segments.push(PathSegment::Field(tail[..end].to_string()));
            rest = &tail[end..];
        } else if let Some(tail) = rest.strip_prefix("['") {
            let end = tail.find("']")?;
            segments.push(PathSegment::Field(tail[..end].to_string()));
            rest = &tail[end + 2..];
        } else if let Some(tail) = rest.strip_prefix('[') {
            let end = tail.find(']')?;
            segments.push(PathSegment::Index(tail[..end].parse().ok()?));
            rest = &tail[end + 1..];
        } else {
            return None;
        }
    }
    Some(segments)
}

/// Value addressed by `segments` under `root`.
#[must_use]
pub fn resolve<'a>(root: &'a Value, segments: &[PathSegment]) -> Option<&'a Value> {
    segments.iter().try_fold(root, |current, segment| match segment {
        PathSegment::Field(name) => current.as_object()?.get(name),
        PathSegment::Index(index) => current.as_array()?.get(*index),
    })
}

/// Render segments back into selector syntax.
#[must_use]
pub fn format_selector(segments: &[PathSegment]) -> String {
    segments
        .iter()
        .fold(String::from("$"), |selector, segment| match segment {
            PathSegment::Field(name) => child_field(&selector, name),
            PathSegment::Index(index) => child_index(&selector, *index),
        })
}

/// Selector of field `name` under `parent`.
#[must_use]
pub fn child_field(parent: &str, name: &str) -> String {
    if !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-') {
        format!("{parent}.{name}")
    } else {
        format!("{parent}['{name}']")
    }
}

/// Selector of element `index` under `parent`.
#[must_use]
pub fn child_index(parent: &str, index: usize) -> String {
    format!("{parent}[{index}]")
}
