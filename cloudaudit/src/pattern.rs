//! Metric filter pattern matching
//!
//! CloudWatch Logs returns filter patterns with incidental whitespace
//! differences, so patterns are compared after collapsing whitespace runs
//! and trimming rather than character-for-character.

/// Collapse internal whitespace runs to single spaces and trim
pub fn normalize(pattern: &str) -> String {
  pattern.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Whether `actual` matches the `expected` filter pattern
///
/// Matches on normalized equality first. When `components` is non-empty, a
/// pattern containing every component also matches - this accepts alternate
/// but equivalent filter phrasings.
pub fn matches(expected: &str, actual: &str, components: &[&str]) -> bool {
  let actual = normalize(actual);
  if actual == normalize(expected) {
    return true;
  }

  !components.is_empty() && components.iter().all(|c| actual.contains(c))
}
