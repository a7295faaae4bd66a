//! Key search over capture metadata.
//!
//! Upstream metadata arrives as arbitrarily nested JSON whose schema is not
//! pinned down, so lookups are a depth-first key search. The walk is
//! iterative over an explicit stack; the nesting depth of incoming
//! documents is not under our control.

use serde_json::Value;

/// Depth-first search for `key` in a list of metadata documents.
///
/// Any match found underneath a `special_key` object takes precedence over
/// matches found elsewhere; among plain matches the deepest-last one wins.
/// Returns an empty string when the key is absent. Scalar hits are rendered
/// with JSON formatting stripped for strings.
#[must_use]
pub fn search_metadata(metadata: &[Value], key: &str, special_key: Option<&str>) -> String {
    let mut plain_found: Option<String> = None;
    let mut special_found: Option<String> = None;

    // Stack of (value, is under special_key)
    let mut stack: Vec<(&Value, bool)> = metadata.iter().rev().map(|v| (v, false)).collect();

    while let Some((value, under_special)) = stack.pop() {
        match value {
            Value::Object(map) => {
                for (name, child) in map {
                    if name == key {
                        if let Some(text) = scalar_text(child) {
                            if under_special && special_found.is_none() {
                                special_found = Some(text);
                            } else if !under_special {
                                plain_found = Some(text);
                            }
                        }
                    }
                    let child_special =
                        under_special || special_key.is_some_and(|s| s == name.as_str());
                    stack.push((child, child_special));
                }
            }
            Value::Array(items) => {
                for item in items.iter().rev() {
                    stack.push((item, under_special));
                }
            }
            _ => {}
        }
    }

    special_found.or(plain_found).unwrap_or_default()
}

/// Return the first non-empty value found for any of the key terms, in term
/// order.
#[must_use]
pub fn find_metadata_value(metadata: &[Value], key_terms: &[&str]) -> String {
    for term in key_terms {
        let value = search_metadata(metadata, term, None);
        if !value.is_empty() {
            return value;
        }
    }
    String::new()
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_finds_nested_key() {
        let md = vec![json!({
            "gantry_variable_metadata": {
                "time_utc": "2018-05-22T12:02:00"
            }
        })];
        assert_eq!(
            search_metadata(&md, "time_utc", None),
            "2018-05-22T12:02:00"
        );
    }

    #[test]
    fn test_missing_key_is_empty() {
        let md = vec![json!({"a": {"b": 1}})];
        assert_eq!(search_metadata(&md, "timestamp", None), "");
    }

    #[test]
    fn test_special_key_match_wins() {
        let md = vec![json!({
            "season": "wrong season",
            "experiment_metadata": {
                "season": "Season 4"
            }
        })];
        assert_eq!(
            search_metadata(&md, "season", Some("experiment_metadata")),
            "Season 4"
        );
    }

    #[test]
    fn test_walks_arrays() {
        let md = vec![json!({
            "sensors": [
                {"name": "rgb"},
                {"name": "scanner3DTop", "epsg": 32612}
            ]
        })];
        assert_eq!(search_metadata(&md, "epsg", None), "32612");
    }

    #[test]
    fn test_find_metadata_value_term_order() {
        let md = vec![json!({"germplasm": "Sorghum"})];
        assert_eq!(
            find_metadata_value(&md, &["cultivar", "germplasm"]),
            "Sorghum"
        );
        assert_eq!(find_metadata_value(&md, &["cultivar"]), "");
    }
}
