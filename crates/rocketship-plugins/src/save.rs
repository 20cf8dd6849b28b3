// Save extraction
// Pulls values out of a plugin response into runtime state according to
// the step's save specs. Runs in the interpreter after the plugin has
// produced its response; plugins that extract for themselves return
// `saved` directly and skip this path.

use rocketship_dsl::SaveSpec;
use rocketship_durable::deterministic_json;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::protocol::PluginError;

/// One extracted value with its provenance
#[derive(Debug, Clone, PartialEq)]
pub struct SavedExtraction {
    pub key: String,
    pub value: String,
    /// "json_path" or "header"
    pub extractor: &'static str,
}

/// Stringify a JSON value the way runtime state stores it: strings bare,
/// everything else as deterministic JSON
pub fn stringify_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => deterministic_json(other),
    }
}

/// Apply save specs against a response body and headers
///
/// A missing value fails the step unless the spec is marked
/// `required: false`, in which case the entry is skipped.
pub fn apply_save_specs(
    specs: &[SaveSpec],
    body: Option<&Value>,
    headers: Option<&BTreeMap<String, String>>,
) -> Result<Vec<SavedExtraction>, PluginError> {
    let mut out = Vec::with_capacity(specs.len());

    for spec in specs {
        if let Some(path) = &spec.json_path {
            match body.and_then(|b| navigate_json(b, path)) {
                Some(value) if !value.is_null() => out.push(SavedExtraction {
                    key: spec.save_as.clone(),
                    value: stringify_value(&value),
                    extractor: "json_path",
                }),
                _ if !spec.required => continue,
                _ => {
                    return Err(PluginError::permanent(format!(
                        "save '{}': json_path '{}' not found in response",
                        spec.save_as, path
                    )))
                }
            }
        } else if let Some(header) = &spec.header {
            match headers.and_then(|h| lookup_header(h, header)) {
                Some(value) => out.push(SavedExtraction {
                    key: spec.save_as.clone(),
                    value,
                    extractor: "header",
                }),
                None if !spec.required => continue,
                None => {
                    return Err(PluginError::permanent(format!(
                        "save '{}': header '{}' not present in response",
                        spec.save_as, header
                    )))
                }
            }
        }
    }

    Ok(out)
}

/// Header lookup is case-insensitive
fn lookup_header(headers: &BTreeMap<String, String>, name: &str) -> Option<String> {
    let wanted = name.to_lowercase();
    headers
        .iter()
        .find(|(key, _)| key.to_lowercase() == wanted)
        .map(|(_, value)| value.clone())
}

/// Navigate a JSON value with a dotted path
///
/// Accepts `.id`, `id`, `$.data.token`, and `items[0].name` forms.
pub fn navigate_json(value: &Value, path: &str) -> Option<Value> {
    let clean = path
        .strip_prefix("$.")
        .or_else(|| path.strip_prefix('.'))
        .unwrap_or(path);

    if clean.is_empty() {
        return Some(value.clone());
    }

    let mut current = value.clone();
    for segment in split_path(clean) {
        current = navigate_segment(&current, &segment)?;
    }
    Some(current)
}

/// Split "users[0].name" into ["users", "[0]", "name"]
fn split_path(path: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();

    let mut chars = path.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '.' => {
                if !current.is_empty() {
                    segments.push(std::mem::take(&mut current));
                }
            }
            '[' => {
                if !current.is_empty() {
                    segments.push(std::mem::take(&mut current));
                }
                current.push('[');
                for next in chars.by_ref() {
                    current.push(next);
                    if next == ']' {
                        break;
                    }
                }
                segments.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }

    if !current.is_empty() {
        segments.push(current);
    }

    segments
}

fn navigate_segment(value: &Value, segment: &str) -> Option<Value> {
    if let Some(index_str) = segment.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
        let index: usize = index_str.parse().ok()?;
        return value.as_array()?.get(index).cloned();
    }

    value.as_object()?.get(segment).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(json_path: Option<&str>, header: Option<&str>, save_as: &str) -> SaveSpec {
        SaveSpec {
            json_path: json_path.map(String::from),
            header: header.map(String::from),
            save_as: save_as.to_string(),
            required: true,
        }
    }

    #[test]
    fn test_navigate_simple_and_nested() {
        let body = json!({"id": "42", "data": {"token": "abc"}});
        assert_eq!(navigate_json(&body, ".id"), Some(json!("42")));
        assert_eq!(navigate_json(&body, "id"), Some(json!("42")));
        assert_eq!(navigate_json(&body, "$.data.token"), Some(json!("abc")));
        assert_eq!(navigate_json(&body, ".missing"), None);
    }

    #[test]
    fn test_navigate_array_index() {
        let body = json!({"users": [{"id": 1}, {"id": 2}]});
        assert_eq!(navigate_json(&body, "users[1].id"), Some(json!(2)));
        assert_eq!(navigate_json(&body, "users[5].id"), None);
    }

    #[test]
    fn test_extract_json_path_value() {
        let body = json!({"id": "42"});
        let saved = apply_save_specs(&[spec(Some(".id"), None, "uid")], Some(&body), None).unwrap();
        assert_eq!(
            saved,
            vec![SavedExtraction {
                key: "uid".to_string(),
                value: "42".to_string(),
                extractor: "json_path",
            }]
        );
    }

    #[test]
    fn test_structured_values_stringified_deterministically() {
        let body = json!({"user": {"b": 2, "a": 1}});
        let saved =
            apply_save_specs(&[spec(Some(".user"), None, "user")], Some(&body), None).unwrap();
        assert_eq!(saved[0].value, r#"{"a":1,"b":2}"#);
    }

    #[test]
    fn test_header_lookup_case_insensitive() {
        let headers = BTreeMap::from([("x-request-id".to_string(), "req-1".to_string())]);
        let saved = apply_save_specs(
            &[spec(None, Some("X-Request-Id"), "rid")],
            None,
            Some(&headers),
        )
        .unwrap();
        assert_eq!(saved[0].value, "req-1");
        assert_eq!(saved[0].extractor, "header");
    }

    #[test]
    fn test_missing_required_value_fails() {
        let body = json!({"id": "42"});
        let err =
            apply_save_specs(&[spec(Some(".nope"), None, "x")], Some(&body), None).unwrap_err();
        assert!(err.message.contains("json_path '.nope' not found"));
    }

    #[test]
    fn test_missing_optional_value_skipped() {
        let body = json!({"id": "42"});
        let mut optional = spec(Some(".nope"), None, "x");
        optional.required = false;

        let saved = apply_save_specs(&[optional], Some(&body), None).unwrap();
        assert!(saved.is_empty());
    }

    #[test]
    fn test_null_value_counts_as_missing() {
        let body = json!({"token": null});
        let err =
            apply_save_specs(&[spec(Some(".token"), None, "t")], Some(&body), None).unwrap_err();
        assert!(err.message.contains("not found"));
    }
}
