// Built-in http plugin
//
// Builds a request from the resolved config, sends it with a shared
// reqwest client, evaluates the step's assertions against the response,
// and performs its own save extraction. Assertion failures carry the
// request and response snapshots in the error details so the persisted
// step record can render both.

use once_cell::sync::Lazy;
use reqwest::{Client, Method};
use serde_json::{json, Value};
use std::collections::BTreeMap;

use crate::protocol::{AssertionResult, PluginError, PluginInput, PluginOutput, UiPayload};
use crate::save::{apply_save_specs, navigate_json};

// Reusing the client keeps the connection pool warm across steps
static CLIENT: Lazy<Client> = Lazy::new(Client::new);

/// Execute one http step
pub async fn http_plugin(input: PluginInput) -> Result<PluginOutput, PluginError> {
    let request = HttpRequest::from_config(&input.config)?;
    let request_snapshot = request.snapshot();

    let mut builder = CLIENT.request(request.method.clone(), &request.url);
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = &request.body {
        builder = builder.json(body);
    }

    let response = builder.send().await.map_err(classify_send_error)?;

    let status = response.status().as_u16();
    let mut headers = BTreeMap::new();
    for (name, value) in response.headers() {
        if let Ok(value) = value.to_str() {
            headers.insert(name.to_string(), value.to_string());
        }
    }

    let text = response
        .text()
        .await
        .map_err(|e| PluginError::transient(format!("failed to read response body: {}", e)))?;
    let body: Option<Value> = serde_json::from_str(&text).ok();

    let response_snapshot = json!({
        "status": status,
        "headers": headers,
        "body": body.clone().unwrap_or(Value::String(text)),
    });

    let assertion_results = evaluate_assertions(&input.assertions, status, &headers, body.as_ref());
    let failed: Vec<&AssertionResult> =
        assertion_results.iter().filter(|r| !r.passed).collect();

    if !failed.is_empty() {
        let first = failed[0];
        let message = format!(
            "{} assertion(s) failed; first: [{}] {}",
            failed.len(),
            first.assertion_type,
            first.detail.as_deref().unwrap_or("failed"),
        );
        return Err(PluginError::assertion_failed(
            message,
            json!({
                "request": request_snapshot,
                "response": response_snapshot,
                "assertion_results": assertion_results,
            }),
        ));
    }

    let saved = apply_save_specs(&input.save, body.as_ref(), Some(&headers))
        .map_err(|e| {
            e.with_details(json!({
                "request": request_snapshot,
                "response": response_snapshot,
            }))
        })?
        .into_iter()
        .map(|extraction| (extraction.key, extraction.value))
        .collect();

    Ok(PluginOutput {
        saved,
        assertion_results,
        ui_payload: Some(UiPayload {
            request: Some(request_snapshot),
            response: Some(response_snapshot),
        }),
        ..Default::default()
    })
}

#[derive(Debug)]
struct HttpRequest {
    method: Method,
    url: String,
    headers: BTreeMap<String, String>,
    body: Option<Value>,
}

impl HttpRequest {
    fn from_config(config: &BTreeMap<String, Value>) -> Result<Self, PluginError> {
        let url = config
            .get("url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| PluginError::permanent("http: config requires a string 'url'"))?
            .to_string();

        let method_str = config
            .get("method")
            .and_then(|v| v.as_str())
            .unwrap_or("GET");
        let method = Method::from_bytes(method_str.to_uppercase().as_bytes())
            .map_err(|_| PluginError::permanent(format!("http: invalid method '{}'", method_str)))?;

        let mut headers = BTreeMap::new();
        if let Some(header_map) = config.get("headers").and_then(|v| v.as_object()) {
            for (name, value) in header_map {
                let value = value.as_str().ok_or_else(|| {
                    PluginError::permanent(format!("http: header '{}' must be a string", name))
                })?;
                headers.insert(name.clone(), value.to_string());
            }
        }

        Ok(Self {
            method,
            url,
            headers,
            body: config.get("body").cloned(),
        })
    }

    fn snapshot(&self) -> Value {
        json!({
            "method": self.method.as_str(),
            "url": self.url,
            "headers": self.headers,
            "body": self.body,
        })
    }
}

fn classify_send_error(error: reqwest::Error) -> PluginError {
    if error.is_builder() {
        PluginError::permanent(format!("http: invalid request: {}", error))
    } else {
        // Connection resets, DNS failures, and timeouts are worth retrying
        PluginError::transient(format!("http: request failed: {}", error))
    }
}

/// Evaluate the step's assertions against a response
///
/// Supported types: `status_code`, `json_path`, `header`. Each assertion
/// produces one indexed result; unknown types fail with a detail message
/// (validation rejects them up front, this is the runtime backstop).
pub fn evaluate_assertions(
    assertions: &[Value],
    status: u16,
    headers: &BTreeMap<String, String>,
    body: Option<&Value>,
) -> Vec<AssertionResult> {
    assertions
        .iter()
        .enumerate()
        .map(|(index, assertion)| {
            let assertion_type = assertion
                .get("type")
                .and_then(|t| t.as_str())
                .unwrap_or("unknown");

            let (passed, detail) = match assertion_type {
                "status_code" => check_status(assertion, status),
                "json_path" => check_json_path(assertion, body),
                "header" => check_header(assertion, headers),
                other => (false, format!("unsupported assertion type '{}'", other)),
            };

            AssertionResult {
                index,
                assertion_type: assertion_type.to_string(),
                passed,
                detail: Some(detail),
            }
        })
        .collect()
}

fn check_status(assertion: &Value, status: u16) -> (bool, String) {
    let expected = assertion.get("expected").and_then(|v| v.as_u64());
    match expected {
        Some(expected) if expected == status as u64 => {
            (true, format!("status is {}", status))
        }
        Some(expected) => (false, format!("expected status {}, got {}", expected, status)),
        None => (false, "status_code assertion requires numeric 'expected'".to_string()),
    }
}

fn check_json_path(assertion: &Value, body: Option<&Value>) -> (bool, String) {
    let Some(path) = assertion.get("path").and_then(|v| v.as_str()) else {
        return (false, "json_path assertion requires 'path'".to_string());
    };
    let Some(expected) = assertion.get("expected") else {
        return (false, "json_path assertion requires 'expected'".to_string());
    };
    let Some(body) = body else {
        return (false, "response body is not JSON".to_string());
    };

    match navigate_json(body, path) {
        Some(actual) if &actual == expected => (true, format!("{} matches", path)),
        Some(actual) => (
            false,
            format!("{}: expected {}, got {}", path, expected, actual),
        ),
        None => (false, format!("{}: not found in response body", path)),
    }
}

fn check_header(assertion: &Value, headers: &BTreeMap<String, String>) -> (bool, String) {
    let Some(name) = assertion.get("name").and_then(|v| v.as_str()) else {
        return (false, "header assertion requires 'name'".to_string());
    };
    let expected = assertion.get("expected").and_then(|v| v.as_str());

    let wanted = name.to_lowercase();
    let actual = headers
        .iter()
        .find(|(key, _)| key.to_lowercase() == wanted)
        .map(|(_, value)| value.as_str());

    match (actual, expected) {
        (Some(actual), Some(expected)) if actual == expected => {
            (true, format!("header '{}' matches", name))
        }
        (Some(actual), Some(expected)) => (
            false,
            format!("header '{}': expected '{}', got '{}'", name, expected, actual),
        ),
        (Some(_), None) => (true, format!("header '{}' present", name)),
        (None, _) => (false, format!("header '{}' not present", name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_from_config() {
        let config = BTreeMap::from([
            ("method".to_string(), json!("post")),
            ("url".to_string(), json!("https://x/users")),
            (
                "headers".to_string(),
                json!({"Authorization": "Bearer t"}),
            ),
            ("body".to_string(), json!({"name": "alice"})),
        ]);

        let request = HttpRequest::from_config(&config).unwrap();
        assert_eq!(request.method, Method::POST);
        assert_eq!(request.url, "https://x/users");
        assert_eq!(
            request.headers.get("Authorization").map(String::as_str),
            Some("Bearer t")
        );
        assert_eq!(request.body, Some(json!({"name": "alice"})));
    }

    #[test]
    fn test_method_defaults_to_get() {
        let config = BTreeMap::from([("url".to_string(), json!("https://x"))]);
        let request = HttpRequest::from_config(&config).unwrap();
        assert_eq!(request.method, Method::GET);
    }

    #[test]
    fn test_missing_url_is_permanent_error() {
        let err = HttpRequest::from_config(&BTreeMap::new()).unwrap_err();
        assert_eq!(err.kind, crate::protocol::PluginErrorKind::Permanent);
    }

    #[test]
    fn test_status_assertion() {
        let assertions = vec![json!({"type": "status_code", "expected": 200})];
        let results = evaluate_assertions(&assertions, 200, &BTreeMap::new(), None);
        assert!(results[0].passed);

        let results = evaluate_assertions(&assertions, 404, &BTreeMap::new(), None);
        assert!(!results[0].passed);
        assert!(results[0]
            .detail
            .as_ref()
            .unwrap()
            .contains("expected status 200, got 404"));
    }

    #[test]
    fn test_json_path_assertion() {
        let body = json!({"data": {"id": "42"}});
        let assertions = vec![json!({
            "type": "json_path",
            "path": ".data.id",
            "expected": "42"
        })];

        let results = evaluate_assertions(&assertions, 200, &BTreeMap::new(), Some(&body));
        assert!(results[0].passed);

        let assertions = vec![json!({
            "type": "json_path",
            "path": ".data.missing",
            "expected": "42"
        })];
        let results = evaluate_assertions(&assertions, 200, &BTreeMap::new(), Some(&body));
        assert!(!results[0].passed);
    }

    #[test]
    fn test_header_assertion() {
        let headers =
            BTreeMap::from([("content-type".to_string(), "application/json".to_string())]);

        // Presence only
        let assertions = vec![json!({"type": "header", "name": "Content-Type"})];
        let results = evaluate_assertions(&assertions, 200, &headers, None);
        assert!(results[0].passed);

        // Value match
        let assertions = vec![json!({
            "type": "header",
            "name": "Content-Type",
            "expected": "text/html"
        })];
        let results = evaluate_assertions(&assertions, 200, &headers, None);
        assert!(!results[0].passed);
    }

    #[test]
    fn test_results_are_indexed() {
        let assertions = vec![
            json!({"type": "status_code", "expected": 200}),
            json!({"type": "header", "name": "X-Missing"}),
        ];
        let results = evaluate_assertions(&assertions, 200, &BTreeMap::new(), None);
        assert_eq!(results[0].index, 0);
        assert!(results[0].passed);
        assert_eq!(results[1].index, 1);
        assert!(!results[1].passed);
    }

    #[test]
    fn test_unknown_assertion_type_fails() {
        let assertions = vec![json!({"type": "latency_under", "expected": 100})];
        let results = evaluate_assertions(&assertions, 200, &BTreeMap::new(), None);
        assert!(!results[0].passed);
        assert!(results[0].detail.as_ref().unwrap().contains("unsupported"));
    }
}
