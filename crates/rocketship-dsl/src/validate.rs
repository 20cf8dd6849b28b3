// Suite validation
// Collects every violation instead of stopping at the first, so authors
// can fix a suite in one pass.

use crate::duration::parse_duration;
use crate::suite::{SaveSpec, Step, Suite};
use std::collections::HashSet;

/// Catalog of registered plugins, queried during validation
///
/// Implemented by the plugin registry; the DSL crate only needs name
/// membership and the assertion types each plugin supports.
pub trait PluginCatalog {
    fn contains(&self, plugin: &str) -> bool;

    /// Assertion types the plugin evaluates; `None` means the plugin
    /// accepts any (or is unknown, which `contains` already reports)
    fn assertion_types(&self, plugin: &str) -> Option<Vec<String>>;
}

/// A single validation violation
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("{location}: plugin '{plugin}' is not registered")]
    UnknownPlugin { location: String, plugin: String },

    #[error("{location}: step name is empty")]
    EmptyStepName { location: String },

    #[error("test '{name}' is defined more than once")]
    DuplicateTestName { name: String },

    #[error("test name is empty")]
    EmptyTestName,

    #[error("{location}: retry.maximum_attempts must be at least 1")]
    RetryZeroAttempts { location: String },

    #[error("{location}: retry.{field} is not a valid duration: {reason}")]
    RetryBadDuration {
        location: String,
        field: String,
        reason: String,
    },

    #[error("{location}: retry.initial_interval exceeds retry.maximum_interval")]
    RetryIntervalInverted { location: String },

    #[error("{location}: retry.backoff_coefficient must be positive")]
    RetryBadCoefficient { location: String },

    #[error("{location}: timeout is not a valid duration: {reason}")]
    BadTimeout { location: String, reason: String },

    #[error("{location}: save entry '{save_as}' must set exactly one of json_path or header")]
    SaveSelectorCount { location: String, save_as: String },

    #[error("{location}: save target '{save_as}' is set more than once")]
    DuplicateSaveTarget { location: String, save_as: String },

    #[error("{location}: assertion {index} has no 'type' field")]
    AssertionMissingType { location: String, index: usize },

    #[error("{location}: assertion type '{assertion_type}' is not supported by plugin '{plugin}'")]
    UnknownAssertionType {
        location: String,
        assertion_type: String,
        plugin: String,
    },
}

/// All violations found in one validation pass
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationErrors {
    pub errors: Vec<ValidationError>,
}

impl std::error::Error for ValidationErrors {}

impl std::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "suite validation failed with {} error(s):", self.errors.len())?;
        for error in &self.errors {
            writeln!(f, "  - {}", error)?;
        }
        Ok(())
    }
}

/// Validate a parsed suite against the plugin catalog
///
/// Returns `Ok(())` only when no violation was found; otherwise every
/// violation is listed in the error.
pub fn validate(suite: &Suite, catalog: &dyn PluginCatalog) -> Result<(), ValidationErrors> {
    let mut errors = Vec::new();

    let mut seen_tests = HashSet::new();
    for test in &suite.tests {
        if test.name.trim().is_empty() {
            errors.push(ValidationError::EmptyTestName);
        } else if !seen_tests.insert(test.name.as_str()) {
            errors.push(ValidationError::DuplicateTestName {
                name: test.name.clone(),
            });
        }
    }

    for (step, location) in all_steps(suite) {
        validate_step(step, &location, catalog, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ValidationErrors { errors })
    }
}

/// Every step in the suite paired with a human-readable location
fn all_steps(suite: &Suite) -> Vec<(&Step, String)> {
    let mut out = Vec::new();

    for (i, step) in suite.init.iter().enumerate() {
        out.push((step, format!("suite init[{}]", i)));
    }
    if let Some(cleanup) = &suite.cleanup {
        for (i, step) in cleanup.on_failure.iter().enumerate() {
            out.push((step, format!("suite cleanup.on_failure[{}]", i)));
        }
        for (i, step) in cleanup.always.iter().enumerate() {
            out.push((step, format!("suite cleanup.always[{}]", i)));
        }
    }

    for test in &suite.tests {
        for (i, step) in test.init.iter().enumerate() {
            out.push((step, format!("test '{}' init[{}]", test.name, i)));
        }
        for (i, step) in test.steps.iter().enumerate() {
            out.push((step, format!("test '{}' steps[{}]", test.name, i)));
        }
        if let Some(cleanup) = &test.cleanup {
            for (i, step) in cleanup.on_failure.iter().enumerate() {
                out.push((step, format!("test '{}' cleanup.on_failure[{}]", test.name, i)));
            }
            for (i, step) in cleanup.always.iter().enumerate() {
                out.push((step, format!("test '{}' cleanup.always[{}]", test.name, i)));
            }
        }
    }

    out
}

fn validate_step(
    step: &Step,
    location: &str,
    catalog: &dyn PluginCatalog,
    errors: &mut Vec<ValidationError>,
) {
    if step.name.trim().is_empty() {
        errors.push(ValidationError::EmptyStepName {
            location: location.to_string(),
        });
    }

    if !catalog.contains(&step.plugin) {
        errors.push(ValidationError::UnknownPlugin {
            location: location.to_string(),
            plugin: step.plugin.clone(),
        });
    }

    if let Some(retry) = &step.retry {
        if retry.maximum_attempts == Some(0) {
            errors.push(ValidationError::RetryZeroAttempts {
                location: location.to_string(),
            });
        }
        if let Some(coeff) = retry.backoff_coefficient {
            if coeff <= 0.0 {
                errors.push(ValidationError::RetryBadCoefficient {
                    location: location.to_string(),
                });
            }
        }

        let initial = check_retry_duration(
            retry.initial_interval.as_deref(),
            "initial_interval",
            location,
            errors,
        );
        let maximum = check_retry_duration(
            retry.maximum_interval.as_deref(),
            "maximum_interval",
            location,
            errors,
        );
        if let (Some(initial), Some(maximum)) = (initial, maximum) {
            if initial > maximum {
                errors.push(ValidationError::RetryIntervalInverted {
                    location: location.to_string(),
                });
            }
        }
    }

    if let Some(timeout) = &step.timeout {
        if let Err(err) = parse_duration(timeout) {
            errors.push(ValidationError::BadTimeout {
                location: location.to_string(),
                reason: err.reason,
            });
        }
    }

    validate_saves(&step.save, location, errors);
    validate_assertions(step, location, catalog, errors);
}

fn check_retry_duration(
    value: Option<&str>,
    field: &str,
    location: &str,
    errors: &mut Vec<ValidationError>,
) -> Option<std::time::Duration> {
    let raw = value?;
    match parse_duration(raw) {
        Ok(duration) => Some(duration),
        Err(err) => {
            errors.push(ValidationError::RetryBadDuration {
                location: location.to_string(),
                field: field.to_string(),
                reason: err.reason,
            });
            None
        }
    }
}

fn validate_saves(saves: &[SaveSpec], location: &str, errors: &mut Vec<ValidationError>) {
    let mut seen = HashSet::new();
    for save in saves {
        let selectors = save.json_path.is_some() as u8 + save.header.is_some() as u8;
        if selectors != 1 {
            errors.push(ValidationError::SaveSelectorCount {
                location: location.to_string(),
                save_as: save.save_as.clone(),
            });
        }
        if !seen.insert(save.save_as.as_str()) {
            errors.push(ValidationError::DuplicateSaveTarget {
                location: location.to_string(),
                save_as: save.save_as.clone(),
            });
        }
    }
}

fn validate_assertions(
    step: &Step,
    location: &str,
    catalog: &dyn PluginCatalog,
    errors: &mut Vec<ValidationError>,
) {
    let supported = catalog.assertion_types(&step.plugin);

    for (index, assertion) in step.assertions.iter().enumerate() {
        let assertion_type = assertion.get("type").and_then(|t| t.as_str());
        let Some(assertion_type) = assertion_type else {
            errors.push(ValidationError::AssertionMissingType {
                location: location.to_string(),
                index,
            });
            continue;
        };

        if let Some(supported) = &supported {
            if !supported.iter().any(|t| t == assertion_type) {
                errors.push(ValidationError::UnknownAssertionType {
                    location: location.to_string(),
                    assertion_type: assertion_type.to_string(),
                    plugin: step.plugin.clone(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeCatalog;

    impl PluginCatalog for FakeCatalog {
        fn contains(&self, plugin: &str) -> bool {
            matches!(plugin, "http" | "delay" | "log")
        }

        fn assertion_types(&self, plugin: &str) -> Option<Vec<String>> {
            match plugin {
                "http" => Some(vec![
                    "status_code".to_string(),
                    "json_path".to_string(),
                    "header".to_string(),
                ]),
                _ => None,
            }
        }
    }

    fn parse(yaml: &str) -> Suite {
        Suite::from_yaml(yaml.as_bytes()).unwrap()
    }

    #[test]
    fn test_valid_suite_passes() {
        let suite = parse(
            r#"
name: ok
tests:
  - name: t
    steps:
      - name: s
        plugin: http
        config: { method: GET, url: "https://x" }
        assertions:
          - type: status_code
            expected: 200
        save:
          - json_path: ".id"
            as: uid
        retry:
          initial_interval: 50ms
          maximum_interval: 1s
          maximum_attempts: 3
"#,
        );
        assert!(validate(&suite, &FakeCatalog).is_ok());
    }

    #[test]
    fn test_all_violations_reported() {
        let suite = parse(
            r#"
name: broken
tests:
  - name: t
    steps:
      - name: s1
        plugin: nope
        config: {}
        retry:
          maximum_attempts: 0
          initial_interval: 10x
      - name: s2
        plugin: http
        config: {}
        save:
          - as: both
            json_path: ".a"
            header: "X-A"
          - as: both
            json_path: ".b"
"#,
        );

        let errors = validate(&suite, &FakeCatalog).unwrap_err().errors;
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::UnknownPlugin { .. })));
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::RetryZeroAttempts { .. })));
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::RetryBadDuration { .. })));
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::SaveSelectorCount { .. })));
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::DuplicateSaveTarget { .. })));
        assert!(errors.len() >= 5);
    }

    #[test]
    fn test_inverted_retry_intervals() {
        let suite = parse(
            r#"
name: x
tests:
  - name: t
    steps:
      - name: s
        plugin: delay
        config: { duration: 1s }
        retry:
          initial_interval: 10s
          maximum_interval: 1s
"#,
        );
        let errors = validate(&suite, &FakeCatalog).unwrap_err().errors;
        assert_eq!(
            errors,
            vec![ValidationError::RetryIntervalInverted {
                location: "test 't' steps[0]".to_string()
            }]
        );
    }

    #[test]
    fn test_unknown_assertion_type() {
        let suite = parse(
            r#"
name: x
tests:
  - name: t
    steps:
      - name: s
        plugin: http
        config: {}
        assertions:
          - type: latency_under
            expected: 100
"#,
        );
        let errors = validate(&suite, &FakeCatalog).unwrap_err().errors;
        assert!(matches!(
            &errors[0],
            ValidationError::UnknownAssertionType { assertion_type, .. }
                if assertion_type == "latency_under"
        ));
    }

    #[test]
    fn test_duplicate_test_names() {
        let suite = parse(
            r#"
name: x
tests:
  - name: same
    steps: []
  - name: same
    steps: []
"#,
        );
        let errors = validate(&suite, &FakeCatalog).unwrap_err().errors;
        assert_eq!(
            errors,
            vec![ValidationError::DuplicateTestName {
                name: "same".to_string()
            }]
        );
    }

    #[test]
    fn test_hook_steps_validated() {
        let suite = parse(
            r#"
name: x
init:
  - name: seed
    plugin: unknown-plugin
    config: {}
tests: []
"#,
        );
        let errors = validate(&suite, &FakeCatalog).unwrap_err().errors;
        assert!(matches!(
            &errors[0],
            ValidationError::UnknownPlugin { location, .. } if location == "suite init[0]"
        ));
    }
}
