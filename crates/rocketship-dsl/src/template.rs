// Template resolution for step config
//
// Three namespaces are substituted into string values:
//   {{ .vars.KEY }}  suite vars (flattened dotted paths)
//   {{ .env.KEY }}   caller-supplied environment mapping
//   {{ KEY }}        current runtime state
//
// `\{{ … }}` escapes to a literal `{{ … }}`. Suite vars are resolved once
// at load via `resolve_value_partial`; env + runtime resolution happens per
// step via `resolve_value`, which also strips escapes.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

static TEMPLATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\\)?\{\{\s*([^{}]+?)\s*\}\}").expect("valid template regex"));

/// Error from template resolution
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    /// A referenced variable is not defined in its namespace
    #[error("undefined variable '{reference}'")]
    MissingVariable { reference: String },
}

/// Variable namespaces visible to one resolution pass
///
/// A namespace that is `None` is not resolved in this pass: its references
/// pass through untouched so a later pass can pick them up.
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    vars: Option<BTreeMap<String, String>>,
    env: Option<BTreeMap<String, String>>,
    runtime: Option<BTreeMap<String, String>>,
    /// When true, a missing variable degrades to the raw input instead of
    /// failing. Only best-effort paths explicitly marked as such use this.
    lenient: bool,
}

impl TemplateContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_vars(mut self, vars: BTreeMap<String, String>) -> Self {
        self.vars = Some(vars);
        self
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = Some(env);
        self
    }

    pub fn with_runtime(mut self, runtime: BTreeMap<String, String>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn lenient(mut self) -> Self {
        self.lenient = true;
        self
    }

    /// Resolve references in a string, stripping escapes
    ///
    /// This is the final pass: every namespace the context carries is
    /// resolved, escaped sequences become literals, and references to a
    /// missing variable fail (or pass through when lenient).
    pub fn resolve_str(&self, input: &str) -> Result<String, TemplateError> {
        self.substitute(input, true)
    }

    /// Resolve only the namespaces present, leaving escapes intact
    ///
    /// Used at suite load to substitute `.vars` references while deferring
    /// env and runtime references (and their escapes) to dispatch time.
    pub fn resolve_str_partial(&self, input: &str) -> Result<String, TemplateError> {
        self.substitute(input, false)
    }

    /// Recursively resolve string leaves (and map keys) in a JSON value
    pub fn resolve_value(&self, value: &Value) -> Result<Value, TemplateError> {
        self.walk(value, true)
    }

    /// Partial-pass counterpart of [`resolve_value`](Self::resolve_value)
    pub fn resolve_value_partial(&self, value: &Value) -> Result<Value, TemplateError> {
        self.walk(value, false)
    }

    fn walk(&self, value: &Value, final_pass: bool) -> Result<Value, TemplateError> {
        match value {
            Value::String(s) => Ok(Value::String(self.substitute(s, final_pass)?)),
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.walk(item, final_pass)?);
                }
                Ok(Value::Array(out))
            }
            Value::Object(map) => {
                let mut out = Map::with_capacity(map.len());
                for (key, nested) in map {
                    let resolved_key = self.substitute(key, final_pass)?;
                    out.insert(resolved_key, self.walk(nested, final_pass)?);
                }
                Ok(Value::Object(out))
            }
            _ => Ok(value.clone()),
        }
    }

    fn substitute(&self, input: &str, final_pass: bool) -> Result<String, TemplateError> {
        let mut result = String::with_capacity(input.len());
        let mut last_index = 0;

        for capture in TEMPLATE_RE.captures_iter(input) {
            let matched = capture.get(0).unwrap();
            result.push_str(&input[last_index..matched.start()]);
            last_index = matched.end();

            let escaped = capture.get(1).is_some();
            let token = capture.get(2).unwrap().as_str();

            if escaped {
                if final_pass {
                    // Drop the backslash, keep the braces literal
                    result.push_str(&input[matched.start() + 1..matched.end()]);
                } else {
                    result.push_str(matched.as_str());
                }
                continue;
            }

            match self.lookup(token) {
                Lookup::Found(value) => result.push_str(value),
                Lookup::NamespaceAbsent => result.push_str(matched.as_str()),
                Lookup::Missing => {
                    if self.lenient {
                        result.push_str(matched.as_str());
                    } else {
                        return Err(TemplateError::MissingVariable {
                            reference: token.to_string(),
                        });
                    }
                }
            }
        }

        result.push_str(&input[last_index..]);
        Ok(result)
    }

    fn lookup(&self, token: &str) -> Lookup<'_> {
        if let Some(key) = token.strip_prefix(".vars.") {
            match &self.vars {
                Some(vars) => vars.get(key).map(Lookup::found).unwrap_or(Lookup::Missing),
                None => Lookup::NamespaceAbsent,
            }
        } else if let Some(key) = token.strip_prefix(".env.") {
            match &self.env {
                Some(env) => env.get(key).map(Lookup::found).unwrap_or(Lookup::Missing),
                None => Lookup::NamespaceAbsent,
            }
        } else {
            match &self.runtime {
                Some(runtime) => runtime
                    .get(token)
                    .map(Lookup::found)
                    .unwrap_or(Lookup::Missing),
                None => Lookup::NamespaceAbsent,
            }
        }
    }
}

enum Lookup<'a> {
    Found(&'a str),
    NamespaceAbsent,
    Missing,
}

impl<'a> Lookup<'a> {
    fn found(value: &'a String) -> Self {
        Lookup::Found(value.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn full_context() -> TemplateContext {
        let vars = BTreeMap::from([("api".to_string(), "https://x".to_string())]);
        let env = BTreeMap::from([("TOKEN".to_string(), "secret".to_string())]);
        let runtime = BTreeMap::from([("uid".to_string(), "42".to_string())]);
        TemplateContext::new()
            .with_vars(vars)
            .with_env(env)
            .with_runtime(runtime)
    }

    #[test]
    fn test_resolve_all_three_namespaces() {
        let ctx = full_context();
        let out = ctx
            .resolve_str("{{ .vars.api }}/users/{{ uid }}?t={{ .env.TOKEN }}")
            .unwrap();
        assert_eq!(out, "https://x/users/42?t=secret");
    }

    #[test]
    fn test_whitespace_tolerated() {
        let ctx = full_context();
        assert_eq!(ctx.resolve_str("{{uid}}").unwrap(), "42");
        assert_eq!(ctx.resolve_str("{{   uid   }}").unwrap(), "42");
    }

    #[test]
    fn test_missing_variable_errors() {
        let ctx = full_context();
        let err = ctx.resolve_str("{{ nope }}").unwrap_err();
        assert_eq!(
            err,
            TemplateError::MissingVariable {
                reference: "nope".to_string()
            }
        );
    }

    #[test]
    fn test_missing_vars_key_names_full_reference() {
        let ctx = full_context();
        let err = ctx.resolve_str("{{ .vars.absent }}").unwrap_err();
        assert_eq!(
            err,
            TemplateError::MissingVariable {
                reference: ".vars.absent".to_string()
            }
        );
    }

    #[test]
    fn test_lenient_passes_through() {
        let ctx = full_context().lenient();
        let out = ctx.resolve_str("before {{ nope }} after").unwrap();
        assert_eq!(out, "before {{ nope }} after");
    }

    #[test]
    fn test_escape_yields_literal() {
        let ctx = full_context();
        assert_eq!(ctx.resolve_str(r"\{{uid}}").unwrap(), "{{uid}}");
        assert_eq!(ctx.resolve_str(r"\{{ x }}").unwrap(), "{{ x }}");
    }

    #[test]
    fn test_escape_survives_partial_pass() {
        let vars = BTreeMap::from([("api".to_string(), "https://x".to_string())]);
        let load_ctx = TemplateContext::new().with_vars(vars);

        // At load, the escape stays escaped and runtime refs pass through
        let loaded = load_ctx
            .resolve_str_partial(r"{{ .vars.api }}/\{{ raw }}/{{ uid }}")
            .unwrap();
        assert_eq!(loaded, r"https://x/\{{ raw }}/{{ uid }}");

        // At dispatch, the escape becomes a literal and uid resolves
        let runtime = BTreeMap::from([("uid".to_string(), "42".to_string())]);
        let dispatch_ctx = TemplateContext::new()
            .with_env(BTreeMap::new())
            .with_runtime(runtime);
        let resolved = dispatch_ctx.resolve_str(&loaded).unwrap();
        assert_eq!(resolved, "https://x/{{ raw }}/42");
    }

    #[test]
    fn test_partial_pass_leaves_absent_namespaces() {
        let vars = BTreeMap::from([("api".to_string(), "https://x".to_string())]);
        let ctx = TemplateContext::new().with_vars(vars);
        let out = ctx
            .resolve_str_partial("{{ .vars.api }}/{{ uid }}?t={{ .env.TOKEN }}")
            .unwrap();
        assert_eq!(out, "https://x/{{ uid }}?t={{ .env.TOKEN }}");
    }

    #[test]
    fn test_resolve_value_recurses_maps_and_arrays() {
        let ctx = full_context();
        let config = json!({
            "url": "{{ .vars.api }}/users",
            "headers": { "Authorization": "Bearer {{ .env.TOKEN }}" },
            "ids": ["{{ uid }}", 7],
            "count": 3
        });

        let resolved = ctx.resolve_value(&config).unwrap();
        assert_eq!(
            resolved,
            json!({
                "url": "https://x/users",
                "headers": { "Authorization": "Bearer secret" },
                "ids": ["42", 7],
                "count": 3
            })
        );
    }

    #[test]
    fn test_resolve_value_applies_to_keys() {
        let ctx = full_context();
        let config = json!({ "{{ uid }}": "value" });
        let resolved = ctx.resolve_value(&config).unwrap();
        assert_eq!(resolved, json!({ "42": "value" }));
    }

    #[test]
    fn test_non_string_leaves_pass_through() {
        let ctx = full_context();
        let value = json!({ "n": 1, "b": true, "nothing": null });
        assert_eq!(ctx.resolve_value(&value).unwrap(), value);
    }
}
