// Plugin registry: name → activity function + metadata descriptor

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use rocketship_dsl::PluginCatalog;
use rocketship_durable::ActivityRegistry;
use tracing::debug;

use crate::plugin_activity_type;
use crate::protocol::{PluginError, PluginInput, PluginOutput};

/// Boxed future returned by plugin functions
pub type PluginFuture = Pin<Box<dyn Future<Output = Result<PluginOutput, PluginError>> + Send>>;

/// Type-erased plugin function
pub type PluginFn = Arc<dyn Fn(PluginInput) -> PluginFuture + Send + Sync>;

/// Metadata describing a plugin
#[derive(Debug, Clone)]
pub struct PluginDescriptor {
    pub name: String,

    /// Config keys the plugin understands (documentation surface; unknown
    /// keys inside config still pass through to the plugin)
    pub config_keys: Vec<String>,

    /// Assertion types the plugin evaluates; empty means the plugin
    /// evaluates none and any authored assertion is a validation error
    pub assertion_types: Vec<String>,

    /// True when the interpreter handles the plugin natively instead of
    /// dispatching an activity (the `delay` built-in)
    pub workflow_native: bool,
}

impl PluginDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config_keys: vec![],
            assertion_types: vec![],
            workflow_native: false,
        }
    }

    pub fn with_config_keys(mut self, keys: &[&str]) -> Self {
        self.config_keys = keys.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn with_assertion_types(mut self, types: &[&str]) -> Self {
        self.assertion_types = types.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn workflow_native(mut self) -> Self {
        self.workflow_native = true;
        self
    }
}

struct PluginEntry {
    descriptor: PluginDescriptor,
    activity: Option<PluginFn>,
}

/// Dispatch table for plugins
///
/// The registry serves three callers: suite validation (via
/// [`PluginCatalog`]), the interpreter (native-plugin checks), and the
/// substrate (activity installation via [`install`](Self::install)).
#[derive(Default)]
pub struct PluginRegistry {
    plugins: HashMap<String, PluginEntry>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in plugins: `http`, `log`, and the
    /// workflow-native `delay`
    pub fn builtin() -> Self {
        let mut registry = Self::new();

        registry.register(
            PluginDescriptor::new("http")
                .with_config_keys(&["method", "url", "headers", "body"])
                .with_assertion_types(&["status_code", "json_path", "header"]),
            |input| Box::pin(crate::http::http_plugin(input)),
        );

        registry.register(
            PluginDescriptor::new("log").with_config_keys(&["message", "color", "bold"]),
            |input| Box::pin(crate::log::log_plugin(input)),
        );

        registry.register_native(
            PluginDescriptor::new("delay")
                .with_config_keys(&["duration"])
                .workflow_native(),
        );

        registry
    }

    /// Register a plugin activity function with its descriptor
    pub fn register<F>(&mut self, descriptor: PluginDescriptor, f: F)
    where
        F: Fn(PluginInput) -> PluginFuture + Send + Sync + 'static,
    {
        debug!(plugin = %descriptor.name, "registering plugin");
        self.plugins.insert(
            descriptor.name.clone(),
            PluginEntry {
                descriptor,
                activity: Some(Arc::new(f)),
            },
        );
    }

    /// Register a descriptor-only plugin the interpreter handles natively
    pub fn register_native(&mut self, descriptor: PluginDescriptor) {
        debug!(plugin = %descriptor.name, "registering workflow-native plugin");
        self.plugins.insert(
            descriptor.name.clone(),
            PluginEntry {
                descriptor,
                activity: None,
            },
        );
    }

    pub fn descriptor(&self, name: &str) -> Option<&PluginDescriptor> {
        self.plugins.get(name).map(|entry| &entry.descriptor)
    }

    pub fn is_workflow_native(&self, name: &str) -> bool {
        self.descriptor(name)
            .map(|d| d.workflow_native)
            .unwrap_or(false)
    }

    /// Plugin names in sorted order
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.plugins.keys().map(|s| s.as_str()).collect();
        names.sort();
        names
    }

    /// Install every dispatchable plugin into the substrate's activity
    /// registry under `plugin.<name>`
    ///
    /// The installed activity deserializes the envelope, runs the plugin,
    /// and maps its output or typed error back across the boundary.
    pub fn install(&self, activities: &mut ActivityRegistry) {
        for (name, entry) in &self.plugins {
            let Some(plugin_fn) = entry.activity.clone() else {
                continue;
            };
            let plugin_name = name.clone();

            activities.register(plugin_activity_type(name), move |_ctx, input| {
                let plugin_fn = plugin_fn.clone();
                let plugin_name = plugin_name.clone();
                async move {
                    let parsed: PluginInput = serde_json::from_value(input).map_err(|e| {
                        rocketship_durable::ActivityError::permanent(format!(
                            "plugin '{}': invalid input envelope: {}",
                            plugin_name, e
                        ))
                    })?;

                    match plugin_fn(parsed).await {
                        Ok(output) => serde_json::to_value(&output).map_err(|e| {
                            rocketship_durable::ActivityError::permanent(format!(
                                "plugin '{}': output serialization failed: {}",
                                plugin_name, e
                            ))
                        }),
                        Err(error) => Err(error.into_activity_error()),
                    }
                }
            });
        }
    }
}

impl PluginCatalog for PluginRegistry {
    fn contains(&self, plugin: &str) -> bool {
        self.plugins.contains_key(plugin)
    }

    fn assertion_types(&self, plugin: &str) -> Option<Vec<String>> {
        self.descriptor(plugin).map(|d| d.assertion_types.clone())
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RunRef;
    use rocketship_durable::{ActivityContext, ActivityRegistry};
    use serde_json::json;
    use std::collections::BTreeMap;
    use tokio_util::sync::CancellationToken;

    fn sample_input(plugin: &str) -> PluginInput {
        PluginInput {
            name: "step".to_string(),
            plugin: plugin.to_string(),
            config: BTreeMap::from([("message".to_string(), json!("hello"))]),
            state: BTreeMap::new(),
            vars: BTreeMap::new(),
            run: RunRef {
                id: "run-1".to_string(),
            },
            assertions: vec![],
            save: vec![],
            suite_openapi: None,
        }
    }

    #[test]
    fn test_builtin_registry() {
        let registry = PluginRegistry::builtin();
        assert_eq!(registry.names(), vec!["delay", "http", "log"]);
        assert!(registry.is_workflow_native("delay"));
        assert!(!registry.is_workflow_native("http"));
    }

    #[test]
    fn test_catalog_membership() {
        let registry = PluginRegistry::builtin();
        assert!(PluginCatalog::contains(&registry, "http"));
        assert!(!PluginCatalog::contains(&registry, "sql"));

        let types = registry.assertion_types("http").unwrap();
        assert!(types.contains(&"status_code".to_string()));

        // delay evaluates no assertions
        assert_eq!(registry.assertion_types("delay").unwrap(), Vec::<String>::new());
    }

    #[tokio::test]
    async fn test_install_wraps_envelope() {
        let registry = PluginRegistry::builtin();
        let mut activities = ActivityRegistry::new();
        registry.install(&mut activities);

        // Native plugins are not installed as activities
        assert!(activities.contains("plugin.http"));
        assert!(activities.contains("plugin.log"));
        assert!(!activities.contains("plugin.delay"));

        let f = activities.get("plugin.log").unwrap();
        let ctx = ActivityContext::new("wf-1", "a-0", 1, 1, CancellationToken::new());
        let input = serde_json::to_value(sample_input("log")).unwrap();
        let output = f(ctx, input).await.unwrap();
        let parsed: PluginOutput = serde_json::from_value(output).unwrap();
        assert_eq!(parsed.log_message.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_install_rejects_bad_envelope() {
        let registry = PluginRegistry::builtin();
        let mut activities = ActivityRegistry::new();
        registry.install(&mut activities);

        let f = activities.get("plugin.log").unwrap();
        let ctx = ActivityContext::new("wf-1", "a-0", 1, 1, CancellationToken::new());
        let err = f(ctx, json!("not an envelope")).await.unwrap_err();
        assert!(err.message.contains("invalid input envelope"));
    }
}
