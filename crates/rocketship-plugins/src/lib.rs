//! # Plugin Protocol
//!
//! The uniform contract every I/O plugin honors so the interpreter can
//! treat them polymorphically:
//!
//! - [`PluginInput`] / [`PluginOutput`] — the request/response envelope.
//! - [`PluginError`] — the failure taxonomy (`Transient`, `Permanent`,
//!   `AssertionFailed`, `Canceled`, `Timeout`); assertion failures carry
//!   request/response details so the UI can render them.
//! - [`PluginRegistry`] — name → activity function plus a metadata
//!   descriptor. Plugins are data, not inheritance: behavioral variance is
//!   encoded in the envelope (e.g. `log_message` for log-emitting
//!   plugins), and the `delay` plugin registers a descriptor only because
//!   the interpreter sleeps on the workflow clock instead of dispatching.
//!
//! Built-in plugins live here too: `http` (reqwest-backed, with
//! status/json-path/header assertions) and `log`. SQL, script, and
//! browser plugins are external collaborators that plug in behind the
//! same envelope.

pub mod http;
pub mod log;
pub mod protocol;
pub mod registry;
pub mod save;

pub use protocol::{
    AssertionResult, PluginError, PluginErrorKind, PluginInput, PluginOutput, RunRef, UiPayload,
};
pub use registry::{PluginDescriptor, PluginRegistry};
pub use save::{apply_save_specs, stringify_value, SavedExtraction};

/// Activity-type prefix plugin activities are registered under
pub const PLUGIN_ACTIVITY_PREFIX: &str = "plugin.";

/// Activity type for a plugin name
pub fn plugin_activity_type(plugin: &str) -> String {
    format!("{}{}", PLUGIN_ACTIVITY_PREFIX, plugin)
}
