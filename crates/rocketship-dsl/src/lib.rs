//! # Suite DSL
//!
//! The contract between YAML suite files and the runtime:
//!
//! - **Model**: typed [`Suite`]/[`Test`]/[`Step`] structs, parsed from
//!   YAML or JSON. Unknown keys are rejected everywhere except inside
//!   `step.config`, which is opaque to the engine and validated by the
//!   owning plugin.
//! - **Validation**: [`validate`] checks plugin references, retry
//!   coherence, duration syntax, save selectors, and assertion types,
//!   reporting every violation rather than the first.
//! - **Templates**: [`TemplateContext`] substitutes `{{ .vars.* }}`,
//!   `{{ .env.* }}`, and `{{ runtime_var }}` references into config
//!   values, with `\{{ … }}` escaping.

pub mod duration;
pub mod envfile;
pub mod suite;
pub mod template;
pub mod validate;

pub use duration::parse_duration;
pub use envfile::EnvMap;
pub use suite::{
    CleanupHooks, RetryConfig, SaveSpec, Step, Suite, SuiteParseError, Test,
};
pub use template::{TemplateContext, TemplateError};
pub use validate::{validate, PluginCatalog, ValidationError, ValidationErrors};
