// Built-in log plugin
// Emits an operator-facing message through the envelope's log fields; the
// interpreter routes it to the log forwarder. Template references in the
// message were already resolved before dispatch.

use crate::protocol::{PluginError, PluginInput, PluginOutput};

pub async fn log_plugin(input: PluginInput) -> Result<PluginOutput, PluginError> {
    let message = input
        .config
        .get("message")
        .and_then(|v| v.as_str())
        .ok_or_else(|| PluginError::permanent("log: config requires a string 'message'"))?
        .to_string();

    let log_color = input
        .config
        .get("color")
        .and_then(|v| v.as_str())
        .map(String::from);
    let log_bold = input
        .config
        .get("bold")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    Ok(PluginOutput {
        log_message: Some(message),
        log_color,
        log_bold,
        ..Default::default()
    })
}
