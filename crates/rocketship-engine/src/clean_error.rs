// Clean-error extraction
//
// The substrate appends retry-state wrapping to error messages, and the
// wrapping stacks as errors cross workflow layers, duplicating the
// underlying message. Truncating at the first wrap marker recovers the
// message exactly once while keeping embedded newlines (assertion stack
// traces and the like) intact.

use rocketship_durable::RETRY_WRAP_MARKER;

/// Strip substrate wrapping from an error message
pub fn clean_error_message(message: &str) -> String {
    match message.find(RETRY_WRAP_MARKER) {
        Some(index) => message[..index].to_string(),
        None => message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unwrapped_message_passes_through() {
        assert_eq!(clean_error_message("connection refused"), "connection refused");
    }

    #[test]
    fn test_single_wrap_truncated() {
        let wrapped = format!("boom{} attempt 3 of 3)", RETRY_WRAP_MARKER);
        assert_eq!(clean_error_message(&wrapped), "boom");
    }

    #[test]
    fn test_stacked_wraps_truncated_at_first() {
        let wrapped = format!(
            "boom{} attempt 3 of 3){} attempt 1 of 1)",
            RETRY_WRAP_MARKER, RETRY_WRAP_MARKER
        );
        assert_eq!(clean_error_message(&wrapped), "boom");
    }

    #[test]
    fn test_multiline_content_preserved() {
        let message = "assertion failed:\n  expected: 200\n  actual: 404";
        let wrapped = format!("{}{} attempt 1 of 1)", message, RETRY_WRAP_MARKER);
        assert_eq!(clean_error_message(&wrapped), message);
    }
}
