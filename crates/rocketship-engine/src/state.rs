// Runtime state threading
//
// Per-test saved values live in an ordered map so every iteration —
// snapshots, merges, template resolution — visits keys identically on
// replay. Suite-level init writes into a write-once globals snapshot that
// each test copies before running; tests never observe each other's
// mutations.

use std::collections::BTreeMap;

/// The per-test string→string map threaded between steps
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuntimeState {
    values: BTreeMap<String, String>,
}

impl RuntimeState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh state seeded from the suite globals snapshot
    pub fn from_globals(globals: &SuiteGlobals) -> Self {
        Self {
            values: globals.values.clone(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Merge saved values; BTreeMap ordering keeps the write order
    /// deterministic regardless of how the plugin produced them
    pub fn merge(&mut self, saved: impl IntoIterator<Item = (String, String)>) {
        for (key, value) in saved {
            self.values.insert(key, value);
        }
    }

    /// Deterministic snapshot of the current values
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.values.clone()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Write-once snapshot produced by suite init
///
/// The coordinator owns this; tests receive an immutable copy.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SuiteGlobals {
    values: BTreeMap<String, String>,
}

impl SuiteGlobals {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Seal a runtime state into the globals snapshot
    pub fn from_state(state: &RuntimeState) -> Self {
        Self {
            values: state.snapshot(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_and_get() {
        let mut state = RuntimeState::new();
        state.merge([("uid".to_string(), "42".to_string())]);
        assert_eq!(state.get("uid"), Some("42"));
        assert_eq!(state.get("other"), None);
    }

    #[test]
    fn test_later_writes_win() {
        let mut state = RuntimeState::new();
        state.set("k", "first");
        state.merge([("k".to_string(), "second".to_string())]);
        assert_eq!(state.get("k"), Some("second"));
    }

    #[test]
    fn test_snapshot_is_detached() {
        let mut state = RuntimeState::new();
        state.set("a", "1");
        let snapshot = state.snapshot();
        state.set("a", "2");
        assert_eq!(snapshot.get("a").map(String::as_str), Some("1"));
    }

    #[test]
    fn test_globals_copy_isolates_tests() {
        let mut seed = RuntimeState::new();
        seed.set("base", "shared");
        let globals = SuiteGlobals::from_state(&seed);

        let mut test_a = RuntimeState::from_globals(&globals);
        let test_b = RuntimeState::from_globals(&globals);

        test_a.set("base", "mutated");
        test_a.set("only_a", "x");

        // B sees the original snapshot, untouched by A
        assert_eq!(test_b.get("base"), Some("shared"));
        assert_eq!(test_b.get("only_a"), None);
        assert_eq!(globals.get("base"), Some("shared"));
    }
}
