// Environment assembly: process env layered over an optional .env file

use std::collections::BTreeMap;
use std::path::Path;

/// The `{{ .env.* }}` namespace: a flat map assembled from a `.env`-format
/// file (one KEY=VALUE per line, `#` comments, quoted values) with process
/// env layered on top.
#[derive(Debug, Clone, Default)]
pub struct EnvMap {
    values: BTreeMap<String, String>,
}

impl EnvMap {
    /// Build from process env only
    pub fn from_process() -> Self {
        let mut values = BTreeMap::new();
        for (key, value) in std::env::vars() {
            values.insert(key, value);
        }
        Self { values }
    }

    /// Build from a `.env` file with process env taking precedence
    pub fn from_process_and_file(path: &Path) -> Result<Self, dotenvy::Error> {
        let mut values = BTreeMap::new();
        for item in dotenvy::from_path_iter(path)? {
            let (key, value) = item?;
            values.insert(key, value);
        }
        for (key, value) in std::env::vars() {
            values.insert(key, value);
        }
        Ok(Self { values })
    }

    /// Build from explicit entries (tests, embedded callers)
    pub fn from_entries(entries: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            values: entries.into_iter().collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn into_map(self) -> BTreeMap<String, String> {
        self.values
    }

    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.values
    }
}
