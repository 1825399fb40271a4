// packages/scheduler/src/scheduler/capabilities.rs
//! Task kind → required capability mapping

use crate::utils::errors::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Injectable mapping from task kind to the capabilities it requires.
///
/// Unknown kinds require nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilityTable {
    kinds: HashMap<String, BTreeSet<String>>,
}

impl Default for CapabilityTable {
    fn default() -> Self {
        Self::empty()
            .with_kind("text_generation", ["text_generation"])
            .with_kind("analysis", ["data_analysis"])
            .with_kind("coding", ["code_generation"])
    }
}

impl CapabilityTable {
    /// Table with no entries
    pub fn empty() -> Self {
        Self {
            kinds: HashMap::new(),
        }
    }

    /// Parse a complete table from YAML (`kind: [capability, ...]`)
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn with_kind<I, S>(mut self, kind: impl Into<String>, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.insert(kind, capabilities);
        self
    }

    /// Add or replace entries from configuration
    pub fn with_overrides(mut self, overrides: &HashMap<String, Vec<String>>) -> Self {
        for (kind, capabilities) in overrides {
            self.insert(kind.clone(), capabilities.iter().cloned());
        }
        self
    }

    pub fn insert<I, S>(&mut self, kind: impl Into<String>, capabilities: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.kinds
            .insert(kind.into(), capabilities.into_iter().map(Into::into).collect());
    }

    /// Capabilities required by `kind`
    pub fn required(&self, kind: &str) -> BTreeSet<String> {
        self.kinds.get(kind).cloned().unwrap_or_default()
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.kinds.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table() {
        let table = CapabilityTable::default();

        assert_eq!(table.required("coding"), BTreeSet::from(["code_generation".to_string()]));
        assert_eq!(table.required("analysis"), BTreeSet::from(["data_analysis".to_string()]));
        assert!(table.required("poetry").is_empty());
    }

    #[test]
    fn test_overrides_replace_and_extend() {
        let overrides = HashMap::from([
            ("coding".to_string(), vec!["code_generation".to_string(), "testing".to_string()]),
            ("translation".to_string(), vec!["text_generation".to_string()]),
        ]);
        let table = CapabilityTable::default().with_overrides(&overrides);

        assert_eq!(table.required("coding").len(), 2);
        assert_eq!(table.required("translation").len(), 1);
        assert_eq!(table.required("analysis").len(), 1);
    }

    #[test]
    fn test_from_yaml() {
        let table = CapabilityTable::from_yaml_str(
            r#"
review: [code_generation, data_analysis]
summarise: [text_generation]
"#,
        )
        .unwrap();

        assert_eq!(table.required("review").len(), 2);
        assert!(table.required("coding").is_empty());
        assert!(CapabilityTable::from_yaml_str("- not a map").is_err());
    }
}
