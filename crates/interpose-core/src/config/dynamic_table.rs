//! Dynamic table name stage configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{parse_list, ConfigError};

/// Tables whose physical name is chosen per request.
///
/// A table listed in `tables` is renamed to `{table}{separator}{suffix}`
/// where the suffix is read from the `suffix_attribute` request attribute.
/// Requests without the attribute keep the logical name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DynamicTableNameConfig {
    #[serde(default)]
    pub tables: Vec<String>,

    #[serde(default = "default_suffix_attribute")]
    pub suffix_attribute: String,

    #[serde(default = "default_separator")]
    pub separator: String,
}

impl Default for DynamicTableNameConfig {
    fn default() -> Self {
        Self {
            tables: Vec::new(),
            suffix_attribute: default_suffix_attribute(),
            separator: default_separator(),
        }
    }
}

impl DynamicTableNameConfig {
    /// Build from stage properties: `tables`, `suffixAttribute`, `separator`.
    pub fn from_properties(props: &BTreeMap<String, String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(tables) = props.get("tables") {
            config.tables = parse_list(tables);
        }
        if let Some(attr) = props.get("suffixAttribute") {
            config.suffix_attribute = attr.trim().to_string();
        }
        if let Some(separator) = props.get("separator") {
            config.separator = separator.clone();
        }
        if config.tables.is_empty() {
            return Err(ConfigError::Config(
                "dynamic-table-name stage needs at least one table".to_string(),
            ));
        }
        Ok(config)
    }

    pub fn is_dynamic(&self, table_name: &str) -> bool {
        self.tables.iter().any(|t| t.eq_ignore_ascii_case(table_name))
    }
}

fn default_suffix_attribute() -> String {
    "table_suffix".to_string()
}

fn default_separator() -> String {
    "_".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_properties() {
        let mut props = BTreeMap::new();
        props.insert("tables".to_string(), "orders, audit_log".to_string());
        props.insert("suffixAttribute".to_string(), "month".to_string());

        let config = DynamicTableNameConfig::from_properties(&props).unwrap();
        assert!(config.is_dynamic("ORDERS"));
        assert!(config.is_dynamic("audit_log"));
        assert!(!config.is_dynamic("users"));
        assert_eq!(config.suffix_attribute, "month");
        assert_eq!(config.separator, "_");
    }

    #[test]
    fn test_requires_tables() {
        assert!(DynamicTableNameConfig::from_properties(&BTreeMap::new()).is_err());
    }
}
