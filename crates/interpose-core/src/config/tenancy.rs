//! Tenancy configuration for multi-tenant row isolation.
//!
//! This module defines which column carries the tenant id, which tables are
//! shared across tenants, and where the per-request tenant value comes from.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use super::{parse_list, ConfigError};

/// Configuration for tenant isolation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenancyConfig {
    /// Default column name for tenant isolation.
    #[serde(default = "default_tenant_column")]
    pub column: String,

    /// Per-table column overrides.
    #[serde(default)]
    pub table_columns: HashMap<String, String>,

    /// Tables that are shared (no tenant scoping applied).
    #[serde(default)]
    pub ignore_tables: Vec<String>,

    /// Where the tenant value comes from.
    #[serde(default)]
    pub value: TenantValueSource,
}

impl Default for TenancyConfig {
    fn default() -> Self {
        Self {
            column: default_tenant_column(),
            table_columns: HashMap::new(),
            ignore_tables: Vec::new(),
            value: TenantValueSource::default(),
        }
    }
}

/// Source of the tenant value expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantValueSource {
    /// A fixed SQL expression, e.g. `7` or `'acme'`.
    Literal(String),
    /// The named request-context attribute.
    Attribute(String),
}

impl Default for TenantValueSource {
    fn default() -> Self {
        TenantValueSource::Attribute(default_tenant_column())
    }
}

impl TenancyConfig {
    /// Build from stage properties.
    ///
    /// Recognized keys: `column`, `ignoreTables` (comma list),
    /// `tableColumns` (comma list of `table:column`), `tenantValue` (SQL
    /// literal) and `tenantAttribute` (request attribute name).
    pub fn from_properties(props: &BTreeMap<String, String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(column) = props.get("column") {
            config.column = column.trim().to_string();
        }
        if let Some(tables) = props.get("ignoreTables") {
            config.ignore_tables = parse_list(tables);
        }
        if let Some(pairs) = props.get("tableColumns") {
            for pair in parse_list(pairs) {
                let (table, column) = pair.split_once(':').ok_or_else(|| {
                    ConfigError::Config(format!("tableColumns entry must be table:column, got {pair}"))
                })?;
                config
                    .table_columns
                    .insert(table.trim().to_string(), column.trim().to_string());
            }
        }

        match (props.get("tenantValue"), props.get("tenantAttribute")) {
            (Some(_), Some(_)) => {
                return Err(ConfigError::Config(
                    "tenantValue and tenantAttribute are mutually exclusive".to_string(),
                ));
            }
            (Some(literal), None) => config.value = TenantValueSource::Literal(literal.clone()),
            (None, Some(attr)) => config.value = TenantValueSource::Attribute(attr.clone()),
            (None, None) => {}
        }

        if config.column.is_empty() {
            return Err(ConfigError::Config("tenant column must not be empty".to_string()));
        }

        Ok(config)
    }

    /// Check if a table is shared (no tenant scoping). Case-insensitive.
    pub fn is_ignored_table(&self, table_name: &str) -> bool {
        self.ignore_tables
            .iter()
            .any(|t| t.eq_ignore_ascii_case(table_name))
    }

    /// Get the tenant column for a given table.
    ///
    /// Returns `None` if the table is ignored.
    pub fn get_tenant_column(&self, table_name: &str) -> Option<&str> {
        if self.is_ignored_table(table_name) {
            return None;
        }

        self.table_columns
            .iter()
            .find(|(t, _)| t.eq_ignore_ascii_case(table_name))
            .map(|(_, c)| c.as_str())
            .or(Some(self.column.as_str()))
    }
}

fn default_tenant_column() -> String {
    "tenant_id".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_default_tenant_column() {
        let config = TenancyConfig::default();
        assert_eq!(config.get_tenant_column("orders"), Some("tenant_id"));
        assert_eq!(
            config.value,
            TenantValueSource::Attribute("tenant_id".to_string())
        );
    }

    #[test]
    fn test_per_table_override() {
        let config =
            TenancyConfig::from_properties(&props(&[("tableColumns", "orders:customer_id")]))
                .unwrap();
        assert_eq!(config.get_tenant_column("orders"), Some("customer_id"));
        assert_eq!(config.get_tenant_column("ORDERS"), Some("customer_id"));
        assert_eq!(config.get_tenant_column("users"), Some("tenant_id"));
    }

    #[test]
    fn test_ignored_tables() {
        let config =
            TenancyConfig::from_properties(&props(&[("ignoreTables", "products, Region")]))
                .unwrap();
        assert_eq!(config.get_tenant_column("products"), None);
        assert!(config.is_ignored_table("region"));
        assert!(!config.is_ignored_table("orders"));
    }

    #[test]
    fn test_value_source_from_properties() {
        let literal = TenancyConfig::from_properties(&props(&[("tenantValue", "7")])).unwrap();
        assert_eq!(literal.value, TenantValueSource::Literal("7".to_string()));

        let attr =
            TenancyConfig::from_properties(&props(&[("tenantAttribute", "org")])).unwrap();
        assert_eq!(attr.value, TenantValueSource::Attribute("org".to_string()));

        let both = TenancyConfig::from_properties(&props(&[
            ("tenantValue", "7"),
            ("tenantAttribute", "org"),
        ]));
        assert!(both.is_err());
    }

    #[test]
    fn test_parse_tenancy_yaml() {
        let yaml = r#"
column: organization_id
table_columns:
  orders: customer_org_id
ignore_tables: [products]
value:
  literal: "'acme'"
"#;
        let config: TenancyConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.column, "organization_id");
        assert_eq!(config.get_tenant_column("orders"), Some("customer_org_id"));
        assert!(config.is_ignored_table("products"));
        assert_eq!(config.value, TenantValueSource::Literal("'acme'".to_string()));
    }
}
