//! Pagination stage configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{parse_bool, ConfigError};
use crate::db_type::DbType;

/// Configuration for the pagination stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginationConfig {
    /// Dialect to paginate for. When unset, it is detected from the
    /// executor's connection URL.
    #[serde(default)]
    pub db_type: Option<DbType>,

    /// Upper bound applied to every page size.
    #[serde(default)]
    pub max_limit: Option<u64>,

    /// When the requested page is past the last page, serve the first page
    /// instead of an empty one.
    #[serde(default)]
    pub overflow: bool,

    /// Derive count queries by replacing the projection rather than always
    /// wrapping the statement.
    #[serde(default = "default_true")]
    pub optimize_count: bool,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            db_type: None,
            max_limit: None,
            overflow: false,
            optimize_count: true,
        }
    }
}

impl PaginationConfig {
    /// Build from stage properties.
    ///
    /// Recognized keys: `dbType`, `maxLimit`, `overflow`, `optimizeCountSql`.
    pub fn from_properties(props: &BTreeMap<String, String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(db_type) = props.get("dbType") {
            config.db_type = Some(db_type.parse()?);
        }
        if let Some(max_limit) = props.get("maxLimit") {
            let parsed = max_limit.trim().parse::<u64>().map_err(|e| {
                ConfigError::Config(format!("maxLimit must be a positive integer: {e}"))
            })?;
            if parsed == 0 {
                return Err(ConfigError::Config("maxLimit must be greater than zero".to_string()));
            }
            config.max_limit = Some(parsed);
        }
        if let Some(overflow) = props.get("overflow") {
            config.overflow = parse_bool("overflow", overflow)?;
        }
        if let Some(optimize) = props.get("optimizeCountSql") {
            config.optimize_count = parse_bool("optimizeCountSql", optimize)?;
        }

        Ok(config)
    }
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_properties() {
        let props: BTreeMap<String, String> = [
            ("dbType", "oracle"),
            ("maxLimit", "500"),
            ("overflow", "TRUE"),
            ("optimizeCountSql", "false"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let config = PaginationConfig::from_properties(&props).unwrap();
        assert_eq!(config.db_type, Some(DbType::Oracle));
        assert_eq!(config.max_limit, Some(500));
        assert!(config.overflow);
        assert!(!config.optimize_count);
    }

    #[test]
    fn test_invalid_max_limit() {
        let mut props = BTreeMap::new();
        props.insert("maxLimit".to_string(), "0".to_string());
        assert!(PaginationConfig::from_properties(&props).is_err());

        props.insert("maxLimit".to_string(), "ten".to_string());
        assert!(PaginationConfig::from_properties(&props).is_err());
    }

    #[test]
    fn test_defaults() {
        let config = PaginationConfig::from_properties(&BTreeMap::new()).unwrap();
        assert_eq!(config.db_type, None);
        assert!(config.optimize_count);
        assert!(!config.overflow);
    }
}
