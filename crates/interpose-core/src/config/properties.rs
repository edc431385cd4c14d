//! Flat key-value stage configuration.
//!
//! The format groups keys by stage:
//!
//! - `@alias=type` declares a stage named `alias` of the given type.
//! - `alias:key=value` sets `key` on that stage.
//!
//! Keys not belonging to a declared alias are ignored. Re-declaring a key
//! replaces its value but keeps its original position.

use std::collections::BTreeMap;

use super::ConfigError;

/// Marker that prefixes a stage declaration key.
pub const STAGE_MARKER: char = '@';

/// Separator between a stage alias and a property key.
pub const ALIAS_SEPARATOR: char = ':';

/// Ordered flat property list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageProperties {
    entries: Vec<(String, String)>,
}

/// One stage extracted from a property list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageDeclaration {
    pub alias: String,
    pub type_id: String,
    pub properties: BTreeMap<String, String>,
}

impl StageProperties {
    /// Parse `key=value` lines. Blank lines and lines starting with `#` or
    /// `!` are skipped. The key ends at the first `=`.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut props = Self::default();
        for (number, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| {
                ConfigError::Config(format!("line {}: expected key=value", number + 1))
            })?;
            let key = key.trim();
            if key.is_empty() {
                return Err(ConfigError::Config(format!("line {}: empty key", number + 1)));
            }
            props.set(key, value.trim());
        }
        Ok(props)
    }

    /// Build from key-value pairs, in order.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let mut props = Self::default();
        for (k, v) in pairs {
            props.set(k, v);
        }
        props
    }

    /// Set a property, replacing an existing value in place.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Group properties into stage declarations, in declaration order.
    pub fn group(&self) -> Vec<StageDeclaration> {
        self.entries
            .iter()
            .filter_map(|(key, type_id)| {
                let alias = key.strip_prefix(STAGE_MARKER)?;
                let prefix = format!("{alias}{ALIAS_SEPARATOR}");
                let properties = self
                    .entries
                    .iter()
                    .filter_map(|(k, v)| {
                        k.strip_prefix(prefix.as_str())
                            .map(|stripped| (stripped.to_string(), v.clone()))
                    })
                    .collect();
                Some(StageDeclaration {
                    alias: alias.to_string(),
                    type_id: type_id.clone(),
                    properties,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_group_by_alias() {
        let props = StageProperties::from_pairs([
            ("@page", "pagination"),
            ("page:dbType", "h2"),
            ("page:maxLimit", "100"),
            ("@tenant", "tenant-line"),
            ("tenant:column", "org_id"),
            ("unrelated", "x"),
        ]);

        let groups = props.group();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].alias, "page");
        assert_eq!(groups[0].type_id, "pagination");
        assert_eq!(groups[0].properties.len(), 2);
        assert_eq!(groups[0].properties["dbType"], "h2");
        assert_eq!(groups[1].alias, "tenant");
        assert_eq!(groups[1].properties["column"], "org_id");
    }

    #[test]
    fn test_alias_prefix_is_exact() {
        // `page2:` keys must not leak into `page`.
        let props = StageProperties::from_pairs([
            ("@page", "pagination"),
            ("@page2", "pagination"),
            ("page2:dbType", "oracle"),
        ]);
        let groups = props.group();
        assert!(groups[0].properties.is_empty());
        assert_eq!(groups[1].properties["dbType"], "oracle");
    }

    #[test]
    fn test_parse_text() {
        let text = "# comment\n\n@page = pagination\n! also a comment\npage:dbType=mysql\n";
        let props = StageProperties::parse(text).unwrap();
        assert_eq!(props.len(), 2);
        assert_eq!(props.get("@page"), Some("pagination"));
        assert_eq!(props.get("page:dbType"), Some("mysql"));
    }

    #[test]
    fn test_parse_rejects_line_without_separator() {
        assert!(StageProperties::parse("@page").is_err());
        assert!(StageProperties::parse("=x").is_err());
    }

    #[test]
    fn test_redeclared_key_keeps_position() {
        let mut props = StageProperties::from_pairs([("@a", "pagination"), ("@b", "block-attack")]);
        props.set("@a", "tenant-line");
        let groups = props.group();
        assert_eq!(groups[0].alias, "a");
        assert_eq!(groups[0].type_id, "tenant-line");
    }
}
