//! Entity-to-table metadata.
//!
//! A [`TableInfo`] describes how one entity maps onto a table: its key, its
//! columns, which columns are filled automatically on update, and which
//! column carries the logical-delete flag. Each [`FieldInfo`] caches the
//! select fragment for its column, computed once when the registry is built.
//!
//! Rewriting stages only read metadata. They receive it through the
//! [`MetadataLookup`] trait, so tests and embedders can supply fixtures
//! instead of the YAML-backed [`MetadataRegistry`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::config::ConfigError;

/// Read-only metadata lookup keyed by entity name or table name.
pub trait MetadataLookup: Send + Sync {
    fn resolve(&self, id: &str) -> Option<Arc<TableInfo>>;
}

/// When a field is filled automatically.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldFill {
    #[default]
    Default,
    Insert,
    Update,
    InsertUpdate,
}

impl FieldFill {
    pub fn on_update(&self) -> bool {
        matches!(self, FieldFill::Update | FieldFill::InsertUpdate)
    }

    pub fn on_insert(&self) -> bool {
        matches!(self, FieldFill::Insert | FieldFill::InsertUpdate)
    }
}

/// SQL literals used for a logical-delete column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicDeleteValues {
    /// Value written when a row is deleted, e.g. `1` or `NOW()`.
    pub deleted: String,
    /// Value of live rows, e.g. `0` or `NULL`.
    pub not_deleted: String,
}

/// One mapped column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    pub property: String,
    pub column: String,
    /// `column` or `column AS property`.
    pub select_fragment: String,
    pub fill: FieldFill,
    pub logic_delete: Option<LogicDeleteValues>,
    /// Whether the column takes part in generated select lists.
    pub select: bool,
}

impl FieldInfo {
    pub fn new(property: impl Into<String>, column: impl Into<String>) -> Self {
        let property = property.into();
        let column = column.into();
        let select_fragment = select_fragment(&column, &property);
        Self {
            property,
            column,
            select_fragment,
            fill: FieldFill::Default,
            logic_delete: None,
            select: true,
        }
    }

    pub fn with_fill(mut self, fill: FieldFill) -> Self {
        self.fill = fill;
        self
    }

    pub fn with_logic_delete(mut self, values: LogicDeleteValues) -> Self {
        self.logic_delete = Some(values);
        self
    }
}

/// Metadata for one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableInfo {
    pub entity: String,
    pub table_name: String,
    pub key: Option<FieldInfo>,
    pub fields: Vec<FieldInfo>,
}

impl TableInfo {
    pub fn new(entity: impl Into<String>, table_name: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            table_name: table_name.into(),
            key: None,
            fields: Vec::new(),
        }
    }

    pub fn with_key(mut self, key: FieldInfo) -> Self {
        self.key = Some(key);
        self
    }

    pub fn with_field(mut self, field: FieldInfo) -> Self {
        self.fields.push(field);
        self
    }

    /// The logical-delete field, if the entity has one.
    pub fn logic_delete_field(&self) -> Option<&FieldInfo> {
        self.fields.iter().find(|f| f.logic_delete.is_some())
    }

    /// Fields filled on update, excluding the logical-delete column.
    pub fn update_fill_fields(&self) -> impl Iterator<Item = &FieldInfo> {
        self.fields
            .iter()
            .filter(|f| f.fill.on_update() && f.logic_delete.is_none())
    }

    /// Key first, then every selectable field.
    pub fn select_fields(&self) -> impl Iterator<Item = &FieldInfo> {
        self.key
            .iter()
            .chain(self.fields.iter())
            .filter(|f| f.select)
    }

    /// Comma-joined select fragments.
    pub fn select_list(&self) -> String {
        self.select_fields()
            .map(|f| f.select_fragment.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }

    fn from_definition(
        def: &EntityDefinition,
        defaults: &LogicDeleteDefaults,
    ) -> Result<Self, ConfigError> {
        if def.name.trim().is_empty() {
            return Err(ConfigError::Config("entity name must not be empty".to_string()));
        }

        let table_name = def
            .table
            .clone()
            .unwrap_or_else(|| to_snake_case(&def.name));
        let key = def
            .key
            .as_ref()
            .map(|k| FieldInfo::new(&k.property, k.column_name()));

        let mut fields = Vec::with_capacity(def.fields.len());
        for column in &def.fields {
            let mut field = FieldInfo::new(&column.property, column.column_name());
            field.fill = column.fill;
            field.select = column.select;

            let explicit = column.logic_delete.as_ref();
            let global = defaults
                .field
                .as_deref()
                .is_some_and(|name| name == column.property);
            if explicit.is_some() || global {
                field.logic_delete = Some(LogicDeleteValues {
                    deleted: explicit
                        .and_then(|l| l.value.clone())
                        .unwrap_or_else(|| defaults.value.clone()),
                    not_deleted: explicit
                        .and_then(|l| l.not_value.clone())
                        .unwrap_or_else(|| defaults.not_value.clone()),
                });
            }
            fields.push(field);
        }

        if fields.iter().filter(|f| f.logic_delete.is_some()).count() > 1 {
            return Err(ConfigError::Config(format!(
                "entity {} declares more than one logic delete field",
                def.name
            )));
        }

        Ok(Self {
            entity: def.name.clone(),
            table_name,
            key,
            fields,
        })
    }
}

/// Entity metadata file contents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataConfig {
    #[serde(default)]
    pub logic_delete: LogicDeleteDefaults,

    #[serde(default)]
    pub entities: Vec<EntityDefinition>,
}

impl MetadataConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(ConfigError::from)
    }
}

/// Global logical-delete settings applied to fields without their own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogicDeleteDefaults {
    /// Property name treated as the logic-delete field on every entity.
    #[serde(default)]
    pub field: Option<String>,

    #[serde(default = "default_deleted_value")]
    pub value: String,

    #[serde(default = "default_not_deleted_value")]
    pub not_value: String,
}

impl Default for LogicDeleteDefaults {
    fn default() -> Self {
        Self {
            field: None,
            value: default_deleted_value(),
            not_value: default_not_deleted_value(),
        }
    }
}

/// One entity as written in the metadata file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityDefinition {
    pub name: String,

    /// Table name; defaults to the snake_case entity name.
    #[serde(default)]
    pub table: Option<String>,

    #[serde(default)]
    pub key: Option<ColumnDefinition>,

    #[serde(default)]
    pub fields: Vec<ColumnDefinition>,
}

/// One column as written in the metadata file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDefinition {
    pub property: String,

    /// Column name; defaults to the snake_case property name.
    #[serde(default)]
    pub column: Option<String>,

    #[serde(default)]
    pub fill: FieldFill,

    #[serde(default)]
    pub logic_delete: Option<LogicDeleteDefinition>,

    #[serde(default = "default_true")]
    pub select: bool,
}

impl ColumnDefinition {
    fn column_name(&self) -> String {
        self.column
            .clone()
            .unwrap_or_else(|| to_snake_case(&self.property))
    }
}

/// Per-field logical-delete override.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogicDeleteDefinition {
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub not_value: Option<String>,
}

/// In-memory metadata registry, populated once and then only read.
#[derive(Debug, Clone, Default)]
pub struct MetadataRegistry {
    by_entity: HashMap<String, Arc<TableInfo>>,
    by_table: HashMap<String, Arc<TableInfo>>,
}

impl MetadataRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a metadata file's contents.
    pub fn from_config(config: &MetadataConfig) -> Result<Self, ConfigError> {
        let mut registry = Self::new();
        for def in &config.entities {
            registry.register(TableInfo::from_definition(def, &config.logic_delete)?)?;
        }
        Ok(registry)
    }

    /// Add an entity. Entity names must be unique (case-insensitive).
    pub fn register(&mut self, info: TableInfo) -> Result<(), ConfigError> {
        let entity_key = info.entity.to_ascii_lowercase();
        if self.by_entity.contains_key(&entity_key) {
            return Err(ConfigError::Config(format!(
                "entity {} registered twice",
                info.entity
            )));
        }
        let info = Arc::new(info);
        self.by_table
            .entry(info.table_name.to_ascii_lowercase())
            .or_insert_with(|| Arc::clone(&info));
        self.by_entity.insert(entity_key, info);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.by_entity.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_entity.is_empty()
    }

    /// All registered entities, sorted by entity name.
    pub fn entities(&self) -> Vec<Arc<TableInfo>> {
        let mut all: Vec<_> = self.by_entity.values().cloned().collect();
        all.sort_by(|a, b| a.entity.cmp(&b.entity));
        all
    }
}

impl MetadataLookup for MetadataRegistry {
    /// Entity names take precedence over table names.
    fn resolve(&self, id: &str) -> Option<Arc<TableInfo>> {
        let key = id.trim().to_ascii_lowercase();
        self.by_entity
            .get(&key)
            .or_else(|| self.by_table.get(&key))
            .cloned()
    }
}

fn select_fragment(column: &str, property: &str) -> String {
    if column == property {
        column.to_string()
    } else {
        format!("{column} AS {property}")
    }
}

/// `userName` -> `user_name`.
fn to_snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, ch) in name.chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

fn default_deleted_value() -> String {
    "1".to_string()
}

fn default_not_deleted_value() -> String {
    "0".to_string()
}

fn default_true() -> bool {
    true
}
