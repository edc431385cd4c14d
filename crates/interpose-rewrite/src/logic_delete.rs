//! Logical delete by ids.
//!
//! A delete-by-ids call against an entity with a logical-delete column is
//! turned into an UPDATE that flips the column for every listed key:
//!
//! ```text
//! UPDATE t SET deleted=1 WHERE id IN (?,?,?)
//! ```
//!
//! When the entity has update-time fill columns (audit fields such as
//! `updated_by`), they are set as well. The whole batch shares the fill
//! values of its first record.

use interpose_core::{MetadataLookup, TableInfo};
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::context::BoundSql;
use crate::error::RewriteError;

/// One element of a delete-by-ids batch.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchItem {
    /// A raw key value.
    Key(Value),
    /// An entity (or partial entity) carrying its key property.
    Entity(Map<String, Value>),
}

impl BatchItem {
    fn key_value(&self, info: &TableInfo, key_property: &str) -> Result<Value, RewriteError> {
        match self {
            BatchItem::Key(value) => Ok(value.clone()),
            BatchItem::Entity(record) => record.get(key_property).cloned().ok_or_else(|| {
                RewriteError::unresolved(format!(
                    "entity {} item is missing key property {key_property}",
                    info.entity
                ))
            }),
        }
    }
}

/// Populates update-time fill properties on a record.
pub trait FillHandler: Send + Sync {
    fn update_fill(&self, table: &TableInfo, record: &mut Map<String, Value>);
}

/// Builds logical-delete UPDATE statements from entity metadata.
#[derive(Clone)]
pub struct LogicalDeleteRewriter {
    metadata: Arc<dyn MetadataLookup>,
    fill: Option<Arc<dyn FillHandler>>,
}

impl LogicalDeleteRewriter {
    pub fn new(metadata: Arc<dyn MetadataLookup>) -> Self {
        Self {
            metadata,
            fill: None,
        }
    }

    pub fn with_fill_handler(mut self, fill: Arc<dyn FillHandler>) -> Self {
        self.fill = Some(fill);
        self
    }

    /// Build the logical-delete UPDATE for `items`.
    pub fn delete_batch_by_ids(
        &self,
        entity: &str,
        items: &[BatchItem],
    ) -> Result<BoundSql, RewriteError> {
        let Some(first) = items.first() else {
            return Err(RewriteError::EmptyBatch);
        };

        let info = self
            .metadata
            .resolve(entity)
            .ok_or_else(|| RewriteError::unresolved(format!("no metadata for entity {entity}")))?;
        let logic_field = info.logic_delete_field().ok_or_else(|| {
            RewriteError::unresolved(format!("entity {entity} has no logic delete field"))
        })?;
        let deleted_value = logic_field
            .logic_delete
            .as_ref()
            .map(|values| values.deleted.as_str())
            .ok_or_else(|| {
                RewriteError::unresolved(format!("entity {entity} has no logic delete value"))
            })?;
        let key = info
            .key
            .as_ref()
            .ok_or_else(|| RewriteError::unresolved(format!("entity {entity} has no key")))?;

        let mut assignments = Vec::new();
        let mut parameters = Vec::with_capacity(items.len());

        let fill_fields: Vec<_> = info.update_fill_fields().collect();
        if !fill_fields.is_empty() {
            let mut record = match first {
                BatchItem::Entity(record) => record.clone(),
                BatchItem::Key(_) => Map::new(),
            };
            if let Some(fill) = &self.fill {
                fill.update_fill(&info, &mut record);
            }
            // Fill columns the first record has no value for are left as they are.
            for field in fill_fields {
                let Some(value) = record.get(&field.property).filter(|v| !v.is_null()) else {
                    continue;
                };
                assignments.push(format!("{}=?", field.column));
                parameters.push(value.clone());
            }
        }
        assignments.push(format!("{}={deleted_value}", logic_field.column));

        for item in items {
            parameters.push(item.key_value(&info, &key.property)?);
        }
        let placeholders = vec!["?"; items.len()].join(",");

        let sql = format!(
            "UPDATE {} SET {} WHERE {} IN ({placeholders})",
            info.table_name,
            assignments.join(","),
            key.column
        );
        tracing::debug!(entity = %info.entity, keys = items.len(), sql = %sql, "Built logical delete");
        Ok(BoundSql::new(sql).with_parameters(parameters))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use interpose_core::{FieldFill, FieldInfo, LogicDeleteValues, MetadataRegistry};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn logic_flag() -> FieldInfo {
        FieldInfo::new("deleted", "deleted").with_logic_delete(LogicDeleteValues {
            deleted: "1".to_string(),
            not_deleted: "0".to_string(),
        })
    }

    fn registry(with_fill: bool) -> Arc<MetadataRegistry> {
        let mut info = TableInfo::new("Task", "t")
            .with_key(FieldInfo::new("id", "id"))
            .with_field(FieldInfo::new("title", "title"))
            .with_field(logic_flag());
        if with_fill {
            info = info.with_field(
                FieldInfo::new("updatedBy", "updated_by").with_fill(FieldFill::Update),
            );
        }
        let mut registry = MetadataRegistry::new();
        registry.register(info).unwrap();
        Arc::new(registry)
    }

    fn entity(pairs: &[(&str, Value)]) -> BatchItem {
        BatchItem::Entity(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        )
    }

    #[test]
    fn test_plain_key_batch() {
        let rewriter = LogicalDeleteRewriter::new(registry(false));
        let bound = rewriter
            .delete_batch_by_ids(
                "Task",
                &[
                    BatchItem::Key(json!(1)),
                    BatchItem::Key(json!(2)),
                    BatchItem::Key(json!(3)),
                ],
            )
            .unwrap();
        assert_eq!(bound.sql, "UPDATE t SET deleted=1 WHERE id IN (?,?,?)");
        assert_eq!(bound.parameters, vec![json!(1), json!(2), json!(3)]);
    }

    #[test]
    fn test_mixed_keys_and_entities() {
        let rewriter = LogicalDeleteRewriter::new(registry(false));
        let bound = rewriter
            .delete_batch_by_ids(
                "t",
                &[
                    BatchItem::Key(json!(1)),
                    entity(&[("id", json!(2)), ("title", json!("x"))]),
                ],
            )
            .unwrap();
        assert_eq!(bound.parameters, vec![json!(1), json!(2)]);
    }

    #[test]
    fn test_fill_columns_from_first_record() {
        let rewriter = LogicalDeleteRewriter::new(registry(true));
        let bound = rewriter
            .delete_batch_by_ids(
                "Task",
                &[
                    entity(&[("id", json!(1)), ("updatedBy", json!("alice"))]),
                    entity(&[("id", json!(2)), ("updatedBy", json!("bob"))]),
                ],
            )
            .unwrap();
        assert_eq!(bound.sql, "UPDATE t SET updated_by=?,deleted=1 WHERE id IN (?,?)");
        assert_eq!(bound.parameters, vec![json!("alice"), json!(1), json!(2)]);
    }

    #[test]
    fn test_fill_handler_populates_key_batches() {
        struct Auditor;
        impl FillHandler for Auditor {
            fn update_fill(&self, _table: &TableInfo, record: &mut Map<String, Value>) {
                record.insert("updatedBy".to_string(), json!("system"));
            }
        }

        let rewriter = LogicalDeleteRewriter::new(registry(true)).with_fill_handler(Arc::new(Auditor));
        let bound = rewriter
            .delete_batch_by_ids("Task", &[BatchItem::Key(json!(9))])
            .unwrap();
        assert_eq!(bound.parameters, vec![json!("system"), json!(9)]);
    }

    #[test]
    fn test_missing_fill_value_leaves_column_untouched() {
        let rewriter = LogicalDeleteRewriter::new(registry(true));
        let bound = rewriter
            .delete_batch_by_ids("Task", &[BatchItem::Key(json!(9))])
            .unwrap();
        assert_eq!(bound.sql, "UPDATE t SET deleted=1 WHERE id IN (?)");
        assert_eq!(bound.parameters, vec![json!(9)]);

        let bound = rewriter
            .delete_batch_by_ids(
                "Task",
                &[
                    entity(&[("id", json!(1)), ("updatedBy", Value::Null)]),
                    entity(&[("id", json!(2)), ("updatedBy", json!("bob"))]),
                ],
            )
            .unwrap();
        assert_eq!(bound.sql, "UPDATE t SET deleted=1 WHERE id IN (?,?)");
        assert_eq!(bound.parameters, vec![json!(1), json!(2)]);
    }

    #[test]
    fn test_empty_batch_rejected_before_lookup() {
        let rewriter = LogicalDeleteRewriter::new(Arc::new(MetadataRegistry::new()));
        assert!(matches!(
            rewriter.delete_batch_by_ids("Missing", &[]),
            Err(RewriteError::EmptyBatch)
        ));
    }

    #[test]
    fn test_unresolved_metadata() {
        let rewriter = LogicalDeleteRewriter::new(registry(false));
        assert!(matches!(
            rewriter.delete_batch_by_ids("Missing", &[BatchItem::Key(json!(1))]),
            Err(RewriteError::UnresolvedMetadata { .. })
        ));
        assert!(matches!(
            rewriter.delete_batch_by_ids("Task", &[entity(&[("title", json!("x"))])]),
            Err(RewriteError::UnresolvedMetadata { .. })
        ));

        let mut plain = MetadataRegistry::new();
        plain
            .register(TableInfo::new("Note", "note").with_key(FieldInfo::new("id", "id")))
            .unwrap();
        let rewriter = LogicalDeleteRewriter::new(Arc::new(plain));
        assert!(matches!(
            rewriter.delete_batch_by_ids("Note", &[BatchItem::Key(json!(1))]),
            Err(RewriteError::UnresolvedMetadata { .. })
        ));
    }
}
