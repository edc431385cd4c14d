//! `interpose delete-batch` command implementation.

use anyhow::{Context, Result};
use interpose_rewrite::{BatchItem, BoundSql, LogicalDeleteRewriter};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

use super::{parse_value, read_json, require_metadata, PipelineSource};

pub fn run(
    source: &PipelineSource,
    entity: &str,
    ids: &[String],
    records: Option<&Path>,
    json: bool,
) -> Result<()> {
    let config = source.load()?;
    let rewriter = LogicalDeleteRewriter::new(Arc::new(require_metadata(&config)?));

    let mut items: Vec<BatchItem> = ids.iter().map(|id| BatchItem::Key(parse_value(id.trim()))).collect();
    if let Some(path) = records {
        items.extend(batch_items(read_json(path)?)?);
    }

    let bound = rewriter
        .delete_batch_by_ids(entity, &items)
        .with_context(|| format!("Failed to build logical delete for {entity}"))?;
    print_bound(&bound, json)
}

/// Keys and entity objects from a JSON array (or a single value).
pub fn batch_items(value: Value) -> Result<Vec<BatchItem>> {
    let values = match value {
        Value::Array(values) => values,
        other => vec![other],
    };
    values
        .into_iter()
        .map(|value| match value {
            Value::Object(record) => Ok(BatchItem::Entity(record)),
            Value::Array(_) => anyhow::bail!("Nested arrays are not batch items"),
            key => Ok(BatchItem::Key(key)),
        })
        .collect()
}

fn print_bound(bound: &BoundSql, json: bool) -> Result<()> {
    if json {
        let out = serde_json::json!({
            "sql": bound.sql,
            "parameters": bound.parameters,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("{}", bound.sql);
        println!("params: {}", serde_json::to_string(&bound.parameters)?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_batch_items_mixed() {
        let items = batch_items(json!([1, {"id": 2, "updatedBy": "alice"}, "3"])).unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0], BatchItem::Key(json!(1)));
        assert!(matches!(&items[1], BatchItem::Entity(record) if record["id"] == json!(2)));
        assert_eq!(items[2], BatchItem::Key(json!("3")));
    }

    #[test]
    fn test_batch_items_single_and_nested() {
        assert_eq!(batch_items(json!(5)).unwrap(), vec![BatchItem::Key(json!(5))]);
        assert!(batch_items(json!([[1, 2]])).is_err());
    }
}
