//! `interpose expand` command implementation.

use anyhow::{Context, Result};
use interpose_rewrite::ColumnTemplateResolver;
use std::sync::Arc;

use super::{read_sql, require_metadata, PipelineSource};

pub fn run(source: &PipelineSource, sql: &str) -> Result<()> {
    let config = source.load()?;
    let sql = read_sql(sql)?;
    if !ColumnTemplateResolver::has_templates(&sql) {
        tracing::warn!("No column templates in statement");
    }

    let resolver = ColumnTemplateResolver::new(Arc::new(require_metadata(&config)?));
    let expanded = resolver
        .resolve(&sql)
        .context("Failed to expand column templates")?;
    println!("{expanded}");
    Ok(())
}
