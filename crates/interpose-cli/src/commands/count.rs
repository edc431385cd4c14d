//! `interpose count` command implementation.

use anyhow::{Context, Result};
use interpose_core::DbType;
use interpose_rewrite::{count_sql, StatementClassifier};

use super::{read_sql, PipelineSource};

pub fn run(source: &PipelineSource, sql: &str, optimize: bool) -> Result<()> {
    let config = source.load()?;
    let sql = read_sql(sql)?;
    let classifier = StatementClassifier::new(config.db_type.unwrap_or(DbType::Other));

    let count = count_sql(&classifier, &sql, optimize).context("Failed to derive count query")?;
    println!("{count}");
    Ok(())
}
