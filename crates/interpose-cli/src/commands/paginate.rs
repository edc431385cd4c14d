//! `interpose paginate` command implementation.

use anyhow::{Context, Result};
use interpose_core::DbType;
use interpose_rewrite::{dialect_for, DialectModel, PageRequest};

use super::{read_sql, require_db_type, PipelineSource};

pub fn run(source: &PipelineSource, sql: &str, page: u64, size: u64, json: bool) -> Result<()> {
    let config = source.load()?;
    let db_type = require_db_type(&config)?;
    let sql = read_sql(sql)?;

    let model = paginate(db_type, &sql, page, size)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&model)?);
        return Ok(());
    }

    println!("{}", model.sql);
    println!();
    println!("Dialect: {db_type}");
    for (i, slot) in model.slots.iter().enumerate() {
        println!(
            "  slot {}: {:?} {:?} = {}",
            i + 1,
            slot.position,
            slot.kind,
            slot.value
        );
    }
    Ok(())
}

/// The paginated form of `sql` for page `page` of `size` rows.
pub fn paginate(db_type: DbType, sql: &str, page: u64, size: u64) -> Result<DialectModel> {
    anyhow::ensure!(page >= 1, "Page numbers start at 1");
    anyhow::ensure!(size >= 1, "Page size must be at least 1");

    let dialect = dialect_for(db_type).context("No pagination dialect")?;
    let offset = PageRequest::new(page, size).offset();
    dialect
        .build_pagination_sql(sql, offset, size)
        .context("Failed to paginate statement")
}
