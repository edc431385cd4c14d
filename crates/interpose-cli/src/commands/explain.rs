//! `interpose explain` command implementation.
//!
//! Runs one statement through the configured chain against a
//! [`DryRunExecutor`] and reports everything that would have reached the
//! database: the count query, the rewritten statement and its parameters.

use anyhow::{Context, Result};
use interpose_core::DbType;
use interpose_rewrite::{
    BoundSql, Executor, Flow, InterceptorChain, MappedStatement, PageRequest, RequestContext,
    StatementClassifier, StatementKind,
};
use serde::Serialize;

use super::{parse_value, read_sql, DryRunExecutor, ExecutedStatement, PipelineSource};

#[derive(Debug, Clone)]
pub struct ExplainArgs {
    pub sql: String,
    pub attrs: Vec<String>,
    pub page: Option<u64>,
    pub size: u64,
    pub total: u64,
    pub url: String,
    pub json: bool,
}

/// What the chain did with one statement.
#[derive(Debug, Serialize)]
pub struct Explanation {
    pub stages: Vec<String>,
    pub kind: String,
    pub executed: Vec<ExecutedStatement>,
    pub short_circuited: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
}

pub fn run(source: &PipelineSource, args: ExplainArgs) -> Result<()> {
    let config = source.load()?;
    let chain = InterceptorChain::from_config(&config).context("Failed to build the chain")?;
    let sql = read_sql(&args.sql)?;
    let db_type = config
        .db_type
        .unwrap_or_else(|| DbType::from_url(&args.url));

    let ctx = request_context(&args)?;
    let executor = DryRunExecutor::new(args.url.as_str(), args.total);
    let explanation = explain(&chain, &executor, db_type, &sql, ctx)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&explanation)?);
        return Ok(());
    }

    println!("Stages: {}", display_stages(&explanation.stages));
    println!("Kind:   {}", explanation.kind);
    if let Some(total) = explanation.total {
        println!("Total:  {total}");
    }
    println!();
    for (i, statement) in explanation.executed.iter().enumerate() {
        println!("[{}] {}", i + 1, statement.sql);
        if !statement.parameters.is_empty() {
            println!("    params: {}", serde_json::to_string(&statement.parameters)?);
        }
    }
    if explanation.short_circuited {
        println!("\nShort-circuited: the statement itself would not be executed.");
    }
    Ok(())
}

fn request_context(args: &ExplainArgs) -> Result<RequestContext> {
    let mut ctx = RequestContext::new();
    for attr in &args.attrs {
        let (key, value) = attr
            .split_once('=')
            .with_context(|| format!("Attribute must be KEY=VALUE, got {attr}"))?;
        ctx = ctx.with_attribute(key.trim(), parse_value(value.trim()));
    }
    if let Some(page) = args.page {
        ctx = ctx.with_page(PageRequest::new(page, args.size));
    }
    Ok(ctx)
}

/// Run `sql` through `chain` and collect what `executor` saw.
pub fn explain(
    chain: &InterceptorChain,
    executor: &DryRunExecutor,
    db_type: DbType,
    sql: &str,
    mut ctx: RequestContext,
) -> Result<Explanation> {
    let batch = StatementClassifier::new(db_type)
        .parse_batch(sql)
        .context("Failed to parse statement")?;
    let kind = batch
        .statements()
        .first()
        .map(|s| s.kind())
        .unwrap_or(StatementKind::Other);
    let ms = MappedStatement::new("cli.explain", kind);
    let mut bound = BoundSql::new(sql);

    let flow = match kind {
        StatementKind::Select => match chain.rewrite_query(executor, &ms, &mut bound, &mut ctx, None)? {
            Flow::ShortCircuit(_) => Flow::ShortCircuit(()),
            Flow::Continue => {
                executor.query(&bound.sql, &bound.parameters)?;
                Flow::Continue
            }
        },
        _ => match chain.rewrite_update(executor, &ms, &mut bound, &ctx, None)? {
            Flow::ShortCircuit(_) => Flow::ShortCircuit(()),
            Flow::Continue => {
                executor.update(&bound.sql, &bound.parameters)?;
                Flow::Continue
            }
        },
    };

    Ok(Explanation {
        stages: chain.stage_names().into_iter().map(String::from).collect(),
        kind: kind.to_string(),
        executed: executor.executed(),
        short_circuited: flow != Flow::Continue,
        total: ctx.page().and_then(|p| p.total),
    })
}

fn display_stages(stages: &[String]) -> String {
    if stages.is_empty() {
        "(none)".to_string()
    } else {
        stages.join(" -> ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use interpose_core::{PipelineConfig, StageProperties};
    use serde_json::json;

    fn chain(properties: &str) -> InterceptorChain {
        let props = StageProperties::parse(properties).unwrap();
        let mut config = PipelineConfig::from_properties(&props).unwrap();
        config.db_type = Some(DbType::Mysql);
        InterceptorChain::from_config(&config).unwrap()
    }

    #[test]
    fn test_explain_paged_tenant_query() {
        let chain = chain("@tenant=tenant-line\ntenant:tenantValue=7\n@page=pagination\n");
        let executor = DryRunExecutor::new("mysql://localhost/app", 35);
        let ctx = RequestContext::new().with_page(PageRequest::new(2, 10));

        let out = explain(&chain, &executor, DbType::Mysql, "SELECT * FROM orders", ctx).unwrap();
        assert_eq!(out.stages, vec!["tenant", "page"]);
        assert_eq!(out.total, Some(35));
        assert!(!out.short_circuited);
        assert_eq!(out.executed.len(), 2);
        assert_eq!(
            out.executed[0].sql,
            "SELECT COUNT(*) AS total FROM orders WHERE orders.tenant_id = 7"
        );
        assert_eq!(
            out.executed[1].sql,
            "SELECT * FROM orders WHERE orders.tenant_id = 7 LIMIT ?,?"
        );
        assert_eq!(out.executed[1].parameters, vec![json!(10), json!(10)]);
    }

    #[test]
    fn test_explain_reports_short_circuit() {
        let chain = chain("@page=pagination\n");
        let executor = DryRunExecutor::new("mysql://localhost/app", 5);
        let ctx = RequestContext::new().with_page(PageRequest::new(4, 10));

        let out = explain(&chain, &executor, DbType::Mysql, "SELECT * FROM orders", ctx).unwrap();
        assert!(out.short_circuited);
        assert_eq!(out.executed.len(), 1);
    }

    #[test]
    fn test_request_context_attributes() {
        let args = ExplainArgs {
            sql: "SELECT 1".to_string(),
            attrs: vec!["tenant_id=7".to_string(), "region=eu".to_string()],
            page: Some(1),
            size: 20,
            total: 0,
            url: String::new(),
            json: false,
        };
        let ctx = request_context(&args).unwrap();
        assert_eq!(ctx.attribute("tenant_id"), Some(&json!(7)));
        assert_eq!(ctx.attribute("region"), Some(&json!("eu")));
        assert_eq!(ctx.page().map(|p| p.size), Some(20));

        let bad = ExplainArgs {
            attrs: vec!["oops".to_string()],
            ..args
        };
        assert!(request_context(&bad).is_err());
    }
}
