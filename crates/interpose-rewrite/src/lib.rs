//! # interpose-rewrite
//!
//! Transparent SQL rewriting for Interpose.
//!
//! This crate provides:
//! - Statement parsing and classification using `sqlparser`
//! - Tenant predicate injection for multi-tenant row isolation
//! - Dialect-specific pagination with count queries
//! - Logical delete of key batches
//! - Column templates, dynamic table names and a full-table write guard
//! - The interceptor chain that runs these stages around an [`Executor`]
//!
//! ## How It Works
//!
//! The caller's SQL is rewritten before it reaches the database:
//!
//! **Before (from the caller):**
//! ```sql
//! SELECT * FROM orders WHERE status = 'open'
//! ```
//!
//! **After (tenant-line + pagination, MySQL):**
//! ```sql
//! SELECT * FROM orders WHERE status = 'open' AND orders.tenant_id = 7 LIMIT ?,?
//! ```
//!
//! ## Stages
//!
//! | Stage                | Hook                   | Behavior |
//! |----------------------|------------------------|----------|
//! | `column-template`    | `before_get_bound_sql` | Expand `{@entity:alias}` tokens |
//! | `tenant-line`        | `before_prepare`       | AND `t.tenant_id = value` into every SELECT; add the column to INSERTs |
//! | `dynamic-table-name` | `before_prepare`       | Rename tables per request |
//! | `block-attack`       | `before_prepare`       | Reject UPDATE/DELETE without a real WHERE |
//! | `pagination`         | `will_query`, `before_query` | Count, skip empty pages, append the dialect's limit clause |

pub mod block_attack;
pub mod chain;
pub mod column_template;
pub mod context;
pub mod dynamic_table;
pub mod error;
pub mod executor;
pub mod injector;
pub mod logic_delete;
pub mod pagination;
pub mod parser;

pub use block_attack::BlockAttackInterceptor;
pub use chain::{build_chain, ChainHandle, Flow, InnerInterceptor, InterceptorChain, SKIPPED_UPDATE};
pub use column_template::{ColumnTemplateInterceptor, ColumnTemplateResolver};
pub use context::{BoundSql, MappedStatement, PageRequest, RequestContext};
pub use dynamic_table::{DynamicTableNameInterceptor, SuffixTableNameHandler, TableNameHandler};
pub use error::RewriteError;
pub use executor::{ConnectionInfo, ExecuteResult, Executor, ResultSet};
pub use injector::{
    ConfiguredTenantHandler, InjectionResult, TenantLineHandler, TenantLineInterceptor,
    TenantPredicateInjector, TenantRule,
};
pub use logic_delete::{BatchItem, FillHandler, LogicalDeleteRewriter};
pub use pagination::{
    count_sql, dialect_for, ConsumeKind, DialectModel, PaginationDialect, PaginationInterceptor,
    ParamSlot, SlotPosition,
};
pub use parser::{
    dispatch, BatchRewriteContext, ParsedStatement, StatementClassifier, StatementHandler,
    StatementKind,
};
