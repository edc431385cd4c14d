//! Error types for the rewriting crate.

use interpose_core::{ConfigError, DbType};
use thiserror::Error;

/// Errors that can occur while rewriting or executing a statement.
#[derive(Debug, Error)]
pub enum RewriteError {
    /// SQL parsing failed. The original text is kept for diagnostics.
    #[error("failed to parse SQL: {message} (sql: {sql})")]
    ParseError { sql: String, message: String },

    /// A stage needs entity or column metadata the lookup does not have.
    #[error("unresolved metadata: {what}")]
    UnresolvedMetadata { what: String },

    /// Logical-delete batch invoked with zero items.
    #[error("logical delete batch must not be empty")]
    EmptyBatch,

    /// The statement has a shape this rewrite cannot handle correctly.
    #[error("unsupported statement shape: {reason}")]
    UnsupportedShape { reason: String },

    /// No pagination dialect exists for the database type.
    #[error("no pagination dialect for database type {db_type}")]
    UnsupportedDialect { db_type: DbType },

    /// Tenant value required but not provided.
    #[error("tenant value required but not provided")]
    MissingTenantValue,

    /// A non-idempotent stage saw a statement it already rewrote.
    #[error("statement already rewritten by stage {stage}")]
    AlreadyRewritten { stage: String },

    /// Full-table UPDATE or DELETE.
    #[error("blocked full-table {operation} on {table}")]
    BlockedStatement { operation: String, table: String },

    /// Stage configuration is invalid.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The wrapped executor failed.
    #[error("executor error: {0}")]
    Executor(#[source] anyhow::Error),
}

impl RewriteError {
    pub(crate) fn parse(sql: &str, message: impl ToString) -> Self {
        RewriteError::ParseError {
            sql: sql.to_string(),
            message: message.to_string(),
        }
    }

    pub(crate) fn unsupported(reason: impl Into<String>) -> Self {
        RewriteError::UnsupportedShape {
            reason: reason.into(),
        }
    }

    pub(crate) fn unresolved(what: impl Into<String>) -> Self {
        RewriteError::UnresolvedMetadata { what: what.into() }
    }
}
