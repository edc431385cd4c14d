//! The interceptor chain.
//!
//! Stages run in registration order and every stage sees the mutations of
//! the stages before it. A stage that is not registered is inactive as a
//! whole.
//!
//! For a query:
//!
//! 1. `before_get_bound_sql`, then `before_prepare`, for every stage. These
//!    hooks cannot short-circuit.
//! 2. `will_query` folded over the stages. The first `false` ends the call
//!    with an empty result set and no later hook runs.
//! 3. `before_query` for every stage, then the executor.
//!
//! Updates follow the same steps with `will_update`/`before_update`, and a
//! short-circuit reports `-1` affected rows.

use interpose_core::{MetadataLookup, MetadataRegistry, PipelineConfig, StageKind};
use interpose_core::{DbType, DynamicTableNameConfig, PaginationConfig, TenancyConfig};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use crate::block_attack::BlockAttackInterceptor;
use crate::column_template::{ColumnTemplateInterceptor, ColumnTemplateResolver};
use crate::context::{BoundSql, MappedStatement, RequestContext};
use crate::dynamic_table::{DynamicTableNameInterceptor, SuffixTableNameHandler};
use crate::error::RewriteError;
use crate::executor::{ConnectionInfo, Executor, ResultSet};
use crate::injector::{TenantLineInterceptor, TenantPredicateInjector};
use crate::pagination::PaginationInterceptor;

/// Affected-row count reported when an update is short-circuited.
pub const SKIPPED_UPDATE: i64 = -1;

/// A rewrite stage. Every hook defaults to a no-op that lets the statement
/// through.
pub trait InnerInterceptor: Send + Sync {
    /// Stage name, used in logs and as the rewrite marker on [`BoundSql`].
    fn name(&self) -> &str;

    /// Decide whether the query runs. `false` short-circuits the chain.
    fn will_query(
        &self,
        _executor: &dyn Executor,
        _ms: &MappedStatement,
        _bound: &BoundSql,
        _ctx: &mut RequestContext,
    ) -> Result<bool, RewriteError> {
        Ok(true)
    }

    fn before_query(
        &self,
        _executor: &dyn Executor,
        _ms: &MappedStatement,
        _bound: &mut BoundSql,
        _ctx: &mut RequestContext,
    ) -> Result<(), RewriteError> {
        Ok(())
    }

    /// Decide whether the update runs. `false` short-circuits the chain.
    fn will_update(
        &self,
        _executor: &dyn Executor,
        _ms: &MappedStatement,
        _bound: &BoundSql,
        _ctx: &RequestContext,
    ) -> Result<bool, RewriteError> {
        Ok(true)
    }

    fn before_update(
        &self,
        _executor: &dyn Executor,
        _ms: &MappedStatement,
        _bound: &mut BoundSql,
        _ctx: &RequestContext,
    ) -> Result<(), RewriteError> {
        Ok(())
    }

    /// Runs before the statement is prepared on `connection`. The timeout is
    /// the caller's and is passed through unchanged.
    fn before_prepare(
        &self,
        _connection: &ConnectionInfo,
        _timeout: Option<Duration>,
        _ms: &MappedStatement,
        _bound: &mut BoundSql,
        _ctx: &RequestContext,
    ) -> Result<(), RewriteError> {
        Ok(())
    }

    /// Runs before the bound SQL is handed out.
    fn before_get_bound_sql(
        &self,
        _ms: &MappedStatement,
        _bound: &mut BoundSql,
        _ctx: &RequestContext,
    ) -> Result<(), RewriteError> {
        Ok(())
    }
}

/// Outcome of the decision fold.
#[derive(Debug, Clone, PartialEq)]
pub enum Flow<T> {
    Continue,
    ShortCircuit(T),
}

/// An immutable, ordered list of stages.
#[derive(Clone, Default)]
pub struct InterceptorChain {
    stages: Arc<[Arc<dyn InnerInterceptor>]>,
}

impl InterceptorChain {
    pub fn new(stages: Vec<Arc<dyn InnerInterceptor>>) -> Self {
        Self {
            stages: stages.into(),
        }
    }

    /// Build the chain a pipeline configuration declares, with metadata from
    /// its inline or loaded `metadata` section.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, RewriteError> {
        let metadata = match &config.metadata {
            Some(metadata) => {
                let registry: Arc<dyn MetadataLookup> =
                    Arc::new(MetadataRegistry::from_config(metadata)?);
                Some(registry)
            }
            None => None,
        };
        build_chain(config, metadata)
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run the pre-decision hooks of every stage.
    fn prepare(
        &self,
        executor: &dyn Executor,
        ms: &MappedStatement,
        bound: &mut BoundSql,
        ctx: &RequestContext,
        timeout: Option<Duration>,
    ) -> Result<(), RewriteError> {
        for stage in self.stages.iter() {
            stage.before_get_bound_sql(ms, bound, ctx)?;
        }
        let connection = executor.connection();
        for stage in self.stages.iter() {
            stage.before_prepare(&connection, timeout, ms, bound, ctx)?;
        }
        Ok(())
    }

    /// Rewrite a query without executing it.
    ///
    /// Returns `ShortCircuit` with the result the caller should see when a
    /// stage vetoed the query. Stages may still run auxiliary statements
    /// through `executor` (e.g. the pagination count).
    pub fn rewrite_query(
        &self,
        executor: &dyn Executor,
        ms: &MappedStatement,
        bound: &mut BoundSql,
        ctx: &mut RequestContext,
        timeout: Option<Duration>,
    ) -> Result<Flow<ResultSet>, RewriteError> {
        self.prepare(executor, ms, bound, ctx, timeout)?;

        let flow = self.stages.iter().try_fold(
            Flow::Continue,
            |flow, stage| -> Result<Flow<ResultSet>, RewriteError> {
                Ok(match flow {
                    Flow::ShortCircuit(result) => Flow::ShortCircuit(result),
                    Flow::Continue if stage.will_query(executor, ms, bound, ctx)? => Flow::Continue,
                    Flow::Continue => {
                        tracing::debug!(stage = stage.name(), statement = %ms.id, "Query short-circuited");
                        Flow::ShortCircuit(ResultSet::empty())
                    }
                })
            },
        )?;
        if let Flow::ShortCircuit(result) = flow {
            return Ok(Flow::ShortCircuit(result));
        }

        for stage in self.stages.iter() {
            stage.before_query(executor, ms, bound, ctx)?;
        }
        Ok(Flow::Continue)
    }

    /// Rewrite an INSERT/UPDATE/DELETE without executing it.
    pub fn rewrite_update(
        &self,
        executor: &dyn Executor,
        ms: &MappedStatement,
        bound: &mut BoundSql,
        ctx: &RequestContext,
        timeout: Option<Duration>,
    ) -> Result<Flow<i64>, RewriteError> {
        self.prepare(executor, ms, bound, ctx, timeout)?;

        let flow = self.stages.iter().try_fold(
            Flow::Continue,
            |flow, stage| -> Result<Flow<i64>, RewriteError> {
                Ok(match flow {
                    Flow::ShortCircuit(affected) => Flow::ShortCircuit(affected),
                    Flow::Continue if stage.will_update(executor, ms, bound, ctx)? => Flow::Continue,
                    Flow::Continue => {
                        tracing::debug!(stage = stage.name(), statement = %ms.id, "Update short-circuited");
                        Flow::ShortCircuit(SKIPPED_UPDATE)
                    }
                })
            },
        )?;
        if let Flow::ShortCircuit(affected) = flow {
            return Ok(Flow::ShortCircuit(affected));
        }

        for stage in self.stages.iter() {
            stage.before_update(executor, ms, bound, ctx)?;
        }
        Ok(Flow::Continue)
    }

    /// Rewrite and execute a query.
    pub fn query(
        &self,
        executor: &dyn Executor,
        ms: &MappedStatement,
        mut bound: BoundSql,
        ctx: &mut RequestContext,
        timeout: Option<Duration>,
    ) -> Result<ResultSet, RewriteError> {
        match self.rewrite_query(executor, ms, &mut bound, ctx, timeout)? {
            Flow::ShortCircuit(result) => Ok(result),
            Flow::Continue => executor
                .query(&bound.sql, &bound.parameters)
                .map_err(RewriteError::Executor),
        }
    }

    /// Rewrite and execute an update. Returns the affected-row count, or
    /// [`SKIPPED_UPDATE`] when a stage vetoed the statement.
    pub fn update(
        &self,
        executor: &dyn Executor,
        ms: &MappedStatement,
        mut bound: BoundSql,
        ctx: &RequestContext,
        timeout: Option<Duration>,
    ) -> Result<i64, RewriteError> {
        match self.rewrite_update(executor, ms, &mut bound, ctx, timeout)? {
            Flow::ShortCircuit(affected) => Ok(affected),
            Flow::Continue => {
                let affected = executor
                    .update(&bound.sql, &bound.parameters)
                    .map_err(RewriteError::Executor)?;
                Ok(i64::try_from(affected).unwrap_or(i64::MAX))
            }
        }
    }
}

/// Shared handle to the active chain. Reconfiguration swaps the whole chain;
/// calls already in flight keep the chain they started with.
#[derive(Default)]
pub struct ChainHandle {
    current: RwLock<Arc<InterceptorChain>>,
}

impl ChainHandle {
    pub fn new(chain: InterceptorChain) -> Self {
        Self {
            current: RwLock::new(Arc::new(chain)),
        }
    }

    pub fn current(&self) -> Arc<InterceptorChain> {
        let guard = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    /// Install `chain` and return the previous one.
    pub fn swap(&self, chain: InterceptorChain) -> Arc<InterceptorChain> {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, Arc::new(chain))
    }
}

/// Instantiate the stages a pipeline configuration declares, in order.
pub fn build_chain(
    config: &PipelineConfig,
    metadata: Option<Arc<dyn MetadataLookup>>,
) -> Result<InterceptorChain, RewriteError> {
    let mut stages: Vec<Arc<dyn InnerInterceptor>> = Vec::with_capacity(config.stages.len());

    for stage in &config.stages {
        let name = stage.name().to_string();
        let built: Arc<dyn InnerInterceptor> = match stage.kind {
            StageKind::Pagination => {
                let mut pagination = PaginationConfig::from_properties(&stage.properties)?;
                pagination.db_type = pagination.db_type.or(config.db_type);
                Arc::new(PaginationInterceptor::new(name, pagination))
            }
            StageKind::TenantLine => {
                let tenancy = TenancyConfig::from_properties(&stage.properties)?;
                let injector = TenantPredicateInjector::from_config(
                    config.db_type.unwrap_or(DbType::Other),
                    tenancy,
                );
                Arc::new(TenantLineInterceptor::new(name, injector))
            }
            StageKind::DynamicTableName => {
                let tables = DynamicTableNameConfig::from_properties(&stage.properties)?;
                Arc::new(DynamicTableNameInterceptor::new(
                    name,
                    config.db_type,
                    Arc::new(SuffixTableNameHandler::new(tables)),
                ))
            }
            StageKind::BlockAttack => Arc::new(BlockAttackInterceptor::new(name, config.db_type)),
            StageKind::ColumnTemplate => {
                let metadata = metadata.clone().ok_or_else(|| {
                    RewriteError::Config(interpose_core::ConfigError::Config(format!(
                        "stage {name} needs entity metadata"
                    )))
                })?;
                Arc::new(ColumnTemplateInterceptor::new(
                    name,
                    ColumnTemplateResolver::new(metadata),
                ))
            }
        };
        tracing::info!(stage = built.name(), kind = %stage.kind, "Registered stage");
        stages.push(built);
    }

    Ok(InterceptorChain::new(stages))
}
