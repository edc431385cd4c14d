//! # interpose-core
//!
//! Configuration and entity metadata shared by the Interpose crates.
//!
//! - [`config`]: pipeline, stage and property-bag configuration loaded from
//!   YAML or flat `key=value` properties.
//! - [`metadata`]: entity-to-table metadata (`TableInfo`) and the read-only
//!   registry the rewriting stages resolve it from.
//! - [`db_type`]: database product detection used to pick a parse grammar and
//!   a pagination dialect.

pub mod config;
pub mod db_type;
pub mod metadata;

pub use config::{
    ConfigError, DynamicTableNameConfig, PaginationConfig, PipelineConfig, StageConfig,
    StageDeclaration, StageKind, StageProperties, TenancyConfig, TenantValueSource,
};
pub use db_type::DbType;
pub use metadata::{
    EntityDefinition, FieldFill, FieldInfo, LogicDeleteValues, MetadataConfig, MetadataLookup,
    MetadataRegistry, TableInfo,
};
