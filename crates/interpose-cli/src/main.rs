use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

use commands::PipelineSource;

#[derive(Parser, Debug)]
#[command(name = "interpose", version, about = "Interpose SQL rewriting pipeline")]
struct Cli {
    /// Pipeline configuration (YAML).
    #[arg(long, short = 'c', global = true, conflicts_with = "properties")]
    config: Option<PathBuf>,

    /// Pipeline configuration as flat `@alias=type` / `alias:key=value` properties.
    #[arg(long, global = true)]
    properties: Option<PathBuf>,

    /// Entity metadata file (YAML), merged into the configuration's metadata.
    #[arg(long, global = true)]
    metadata: Option<PathBuf>,

    /// Database type, overriding the configuration (mysql, postgresql, oracle, ...).
    #[arg(long = "db-type", global = true)]
    db_type: Option<String>,

    /// Log filter, e.g. `info` or `interpose_rewrite=debug`.
    #[arg(long = "log-level", env = "RUST_LOG", default_value = "warn", global = true)]
    log_level: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a statement through the configured chain against a dry-run executor
    /// and print every statement that would reach the database.
    Explain {
        /// SQL text, or `-` to read standard input.
        sql: String,

        /// Request attribute, e.g. `--attr tenant_id=7`. Repeatable.
        #[arg(long = "attr", value_name = "KEY=VALUE")]
        attrs: Vec<String>,

        /// Page number (1-based). Enables pagination for the request.
        #[arg(long)]
        page: Option<u64>,

        /// Page size.
        #[arg(long, default_value_t = 10)]
        size: u64,

        /// Row total the dry-run executor reports for count queries.
        #[arg(long, default_value_t = 100)]
        total: u64,

        /// Connection URL reported by the dry-run executor.
        #[arg(long, default_value = "mysql://localhost/interpose")]
        url: String,

        /// Print JSON instead of text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Show the dialect-specific paginated form of a query and its parameter slots.
    Paginate {
        /// SQL text, or `-` to read standard input.
        sql: String,

        #[arg(long, default_value_t = 1)]
        page: u64,

        #[arg(long, default_value_t = 10)]
        size: u64,

        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Show the count query derived from a query.
    Count {
        /// SQL text, or `-` to read standard input.
        sql: String,

        /// Always wrap the query instead of replacing its projection.
        #[arg(long = "no-optimize", default_value_t = false)]
        no_optimize: bool,
    },

    /// Build the logical-delete UPDATE for a batch of keys or records.
    DeleteBatch {
        /// Entity (or table) name from the metadata.
        entity: String,

        /// Primary key values, comma separated.
        #[arg(long, value_delimiter = ',')]
        ids: Vec<String>,

        /// JSON file with an array of keys and/or entity objects.
        #[arg(long)]
        records: Option<PathBuf>,

        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Expand `{@entity}` column templates in a statement.
    Expand {
        /// SQL text, or `-` to read standard input.
        sql: String,
    },

    /// Validate the pipeline configuration and metadata.
    Check,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(cli.log_level.as_str())
        .with_writer(std::io::stderr)
        .init();

    let source = PipelineSource {
        config: cli.config,
        properties: cli.properties,
        metadata: cli.metadata,
        db_type: cli.db_type,
    };

    match cli.cmd {
        Command::Explain {
            sql,
            attrs,
            page,
            size,
            total,
            url,
            json,
        } => commands::explain::run(
            &source,
            commands::explain::ExplainArgs {
                sql,
                attrs,
                page,
                size,
                total,
                url,
                json,
            },
        )?,
        Command::Paginate {
            sql,
            page,
            size,
            json,
        } => commands::paginate::run(&source, &sql, page, size, json)?,
        Command::Count { sql, no_optimize } => commands::count::run(&source, &sql, !no_optimize)?,
        Command::DeleteBatch {
            entity,
            ids,
            records,
            json,
        } => commands::delete_batch::run(&source, &entity, &ids, records.as_deref(), json)?,
        Command::Expand { sql } => commands::expand::run(&source, &sql)?,
        Command::Check => {
            let results = commands::check::run(&source)?;
            if results.has_errors() {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
