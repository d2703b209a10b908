//! Command line definition.

use chronicle_core::config::EventSourcingConfig;
use clap::{Args, Parser, Subcommand};

use crate::error::AppError;

/// Administers a Chronicle event store and its projections.
#[derive(Parser, Debug)]
#[command(name = "chronicle-admin", version)]
pub struct Cli {
    /// `PostgreSQL` connection string
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: String,

    /// Events table
    #[arg(long, env = "CHRONICLE_EVENTS_TABLE", default_value = "event_streams")]
    pub events_table: String,

    /// Stream registry table
    #[arg(long, env = "CHRONICLE_STREAMS_TABLE", default_value = "event_stream_registry")]
    pub streams_table: String,

    /// Projection checkpoint table
    #[arg(long, env = "CHRONICLE_PROJECTIONS_TABLE", default_value = "projections")]
    pub projections_table: String,

    /// Snapshot table
    #[arg(long, env = "CHRONICLE_SNAPSHOTS_TABLE", default_value = "aggregate_snapshots")]
    pub snapshots_table: String,

    /// Events fetched per round trip
    #[arg(long, env = "CHRONICLE_LOAD_BATCH_SIZE", default_value_t = 1000)]
    pub load_batch_size: usize,

    /// Do not create missing tables before running a command
    #[arg(long, env = "CHRONICLE_SKIP_SCHEMA_INIT")]
    pub skip_schema_init: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Store configuration from the arguments.
    ///
    /// # Errors
    ///
    /// `AppError::Domain` if a table name is not a valid SQL identifier.
    pub fn config(&self) -> Result<EventSourcingConfig, AppError> {
        Ok(EventSourcingConfig::default()
            .with_load_batch_size(self.load_batch_size)
            .with_initialize_on_start(!self.skip_schema_init)
            .with_events_table(&self.events_table)?
            .with_streams_table(&self.streams_table)?
            .with_projections_table(&self.projections_table)?
            .with_snapshots_table(&self.snapshots_table)?)
    }
}

/// Pagination of list commands.
#[derive(Args, Debug, Clone, Copy)]
pub struct Page {
    /// Maximum number of entries
    #[arg(long, default_value_t = 100)]
    pub limit: usize,

    /// Entries to skip
    #[arg(long, default_value_t = 0)]
    pub offset: usize,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create the tables if they do not exist
    Init,

    /// List stream names
    Streams {
        /// Only names starting with this prefix
        #[arg(long, conflicts_with = "regex")]
        prefix: Option<String>,

        /// Only names matching this regular expression
        #[arg(long)]
        regex: Option<String>,

        #[command(flatten)]
        page: Page,
    },

    /// List category names
    Categories {
        /// Only categories starting with this prefix
        #[arg(long, conflicts_with = "regex")]
        prefix: Option<String>,

        /// Only categories matching this regular expression
        #[arg(long)]
        regex: Option<String>,

        #[command(flatten)]
        page: Page,
    },

    /// Inspect and administer projections
    #[command(subcommand)]
    Projections(ProjectionCommand),
}

#[derive(Subcommand, Debug)]
pub enum ProjectionCommand {
    /// List projection names
    List {
        /// Only names starting with this prefix
        #[arg(long)]
        prefix: Option<String>,

        #[command(flatten)]
        page: Page,
    },

    /// Show the status
    Status { name: String },

    /// Show the per-stream positions as JSON
    Positions { name: String },

    /// Show the stored state as JSON
    State { name: String },

    /// Request a rebuild from the first event
    Reset { name: String },

    /// Request a stop
    Stop { name: String },

    /// Request deletion
    Delete {
        name: String,

        /// Also delete the stream the projection emitted into
        #[arg(long)]
        with_emitted_events: bool,
    },
}
