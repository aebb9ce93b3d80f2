use clap::{Parser, Subcommand};

/// Anomaly engine configuration.
#[derive(Debug, Clone, Parser)]
#[command(name = "pumpaudit")]
#[command(about = "Anomaly-detection engine for fuel-dispensing transaction records")]
pub struct Config {
    /// PostgreSQL connection string
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    /// Minimum database connections
    #[arg(long, default_value = "1", env = "PUMPAUDIT_DB_MIN_CONNECTIONS")]
    pub db_min_connections: u32,

    /// Maximum database connections
    #[arg(long, default_value = "5", env = "PUMPAUDIT_DB_MAX_CONNECTIONS")]
    pub db_max_connections: u32,

    /// Violations buffered per bulk write
    #[arg(long, default_value = "1000", env = "PUMPAUDIT_FLUSH_SIZE")]
    pub flush_size: usize,

    /// Records fetched per storage round trip
    #[arg(long, default_value = "1000", env = "PUMPAUDIT_CHUNK_SIZE")]
    pub chunk_size: u32,

    /// Records between progress updates
    #[arg(long, default_value = "250", env = "PUMPAUDIT_PROGRESS_INTERVAL")]
    pub progress_interval: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Register a new execution and print its id
    Create {
        /// Rule template to apply
        #[arg(long)]
        template_id: i32,

        /// Data batches to analyze, comma separated
        #[arg(long, value_delimiter = ',', required = true)]
        batches: Vec<i32>,
    },

    /// Run one registered execution to completion
    Run {
        /// Execution to run
        #[arg(long)]
        execution_id: String,

        /// Override the registered batch list, comma separated
        #[arg(long, value_delimiter = ',')]
        batches: Option<Vec<i32>>,
    },

    /// Reconcile executions stuck in PROCESSING to FAILED
    Sweep {
        /// Age in seconds after which a PROCESSING execution is stale
        #[arg(long, default_value = "3600")]
        stale_after_secs: u64,
    },
}

impl Config {
    pub fn engine_options(&self) -> crate::engine::EngineOptions {
        crate::engine::EngineOptions {
            flush_size: self.flush_size,
            chunk_size: self.chunk_size,
            progress_interval: self.progress_interval,
        }
    }
}
