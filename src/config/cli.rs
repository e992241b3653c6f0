use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the Watchlazy binary.
#[derive(Debug, Parser)]
#[command(
    name = "watchlazy",
    version,
    about = "Movie availability catalog server"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "WATCHLAZY_CONFIG_FILE", value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the public and admin HTTP services.
    Serve(Box<ServeArgs>),
    /// Fetch every source once, replace stored records and clear the cache.
    Refresh(OneShotArgs),
    /// Fetch every source once and insert only unseen records.
    Incremental(OneShotArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct StorageOverrides {
    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,

    /// Override the shared cache connection URL.
    #[arg(long = "cache-remote-url", value_name = "URL")]
    pub cache_remote_url: Option<String>,

    /// Override the snapshot file location.
    #[arg(long = "snapshot-path", value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub snapshot_path: Option<PathBuf>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct OneShotArgs {
    #[command(flatten)]
    pub storage: StorageOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub storage: StorageOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the public listener port.
    #[arg(long = "server-public-port", value_name = "PORT")]
    pub public_port: Option<u16>,

    /// Override the administrative listener port.
    #[arg(long = "server-admin-port", value_name = "PORT")]
    pub admin_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Toggle the periodic incremental update.
    #[arg(
        long = "scheduler-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub scheduler_enabled: Option<bool>,

    /// Override the incremental update cadence.
    #[arg(long = "scheduler-incremental-cadence-seconds", value_name = "SECONDS")]
    pub scheduler_incremental_cadence_seconds: Option<u64>,
}
