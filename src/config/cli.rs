use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

/// Command-line arguments for the Vellum binary.
#[derive(Debug, Parser)]
#[command(name = "vellum", version, about = "Vellum document render tracker")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "VELLUM_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP API together with the render workers.
    Serve(Box<ServeArgs>),
    /// Run the render workers without the HTTP API.
    Worker(WorkerArgs),
    /// Render a single document in the foreground, bypassing the queue.
    Execute(ExecuteArgs),
    /// Apply database migrations and exit.
    Migrate(MigrateArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct LoggingOverrides {
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
}

#[derive(Debug, Args, Default, Clone)]
pub struct DatabaseOverrides {
    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,

    /// Override the HTTP database pool size.
    #[arg(long = "database-http-max-connections", value_name = "COUNT")]
    pub database_http_max_connections: Option<u32>,

    /// Override the jobs database pool size.
    #[arg(long = "database-jobs-max-connections", value_name = "COUNT")]
    pub database_jobs_max_connections: Option<u32>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct RendererOverrides {
    /// Override the renderer container image.
    #[arg(long = "renderer-image", value_name = "IMAGE")]
    pub renderer_image: Option<String>,

    /// Override the renderer entry command inside the container.
    #[arg(long = "renderer-command", value_name = "COMMAND")]
    pub renderer_command: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct StorageOverrides {
    /// Write render output to the configured bucket instead of the media root.
    #[arg(
        long = "storage-remote",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub storage_remote: Option<bool>,

    /// Override the local media root.
    #[arg(long = "storage-media-root", value_name = "PATH")]
    pub storage_media_root: Option<PathBuf>,

    /// Override the public media URL prefix.
    #[arg(long = "storage-media-url", value_name = "URL")]
    pub storage_media_url: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct JobsOverrides {
    /// Override the render worker concurrency.
    #[arg(long = "jobs-render-concurrency", value_name = "COUNT")]
    pub jobs_render_concurrency: Option<u32>,

    /// Override the number of attempts a render task gets.
    #[arg(long = "jobs-max-attempts", value_name = "COUNT")]
    pub jobs_max_attempts: Option<u32>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override how long an unsubmitted render claim is honoured.
    #[arg(long = "dispatch-claim-lease-seconds", value_name = "SECONDS")]
    pub dispatch_claim_lease_seconds: Option<u64>,

    #[command(flatten)]
    pub logging: LoggingOverrides,

    #[command(flatten)]
    pub database: DatabaseOverrides,

    #[command(flatten)]
    pub jobs: JobsOverrides,

    #[command(flatten)]
    pub renderer: RendererOverrides,

    #[command(flatten)]
    pub storage: StorageOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct WorkerArgs {
    #[command(flatten)]
    pub logging: LoggingOverrides,

    #[command(flatten)]
    pub database: DatabaseOverrides,

    #[command(flatten)]
    pub jobs: JobsOverrides,

    #[command(flatten)]
    pub renderer: RendererOverrides,

    #[command(flatten)]
    pub storage: StorageOverrides,
}

#[derive(Debug, Args, Clone)]
pub struct ExecuteArgs {
    /// Document source kind (arxiv|submission).
    #[arg(long = "source-type", value_name = "TYPE")]
    pub source_type: String,

    /// Document identifier within its source.
    #[arg(long = "source-id", value_name = "ID")]
    pub source_id: String,

    #[command(flatten)]
    pub logging: LoggingOverrides,

    #[command(flatten)]
    pub renderer: RendererOverrides,

    #[command(flatten)]
    pub storage: StorageOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct MigrateArgs {
    #[command(flatten)]
    pub logging: LoggingOverrides,

    #[command(flatten)]
    pub database: DatabaseOverrides,
}
