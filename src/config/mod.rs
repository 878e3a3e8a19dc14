//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

pub use cli::*;

use std::{fmt, net::SocketAddr, num::NonZeroU32, path::PathBuf, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::application::executor::{ExecutionProfile, RemoteCredentials};
use crate::application::renders::RenderServiceConfig;
use crate::domain::renders::{
    DEFAULT_ARXIV_URL_FORMAT, DEFAULT_SUBMISSION_URL_FORMAT, OutputLayout, SOURCE_ID_PLACEHOLDER,
    SourceTemplates,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "vellum";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_DB_HTTP_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_DB_JOBS_MAX_CONNECTIONS: u32 = 4;
const DEFAULT_JOB_RENDER_CONCURRENCY: u32 = 2;
const DEFAULT_JOB_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_CLAIM_LEASE_SECS: u64 = 300;
pub(crate) const DEFAULT_RENDERER_IMAGE: &str = "arxivvanity/engrafo";
pub(crate) const DEFAULT_RENDERER_COMMAND: &str = "engrafo";
const DEFAULT_MEDIA_ROOT: &str = "media";
const DEFAULT_LOCAL_MEDIA_URL: &str = "/media/";

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub jobs: JobsSettings,
    pub renderer: RendererSettings,
    pub sources: SourceSettings,
    pub storage: StorageSettings,
    pub dispatch: DispatchSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub http_max_connections: NonZeroU32,
    pub jobs_max_connections: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct JobsSettings {
    pub render_concurrency: NonZeroU32,
    pub max_attempts: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct RendererSettings {
    pub image: String,
    pub command: String,
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub arxiv_url_format: String,
    pub submission_url_format: String,
}

impl SourceSettings {
    pub fn templates(&self) -> SourceTemplates {
        SourceTemplates::new(&self.arxiv_url_format, &self.submission_url_format)
    }
}

#[derive(Clone, PartialEq, Eq)]
pub enum StorageMode {
    Local {
        media_root: PathBuf,
    },
    Remote {
        bucket: String,
        region: String,
        access_key_id: String,
        secret_access_key: String,
    },
}

impl fmt::Debug for StorageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageMode::Local { media_root } => f
                .debug_struct("Local")
                .field("media_root", media_root)
                .finish(),
            StorageMode::Remote {
                bucket,
                region,
                access_key_id,
                ..
            } => f
                .debug_struct("Remote")
                .field("bucket", bucket)
                .field("region", region)
                .field("access_key_id", access_key_id)
                .field("secret_access_key", &"<redacted>")
                .finish(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub mode: StorageMode,
    pub media_url: String,
}

impl StorageSettings {
    pub fn output_layout(&self) -> OutputLayout {
        match &self.mode {
            StorageMode::Local { media_root } => {
                OutputLayout::local(media_root.clone(), self.media_url.clone())
            }
            StorageMode::Remote { .. } => OutputLayout::remote(self.media_url.clone()),
        }
    }

    pub fn execution_profile(&self) -> ExecutionProfile {
        match &self.mode {
            StorageMode::Local { media_root } => ExecutionProfile::Local {
                media_root: media_root.clone(),
            },
            StorageMode::Remote {
                bucket,
                region,
                access_key_id,
                secret_access_key,
            } => ExecutionProfile::Remote {
                bucket: bucket.clone(),
                credentials: RemoteCredentials {
                    access_key_id: access_key_id.clone(),
                    secret_access_key: secret_access_key.clone(),
                    region: region.clone(),
                },
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub claim_lease: Duration,
}

impl Settings {
    pub fn render_service_config(&self) -> RenderServiceConfig {
        RenderServiceConfig {
            sources: self.sources.templates(),
            layout: self.storage.output_layout(),
            claim_lease: self.dispatch.claim_lease,
        }
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("VELLUM").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_command_overrides(cli.command.as_ref());

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    jobs: RawJobsSettings,
    renderer: RawRendererSettings,
    sources: RawSourceSettings,
    storage: RawStorageSettings,
    dispatch: RawDispatchSettings,
}

impl RawSettings {
    fn apply_command_overrides(&mut self, command: Option<&Command>) {
        match command {
            Some(Command::Serve(args)) => self.apply_serve_overrides(&args.overrides),
            Some(Command::Worker(args)) => {
                self.apply_logging_overrides(&args.logging);
                self.apply_database_overrides(&args.database);
                self.apply_jobs_overrides(&args.jobs);
                self.apply_renderer_overrides(&args.renderer);
                self.apply_storage_overrides(&args.storage);
            }
            Some(Command::Execute(args)) => {
                self.apply_logging_overrides(&args.logging);
                self.apply_renderer_overrides(&args.renderer);
                self.apply_storage_overrides(&args.storage);
            }
            Some(Command::Migrate(args)) => {
                self.apply_logging_overrides(&args.logging);
                self.apply_database_overrides(&args.database);
            }
            None => self.apply_serve_overrides(&ServeOverrides::default()),
        }
    }

    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(seconds) = overrides.dispatch_claim_lease_seconds {
            self.dispatch.claim_lease_seconds = Some(seconds);
        }
        self.apply_logging_overrides(&overrides.logging);
        self.apply_database_overrides(&overrides.database);
        self.apply_jobs_overrides(&overrides.jobs);
        self.apply_renderer_overrides(&overrides.renderer);
        self.apply_storage_overrides(&overrides.storage);
    }

    fn apply_logging_overrides(&mut self, overrides: &LoggingOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }

    fn apply_database_overrides(&mut self, overrides: &DatabaseOverrides) {
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(max) = overrides.database_http_max_connections {
            self.database.http_max_connections = Some(max);
        }
        if let Some(max) = overrides.database_jobs_max_connections {
            self.database.jobs_max_connections = Some(max);
        }
    }

    fn apply_jobs_overrides(&mut self, overrides: &JobsOverrides) {
        if let Some(value) = overrides.jobs_render_concurrency {
            self.jobs.render_concurrency = Some(value);
        }
        if let Some(value) = overrides.jobs_max_attempts {
            self.jobs.max_attempts = Some(value);
        }
    }

    fn apply_renderer_overrides(&mut self, overrides: &RendererOverrides) {
        if let Some(image) = overrides.renderer_image.as_ref() {
            self.renderer.image = Some(image.clone());
        }
        if let Some(command) = overrides.renderer_command.as_ref() {
            self.renderer.command = Some(command.clone());
        }
    }

    fn apply_storage_overrides(&mut self, overrides: &StorageOverrides) {
        if let Some(remote) = overrides.storage_remote {
            self.storage.remote = Some(remote);
        }
        if let Some(root) = overrides.storage_media_root.as_ref() {
            self.storage.media_root = Some(root.clone());
        }
        if let Some(url) = overrides.storage_media_url.as_ref() {
            self.storage.media_url = Some(url.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            database,
            jobs,
            renderer,
            sources,
            storage,
            dispatch,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            database: build_database_settings(database)?,
            jobs: build_jobs_settings(jobs)?,
            renderer: build_renderer_settings(renderer)?,
            sources: build_source_settings(sources)?,
            storage: build_storage_settings(storage)?,
            dispatch: build_dispatch_settings(dispatch)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }
    let addr =
        parse_socket_addr(&host, port).map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = database.url.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    let http_value = database
        .http_max_connections
        .unwrap_or(DEFAULT_DB_HTTP_MAX_CONNECTIONS);
    let jobs_value = database
        .jobs_max_connections
        .unwrap_or(DEFAULT_DB_JOBS_MAX_CONNECTIONS);

    Ok(DatabaseSettings {
        url,
        http_max_connections: non_zero_u32(http_value.into(), "database.http_max_connections")?,
        jobs_max_connections: non_zero_u32(jobs_value.into(), "database.jobs_max_connections")?,
    })
}

fn build_jobs_settings(jobs: RawJobsSettings) -> Result<JobsSettings, LoadError> {
    let concurrency = jobs
        .render_concurrency
        .unwrap_or(DEFAULT_JOB_RENDER_CONCURRENCY);
    let max_attempts = jobs.max_attempts.unwrap_or(DEFAULT_JOB_MAX_ATTEMPTS);
    let max_attempts = non_zero_u32(max_attempts.into(), "jobs.max_attempts")?;
    if i32::try_from(max_attempts.get()).is_err() {
        return Err(LoadError::invalid(
            "jobs.max_attempts",
            "value exceeds supported range for i32",
        ));
    }

    Ok(JobsSettings {
        render_concurrency: non_zero_u32(concurrency.into(), "jobs.render_concurrency")?,
        max_attempts,
    })
}

fn build_renderer_settings(renderer: RawRendererSettings) -> Result<RendererSettings, LoadError> {
    let image = non_empty(renderer.image, DEFAULT_RENDERER_IMAGE, "renderer.image")?;
    let command = non_empty(renderer.command, DEFAULT_RENDERER_COMMAND, "renderer.command")?;
    Ok(RendererSettings { image, command })
}

fn build_source_settings(sources: RawSourceSettings) -> Result<SourceSettings, LoadError> {
    let arxiv_url_format = non_empty(
        sources.arxiv_url_format,
        DEFAULT_ARXIV_URL_FORMAT,
        "sources.arxiv_url_format",
    )?;
    let submission_url_format = non_empty(
        sources.submission_url_format,
        DEFAULT_SUBMISSION_URL_FORMAT,
        "sources.submission_url_format",
    )?;

    for (key, format) in [
        ("sources.arxiv_url_format", &arxiv_url_format),
        ("sources.submission_url_format", &submission_url_format),
    ] {
        if !format.contains(SOURCE_ID_PLACEHOLDER) {
            return Err(LoadError::invalid(
                key,
                format!("template must contain `{SOURCE_ID_PLACEHOLDER}`"),
            ));
        }
    }

    Ok(SourceSettings {
        arxiv_url_format,
        submission_url_format,
    })
}

fn build_storage_settings(storage: RawStorageSettings) -> Result<StorageSettings, LoadError> {
    if storage.remote.unwrap_or(false) {
        let bucket = required(storage.bucket, "storage.bucket")?;
        let region = required(storage.region, "storage.region")?;
        let access_key_id = required(storage.access_key_id, "storage.access_key_id")?;
        let secret_access_key = required(storage.secret_access_key, "storage.secret_access_key")?;
        let media_url = storage
            .media_url
            .unwrap_or_else(|| format!("https://{bucket}.s3.amazonaws.com/"));

        return Ok(StorageSettings {
            mode: StorageMode::Remote {
                bucket,
                region,
                access_key_id,
                secret_access_key,
            },
            media_url,
        });
    }

    let media_root = storage
        .media_root
        .unwrap_or_else(|| PathBuf::from(DEFAULT_MEDIA_ROOT));
    if media_root.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "storage.media_root",
            "path must not be empty",
        ));
    }
    // Bind mounts need an absolute host path.
    let media_root = if media_root.is_absolute() {
        media_root
    } else {
        std::env::current_dir()
            .map_err(|err| {
                LoadError::invalid(
                    "storage.media_root",
                    format!("cannot resolve relative path: {err}"),
                )
            })?
            .join(media_root)
    };

    Ok(StorageSettings {
        mode: StorageMode::Local { media_root },
        media_url: storage
            .media_url
            .unwrap_or_else(|| DEFAULT_LOCAL_MEDIA_URL.to_string()),
    })
}

fn build_dispatch_settings(dispatch: RawDispatchSettings) -> Result<DispatchSettings, LoadError> {
    let lease = dispatch
        .claim_lease_seconds
        .unwrap_or(DEFAULT_CLAIM_LEASE_SECS);
    if lease == 0 {
        return Err(LoadError::invalid(
            "dispatch.claim_lease_seconds",
            "must be greater than zero",
        ));
    }
    Ok(DispatchSettings {
        claim_lease: Duration::from_secs(lease),
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    http_max_connections: Option<u32>,
    jobs_max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawJobsSettings {
    render_concurrency: Option<u32>,
    max_attempts: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRendererSettings {
    image: Option<String>,
    command: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSourceSettings {
    arxiv_url_format: Option<String>,
    submission_url_format: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStorageSettings {
    remote: Option<bool>,
    media_root: Option<PathBuf>,
    media_url: Option<String>,
    bucket: Option<String>,
    region: Option<String>,
    access_key_id: Option<String>,
    secret_access_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDispatchSettings {
    claim_lease_seconds: Option<u64>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn non_empty(
    value: Option<String>,
    default: &str,
    key: &'static str,
) -> Result<String, LoadError> {
    let value = value.unwrap_or_else(|| default.to_string());
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(LoadError::invalid(key, "must not be empty"));
    }
    Ok(trimmed.to_string())
}

fn required(value: Option<String>, key: &'static str) -> Result<String, LoadError> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| LoadError::invalid(key, "required when storage.remote is enabled"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[cfg(test)]
mod tests;
