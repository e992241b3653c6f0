//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    net::SocketAddr,
    num::{NonZeroU32, NonZeroU64},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

mod cli;

pub use cli::{CliArgs, Command, OneShotArgs, ServeArgs, ServeOverrides, StorageOverrides};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "watchlazy";
const ENV_PREFIX: &str = "WATCHLAZY";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PUBLIC_PORT: u16 = 8000;
const DEFAULT_ADMIN_PORT: u16 = 8001;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_DB_ACQUIRE_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_CACHE_REMOTE_TIMEOUT_MS: u64 = 250;
const DEFAULT_CACHE_REMOTE_POOL_SIZE: u32 = 8;
const DEFAULT_CACHE_REMOTE_NAMESPACE: &str = "watchlazy";
const DEFAULT_MOVIE_RELATED_CAPACITY: u32 = 200;
const DEFAULT_TOP_RATED_CAPACITY: u32 = 10;
const DEFAULT_BROWSE_CAPACITY: u32 = 100;
const DEFAULT_SEARCH_CAPACITY: u32 = 50;
const DEFAULT_MOVIE_RELATED_TTL_SECS: u64 = 600;
const DEFAULT_TOP_RATED_TTL_SECS: u64 = 600;
const DEFAULT_BROWSE_TTL_SECS: u64 = 300;
const DEFAULT_SEARCH_TTL_SECS: u64 = 300;
const DEFAULT_SNAPSHOT_PATH: &str = "cache/movies.json";
const DEFAULT_SNAPSHOT_TTL_SECS: u64 = 6 * 60 * 60;
const DEFAULT_SOURCE_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_SOURCE_MAX_RETRIES: u32 = 3;
const DEFAULT_SOURCE_BACKOFF_BASE_MS: u64 = 1_000;
const DEFAULT_SOURCE_MIN_INTERVAL_MS: u64 = 1_000;
const DEFAULT_SOURCE_FETCH_LIMIT: u32 = 500;
const DEFAULT_INCREMENTAL_CADENCE_SECS: u64 = 60 * 60;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub cache: CacheSettings,
    pub snapshot: SnapshotSettings,
    pub sources: SourcesSettings,
    pub scheduler: SchedulerSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub public_addr: SocketAddr,
    pub admin_addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    /// `None` runs the catalog from the cache and snapshot only.
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
    pub acquire_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub remote_url: Option<String>,
    pub remote_timeout_ms: NonZeroU64,
    pub remote_pool_size: NonZeroU32,
    pub remote_namespace: String,
    pub movie_related_capacity: NonZeroU32,
    pub top_rated_capacity: NonZeroU32,
    pub browse_capacity: NonZeroU32,
    pub search_capacity: NonZeroU32,
    pub movie_related_ttl_secs: NonZeroU64,
    pub top_rated_ttl_secs: NonZeroU64,
    pub browse_ttl_secs: NonZeroU64,
    pub search_ttl_secs: NonZeroU64,
}

#[derive(Debug, Clone)]
pub struct SnapshotSettings {
    pub path: PathBuf,
    pub ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct FeedSettings {
    pub name: String,
    pub base_url: Url,
}

#[derive(Debug, Clone)]
pub struct SourcesSettings {
    pub feeds: Vec<FeedSettings>,
    pub timeout: Duration,
    pub max_retries: NonZeroU32,
    pub backoff_base: Duration,
    pub min_interval: Duration,
    pub fetch_limit: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub enabled: bool,
    pub incremental_cadence: Duration,
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

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Refresh(args)) | Some(Command::Incremental(args)) => {
            raw.apply_storage_overrides(&args.storage)
        }
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    cache: RawCacheSettings,
    snapshot: RawSnapshotSettings,
    sources: RawSourcesSettings,
    scheduler: RawSchedulerSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.public_port {
            self.server.public_port = Some(port);
        }
        if let Some(port) = overrides.admin_port {
            self.server.admin_port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(enabled) = overrides.scheduler_enabled {
            self.scheduler.enabled = Some(enabled);
        }
        if let Some(cadence) = overrides.scheduler_incremental_cadence_seconds {
            self.scheduler.incremental_cadence_seconds = Some(cadence);
        }

        self.apply_storage_overrides(&overrides.storage);
    }

    fn apply_storage_overrides(&mut self, overrides: &StorageOverrides) {
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(url) = overrides.cache_remote_url.as_ref() {
            self.cache.remote_url = Some(url.clone());
        }
        if let Some(path) = overrides.snapshot_path.as_ref() {
            self.snapshot.path = Some(path.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            database,
            cache,
            snapshot,
            sources,
            scheduler,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            database: build_database_settings(database)?,
            cache: build_cache_settings(cache)?,
            snapshot: build_snapshot_settings(snapshot)?,
            sources: build_sources_settings(sources)?,
            scheduler: build_scheduler_settings(scheduler)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let public_port = server.public_port.unwrap_or(DEFAULT_PUBLIC_PORT);
    if public_port == 0 {
        return Err(LoadError::invalid(
            "server.public_port",
            "port must be greater than zero",
        ));
    }

    let admin_port = server.admin_port.unwrap_or(DEFAULT_ADMIN_PORT);
    if admin_port == 0 {
        return Err(LoadError::invalid(
            "server.admin_port",
            "port must be greater than zero",
        ));
    }
    if admin_port == public_port {
        return Err(LoadError::invalid(
            "server.admin_port",
            "must differ from server.public_port",
        ));
    }

    let public_addr = parse_socket_addr(&host, public_port)
        .map_err(|reason| LoadError::invalid("server.public_addr", reason))?;
    let admin_addr = parse_socket_addr(&host, admin_port)
        .map_err(|reason| LoadError::invalid("server.admin_addr", reason))?;

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
        public_addr,
        admin_addr,
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
    let url = non_blank(database.url);

    let max_connections = non_zero_u32(
        database
            .max_connections
            .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS)
            .into(),
        "database.max_connections",
    )?;
    let acquire_timeout_ms = non_zero_u64(
        database
            .acquire_timeout_ms
            .unwrap_or(DEFAULT_DB_ACQUIRE_TIMEOUT_MS),
        "database.acquire_timeout_ms",
    )?;

    Ok(DatabaseSettings {
        url,
        max_connections,
        acquire_timeout: Duration::from_millis(acquire_timeout_ms.get()),
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let remote_url = non_blank(cache.remote_url);
    if let Some(url) = remote_url.as_deref() {
        Url::parse(url)
            .map_err(|err| LoadError::invalid("cache.remote_url", format!("invalid url: {err}")))?;
    }

    let remote_namespace = cache
        .remote_namespace
        .unwrap_or_else(|| DEFAULT_CACHE_REMOTE_NAMESPACE.to_string());
    if remote_namespace.trim().is_empty() || remote_namespace.contains(['*', '?', '[']) {
        return Err(LoadError::invalid(
            "cache.remote_namespace",
            "must be non-empty and free of glob characters",
        ));
    }

    Ok(CacheSettings {
        remote_url,
        remote_timeout_ms: non_zero_u64(
            cache
                .remote_timeout_ms
                .unwrap_or(DEFAULT_CACHE_REMOTE_TIMEOUT_MS),
            "cache.remote_timeout_ms",
        )?,
        remote_pool_size: non_zero_u32(
            cache
                .remote_pool_size
                .unwrap_or(DEFAULT_CACHE_REMOTE_POOL_SIZE)
                .into(),
            "cache.remote_pool_size",
        )?,
        remote_namespace,
        movie_related_capacity: non_zero_u32(
            cache
                .movie_related_capacity
                .unwrap_or(DEFAULT_MOVIE_RELATED_CAPACITY)
                .into(),
            "cache.movie_related_capacity",
        )?,
        top_rated_capacity: non_zero_u32(
            cache
                .top_rated_capacity
                .unwrap_or(DEFAULT_TOP_RATED_CAPACITY)
                .into(),
            "cache.top_rated_capacity",
        )?,
        browse_capacity: non_zero_u32(
            cache
                .browse_capacity
                .unwrap_or(DEFAULT_BROWSE_CAPACITY)
                .into(),
            "cache.browse_capacity",
        )?,
        search_capacity: non_zero_u32(
            cache
                .search_capacity
                .unwrap_or(DEFAULT_SEARCH_CAPACITY)
                .into(),
            "cache.search_capacity",
        )?,
        movie_related_ttl_secs: non_zero_u64(
            cache
                .movie_related_ttl_secs
                .unwrap_or(DEFAULT_MOVIE_RELATED_TTL_SECS),
            "cache.movie_related_ttl_secs",
        )?,
        top_rated_ttl_secs: non_zero_u64(
            cache
                .top_rated_ttl_secs
                .unwrap_or(DEFAULT_TOP_RATED_TTL_SECS),
            "cache.top_rated_ttl_secs",
        )?,
        browse_ttl_secs: non_zero_u64(
            cache.browse_ttl_secs.unwrap_or(DEFAULT_BROWSE_TTL_SECS),
            "cache.browse_ttl_secs",
        )?,
        search_ttl_secs: non_zero_u64(
            cache.search_ttl_secs.unwrap_or(DEFAULT_SEARCH_TTL_SECS),
            "cache.search_ttl_secs",
        )?,
    })
}

fn build_snapshot_settings(snapshot: RawSnapshotSettings) -> Result<SnapshotSettings, LoadError> {
    let path = snapshot
        .path
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SNAPSHOT_PATH));
    if path.as_os_str().is_empty() {
        return Err(LoadError::invalid("snapshot.path", "path must not be empty"));
    }

    let ttl_secs = non_zero_u64(
        snapshot.ttl_secs.unwrap_or(DEFAULT_SNAPSHOT_TTL_SECS),
        "snapshot.ttl_secs",
    )?;

    Ok(SnapshotSettings {
        path,
        ttl: Duration::from_secs(ttl_secs.get()),
    })
}

fn build_sources_settings(sources: RawSourcesSettings) -> Result<SourcesSettings, LoadError> {
    let mut feeds = Vec::with_capacity(sources.feeds.len());
    for feed in sources.feeds {
        let name = feed.name.trim().to_string();
        if name.is_empty() {
            return Err(LoadError::invalid("sources.feeds.name", "must not be empty"));
        }
        let base_url = Url::parse(feed.base_url.trim()).map_err(|err| {
            LoadError::invalid("sources.feeds.base_url", format!("`{name}`: {err}"))
        })?;
        if feeds.iter().any(|existing: &FeedSettings| existing.name == name) {
            return Err(LoadError::invalid(
                "sources.feeds.name",
                format!("duplicate feed `{name}`"),
            ));
        }
        feeds.push(FeedSettings { name, base_url });
    }

    let timeout_ms = non_zero_u64(
        sources.timeout_ms.unwrap_or(DEFAULT_SOURCE_TIMEOUT_MS),
        "sources.timeout_ms",
    )?;

    Ok(SourcesSettings {
        feeds,
        timeout: Duration::from_millis(timeout_ms.get()),
        max_retries: non_zero_u32(
            sources
                .max_retries
                .unwrap_or(DEFAULT_SOURCE_MAX_RETRIES)
                .into(),
            "sources.max_retries",
        )?,
        backoff_base: Duration::from_millis(
            sources
                .backoff_base_ms
                .unwrap_or(DEFAULT_SOURCE_BACKOFF_BASE_MS),
        ),
        min_interval: Duration::from_millis(
            sources
                .min_interval_ms
                .unwrap_or(DEFAULT_SOURCE_MIN_INTERVAL_MS),
        ),
        fetch_limit: non_zero_u32(
            sources
                .fetch_limit
                .unwrap_or(DEFAULT_SOURCE_FETCH_LIMIT)
                .into(),
            "sources.fetch_limit",
        )?,
    })
}

fn build_scheduler_settings(
    scheduler: RawSchedulerSettings,
) -> Result<SchedulerSettings, LoadError> {
    let cadence_seconds = scheduler
        .incremental_cadence_seconds
        .unwrap_or(DEFAULT_INCREMENTAL_CADENCE_SECS);
    if cadence_seconds == 0 {
        return Err(LoadError::invalid(
            "scheduler.incremental_cadence_seconds",
            "must be greater than zero",
        ));
    }

    Ok(SchedulerSettings {
        enabled: scheduler.enabled.unwrap_or(true),
        incremental_cadence: Duration::from_secs(cadence_seconds),
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    public_port: Option<u16>,
    admin_port: Option<u16>,
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
    max_connections: Option<u32>,
    acquire_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    remote_url: Option<String>,
    remote_timeout_ms: Option<u64>,
    remote_pool_size: Option<u32>,
    remote_namespace: Option<String>,
    movie_related_capacity: Option<u32>,
    top_rated_capacity: Option<u32>,
    browse_capacity: Option<u32>,
    search_capacity: Option<u32>,
    movie_related_ttl_secs: Option<u64>,
    top_rated_ttl_secs: Option<u64>,
    browse_ttl_secs: Option<u64>,
    search_ttl_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSnapshotSettings {
    path: Option<PathBuf>,
    ttl_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawFeedSettings {
    name: String,
    base_url: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSourcesSettings {
    feeds: Vec<RawFeedSettings>,
    timeout_ms: Option<u64>,
    max_retries: Option<u32>,
    backoff_base_ms: Option<u64>,
    min_interval_ms: Option<u64>,
    fetch_limit: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSchedulerSettings {
    enabled: Option<bool>,
    incremental_cadence_seconds: Option<u64>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
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

fn non_zero_u64(value: u64, key: &'static str) -> Result<NonZeroU64, LoadError> {
    NonZeroU64::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}
