//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{net::SocketAddr, num::NonZeroU32, path::PathBuf, str::FromStr, time::Duration};

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::ids::MAX_NODE_ID;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "fanfeed";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 10;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 25;
const DEFAULT_DB_MIN_CONNECTIONS: u32 = 5;
const DEFAULT_TOPIC: &str = "post-events";
const DEFAULT_DEAD_LETTER_TOPIC: &str = "dead-letter-events";
const DEFAULT_PARTITIONS: u32 = 8;
const DEFAULT_GROUP_ID: &str = "feed-processor-group";
const DEFAULT_POLL_INTERVAL_MS: u64 = 100;
const DEFAULT_PRODUCER_BATCH_SIZE: u32 = 100;
const DEFAULT_PRODUCER_BATCH_TIMEOUT_MS: u64 = 10;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 100;
const DEFAULT_FETCH_BACKOFF_INITIAL_MS: u64 = 100;
const DEFAULT_FETCH_BACKOFF_MAX_MS: u64 = 30_000;
const DEFAULT_CONSUMER_INSTANCES: u32 = 1;
const DEFAULT_CELEBRITY_THRESHOLD: u64 = 10_000;
const DEFAULT_INSERT_CHUNK_SIZE: u32 = 500;
const DEFAULT_CACHE_TTL_SECS: u64 = 300;
const DEFAULT_CACHE_CAPACITY: u32 = 10_000;
const DEFAULT_NODE_ID: u16 = 1;

/// Command-line arguments for the fanfeed binary.
#[derive(Debug, Parser)]
#[command(name = "fanfeed", version, about = "Fan-out-on-write feed service")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "FANFEED_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP API and the feed processor in one process.
    Serve(Box<ServeArgs>),
    /// Run only the HTTP API.
    Api(Box<ServeArgs>),
    /// Run only the feed processor (consumer loops).
    Processor(Box<ServeArgs>),
    /// Dead-letter topic tools.
    Dlq(DlqArgs),
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Serve(_) => "serve",
            Command::Api(_) => "api",
            Command::Processor(_) => "processor",
            Command::Dlq(_) => "dlq",
        }
    }
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct DatabaseOverride {
    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,
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

    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,

    /// Override the store backend (postgres|memory).
    #[arg(long = "storage-backend", value_name = "BACKEND")]
    pub storage_backend: Option<String>,

    /// Override the broker backend (postgres|memory).
    #[arg(long = "broker-backend", value_name = "BACKEND")]
    pub broker_backend: Option<String>,

    /// Override the number of consumer loops in this process.
    #[arg(long = "consumer-instances", value_name = "COUNT")]
    pub consumer_instances: Option<u32>,

    /// Group member index of this process's first consumer loop.
    #[arg(long = "consumer-member-offset", value_name = "INDEX")]
    pub consumer_member_offset: Option<u32>,

    /// Total consumer loops in the group across all processes.
    #[arg(long = "consumer-group-size", value_name = "COUNT")]
    pub consumer_group_size: Option<u32>,

    /// Override the ID generator node identifier (0-1023).
    #[arg(long = "node-id", value_name = "ID")]
    pub node_id: Option<u16>,
}

#[derive(Debug, Args, Clone)]
pub struct DlqArgs {
    #[command(subcommand)]
    pub command: DlqCommand,
}

#[derive(Debug, Subcommand, Clone)]
pub enum DlqCommand {
    /// Print dead-lettered messages without consuming them.
    Inspect(DlqToolArgs),
    /// Re-publish dead-lettered messages to their original topic.
    Replay(DlqToolArgs),
}

impl DlqCommand {
    pub fn args(&self) -> &DlqToolArgs {
        match self {
            DlqCommand::Inspect(args) | DlqCommand::Replay(args) => args,
        }
    }
}

#[derive(Debug, Args, Clone)]
pub struct DlqToolArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,

    /// Maximum number of messages to process.
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(usize))]
    pub limit: usize,

    /// Stop after this many seconds without a message.
    #[arg(long = "idle-seconds", default_value_t = 5)]
    pub idle_seconds: u64,
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub storage: StorageSettings,
    pub broker: BrokerSettings,
    pub producer: ProducerSettings,
    pub consumer: ConsumerSettings,
    pub fanout: FanoutSettings,
    pub cache: CacheSettings,
    pub ids: IdSettings,
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

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
    pub min_connections: u32,
}

/// Where stores or the broker keep their data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Postgres,
    Memory,
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Backend::Postgres),
            "memory" => Ok(Backend::Memory),
            other => Err(format!("unknown backend `{other}` (expected postgres|memory)")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub backend: Backend,
}

#[derive(Debug, Clone)]
pub struct BrokerSettings {
    pub backend: Backend,
    pub topic: String,
    /// `None` disables dead-lettering.
    pub dead_letter_topic: Option<String>,
    pub partitions: NonZeroU32,
    pub group_id: String,
    pub poll_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct ProducerSettings {
    pub batch_size: NonZeroU32,
    pub batch_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub max_retries: NonZeroU32,
    pub retry_backoff: Duration,
    pub fetch_backoff_initial: Duration,
    pub fetch_backoff_max: Duration,
    pub instances: NonZeroU32,
    /// Group member index of this process's first loop.
    pub member_offset: u32,
    /// Consumer loops in the group across every process.
    pub group_size: NonZeroU32,
}

impl ConsumerSettings {
    /// Group member indices of the loops this process runs.
    pub fn member_indices(&self) -> std::ops::Range<u32> {
        self.member_offset..self.member_offset + self.instances.get()
    }
}

#[derive(Debug, Clone)]
pub struct FanoutSettings {
    pub celebrity_threshold: u64,
    pub insert_chunk_size: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub ttl: Duration,
    pub capacity: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct IdSettings {
    pub node_id: u16,
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

    builder = builder.add_source(Environment::with_prefix("FANFEED").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args) | Command::Api(args) | Command::Processor(args)) => {
            raw.apply_serve_overrides(&args.overrides)
        }
        Some(Command::Dlq(args)) => raw.apply_database_override(&args.command.args().database),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    let settings = Settings::from_raw(raw)?;
    if let Some(command) = cli.command.as_ref() {
        settings.ensure_supported(command)?;
    }
    Ok(settings)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    storage: RawStorageSettings,
    broker: RawBrokerSettings,
    producer: RawProducerSettings,
    consumer: RawConsumerSettings,
    fanout: RawFanoutSettings,
    cache: RawCacheSettings,
    ids: RawIdSettings,
}

impl RawSettings {
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
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(backend) = overrides.storage_backend.as_ref() {
            self.storage.backend = Some(backend.clone());
        }
        if let Some(backend) = overrides.broker_backend.as_ref() {
            self.broker.backend = Some(backend.clone());
        }
        if let Some(instances) = overrides.consumer_instances {
            self.consumer.instances = Some(instances);
        }
        if let Some(offset) = overrides.consumer_member_offset {
            self.consumer.member_offset = Some(offset);
        }
        if let Some(size) = overrides.consumer_group_size {
            self.consumer.group_size = Some(size);
        }
        if let Some(node_id) = overrides.node_id {
            self.ids.node_id = Some(node_id);
        }
    }

    fn apply_database_override(&mut self, overrides: &DatabaseOverride) {
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            database,
            storage,
            broker,
            producer,
            consumer,
            fanout,
            cache,
            ids,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            database: build_database_settings(database)?,
            storage: build_storage_settings(storage)?,
            broker: build_broker_settings(broker)?,
            producer: build_producer_settings(producer)?,
            consumer: build_consumer_settings(consumer)?,
            fanout: build_fanout_settings(fanout)?,
            cache: build_cache_settings(cache)?,
            ids: build_id_settings(ids)?,
        })
    }

    /// Reject combinations a command cannot run with. A memory broker cannot
    /// connect an API process to a separate processor process.
    pub fn ensure_supported(&self, command: &Command) -> Result<(), LoadError> {
        let split_process = matches!(
            command,
            Command::Api(_) | Command::Processor(_) | Command::Dlq(_)
        );
        if split_process && self.broker.backend == Backend::Memory {
            return Err(LoadError::invalid(
                "broker.backend",
                format!(
                    "the memory broker is process-local; `{}` needs the postgres broker",
                    command.name()
                ),
            ));
        }
        Ok(())
    }

    /// Whether any component needs a database connection.
    pub fn requires_database(&self) -> bool {
        self.storage.backend == Backend::Postgres || self.broker.backend == Backend::Postgres
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
    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

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

    let max_connections = non_zero_u32(
        database
            .max_connections
            .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS)
            .into(),
        "database.max_connections",
    )?;
    let min_connections = database
        .min_connections
        .unwrap_or(DEFAULT_DB_MIN_CONNECTIONS);
    if min_connections > max_connections.get() {
        return Err(LoadError::invalid(
            "database.min_connections",
            "must not exceed database.max_connections",
        ));
    }

    Ok(DatabaseSettings {
        url,
        max_connections,
        min_connections,
    })
}

fn build_storage_settings(storage: RawStorageSettings) -> Result<StorageSettings, LoadError> {
    Ok(StorageSettings {
        backend: parse_backend(storage.backend, "storage.backend")?,
    })
}

fn build_broker_settings(broker: RawBrokerSettings) -> Result<BrokerSettings, LoadError> {
    let backend = parse_backend(broker.backend, "broker.backend")?;
    let topic = non_empty(broker.topic, DEFAULT_TOPIC, "broker.topic")?;
    let dead_letter_topic = match broker.dead_letter_topic {
        None => Some(DEFAULT_DEAD_LETTER_TOPIC.to_string()),
        Some(value) if value.trim().is_empty() => None,
        Some(value) => Some(value.trim().to_string()),
    };
    if dead_letter_topic.as_deref() == Some(topic.as_str()) {
        return Err(LoadError::invalid(
            "broker.dead_letter_topic",
            "must differ from broker.topic",
        ));
    }
    let partitions = non_zero_u32(
        broker.partitions.unwrap_or(DEFAULT_PARTITIONS).into(),
        "broker.partitions",
    )?;
    let group_id = non_empty(broker.group_id, DEFAULT_GROUP_ID, "broker.group_id")?;
    let poll_interval = positive_millis(
        broker.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS),
        "broker.poll_interval_ms",
    )?;

    Ok(BrokerSettings {
        backend,
        topic,
        dead_letter_topic,
        partitions,
        group_id,
        poll_interval,
    })
}

fn build_producer_settings(producer: RawProducerSettings) -> Result<ProducerSettings, LoadError> {
    Ok(ProducerSettings {
        batch_size: non_zero_u32(
            producer
                .batch_size
                .unwrap_or(DEFAULT_PRODUCER_BATCH_SIZE)
                .into(),
            "producer.batch_size",
        )?,
        batch_timeout: positive_millis(
            producer
                .batch_timeout_ms
                .unwrap_or(DEFAULT_PRODUCER_BATCH_TIMEOUT_MS),
            "producer.batch_timeout_ms",
        )?,
    })
}

fn build_consumer_settings(consumer: RawConsumerSettings) -> Result<ConsumerSettings, LoadError> {
    let max_retries = non_zero_u32(
        consumer.max_retries.unwrap_or(DEFAULT_MAX_RETRIES).into(),
        "consumer.max_retries",
    )?;
    let retry_backoff = Duration::from_millis(
        consumer
            .retry_backoff_ms
            .unwrap_or(DEFAULT_RETRY_BACKOFF_MS),
    );
    let fetch_backoff_initial = positive_millis(
        consumer
            .fetch_backoff_initial_ms
            .unwrap_or(DEFAULT_FETCH_BACKOFF_INITIAL_MS),
        "consumer.fetch_backoff_initial_ms",
    )?;
    let fetch_backoff_max = positive_millis(
        consumer
            .fetch_backoff_max_ms
            .unwrap_or(DEFAULT_FETCH_BACKOFF_MAX_MS),
        "consumer.fetch_backoff_max_ms",
    )?;
    if fetch_backoff_max < fetch_backoff_initial {
        return Err(LoadError::invalid(
            "consumer.fetch_backoff_max_ms",
            "must not be below consumer.fetch_backoff_initial_ms",
        ));
    }
    let instances = non_zero_u32(
        consumer
            .instances
            .unwrap_or(DEFAULT_CONSUMER_INSTANCES)
            .into(),
        "consumer.instances",
    )?;
    let member_offset = consumer.member_offset.unwrap_or(0);
    let group_size = match consumer.group_size {
        Some(size) => non_zero_u32(size.into(), "consumer.group_size")?,
        None if member_offset == 0 => instances,
        None => {
            return Err(LoadError::invalid(
                "consumer.group_size",
                "must be set when consumer.member_offset is set",
            ));
        }
    };
    if u64::from(member_offset) + u64::from(instances.get()) > u64::from(group_size.get()) {
        return Err(LoadError::invalid(
            "consumer.member_offset",
            "member_offset + instances must not exceed consumer.group_size",
        ));
    }

    Ok(ConsumerSettings {
        max_retries,
        retry_backoff,
        fetch_backoff_initial,
        fetch_backoff_max,
        instances,
        member_offset,
        group_size,
    })
}

fn build_fanout_settings(fanout: RawFanoutSettings) -> Result<FanoutSettings, LoadError> {
    let celebrity_threshold = fanout
        .celebrity_threshold
        .unwrap_or(DEFAULT_CELEBRITY_THRESHOLD);
    if celebrity_threshold == 0 {
        return Err(LoadError::invalid(
            "fanout.celebrity_threshold",
            "must be greater than zero",
        ));
    }

    Ok(FanoutSettings {
        celebrity_threshold,
        insert_chunk_size: non_zero_u32(
            fanout
                .insert_chunk_size
                .unwrap_or(DEFAULT_INSERT_CHUNK_SIZE)
                .into(),
            "fanout.insert_chunk_size",
        )?,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let ttl_seconds = cache.ttl_seconds.unwrap_or(DEFAULT_CACHE_TTL_SECS);
    if ttl_seconds == 0 {
        return Err(LoadError::invalid(
            "cache.ttl_seconds",
            "must be greater than zero",
        ));
    }

    Ok(CacheSettings {
        ttl: Duration::from_secs(ttl_seconds),
        capacity: non_zero_u32(
            cache.capacity.unwrap_or(DEFAULT_CACHE_CAPACITY).into(),
            "cache.capacity",
        )?,
    })
}

fn build_id_settings(ids: RawIdSettings) -> Result<IdSettings, LoadError> {
    let node_id = ids.node_id.unwrap_or(DEFAULT_NODE_ID);
    if node_id > MAX_NODE_ID {
        return Err(LoadError::invalid(
            "ids.node_id",
            format!("must be between 0 and {MAX_NODE_ID}"),
        ));
    }
    Ok(IdSettings { node_id })
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
    max_connections: Option<u32>,
    min_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStorageSettings {
    backend: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawBrokerSettings {
    backend: Option<String>,
    topic: Option<String>,
    dead_letter_topic: Option<String>,
    partitions: Option<u32>,
    group_id: Option<String>,
    poll_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawProducerSettings {
    batch_size: Option<u32>,
    batch_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawConsumerSettings {
    max_retries: Option<u32>,
    retry_backoff_ms: Option<u64>,
    fetch_backoff_initial_ms: Option<u64>,
    fetch_backoff_max_ms: Option<u64>,
    instances: Option<u32>,
    member_offset: Option<u32>,
    group_size: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawFanoutSettings {
    celebrity_threshold: Option<u64>,
    insert_chunk_size: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    ttl_seconds: Option<u64>,
    capacity: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawIdSettings {
    node_id: Option<u16>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn parse_backend(value: Option<String>, key: &'static str) -> Result<Backend, LoadError> {
    match value {
        Some(value) => value
            .parse()
            .map_err(|reason: String| LoadError::invalid(key, reason)),
        None => Ok(Backend::Postgres),
    }
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

fn positive_millis(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_millis(value))
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

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
