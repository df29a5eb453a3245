use std::{process, sync::Arc, time::Duration};

use fanfeed::{
    application::{
        error::AppError,
        fanout::{FanoutConfig, FanoutHandler},
        feed::FeedService,
        follows::FollowService,
        metrics::PipelineMetrics,
        posts::PostService,
        repos::{FeedsRepo, FollowersRepo, HealthRepo, IdempotencyRepo, PostsRepo},
    },
    broker::{
        ConsumerConfig, ConsumerLoop, Message, MessageReader, MessageWriter, Producer,
        ProducerConfig,
        dead_letter::{self, HEADER_ERROR, HEADER_FAILED_AT, HEADER_ORIGINAL_TOPIC},
        memory::MemoryBroker,
        postgres::PostgresBroker,
    },
    cache::{CacheConfig, MemoryFeedCache},
    config::{self, Backend},
    ids::SnowflakeGenerator,
    infra::{
        db::PostgresRepositories,
        error::InfraError,
        http::{self, HttpState},
        memory::MemoryRepositories,
        metrics::MetricsRecorder,
        telemetry,
    },
};
use futures::future::join_all;
use serde::Serialize;
use sqlx::PgPool;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;
use uuid::Uuid;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_services(settings, Role::All).await,
        config::Command::Api(_) => run_services(settings, Role::Api).await,
        config::Command::Processor(_) => run_services(settings, Role::Processor).await,
        config::Command::Dlq(args) => run_dlq(settings, args.command).await,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    All,
    Api,
    Processor,
}

impl Role {
    fn serves_http(self) -> bool {
        matches!(self, Role::All | Role::Api)
    }

    fn consumes(self) -> bool {
        matches!(self, Role::All | Role::Processor)
    }
}

struct Stores {
    posts: Arc<dyn PostsRepo>,
    followers: Arc<dyn FollowersRepo>,
    feeds: Arc<dyn FeedsRepo>,
    ledger: Arc<dyn IdempotencyRepo>,
    health: Arc<dyn HealthRepo>,
}

impl Stores {
    fn from_shared<R>(repos: Arc<R>) -> Self
    where
        R: PostsRepo + FollowersRepo + FeedsRepo + IdempotencyRepo + HealthRepo + 'static,
    {
        Self {
            posts: repos.clone(),
            followers: repos.clone(),
            feeds: repos.clone(),
            ledger: repos.clone(),
            health: repos,
        }
    }
}

#[derive(Clone)]
enum BrokerHandle {
    Memory(MemoryBroker),
    Postgres(PostgresBroker),
}

impl BrokerHandle {
    fn writer(&self) -> Arc<dyn MessageWriter> {
        match self {
            BrokerHandle::Memory(broker) => Arc::new(broker.clone()),
            BrokerHandle::Postgres(broker) => Arc::new(broker.clone()),
        }
    }

    async fn reader(
        &self,
        topic: &str,
        group_id: &str,
        member_index: u32,
        members: u32,
    ) -> Result<Arc<dyn MessageReader>, AppError> {
        match self {
            BrokerHandle::Memory(broker) => Ok(Arc::new(broker.reader(
                topic,
                group_id,
                member_index,
                members,
            ))),
            BrokerHandle::Postgres(broker) => {
                let reader = broker
                    .reader(topic, group_id, member_index, members)
                    .await
                    .map_err(|err| AppError::from(InfraError::from(err)))?;
                Ok(Arc::new(reader))
            }
        }
    }
}

async fn init_pool(settings: &config::Settings) -> Result<Option<PgPool>, AppError> {
    if !settings.requires_database() {
        return Ok(None);
    }

    let database_url = settings
        .database
        .url
        .as_ref()
        .ok_or_else(|| InfraError::configuration("database url is not configured"))
        .map_err(AppError::from)?;

    let pool = PostgresRepositories::connect(
        database_url,
        settings.database.max_connections.get(),
        settings.database.min_connections,
    )
    .await
    .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    PostgresRepositories::run_migrations(&pool)
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    Ok(Some(pool))
}

fn require_pool(pool: Option<&PgPool>) -> Result<PgPool, AppError> {
    pool.cloned().ok_or_else(|| {
        AppError::from(InfraError::configuration(
            "postgres backend selected without a database pool",
        ))
    })
}

fn init_stores(settings: &config::Settings, pool: Option<&PgPool>) -> Result<Stores, AppError> {
    match settings.storage.backend {
        Backend::Memory => Ok(Stores::from_shared(Arc::new(MemoryRepositories::new()))),
        Backend::Postgres => Ok(Stores::from_shared(Arc::new(PostgresRepositories::new(
            require_pool(pool)?,
        )))),
    }
}

fn init_broker(settings: &config::Settings, pool: Option<&PgPool>) -> Result<BrokerHandle, AppError> {
    let partitions = settings.broker.partitions.get();
    match settings.broker.backend {
        Backend::Memory => Ok(BrokerHandle::Memory(MemoryBroker::new(partitions))),
        Backend::Postgres => Ok(BrokerHandle::Postgres(PostgresBroker::new(
            require_pool(pool)?,
            partitions,
            settings.broker.poll_interval,
        ))),
    }
}

async fn run_services(settings: config::Settings, role: Role) -> Result<(), AppError> {
    let pool = init_pool(&settings).await?;
    let stores = init_stores(&settings, pool.as_ref())?;
    let broker = init_broker(&settings, pool.as_ref())?;
    let metrics: Arc<dyn PipelineMetrics> = Arc::new(MetricsRecorder);
    let shutdown = CancellationToken::new();

    info!(
        target = "fanfeed::startup",
        ?role,
        storage = ?settings.storage.backend,
        broker = ?settings.broker.backend,
        topic = %settings.broker.topic,
        "starting fanfeed"
    );

    let consumers = if role.consumes() {
        spawn_consumers(&settings, &stores, &broker, &metrics, &shutdown).await?
    } else {
        Vec::new()
    };

    let server = if role.serves_http() {
        let state = build_http_state(&settings, &stores, &broker, &metrics)?;
        Some(spawn_http(&settings, state, shutdown.clone()).await?)
    } else {
        None
    };

    tokio::spawn(cancel_on_signal(shutdown.clone()));

    let outcome = match server {
        Some(mut server) => {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    drain(&settings, Some(server), consumers).await;
                    Ok(())
                }
                result = &mut server => {
                    shutdown.cancel();
                    drain(&settings, None, consumers).await;
                    flatten_server_result(result)
                }
            }
        }
        None => {
            shutdown.cancelled().await;
            drain(&settings, None, consumers).await;
            Ok(())
        }
    };

    info!(target = "fanfeed::shutdown", "fanfeed stopped");
    outcome
}

fn build_http_state(
    settings: &config::Settings,
    stores: &Stores,
    broker: &BrokerHandle,
    metrics: &Arc<dyn PipelineMetrics>,
) -> Result<HttpState, AppError> {
    let ids = SnowflakeGenerator::new(settings.ids.node_id)
        .map_err(|err| AppError::from(InfraError::configuration(err.to_string())))?;

    let producer = Producer::spawn(
        broker.writer(),
        ProducerConfig {
            topic: settings.broker.topic.clone(),
            batch_size: settings.producer.batch_size.get() as usize,
            batch_timeout: settings.producer.batch_timeout,
        },
    );

    let cache = Arc::new(MemoryFeedCache::new(&CacheConfig::from(&settings.cache)));

    Ok(HttpState {
        posts: PostService::new(Arc::new(ids), producer),
        feeds: FeedService::new(stores.feeds.clone(), cache).with_metrics(metrics.clone()),
        follows: FollowService::new(stores.followers.clone()),
        health: stores.health.clone(),
    })
}

async fn spawn_http(
    settings: &config::Settings,
    state: HttpState,
    shutdown: CancellationToken,
) -> Result<JoinHandle<Result<(), AppError>>, AppError> {
    let router = http::build_router(state);
    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "fanfeed::http",
        addr = %settings.server.addr,
        "listening"
    );

    Ok(tokio::spawn(async move {
        axum::serve(listener, router.into_make_service())
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await
            .map_err(|err| AppError::unexpected(format!("server error: {err}")))
    }))
}

async fn spawn_consumers(
    settings: &config::Settings,
    stores: &Stores,
    broker: &BrokerHandle,
    metrics: &Arc<dyn PipelineMetrics>,
    shutdown: &CancellationToken,
) -> Result<Vec<JoinHandle<()>>, AppError> {
    let handler = Arc::new(
        FanoutHandler::new(
            stores.posts.clone(),
            stores.followers.clone(),
            stores.feeds.clone(),
            stores.ledger.clone(),
            FanoutConfig {
                celebrity_threshold: settings.fanout.celebrity_threshold,
                insert_chunk_size: settings.fanout.insert_chunk_size.get() as usize,
            },
        )
        .with_metrics(metrics.clone()),
    );

    let consumer_config = ConsumerConfig {
        max_retries: settings.consumer.max_retries.get(),
        retry_backoff: settings.consumer.retry_backoff,
        fetch_backoff_initial: settings.consumer.fetch_backoff_initial,
        fetch_backoff_max: settings.consumer.fetch_backoff_max,
        dead_letter_topic: settings.broker.dead_letter_topic.clone(),
    };

    let group_size = settings.consumer.group_size.get();
    let mut handles = Vec::with_capacity(settings.consumer.instances.get() as usize);
    for index in settings.consumer.member_indices() {
        let reader = broker
            .reader(
                &settings.broker.topic,
                &settings.broker.group_id,
                index,
                group_size,
            )
            .await?;
        let consumer = ConsumerLoop::new(
            format!("feed-processor-{index}"),
            reader,
            broker.writer(),
            handler.clone(),
            consumer_config.clone(),
        )
        .with_metrics(metrics.clone());

        let token = shutdown.clone();
        handles.push(tokio::spawn(async move { consumer.run(token).await }));
    }

    Ok(handles)
}

async fn cancel_on_signal(shutdown: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!(target = "fanfeed::shutdown", "shutdown signal received"),
        Err(err) => warn!(
            target = "fanfeed::shutdown",
            error = %err,
            "failed to listen for shutdown signal"
        ),
    }
    shutdown.cancel();
}

/// Wait for the server and consumer tasks, aborting whatever is still running
/// once the graceful shutdown window has passed.
async fn drain(
    settings: &config::Settings,
    server: Option<JoinHandle<Result<(), AppError>>>,
    consumers: Vec<JoinHandle<()>>,
) {
    let abort_handles: Vec<_> = consumers
        .iter()
        .map(JoinHandle::abort_handle)
        .chain(server.iter().map(JoinHandle::abort_handle))
        .collect();

    let wait = async {
        if let Some(server) = server
            && let Err(err) = flatten_server_result(server.await)
        {
            warn!(target = "fanfeed::shutdown", error = %err, "server stopped with error");
        }
        join_all(consumers).await;
    };

    if tokio::time::timeout(settings.server.graceful_shutdown, wait)
        .await
        .is_err()
    {
        warn!(
            target = "fanfeed::shutdown",
            timeout_secs = settings.server.graceful_shutdown.as_secs(),
            "graceful shutdown timed out; aborting remaining tasks"
        );
        for handle in abort_handles {
            handle.abort();
        }
    }
}

fn flatten_server_result(
    result: Result<Result<(), AppError>, tokio::task::JoinError>,
) -> Result<(), AppError> {
    result.map_err(|err| AppError::unexpected(format!("server task failed: {err}")))?
}

#[derive(Serialize)]
struct DeadLetterView<'a> {
    partition: u32,
    offset: i64,
    key: String,
    original_topic: Option<&'a str>,
    error: Option<&'a str>,
    failed_at: Option<&'a str>,
    value: serde_json::Value,
}

impl<'a> DeadLetterView<'a> {
    fn new(message: &'a Message) -> Self {
        let value = serde_json::from_slice(&message.value).unwrap_or_else(|_| {
            serde_json::Value::String(String::from_utf8_lossy(&message.value).into_owned())
        });
        Self {
            partition: message.partition,
            offset: message.offset,
            key: String::from_utf8_lossy(&message.key).into_owned(),
            original_topic: message.header_str(HEADER_ORIGINAL_TOPIC),
            error: message.header_str(HEADER_ERROR),
            failed_at: message.header_str(HEADER_FAILED_AT),
            value,
        }
    }
}

async fn run_dlq(settings: config::Settings, command: config::DlqCommand) -> Result<(), AppError> {
    let dead_letter_topic = settings
        .broker
        .dead_letter_topic
        .clone()
        .ok_or_else(|| AppError::validation("dead-lettering is disabled (broker.dead_letter_topic)"))?;

    let pool = init_pool(&settings).await?;
    let broker = init_broker(&settings, pool.as_ref())?;
    let args = command.args();
    let idle = Duration::from_secs(args.idle_seconds);

    match &command {
        config::DlqCommand::Inspect(_) => {
            let group_id = format!("{}-dlq-inspect-{}", settings.broker.group_id, Uuid::new_v4());
            let reader = broker.reader(&dead_letter_topic, &group_id, 0, 1).await?;
            let messages = dead_letter::inspect(reader.as_ref(), args.limit, idle)
                .await
                .map_err(AppError::from)?;

            for message in &messages {
                let line = serde_json::to_string(&DeadLetterView::new(message))
                    .map_err(|err| AppError::unexpected(err.to_string()))?;
                println!("{line}");
            }
            info!(
                target = "fanfeed::dlq",
                topic = %dead_letter_topic,
                count = messages.len(),
                "inspected dead letters"
            );
        }
        config::DlqCommand::Replay(_) => {
            let group_id = format!("{}-dlq-replay", settings.broker.group_id);
            let reader = broker.reader(&dead_letter_topic, &group_id, 0, 1).await?;
            let writer = broker.writer();
            let summary = dead_letter::replay(reader.as_ref(), writer.as_ref(), args.limit, idle)
                .await
                .map_err(AppError::from)?;

            println!("replayed {}", summary.replayed);
            if let Some(stop) = summary.stopped {
                return Err(AppError::unexpected(format!(
                    "replay stopped at dead letter {}/{}: {}",
                    stop.partition, stop.offset, stop.reason
                )));
            }
        }
    }

    Ok(())
}
