use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use inboxpulse::application::usecases::{HandleEventUseCase, IntakeLoop, RelayOutboxUseCase};
use inboxpulse::application::{
    Accumulator, AppError, AppResult, Classifier, Clock, DebounceGate, DispatchSink,
    GateSettings, MessageSource, Outbox, SharedStore, SystemClock, TtlMutex,
};
use inboxpulse::domain::KeySpace;
use inboxpulse::infrastructure::{
    classifiers::{FixedClassifier, KeywordClassifier},
    http_classifier::HttpClassifier,
    log_sink::LogDispatchSink,
    memory_queue::InMemoryQueue,
    memory_store::InMemorySharedStore,
    multi_sink::MultiDispatchSink,
    sqlite_store::SqliteSharedStore,
    webhook_sink::WebhookDispatchSink,
};
use inboxpulse::interfaces::config::{ClassifierCfg, Config, QueueCfg, StoreCfg};
use inboxpulse::interfaces::http_api::{self, ApiState};
use inboxpulse::interfaces::stdin_feed;

#[derive(Parser, Debug)]
#[command(name = "inboxpulse")]
struct Args {
    /// Path to config.yaml
    #[arg(long, default_value = "config.yaml")]
    config: String,

    /// Only log notifications, never call external sinks
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(
                "inboxpulse=info"
                    .parse()
                    .expect("static directive is valid"),
            ),
        )
        .init();
    if dotenvy::dotenv().is_err() {
        let _ = dotenvy::from_path(std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join(".env"));
    }
    let args = Args::parse();

    // 1) load config
    let cfg = match Config::load_from_file(&args.config) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to load config {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // 2) build infra
    let store: Arc<dyn SharedStore> = match &cfg.store {
        StoreCfg::Memory => {
            tracing::warn!("in-memory store: state is per-process and lost on restart");
            Arc::new(InMemorySharedStore::new())
        }
        StoreCfg::Sqlite { url } => match SqliteSharedStore::new(url).await {
            Ok(s) => Arc::new(s),
            Err(e) => {
                tracing::error!("Failed to open store {url}: {e}");
                std::process::exit(1);
            }
        },
    };

    let classifier: Arc<dyn Classifier> = match &cfg.classifier {
        ClassifierCfg::Fixed { priority } => Arc::new(FixedClassifier::new(*priority)),
        ClassifierCfg::Keyword => Arc::new(KeywordClassifier::new()),
        ClassifierCfg::Http { endpoint, token } => {
            Arc::new(HttpClassifier::new(endpoint.clone(), token.clone()))
        }
    };

    // sinks fanout
    let mut sinks = MultiDispatchSink::new();
    sinks.add("log", Box::new(LogDispatchSink::new()));

    if !args.dry_run {
        if let Some(hook) = &cfg.webhook_url {
            sinks.add("webhook", Box::new(WebhookDispatchSink::new(hook.clone())));
        } else {
            tracing::warn!("webhook_url not set, webhook sink disabled");
        }
    } else {
        tracing::warn!("--dry-run enabled: only log output");
    }
    tracing::info!(channels = ?sinks.channel_names(), "dispatch channels ready");
    let sink: Arc<dyn DispatchSink> = Arc::new(sinks);

    // 3) core
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let keys = KeySpace::new(cfg.key_prefix.clone());
    let accumulator = Accumulator::new(store.clone(), keys.clone(), cfg.processed_ttl());
    let outbox = Outbox::new(store.clone(), keys.outbox());
    let gate = Arc::new(DebounceGate::new(
        accumulator.clone(),
        TtlMutex::new(store.clone()),
        sink.clone(),
        outbox.clone(),
        clock.clone(),
        GateSettings {
            threshold: cfg.threshold,
            window: cfg.debounce_window(),
            dispatch_timeout: cfg.dispatch_timeout(),
        },
    ));
    let handler = Arc::new(HandleEventUseCase {
        classifier,
        accumulator: accumulator.clone(),
        gate: gate.clone(),
        scope_mode: cfg.scope,
        clock,
    });
    let intake = IntakeLoop {
        handler,
        prefetch: cfg.intake.prefetch,
        max_deliveries: cfg.intake.max_deliveries,
    };
    let relay = RelayOutboxUseCase {
        outbox,
        sink,
        store: store.clone(),
        lease_key: keys.relay_lease(),
        max_attempts: cfg.outbox.max_attempts,
        dispatch_timeout: cfg.dispatch_timeout(),
    };

    // 4) lifecycle
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);
    {
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown requested");
                let _ = shutdown_tx.send(true);
            }
        });
    }

    let relay_interval = Duration::from_secs(cfg.outbox.interval_seconds.max(1));
    let relay_task = {
        let rx = shutdown_rx.clone();
        tokio::spawn(async move { relay.run(relay_interval, rx).await })
    };

    let http_task = cfg.http.as_ref().map(|http| {
        let state = ApiState {
            accumulator,
            gate,
            api_token: http.api_token.clone(),
        };
        let listen = http.listen.clone();
        let rx = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = http_api::serve(&listen, state, rx).await {
                tracing::error!("admin api failed: {e}");
            }
        })
    });

    let mut source = match open_source(&cfg).await {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Failed to open queue: {e}");
            std::process::exit(1);
        }
    };

    // 5) run
    tracing::info!(
        scope = ?cfg.scope,
        threshold = cfg.threshold,
        debounce_seconds = cfg.debounce_seconds,
        "intake started"
    );
    let result = intake.run(source.as_mut(), shutdown_rx).await;

    let _ = shutdown_tx.send(true);
    drop(source);
    let _ = relay_task.await;
    if let Some(task) = http_task {
        let _ = task.await;
    }
    store.close().await;

    match result {
        Ok(stats) => tracing::info!(?stats, "intake completed"),
        Err(e) => {
            tracing::error!("Intake failed: {e}");
            std::process::exit(1);
        }
    }
}

async fn open_source(cfg: &Config) -> AppResult<Box<dyn MessageSource>> {
    match &cfg.queue {
        QueueCfg::Stdin => {
            let queue = InMemoryQueue::new();
            let consumer = queue.consumer();
            tokio::spawn(async move {
                if let Err(e) = stdin_feed::feed_from_stdin(queue).await {
                    tracing::error!("stdin feed failed: {e}");
                }
            });
            Ok(Box::new(consumer))
        }
        QueueCfg::Nats { .. } => open_nats(cfg).await,
    }
}

#[cfg(feature = "nats")]
async fn open_nats(cfg: &Config) -> AppResult<Box<dyn MessageSource>> {
    use inboxpulse::infrastructure::nats_queue::{JetStreamSettings, JetStreamSource};

    let QueueCfg::Nats {
        url,
        stream,
        subject,
        consumer,
        dead_letter_subject,
    } = &cfg.queue
    else {
        return Err(AppError::Config("queue is not nats".into()));
    };
    let settings = JetStreamSettings {
        url: url.clone(),
        stream: stream.clone(),
        subject: subject.clone(),
        consumer: consumer.clone(),
        dead_letter_subject: dead_letter_subject.clone(),
        prefetch: cfg.intake.prefetch,
        max_deliveries: cfg.intake.max_deliveries,
    };
    Ok(Box::new(JetStreamSource::connect(&settings).await?))
}

#[cfg(not(feature = "nats"))]
async fn open_nats(_cfg: &Config) -> AppResult<Box<dyn MessageSource>> {
    Err(AppError::Config(
        "queue kind `nats` needs a build with the `nats` feature".into(),
    ))
}
