//! CLI tidebus
//!
//! Публикация событий, чтение топиков через очередь доставки, разовая
//! очистка устаревших записей и обслуживание файлового хранилища.

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tidebus::{
    config::StoreKind, init_logging, retention, Broker, EventStore, FileStore, QueueOptions,
    Settings,
};
use tracing::debug;

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_COMMIT"),
    ", built ",
    env!("BUILD_TIME"),
    ")"
);

/// Основная структура CLI аргументов
#[derive(Parser)]
#[command(name = "tidebus")]
#[command(version = VERSION)]
#[command(about = "Durable topic pub/sub with pull-based delivery queues", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Путь к файлу настроек
    #[arg(
        short,
        long,
        env = "TIDEBUS_CONFIG",
        help = "Файл настроек (по умолчанию ./tidebus.toml, если есть)"
    )]
    config: Option<PathBuf>,
    /// Включить подробный вывод (debug)
    #[arg(short, long, help = "Включить подробный вывод для отладки")]
    verbose: bool,
    /// Подавить большинство логов (только warn/error)
    #[arg(short = 'q', long, help = "Подавить логирование (только warn/error)")]
    quiet: bool,
    /// Подкоманда для выполнения
    #[command(subcommand)]
    command: Commands,
}

/// Подкоманды CLI
#[derive(Subcommand)]
enum Commands {
    /// Опубликовать событие
    #[command(alias = "pub")]
    Publish {
        #[arg(help = "Топик")]
        topic: String,
        #[arg(help = "Полезная нагрузка в JSON (например, '{\"id\": 1}')")]
        payload: String,
    },
    /// Читать события одного или нескольких топиков
    Tail {
        #[arg(required = true, help = "Топики")]
        topics: Vec<String>,
        #[arg(long, help = "Пропускать события, опубликованные до запуска")]
        only_new: bool,
        #[arg(short = 'n', long, help = "Остановиться после N событий")]
        limit: Option<usize>,
        #[arg(
            long,
            help = "Остановиться, если событий нет дольше MS миллисекунд"
        )]
        idle_timeout_ms: Option<u64>,
    },
    /// Удалить записи старше заданного возраста
    Purge {
        #[arg(help = "Топики (по умолчанию из настроек или все)")]
        topics: Vec<String>,
        #[arg(long, help = "Максимальный возраст записи в миллисекундах")]
        max_age_ms: Option<u64>,
    },
    /// Переписать журналы файлового хранилища без удалённых записей
    Compact {
        #[arg(help = "Топики (по умолчанию все)")]
        topics: Vec<String>,
    },
    /// Список топиков
    Topics,
}

/// Точка входа в CLI
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = match &cli.config {
        Some(path) => Settings::load_from(path.clone())
            .with_context(|| format!("load settings from {}", path.display()))?,
        None => Settings::load().context("load settings")?,
    };
    if cli.verbose {
        settings.logging.level = "debug".to_string();
    } else if cli.quiet {
        settings.logging.level = "warn".to_string();
    }
    settings.validate()?;

    let logging = init_logging(settings.logging.clone())?;
    debug!(?settings, "Settings loaded");

    let result = handle_command(&cli.command, &settings).await;
    logging.shutdown();

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

/// Обработчик выполнения команд
async fn handle_command(
    command: &Commands,
    settings: &Settings,
) -> Result<()> {
    match command {
        Commands::Publish { topic, payload } => publish(settings, topic, payload).await,
        Commands::Tail {
            topics,
            only_new,
            limit,
            idle_timeout_ms,
        } => {
            tail(
                settings,
                topics,
                *only_new,
                *limit,
                idle_timeout_ms.map(Duration::from_millis),
            )
            .await
        }
        Commands::Purge { topics, max_age_ms } => purge(settings, topics, *max_age_ms).await,
        Commands::Compact { topics } => compact(settings, topics).await,
        Commands::Topics => {
            let store = settings.store.open()?;
            for topic in store.topics().await? {
                println!("{topic}");
            }
            Ok(())
        }
    }
}

fn broker(settings: &Settings) -> Result<Arc<Broker<dyn EventStore>>> {
    let store = settings.store.open()?;
    Ok(Arc::new(Broker::with_shared_store(
        store,
        settings.broker_options(),
    )))
}

async fn publish(
    settings: &Settings,
    topic: &str,
    payload: &str,
) -> Result<()> {
    let payload: serde_json::Value =
        serde_json::from_str(payload).context("payload is not valid JSON")?;
    let event = broker(settings)?.publish_event(topic, payload).await?;
    println!("{}", event.key);
    Ok(())
}

async fn tail(
    settings: &Settings,
    topics: &[String],
    only_new: bool,
    limit: Option<usize>,
    idle_timeout: Option<Duration>,
) -> Result<()> {
    let broker = broker(settings)?;
    let options = QueueOptions { only_new };
    let queue = broker.delivery_queue(topics.to_vec(), options).await?;

    let mut received = 0usize;
    loop {
        if limit.is_some_and(|limit| received >= limit) {
            break;
        }

        let next = async {
            match idle_timeout {
                Some(idle) => tokio::time::timeout(idle, queue.next()).await.ok(),
                None => Some(queue.next().await),
            }
        };

        let outcome = tokio::select! {
            outcome = next => outcome,
            _ = tokio::signal::ctrl_c() => {
                debug!("Interrupted");
                None
            }
        };

        match outcome {
            Some(Ok(Some(event))) => {
                println!("{}", serde_json::to_string(&event)?);
                received += 1;
            }
            Some(Ok(None)) | None => break,
            Some(Err(err)) => {
                queue.close().await;
                return Err(err.into());
            }
        }
    }

    queue.close().await;
    debug!(received, "Tail finished");
    Ok(())
}

async fn purge(
    settings: &Settings,
    topics: &[String],
    max_age_ms: Option<u64>,
) -> Result<()> {
    let store = settings.store.open()?;
    let topics = if topics.is_empty() {
        settings.retention.topics.clone()
    } else {
        topics.to_vec()
    };
    let max_age = max_age_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| settings.retention.max_age());

    let report = retention::sweep(store.as_ref(), &topics, max_age).await?;
    println!(
        "removed {} entries from {} topics ({} failed)",
        report.removed, report.topics, report.failed
    );
    if report.failed > 0 {
        bail!("{} entries could not be removed", report.failed);
    }
    Ok(())
}

async fn compact(
    settings: &Settings,
    topics: &[String],
) -> Result<()> {
    if settings.store.kind != StoreKind::File {
        bail!("compaction applies to the file store only");
    }
    let store = FileStore::open(
        &settings.store.data_dir,
        &settings.store.namespace,
        settings.store.sync,
    )?;
    let topics = if topics.is_empty() {
        store.topics().await?
    } else {
        topics.to_vec()
    };
    for topic in &topics {
        let kept = store.compact(topic)?;
        println!("{topic}: {kept} entries");
    }
    Ok(())
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
