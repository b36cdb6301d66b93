use anyhow::Context;
use clap::Parser;
use futures::FutureExt;
use pipeline_producer::checkpoint::{Checkpoint, CheckpointManager};
use pipeline_producer::kafka::KafkaBroker;
use pipeline_producer::{Config, Message, Producer};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, BufReader, Lines};
use tokio::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// How long input may be idle before the producer is woken up.
const IDLE_WAKE_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Parser, Debug)]
#[command(name = "pipeline-producer")]
#[command(about = "Publish newline-delimited JSON to Kafka in ordered batches", long_about = None)]
struct Args {
    #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
    config: PathBuf,

    #[arg(short, long, default_value = "events", help = "Topic to publish to")]
    topic: String,

    #[arg(short, long, value_name = "FILE", help = "Read from FILE instead of stdin")]
    input: Option<PathBuf>,

    #[arg(short, long, help = "Enable JSON output for logs")]
    json_logs: bool,

    #[arg(short, long, help = "Verbose logging")]
    verbose: bool,
}

struct RunOptions {
    topic: String,
    checkpoints: Option<CheckpointManager>,
    checkpoint_interval: Duration,
    /// Input lines up to and including this one were published by a
    /// previous run.
    resume_after_line: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(args.json_logs, args.verbose);

    info!("Starting pipeline-producer");
    info!("Loading configuration from {:?}", args.config);

    let config = Config::from_file(&args.config)
        .with_context(|| format!("failed to load configuration from {:?}", args.config))?;

    info!(
        kafka_brokers = ?config.kafka.brokers,
        topic = %args.topic,
        worker_pool = config.producer.use_worker_pool,
        count_threshold = config.producer.count_threshold,
        time_threshold_ms = config.producer.time_threshold_ms,
        checkpoint_file = ?config.checkpoint.file,
        "Configuration summary"
    );

    let checkpoints = config.checkpoint.file.as_ref().map(CheckpointManager::new);
    let resumed = match &checkpoints {
        Some(manager) => manager.load().await?,
        None => None,
    };
    let resume_after_line = resumed
        .as_ref()
        .and_then(|checkpoint| checkpoint.position_data.last_published_message_position_info.as_ref())
        .and_then(|info| info.get("line"))
        .and_then(Value::as_u64)
        .unwrap_or(0);
    if resume_after_line > 0 {
        info!(line = resume_after_line, "Resuming input after checkpointed line");
    }

    let broker = KafkaBroker::new(&config.kafka).context("failed to create Kafka producer")?;
    let mut producer = Producer::new(config.producer.clone(), broker);
    if let Some(checkpoint) = resumed {
        producer = producer.with_position_data(checkpoint.position_data);
    }

    let input: Box<dyn AsyncRead + Unpin + Send> = match &args.input {
        Some(path) => Box::new(
            tokio::fs::File::open(path)
                .await
                .with_context(|| format!("failed to open input {:?}", path))?,
        ),
        None => Box::new(tokio::io::stdin()),
    };
    let mut lines = BufReader::new(input).lines();

    let options = RunOptions {
        topic: args.topic,
        checkpoints,
        checkpoint_interval: Duration::from_secs(config.checkpoint.interval_secs),
        resume_after_line,
    };

    producer
        .scoped(move |producer| {
            async move { publish_lines(producer, &mut lines, &options).await }.boxed()
        })
        .await?;

    info!("pipeline-producer finished");
    Ok(())
}

async fn publish_lines<R: AsyncBufRead + Unpin>(
    producer: &mut Producer<KafkaBroker>,
    lines: &mut Lines<R>,
    options: &RunOptions,
) -> pipeline_producer::Result<()> {
    let mut line_number = 0u64;
    let mut last_checkpoint = Instant::now();

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown requested");
                break;
            }
            next = tokio::time::timeout(IDLE_WAKE_INTERVAL, lines.next_line()) => match next {
                Ok(Ok(Some(line))) => {
                    line_number += 1;
                    if line_number <= options.resume_after_line || line.trim().is_empty() {
                        continue;
                    }
                    let value: Value = match serde_json::from_str(&line) {
                        Ok(value) => value,
                        Err(e) => {
                            warn!(line = line_number, "Skipping line that is not valid JSON: {}", e);
                            continue;
                        }
                    };
                    let message = Message::json(options.topic.as_str(), value)
                        .with_upstream_position_info(json!({ "line": line_number }));
                    producer.publish(message).await?;
                }
                Ok(Ok(None)) => break,
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => producer.wake().await?,
            }
        }

        if last_checkpoint.elapsed() >= options.checkpoint_interval {
            save_checkpoint(producer, options).await?;
            last_checkpoint = Instant::now();
        }
    }

    producer.flush().await?;
    save_checkpoint(producer, options).await
}

async fn save_checkpoint(
    producer: &Producer<KafkaBroker>,
    options: &RunOptions,
) -> pipeline_producer::Result<()> {
    let Some(manager) = &options.checkpoints else {
        return Ok(());
    };
    let position_data = (*producer.checkpoint_position_data()).clone();
    manager
        .save(&Checkpoint::new(position_data, producer.stats().messages_published))
        .await
}

fn init_logging(json: bool, verbose: bool) {
    let env_filter = if verbose {
        EnvFilter::new("pipeline_producer=debug,info")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("pipeline_producer=info,warn"))
    };

    let fmt_layer = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .with_span_list(false)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
