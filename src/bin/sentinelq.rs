//! sentinelq CLI: enqueue requests, inspect a queue, run a consumer.

use clap::{Parser, Subcommand};
use sentinelq::config::Config;
use sentinelq::engine::{CancelToken, Queue};
use sentinelq::error::HandlerError;
use sentinelq::model::QueuePayload;
use sentinelq::replay::ReplayHandler;
use sentinelq::telemetry::{TelemetryConfig, init_telemetry};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "sentinelq", about = "FIFO work queue over a key-value cache")]
struct Cli {
    /// Queue identifier (overrides QUEUE_IDENTIFIER)
    #[arg(long, global = true)]
    queue: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Append a request descriptor to the queue
    Enqueue {
        /// Target URL of the request
        address: String,
        /// HTTP method
        #[arg(long, default_value = "GET")]
        method: String,
        /// Authorization header value
        #[arg(long)]
        authorization: Option<String>,
        /// Cookie as name=value (repeatable)
        #[arg(long = "cookie", value_parser = parse_cookie)]
        cookies: Vec<(String, String)>,
        /// Request body
        #[arg(long)]
        body: Option<String>,
    },
    /// Show head, tail, and depth
    Status,
    /// Drain the queue until Ctrl-C
    Consume {
        /// Replay each payload as an HTTP request instead of logging it
        #[arg(long)]
        replay: bool,
        /// Stop on the first failed replay
        #[arg(long, requires = "replay")]
        stop_on_error: bool,
    },
}

fn parse_cookie(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(name, value)| (name.trim().to_string(), value.to_string()))
        .filter(|(name, _)| !name.is_empty())
        .ok_or_else(|| format!("expected name=value, got {raw:?}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config = Config::from_env()?;
    if let Some(queue) = cli.queue {
        config.queue_identifier = queue;
    }

    match cli.command {
        Command::Enqueue {
            address,
            method,
            authorization,
            cookies,
            body,
        } => {
            let mut payload = QueuePayload::new(address, method);
            payload.authorization = authorization;
            for (name, value) in cookies {
                payload = payload.cookie(name, value);
            }
            payload.request_body = body;
            cmd_enqueue(&config, payload).await
        }
        Command::Status => cmd_status(&config).await,
        Command::Consume {
            replay,
            stop_on_error,
        } => cmd_consume(config, replay, stop_on_error).await,
    }
}

async fn cmd_enqueue(config: &Config, payload: QueuePayload) -> anyhow::Result<()> {
    let store = config.store()?;
    let slot = store
        .add_request_to_queue(&config.queue_identifier, Some(&payload))
        .await?;
    println!("Enqueued: {} slot {slot}", config.queue_identifier);
    Ok(())
}

async fn cmd_status(config: &Config) -> anyhow::Result<()> {
    let store = config.store()?;
    let sentinels = store.get_sentinels(&config.queue_identifier).await?;

    println!("Queue:  {}", config.queue_identifier);
    println!("Head:   {}", sentinels.head);
    println!("Tail:   {}", sentinels.tail);
    println!("Depth:  {}", sentinels.depth());
    Ok(())
}

async fn log_payload(payload: QueuePayload, _cancel: CancelToken) -> Result<(), HandlerError> {
    tracing::info!(
        method = %payload.method,
        address = %payload.address,
        timestep = payload.timestep,
        "received"
    );
    Ok(())
}

async fn cmd_consume(config: Config, replay: bool, stop_on_error: bool) -> anyhow::Result<()> {
    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "sentinelq".to_string(),
        log_level: config.log_level.clone(),
    })?;

    let store = config.store()?;
    let queue = if replay {
        let handler = ReplayHandler::default().stop_on_error(stop_on_error);
        Queue::new(store, &config.queue_identifier, config.queue_config(), handler)
    } else {
        Queue::new(store, &config.queue_identifier, config.queue_config(), log_payload)
    };
    let queue = Arc::new(queue);

    let q = Arc::clone(&queue);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        q.cancel();
    });

    match queue.run().await {
        sentinelq::error::Error::Canceled => Ok(()),
        error => Err(error.into()),
    }
}
