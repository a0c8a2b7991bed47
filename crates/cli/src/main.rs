mod digest;
mod metrics;

use std::path::PathBuf;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::signal;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nutsandbolts_core::{
    load_config, load_config_from_env, validate_config, CancellationToken, ChunkingConfig, Config,
    DurationChunker, OutputFormat, Pipeline, ProcessError, Queue,
};

use digest::{FileDigest, READ_BUFFER_SIZE};

/// Config file used when `NUTSANDBOLTS_CONFIG` is not set
const DEFAULT_CONFIG_PATH: &str = "nutsandbolts.toml";

#[tokio::main]
async fn main() {
    let code = match run().await {
        Ok(()) => 0,
        Err(e) => {
            error!("Fatal error: {:#}", e);
            1
        }
    };
    // A cancelled run can leave the stdin reader blocked; exit without
    // waiting for it.
    std::process::exit(code);
}

async fn run() -> Result<()> {
    // Initialize logging; stdout carries the results
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = load()?;
    validate_config(&config).context("Configuration validation failed")?;
    info!(
        workers = config.process.workers,
        format = ?config.output.format,
        "Configuration loaded"
    );

    let input: Queue<String> = Queue::bounded(config.process.input_capacity);
    let output: Queue<FileDigest> = Queue::bounded(config.process.output_capacity);
    let cancel = CancellationToken::new();

    let reader = tokio::spawn(read_paths(input.clone()));
    let printer = tokio::spawn(print_results(
        output.clone(),
        config.output.format,
        config.chunking.clone(),
    ));

    let interrupt = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        warn!("Interrupted, cancelling run");
        interrupt.cancel();
    });

    // One read buffer per worker, reused across files
    let buffers = (0..config.process.workers).map(|_| vec![0u8; READ_BUFFER_SIZE]);
    let result = Pipeline::new(buffers)
        .named(config.process.name.clone())
        .with_cancellation(cancel)
        .run_and_send(&input, &output, digest::digest_line)
        .await;

    // The output queue is closed either way, so the printer finishes.
    let printed = printer.await.context("Printer task failed")?;

    if config.output.print_metrics {
        match metrics::encode_metrics() {
            Ok(text) => eprint!("{}", text),
            Err(e) => warn!("Failed to encode metrics: {}", e),
        }
    }

    match result {
        Ok(summary) => {
            let read = reader.await.context("Reader task failed")??;
            let printed = printed?;
            info!(
                lines = read,
                digested = summary.forwarded,
                printed,
                "Done"
            );
            Ok(())
        }
        Err(ProcessError::Cancelled) => {
            reader.abort();
            anyhow::bail!("Run cancelled")
        }
        Err(e) => {
            reader.abort();
            if let Err(print_error) = printed {
                debug!("Printer also failed: {:#}", print_error);
            }
            Err(e).context("Digest run failed")
        }
    }
}

/// Loads the config file, or defaults plus environment overrides when the
/// default file does not exist.
fn load() -> Result<Config> {
    let explicit = std::env::var("NUTSANDBOLTS_CONFIG").ok().map(PathBuf::from);
    let config_path = explicit
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

    if explicit.is_none() && !config_path.exists() {
        info!("No config file found, using defaults");
        return load_config_from_env().context("Failed to load config from environment");
    }

    info!("Loading configuration from {:?}", config_path);
    load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))
}

/// Sends every stdin line to `input`, closing it at end of input.
async fn read_paths(input: Queue<String>) -> Result<u64> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut read = 0;

    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        if input.send(line).await.is_err() {
            debug!("Input queue closed, stopping reader");
            break;
        }
        read += 1;
    }

    input.close();
    Ok(read)
}

/// Prints results until the output queue is closed and drained, writing
/// and flushing once per chunking window.
///
/// On a write error the queue is closed, which aborts the run.
async fn print_results(
    output: Queue<FileDigest>,
    format: OutputFormat,
    chunking: ChunkingConfig,
) -> Result<u64> {
    let batches = DurationChunker::from_config(output.clone(), &chunking);
    let printed = write_batches(&batches, format).await;
    if printed.is_err() {
        output.close();
    }
    printed
}

async fn write_batches(
    batches: &DurationChunker<FileDigest>,
    format: OutputFormat,
) -> Result<u64> {
    let mut stdout = tokio::io::stdout();
    let mut printed = 0;

    while let Some(batch) = batches.recv().await {
        let mut text = String::new();
        for digest in &batch {
            text.push_str(&digest.render(format).context("Failed to render result")?);
            text.push('\n');
        }
        stdout
            .write_all(text.as_bytes())
            .await
            .context("Failed to write to stdout")?;
        stdout.flush().await.context("Failed to flush stdout")?;
        printed += batch.len() as u64;
        debug!(batch = batch.len(), "Printed results");
    }

    Ok(printed)
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
