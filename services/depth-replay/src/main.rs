use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use depth_replay::config::{IngestConfig, QueryConfig, SessionStoreConfig};
use depth_replay::format::format_count;
use depth_replay::{BookIngester, IngestEvent, ReplayReader, SessionStore, UploadHandler};
use futures::stream::{self, Stream};
use serde_json::json;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

#[derive(Debug, Parser)]
#[command(about = "Ingest an order book depth CSV and replay a tick from it")]
struct Args {
    /// CSV export to ingest
    #[arg(long, short = 'i')]
    input: PathBuf,

    /// Bytes read from disk per chunk
    #[arg(long, env = "DEPTH_REPLAY_CHUNK_SIZE", default_value_t = 1024 * 1024)]
    chunk_size: usize,

    /// Tick to print; clamped into the dataset's range
    #[arg(long, short = 't', default_value_t = 0, allow_negative_numbers = true)]
    tick: i64,

    /// Lines buffered between framing and row decoding
    #[arg(long, env = "DEPTH_REPLAY_QUEUE_CAPACITY", default_value_t = 1024)]
    queue_capacity: usize,

    /// Levels per side in the printed snapshot
    #[arg(long, default_value_t = 25)]
    levels: usize,

    /// Print every history point instead of a summary
    #[arg(long, default_value_t = false)]
    full_history: bool,
}

/// Read `file` as a stream of chunks of at most `chunk_size` bytes.
fn file_chunks(file: File, chunk_size: usize) -> impl Stream<Item = io::Result<Vec<u8>>> {
    stream::unfold(Some(file), move |state| async move {
        let mut file = state?;
        let mut buf = vec![0u8; chunk_size];
        match file.read(&mut buf).await {
            Ok(0) => None,
            Ok(n) => {
                buf.truncate(n);
                Some((Ok(buf), Some(file)))
            }
            Err(err) => Some((Err(err), None)),
        }
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    tracing::info!(input = ?args.input, "Starting depth replay");

    let file = File::open(&args.input)
        .await
        .with_context(|| format!("open {:?}", args.input))?;
    let total_bytes = file.metadata().await.ok().map(|meta| meta.len());

    let store = Arc::new(SessionStore::new(SessionStoreConfig::default()));
    let ingester = BookIngester::new(IngestConfig {
        queue_capacity: args.queue_capacity,
        ..IngestConfig::default()
    });
    let handler = UploadHandler::new(ingester, Arc::clone(&store));

    let mut last_decile = 0;
    let receipt = handler
        .handle(
            Box::pin(file_chunks(file, args.chunk_size.max(1))),
            total_bytes,
            |event| match &event {
                IngestEvent::Progress(report) => {
                    let decile = report.percent_complete / 10;
                    if decile > last_decile {
                        last_decile = decile;
                        tracing::info!(percent = report.percent_complete, lines = report.lines_processed, "Progress");
                    }
                }
                IngestEvent::Complete { message, .. } => tracing::info!("{}", message),
                IngestEvent::Error { error } => tracing::error!("{}", error),
            },
        )
        .await
        .with_context(|| format!("ingest {:?}", args.input))?;

    let reader = ReplayReader::new(
        store,
        QueryConfig {
            max_view_levels: args.levels,
        },
    );
    let history = reader.history(&receipt.session_id)?;
    let snapshot = reader.snapshot(&receipt.session_id, args.tick)?;

    let history_json = if args.full_history {
        serde_json::to_value(&history)?
    } else {
        json!({
            "totalTicks": history.total_ticks,
            "points": history.history.len(),
            "first": history.history.first(),
            "last": history.history.last(),
        })
    };

    let elapsed_ms = receipt.stats.elapsed_ms as u64;
    let summary = json!({
        "sessionId": receipt.session_id,
        "totalTicks": receipt.total_ticks,
        "snapshots": format_count(receipt.total_ticks),
        "bytes": receipt.stats.bytes_processed,
        "lines": receipt.stats.lines_processed,
        "encoding": receipt.stats.encoding,
        "detectedEncoding": receipt.stats.detected_encoding,
        "hadReplacements": receipt.stats.had_replacements,
        "backpressureWaits": receipt.stats.backpressure_waits,
        "checksum": receipt.stats.checksum,
        "elapsedMs": elapsed_ms,
        "history": history_json,
        "snapshot": snapshot,
    });

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
