//! Streaming ingestion pipeline for order book depth CSV uploads
//!
//! Pulls raw byte chunks from the source, resolves the text encoding once
//! from a bounded sample of the leading bytes, frames lines, and hands them
//! over a bounded queue to the row decoder, which feeds the depth aggregator.
//! Both stages run cooperatively inside one task:
//!
//! ```text
//!  byte chunks ──► Encoding ──► LineFramer ──► [bounded queue] ──► RowDecoder ──► DepthAggregator
//!              (leading sample)     │                                                  │
//!                                   └──► progress callback                BookSeries ◄─┘
//! ```
//!
//! The pipeline suspends only while waiting for the next chunk or for the
//! decoder to drain the queue. Any hard failure drops both stages (and the
//! decoder state they own) and is returned as the single terminal error.

use std::io;
use std::time::Instant;

use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use types::errors::IngestError;

use crate::aggregator::{BookSeries, DepthAggregator};
use crate::backpressure::{record_queue, RecordReceiver, RecordSender};
use crate::config::IngestConfig;
use crate::encoding::{resolve_encoding, EncodingDecision, StreamDecoder};
use crate::framing::LineFramer;
use crate::schema::RowDecoder;

/// Progress of one ingestion, reported after every framed sub-batch.
///
/// Every field is non-decreasing across reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressReport {
    pub bytes_processed: u64,
    pub total_bytes: u64,
    pub lines_processed: u64,
    pub percent_complete: u8,
}

impl ProgressReport {
    pub fn new(bytes_processed: u64, total_bytes: u64, lines_processed: u64) -> Self {
        let percent = if total_bytes == 0 {
            0
        } else {
            (u128::from(bytes_processed) * 100 / u128::from(total_bytes)).min(100) as u8
        };

        Self {
            bytes_processed,
            total_bytes,
            lines_processed,
            percent_complete: percent,
        }
    }
}

/// Counters collected over one successful ingestion.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestStats {
    pub bytes_processed: u64,
    pub lines_processed: u64,
    pub snapshots: usize,
    pub history_points: usize,
    /// Times the framer waited on a full record queue.
    pub backpressure_waits: u64,
    /// Charset name reported by detection, if any.
    pub detected_encoding: Option<String>,
    /// Encoding the stream was decoded with.
    pub encoding: &'static str,
    /// Whether any malformed bytes were replaced during decoding.
    pub had_replacements: bool,
    pub checksum: String,
    pub elapsed_ms: u128,
}

/// A completed dataset plus how it was produced.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub series: BookSeries,
    pub stats: IngestStats,
}

/// What the framing stage knows once the source is exhausted.
struct FramingSummary {
    decision: Option<EncodingDecision>,
    encoding: &'static str,
    had_replacements: bool,
    bytes_processed: u64,
    lines_emitted: u64,
    backpressure_waits: u64,
}

/// Runs the ingestion pipeline for one upload at a time.
#[derive(Debug, Clone, Default)]
pub struct BookIngester {
    config: IngestConfig,
}

impl BookIngester {
    pub fn new(config: IngestConfig) -> Self {
        info!(
            max_batch_bytes = config.max_batch_bytes,
            max_line_bytes = config.max_line_bytes,
            queue_capacity = config.queue_capacity,
            target_bins = config.target_bins,
            "BookIngester initialized"
        );
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(IngestConfig::default())
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Ingest a complete byte stream into a snapshot series.
    ///
    /// `total_bytes` is the progress denominator; when unknown it is
    /// estimated from the first non-empty chunk. Returns `EmptyResult` for a
    /// stream that decodes to zero snapshots.
    pub async fn ingest<S, B, F>(
        &self,
        source: S,
        total_bytes: Option<u64>,
        on_progress: F,
    ) -> Result<IngestOutcome, IngestError>
    where
        S: Stream<Item = io::Result<B>> + Unpin,
        B: AsRef<[u8]>,
        F: FnMut(ProgressReport),
    {
        let started = Instant::now();
        info!(total_bytes = ?total_bytes, "Starting depth CSV ingestion");

        let (sender, receiver) = record_queue(self.config.queue_capacity);
        let framing = self.frame_source(source, total_bytes, sender, on_progress);
        let decoding = decode_records(receiver, self.config.target_bins);

        let (summary, series) = match tokio::try_join!(framing, decoding) {
            Ok(done) => done,
            Err(err) if err.is_empty_result() => {
                warn!("Ingestion finished without any snapshots");
                return Err(err);
            }
            Err(err) => {
                error!(error = %err, "Ingestion aborted");
                return Err(err);
            }
        };

        let stats = IngestStats {
            bytes_processed: summary.bytes_processed,
            lines_processed: summary.lines_emitted,
            snapshots: series.total_ticks(),
            history_points: series.history.len(),
            backpressure_waits: summary.backpressure_waits,
            detected_encoding: summary.decision.and_then(|d| d.detected),
            encoding: summary.encoding,
            had_replacements: summary.had_replacements,
            checksum: series.checksum(),
            elapsed_ms: started.elapsed().as_millis(),
        };

        info!(
            snapshots = stats.snapshots,
            history_points = stats.history_points,
            bytes = stats.bytes_processed,
            lines = stats.lines_processed,
            backpressure_waits = stats.backpressure_waits,
            encoding = stats.encoding,
            checksum = %stats.checksum,
            elapsed_ms = stats.elapsed_ms as u64,
            "Ingestion complete"
        );

        Ok(IngestOutcome { series, stats })
    }

    /// Producer stage: decode and frame every chunk, enqueue lines, report
    /// progress. Stops quietly if the decoder hangs up, since the decoder's
    /// own error is what gets reported.
    ///
    /// Raw bytes are held back until a full detection sample (or the whole
    /// stream, if shorter) has arrived, so the chosen encoding never depends
    /// on how the source happens to chunk its first bytes.
    async fn frame_source<S, B, F>(
        &self,
        mut source: S,
        total_hint: Option<u64>,
        queue: RecordSender,
        on_progress: F,
    ) -> Result<FramingSummary, IngestError>
    where
        S: Stream<Item = io::Result<B>> + Unpin,
        B: AsRef<[u8]>,
        F: FnMut(ProgressReport),
    {
        let config = &self.config;
        let sample_len = config.encoding_sample_bytes.max(1);
        let mut total_bytes = total_hint.filter(|&total| total > 0);
        let mut decision: Option<EncodingDecision> = None;
        let mut framer_slot: Option<LineFramer> = None;
        let mut pending: Vec<u8> = Vec::new();
        let mut stage = FramingStage {
            config,
            queue,
            on_progress,
            lines: Vec::new(),
            since_yield: 0,
            next_log_at: config.progress_log_bytes.max(1),
        };

        while let Some(chunk) = source.next().await {
            let chunk = chunk.map_err(|err| {
                error!(error = %err, "Byte source failed");
                IngestError::from(err)
            })?;
            let bytes = chunk.as_ref();
            if bytes.is_empty() {
                continue;
            }
            let total = *total_bytes.get_or_insert(bytes.len() as u64);

            let held;
            let input: &[u8] = match framer_slot {
                Some(_) => bytes,
                None if pending.is_empty() && bytes.len() >= sample_len => bytes,
                None => {
                    pending.extend_from_slice(bytes);
                    if pending.len() < sample_len {
                        continue;
                    }
                    held = std::mem::take(&mut pending);
                    &held
                }
            };

            let framer = framer_slot.get_or_insert_with(|| {
                let (resolved, framer) = open_framer(input, config);
                decision = Some(resolved);
                framer
            });
            if !stage.feed(framer, input, total).await? {
                return Ok(summarize(decision, framer, &stage.queue));
            }
        }

        if framer_slot.is_none() && !pending.is_empty() {
            let held = std::mem::take(&mut pending);
            let total = total_bytes.unwrap_or(held.len() as u64);
            let framer = framer_slot.get_or_insert_with(|| {
                let (resolved, framer) = open_framer(&held, config);
                decision = Some(resolved);
                framer
            });
            if !stage.feed(framer, &held, total).await? {
                return Ok(summarize(decision, framer, &stage.queue));
            }
        }

        let Some(framer) = framer_slot.as_mut() else {
            debug!("Byte source produced no data");
            return Ok(FramingSummary {
                decision,
                encoding: encoding_rs::UTF_8.name(),
                had_replacements: false,
                bytes_processed: 0,
                lines_emitted: 0,
                backpressure_waits: stage.queue.backpressure_waits(),
            });
        };

        framer.finish(&mut stage.lines);
        let flushed = !stage.lines.is_empty();
        stage.send_lines().await;

        if flushed {
            if let Some(total) = total_bytes {
                (stage.on_progress)(ProgressReport::new(
                    framer.bytes_processed(),
                    total,
                    framer.lines_emitted(),
                ));
            }
        }

        Ok(summarize(decision, framer, &stage.queue))
    }
}

/// Detect the encoding on `sample` and build the framer for the upload.
fn open_framer(sample: &[u8], config: &IngestConfig) -> (EncodingDecision, LineFramer) {
    let resolved = resolve_encoding(sample, config);
    let framer = LineFramer::new(StreamDecoder::new(resolved.encoding), config);
    (resolved, framer)
}

/// Queue, progress sink and counters of the framing stage.
struct FramingStage<'a, F> {
    config: &'a IngestConfig,
    queue: RecordSender,
    on_progress: F,
    lines: Vec<String>,
    since_yield: usize,
    next_log_at: u64,
}

impl<F> FramingStage<'_, F>
where
    F: FnMut(ProgressReport),
{
    /// Frame `bytes` batch by batch, enqueueing lines and reporting progress
    /// after each batch. `Ok(false)` once the decoder has hung up.
    async fn feed(&mut self, framer: &mut LineFramer, bytes: &[u8], total: u64) -> Result<bool, IngestError> {
        for batch in framer.batches(bytes) {
            framer.push_batch(batch, &mut self.lines)?;

            if !self.send_lines().await {
                debug!("Decoder stage closed the record queue; stopping framing");
                return Ok(false);
            }

            let report = ProgressReport::new(framer.bytes_processed(), total, framer.lines_emitted());
            (self.on_progress)(report);

            if report.bytes_processed >= self.next_log_at {
                self.next_log_at = report.bytes_processed + self.config.progress_log_bytes.max(1);
                info!(
                    percent = report.percent_complete,
                    bytes = report.bytes_processed,
                    total = report.total_bytes,
                    lines = report.lines_processed,
                    "Ingestion progress"
                );
            }
        }

        Ok(true)
    }

    /// Enqueue every framed line, yielding to the scheduler periodically.
    /// `false` if the queue closed.
    async fn send_lines(&mut self) -> bool {
        let yield_every = self.config.yield_every_lines.max(1);

        for line in self.lines.drain(..) {
            if self.queue.send(line).await.is_err() {
                return false;
            }
            self.since_yield += 1;
            if self.since_yield >= yield_every {
                self.since_yield = 0;
                tokio::task::yield_now().await;
            }
        }

        true
    }
}

fn summarize(
    decision: Option<EncodingDecision>,
    framer: &LineFramer,
    queue: &RecordSender,
) -> FramingSummary {
    FramingSummary {
        decision,
        encoding: framer.decoder().encoding_name(),
        had_replacements: framer.decoder().had_replacements(),
        bytes_processed: framer.bytes_processed(),
        lines_emitted: framer.lines_emitted(),
        backpressure_waits: queue.backpressure_waits(),
    }
}

/// Consumer stage: decode every framed line and aggregate the snapshots.
async fn decode_records(mut queue: RecordReceiver, target_bins: usize) -> Result<BookSeries, IngestError> {
    let mut rows = RowDecoder::new();
    let mut aggregator = DepthAggregator::new(target_bins);

    while let Some(line) = queue.recv().await {
        match rows.decode_line(&line) {
            Ok(Some(snapshot)) => aggregator.push(snapshot),
            Ok(None) => {}
            Err(err) => {
                error!(
                    error = %err,
                    line = rows.lines_seen(),
                    snapshots = aggregator.len(),
                    "Row decoding failed"
                );
                return Err(err);
            }
        }
    }

    debug!(
        lines = queue.lines_received(),
        snapshots = aggregator.len(),
        "Record queue drained"
    );

    aggregator.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use types::book::BookLevel;

    const EXAMPLE: &str = "ts_recv,ts_event,bid_px_00,bid_sz_00,ask_px_00,ask_sz_00\n\
                           2024-01-01T00:00:00Z,2024-01-01T00:00:00.001Z,100.5,10,101.0,8\n";

    fn chunks(data: &[u8], size: usize) -> Vec<io::Result<Vec<u8>>> {
        data.chunks(size).map(|c| Ok(c.to_vec())).collect()
    }

    async fn ingest_chunks(
        ingester: &BookIngester,
        data: &[u8],
        size: usize,
    ) -> (Result<IngestOutcome, IngestError>, Vec<ProgressReport>) {
        let mut reports = Vec::new();
        let result = ingester
            .ingest(stream::iter(chunks(data, size)), Some(data.len() as u64), |p| reports.push(p))
            .await;
        (result, reports)
    }

    #[test]
    fn test_progress_percent_floor_and_clamp() {
        assert_eq!(ProgressReport::new(0, 1000, 0).percent_complete, 0);
        assert_eq!(ProgressReport::new(999, 1000, 0).percent_complete, 99);
        assert_eq!(ProgressReport::new(1000, 1000, 0).percent_complete, 100);
        assert_eq!(ProgressReport::new(5000, 1000, 0).percent_complete, 100);
        assert_eq!(ProgressReport::new(10, 0, 0).percent_complete, 0);
    }

    #[test]
    fn test_progress_report_serializes_camel_case() {
        let json = serde_json::to_value(ProgressReport::new(50, 100, 3)).unwrap();
        assert_eq!(json["bytesProcessed"], 50);
        assert_eq!(json["totalBytes"], 100);
        assert_eq!(json["linesProcessed"], 3);
        assert_eq!(json["percentComplete"], 50);
    }

    #[tokio::test]
    async fn test_example_file() {
        let ingester = BookIngester::with_defaults();
        let (result, reports) = ingest_chunks(&ingester, EXAMPLE.as_bytes(), 4096).await;
        let outcome = result.unwrap();
        let series = outcome.series;

        assert_eq!(series.total_ticks(), 1);
        assert_eq!(series.snapshots[0].bids, vec![BookLevel::new(100.5, 10.0).unwrap()]);
        assert_eq!(series.snapshots[0].asks, vec![BookLevel::new(101.0, 8.0).unwrap()]);
        assert_eq!(series.bid_depth, vec![10.0]);
        assert_eq!(series.ask_depth, vec![8.0]);
        assert_eq!(series.history.len(), 1);

        assert_eq!(outcome.stats.lines_processed, 2);
        assert_eq!(outcome.stats.encoding, "UTF-8");
        assert_eq!(reports.last().unwrap().percent_complete, 100);
    }

    #[tokio::test]
    async fn test_progress_is_monotonic() {
        let mut data = String::from("ts_recv,ts_event,bid_px_00,bid_sz_00\n");
        for i in 0..500 {
            data.push_str(&format!("r{i},e{i},100,{}\n", i + 1));
        }
        let ingester = BookIngester::new(IngestConfig {
            max_batch_bytes: 256,
            ..IngestConfig::default()
        });

        let (result, reports) = ingest_chunks(&ingester, data.as_bytes(), 1000).await;
        assert_eq!(result.unwrap().series.total_ticks(), 500);

        assert!(reports.len() > 10);
        for pair in reports.windows(2) {
            assert!(pair[1].bytes_processed >= pair[0].bytes_processed);
            assert!(pair[1].lines_processed >= pair[0].lines_processed);
            assert!(pair[1].percent_complete >= pair[0].percent_complete);
            assert_eq!(pair[1].total_bytes, pair[0].total_bytes);
        }
        let last = reports.last().unwrap();
        assert_eq!(last.bytes_processed, data.len() as u64);
        assert_eq!(last.lines_processed, 501);
    }

    #[tokio::test]
    async fn test_total_estimated_from_first_chunk() {
        let ingester = BookIngester::with_defaults();
        let data = EXAMPLE.as_bytes();
        let mut reports = Vec::new();
        ingester
            .ingest(stream::iter(chunks(data, 16)), None, |p| reports.push(p))
            .await
            .unwrap();

        assert!(reports.iter().all(|r| r.total_bytes == 16));
        assert_eq!(reports.last().unwrap().percent_complete, 100);
    }

    #[tokio::test]
    async fn test_final_line_without_terminator() {
        let data = EXAMPLE.trim_end();
        let ingester = BookIngester::with_defaults();
        let (result, _) = ingest_chunks(&ingester, data.as_bytes(), 7).await;
        assert_eq!(result.unwrap().series.total_ticks(), 1);
    }

    #[tokio::test]
    async fn test_tiny_queue_applies_backpressure() {
        let mut data = String::from("ts_recv,ts_event,ask_px_00,ask_sz_00\n");
        for i in 0..200 {
            data.push_str(&format!("r{i},e{i},101,2\n"));
        }
        let ingester = BookIngester::new(IngestConfig {
            queue_capacity: 1,
            yield_every_lines: 10,
            ..IngestConfig::default()
        });

        let (result, _) = ingest_chunks(&ingester, data.as_bytes(), data.len()).await;
        let outcome = result.unwrap();
        assert_eq!(outcome.series.total_ticks(), 200);
        assert!(outcome.stats.backpressure_waits > 0);
        assert!(outcome.series.ask_depth.iter().all(|&d| d == 2.0));
    }

    #[tokio::test]
    async fn test_header_only_is_empty_result() {
        let ingester = BookIngester::with_defaults();
        let (result, _) = ingest_chunks(&ingester, b"ts_recv,ts_event,bid_px_00,bid_sz_00\n", 64).await;
        assert_eq!(result.unwrap_err(), IngestError::EmptyResult);
    }

    #[tokio::test]
    async fn test_empty_source_is_empty_result() {
        let ingester = BookIngester::with_defaults();
        let source = stream::iter(Vec::<io::Result<Vec<u8>>>::new());
        let err = ingester.ingest(source, None, |_| {}).await.unwrap_err();
        assert!(err.is_empty_result());
    }

    #[tokio::test]
    async fn test_missing_columns_aborts() {
        let ingester = BookIngester::with_defaults();
        let (result, _) = ingest_chunks(&ingester, b"time,price\n1,2\n", 64).await;
        assert!(matches!(result.unwrap_err(), IngestError::MissingColumns { .. }));
    }

    #[tokio::test]
    async fn test_malformed_record_aborts_whole_parse() {
        let mut data = String::from("ts_recv,ts_event,bid_px_00,bid_sz_00\n");
        for i in 0..50 {
            data.push_str(&format!("r{i},e{i},100,1\n"));
        }
        data.push_str(",e50,100,1\n");
        for i in 51..5000 {
            data.push_str(&format!("r{i},e{i},100,1\n"));
        }

        let ingester = BookIngester::new(IngestConfig {
            queue_capacity: 4,
            ..IngestConfig::default()
        });
        let (result, _) = ingest_chunks(&ingester, data.as_bytes(), 512).await;
        assert_eq!(
            result.unwrap_err(),
            IngestError::MalformedRecord {
                line: 52,
                reason: "missing ts_recv".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_line_too_long_aborts() {
        let ingester = BookIngester::new(IngestConfig {
            max_line_bytes: 1024,
            max_batch_bytes: 256,
            ..IngestConfig::default()
        });
        let mut data = b"ts_recv,ts_event,bid_px_00,bid_sz_00\n".to_vec();
        data.extend(std::iter::repeat(b'9').take(4096));

        let (result, _) = ingest_chunks(&ingester, &data, 512).await;
        assert!(matches!(result.unwrap_err(), IngestError::LineTooLong { limit: 1024, .. }));
    }

    #[tokio::test]
    async fn test_source_error_aborts() {
        let ingester = BookIngester::with_defaults();
        let source = stream::iter(vec![
            Ok(EXAMPLE.as_bytes().to_vec()),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "client went away")),
        ]);
        let err = ingester.ingest(source, None, |_| {}).await.unwrap_err();
        assert_eq!(
            err,
            IngestError::Source {
                message: "client went away".to_string()
            }
        );
    }

    /// `r{i}-Société` in windows-1252, where 0xE9 is 'é' and invalid UTF-8.
    fn windows_1252_csv(rows: usize) -> Vec<u8> {
        let mut data = b"ts_recv,ts_event,bid_px_00,bid_sz_00\n".to_vec();
        for i in 0..rows {
            data.extend_from_slice(format!("r{i}-Soci").as_bytes());
            data.extend_from_slice(&[0xE9, b't', 0xE9]);
            data.extend_from_slice(format!(",e{i},100,{}\n", i % 5 + 1).as_bytes());
        }
        data
    }

    #[tokio::test]
    async fn test_windows_1252_upload_decodes_text() {
        let data = windows_1252_csv(300);
        let ingester = BookIngester::with_defaults();
        let (result, _) = ingest_chunks(&ingester, &data, data.len()).await;
        let outcome = result.unwrap();

        assert_eq!(outcome.series.total_ticks(), 300);
        assert_eq!(outcome.series.snapshots[0].ts_recv, "r0-Société");
        assert_eq!(outcome.series.snapshots[299].ts_recv, "r299-Société");
        assert!(!outcome.stats.had_replacements);
        assert_ne!(outcome.stats.encoding, "UTF-8");
    }

    #[tokio::test]
    async fn test_windows_1252_small_first_chunks_match_single_chunk() {
        let data = windows_1252_csv(300);
        let ingester = BookIngester::with_defaults();

        let (whole, _) = ingest_chunks(&ingester, &data, data.len()).await;
        let whole = whole.unwrap().series;
        for size in [1, 16, 333] {
            let (chunked, _) = ingest_chunks(&ingester, &data, size).await;
            let chunked = chunked.unwrap().series;
            assert_eq!(chunked.snapshots[0].ts_recv, "r0-Société", "chunk size {}", size);
            assert_eq!(chunked, whole, "chunk size {}", size);
        }
    }

    #[tokio::test]
    async fn test_detection_sample_spans_many_chunks() {
        // Longer than the sample, so detection sees only the held prefix.
        let data = windows_1252_csv(300);
        let ingester = BookIngester::new(IngestConfig {
            encoding_sample_bytes: 2048,
            ..IngestConfig::default()
        });

        let (whole, _) = ingest_chunks(&ingester, &data, data.len()).await;
        let (chunked, _) = ingest_chunks(&ingester, &data, 7).await;
        assert_eq!(chunked.unwrap().series, whole.unwrap().series);
    }

    #[tokio::test]
    async fn test_progress_before_sample_is_complete_is_deferred() {
        let data = windows_1252_csv(50);
        let ingester = BookIngester::with_defaults();
        let (result, reports) = ingest_chunks(&ingester, &data, 64).await;

        assert_eq!(result.unwrap().series.total_ticks(), 50);
        assert!(!reports.is_empty());
        assert_eq!(reports.last().unwrap().bytes_processed, data.len() as u64);
        for pair in reports.windows(2) {
            assert!(pair[1].bytes_processed >= pair[0].bytes_processed);
        }
    }

    #[tokio::test]
    async fn test_utf16_upload_with_bom() {
        let text = EXAMPLE;
        let mut data = vec![0xFF, 0xFE];
        for unit in text.encode_utf16() {
            data.extend_from_slice(&unit.to_le_bytes());
        }

        let ingester = BookIngester::with_defaults();
        let (result, _) = ingest_chunks(&ingester, &data, 5).await;
        let outcome = result.unwrap();
        assert_eq!(outcome.series.snapshots[0].ts_recv, "2024-01-01T00:00:00Z");
        assert_eq!(outcome.stats.encoding, "UTF-16LE");
    }
}
