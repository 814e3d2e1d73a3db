//! Header resolution and row decoding
//!
//! The first record of an upload names the columns. It is resolved once
//! into a `ColumnIndices` mapping that every later record is decoded
//! through. Price and size columns are registered in pairs per depth level:
//! a level whose price or size column is absent is not registered at all,
//! so a size can never attach to the wrong price.
//!
//! Level cells are lenient (empty, zero or unparseable levels are simply
//! omitted). Timestamps are strict: a record without both aborts the parse.

use csv::StringRecord;
use csv_core::ReadRecordResult;
use tracing::{debug, info};
use types::book::{BookLevel, Side, Snapshot};
use types::errors::IngestError;

use crate::config::MAX_BOOK_LEVELS;

const TS_RECV: &str = "ts_recv";
const TS_EVENT: &str = "ts_event";

/// Price and size column positions for one depth level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelColumns {
    pub price: usize,
    pub size: usize,
}

/// Column positions resolved from the header record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnIndices {
    pub ts_recv: usize,
    pub ts_event: usize,
    /// Registered bid levels, shallowest first.
    pub bid: Vec<LevelColumns>,
    /// Registered ask levels, shallowest first.
    pub ask: Vec<LevelColumns>,
}

impl ColumnIndices {
    /// Resolve the mapping from header field names.
    pub fn resolve<'a, I>(headers: I) -> Result<Self, IngestError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let normalized: Vec<String> = headers.into_iter().map(normalize_header).collect();
        let find = |name: &str| normalized.iter().position(|h| h == name);

        let ts_recv = find(TS_RECV);
        let ts_event = find(TS_EVENT);
        let (ts_recv, ts_event) = match (ts_recv, ts_event) {
            (Some(recv), Some(event)) => (recv, event),
            (recv, event) => {
                let missing: Vec<&str> = [(TS_RECV, recv), (TS_EVENT, event)]
                    .iter()
                    .filter(|(_, idx)| idx.is_none())
                    .map(|(name, _)| *name)
                    .collect();
                return Err(IngestError::MissingColumns {
                    reason: missing.join(", "),
                });
            }
        };

        let mut bid = Vec::new();
        let mut ask = Vec::new();

        for level in 0..MAX_BOOK_LEVELS {
            for side in [Side::Bid, Side::Ask] {
                let prefix = side.column_prefix();
                let price = find(&format!("{prefix}_px_{level:02}"));
                let size = find(&format!("{prefix}_sz_{level:02}"));

                match (price, size) {
                    (Some(price), Some(size)) => {
                        let levels = match side {
                            Side::Bid => &mut bid,
                            Side::Ask => &mut ask,
                        };
                        levels.push(LevelColumns { price, size });
                    }
                    (None, None) => {}
                    _ => debug!(
                        side = prefix,
                        level,
                        "Unpaired price/size column; level not registered"
                    ),
                }
            }
        }

        if bid.is_empty() && ask.is_empty() {
            return Err(IngestError::MissingColumns {
                reason: "no paired bid_px_NN/bid_sz_NN or ask_px_NN/ask_sz_NN columns".to_string(),
            });
        }

        info!(
            ts_recv,
            ts_event,
            bid_levels = bid.len(),
            ask_levels = ask.len(),
            "Resolved depth columns"
        );

        Ok(Self {
            ts_recv,
            ts_event,
            bid,
            ask,
        })
    }

    /// Decode one record into a snapshot. `line` is only used for errors.
    pub fn decode(&self, record: &StringRecord, line: u64) -> Result<Snapshot, IngestError> {
        let ts_recv = required_field(record, self.ts_recv, TS_RECV, line)?;
        let ts_event = required_field(record, self.ts_event, TS_EVENT, line)?;

        Ok(Snapshot {
            ts_recv,
            ts_event,
            bids: decode_levels(record, &self.bid),
            asks: decode_levels(record, &self.ask),
        })
    }
}

fn normalize_header(raw: &str) -> String {
    raw.trim().trim_start_matches('\u{feff}').trim().to_lowercase()
}

fn required_field(
    record: &StringRecord,
    index: usize,
    name: &str,
    line: u64,
) -> Result<String, IngestError> {
    match record.get(index).map(str::trim) {
        Some(value) if !value.is_empty() => Ok(value.to_string()),
        _ => Err(IngestError::MalformedRecord {
            line,
            reason: format!("missing {name}"),
        }),
    }
}

fn decode_levels(record: &StringRecord, columns: &[LevelColumns]) -> Vec<BookLevel> {
    columns
        .iter()
        .filter_map(|cols| decode_level(record.get(cols.price), record.get(cols.size)))
        .collect()
}

/// A level with a missing, blank or `"0"` price, or any value that does not
/// parse to a positive finite number, means no liquidity there.
fn decode_level(price: Option<&str>, size: Option<&str>) -> Option<BookLevel> {
    let price = price.map(str::trim).filter(|p| !p.is_empty() && *p != "0")?;
    let price: f64 = price.parse().ok()?;
    let size: f64 = size.map(str::trim).unwrap_or("0").parse().ok()?;
    BookLevel::new(price, size)
}

/// Splits framed lines into fields and decodes them.
///
/// The first line seen is the header; every later line becomes a snapshot.
/// One field splitter and one set of field buffers serve every line of the
/// upload, so steady-state decoding does not allocate per record beyond the
/// snapshot itself.
pub struct RowDecoder {
    splitter: csv_core::Reader,
    /// Unescaped field bytes of the current line.
    output: Vec<u8>,
    /// End offset of each field in `output`.
    ends: Vec<usize>,
    record: StringRecord,
    columns: Option<ColumnIndices>,
    lines_seen: u64,
}

impl RowDecoder {
    pub fn new() -> Self {
        Self {
            splitter: csv_core::ReaderBuilder::new().build(),
            output: vec![0; 1024],
            ends: vec![0; 64],
            record: StringRecord::new(),
            columns: None,
            lines_seen: 0,
        }
    }

    /// Feed one framed line.
    ///
    /// Returns `None` for the header line and a snapshot for every data line.
    pub fn decode_line(&mut self, line: &str) -> Result<Option<Snapshot>, IngestError> {
        self.lines_seen += 1;
        let line_no = self.lines_seen;

        self.split_fields(line.as_bytes())
            .map_err(|reason| IngestError::MalformedRecord { line: line_no, reason })?;

        if let Some(columns) = &self.columns {
            return columns.decode(&self.record, line_no).map(Some);
        }

        self.columns = Some(ColumnIndices::resolve(self.record.iter())?);
        Ok(None)
    }

    /// Split one line into `self.record`, trimming every field.
    ///
    /// A line is a complete record: the splitter is reset before it and sees
    /// end of input after it, so an unbalanced quote cannot leak into the
    /// next line.
    fn split_fields(&mut self, line: &[u8]) -> Result<(), String> {
        self.splitter.reset();
        let mut input = line;
        let mut out_len = 0;
        let mut ends_len = 0;

        loop {
            let (result, nin, nout, nend) = self.splitter.read_record(
                input,
                &mut self.output[out_len..],
                &mut self.ends[ends_len..],
            );
            input = &input[nin..];
            out_len += nout;
            ends_len += nend;

            match result {
                ReadRecordResult::InputEmpty => {}
                ReadRecordResult::OutputFull => {
                    let grown = self.output.len().max(1) * 2;
                    self.output.resize(grown, 0);
                }
                ReadRecordResult::OutputEndsFull => {
                    let grown = self.ends.len().max(1) * 2;
                    self.ends.resize(grown, 0);
                }
                ReadRecordResult::Record | ReadRecordResult::End => break,
            }
        }

        self.record.clear();
        let mut start = 0;
        for &end in &self.ends[..ends_len] {
            let field = std::str::from_utf8(&self.output[start..end])
                .map_err(|err| format!("field is not valid UTF-8: {err}"))?;
            self.record.push_field(field.trim());
            start = end;
        }

        Ok(())
    }

    /// Column mapping, once the header has been seen.
    pub fn columns(&self) -> Option<&ColumnIndices> {
        self.columns.as_ref()
    }

    pub fn lines_seen(&self) -> u64 {
        self.lines_seen
    }
}

impl Default for RowDecoder {
    fn default() -> Self {
        Self::new()
    }
}
