//! Line framing over decoded byte batches
//!
//! Turns raw byte batches of any size into complete text lines. Decoded
//! text is appended to a carry-over buffer; every complete line is split
//! off and the trailing fragment waits for the next batch. Blank lines are
//! dropped here so the row decoder only ever sees records.
//!
//! Recognized terminators: `\r\n`, `\n` and a lone `\r`.

use tracing::error;
use types::errors::IngestError;

use crate::config::IngestConfig;
use crate::encoding::StreamDecoder;

/// Incremental line splitter owning the stream decoder for one upload.
pub struct LineFramer {
    decoder: StreamDecoder,
    /// Decoded text not yet terminated by a line break.
    carry: String,
    max_batch_bytes: usize,
    max_line_bytes: usize,
    bytes_processed: u64,
    lines_emitted: u64,
}

impl LineFramer {
    pub fn new(decoder: StreamDecoder, config: &IngestConfig) -> Self {
        Self {
            decoder,
            carry: String::new(),
            max_batch_bytes: config.max_batch_bytes.max(1),
            max_line_bytes: config.max_line_bytes,
            bytes_processed: 0,
            lines_emitted: 0,
        }
    }

    /// Split a raw chunk into the sub-batches it will be decoded in.
    pub fn batches<'a>(&self, chunk: &'a [u8]) -> std::slice::Chunks<'a, u8> {
        chunk.chunks(self.max_batch_bytes)
    }

    /// Decode one batch and append every completed non-blank line to `lines`.
    ///
    /// Fails once the unterminated remainder outgrows `max_line_bytes`.
    pub fn push_batch(&mut self, batch: &[u8], lines: &mut Vec<String>) -> Result<(), IngestError> {
        self.decoder.decode(batch, &mut self.carry);
        self.bytes_processed += batch.len() as u64;
        self.lines_emitted += split_lines(&mut self.carry, lines);

        if self.carry.len() > self.max_line_bytes {
            error!(
                buffered = self.carry.len(),
                limit = self.max_line_bytes,
                bytes_processed = self.bytes_processed,
                "Unterminated line exceeds limit"
            );
            return Err(IngestError::LineTooLong {
                buffered: self.carry.len(),
                limit: self.max_line_bytes,
            });
        }

        Ok(())
    }

    /// Flush the decoder and emit the final unterminated line, if any.
    pub fn finish(&mut self, lines: &mut Vec<String>) {
        self.decoder.finish(&mut self.carry);
        self.lines_emitted += split_lines(&mut self.carry, lines);

        let tail = std::mem::take(&mut self.carry);
        if !tail.trim().is_empty() {
            lines.push(tail);
            self.lines_emitted += 1;
        }
    }

    /// Raw bytes consumed so far.
    pub fn bytes_processed(&self) -> u64 {
        self.bytes_processed
    }

    /// Non-blank lines emitted so far.
    pub fn lines_emitted(&self) -> u64 {
        self.lines_emitted
    }

    /// Bytes currently held waiting for a line break.
    pub fn carry_len(&self) -> usize {
        self.carry.len()
    }

    pub fn decoder(&self) -> &StreamDecoder {
        &self.decoder
    }
}

/// Move every terminated line out of `carry` into `lines`, skipping blanks.
///
/// A `\r` at the very end of `carry` is treated as a terminator; if its `\n`
/// arrives in the next batch it only produces an empty line, which is skipped.
fn split_lines(carry: &mut String, lines: &mut Vec<String>) -> u64 {
    let bytes = carry.as_bytes();
    let mut emitted = 0;
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\n' | b'\r' => {
                let line = &carry[start..i];
                if !line.trim().is_empty() {
                    lines.push(line.to_string());
                    emitted += 1;
                }
                if bytes[i] == b'\r' && bytes.get(i + 1) == Some(&b'\n') {
                    i += 1;
                }
                i += 1;
                start = i;
            }
            _ => i += 1,
        }
    }

    carry.drain(..start);
    emitted
}
