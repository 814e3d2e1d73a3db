//! Encoding resolution for uploaded CSV bytes
//!
//! Runs statistical charset detection over a bounded sample of the first
//! chunk and builds a streaming decoder that is reused for the rest of the
//! upload. Detection never fails the parse: a weak guess or an encoding the
//! decoder cannot handle falls back to UTF-8.

use encoding_rs::{CoderResult, Decoder, Encoding, REPLACEMENT, UTF_8};
use tracing::{info, warn};
use types::errors::EncodingError;

use crate::config::IngestConfig;

/// Outcome of charset detection for one upload.
#[derive(Debug, Clone)]
pub struct EncodingDecision {
    /// Lower-cased charset name reported by the detector, if any.
    pub detected: Option<String>,
    /// Detector confidence in `[0, 1]`.
    pub confidence: f32,
    /// Encoding actually used to decode the stream.
    pub encoding: &'static Encoding,
    /// True when a confident guess could not be honored.
    pub fell_back: bool,
}

/// Detect the charset of `first_chunk` and pick the decoding for the stream.
pub fn resolve_encoding(first_chunk: &[u8], config: &IngestConfig) -> EncodingDecision {
    let sample_len = first_chunk.len().min(config.encoding_sample_bytes);
    let sample = first_chunk[..sample_len].to_vec();
    let (charset, confidence, _language) = chardet::detect(&sample);

    let detected = if charset.is_empty() {
        None
    } else {
        Some(charset.to_lowercase())
    };

    let decision = choose_encoding(detected, confidence, config.min_detection_confidence);

    info!(
        sample_bytes = sample_len,
        detected = decision.detected.as_deref().unwrap_or("none"),
        confidence = decision.confidence,
        using = decision.encoding.name(),
        "Resolved upload encoding"
    );

    decision
}

/// Apply the confidence threshold and the UTF-8 fallback to a detector result.
pub fn choose_encoding(
    detected: Option<String>,
    confidence: f32,
    min_confidence: f32,
) -> EncodingDecision {
    let confident = detected
        .as_deref()
        .filter(|_| confidence > min_confidence)
        .map(str::to_owned);

    let Some(candidate) = confident else {
        return EncodingDecision {
            detected,
            confidence,
            encoding: UTF_8,
            fell_back: false,
        };
    };

    match encoding_for_label(&candidate) {
        Ok(encoding) => EncodingDecision {
            detected,
            confidence,
            encoding,
            fell_back: false,
        },
        Err(err) => {
            warn!(error = %err, "Falling back to UTF-8");
            EncodingDecision {
                detected,
                confidence,
                encoding: UTF_8,
                fell_back: true,
            }
        }
    }
}

/// Map a detector charset name to a decoder.
///
/// Plain ASCII is decoded as UTF-8, its superset, so non-ASCII bytes past the
/// detection sample still decode correctly.
pub fn encoding_for_label(label: &str) -> Result<&'static Encoding, EncodingError> {
    let normalized = label.trim().to_lowercase();
    let label = match normalized.as_str() {
        "ascii" | "us-ascii" | "utf-8-sig" | "utf8" => "utf-8",
        "maccyrillic" => "x-mac-cyrillic",
        other => other,
    };

    match Encoding::for_label(label.as_bytes()) {
        Some(encoding) if encoding != REPLACEMENT => Ok(encoding),
        _ => Err(EncodingError::Unsupported {
            label: normalized,
        }),
    }
}

/// Stateful decoder fed one batch at a time.
///
/// Bytes of a multi-byte character split across batches are held inside the
/// decoder until the rest arrives. A leading byte-order mark selects its own
/// encoding and is removed.
pub struct StreamDecoder {
    decoder: Decoder,
    had_replacements: bool,
}

impl StreamDecoder {
    pub fn new(encoding: &'static Encoding) -> Self {
        Self {
            decoder: encoding.new_decoder(),
            had_replacements: false,
        }
    }

    /// Decode a batch with more input to come, appending to `out`.
    pub fn decode(&mut self, bytes: &[u8], out: &mut String) {
        self.decode_into(bytes, out, false);
    }

    /// Flush any pending partial character. The decoder must not be fed
    /// again afterwards.
    pub fn finish(&mut self, out: &mut String) {
        self.decode_into(&[], out, true);
    }

    /// Name of the encoding in effect (after BOM sniffing, once known).
    pub fn encoding_name(&self) -> &'static str {
        self.decoder.encoding().name()
    }

    /// Whether malformed input was replaced with U+FFFD at any point.
    pub fn had_replacements(&self) -> bool {
        self.had_replacements
    }

    fn decode_into(&mut self, mut bytes: &[u8], out: &mut String, last: bool) {
        loop {
            let needed = self
                .decoder
                .max_utf8_buffer_length(bytes.len())
                .unwrap_or_else(|| bytes.len().saturating_mul(3).saturating_add(16));
            out.reserve(needed);

            let (result, read, replaced) = self.decoder.decode_to_string(bytes, out, last);
            bytes = &bytes[read..];

            if replaced && !self.had_replacements {
                warn!(
                    encoding = self.decoder.encoding().name(),
                    "Malformed byte sequence replaced during decoding"
                );
                self.had_replacements = true;
            }

            match result {
                CoderResult::InputEmpty => break,
                CoderResult::OutputFull => continue,
            }
        }
    }
}
