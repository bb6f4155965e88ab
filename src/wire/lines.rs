//! Line framing for the engine stream.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a configurable maximum line
//! length so that an unterminated or oversized line from the engine cannot
//! exhaust memory.
//!
//! # Usage
//!
//! Use [`LineCodec`] as the codec parameter for
//! [`tokio_util::codec::FramedRead`] (inbound) and
//! [`tokio_util::codec::FramedWrite`] (outbound). Both directions frame
//! UTF-8 lines delimited by `\n`.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::client::transport::classify_io_error;
use crate::{ClientError, Result};

/// Default maximum inbound line length: 1 MiB.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// Newline codec for the engine stream.
///
/// # Decoder
///
/// Inbound lines longer than the configured limit return
/// [`ClientError::Decode`]`("line too long: …")` rather than allocating.
/// A framed stream ends after that error, so the connection is lost.
///
/// # Encoder
///
/// Outbound strings are encoded as `item\n`. The limit is a decoder-side
/// concern and is not enforced during encoding.
#[derive(Debug)]
pub struct LineCodec {
    inner: LinesCodec,
    max_length: usize,
}

impl LineCodec {
    /// Create a new `LineCodec` with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_BYTES)
    }

    /// Create a new `LineCodec` rejecting inbound lines over `max_length` bytes.
    #[must_use]
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            inner: LinesCodec::new_with_max_length(max_length),
            max_length,
        }
    }

    /// Maximum accepted inbound line length in bytes.
    #[must_use]
    pub fn max_length(&self) -> usize {
        self.max_length
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = ClientError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let max = self.max_length;
        self.inner
            .decode(src)
            .map_err(|e| map_codec_error(e, max))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let max = self.max_length;
        self.inner
            .decode_eof(src)
            .map_err(|e| map_codec_error(e, max))
    }
}

impl Encoder<String> for LineCodec {
    type Error = ClientError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<()> {
        let max = self.max_length;
        self.inner
            .encode(item, dst)
            .map_err(|e| map_codec_error(e, max))
    }
}

// ── Private helpers ───────────────────────────────────────────────────────────

/// Map a [`LinesCodecError`] to a [`ClientError`].
fn map_codec_error(e: LinesCodecError, max: usize) -> ClientError {
    match e {
        LinesCodecError::MaxLineLengthExceeded => {
            ClientError::Decode(format!("line too long: exceeded {max} bytes"))
        }
        LinesCodecError::Io(io_err) => classify_io_error(&io_err),
    }
}
