//! NDJSON codec for JLP agent streams.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a configurable maximum line
//! length to protect the Orchestrator Core from unbounded memory growth
//! caused by a misbehaving or malicious agent writing an unterminated or
//! oversized line.
//!
//! Use [`JlpCodec`] as the codec parameter for
//! [`tokio_util::codec::FramedRead`] (inbound) and
//! [`tokio_util::codec::FramedWrite`] (outbound). Both directions frame
//! UTF-8 lines delimited by `\n`; each line carries one JSON envelope.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::{AppError, Result};

/// Default maximum line length accepted on the wire: 256 KiB.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 262_144;

/// NDJSON codec for bidirectional JLP agent streams.
///
/// Delegates line-framing to [`LinesCodec`] with a configurable maximum
/// length. Each newline-terminated UTF-8 string is one complete JLP message.
#[derive(Debug)]
pub struct JlpCodec {
    inner: LinesCodec,
    max_frame_bytes: usize,
}

impl JlpCodec {
    /// Create a codec enforcing [`DEFAULT_MAX_FRAME_BYTES`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_frame_bytes(DEFAULT_MAX_FRAME_BYTES)
    }

    /// Create a codec enforcing a custom maximum line length, in bytes.
    #[must_use]
    pub fn with_max_frame_bytes(max_frame_bytes: usize) -> Self {
        Self {
            inner: LinesCodec::new_with_max_length(max_frame_bytes),
            max_frame_bytes,
        }
    }

    fn map_codec_error(&self, err: LinesCodecError) -> AppError {
        match err {
            LinesCodecError::MaxLineLengthExceeded => AppError::Jlp(format!(
                "line too long: exceeded {} bytes",
                self.max_frame_bytes
            )),
            LinesCodecError::Io(io_err) => AppError::Io(io_err.to_string()),
        }
    }
}

impl Default for JlpCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for JlpCodec {
    type Item = String;
    type Error = AppError;

    /// Decode the next newline-terminated line from `src`.
    ///
    /// Returns `Ok(None)` when `src` contains no complete line yet.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Jlp`] when the line exceeds the configured
    /// maximum, or [`AppError::Io`] on an underlying I/O failure.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.inner.decode(src).map_err(|err| self.map_codec_error(err))
    }

    /// Decode the final, possibly unterminated, line at stream EOF.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.inner
            .decode_eof(src)
            .map_err(|err| self.map_codec_error(err))
    }
}

impl Encoder<String> for JlpCodec {
    type Error = AppError;

    /// Encode `item` as a `\n`-terminated NDJSON line into `dst`.
    ///
    /// The maximum-length limit is a decoder-side concern; it is not
    /// enforced here.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] on underlying I/O failures.
    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<()> {
        self.inner
            .encode(item, dst)
            .map_err(|err| self.map_codec_error(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_single_line() {
        let mut codec = JlpCodec::new();
        let mut buf = BytesMut::from("{\"type\":\"heartbeat\"}\n");
        let line = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(line, "{\"type\":\"heartbeat\"}");
    }

    #[test]
    fn buffers_partial_line() {
        let mut codec = JlpCodec::new();
        let mut buf = BytesMut::from("{\"type\":\"heart");
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn rejects_oversize_line() {
        let mut codec = JlpCodec::with_max_frame_bytes(16);
        let mut buf = BytesMut::from(&b"x".repeat(64)[..]);
        buf.extend_from_slice(b"\n");
        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, AppError::Jlp(_)));
    }

    #[test]
    fn encodes_with_trailing_newline() {
        let mut codec = JlpCodec::new();
        let mut dst = BytesMut::new();
        codec.encode("{\"cmd\":\"flush\"}".to_owned(), &mut dst).unwrap();
        assert_eq!(&dst[..], b"{\"cmd\":\"flush\"}\n");
    }
}
