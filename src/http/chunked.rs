//! HTTP/1.1 chunked transfer coding.
//!
//! # Data Flow
//! ```text
//! inbound RAW from upstream
//!     → rbuf (undecoded bytes)
//!     → size line "<hex>[;ext]\r\n" → remain = size + 2
//!     → payload bytes → own ScanBuffer → callouts
//!     → terminator "\r\n" verified, never delivered
//!     → size 0 → END(Chunks { trailer }), decoding stops
//!
//! write(data) → "<HEX>\r\n" data "\r\n" as one upstream write
//! write_flush → "0\r\n\r\n", then upstream flush
//! ```
//!
//! # Design Decisions
//! - `remain` counts the chunk's trailing CRLF so a terminator split across
//!   reads is tracked and verified byte by byte
//! - Malformed framing fails fast with `ChunkedError`; the caller closes
//! - Bytes after the last chunk are kept in `pending`, never decoded

use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;
use tracing::Span;

use crate::core::callable::{Callable, Callout, FilterBase, FilterCallable, Lifecycle};
use crate::core::error::ChainError;
use crate::core::event::{End, Event};
use crate::net::stream::Stream;
use crate::observability::metrics;
use crate::scan::{ScanBuffer, Scannable};

/// Longest chunk-size line accepted before its CRLF arrives.
pub const MAX_SIZE_LINE: usize = 4096;

const CRLF: &[u8; 2] = b"\r\n";
const LAST_CHUNK: &[u8] = b"0\r\n\r\n";

/// Chunked framing violations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChunkedError {
    #[error("invalid chunk size line: {0:?}")]
    InvalidSize(String),

    #[error("chunk size does not fit in memory: {0}")]
    SizeOverflow(String),

    #[error("chunk not terminated by CRLF")]
    BadTerminator,

    #[error("chunk size line exceeds {0} bytes")]
    HeaderTooLong(usize),
}

/// Chunked transfer coder stacked above `U`.
pub struct ChunkedCoder<U> {
    base: FilterBase<U>,
    scan: ScanBuffer,
    rbuf: BytesMut,
    pending: Option<BytesMut>,
    remain: usize,
    chunks: u64,
}

impl<U: Callable> ChunkedCoder<U> {
    pub fn new() -> Self {
        Self {
            base: FilterBase::new(),
            scan: ScanBuffer::new(),
            rbuf: BytesMut::new(),
            pending: None,
            remain: 0,
            chunks: 0,
        }
    }

    /// A coder already opened above `source`.
    pub fn over(source: U) -> Self {
        let mut coder = Self::new();
        coder.open(source);
        coder
    }

    /// Bind above `source`, resetting all decoder state. Returns the
    /// previous upstream, if any.
    pub fn open(&mut self, source: U) -> Option<U> {
        self.rbuf.clear();
        self.pending = None;
        self.remain = 0;
        self.chunks = 0;
        self.scan.reset();
        self.base.open(source)
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.base.span = span;
        self
    }

    /// Whether the last chunk has been decoded.
    pub fn is_finished(&self) -> bool {
        self.pending.is_some()
    }

    /// Bytes received after the last chunk.
    pub fn take_pending(&mut self) -> Bytes {
        self.pending
            .as_mut()
            .map(|pending| pending.split().freeze())
            .unwrap_or_default()
    }

    /// Chunks decoded since `open`, the last chunk excluded.
    pub fn chunks_decoded(&self) -> u64 {
        self.chunks
    }

    pub fn upstream(&self) -> Option<&U> {
        self.base.upstream()
    }

    /// Pop this coder off the chain.
    pub fn into_upstream(self) -> Option<U> {
        self.base.into_upstream()
    }

    fn decode(&mut self, data: &[u8], callout: &mut dyn Callout) -> Result<(), ChainError> {
        if let Some(pending) = self.pending.as_mut() {
            pending.extend_from_slice(data);
            return Ok(());
        }
        self.rbuf.extend_from_slice(data);

        while !self.rbuf.is_empty() {
            if self.remain == 0 {
                let Some(size) = self.size_line()? else {
                    break;
                };
                if size == 0 {
                    self.finish(callout);
                    break;
                }
                self.remain = size.checked_add(CRLF.len()).ok_or_else(|| {
                    ChunkedError::SizeOverflow(format!("{size:x}"))
                })?;
                continue;
            }

            let rlen = self.rbuf.len().min(self.remain);
            let send = rlen.min(self.remain.saturating_sub(CRLF.len()));
            let start = CRLF.len() - self.remain.min(CRLF.len());
            let terminator = &self.rbuf[send..rlen];
            if terminator != &CRLF[start..start + terminator.len()] {
                tracing::warn!(parent: &self.base.span, "chunk terminator mismatch");
                return Err(ChunkedError::BadTerminator.into());
            }

            let chunk = self.rbuf.split_to(rlen).freeze();
            self.remain -= rlen;
            if self.remain == 0 {
                self.chunks += 1;
                metrics::record_chunk_decoded();
            }
            if send > 0 {
                self.scan.scan(&chunk[..send], callout);
            }
        }
        Ok(())
    }

    /// Parse the size line at the head of `rbuf`. `None` until its CRLF
    /// has arrived.
    fn size_line(&mut self) -> Result<Option<usize>, ChunkedError> {
        let Some(at) = self.rbuf.windows(CRLF.len()).position(|w| w == CRLF) else {
            if self.rbuf.len() > MAX_SIZE_LINE {
                return Err(ChunkedError::HeaderTooLong(MAX_SIZE_LINE));
            }
            return Ok(None);
        };
        if at > MAX_SIZE_LINE {
            return Err(ChunkedError::HeaderTooLong(MAX_SIZE_LINE));
        }
        let line = self.rbuf.split_to(at + CRLF.len());
        let size = parse_size(&line[..at])?;
        tracing::debug!(parent: &self.base.span, size, "chunk header");
        Ok(Some(size))
    }

    fn finish(&mut self, callout: &mut dyn Callout) {
        let mut rest = self.rbuf.split();
        let trailer = if rest.starts_with(CRLF) {
            rest.advance(CRLF.len());
            Bytes::new()
        } else {
            Bytes::copy_from_slice(&rest)
        };
        tracing::debug!(
            parent: &self.base.span,
            chunks = self.chunks,
            trailer_len = trailer.len(),
            "last chunk"
        );
        self.pending = Some(rest);
        callout.callout(Event::End(End::Chunks { trailer }));
    }
}

/// Parse `<hex>[;ext]`, ignoring extensions and surrounding whitespace.
fn parse_size(line: &[u8]) -> Result<usize, ChunkedError> {
    let invalid = || ChunkedError::InvalidSize(String::from_utf8_lossy(line).into_owned());
    let digits = line.split(|&b| b == b';').next().unwrap_or_default();
    let digits = trim_ows(digits);
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_hexdigit) {
        return Err(invalid());
    }
    let text = std::str::from_utf8(digits).map_err(|_| invalid())?;
    usize::from_str_radix(text, 16).map_err(|_| ChunkedError::SizeOverflow(text.to_string()))
}

fn trim_ows(mut bytes: &[u8]) -> &[u8] {
    while let [b' ' | b'\t', rest @ ..] = bytes {
        bytes = rest;
    }
    while let [rest @ .., b' ' | b'\t'] = bytes {
        bytes = rest;
    }
    bytes
}

impl<U: Callable> Default for ChunkedCoder<U> {
    fn default() -> Self {
        Self::new()
    }
}

impl<U: Callable> Callable for ChunkedCoder<U> {
    fn lifecycle(&self) -> Lifecycle {
        self.base.lifecycle()
    }

    fn write(&mut self, data: &[u8], callout: &mut dyn Callout) -> Result<(), ChainError> {
        if !self.base.write_enable {
            return self.relay(callout, |up, cb| up.write(data, cb));
        }
        self.base.live_upstream()?;
        if data.is_empty() {
            return Ok(());
        }
        let header = format!("{:X}\r\n", data.len());
        let mut frame = BytesMut::with_capacity(header.len() + data.len() + CRLF.len());
        frame.extend_from_slice(header.as_bytes());
        frame.extend_from_slice(data);
        frame.extend_from_slice(CRLF);
        tracing::trace!(parent: &self.base.span, len = data.len(), "chunk encoded");
        self.relay(callout, |up, cb| up.write(&frame, cb))
    }

    /// Terminate the body with the last-chunk, even while writes bypass
    /// framing, then flush upstream.
    fn write_flush(&mut self, callout: &mut dyn Callout) -> Result<(), ChainError> {
        self.relay(callout, |up, cb| up.write(LAST_CHUNK, cb))?;
        self.relay(callout, |up, cb| up.write_flush(cb))
    }

    fn close(&mut self) {
        self.rbuf.clear();
        self.base.close();
    }

    fn feed(&mut self, data: &[u8], callout: &mut dyn Callout) -> Result<(), ChainError> {
        self.relay(callout, |up, cb| up.feed(data, cb))
    }

    fn read_enable(&self) -> bool {
        self.base.read_enable
    }

    fn set_read_enable(&mut self, enable: bool) {
        self.base.read_enable = enable;
    }

    fn write_enable(&self) -> bool {
        self.base.write_enable
    }

    fn set_write_enable(&mut self, enable: bool) {
        self.base.write_enable = enable;
    }

    fn transport_mut(&mut self) -> Option<&mut Stream> {
        self.base.upstream_mut()?.transport_mut()
    }
}

impl<U: Callable> FilterCallable for ChunkedCoder<U> {
    type Upstream = U;

    fn upstream_mut(&mut self) -> Option<&mut U> {
        self.base.live_upstream().ok()
    }

    fn incoming(&mut self, event: Event, callout: &mut dyn Callout) -> Result<(), ChainError> {
        match event {
            Event::Raw(data) if self.base.read_enable => self.decode(&data, callout),
            other => {
                callout.callout(other);
                Ok(())
            }
        }
    }
}

impl<U> Scannable for ChunkedCoder<U> {
    fn scan_buffer(&self) -> &ScanBuffer {
        &self.scan
    }

    fn scan_buffer_mut(&mut self) -> &mut ScanBuffer {
        &mut self.scan
    }
}
