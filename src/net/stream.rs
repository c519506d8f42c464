//! Bottom-of-chain transport stage.
//!
//! `Stream` holds no socket. The controller feeds it inbound bytes and
//! drains its outbound queue; everything above it stays sans-io and can be
//! driven from tests without a network.

use bytes::{Buf, Bytes, BytesMut};
use tracing::Span;

use crate::core::callable::{Callable, Callout, Lifecycle};
use crate::core::error::ChainError;
use crate::scan::{ScanBuffer, Scannable};

pub struct Stream {
    lifecycle: Lifecycle,
    read_enable: bool,
    write_enable: bool,
    outbound: BytesMut,
    scan: ScanBuffer,
    span: Span,
}

impl Stream {
    /// An unopened transport.
    pub fn new() -> Self {
        Self {
            lifecycle: Lifecycle::Unopened,
            read_enable: true,
            write_enable: true,
            outbound: BytesMut::new(),
            scan: ScanBuffer::new(),
            span: Span::none(),
        }
    }

    /// An open transport.
    pub fn opened() -> Self {
        let mut stream = Self::new();
        stream.open();
        stream
    }

    /// Mark the transport connected, discarding any state from a previous
    /// connection.
    pub fn open(&mut self) {
        self.outbound.clear();
        self.scan.reset();
        self.lifecycle = Lifecycle::Open;
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn has_outbound(&self) -> bool {
        !self.outbound.is_empty()
    }

    pub fn outbound(&self) -> &[u8] {
        &self.outbound
    }

    /// Drop the first `n` queued bytes after they reached the socket.
    pub fn consume_outbound(&mut self, n: usize) {
        self.outbound.advance(n.min(self.outbound.len()));
    }

    /// Take every queued outbound byte.
    pub fn take_outbound(&mut self) -> Bytes {
        self.outbound.split().freeze()
    }
}

impl Default for Stream {
    fn default() -> Self {
        Self::new()
    }
}

impl Callable for Stream {
    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn write(&mut self, data: &[u8], _callout: &mut dyn Callout) -> Result<(), ChainError> {
        if self.lifecycle != Lifecycle::Open {
            return Err(ChainError::NotOpen);
        }
        self.outbound.extend_from_slice(data);
        tracing::trace!(parent: &self.span, len = data.len(), queued = self.outbound.len(), "queued outbound");
        Ok(())
    }

    fn write_flush(&mut self, _callout: &mut dyn Callout) -> Result<(), ChainError> {
        if self.lifecycle != Lifecycle::Open {
            return Err(ChainError::NotOpen);
        }
        Ok(())
    }

    /// Queued outbound bytes survive the close so the controller can still
    /// deliver them before shutting the socket down.
    fn close(&mut self) {
        if self.lifecycle == Lifecycle::Closed {
            return;
        }
        self.lifecycle = Lifecycle::Closed;
        self.scan.reset();
        tracing::trace!(parent: &self.span, pending = self.outbound.len(), "transport closed");
    }

    fn feed(&mut self, data: &[u8], callout: &mut dyn Callout) -> Result<(), ChainError> {
        if self.lifecycle != Lifecycle::Open {
            return Err(ChainError::NotOpen);
        }
        self.scan.scan(data, callout);
        Ok(())
    }

    fn read_enable(&self) -> bool {
        self.read_enable
    }

    fn set_read_enable(&mut self, enable: bool) {
        self.read_enable = enable;
    }

    fn write_enable(&self) -> bool {
        self.write_enable
    }

    fn set_write_enable(&mut self, enable: bool) {
        self.write_enable = enable;
    }

    fn transport_mut(&mut self) -> Option<&mut Stream> {
        Some(self)
    }
}

impl Scannable for Stream {
    fn scan_buffer(&self) -> &ScanBuffer {
        &self.scan
    }

    fn scan_buffer_mut(&mut self) -> &mut ScanBuffer {
        &mut self.scan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event::Event;

    #[test]
    fn unopened_rejects_io() {
        let mut stream = Stream::new();
        let mut events: Vec<Event> = Vec::new();
        assert!(matches!(stream.write(b"x", &mut events), Err(ChainError::NotOpen)));
        assert!(matches!(stream.feed(b"x", &mut events), Err(ChainError::NotOpen)));
    }

    #[test]
    fn outbound_survives_close() {
        let mut stream = Stream::opened();
        let mut events: Vec<Event> = Vec::new();
        stream.write(b"bye", &mut events).unwrap();
        stream.close();
        assert!(stream.has_outbound());
        stream.consume_outbound(1);
        assert_eq!(stream.outbound(), b"ye");
        stream.consume_outbound(10);
        assert!(!stream.has_outbound());
    }

    #[test]
    fn reopen_resets() {
        let mut stream = Stream::opened();
        let mut events: Vec<Event> = Vec::new();
        stream.write(b"old", &mut events).unwrap();
        stream.close();
        stream.open();
        assert!(!stream.has_outbound());
        assert!(stream.is_open());
    }
}
