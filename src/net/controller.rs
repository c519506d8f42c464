//! Readiness-driven I/O for one connection.
//!
//! # Data Flow
//! ```text
//! socket.ready(interest)
//!     readable → try_read → Endpoint::feed → chain → callouts
//!                0 bytes → END(Eof)
//!     writable → try_write(transport outbound) → consume_outbound
//! shutdown broadcast / idle timeout → Endpoint::close → drain outbound → exit
//! ```
//!
//! # Design Decisions
//! - Runs on the current-thread runtime; the chain itself is never shared
//! - Interest follows the transport: reading stops while `read_enable` is
//!   off, writing is requested only while outbound bytes are queued
//! - Each readiness event yields exactly one servicing pass

use std::time::Duration;

use tokio::io::{AsyncWriteExt, Interest};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tracing::Span;

use crate::config::schema::ControllerConfig;
use crate::core::callable::{Callable, Lifecycle};
use crate::core::endpoint::Endpoint;
use crate::core::error::ChainError;
use crate::core::event::{End, ErrorInfo, Event};
use crate::observability::metrics;
use crate::scan::Scannable;

pub struct Controller {
    config: ControllerConfig,
    shutdown: Option<broadcast::Receiver<()>>,
    span: Span,
}

impl Controller {
    pub fn new(config: ControllerConfig) -> Self {
        Self {
            config,
            shutdown: None,
            span: Span::none(),
        }
    }

    /// Close the chain when the broadcast fires.
    pub fn with_shutdown(mut self, shutdown: broadcast::Receiver<()>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Drive `endpoint` over `socket` until the chain is closed and its
    /// output delivered, the peer is gone, or a transport error occurs.
    pub async fn run<C>(
        &mut self,
        mut socket: TcpStream,
        endpoint: &mut Endpoint<C>,
    ) -> Result<(), ChainError>
    where
        C: Callable + Scannable,
    {
        let mut buf = vec![0u8; self.config.read_buffer_size.max(1)];
        let idle_timeout = self.config.idle_timeout();
        let mut eof = false;

        let result = loop {
            let closed = endpoint.lifecycle() == Lifecycle::Closed;
            let Some(transport) = endpoint.chain_mut().transport_mut() else {
                break Err(ChainError::NotOpen);
            };
            let want_read = !closed && !eof && transport.read_enable();
            let want_write = transport.has_outbound() && (closed || transport.write_enable());

            let interest = match (want_read, want_write) {
                (true, true) => Interest::READABLE.add(Interest::WRITABLE),
                (true, false) => Interest::READABLE,
                (false, true) => Interest::WRITABLE,
                (false, false) => {
                    tracing::debug!(parent: &self.span, closed, eof, "nothing left to do");
                    break Ok(());
                }
            };

            let ready = tokio::select! {
                ready = socket.ready(interest) => ready,
                _ = signalled(&mut self.shutdown) => {
                    tracing::info!(parent: &self.span, "shutdown requested, closing chain");
                    self.shutdown = None;
                    endpoint.close();
                    continue;
                }
                _ = idle(idle_timeout) => {
                    tracing::info!(parent: &self.span, timeout = ?idle_timeout, "idle timeout, closing chain");
                    endpoint.close();
                    continue;
                }
            };
            let ready = match ready {
                Ok(ready) => ready,
                Err(e) => break Err(self.io_failure(endpoint, e)),
            };

            if want_read && ready.is_readable() {
                match socket.try_read(&mut buf) {
                    Ok(0) => {
                        eof = true;
                        tracing::debug!(parent: &self.span, "peer closed connection");
                        endpoint.deliver(Event::End(End::Eof));
                    }
                    Ok(n) => {
                        metrics::record_bytes_in(n);
                        tracing::trace!(parent: &self.span, len = n, "read");
                        if let Err(e) = endpoint.feed(&buf[..n]) {
                            tracing::warn!(parent: &self.span, error = %e, "chain rejected input, closing");
                            endpoint.close();
                            break Err(e);
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                    Err(e) => break Err(self.io_failure(endpoint, e)),
                }
            }

            if want_write && ready.is_writable() {
                let written = match endpoint.chain_mut().transport_mut() {
                    Some(transport) => socket.try_write(transport.outbound()),
                    None => break Err(ChainError::NotOpen),
                };
                match written {
                    Ok(n) => {
                        if let Some(transport) = endpoint.chain_mut().transport_mut() {
                            transport.consume_outbound(n);
                        }
                        metrics::record_bytes_out(n);
                        tracing::trace!(parent: &self.span, len = n, "wrote");
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                    Err(e) => break Err(self.io_failure(endpoint, e)),
                }
            }
        };

        if let Err(e) = socket.shutdown().await {
            tracing::trace!(parent: &self.span, error = %e, "socket shutdown failed");
        }
        result
    }

    fn io_failure<C>(&self, endpoint: &mut Endpoint<C>, e: std::io::Error) -> ChainError
    where
        C: Callable + Scannable,
    {
        tracing::warn!(parent: &self.span, error = %e, "transport error");
        endpoint.deliver(Event::Error(ErrorInfo::from(&e)));
        endpoint.close();
        ChainError::Io(e)
    }
}

async fn signalled(shutdown: &mut Option<broadcast::Receiver<()>>) {
    match shutdown {
        // A closed or lagged channel counts as a signal too.
        Some(rx) => {
            let _ = rx.recv().await;
        }
        None => std::future::pending().await,
    }
}

async fn idle(timeout: Option<Duration>) {
    match timeout {
        Some(timeout) => tokio::time::sleep(timeout).await,
        None => std::future::pending().await,
    }
}
