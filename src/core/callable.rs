//! Stage abstractions.
//!
//! # Responsibilities
//! - `Callable`: one stage of a filter chain (open/close/write/feed)
//! - `FilterCallable`: a stage stacked above another, forwarding what it
//!   does not handle
//! - `FilterBase`: the upstream link and flags every filter carries
//! - `Callout`: the sink a stage reports its events into

use tracing::Span;

use crate::core::error::ChainError;
use crate::core::event::Event;
use crate::net::stream::Stream;

/// A sink for callout events.
pub trait Callout {
    fn callout(&mut self, event: Event);

    /// Asked by a scan buffer before each scanner step while data remains.
    /// Answering true stops the scan there and leaves the rest buffered; the
    /// sink must resume the scan once it has delivered what it holds.
    fn hold(&mut self) -> bool {
        false
    }
}

impl Callout for Vec<Event> {
    fn callout(&mut self, event: Event) {
        self.push(event);
    }
}

/// Stage lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Lifecycle {
    #[default]
    Unopened,
    Open,
    Closed,
}

/// One stage of a filter chain.
///
/// Every operation that can make progress takes the callout sink the stage
/// reports into; there is no polling interface.
pub trait Callable {
    /// Current lifecycle state.
    fn lifecycle(&self) -> Lifecycle;

    /// Send bytes upstream, reframed by this stage if applicable.
    fn write(&mut self, data: &[u8], callout: &mut dyn Callout) -> Result<(), ChainError>;

    /// Finish the outbound stream.
    fn write_flush(&mut self, callout: &mut dyn Callout) -> Result<(), ChainError>;

    /// Tear the stage down. Safe to call any number of times.
    fn close(&mut self);

    /// Inbound bytes entering at the bottom of the chain.
    fn feed(&mut self, data: &[u8], callout: &mut dyn Callout) -> Result<(), ChainError>;

    fn read_enable(&self) -> bool;
    fn set_read_enable(&mut self, enable: bool);
    fn write_enable(&self) -> bool;
    fn set_write_enable(&mut self, enable: bool);

    /// The transport at the bottom of the chain.
    fn transport_mut(&mut self) -> Option<&mut Stream>;

    fn is_open(&self) -> bool {
        self.lifecycle() == Lifecycle::Open
    }
}

impl<T: Callable + ?Sized> Callable for Box<T> {
    fn lifecycle(&self) -> Lifecycle {
        (**self).lifecycle()
    }

    fn write(&mut self, data: &[u8], callout: &mut dyn Callout) -> Result<(), ChainError> {
        (**self).write(data, callout)
    }

    fn write_flush(&mut self, callout: &mut dyn Callout) -> Result<(), ChainError> {
        (**self).write_flush(callout)
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn feed(&mut self, data: &[u8], callout: &mut dyn Callout) -> Result<(), ChainError> {
        (**self).feed(data, callout)
    }

    fn read_enable(&self) -> bool {
        (**self).read_enable()
    }

    fn set_read_enable(&mut self, enable: bool) {
        (**self).set_read_enable(enable)
    }

    fn write_enable(&self) -> bool {
        (**self).write_enable()
    }

    fn set_write_enable(&mut self, enable: bool) {
        (**self).set_write_enable(enable)
    }

    fn transport_mut(&mut self) -> Option<&mut Stream> {
        (**self).transport_mut()
    }
}

/// A stage stacked above an upstream stage.
pub trait FilterCallable: Callable {
    type Upstream: Callable;

    fn upstream_mut(&mut self) -> Option<&mut Self::Upstream>;

    /// Handle one event reported by the upstream. The default forwards it
    /// downstream unchanged.
    fn incoming(&mut self, event: Event, callout: &mut dyn Callout) -> Result<(), ChainError> {
        callout.callout(event);
        Ok(())
    }

    /// Run `op` against the upstream, then handle every event it reported,
    /// in order. Events are handled even when `op` fails.
    fn relay<R>(
        &mut self,
        callout: &mut dyn Callout,
        op: impl FnOnce(&mut Self::Upstream, &mut dyn Callout) -> Result<R, ChainError>,
    ) -> Result<R, ChainError> {
        let mut events: Vec<Event> = Vec::new();
        let result = match self.upstream_mut() {
            Some(upstream) => op(upstream, &mut events),
            None => Err(ChainError::NotOpen),
        };
        for event in events {
            self.incoming(event, callout)?;
        }
        result
    }
}

/// Upstream link, flow flags and log span shared by filter stages.
#[derive(Debug)]
pub struct FilterBase<U> {
    upstream: Option<U>,
    lifecycle: Lifecycle,
    pub read_enable: bool,
    pub write_enable: bool,
    pub span: Span,
}

impl<U: Callable> FilterBase<U> {
    pub fn new() -> Self {
        Self {
            upstream: None,
            lifecycle: Lifecycle::Unopened,
            read_enable: true,
            write_enable: true,
            span: Span::none(),
        }
    }

    /// Bind above `source`. Returns the upstream this replaces, if any.
    pub fn open(&mut self, source: U) -> Option<U> {
        self.lifecycle = Lifecycle::Open;
        self.upstream.replace(source)
    }

    /// Close the upstream in place and mark this stage closed.
    ///
    /// The closed upstream stays reachable so a transport can still drain
    /// output queued before the close.
    pub fn close(&mut self) {
        if self.lifecycle == Lifecycle::Closed {
            return;
        }
        if let Some(upstream) = self.upstream.as_mut() {
            upstream.close();
        }
        self.lifecycle = Lifecycle::Closed;
        tracing::trace!(parent: &self.span, "stage closed");
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn upstream(&self) -> Option<&U> {
        self.upstream.as_ref()
    }

    pub fn upstream_mut(&mut self) -> Option<&mut U> {
        self.upstream.as_mut()
    }

    /// Open upstream, or `NotOpen`.
    pub fn live_upstream(&mut self) -> Result<&mut U, ChainError> {
        match self.lifecycle {
            Lifecycle::Open => self.upstream.as_mut().ok_or(ChainError::NotOpen),
            _ => Err(ChainError::NotOpen),
        }
    }

    pub fn into_upstream(self) -> Option<U> {
        self.upstream
    }
}

impl<U: Callable> Default for FilterBase<U> {
    fn default() -> Self {
        Self::new()
    }
}
