//! The application end of a chain.
//!
//! An [`Endpoint`] owns the top stage and the registered callout. Events are
//! queued while the chain services data and dispatched afterwards, one at a
//! time, in the order they were produced. The callout receives a [`Handle`]
//! so it can write back into the chain; events caused by those calls are
//! queued behind the one being handled.
//!
//! The queue holds the top stage's scan after each scanner step that left
//! events waiting. Buffered data is scanned again only once those events
//! have been handled, so a callout that pauses scanning or swaps scanners
//! takes effect from the very next record.

use std::collections::VecDeque;

use bytes::Bytes;
use tracing::Span;

use crate::core::callable::{Callable, Callout, Lifecycle};
use crate::core::error::ChainError;
use crate::core::event::Event;
use crate::scan::{Scannable, Scanner};

type CalloutFn<C> = Box<dyn FnMut(&mut Handle<'_, C>, Event)>;

/// Pending events plus the point where the scan was held.
#[derive(Debug, Default)]
struct EventQueue {
    events: VecDeque<Event>,
    /// Events to hand out before the held scan continues.
    held: Option<usize>,
    /// Scan state changed from a callout; buffered data gets another look.
    rescan: bool,
}

impl EventQueue {
    /// Never ahead of events queued before the hold.
    fn ready_to_scan(&self) -> bool {
        self.held.map_or(self.rescan, |left| left == 0)
    }

    /// Continue the top stage's scan. Its events go ahead of anything still
    /// queued from the operation that was held.
    fn resume<C: Scannable>(&mut self, chain: &mut C) {
        let mut resumed = EventQueue::default();
        chain.resume_scan(&mut resumed);
        resumed.events.append(&mut self.events);
        self.events = resumed.events;
        self.held = resumed.held;
        self.rescan = false;
    }

    fn pop(&mut self) -> Option<Event> {
        let event = self.events.pop_front()?;
        if let Some(left) = self.held.as_mut() {
            *left = left.saturating_sub(1);
        }
        Some(event)
    }

    fn clear(&mut self) {
        self.events.clear();
        self.held = None;
        self.rescan = false;
    }
}

impl Callout for EventQueue {
    fn callout(&mut self, event: Event) {
        self.events.push_back(event);
    }

    fn hold(&mut self) -> bool {
        if self.events.is_empty() {
            return false;
        }
        self.held.get_or_insert(self.events.len());
        true
    }
}

/// Top of a filter chain plus its callout registration.
pub struct Endpoint<C> {
    chain: C,
    callout: CalloutFn<C>,
    queue: EventQueue,
    span: Span,
}

/// Access to the chain from inside a callout.
pub struct Handle<'a, C> {
    chain: &'a mut C,
    queue: &'a mut EventQueue,
}

impl<C: Callable + Scannable> Endpoint<C> {
    /// Register `callout` as the receiver of every event `chain` reports.
    pub fn open<F>(chain: C, callout: F) -> Self
    where
        F: FnMut(&mut Handle<'_, C>, Event) + 'static,
    {
        Self {
            chain,
            callout: Box::new(callout),
            queue: EventQueue::default(),
            span: Span::none(),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn chain(&self) -> &C {
        &self.chain
    }

    pub fn chain_mut(&mut self) -> &mut C {
        &mut self.chain
    }

    pub fn into_chain(self) -> C {
        self.chain
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.chain.lifecycle()
    }

    /// Push inbound transport bytes through the chain.
    pub fn feed(&mut self, data: &[u8]) -> Result<(), ChainError> {
        let result = self.chain.feed(data, &mut self.queue);
        self.dispatch();
        result
    }

    /// Deliver an event that originates outside the chain (transport EOF,
    /// I/O failure).
    pub fn deliver(&mut self, event: Event) {
        self.queue.callout(event);
        self.dispatch();
    }

    pub fn write(&mut self, data: &[u8]) -> Result<(), ChainError> {
        let result = self.chain.write(data, &mut self.queue);
        self.dispatch();
        result
    }

    pub fn write_flush(&mut self) -> Result<(), ChainError> {
        let result = self.chain.write_flush(&mut self.queue);
        self.dispatch();
        result
    }

    /// Pause or resume delivery. Resuming drains whatever was buffered.
    pub fn set_scan_active(&mut self, active: bool) {
        self.chain.set_scan_active(active);
        self.queue.rescan |= active;
        self.dispatch();
    }

    pub fn close(&mut self) {
        self.chain.close();
        self.queue.clear();
    }

    fn dispatch(&mut self) {
        let Self {
            chain,
            callout,
            queue,
            span,
        } = self;
        loop {
            if queue.ready_to_scan() && chain.lifecycle() != Lifecycle::Closed {
                queue.resume(&mut *chain);
            }
            let Some(event) = queue.pop() else {
                break;
            };
            if chain.lifecycle() == Lifecycle::Closed && !matches!(event, Event::End(_)) {
                tracing::trace!(parent: &*span, state = event.state(), "event dropped after close");
                continue;
            }
            tracing::trace!(parent: &*span, state = event.state(), "callout");
            let mut handle = Handle {
                chain: &mut *chain,
                queue: &mut *queue,
            };
            callout(&mut handle, event);
        }
    }
}

impl<'a, C: Callable + Scannable> Handle<'a, C> {
    pub fn chain(&mut self) -> &mut C {
        &mut *self.chain
    }

    pub fn write(&mut self, data: &[u8]) -> Result<(), ChainError> {
        self.chain.write(data, &mut *self.queue)
    }

    pub fn write_flush(&mut self) -> Result<(), ChainError> {
        self.chain.write_flush(&mut *self.queue)
    }

    pub fn close(&mut self) {
        self.chain.close();
    }

    /// Pause or resume delivery. Pausing stops before the next record;
    /// resuming delivers the backlog right after the current event.
    pub fn set_scan_active(&mut self, active: bool) {
        self.chain.set_scan_active(active);
        self.queue.rescan |= active;
    }

    /// Replace the scanner. It sees the buffered data right after the
    /// current event.
    pub fn set_scanner(&mut self, scanner: Option<Box<dyn Scanner>>) {
        self.chain.set_scanner(scanner);
        self.queue.rescan = true;
    }

    pub fn flush_scan(&mut self) -> Bytes {
        self.chain.flush_scan()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::ChunkedCoder;
    use crate::net::stream::Stream;
    use crate::scan::{ByteLimit, Regex, Rule, TokenScan};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn recorder() -> (Rc<RefCell<Vec<Event>>>, impl FnMut(&mut Handle<'_, Stream>, Event)) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |_: &mut Handle<'_, Stream>, event| sink.borrow_mut().push(event))
    }

    #[test]
    fn feed_dispatches_in_order() {
        let (seen, callout) = recorder();
        let mut stream = Stream::opened();
        stream.set_scanner(Some(Box::new(TokenScan::new(b"\n").unwrap())));
        let mut endpoint = Endpoint::open(stream, callout);

        endpoint.feed(b"one\ntwo\nthr").unwrap();
        endpoint.feed(b"ee\n").unwrap();

        let records: Vec<_> = seen
            .borrow()
            .iter()
            .map(|e| e.payload().unwrap().clone())
            .collect();
        assert_eq!(records, vec!["one", "two", "three"]);
    }

    #[test]
    fn callout_can_write_back() {
        let mut endpoint = Endpoint::open(Stream::opened(), |handle: &mut Handle<'_, Stream>, event| {
            if let Event::Raw(data) = event {
                handle.write(&data).unwrap();
            }
        });
        endpoint.feed(b"ping").unwrap();
        let out = endpoint.chain_mut().take_outbound();
        assert_eq!(out.as_ref(), b"ping");
    }

    #[test]
    fn paused_scan_drains_on_resume() {
        let (seen, callout) = recorder();
        let mut endpoint = Endpoint::open(Stream::opened(), callout);

        endpoint.set_scan_active(false);
        endpoint.feed(b"ab").unwrap();
        endpoint.feed(b"cd").unwrap();
        assert!(seen.borrow().is_empty());

        endpoint.set_scan_active(true);
        assert_eq!(*seen.borrow(), vec![Event::Raw(Bytes::from_static(b"abcd"))]);
    }

    #[test]
    fn pausing_in_callout_stops_before_next_record() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let mut stream = Stream::opened();
        stream.set_scanner(Some(Box::new(
            Regex::new([Rule::new(r"([^\n]*)\n", Some("line"))]).unwrap(),
        )));
        let mut endpoint = Endpoint::open(stream, move |handle: &mut Handle<'_, Stream>, event| {
            sink.borrow_mut().push(event);
            handle.set_scan_active(false);
        });

        endpoint.feed(b"a\nb\nc\n").unwrap();
        assert_eq!(seen.borrow().len(), 1);
        assert_eq!(seen.borrow()[0].payload().unwrap().as_ref(), b"a\n");
        assert_eq!(endpoint.chain().scan_buffer().buffered(), b"b\nc\n");

        endpoint.set_scan_active(true);
        assert_eq!(seen.borrow().len(), 2);
        assert_eq!(endpoint.chain().scan_buffer().buffered(), b"c\n");

        endpoint.set_scan_active(true);
        assert_eq!(seen.borrow().len(), 3);
        assert!(endpoint.chain().scan_buffer().buffered().is_empty());
    }

    #[test]
    fn scanner_swapped_in_callout_reads_the_rest() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let mut stream = Stream::opened();
        stream.set_scanner(Some(Box::new(
            Regex::new([
                Rule::new(r"\r\n", Some("blank")),
                Rule::new(r"([^\r\n]+)\r\n", Some("header")),
            ])
            .unwrap(),
        )));
        let mut endpoint = Endpoint::open(stream, move |handle: &mut Handle<'_, Stream>, event| {
            if event.state() == "blank" {
                handle.set_scanner(Some(Box::new(ByteLimit::new(5))));
            }
            sink.borrow_mut().push(event);
        });

        endpoint.feed(b"Host: x\r\n\r\nBODY!\r\n").unwrap();
        let states: Vec<String> = seen.borrow().iter().map(|e| e.state().to_string()).collect();
        assert_eq!(states, vec!["header", "blank", "limit-data", "limit-reached"]);
        assert_eq!(seen.borrow()[2], Event::LimitData(Bytes::from_static(b"BODY!")));
        assert_eq!(endpoint.chain().scan_buffer().buffered(), b"\r\n");
    }

    #[test]
    fn held_records_precede_last_chunk() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let mut coder = ChunkedCoder::over(Stream::opened());
        coder.set_scanner(Some(Box::new(TokenScan::new(b"\n").unwrap())));
        let mut endpoint = Endpoint::open(coder, move |_: &mut Handle<'_, ChunkedCoder<Stream>>, event| {
            sink.borrow_mut().push(event);
        });

        endpoint.feed(b"6\r\nhello\n\r\n5\r\nab\ncd\r\n0\r\n\r\n").unwrap();
        let seen = seen.borrow();
        let states: Vec<&str> = seen.iter().map(|e| e.state()).collect();
        assert_eq!(states, vec!["record", "record", "END"]);
        assert_eq!(seen[1].payload().unwrap().as_ref(), b"ab");
        assert_eq!(endpoint.chain().scan_buffer().buffered(), b"cd");
    }

    #[test]
    fn close_is_idempotent_and_silences_callouts() {
        let (seen, callout) = recorder();
        let mut endpoint = Endpoint::open(Stream::opened(), callout);
        endpoint.close();
        endpoint.close();
        assert_eq!(endpoint.lifecycle(), Lifecycle::Closed);
        assert!(matches!(endpoint.feed(b"late"), Err(ChainError::NotOpen)));
        assert!(seen.borrow().is_empty());
    }
}
