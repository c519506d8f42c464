//! Incremental scanning.
//!
//! # Data Flow
//! ```text
//! inbound bytes
//!     → ScanBuffer::scan (append to buffer)
//!     → loop while active and non-empty, unless the sink holds:
//!           scanner.scan(target) → consumed prefix + callouts, or stall
//!       no scanner → whole buffer as one RAW callout
//! ```
//!
//! # Design Decisions
//! - Scanners own recovery; nothing skips unmatched bytes implicitly
//! - A stalled scan keeps the remainder for the next append or resume
//! - A sink that holds gets one scanner step at a time, so the application
//!   can pause or swap scanners between records
//! - Stages gain scanning through the `Scannable` trait, delegating to an
//!   owned `ScanBuffer`

pub mod limit;
pub mod regex;
pub mod token;

pub use self::limit::ByteLimit;
pub use self::regex::{Regex, RegexOptions, Rule};
pub use self::token::TokenScan;

use bytes::{Bytes, BytesMut};

use crate::core::callable::Callout;
use crate::core::event::Event;

/// A strategy for extracting records from a scan buffer.
pub trait Scanner {
    /// Consume a matched prefix and report it, returning true; or leave the
    /// buffer untouched and return false.
    fn scan(&mut self, target: &mut ScanTarget<'_>) -> bool;
}

/// The buffer and callout sink a scanner works against.
pub struct ScanTarget<'a> {
    buf: &'a mut BytesMut,
    callout: &'a mut dyn Callout,
}

impl<'a> ScanTarget<'a> {
    pub fn new(buf: &'a mut BytesMut, callout: &'a mut dyn Callout) -> Self {
        Self { buf, callout }
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buf[..]
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Remove and return the first `n` bytes.
    pub fn consume(&mut self, n: usize) -> Bytes {
        self.buf.split_to(n).freeze()
    }

    pub fn callout(&mut self, event: Event) {
        self.callout.callout(event);
    }
}

/// Read buffer plus the scanner that drains it.
pub struct ScanBuffer {
    rbuf: BytesMut,
    scanner: Option<Box<dyn Scanner>>,
    active: bool,
}

impl ScanBuffer {
    pub fn new() -> Self {
        Self {
            rbuf: BytesMut::new(),
            scanner: None,
            active: true,
        }
    }

    /// Append `data`, then generate callouts while the scanner makes
    /// progress. Stops early when paused or when the sink holds.
    pub fn scan(&mut self, data: &[u8], callout: &mut dyn Callout) {
        self.rbuf.extend_from_slice(data);
        while self.active && !self.rbuf.is_empty() && !callout.hold() {
            match self.scanner.as_mut() {
                Some(scanner) => {
                    let mut target = ScanTarget::new(&mut self.rbuf, callout);
                    if !scanner.scan(&mut target) {
                        break;
                    }
                }
                None => {
                    let data = self.rbuf.split().freeze();
                    callout.callout(Event::Raw(data));
                }
            }
        }
    }

    /// Continue scanning what is already buffered.
    pub fn resume(&mut self, callout: &mut dyn Callout) {
        self.scan(&[], callout);
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Pause or unpause delivery. Data keeps accumulating while paused;
    /// nothing is delivered until the next `scan` or `resume`.
    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    pub fn set_scanner(&mut self, scanner: Option<Box<dyn Scanner>>) {
        self.scanner = scanner;
    }

    pub fn has_scanner(&self) -> bool {
        self.scanner.is_some()
    }

    /// Empty the buffer and return its contents.
    pub fn flush(&mut self) -> Bytes {
        self.rbuf.split().freeze()
    }

    pub fn buffered(&self) -> &[u8] {
        &self.rbuf
    }

    /// Drop buffered bytes and resume delivery. The scanner is kept.
    pub fn reset(&mut self) {
        self.rbuf.clear();
        self.active = true;
    }
}

impl Default for ScanBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// A stage that delivers its inbound data through a `ScanBuffer`.
pub trait Scannable {
    fn scan_buffer(&self) -> &ScanBuffer;
    fn scan_buffer_mut(&mut self) -> &mut ScanBuffer;

    fn set_scanner(&mut self, scanner: Option<Box<dyn Scanner>>) {
        self.scan_buffer_mut().set_scanner(scanner);
    }

    fn scan_active(&self) -> bool {
        self.scan_buffer().is_active()
    }

    fn set_scan_active(&mut self, active: bool) {
        self.scan_buffer_mut().set_active(active);
    }

    fn resume_scan(&mut self, callout: &mut dyn Callout) {
        self.scan_buffer_mut().resume(callout);
    }

    fn flush_scan(&mut self) -> Bytes {
        self.scan_buffer_mut().flush()
    }
}

impl<T: Scannable + ?Sized> Scannable for Box<T> {
    fn scan_buffer(&self) -> &ScanBuffer {
        (**self).scan_buffer()
    }

    fn scan_buffer_mut(&mut self) -> &mut ScanBuffer {
        (**self).scan_buffer_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Consumes one byte per call and reports it.
    struct OneByte;

    impl Scanner for OneByte {
        fn scan(&mut self, target: &mut ScanTarget<'_>) -> bool {
            let byte = target.consume(1);
            target.callout(Event::Raw(byte));
            true
        }
    }

    /// Never makes progress.
    struct Stuck;

    impl Scanner for Stuck {
        fn scan(&mut self, _target: &mut ScanTarget<'_>) -> bool {
            false
        }
    }

    #[test]
    fn without_scanner_delivers_raw() {
        let mut scan = ScanBuffer::new();
        let mut events: Vec<Event> = Vec::new();
        scan.scan(b"hello", &mut events);
        assert_eq!(events, vec![Event::Raw(Bytes::from_static(b"hello"))]);
        assert!(scan.buffered().is_empty());
    }

    #[test]
    fn scanner_runs_until_empty() {
        let mut scan = ScanBuffer::new();
        scan.set_scanner(Some(Box::new(OneByte)));
        let mut events: Vec<Event> = Vec::new();
        scan.scan(b"abc", &mut events);
        assert_eq!(events.len(), 3);
    }

    #[test]
    fn stall_retains_remainder() {
        let mut scan = ScanBuffer::new();
        scan.set_scanner(Some(Box::new(Stuck)));
        let mut events: Vec<Event> = Vec::new();
        scan.scan(b"abc", &mut events);
        scan.scan(b"def", &mut events);
        assert!(events.is_empty());
        assert_eq!(scan.buffered(), b"abcdef");
        assert_eq!(scan.flush().as_ref(), b"abcdef");
        assert!(scan.buffered().is_empty());
    }

    #[test]
    fn inactive_accumulates() {
        let mut scan = ScanBuffer::new();
        let mut events: Vec<Event> = Vec::new();
        scan.set_active(false);
        scan.scan(b"ab", &mut events);
        scan.scan(b"cd", &mut events);
        assert!(events.is_empty());

        scan.set_active(true);
        scan.resume(&mut events);
        assert_eq!(events, vec![Event::Raw(Bytes::from_static(b"abcd"))]);
    }

    /// Holds after every event it receives.
    #[derive(Default)]
    struct OneAtATime {
        events: Vec<Event>,
    }

    impl Callout for OneAtATime {
        fn callout(&mut self, event: Event) {
            self.events.push(event);
        }

        fn hold(&mut self) -> bool {
            !self.events.is_empty()
        }
    }

    #[test]
    fn holding_sink_stops_after_each_step() {
        let mut scan = ScanBuffer::new();
        scan.set_scanner(Some(Box::new(OneByte)));
        let mut sink = OneAtATime::default();
        scan.scan(b"abc", &mut sink);
        assert_eq!(sink.events, vec![Event::Raw(Bytes::from_static(b"a"))]);
        assert_eq!(scan.buffered(), b"bc");

        sink.events.clear();
        scan.resume(&mut sink);
        assert_eq!(sink.events, vec![Event::Raw(Bytes::from_static(b"b"))]);
        assert_eq!(scan.buffered(), b"c");
    }

    #[test]
    fn swapping_scanner_mid_stream() {
        let mut scan = ScanBuffer::new();
        scan.set_scanner(Some(Box::new(Stuck)));
        let mut events: Vec<Event> = Vec::new();
        scan.scan(b"xy", &mut events);

        scan.set_scanner(None);
        scan.scan(b"z", &mut events);
        assert_eq!(events, vec![Event::Raw(Bytes::from_static(b"xyz"))]);
    }
}
