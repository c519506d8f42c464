//! Byte-count scanner.
//!
//! Releases at most `limit` bytes in total, holding data back until at least
//! `threshold` bytes (counting what was already delivered) are available.
//! Once the limit is reached it reports `limit-reached` exactly once and then
//! stalls, leaving any excess in the buffer for whatever scanner comes next.

use crate::core::event::Event;
use crate::scan::{ScanTarget, Scanner};

#[derive(Debug, Clone)]
pub struct ByteLimit {
    limit: usize,
    threshold: usize,
    delivered: usize,
    reached: bool,
}

impl ByteLimit {
    /// Deliver bytes as they arrive, up to `limit`.
    pub fn new(limit: usize) -> Self {
        Self::with_threshold(limit, 0)
    }

    /// Deliver nothing until `threshold` bytes are available. A threshold
    /// above the limit is clamped to it.
    pub fn with_threshold(limit: usize, threshold: usize) -> Self {
        Self {
            limit,
            threshold: threshold.min(limit),
            delivered: 0,
            reached: false,
        }
    }

    pub fn delivered(&self) -> usize {
        self.delivered
    }

    pub fn remaining(&self) -> usize {
        self.limit - self.delivered
    }

    pub fn is_reached(&self) -> bool {
        self.reached
    }
}

impl Scanner for ByteLimit {
    fn scan(&mut self, target: &mut ScanTarget<'_>) -> bool {
        if self.reached {
            return false;
        }
        if self.delivered + target.len() < self.threshold {
            return false;
        }
        let count = target.len().min(self.remaining());
        if count > 0 {
            let data = target.consume(count);
            self.delivered += count;
            target.callout(Event::LimitData(data));
        }
        if self.delivered == self.limit {
            self.reached = true;
            target.callout(Event::LimitReached);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::ScanBuffer;
    use bytes::Bytes;

    fn buffer_with(limit: ByteLimit) -> ScanBuffer {
        let mut buffer = ScanBuffer::new();
        buffer.set_scanner(Some(Box::new(limit)));
        buffer
    }

    #[test]
    fn delivers_up_to_limit_then_stalls() {
        let mut buffer = buffer_with(ByteLimit::new(5));
        let mut events: Vec<Event> = Vec::new();

        buffer.scan(b"abc", &mut events);
        assert_eq!(events, vec![Event::LimitData(Bytes::from_static(b"abc"))]);

        buffer.scan(b"defgh", &mut events);
        assert_eq!(
            events[1..],
            [
                Event::LimitData(Bytes::from_static(b"de")),
                Event::LimitReached,
            ]
        );
        assert_eq!(buffer.buffered(), b"fgh");

        buffer.scan(b"ij", &mut events);
        assert_eq!(events.len(), 3);
    }

    #[test]
    fn threshold_holds_back_small_reads() {
        let mut buffer = buffer_with(ByteLimit::with_threshold(10, 4));
        let mut events: Vec<Event> = Vec::new();

        buffer.scan(b"ab", &mut events);
        assert!(events.is_empty());
        buffer.scan(b"cd", &mut events);
        assert_eq!(events, vec![Event::LimitData(Bytes::from_static(b"abcd"))]);

        // Delivered bytes count towards the threshold.
        buffer.scan(b"e", &mut events);
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn threshold_is_clamped() {
        let limit = ByteLimit::with_threshold(3, 100);
        let mut buffer = buffer_with(limit);
        let mut events: Vec<Event> = Vec::new();
        buffer.scan(b"xyz", &mut events);
        assert_eq!(
            events,
            vec![Event::LimitData(Bytes::from_static(b"xyz")), Event::LimitReached]
        );
    }

    #[test]
    fn accounting() {
        let mut limit = ByteLimit::new(4);
        let mut buf = bytes::BytesMut::from(&b"abcdef"[..]);
        let mut events: Vec<Event> = Vec::new();
        let mut target = ScanTarget::new(&mut buf, &mut events);
        assert!(limit.scan(&mut target));
        assert_eq!(limit.delivered(), 4);
        assert_eq!(limit.remaining(), 0);
        assert!(limit.is_reached());
        assert!(!limit.scan(&mut target));
    }
}
