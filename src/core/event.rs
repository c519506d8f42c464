//! Callout events.
//!
//! Every state transition in a chain is reported as exactly one [`Event`].
//! An event is created fresh for each callout and never mutated afterwards.

use std::sync::Arc;

use bytes::Bytes;

/// State tag attached to scanner-defined records.
pub type Tag = Arc<str>;

/// Why a stream (or a framed body inside it) ended.
#[derive(Debug, Clone, PartialEq)]
pub enum End {
    /// The chunked decoder saw the last-chunk. `trailer` holds the bytes
    /// following it, uninterpreted.
    Chunks { trailer: Bytes },
    /// The TLS peer closed the session cleanly (close_notify).
    Tls,
    /// The transport reached end of file.
    Eof,
}

/// A successful regex rule match.
#[derive(Debug, Clone, PartialEq)]
pub struct RegexMatch {
    /// The rule's state tag.
    pub state: Tag,
    /// Index of the winning rule in declaration order.
    pub rule: usize,
    /// The whole matched span.
    pub matched: Bytes,
    /// Capture groups 1.., `None` for groups that did not participate.
    pub groups: Vec<Option<Bytes>>,
    /// Auxiliary values declared with the rule.
    pub aux: Vec<String>,
}

/// Transport error details carried by [`Event::Error`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub kind: std::io::ErrorKind,
    pub message: String,
}

impl From<&std::io::Error> for ErrorInfo {
    fn from(e: &std::io::Error) -> Self {
        Self {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

/// A callout event.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Unframed bytes (no scanner installed).
    Raw(Bytes),
    /// A separator-delimited record from `TokenScan`.
    Record { state: Tag, record: Bytes },
    /// A regex rule match.
    Match(RegexMatch),
    /// Bytes released by `ByteLimit`.
    LimitData(Bytes),
    /// `ByteLimit` delivered its full limit.
    LimitReached,
    /// First application data after the TLS handshake.
    Start,
    /// End of stream or of a framed body.
    End(End),
    /// Fatal TLS engine fault. The session is unusable afterwards.
    SslError(rustls::Error),
    /// Transport I/O failure reported by the controller.
    Error(ErrorInfo),
}

impl Event {
    /// The state tag of this event.
    pub fn state(&self) -> &str {
        match self {
            Event::Raw(_) => "RAW",
            Event::Record { state, .. } => state,
            Event::Match(m) => &m.state,
            Event::LimitData(_) => "limit-data",
            Event::LimitReached => "limit-reached",
            Event::Start => "start",
            Event::End(_) => "END",
            Event::SslError(_) => "SSLERR",
            Event::Error(_) => "ERROR",
        }
    }

    /// Whether this event reports a fault.
    pub fn is_error(&self) -> bool {
        matches!(self, Event::SslError(_) | Event::Error(_))
    }

    /// Auxiliary values: rule aux for matches, `CHUNKS` for a chunked end.
    pub fn aux(&self) -> Vec<&str> {
        match self {
            Event::Match(m) => m.aux.iter().map(String::as_str).collect(),
            Event::End(End::Chunks { .. }) => vec!["CHUNKS"],
            _ => Vec::new(),
        }
    }

    /// The data payload carried by this event, if any.
    pub fn payload(&self) -> Option<&Bytes> {
        match self {
            Event::Raw(data) | Event::LimitData(data) => Some(data),
            Event::Record { record, .. } => Some(record),
            Event::Match(m) => Some(&m.matched),
            Event::End(End::Chunks { trailer }) => Some(trailer),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_tags() {
        assert_eq!(Event::Raw(Bytes::new()).state(), "RAW");
        assert_eq!(Event::LimitReached.state(), "limit-reached");
        assert_eq!(
            Event::Record {
                state: Tag::from("line"),
                record: Bytes::from_static(b"x"),
            }
            .state(),
            "line"
        );
        assert_eq!(Event::End(End::Tls).state(), "END");
    }

    #[test]
    fn chunked_end_carries_aux() {
        let event = Event::End(End::Chunks {
            trailer: Bytes::from_static(b"X-Sum: 1\r\n"),
        });
        assert_eq!(event.aux(), vec!["CHUNKS"]);
        assert_eq!(event.payload().unwrap().as_ref(), b"X-Sum: 1\r\n");
        assert!(!event.is_error());
    }

    #[test]
    fn error_flag() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(Event::Error(ErrorInfo::from(&io)).is_error());
        assert!(Event::SslError(rustls::Error::DecryptError).is_error());
    }
}
