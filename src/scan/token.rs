//! Separator-delimited record scanner.

use bytes::Bytes;

use crate::core::error::ChainError;
use crate::core::event::{Event, Tag};
use crate::scan::{ScanTarget, Scanner};

const DEFAULT_STATE: &str = "record";

/// Splits the buffer on a fixed separator, reporting each record without
/// the separator. A trailing partial record waits for more data.
#[derive(Debug, Clone)]
pub struct TokenScan {
    separator: Bytes,
    state: Tag,
}

impl TokenScan {
    pub fn new(separator: impl AsRef<[u8]>) -> Result<Self, ChainError> {
        let separator = separator.as_ref();
        if separator.is_empty() {
            return Err(ChainError::InvalidScanner(
                "token separator must not be empty".to_string(),
            ));
        }
        Ok(Self {
            separator: Bytes::copy_from_slice(separator),
            state: Tag::from(DEFAULT_STATE),
        })
    }

    /// Report records under `state` instead of `record`.
    pub fn with_state(mut self, state: &str) -> Self {
        self.state = Tag::from(state);
        self
    }

    pub fn separator(&self) -> &[u8] {
        &self.separator
    }

    fn find(&self, haystack: &[u8]) -> Option<usize> {
        haystack
            .windows(self.separator.len())
            .position(|window| window == &self.separator[..])
    }
}

impl Scanner for TokenScan {
    fn scan(&mut self, target: &mut ScanTarget<'_>) -> bool {
        let Some(at) = self.find(target.buffer()) else {
            return false;
        };
        let mut record = target.consume(at + self.separator.len());
        record.truncate(at);
        target.callout(Event::Record {
            state: self.state.clone(),
            record,
        });
        true
    }
}
