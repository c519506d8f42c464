//! HTTP body framing.
//!
//! # Data Flow
//! ```text
//! transport (Stream / Tls)
//!     → chunked.rs (decode "<hex>\r\n<payload>\r\n" ... "0\r\n\r\n")
//!     → scanner installed on the coder
//!     → Endpoint callout
//! ```
//!
//! Request and status lines are not parsed here; install a `Regex` scanner
//! on the transport for those and stack a `ChunkedCoder` once the body
//! starts.

pub mod chunked;

pub use chunked::{ChunkedCoder, ChunkedError};
