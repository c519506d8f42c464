//! Single-threaded, callout-driven filter chains.
//!
//! A chain is a stack of stages, each owning the stage below it:
//!
//! ```text
//! Endpoint (application callout)
//!     ↑ events            ↓ write / write_flush
//! ChunkedCoder<Tls<Stream>>   (any stack of FilterCallable stages)
//!     ↑ feed              ↓ outbound queue
//! Controller (tokio socket readiness)
//! ```
//!
//! Stages are sans-io: bytes enter through `feed`, leave through the
//! transport's outbound queue, and every state change is reported as one
//! [`Event`] in production order.

pub mod config;
pub mod core;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod scan;

pub use crate::config::schema::ChainConfig;
pub use crate::core::{
    Callable, Callout, ChainError, End, Endpoint, Event, FilterCallable, Handle, Lifecycle,
};
pub use crate::http::chunked::{ChunkedCoder, ChunkedError};
pub use crate::lifecycle::Shutdown;
pub use crate::net::{Controller, Role, Stream, Tls, TlsContext, TlsSettings};
pub use crate::scan::{ByteLimit, Regex, Rule, Scannable, Scanner, TokenScan};
