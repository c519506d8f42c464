//! Filter chain core.
//!
//! # Data Flow
//! ```text
//! Inbound (network → application):
//!     Controller reads socket
//!     → Endpoint::feed
//!     → top stage feed() recurses to the bottom Stream
//!     → each stage handles its upstream's events in incoming()
//!     → events queued on the Endpoint, dispatched FIFO to the callout
//!
//! Outbound (application → network):
//!     Handle::write / Endpoint::write
//!     → each stage reframes (chunked, TLS) and writes upstream
//!     → Stream outbound queue
//!     → Controller drains it when the socket is writable
//! ```
//!
//! # Design Decisions
//! - Stages own their upstream exclusively; there are no shared references
//! - Events are a closed sum type, matched instead of inspected by tag
//! - A stage sees its upstream's events only after the upstream finished
//!   its pass, so it may write upstream while handling them
//! - The application callout runs outside every stage borrow and may write
//!   back into the chain

pub mod callable;
pub mod endpoint;
pub mod error;
pub mod event;

pub use callable::{Callable, Callout, FilterBase, FilterCallable, Lifecycle};
pub use endpoint::{Endpoint, Handle};
pub use error::ChainError;
pub use event::{End, ErrorInfo, Event, RegexMatch, Tag};
