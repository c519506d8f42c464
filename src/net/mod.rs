//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → connection.rs (ID, span, live-connection accounting)
//!     → controller.rs (readiness loop)
//!         → stream.rs (transport stage, outbound queue)
//!         → tls.rs (optional TLS adapter stage)
//!         → upper stages and the Endpoint callout
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Stages above the controller are sans-io and testable in memory
//! - TLS is optional and stacked like any other filter

pub mod connection;
pub mod controller;
pub mod listener;
pub mod stream;
pub mod tls;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker};
pub use controller::Controller;
pub use listener::{Accepted, Listener, ListenerError};
pub use stream::Stream;
pub use tls::{Role, Source, Step, Tls, TlsContext, TlsSettings, TlsVersions};
