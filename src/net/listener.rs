//! Bounded TCP listener.
//!
//! # Responsibilities
//! - Bind to the configured address
//! - Accept incoming TCP connections
//! - Enforce `max_connections` via semaphore permits

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::schema::ListenerConfig;
use crate::net::connection::ConnectionId;

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("invalid bind address {address:?}: {source}")]
    Address {
        address: String,
        source: std::net::AddrParseError,
    },

    #[error("failed to bind: {0}")]
    Bind(std::io::Error),

    #[error("failed to accept: {0}")]
    Accept(std::io::Error),

    #[error("listener is shut down")]
    Closed,
}

/// A freshly accepted connection.
#[derive(Debug)]
pub struct Accepted {
    pub socket: TcpStream,
    pub peer: SocketAddr,
    pub id: ConnectionId,
    /// Connection slot; released when dropped.
    pub permit: OwnedSemaphorePermit,
}

/// A TCP listener that limits concurrent connections.
///
/// When the limit is reached, accepting waits until a slot is released.
pub struct Listener {
    inner: TcpListener,
    connection_limit: Arc<Semaphore>,
    max_connections: usize,
}

impl Listener {
    pub async fn bind(config: &ListenerConfig) -> Result<Self, ListenerError> {
        let addr: SocketAddr =
            config
                .bind_address
                .parse()
                .map_err(|source| ListenerError::Address {
                    address: config.bind_address.clone(),
                    source,
                })?;

        let inner = TcpListener::bind(addr).await.map_err(ListenerError::Bind)?;
        let local_addr = inner.local_addr().map_err(ListenerError::Bind)?;

        tracing::info!(
            address = %local_addr,
            max_connections = config.max_connections,
            "Listener bound"
        );

        Ok(Self {
            inner,
            connection_limit: Arc::new(Semaphore::new(config.max_connections)),
            max_connections: config.max_connections,
        })
    }

    /// Wait for a free slot, then accept.
    pub async fn accept(&self) -> Result<Accepted, ListenerError> {
        let permit = self
            .connection_limit
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ListenerError::Closed)?;

        let (socket, peer) = self.inner.accept().await.map_err(ListenerError::Accept)?;
        let id = ConnectionId::new();

        tracing::debug!(
            connection_id = %id,
            peer_addr = %peer,
            available_permits = self.connection_limit.available_permits(),
            "Connection accepted"
        );

        Ok(Accepted {
            socket,
            peer,
            id,
            permit,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.inner.local_addr()
    }

    pub fn available_permits(&self) -> usize {
        self.connection_limit.available_permits()
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Stop handing out slots; pending and future accepts fail with `Closed`.
    pub fn close(&self) {
        self.connection_limit.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_connections: usize) -> ListenerConfig {
        ListenerConfig {
            bind_address: "127.0.0.1:0".to_string(),
            max_connections,
            ..ListenerConfig::default()
        }
    }

    #[tokio::test]
    async fn permits_bound_connections() {
        let listener = Listener::bind(&config(1)).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let _client = TcpStream::connect(addr).await.unwrap();
        let accepted = listener.accept().await.unwrap();
        assert_eq!(listener.available_permits(), 0);
        drop(accepted);
        assert_eq!(listener.available_permits(), 1);
    }

    #[tokio::test]
    async fn rejects_bad_address() {
        let bad = ListenerConfig {
            bind_address: "not an address".to_string(),
            max_connections: 1,
            ..ListenerConfig::default()
        };
        assert!(matches!(
            Listener::bind(&bad).await,
            Err(ListenerError::Address { .. })
        ));
    }

    #[tokio::test]
    async fn closed_listener_refuses() {
        let listener = Listener::bind(&config(4)).await.unwrap();
        listener.close();
        assert!(matches!(listener.accept().await, Err(ListenerError::Closed)));
    }
}
