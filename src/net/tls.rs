//! TLS adapter stage.
//!
//! # Data Flow
//! ```text
//! inbound RAW (records) → read_tls → process_new_packets → service
//! service:
//!     1. clear_out → engine writer
//!     2. engine reader → `start` once → ScanBuffer → callouts
//!        clean close_notify → END(Tls), no further work
//!     3. write_tls → upstream write (records)
//!     4. repeat until a pass makes no progress
//! ```
//!
//! # Design Decisions
//! - rustls runs in memory mode; the adapter never touches a socket
//! - Engine results are reduced to `Step`: would-block stalls quietly, every
//!   other fault is reported once as `SSLERR` and the session is retired
//! - One `TlsContext` (rustls configs) is built up front and shared by every
//!   session

use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

use bytes::{Buf, BytesMut};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName};
use rustls::{ClientConfig, ClientConnection, RootCertStore, ServerConfig, ServerConnection};
use serde::{Deserialize, Serialize};
use tracing::Span;

use crate::config::schema::TlsConfig;
use crate::core::callable::{Callable, Callout, FilterBase, FilterCallable, Lifecycle};
use crate::core::error::ChainError;
use crate::core::event::{End, Event};
use crate::net::stream::Stream;
use crate::observability::metrics;
use crate::scan::{ScanBuffer, Scannable};

/// Clear-text read size per engine read.
pub const BUFSIZE: usize = 64 * 1024;

/// Protocol versions a context will negotiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsVersions {
    Tls12,
    Tls13,
    #[default]
    All,
}

impl TlsVersions {
    fn protocol_versions(self) -> Vec<&'static rustls::SupportedProtocolVersion> {
        match self {
            TlsVersions::Tls12 => vec![&rustls::version::TLS12],
            TlsVersions::Tls13 => vec![&rustls::version::TLS13],
            TlsVersions::All => vec![&rustls::version::TLS13, &rustls::version::TLS12],
        }
    }
}

/// Where key or certificate material comes from.
#[derive(Debug, Clone)]
pub enum Source {
    /// PEM file on disk.
    Path(PathBuf),
    /// PEM text in memory.
    Pem(Vec<u8>),
    /// A single DER item in memory. Keys are taken as PKCS#8.
    Der(Vec<u8>),
}

/// Construction parameters for a [`TlsContext`].
#[derive(Debug, Clone, Default)]
pub struct TlsSettings {
    pub versions: TlsVersions,
    pub key: Option<Source>,
    pub certs: Option<Source>,
    /// Trust anchors used by the connect role.
    pub ca_certs: Vec<Source>,
    /// Default peer name for the connect role.
    pub server_name: Option<String>,
    pub alpn: Vec<Vec<u8>>,
}

impl From<&TlsConfig> for TlsSettings {
    fn from(config: &TlsConfig) -> Self {
        Self {
            versions: config.versions,
            key: config.key_path.clone().map(Source::Path),
            certs: config.cert_path.clone().map(Source::Path),
            ca_certs: config.ca_paths.iter().cloned().map(Source::Path).collect(),
            server_name: config.server_name.clone(),
            alpn: config.alpn.iter().map(|p| p.as_bytes().to_vec()).collect(),
        }
    }
}

/// Which side of the handshake a session plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Accept,
    Connect,
}

/// Outcome of one guarded engine operation.
#[derive(Debug)]
pub enum Step<T> {
    Progress(T),
    WouldBlock,
    Fatal(rustls::Error),
}

fn guard(result: io::Result<usize>) -> Step<usize> {
    match result {
        Ok(n) => Step::Progress(n),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Step::WouldBlock,
        Err(e) => Step::Fatal(rustls::Error::General(e.to_string())),
    }
}

/// rustls configurations for both roles.
#[derive(Clone)]
pub struct TlsContext {
    server: Option<Arc<ServerConfig>>,
    client: Arc<ClientConfig>,
    server_name: Option<String>,
}

impl TlsContext {
    pub fn new(settings: &TlsSettings) -> Result<Self, ChainError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let versions = settings.versions.protocol_versions();

        let identity = match (&settings.key, &settings.certs) {
            (Some(key), Some(certs)) => Some((load_certs(certs)?, load_key(key)?)),
            (None, None) => None,
            _ => {
                return Err(ChainError::TlsConfig(
                    "key and certificate chain must be given together".to_string(),
                ))
            }
        };

        let server = match &identity {
            Some((certs, key)) => {
                let mut config = ServerConfig::builder_with_provider(provider.clone())
                    .with_protocol_versions(&versions)?
                    .with_no_client_auth()
                    .with_single_cert(certs.clone(), key.clone_key())?;
                config.alpn_protocols = settings.alpn.clone();
                Some(Arc::new(config))
            }
            None => None,
        };

        let mut roots = RootCertStore::empty();
        for source in &settings.ca_certs {
            for cert in load_certs(source)? {
                roots.add(cert)?;
            }
        }
        let builder = ClientConfig::builder_with_provider(provider)
            .with_protocol_versions(&versions)?
            .with_root_certificates(roots);
        let mut client = match identity {
            Some((certs, key)) => builder.with_client_auth_cert(certs, key)?,
            None => builder.with_no_client_auth(),
        };
        client.alpn_protocols = settings.alpn.clone();

        tracing::debug!(
            versions = ?settings.versions,
            can_accept = server.is_some(),
            trust_anchors = settings.ca_certs.len(),
            "TLS context built"
        );

        Ok(Self {
            server,
            client: Arc::new(client),
            server_name: settings.server_name.clone(),
        })
    }

    pub fn can_accept(&self) -> bool {
        self.server.is_some()
    }

    fn session(&self, role: Role, hostname: Option<&str>) -> Result<rustls::Connection, ChainError> {
        match role {
            Role::Accept => {
                let config = self.server.clone().ok_or_else(|| {
                    ChainError::TlsConfig("accept role needs a key and certificate".to_string())
                })?;
                Ok(ServerConnection::new(config)?.into())
            }
            Role::Connect => {
                let name = hostname
                    .map(str::to_owned)
                    .or_else(|| self.server_name.clone())
                    .ok_or_else(|| {
                        ChainError::TlsConfig("connect role needs a server name".to_string())
                    })?;
                let name = ServerName::try_from(name)
                    .map_err(|e| ChainError::TlsConfig(e.to_string()))?;
                Ok(ClientConnection::new(self.client.clone(), name)?.into())
            }
        }
    }
}

fn read_pem(source: &Source) -> Result<Vec<u8>, ChainError> {
    match source {
        Source::Path(path) => Ok(std::fs::read(path)?),
        Source::Pem(pem) | Source::Der(pem) => Ok(pem.clone()),
    }
}

fn load_certs(source: &Source) -> Result<Vec<CertificateDer<'static>>, ChainError> {
    if let Source::Der(der) = source {
        return Ok(vec![CertificateDer::from(der.clone())]);
    }
    let pem = read_pem(source)?;
    let mut reader: &[u8] = &pem;
    let certs = rustls_pemfile::certs(&mut reader).collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(ChainError::TlsConfig(format!("no certificates in {source:?}")));
    }
    Ok(certs)
}

fn load_key(source: &Source) -> Result<PrivateKeyDer<'static>, ChainError> {
    if let Source::Der(der) = source {
        return Ok(PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(der.clone())));
    }
    let pem = read_pem(source)?;
    let mut reader: &[u8] = &pem;
    rustls_pemfile::private_key(&mut reader)?
        .ok_or_else(|| ChainError::TlsConfig(format!("no private key in {source:?}")))
}

/// TLS session stacked above `U`, which carries the records.
pub struct Tls<U> {
    base: FilterBase<U>,
    scan: ScanBuffer,
    ctx: TlsContext,
    role: Role,
    connection: Option<rustls::Connection>,
    clear_out: BytesMut,
    plain: Vec<u8>,
    startup: bool,
    ended: bool,
    failed: bool,
    close_sent: bool,
}

impl<U: Callable> Tls<U> {
    pub fn new(ctx: TlsContext) -> Self {
        Self {
            base: FilterBase::new(),
            scan: ScanBuffer::new(),
            ctx,
            role: Role::Accept,
            connection: None,
            clear_out: BytesMut::new(),
            plain: vec![0; BUFSIZE],
            startup: false,
            ended: false,
            failed: false,
            close_sent: false,
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.base.span = span;
        self
    }

    /// Start a session above `source`. A connecting session sends its
    /// ClientHello immediately. Returns the previous upstream, if any.
    pub fn open(
        &mut self,
        source: U,
        role: Role,
        hostname: Option<&str>,
        callout: &mut dyn Callout,
    ) -> Result<Option<U>, ChainError> {
        let connection = self.ctx.session(role, hostname)?;
        self.connection = Some(connection);
        self.role = role;
        self.clear_out.clear();
        self.scan.reset();
        self.startup = false;
        self.ended = false;
        self.failed = false;
        self.close_sent = false;
        let previous = self.base.open(source);
        tracing::debug!(parent: &self.base.span, ?role, "TLS session opened");
        self.drain_tls(callout)?;
        Ok(previous)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_handshaking(&self) -> bool {
        self.connection.as_ref().is_some_and(|c| c.is_handshaking())
    }

    /// First application data has arrived.
    pub fn is_started(&self) -> bool {
        self.startup
    }

    /// The peer closed the session cleanly.
    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// A fatal fault retired the session.
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    pub fn alpn_protocol(&self) -> Option<&[u8]> {
        self.connection.as_ref()?.alpn_protocol()
    }

    pub fn upstream(&self) -> Option<&U> {
        self.base.upstream()
    }

    pub fn into_upstream(self) -> Option<U> {
        self.base.into_upstream()
    }

    /// Send close_notify and flush it upstream. The session accepts no more
    /// writes afterwards.
    pub fn shutdown(&mut self, callout: &mut dyn Callout) -> Result<(), ChainError> {
        self.base.live_upstream()?;
        if self.failed {
            return Err(ChainError::TlsUnusable);
        }
        if !self.close_sent {
            self.service(callout)?;
            if let Some(connection) = self.connection.as_mut() {
                connection.send_close_notify();
            }
            self.close_sent = true;
            tracing::debug!(parent: &self.base.span, "close_notify queued");
        }
        self.drain_tls(callout).map(|_| ())
    }

    fn receive(&mut self, data: &[u8], callout: &mut dyn Callout) -> Result<(), ChainError> {
        if self.ended || self.failed {
            tracing::trace!(parent: &self.base.span, len = data.len(), "inbound records dropped");
            return Ok(());
        }
        let span = self.base.span.clone();
        let mut input = data;
        let mut stalled = false;
        while !input.is_empty() {
            let Some(connection) = self.connection.as_mut() else {
                return Ok(());
            };
            // The engine refuses input while its plaintext buffer is full;
            // one service pass drains it before giving up.
            let accepted = match connection.read_tls(&mut input) {
                Ok(n) => n > 0,
                Err(e) => {
                    tracing::trace!(parent: &span, error = %e, "engine refused input");
                    false
                }
            };
            if accepted {
                stalled = false;
            } else if stalled {
                let err = rustls::Error::General("TLS engine refused inbound records".to_string());
                return self.fail(err, callout);
            } else {
                stalled = true;
            }
            if let Err(e) = connection.process_new_packets() {
                return self.fail(e, callout);
            }
            self.service(callout)?;
            if self.ended || self.failed {
                break;
            }
        }
        Ok(())
    }

    fn service(&mut self, callout: &mut dyn Callout) -> Result<(), ChainError> {
        loop {
            if self.ended || self.failed {
                return Ok(());
            }
            let Some(connection) = self.connection.as_mut() else {
                return Ok(());
            };
            let mut progress = false;

            if !self.clear_out.is_empty() {
                match guard(connection.writer().write(&self.clear_out)) {
                    Step::Progress(0) | Step::WouldBlock => {}
                    Step::Progress(n) => {
                        self.clear_out.advance(n);
                        progress = true;
                    }
                    Step::Fatal(e) => return self.fail(e, callout),
                }
            }

            match guard(connection.reader().read(&mut self.plain[..])) {
                Step::Progress(0) => {
                    self.ended = true;
                    tracing::debug!(parent: &self.base.span, "peer closed TLS session");
                    self.drain_tls(callout)?;
                    callout.callout(Event::End(End::Tls));
                    return Ok(());
                }
                Step::Progress(n) => {
                    if !self.startup {
                        self.startup = true;
                        tracing::debug!(parent: &self.base.span, "TLS session started");
                        callout.callout(Event::Start);
                    }
                    self.scan.scan(&self.plain[..n], callout);
                    progress = true;
                }
                Step::WouldBlock => {}
                Step::Fatal(e) => return self.fail(e, callout),
            }

            if self.drain_tls(callout)? {
                progress = true;
            }
            if !progress {
                return Ok(());
            }
        }
    }

    /// Move every pending record to the upstream. Returns whether anything
    /// was sent.
    fn drain_tls(&mut self, callout: &mut dyn Callout) -> Result<bool, ChainError> {
        let Some(connection) = self.connection.as_mut() else {
            return Ok(false);
        };
        let mut records = Vec::new();
        while connection.wants_write() {
            if connection.write_tls(&mut records)? == 0 {
                break;
            }
        }
        if records.is_empty() {
            return Ok(false);
        }
        tracing::trace!(parent: &self.base.span, len = records.len(), "records out");
        self.relay(callout, |up, cb| up.write(&records, cb))?;
        Ok(true)
    }

    fn fail(&mut self, err: rustls::Error, callout: &mut dyn Callout) -> Result<(), ChainError> {
        tracing::warn!(parent: &self.base.span, error = %err, "TLS session failed");
        metrics::record_tls_error();
        self.failed = true;
        callout.callout(Event::SslError(err));
        // Any alert the engine queued still goes out.
        self.drain_tls(callout).map(|_| ())
    }
}

impl<U: Callable> Callable for Tls<U> {
    fn lifecycle(&self) -> Lifecycle {
        self.base.lifecycle()
    }

    fn write(&mut self, data: &[u8], callout: &mut dyn Callout) -> Result<(), ChainError> {
        if !self.base.write_enable {
            return self.relay(callout, |up, cb| up.write(data, cb));
        }
        self.base.live_upstream()?;
        if self.failed {
            return Err(ChainError::TlsUnusable);
        }
        if self.ended || self.close_sent {
            return Err(ChainError::TlsClosed);
        }
        self.clear_out.extend_from_slice(data);
        self.service(callout)
    }

    fn write_flush(&mut self, callout: &mut dyn Callout) -> Result<(), ChainError> {
        if self.base.write_enable {
            self.base.live_upstream()?;
            if self.failed {
                return Err(ChainError::TlsUnusable);
            }
            self.service(callout)?;
        }
        self.relay(callout, |up, cb| up.write_flush(cb))
    }

    /// Best-effort close_notify, then drop the session and close the
    /// upstream.
    fn close(&mut self) {
        if self.base.lifecycle() == Lifecycle::Closed {
            return;
        }
        if let Some(mut connection) = self.connection.take() {
            if !self.failed && !self.close_sent {
                connection.send_close_notify();
                let mut records = Vec::new();
                while connection.wants_write() {
                    match connection.write_tls(&mut records) {
                        Ok(0) | Err(_) => break,
                        Ok(_) => {}
                    }
                }
                if let Ok(upstream) = self.base.live_upstream() {
                    let mut ignored: Vec<Event> = Vec::new();
                    if let Err(e) = upstream.write(&records, &mut ignored) {
                        tracing::trace!(error = %e, "close_notify not sent");
                    }
                }
            }
        }
        self.clear_out.clear();
        self.base.close();
    }

    fn feed(&mut self, data: &[u8], callout: &mut dyn Callout) -> Result<(), ChainError> {
        self.relay(callout, |up, cb| up.feed(data, cb))
    }

    fn read_enable(&self) -> bool {
        self.base.read_enable
    }

    fn set_read_enable(&mut self, enable: bool) {
        self.base.read_enable = enable;
    }

    fn write_enable(&self) -> bool {
        self.base.write_enable
    }

    fn set_write_enable(&mut self, enable: bool) {
        self.base.write_enable = enable;
    }

    fn transport_mut(&mut self) -> Option<&mut Stream> {
        self.base.upstream_mut()?.transport_mut()
    }
}

impl<U: Callable> FilterCallable for Tls<U> {
    type Upstream = U;

    fn upstream_mut(&mut self) -> Option<&mut U> {
        self.base.live_upstream().ok()
    }

    fn incoming(&mut self, event: Event, callout: &mut dyn Callout) -> Result<(), ChainError> {
        match event {
            Event::Raw(data) if self.base.read_enable => self.receive(&data, callout),
            other => {
                callout.callout(other);
                Ok(())
            }
        }
    }
}

impl<U> Scannable for Tls<U> {
    fn scan_buffer(&self) -> &ScanBuffer {
        &self.scan
    }

    fn scan_buffer_mut(&mut self) -> &mut ScanBuffer {
        &mut self.scan
    }
}
