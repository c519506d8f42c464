//! filter-chain: chunked line-echo server.
//!
//! Every connection is served by the chain
//!
//! ```text
//! Stream → [Tls, accept role] → ChunkedCoder + TokenScan("\n")
//! ```
//!
//! Each line of the inbound chunked body is echoed back as one chunk; the
//! body's last-chunk is answered with the terminating chunk. The connection
//! closes when the peer does.

use std::path::PathBuf;

use clap::Parser;
use tokio::sync::broadcast;
use tokio::task::LocalSet;
use tracing::Span;

use filter_chain::config::{load_config, validate_config, ChainConfig, ControllerConfig};
use filter_chain::core::{Callable, ChainError, End, Endpoint, Event, Handle};
use filter_chain::http::ChunkedCoder;
use filter_chain::lifecycle::{trigger_on_signal, Shutdown};
use filter_chain::net::{
    Accepted, ConnectionGuard, ConnectionTracker, Controller, Listener, Role, Stream, Tls,
    TlsContext, TlsSettings,
};
use filter_chain::observability::{init_logging, init_metrics};
use filter_chain::scan::{Scannable, TokenScan};

type Chain = ChunkedCoder<Box<dyn Callable>>;

#[derive(Debug, Parser)]
#[command(name = "filter-chain", version, about = "Chunked line-echo server")]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override listener.bind_address.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ChainConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
        validate_config(&config).map_err(|errors| {
            errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        })?;
    }

    init_logging(&config.observability)?;
    tracing::info!("filter-chain v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        tls = config.listener.tls.is_some(),
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let tls = match &config.listener.tls {
        Some(tls) => Some(TlsContext::new(&TlsSettings::from(tls))?),
        None => None,
    };

    let listener = Listener::bind(&config.listener).await?;
    let shutdown = Shutdown::new();
    tokio::spawn(trigger_on_signal(shutdown.clone()));

    let tracker = ConnectionTracker::new();
    LocalSet::new()
        .run_until(accept_loop(listener, tls, &config, &shutdown, &tracker))
        .await;

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn accept_loop(
    listener: Listener,
    tls: Option<TlsContext>,
    config: &ChainConfig,
    shutdown: &Shutdown,
    tracker: &ConnectionTracker,
) {
    let mut stop = shutdown.subscribe();
    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = stop.recv() => break,
        };
        match accepted {
            Ok(accepted) => {
                let guard = tracker.track(accepted.id);
                tokio::task::spawn_local(serve(
                    accepted,
                    tls.clone(),
                    config.controller.clone(),
                    shutdown.subscribe(),
                    guard,
                ));
            }
            Err(e) => tracing::warn!(error = %e, "Accept failed"),
        }
    }

    listener.close();
    tracing::info!(
        active = tracker.active_count(),
        "Listener stopped, draining connections"
    );
    if !tracker.wait_drained(config.listener.drain_timeout()).await {
        tracing::warn!(
            active = tracker.active_count(),
            "Drain timeout elapsed with connections still open"
        );
    }
}

async fn serve(
    accepted: Accepted,
    tls: Option<TlsContext>,
    config: ControllerConfig,
    shutdown: broadcast::Receiver<()>,
    _guard: ConnectionGuard,
) {
    let Accepted {
        socket,
        peer,
        id,
        permit: _permit,
    } = accepted;
    let span = tracing::info_span!("connection", id = %id, peer = %peer);

    let chain = match build_chain(tls.as_ref(), &span) {
        Ok(chain) => chain,
        Err(e) => {
            tracing::warn!(parent: &span, error = %e, "Failed to build chain");
            return;
        }
    };
    let mut endpoint = Endpoint::open(chain, echo_lines).with_span(span.clone());
    let mut controller = Controller::new(config)
        .with_shutdown(shutdown)
        .with_span(span.clone());

    match controller.run(socket, &mut endpoint).await {
        Ok(()) => tracing::debug!(parent: &span, "Connection finished"),
        Err(e) => tracing::warn!(parent: &span, error = %e, "Connection failed"),
    }
}

fn build_chain(tls: Option<&TlsContext>, span: &Span) -> Result<Chain, ChainError> {
    let stream = Stream::opened().with_span(span.clone());
    let transport: Box<dyn Callable> = match tls {
        Some(ctx) => {
            let mut session = Tls::new(ctx.clone()).with_span(span.clone());
            let mut handshake: Vec<Event> = Vec::new();
            session.open(stream, Role::Accept, None, &mut handshake)?;
            Box::new(session)
        }
        None => Box::new(stream),
    };

    let mut coder = ChunkedCoder::over(transport).with_span(span.clone());
    coder.set_scanner(Some(Box::new(TokenScan::new("\n")?.with_state("line"))));
    Ok(coder)
}

fn echo_lines(handle: &mut Handle<'_, Chain>, event: Event) {
    let result = match event {
        Event::Record { record, .. } => {
            let mut line = record.to_vec();
            line.push(b'\n');
            handle.write(&line)
        }
        Event::End(End::Chunks { .. }) => {
            let rest = handle.flush_scan();
            let echoed = if rest.is_empty() {
                Ok(())
            } else {
                handle.write(&rest)
            };
            echoed.and_then(|()| handle.write_flush())
        }
        Event::End(_) => {
            handle.close();
            Ok(())
        }
        Event::SslError(_) | Event::Error(_) => {
            tracing::debug!(state = event.state(), "Closing after fault");
            handle.close();
            Ok(())
        }
        _ => Ok(()),
    };
    if let Err(e) = result {
        tracing::warn!(error = %e, "Echo failed, closing");
        handle.close();
    }
}
