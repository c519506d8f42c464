//! Chains driven over real loopback sockets.

mod common;

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use filter_chain::config::{ControllerConfig, ListenerConfig};
use filter_chain::core::{Callable, End, Endpoint, Event, Handle};
use filter_chain::http::ChunkedCoder;
use filter_chain::net::{Controller, Listener, Role, Stream, Tls, TlsVersions};
use filter_chain::scan::{Scannable, TokenScan};

const DEADLINE: Duration = Duration::from_secs(10);

fn loopback() -> ListenerConfig {
    ListenerConfig {
        bind_address: "127.0.0.1:0".to_string(),
        ..ListenerConfig::default()
    }
}

/// Echo every line back as its own chunk and answer the last-chunk.
fn echo_lines<C: Callable + Scannable>(handle: &mut Handle<'_, C>, event: Event) {
    match event {
        Event::Record { record, .. } => {
            let mut line = record.to_vec();
            line.push(b'\n');
            handle.write(&line).unwrap();
        }
        Event::End(End::Chunks { .. }) => handle.write_flush().unwrap(),
        Event::End(_) | Event::SslError(_) | Event::Error(_) => handle.close(),
        _ => {}
    }
}

fn line_coder<U: Callable>(upstream: U) -> ChunkedCoder<U> {
    let mut coder = ChunkedCoder::over(upstream);
    coder.set_scanner(Some(Box::new(TokenScan::new("\n").unwrap().with_state("line"))));
    coder
}

#[tokio::test]
async fn chunked_line_echo_over_tcp() {
    let listener = Listener::bind(&loopback()).await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = async {
        let accepted = listener.accept().await.unwrap();
        let mut endpoint = Endpoint::open(line_coder(Stream::opened()), echo_lines);
        Controller::new(ControllerConfig::default())
            .run(accepted.socket, &mut endpoint)
            .await
    };
    let client = async {
        let mut socket = TcpStream::connect(addr).await.unwrap();
        socket
            .write_all(b"6\r\nhello\n\r\n5\r\nab\ncd\r\n0\r\n\r\n")
            .await
            .unwrap();
        socket.shutdown().await.unwrap();
        let mut reply = Vec::new();
        socket.read_to_end(&mut reply).await.unwrap();
        reply
    };

    let (served, reply) = tokio::time::timeout(DEADLINE, async { tokio::join!(server, client) })
        .await
        .unwrap();
    served.unwrap();
    assert_eq!(reply, b"6\r\nhello\n\r\n3\r\nab\n\r\n0\r\n\r\n");
}

#[tokio::test]
async fn malformed_chunk_closes_connection() {
    let listener = Listener::bind(&loopback()).await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = async {
        let accepted = listener.accept().await.unwrap();
        let mut endpoint = Endpoint::open(line_coder(Stream::opened()), echo_lines);
        Controller::new(ControllerConfig::default())
            .run(accepted.socket, &mut endpoint)
            .await
    };
    let client = async {
        let mut socket = TcpStream::connect(addr).await.unwrap();
        socket.write_all(b"zz\r\nnope\r\n").await.unwrap();
        let mut reply = Vec::new();
        // The server may reset instead of closing cleanly.
        let _ = socket.read_to_end(&mut reply).await;
        reply
    };

    let (served, reply) = tokio::time::timeout(DEADLINE, async { tokio::join!(server, client) })
        .await
        .unwrap();
    assert!(served.is_err());
    assert!(reply.is_empty());
}

#[tokio::test]
async fn chunked_echo_over_tls() {
    let identity = common::self_signed();
    let (server_ctx, client_ctx) = common::contexts(&identity, TlsVersions::All);
    let listener = Listener::bind(&loopback()).await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = async {
        let accepted = listener.accept().await.unwrap();
        let mut tls = Tls::new(server_ctx);
        let mut handshake: Vec<Event> = Vec::new();
        tls.open(Stream::opened(), Role::Accept, None, &mut handshake)
            .unwrap();
        let mut endpoint = Endpoint::open(line_coder(tls), echo_lines);
        Controller::new(ControllerConfig::default())
            .run(accepted.socket, &mut endpoint)
            .await
    };

    let received = Rc::new(RefCell::new(Vec::new()));
    let client = {
        let received = received.clone();
        async move {
            let socket = TcpStream::connect(addr).await.unwrap();
            let mut tls = Tls::new(client_ctx);
            let mut handshake: Vec<Event> = Vec::new();
            tls.open(Stream::opened(), Role::Connect, None, &mut handshake)
                .unwrap();
            let mut endpoint = Endpoint::open(
                line_coder(tls),
                move |handle: &mut Handle<'_, ChunkedCoder<Tls<Stream>>>, event| match event {
                    Event::Record { record, .. } => received.borrow_mut().push(record),
                    Event::End(_) | Event::SslError(_) | Event::Error(_) => handle.close(),
                    _ => {}
                },
            );
            endpoint.write(b"one\ntwo\n").unwrap();
            endpoint.write_flush().unwrap();
            Controller::new(ControllerConfig::default())
                .run(socket, &mut endpoint)
                .await
        }
    };

    let (served, finished) = tokio::time::timeout(DEADLINE, async { tokio::join!(server, client) })
        .await
        .unwrap();
    // The server answers close_notify while the client tears its socket
    // down, so only the client's outcome is deterministic.
    let _ = served;
    finished.unwrap();

    let received = received.borrow();
    let lines: Vec<&[u8]> = received.iter().map(|r| r.as_ref()).collect();
    assert_eq!(lines, vec![&b"one"[..], &b"two"[..]]);
}
