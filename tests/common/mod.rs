//! Shared utilities for integration tests.
#![allow(dead_code)]

use filter_chain::core::{Callable, Event};
use filter_chain::net::{Source, TlsContext, TlsSettings, TlsVersions};

/// A self-signed certificate for `localhost` with its PKCS#8 key, both DER.
pub struct Identity {
    pub cert: Vec<u8>,
    pub key: Vec<u8>,
}

pub fn self_signed() -> Identity {
    let rcgen::CertifiedKey { cert, key_pair } =
        rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    Identity {
        cert: cert.der().to_vec(),
        key: key_pair.serialize_der(),
    }
}

pub fn server_settings(identity: &Identity) -> TlsSettings {
    TlsSettings {
        key: Some(Source::Der(identity.key.clone())),
        certs: Some(Source::Der(identity.cert.clone())),
        ..TlsSettings::default()
    }
}

pub fn client_settings(identity: &Identity) -> TlsSettings {
    TlsSettings {
        ca_certs: vec![Source::Der(identity.cert.clone())],
        server_name: Some("localhost".to_string()),
        ..TlsSettings::default()
    }
}

pub fn contexts(identity: &Identity, versions: TlsVersions) -> (TlsContext, TlsContext) {
    let server = TlsSettings {
        versions,
        ..server_settings(identity)
    };
    let client = TlsSettings {
        versions,
        ..client_settings(identity)
    };
    (
        TlsContext::new(&server).unwrap(),
        TlsContext::new(&client).unwrap(),
    )
}

/// Shuttle queued transport bytes between two in-memory chains until
/// neither side has anything left to send. Closed sides drop what they get.
pub fn pump<A, B>(a: &mut A, a_events: &mut Vec<Event>, b: &mut B, b_events: &mut Vec<Event>)
where
    A: Callable,
    B: Callable,
{
    loop {
        let a_out = a.transport_mut().unwrap().take_outbound();
        let b_out = b.transport_mut().unwrap().take_outbound();
        if a_out.is_empty() && b_out.is_empty() {
            return;
        }
        if !a_out.is_empty() && b.is_open() {
            b.feed(&a_out, b_events).unwrap();
        }
        if !b_out.is_empty() && a.is_open() {
            a.feed(&b_out, a_events).unwrap();
        }
    }
}

/// Concatenated payload of every RAW event.
pub fn raw_bytes(events: &[Event]) -> Vec<u8> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::Raw(data) => Some(data.as_ref()),
            _ => None,
        })
        .flatten()
        .copied()
        .collect()
}

pub fn count_state(events: &[Event], state: &str) -> usize {
    events.iter().filter(|e| e.state() == state).count()
}
