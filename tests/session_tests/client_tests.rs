//! Tests for ClientSession
//!
//! These tests verify:
//! - TCP connect: Connecting -> Connected with one Connected event
//! - Bounded receive delivery as DataReceived events
//! - Disconnect idempotency and the single Disconnected event
//! - Misuse rejection outside Connected/Ready
//! - UDP sessions: Ready immediately, no connection events

use std::io::{Read, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::time::{Duration, Instant};

use netsession::error::NetError;
use netsession::notifier::EventNotifier;
use netsession::{
    AddressFamily, ClientSession, Config, NetEvent, SessionId, SessionKind, SessionState,
};

// =============================================================================
// Helper Functions
// =============================================================================

const DEADLINE: Duration = Duration::from_secs(5);

/// Poll and feed the session until `done` holds for the collected events
fn drive(
    notifier: &mut EventNotifier,
    session: &mut ClientSession,
    events: &mut Vec<NetEvent>,
    done: impl Fn(&[NetEvent]) -> bool,
) {
    let mut buf = vec![0u8; 1024];
    let start = Instant::now();
    while !done(events) {
        assert!(start.elapsed() < DEADLINE, "timed out, events so far: {:?}", events);
        for readiness in notifier.poll(Some(Duration::from_millis(20))).unwrap() {
            session.on_readiness(&readiness, notifier, &mut buf, events);
        }
    }
}

fn connected_pair(
    notifier: &mut EventNotifier,
) -> (ClientSession, TcpStream, Vec<NetEvent>) {
    let server = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let target = server.local_addr().unwrap();
    let id = SessionId::new(1);

    let (mut session, immediate) =
        ClientSession::connect(id, target, &Config::default(), notifier).unwrap();
    let mut events: Vec<NetEvent> = immediate.into_iter().collect();

    drive(notifier, &mut session, &mut events, |events| {
        events
            .iter()
            .any(|e| matches!(e, NetEvent::Connected { .. }))
    });

    let (peer, _) = server.accept().unwrap();
    (session, peer, events)
}

fn count_disconnected(events: &[NetEvent], id: SessionId) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, NetEvent::Disconnected { id: gone } if *gone == id))
        .count()
}

// =============================================================================
// TCP Tests
// =============================================================================

#[test]
fn test_session_connect_emits_connected_once() {
    let mut notifier = EventNotifier::new(16).unwrap();

    let (session, peer, events) = connected_pair(&mut notifier);

    assert_eq!(session.state(), SessionState::Connected);
    assert_eq!(session.kind(), SessionKind::TcpClient);
    assert_eq!(session.remote(), Some(peer.local_addr().unwrap()));
    assert_eq!(
        events,
        vec![NetEvent::Connected {
            id: SessionId::new(1),
            remote: peer.local_addr().unwrap(),
        }]
    );
}

#[test]
fn test_session_receives_data() {
    let mut notifier = EventNotifier::new(16).unwrap();
    let (mut session, mut peer, mut events) = connected_pair(&mut notifier);
    events.clear();

    peer.write_all(b"hello").unwrap();

    drive(&mut notifier, &mut session, &mut events, |events| !events.is_empty());
    assert_eq!(
        events[0],
        NetEvent::DataReceived {
            id: SessionId::new(1),
            bytes: bytes::Bytes::from_static(b"hello"),
            source: None,
        }
    );
}

#[test]
fn test_session_send_reaches_peer() {
    let mut notifier = EventNotifier::new(16).unwrap();
    let (mut session, mut peer, _) = connected_pair(&mut notifier);
    let mut events = Vec::new();

    let sent = session.send(b"abc", &notifier, &mut events).unwrap();

    assert_eq!(sent, 3);
    let mut buf = [0u8; 3];
    peer.set_read_timeout(Some(DEADLINE)).unwrap();
    peer.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"abc");
    assert!(events.is_empty());
}

#[test]
fn test_session_peer_close_disconnects() {
    let mut notifier = EventNotifier::new(16).unwrap();
    let (mut session, peer, mut events) = connected_pair(&mut notifier);
    events.clear();

    drop(peer);

    drive(&mut notifier, &mut session, &mut events, |events| {
        count_disconnected(events, SessionId::new(1)) > 0
    });
    assert_eq!(session.state(), SessionState::Disconnected);
    assert_eq!(events, vec![NetEvent::Disconnected { id: SessionId::new(1) }]);
}

#[test]
fn test_session_disconnect_is_idempotent() {
    let mut notifier = EventNotifier::new(16).unwrap();
    let (mut session, _peer, mut events) = connected_pair(&mut notifier);
    events.clear();

    session.disconnect(&notifier, &mut events);
    session.disconnect(&notifier, &mut events);
    session.disconnect(&notifier, &mut events);

    assert_eq!(count_disconnected(&events, SessionId::new(1)), 1);
    assert_eq!(events.len(), 1);
    assert_eq!(session.state(), SessionState::Disconnected);
}

#[test]
fn test_session_send_after_disconnect_is_misuse() {
    let mut notifier = EventNotifier::new(16).unwrap();
    let (mut session, _peer, _) = connected_pair(&mut notifier);
    let mut events = Vec::new();
    session.disconnect(&notifier, &mut events);
    events.clear();

    let result = session.send(b"late", &notifier, &mut events);

    assert!(matches!(result, Err(NetError::Misuse(_))));
    assert!(events.is_empty());
    assert_eq!(session.state(), SessionState::Disconnected);
}

#[test]
fn test_session_send_to_on_tcp_is_misuse() {
    let mut notifier = EventNotifier::new(16).unwrap();
    let (mut session, _peer, _) = connected_pair(&mut notifier);

    let result = session.send_to(SocketAddr::from((Ipv4Addr::LOCALHOST, 9)), b"x");

    assert!(matches!(result, Err(NetError::Misuse(_))));
    assert_eq!(session.state(), SessionState::Connected);
}

// =============================================================================
// UDP Tests
// =============================================================================

#[test]
fn test_session_datagram_ready_without_events() {
    let notifier = EventNotifier::new(16).unwrap();
    let peer = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();

    let session = ClientSession::datagram(
        SessionId::new(4),
        AddressFamily::V4,
        peer.local_addr().unwrap(),
        &notifier,
    )
    .unwrap();

    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(session.kind(), SessionKind::Udp);
    assert!(session.local_addr().unwrap().port() != 0);
}

#[test]
fn test_session_datagram_send_and_receive() {
    let mut notifier = EventNotifier::new(16).unwrap();
    let peer = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    peer.set_read_timeout(Some(DEADLINE)).unwrap();
    let id = SessionId::new(4);

    let mut session =
        ClientSession::datagram(id, AddressFamily::V4, peer.local_addr().unwrap(), &notifier)
            .unwrap();
    let mut events = Vec::new();

    session.send(b"ping", &notifier, &mut events).unwrap();
    let mut buf = [0u8; 16];
    let (n, from) = peer.recv_from(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"ping");

    peer.send_to(b"pong", (Ipv4Addr::LOCALHOST, from.port())).unwrap();
    drive(&mut notifier, &mut session, &mut events, |events| !events.is_empty());

    assert_eq!(
        events,
        vec![NetEvent::DataReceived {
            id,
            bytes: bytes::Bytes::from_static(b"pong"),
            source: Some(peer.local_addr().unwrap()),
        }]
    );
}

#[test]
fn test_session_datagram_disconnect_emits_nothing() {
    let notifier = EventNotifier::new(16).unwrap();
    let peer = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let mut session = ClientSession::datagram(
        SessionId::new(4),
        AddressFamily::V4,
        peer.local_addr().unwrap(),
        &notifier,
    )
    .unwrap();
    let mut events = Vec::new();

    session.disconnect(&notifier, &mut events);

    assert!(events.is_empty());
    assert_eq!(session.state(), SessionState::Disconnected);
}

// =============================================================================
// Identity Tests
// =============================================================================

#[test]
fn test_session_id_maps_to_poll_token() {
    assert_eq!(SessionId::new(1).token().unwrap(), mio::Token(1));
}

#[test]
fn test_session_id_rejects_reserved_tokens() {
    let listener = SessionId::new((usize::MAX - 1) as u64);
    let waker = SessionId::new(usize::MAX as u64);

    assert!(matches!(listener.token(), Err(NetError::Creation(_))));
    assert!(matches!(waker.token(), Err(NetError::Creation(_))));
    assert!(SessionId::new(u64::MAX).token().is_err());
}

#[test]
fn test_session_with_reserved_id_is_not_created() {
    let notifier = EventNotifier::new(16).unwrap();
    let remote = SocketAddr::from((Ipv4Addr::LOCALHOST, 9));
    let id = SessionId::new((usize::MAX - 1) as u64);

    let result = ClientSession::datagram(id, AddressFamily::V4, remote, &notifier);

    assert!(matches!(result, Err(NetError::Creation(_))));
}
