//! Tests for EventNotifier
//!
//! These tests verify:
//! - Readiness is delivered for registered sockets under their token
//! - Nothing is delivered after deregistration
//! - Rearming re-delivers a condition that still holds
//! - Waker interrupts a blocking poll

use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::thread;
use std::time::{Duration, Instant};

use mio::{Interest, Token};
use netsession::notifier::{EventNotifier, Readiness, LISTENER_TOKEN};
use netsession::{AddressFamily, SocketHandle, Transport};

// =============================================================================
// Helper Functions
// =============================================================================

const DEADLINE: Duration = Duration::from_secs(5);

fn bound_udp() -> SocketHandle {
    let mut handle = SocketHandle::create(AddressFamily::V4, Transport::Udp).unwrap();
    handle
        .bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)), false)
        .unwrap();
    handle
}

fn poll_until_token(notifier: &mut EventNotifier, token: Token) -> Readiness {
    let start = Instant::now();
    loop {
        let ready = notifier.poll(Some(Duration::from_millis(50))).unwrap();
        if let Some(readiness) = ready.into_iter().find(|r| r.token == token) {
            return readiness;
        }
        assert!(start.elapsed() < DEADLINE, "no readiness for {:?}", token);
    }
}

fn send_datagram(to: &SocketHandle, payload: &[u8]) {
    let peer = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    peer.send_to(payload, to.local_addr().unwrap()).unwrap();
}

// =============================================================================
// Delivery Tests
// =============================================================================

#[test]
fn test_notifier_delivers_readable() {
    let mut notifier = EventNotifier::new(16).unwrap();
    let mut handle = bound_udp();
    let token = Token(1);

    notifier.register(&mut handle, token, Interest::READABLE).unwrap();
    assert!(notifier.is_registered(token));

    send_datagram(&handle, b"ping");

    let readiness = poll_until_token(&mut notifier, token);
    assert!(readiness.readable);
    assert!(!readiness.is_closed());
}

#[test]
fn test_notifier_idle_poll_times_out_empty() {
    let mut notifier = EventNotifier::new(16).unwrap();
    let mut handle = bound_udp();
    notifier
        .register(&mut handle, Token(1), Interest::READABLE)
        .unwrap();

    let ready = notifier.poll(Some(Duration::from_millis(20))).unwrap();

    assert!(ready.is_empty());
}

#[test]
fn test_notifier_nothing_after_deregister() {
    let mut notifier = EventNotifier::new(16).unwrap();
    let mut handle = bound_udp();
    let token = Token(2);
    notifier.register(&mut handle, token, Interest::READABLE).unwrap();

    send_datagram(&handle, b"late");
    thread::sleep(Duration::from_millis(20));
    notifier.deregister(&mut handle, token);
    // Second call is a no-op
    notifier.deregister(&mut handle, token);

    assert!(!notifier.is_registered(token));
    let ready = notifier.poll(Some(Duration::from_millis(50))).unwrap();
    assert!(ready.iter().all(|r| r.token != token));
}

#[test]
fn test_notifier_rearm_redelivers_pending_data() {
    let mut notifier = EventNotifier::new(16).unwrap();
    let mut handle = bound_udp();
    let token = LISTENER_TOKEN;
    notifier.register(&mut handle, token, Interest::READABLE).unwrap();

    send_datagram(&handle, b"one");
    send_datagram(&handle, b"two");
    poll_until_token(&mut notifier, token);

    // Consume one datagram; the other is still queued
    let mut buf = [0u8; 16];
    let (n, _) = handle.receive_from(&mut buf).unwrap().unwrap();
    assert_eq!(n, 3);

    notifier.rearm(&mut handle, token, Interest::READABLE);
    let readiness = poll_until_token(&mut notifier, token);
    assert!(readiness.readable);
}

#[test]
fn test_notifier_rearm_unregistered_token_is_noop() {
    let notifier = EventNotifier::new(16).unwrap();
    let mut handle = bound_udp();

    notifier.rearm(&mut handle, Token(5), Interest::READABLE);

    assert!(!notifier.is_registered(Token(5)));
}

// =============================================================================
// Waker Tests
// =============================================================================

#[test]
fn test_notifier_waker_interrupts_poll() {
    let mut notifier = EventNotifier::new(16).unwrap();
    let waker = notifier.waker();

    let waking = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        waker.wake().unwrap();
    });

    let start = Instant::now();
    let ready = notifier.poll(Some(DEADLINE)).unwrap();

    assert!(ready.is_empty());
    assert!(start.elapsed() < DEADLINE);
    waking.join().unwrap();
}
