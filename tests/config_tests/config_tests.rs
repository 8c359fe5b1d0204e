//! Tests for Config and ConfigBuilder

use std::net::{IpAddr, Ipv4Addr};

use netsession::error::NetError;
use netsession::{AddressFamily, Config, Engine, ExecutionMode, Transport};

#[test]
fn test_config_defaults() {
    let config = Config::default();

    assert_eq!(config.family, AddressFamily::V4);
    assert_eq!(config.transport, Transport::Tcp);
    assert_eq!(config.bind_addr, None);
    assert_eq!(config.port, 3000);
    assert_eq!(config.recv_buffer_size, 1024);
    assert_eq!(config.execution_mode, ExecutionMode::EventLoop);
    assert!(config.nodelay);
    assert!(config.validate().is_ok());
}

#[test]
fn test_config_builder_overrides() {
    let config = Config::builder()
        .family(AddressFamily::V6)
        .transport(Transport::Udp)
        .bind_addr(IpAddr::V4(Ipv4Addr::LOCALHOST))
        .port(4000)
        .backlog(8)
        .recv_buffer_size(64)
        .poll_capacity(4)
        .poll_timeout_ms(5)
        .max_connections(2)
        .execution_mode(ExecutionMode::WorkerThread)
        .connect_timeout_ms(0)
        .write_timeout_ms(0)
        .build();

    assert_eq!(config.family, AddressFamily::V6);
    assert_eq!(config.transport, Transport::Udp);
    assert_eq!(config.bind_addr, Some(IpAddr::V4(Ipv4Addr::LOCALHOST)));
    assert_eq!(config.port, 4000);
    assert_eq!(config.backlog, 8);
    assert_eq!(config.recv_buffer_size, 64);
    assert_eq!(config.poll_capacity, 4);
    assert_eq!(config.poll_timeout_ms, 5);
    assert_eq!(config.max_connections, 2);
    assert_eq!(config.execution_mode, ExecutionMode::WorkerThread);
    assert_eq!(config.connect_timeout_ms, 0);
    assert_eq!(config.write_timeout_ms, 0);
}

#[test]
fn test_config_validate_rejects_zero_values() {
    let invalid = [
        Config::builder().recv_buffer_size(0).build(),
        Config::builder().poll_capacity(0).build(),
        Config::builder().backlog(0).build(),
        Config::builder().max_connections(0).build(),
    ];

    for config in invalid {
        assert!(matches!(config.validate(), Err(NetError::Config(_))));
    }
}

#[test]
fn test_engine_rejects_invalid_config() {
    let config = Config::builder().recv_buffer_size(0).build();

    assert!(matches!(Engine::new(config), Err(NetError::Config(_))));
}

#[test]
fn test_engine_start_uses_config() {
    let config = Config::builder()
        .transport(Transport::Udp)
        .bind_addr(IpAddr::V4(Ipv4Addr::LOCALHOST))
        .port(0)
        .build();
    let mut engine = Engine::new(config).unwrap();

    engine.start().unwrap();

    let local = engine.server_local_addr().unwrap();
    assert_eq!(local.ip(), IpAddr::V4(Ipv4Addr::LOCALHOST));
    assert_eq!(engine.server().transport(), Transport::Udp);
}
