//! Line transport tests against a scripted gateway on loopback TCP

use intesis_wmp::client::message::{WmpCommand, WmpEvent};
use intesis_wmp::client::{TcpTransport, TransportEvent, TransportRegistry, WmpTransport};
use intesis_wmp::{DriverConfig, IntesisDevice, StateChangeEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{timeout, Instant};

mod common;
use common::test_fixtures::{cooling_registers, test_config, SOON};
use common::FakeWmpDevice;

async fn next_matching<F>(rx: &mut broadcast::Receiver<TransportEvent>, mut wanted: F) -> TransportEvent
where
    F: FnMut(&TransportEvent) -> bool,
{
    timeout(SOON, async {
        loop {
            let event = rx.recv().await.unwrap();
            if wanted(&event) {
                return event;
            }
        }
    })
    .await
    .expect("event did not arrive in time")
}

#[tokio::test]
async fn test_identify_on_connect() {
    let device = FakeWmpDevice::start(&[]).await;
    let transport = TcpTransport::start(test_config(device.port()));
    transport.wait_connected(SOON).await.unwrap();

    let wmp = IntesisDevice::new(transport.clone(), test_config(device.port()));
    let identity = wmp.get_info().await.unwrap();

    assert_eq!(identity.model, "FJ-RC-WMP-1");
    assert_eq!(identity.name, "living-room");
    assert_eq!(identity.serial_number, "CC3F1D01AB23");
    assert_eq!(device.received().first().map(String::as_str), Some("ID"));
    assert!(device.wait_for_line("INFO", SOON).await);

    transport.shutdown().await;
}

#[tokio::test]
async fn test_keepalive_pings_until_close() {
    let device = FakeWmpDevice::start(&[]).await;
    let config = DriverConfig {
        keepalive_interval: Duration::from_millis(150),
        // Keep the socket down once the device closes it
        reconnect_delay: Duration::from_secs(30),
        ..test_config(device.port())
    };
    let transport = TcpTransport::start(config);
    let mut events = transport.subscribe();
    transport.wait_connected(SOON).await.unwrap();

    timeout(SOON, async {
        while device.count("PING") < 3 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("keepalive pings did not arrive");

    let pings: Vec<Instant> = device
        .received_at()
        .into_iter()
        .filter(|(_, line)| line == "PING")
        .map(|(at, _)| at)
        .collect();
    for pair in pings.windows(2) {
        let gap = pair[1].duration_since(pair[0]);
        assert!(gap >= Duration::from_millis(100), "pings too close: {gap:?}");
    }

    device.drop_connections();
    next_matching(&mut events, |e| *e == TransportEvent::Closed).await;
    let pings_at_close = device.count("PING");

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(device.count("PING"), pings_at_close);
    assert_eq!(device.connections(), 1);
    assert!(!transport.is_connected());

    transport.shutdown().await;
}

#[tokio::test]
async fn test_reconnects_once_after_close() {
    let device = FakeWmpDevice::start(&[]).await;
    let transport = TcpTransport::start(test_config(device.port()));
    transport.wait_connected(SOON).await.unwrap();
    let mut events = transport.subscribe();
    assert!(device.wait_for_line("ID", SOON).await);

    device.drop_connections();

    next_matching(&mut events, |e| *e == TransportEvent::Closed).await;
    next_matching(&mut events, |e| *e == TransportEvent::Connected).await;

    // Give a second timer the chance to fire if one had been scheduled
    tokio::time::sleep(Duration::from_millis(600)).await;

    assert_eq!(device.connections(), 2);
    let stats = transport.stats();
    assert_eq!(stats.connects, 2);
    assert_eq!(stats.disconnects, 1);
    assert_eq!(stats.reconnect_attempts, 1);

    // The same subscriber keeps receiving after the reconnect
    transport.send(WmpCommand::Ping).await.unwrap();
    let pong = next_matching(&mut events, |e| {
        matches!(e, TransportEvent::Message(WmpEvent::Pong))
    })
    .await;
    assert_eq!(pong, TransportEvent::Message(WmpEvent::Pong));

    transport.shutdown().await;
}

#[tokio::test]
async fn test_keeps_retrying_while_device_is_down() {
    // Reserve a port, then leave it closed
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let transport = TcpTransport::start(test_config(port));
    tokio::time::sleep(Duration::from_millis(700)).await;

    assert!(!transport.is_connected());
    let stats = transport.stats();
    assert_eq!(stats.connects, 0);
    // 200 ms delay between attempts: never more than one timer at a time
    assert!(stats.reconnect_attempts >= 1 && stats.reconnect_attempts <= 4);

    transport.shutdown().await;
}

#[tokio::test]
async fn test_synchronization_over_tcp() {
    let device = FakeWmpDevice::start(&cooling_registers()).await;
    let registry = TransportRegistry::new();
    let wmp = IntesisDevice::connect(&registry, test_config(device.port()));
    let mut changes = wmp.subscribe();

    wmp.start_synchronization();
    timeout(SOON, async {
        loop {
            if changes.recv().await.unwrap() == StateChangeEvent::Updated {
                break;
            }
        }
    })
    .await
    .unwrap();

    assert!(wmp.valid());
    assert_eq!(wmp.active(), Some(true));
    assert_eq!(wmp.mode().as_deref(), Some("cool"));
    assert_eq!(wmp.fan_speed().as_deref(), Some("low"));
    assert_eq!(wmp.swing_mode().as_deref(), Some("swing"));
    assert_eq!(wmp.setpoint(), Some(21.5));
    assert_eq!(wmp.current_temperature(), Some(28.0));
    assert_eq!(wmp.outdoor_temperature(), Some(-1.5));
    assert_eq!(wmp.locked(), Some(false));
    assert_eq!(wmp.min_setpoint(), Some(18.0));
    assert_eq!(wmp.max_setpoint(), Some(30.0));

    assert!(device.wait_for_line("LIMITS:SETPTEMP,[180,300]", SOON).await);
    assert!(device.received().contains(&"GET,1:*".to_string()));

    wmp.stop_synchronization();
    registry.shutdown_all().await;
}

#[tokio::test]
async fn test_acknowledged_write_over_tcp() {
    let device = FakeWmpDevice::start(&cooling_registers()).await;
    let registry = TransportRegistry::new();
    let config = test_config(device.port());
    let transport = registry.get_or_start(&config);
    transport.wait_connected(SOON).await.unwrap();

    let wmp = IntesisDevice::new(transport, config);
    let result = wmp.set_mode("heat").await.unwrap();

    assert!(result.success, "write failed: {:?}", result.error);
    assert!(device.received().contains(&"SET,1:MODE,HEAT".to_string()));
    // No optimistic update
    assert_eq!(wmp.mode(), None);

    // The value shows up once the device reports it on the next poll
    device.set_register("MODE", "HEAT");
    wmp.refresh_state().await.unwrap();
    assert_eq!(wmp.mode().as_deref(), Some("heat"));

    registry.shutdown_all().await;
}

#[tokio::test]
async fn test_registry_shares_one_socket_per_host() {
    let device = FakeWmpDevice::start(&[]).await;
    let registry = TransportRegistry::new();
    let config = test_config(device.port());

    let first = registry.get_or_start(&config);
    let second = registry.get_or_start(&config);
    assert!(Arc::ptr_eq(&first, &second));

    first.wait_connected(SOON).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(device.connections(), 1);

    registry.shutdown_all().await;
}
