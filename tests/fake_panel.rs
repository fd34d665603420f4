// End-to-end tests against a scripted panel on a local TCP socket.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use telenot_bridge::constants::{CONFIRM_ACK, SEND_NORM, SET_DATE_TIME_PREFIX, USED_STATE};
use telenot_bridge::frame::{is_valid_frame, seal};
use telenot_bridge::{
    BridgeConfig, BridgeEvent, Command, ContactKind, EventReceiver, TelenotBridge, TelenotError,
};

struct FakePanel {
    stream: TcpStream,
}

impl FakePanel {
    async fn accept(listener: &TcpListener) -> Self {
        let (stream, _) = timeout(Duration::from_secs(5), listener.accept())
            .await
            .expect("bridge did not connect")
            .unwrap();
        Self { stream }
    }

    async fn send(&mut self, frame_hex: &str) {
        self.stream
            .write_all(&hex::decode(frame_hex).unwrap())
            .await
            .unwrap();
    }

    async fn expect(&mut self, want: &[u8]) {
        let mut got = vec![0u8; want.len()];
        timeout(Duration::from_secs(5), self.stream.read_exact(&mut got))
            .await
            .expect("bridge did not answer")
            .unwrap();
        assert_eq!(hex::encode(&got), hex::encode(want));
    }

    async fn expect_hex(&mut self, want: &str) {
        self.expect(&hex::decode(want).unwrap()).await;
    }

    async fn expect_eof(&mut self) {
        let mut buf = [0u8; 32];
        let read = timeout(Duration::from_secs(5), self.stream.read(&mut buf))
            .await
            .expect("connection still open");
        assert!(matches!(read, Ok(0)), "expected end of stream, got {read:?}");
    }

    async fn expect_silence(&mut self) {
        let mut buf = [0u8; 1];
        assert!(
            timeout(Duration::from_millis(200), self.stream.read(&mut buf))
                .await
                .is_err(),
            "bridge wrote unexpectedly"
        );
    }
}

async fn listen() -> (TcpListener, BridgeConfig) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let config = BridgeConfig::builder().host("127.0.0.1").port(port).build();
    (listener, config)
}

fn sb_status(sb: &str) -> String {
    seal(&format!(
        "683636687302052400050002{}{sb:f<16}{}",
        "00".repeat(6),
        "ff".repeat(32)
    ))
    .unwrap()
}

fn used_inputs(bitmap: &str) -> String {
    seal(&format!("680e0e6873020a2400000071{bitmap:f<12}")).unwrap()
}

fn used_outputs(bitmap: &str) -> String {
    seal(&format!("681818687302142400050072{bitmap:f<32}")).unwrap()
}

fn contact_info(address: u16, name: &str) -> String {
    let body = format!(
        "73020a0c00{address:04x}{}{:02x}00{}",
        "0".repeat(14),
        name.len(),
        hex::encode(name)
    );
    let len = body.len() / 2;
    seal(&format!("68{len:02x}{len:02x}68{body}")).unwrap()
}

/// Security areas reported by events already queued on `rx`.
fn queued_areas(rx: &mut EventReceiver) -> Vec<u8> {
    let mut areas = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let BridgeEvent::SecurityArea(area) = event {
            areas.push(area.area);
        }
    }
    areas
}

async fn next_matching<F>(rx: &mut EventReceiver, mut pred: F) -> BridgeEvent
where
    F: FnMut(&BridgeEvent) -> bool,
{
    timeout(Duration::from_secs(5), async {
        loop {
            let event = rx.recv().await.unwrap();
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("event not seen")
}

#[tokio::test]
async fn test_idle_poll_is_acknowledged() {
    let (listener, config) = listen().await;
    let bridge = TelenotBridge::start(config);
    let mut panel = FakePanel::accept(&listener).await;
    bridge.wait_connected(Duration::from_secs(5)).await.unwrap();

    panel.send(SEND_NORM).await;
    panel.expect_hex(CONFIRM_ACK).await;
    // the poll closed the gate; nothing else goes out
    panel.expect_silence().await;
}

#[tokio::test]
async fn test_status_telegram_opens_gate_for_command() {
    let (listener, config) = listen().await;
    let bridge = TelenotBridge::start(config);
    let mut events = bridge.subscribe();
    let mut panel = FakePanel::accept(&listener).await;

    // area 1 disarmed, the rest clear
    panel.send(&sb_status("fe")).await;
    panel.expect_hex(CONFIRM_ACK).await;

    let area = next_matching(&mut events, |e| matches!(e, BridgeEvent::SecurityArea(_))).await;
    match area {
        BridgeEvent::SecurityArea(area) => {
            assert_eq!(area.area, 1);
            assert!(area.status().is_disarmed());
        }
        _ => unreachable!(),
    }

    bridge.disarm_area(1).await.unwrap();
    panel
        .expect(&Command::DisarmArea { area: 1 }.to_bytes().unwrap())
        .await;

    // the gate is closed again until the panel's next qualifying telegram
    panel.expect_silence().await;
    assert!(matches!(
        timeout(Duration::from_millis(300), bridge.reset_alarm(1)).await,
        Err(_)
    ));
}

#[tokio::test]
async fn test_command_times_out_without_ready() {
    let (listener, config) = listen().await;
    let config = BridgeConfig {
        send_timeout_ms: 300,
        ..config
    };
    let bridge = TelenotBridge::start(config);
    let mut panel = FakePanel::accept(&listener).await;
    bridge.wait_connected(Duration::from_secs(5)).await.unwrap();

    match bridge.arm_area(2, telenot_bridge::ArmMode::Internal).await {
        Err(TelenotError::CommandTimeout { command, timeout_ms }) => {
            assert_eq!(command, "INT_ARM area 2");
            assert_eq!(timeout_ms, 300);
        }
        other => panic!("unexpected result {other:?}"),
    }
    panel.expect_silence().await;

    // the connection survives a command timeout
    panel.send(SEND_NORM).await;
    panel.expect_hex(CONFIRM_ACK).await;
}

#[tokio::test]
async fn test_discovery_names_addresses_in_order() {
    let (listener, config) = listen().await;
    let config = BridgeConfig {
        discovery: true,
        ..config
    };
    let bridge = TelenotBridge::start(config);
    let mut events = bridge.subscribe();
    let mut panel = FakePanel::accept(&listener).await;

    // the used-state request waits for the gate
    panel.send(&sb_status("")).await;
    panel.expect_hex(CONFIRM_ACK).await;
    panel.expect_hex(USED_STATE).await;

    // inputs 1 and 3 used, no outputs
    panel.send(&used_inputs("f5")).await;
    panel.expect_hex(CONFIRM_ACK).await;
    panel.send(&used_outputs("")).await;
    panel.expect_hex(CONFIRM_ACK).await;

    panel.send(SEND_NORM).await;
    panel
        .expect(&Command::ContactInfo { address: 1 }.to_bytes().unwrap())
        .await;
    panel.send(&contact_info(1, "Flur")).await;
    panel.expect_hex(CONFIRM_ACK).await;

    panel.send(SEND_NORM).await;
    panel
        .expect(&Command::ContactInfo { address: 3 }.to_bytes().unwrap())
        .await;
    panel.send(&contact_info(3, "Bad")).await;
    panel.expect_hex(CONFIRM_ACK).await;

    let first = next_matching(&mut events, |e| matches!(e, BridgeEvent::ContactDiscovered(_))).await;
    match first {
        BridgeEvent::ContactDiscovered(c) => {
            assert_eq!((c.kind, c.address, c.name.as_str()), (ContactKind::Input, 1, "Flur"));
        }
        _ => unreachable!(),
    }
    let done = next_matching(&mut events, |e| matches!(e, BridgeEvent::DiscoveryComplete(_))).await;
    match done {
        BridgeEvent::DiscoveryComplete(found) => {
            assert_eq!(found.inputs, vec![1, 3]);
            assert!(found.outputs.is_empty());
            let names: Vec<_> = found.contacts.iter().map(|c| c.name.as_str()).collect();
            assert_eq!(names, vec!["Flur", "Bad"]);
        }
        _ => unreachable!(),
    }
    assert_eq!(bridge.discovered().await.contacts.len(), 2);

    // queues are drained; polls are only acknowledged
    panel.send(SEND_NORM).await;
    panel.expect_hex(CONFIRM_ACK).await;
}

#[tokio::test]
async fn test_panel_closing_connection_triggers_reconnect() {
    let (listener, config) = listen().await;
    let config = BridgeConfig {
        reconnect_interval_ms: 50,
        ..config
    };
    let bridge = TelenotBridge::start(config);
    let mut events = bridge.subscribe();

    let panel = FakePanel::accept(&listener).await;
    next_matching(&mut events, |e| matches!(e, BridgeEvent::Connected)).await;
    drop(panel);

    next_matching(&mut events, |e| matches!(e, BridgeEvent::Disconnected)).await;
    let _again = FakePanel::accept(&listener).await;
    next_matching(&mut events, |e| matches!(e, BridgeEvent::Connected)).await;
    assert!(matches!(
        bridge.connection_state(),
        telenot_bridge::ConnectionState::Connected
    ));
}

#[tokio::test]
async fn test_clock_sync_waits_for_gate() {
    let (listener, config) = listen().await;
    let config = BridgeConfig {
        clock_sync_interval_ms: 3_600_000,
        ..config
    };
    let bridge = TelenotBridge::start(config);
    let mut panel = FakePanel::accept(&listener).await;
    bridge.wait_connected(Duration::from_secs(5)).await.unwrap();

    // the gate starts busy, so the first sync holds back
    panel.expect_silence().await;

    panel.send(&sb_status("")).await;
    panel.expect_hex(CONFIRM_ACK).await;

    // prefix, seven date/time bytes, checksum, end marker
    let mut frame = [0u8; 17];
    timeout(Duration::from_secs(5), panel.stream.read_exact(&mut frame))
        .await
        .expect("clock was not set")
        .unwrap();
    assert!(hex::encode(frame).starts_with(SET_DATE_TIME_PREFIX));
    assert!(is_valid_frame(&frame));

    // the next sync is an hour away
    panel.expect_silence().await;
}

#[tokio::test]
async fn test_refresh_timer_reannounces_status() {
    let (listener, config) = listen().await;
    let config = BridgeConfig {
        refresh_interval_ms: 500,
        ..config
    };
    let bridge = TelenotBridge::start(config);
    let mut events = bridge.subscribe();
    let mut panel = FakePanel::accept(&listener).await;

    // events of a telegram are published before its acknowledgement
    panel.send(&sb_status("fe")).await;
    panel.expect_hex(CONFIRM_ACK).await;
    assert_eq!(queued_areas(&mut events), (1..=8).collect::<Vec<u8>>());

    panel.send(&sb_status("fe")).await;
    panel.expect_hex(CONFIRM_ACK).await;
    assert!(queued_areas(&mut events).is_empty());

    tokio::time::sleep(Duration::from_millis(700)).await;
    panel.send(&sb_status("fe")).await;
    panel.expect_hex(CONFIRM_ACK).await;
    assert_eq!(queued_areas(&mut events), (1..=8).collect::<Vec<u8>>());
    drop(bridge);
}

#[tokio::test]
async fn test_disconnect_closes_panel_connection() {
    let (listener, config) = listen().await;
    let config = BridgeConfig {
        refresh_interval_ms: 50,
        clock_sync_interval_ms: 3_600_000,
        ..config
    };
    let mut bridge = TelenotBridge::start(config);
    let mut events = bridge.subscribe();
    let mut panel = FakePanel::accept(&listener).await;
    bridge.wait_connected(Duration::from_secs(5)).await.unwrap();

    bridge.disconnect().await.unwrap();
    panel.expect_eof().await;
    next_matching(&mut events, |e| matches!(e, BridgeEvent::Disconnected)).await;
    assert_eq!(
        bridge.connection_state(),
        telenot_bridge::ConnectionState::Disconnected
    );

    // no reconnect attempt follows
    assert!(timeout(Duration::from_millis(300), listener.accept())
        .await
        .is_err());
}
