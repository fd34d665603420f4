// MIT License - Copyright (c) 2026 telenot-bridge authors
// MQTT bridge

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::{Deserialize, Serialize};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::RwLock;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

use telenot_bridge::{
    ArmMode, BridgeConfig, BridgeEvent, DiscoveredAddresses, StateRecord, TelenotBridge,
};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "telenot2mqtt")]
#[command(about = "Bridge between a Telenot alarm panel and MQTT")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "config.toml")]
    config: String,
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Config {
    panel: PanelToml,
    mqtt: MqttToml,
    /// Display names by address, taking precedence over names read from the panel
    #[serde(default, deserialize_with = "deserialize_contact_names")]
    contact_names: HashMap<u16, String>,
}

fn deserialize_contact_names<'de, D>(deserializer: D) -> Result<HashMap<u16, String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let string_map: HashMap<String, String> = HashMap::deserialize(deserializer)?;
    string_map
        .into_iter()
        .map(|(k, v)| {
            k.parse::<u16>()
                .map(|address| (address, v))
                .map_err(|_| serde::de::Error::custom(format!("invalid address: {k}")))
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct PanelToml {
    /// Serial-to-Ethernet converter. Ignored when `serial_port` is set.
    #[serde(default)]
    host: Option<String>,
    #[serde(default = "default_panel_port")]
    port: u16,
    /// Local serial device, e.g. /dev/ttyUSB0
    #[serde(default)]
    serial_port: Option<String>,
    #[serde(default = "default_baud_rate")]
    baud_rate: u32,
    #[serde(default)]
    discovery: bool,
    #[serde(default = "default_reconnect_interval")]
    reconnect_interval_ms: u64,
    #[serde(default = "default_refresh_interval")]
    refresh_interval_ms: u64,
    #[serde(default = "default_stale_timeout")]
    stale_timeout_ms: u64,
    #[serde(default)]
    clock_sync_interval_ms: u64,
    #[serde(default = "default_send_timeout")]
    send_timeout_ms: u64,
}

fn default_panel_port() -> u16 {
    4116
}
fn default_baud_rate() -> u32 {
    9600
}
fn default_reconnect_interval() -> u64 {
    120_000
}
fn default_refresh_interval() -> u64 {
    600_000
}
fn default_stale_timeout() -> u64 {
    300_000
}
fn default_send_timeout() -> u64 {
    20_000
}

#[derive(Debug, Deserialize)]
struct MqttToml {
    url: String,
    #[serde(default = "default_client_id")]
    client_id: String,
    #[serde(default = "default_subscribe_topic")]
    subscribe_topic: String,
    #[serde(default = "default_publish_topic")]
    publish_topic: String,
}

fn default_client_id() -> String {
    "telenot-bridge".to_string()
}
fn default_subscribe_topic() -> String {
    "telenot/cmd".to_string()
}
fn default_publish_topic() -> String {
    "telenot".to_string()
}

fn build_bridge_config(toml: &PanelToml) -> Result<BridgeConfig> {
    let builder = match (&toml.serial_port, &toml.host) {
        (Some(path), _) => BridgeConfig::builder()
            .serial_port(path)
            .baud_rate(toml.baud_rate),
        (None, Some(host)) => BridgeConfig::builder().host(host).port(toml.port),
        (None, None) => anyhow::bail!("panel needs either host or serial_port"),
    };
    Ok(builder
        .discovery(toml.discovery)
        .reconnect_interval_ms(toml.reconnect_interval_ms)
        .refresh_interval_ms(toml.refresh_interval_ms)
        .stale_timeout_ms(toml.stale_timeout_ms)
        .clock_sync_interval_ms(toml.clock_sync_interval_ms)
        .send_timeout_ms(toml.send_timeout_ms)
        .build())
}

/// `discovery = true` walks the panel once per process. A reload walks again
/// only if the flag was switched off and back on since the last walk.
#[derive(Debug)]
struct DiscoveryLatch {
    enabled: bool,
    done: bool,
}

impl DiscoveryLatch {
    fn new(enabled: bool) -> Self {
        Self {
            enabled,
            done: false,
        }
    }

    fn reload(&mut self, enabled: bool) {
        if enabled && !self.enabled {
            self.done = false;
        }
        self.enabled = enabled;
    }

    fn complete(&mut self) {
        self.done = true;
    }

    fn should_run(&self) -> bool {
        self.enabled && !self.done
    }
}

// ---------------------------------------------------------------------------
// MQTT JSON types
// ---------------------------------------------------------------------------

// Published messages: all share the flat {now, op, ...} structure

// Address change: {now, op, address, value, name?}
#[derive(Serialize)]
struct MqttAddressEvent {
    now: u64,
    op: String,
    address: u16,
    value: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

#[derive(Serialize)]
struct MqttAreaStatus {
    now: u64,
    op: String,
    area: u8,
    status: Vec<&'static str>,
    disarmed: bool,
    armed: bool,
    alarm: bool,
    malfunction: bool,
}

#[derive(Serialize)]
struct MqttStateRecord {
    now: u64,
    op: String,
    #[serde(rename = "type")]
    msg_type: &'static str,
    address: u16,
    contact: String,
    set: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<String>,
}

#[derive(Serialize)]
struct MqttContact {
    now: u64,
    op: String,
    kind: &'static str,
    address: u16,
    name: String,
}

#[derive(Serialize)]
struct MqttSecurityAreas {
    now: u64,
    op: String,
    areas: Vec<u8>,
}

#[derive(Serialize)]
struct MqttDiscovery {
    now: u64,
    op: String,
    inputs: Vec<u16>,
    outputs: Vec<u16>,
    #[serde(rename = "securityAreas")]
    security_areas: Vec<u8>,
    #[serde(rename = "reportingAreas")]
    reporting_areas: Vec<u16>,
    names: HashMap<u16, String>,
}

#[derive(Serialize)]
struct MqttConnectionFailed {
    now: u64,
    op: String,
    reason: String,
    retrying: bool,
}

// CMD_ACK response
#[derive(Serialize)]
struct MqttCmdAck {
    now: u64,
    op: String,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    src: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<serde_json::Value>,
}

// Simple event with just {now, op}
#[derive(Serialize)]
struct MqttSimpleEvent {
    now: u64,
    op: String,
}

// Inbound command (subscribed)
#[derive(Deserialize)]
struct MqttCommand {
    op: String,
    #[serde(default)]
    #[allow(dead_code)]
    op_id: Option<String>,
    #[serde(default)]
    area: Option<u8>,
    #[serde(default)]
    point: Option<u16>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn now_epoch_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

/// Names known for addresses: panel names, overridden by the config file.
struct ContactNames {
    from_panel: HashMap<u16, String>,
    overrides: HashMap<u16, String>,
}

impl ContactNames {
    fn new(overrides: HashMap<u16, String>) -> Self {
        Self {
            from_panel: HashMap::new(),
            overrides,
        }
    }

    fn get(&self, address: u16) -> Option<String> {
        self.overrides
            .get(&address)
            .or_else(|| self.from_panel.get(&address))
            .cloned()
    }

    fn all(&self) -> HashMap<u16, String> {
        let mut names = self.from_panel.clone();
        names.extend(self.overrides.iter().map(|(k, v)| (*k, v.clone())));
        names
    }
}

async fn publish_json(client: &AsyncClient, topic: &str, payload: &impl Serialize, retain: bool) {
    match serde_json::to_string(payload) {
        Ok(json) => {
            if let Err(e) = client.publish(topic, QoS::AtLeastOnce, retain, json).await {
                error!("Failed to publish to {topic}: {e}");
            }
        }
        Err(e) => error!("Failed to serialize MQTT payload: {e}"),
    }
}

async fn publish_cmd_ack(
    client: &AsyncClient,
    topic: &str,
    success: bool,
    src: Option<serde_json::Value>,
    data: Option<serde_json::Value>,
) {
    let msg = MqttCmdAck {
        now: now_epoch_ms(),
        op: "CMD_ACK".to_string(),
        success,
        src,
        data,
    };
    publish_json(client, topic, &msg, false).await;
}

async fn publish_simple_event(client: &AsyncClient, topic: &str, op: &str) {
    let msg = MqttSimpleEvent {
        now: now_epoch_ms(),
        op: op.to_string(),
    };
    publish_json(client, topic, &msg, false).await;
}

fn state_record_message(op: &str, record: &StateRecord) -> MqttStateRecord {
    MqttStateRecord {
        now: now_epoch_ms(),
        op: op.to_string(),
        msg_type: record.msg_type.as_str(),
        address: record.address,
        contact: record.contact.clone(),
        set: record.set_clear,
        timestamp: record
            .timestamp
            .map(|t| t.format("%Y-%m-%dT%H:%M:%S").to_string()),
    }
}

fn discovery_message(found: DiscoveredAddresses, names: HashMap<u16, String>) -> MqttDiscovery {
    MqttDiscovery {
        now: now_epoch_ms(),
        op: "DISCOVERY_COMPLETE".to_string(),
        inputs: found.inputs,
        outputs: found.outputs,
        security_areas: found.security_areas,
        reporting_areas: found.reporting_areas,
        names,
    }
}

// ---------------------------------------------------------------------------
// Bridge event → MQTT
// ---------------------------------------------------------------------------

async fn handle_bridge_event(
    event: BridgeEvent,
    client: &AsyncClient,
    topic: &str,
    names: &RwLock<ContactNames>,
) {
    match event {
        BridgeEvent::Address(change) => {
            let msg = MqttAddressEvent {
                now: now_epoch_ms(),
                op: format!("{}_CHANGE", change.group.as_str()),
                address: change.address,
                value: change.value,
                name: names.read().await.get(change.address),
            };
            publish_json(client, topic, &msg, false).await;
        }

        BridgeEvent::SecurityArea(area) => {
            let status = area.status();
            info!("Security area {} status: {:?}", area.area, status.names());
            let msg = MqttAreaStatus {
                now: now_epoch_ms(),
                op: "AREA_STATUS".to_string(),
                area: area.area,
                status: status.names(),
                disarmed: status.is_disarmed(),
                armed: status.is_armed(),
                alarm: status.is_alarm(),
                malfunction: status.is_malfunction(),
            };
            publish_json(client, topic, &msg, true).await;
        }

        BridgeEvent::AreaState(record) => {
            info!(
                "{} for area {} ({})",
                record.msg_type, record.address, record.contact
            );
            publish_json(client, topic, &state_record_message("AREA_STATE", &record), false).await;
        }

        BridgeEvent::SystemState(record) => {
            info!(
                "{} {} at address {} ({})",
                record.msg_type,
                if record.set_clear { "set" } else { "cleared" },
                record.address,
                record.contact
            );
            publish_json(client, topic, &state_record_message("SYSTEM_STATE", &record), false)
                .await;
        }

        BridgeEvent::ContactDiscovered(contact) => {
            names
                .write()
                .await
                .from_panel
                .insert(contact.address, contact.name.clone());
            let msg = MqttContact {
                now: now_epoch_ms(),
                op: "CONTACT_DISCOVERED".to_string(),
                kind: contact.kind.as_str(),
                address: contact.address,
                name: contact.name,
            };
            publish_json(client, topic, &msg, false).await;
        }

        BridgeEvent::SecurityAreasDiscovered(areas) => {
            let msg = MqttSecurityAreas {
                now: now_epoch_ms(),
                op: "SECURITY_AREAS".to_string(),
                areas,
            };
            publish_json(client, topic, &msg, true).await;
        }

        BridgeEvent::DiscoveryComplete(found) => {
            info!("Discovery complete, publishing results");
            let msg = discovery_message(found, names.read().await.all());
            publish_json(client, topic, &msg, true).await;
        }

        BridgeEvent::Connected => {
            info!("Panel connected");
            publish_simple_event(client, topic, "PANEL_CONNECTED").await;
        }

        BridgeEvent::Disconnected => {
            warn!("Panel disconnected");
            publish_simple_event(client, topic, "PANEL_DISCONNECTED").await;
        }

        BridgeEvent::ConnectionFailed { reason, retrying } => {
            let msg = MqttConnectionFailed {
                now: now_epoch_ms(),
                op: "PANEL_CONNECT_FAILED".to_string(),
                reason,
                retrying,
            };
            publish_json(client, topic, &msg, false).await;
        }
    }
}

// ---------------------------------------------------------------------------
// MQTT command handler
// ---------------------------------------------------------------------------

/// Execute a bridge command future and log the result. Returns `true` on success.
async fn exec_panel_cmd<E: std::fmt::Display>(
    op: &str,
    label: &str,
    fut: impl std::future::Future<Output = std::result::Result<(), E>>,
) -> bool {
    match fut.await {
        Ok(()) => {
            info!("{op} {label}: sent");
            true
        }
        Err(e) => {
            error!("{op} {label} failed: {e}");
            false
        }
    }
}

async fn handle_command(
    payload_str: &str,
    cmd: MqttCommand,
    client: &AsyncClient,
    topic: &str,
    bridge: &TelenotBridge,
    names: &RwLock<ContactNames>,
) {
    // Parse the raw payload as a JSON value for the CMD_ACK src field
    let src_json = serde_json::from_str::<serde_json::Value>(payload_str).ok();
    let op = cmd.op.as_str();

    let success = match op {
        "PING" => true,

        "REFRESH" => {
            bridge.refresh().await;
            true
        }

        "DISCOVER" => exec_panel_cmd(op, "used state", bridge.request_used_state()).await,

        "DISCOVERED" => {
            let msg = discovery_message(bridge.discovered().await, names.read().await.all());
            let data = serde_json::to_value(&msg).ok();
            publish_cmd_ack(client, topic, true, src_json, data).await;
            return;
        }

        "SET_CLOCK" => exec_panel_cmd(op, "panel clock", bridge.sync_clock()).await,

        "DISARM" | "ARM_INTERNAL" | "ARM_EXTERNAL" | "RESET_ALARM" => {
            let Some(area) = cmd.area else {
                warn!("{op}: missing area");
                publish_cmd_ack(client, topic, false, src_json, None).await;
                return;
            };
            let label = format!("area {area}");
            match op {
                "DISARM" => exec_panel_cmd(op, &label, bridge.disarm_area(area)).await,
                "ARM_INTERNAL" => {
                    exec_panel_cmd(op, &label, bridge.arm_area(area, ArmMode::Internal)).await
                }
                "ARM_EXTERNAL" => {
                    exec_panel_cmd(op, &label, bridge.arm_area(area, ArmMode::External)).await
                }
                _ => exec_panel_cmd(op, &label, bridge.reset_alarm(area)).await,
            }
        }

        "ENABLE_REPORTING_POINT" | "DISABLE_REPORTING_POINT" => {
            let Some(point) = cmd.point else {
                warn!("{op}: missing point");
                publish_cmd_ack(client, topic, false, src_json, None).await;
                return;
            };
            let label = format!("reporting point {point}");
            if op == "ENABLE_REPORTING_POINT" {
                exec_panel_cmd(op, &label, bridge.enable_reporting_point(point)).await
            } else {
                exec_panel_cmd(op, &label, bridge.disable_reporting_point(point)).await
            }
        }

        other => {
            warn!("Unknown command: {other}");
            false
        }
    };

    publish_cmd_ack(client, topic, success, src_json, None).await;
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG controls verbosity (e.g. RUST_LOG=debug or RUST_LOG=telenot_bridge=trace).
    // Default: info.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    // systemd journal already adds timestamps, so omit them when running under systemd
    if std::env::var_os("JOURNAL_STREAM").is_some() {
        tracing_subscriber::fmt().without_time().with_env_filter(env_filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let cli = Cli::parse();

    // Load config
    let config_text =
        std::fs::read_to_string(&cli.config).context("Failed to read config file")?;
    let config: Config = toml::from_str(&config_text).context("Failed to parse config file")?;

    let mut bridge_config = build_bridge_config(&config.panel)?;
    let mut discovery = DiscoveryLatch::new(config.panel.discovery);
    let mut mqtt_client_id = config.mqtt.client_id;
    let mut publish_topic = config.mqtt.publish_topic;
    let mut subscribe_topic = config.mqtt.subscribe_topic;
    let mut contact_names = config.contact_names;

    let (mut mqtt_host, mut mqtt_port) = parse_mqtt_url(&config.mqtt.url)?;

    let mut sighup = signal(SignalKind::hangup())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    loop {
        // The bridge connects and reconnects on its own
        info!(
            "Starting bridge to Telenot panel at {}",
            bridge_config.transport.describe()
        );
        bridge_config.discovery = discovery.should_run();
        let bridge = Arc::new(TelenotBridge::start(bridge_config.clone()));
        let discovery_done = Arc::new(AtomicBool::new(false));
        let names = Arc::new(RwLock::new(ContactNames::new(contact_names.clone())));

        // Set up MQTT
        let mut mqtt_opts = MqttOptions::new(&mqtt_client_id, &mqtt_host, mqtt_port);
        mqtt_opts.set_keep_alive(Duration::from_secs(30));
        let (client, mut eventloop) = AsyncClient::new(mqtt_opts, 256);

        // Task 1: bridge event listener
        let client_events = client.clone();
        let topic_events = publish_topic.clone();
        let names_events = Arc::clone(&names);
        let done_events = Arc::clone(&discovery_done);
        let mut event_rx = bridge.subscribe();
        let event_handle = tokio::spawn(async move {
            loop {
                match event_rx.recv().await {
                    Ok(event) => {
                        if matches!(event, BridgeEvent::DiscoveryComplete(_)) {
                            done_events.store(true, Ordering::SeqCst);
                        }
                        handle_bridge_event(event, &client_events, &topic_events, &names_events)
                            .await;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Event receiver lagged, missed {n} events");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        info!("Event channel closed");
                        break;
                    }
                }
            }
        });

        // Task 2: MQTT event loop (receives messages, handles commands)
        let bridge_cmds = Arc::clone(&bridge);
        let client_cmds = client.clone();
        let topic_cmds = publish_topic.clone();
        let names_cmds = Arc::clone(&names);
        let sub_topic = subscribe_topic.clone();
        let mqtt_handle = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        // rumqttc does not resubscribe after a broker reconnect
                        info!("MQTT: connected, subscribing to {sub_topic}");
                        if let Err(e) = client_cmds.subscribe(&sub_topic, QoS::AtLeastOnce).await
                        {
                            error!("Failed to subscribe to {sub_topic}: {e}");
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(msg))) => {
                        if msg.topic == sub_topic {
                            let payload = String::from_utf8_lossy(&msg.payload).to_string();
                            match serde_json::from_str::<MqttCommand>(&payload) {
                                Ok(cmd) => {
                                    if cmd.op == "PING" {
                                        debug!("MQTT command received: {payload}");
                                    } else {
                                        info!("MQTT command received: {payload}");
                                    }
                                    // commands wait for the panel; keep the event loop polling
                                    let bridge = Arc::clone(&bridge_cmds);
                                    let client = client_cmds.clone();
                                    let topic = topic_cmds.clone();
                                    let names = Arc::clone(&names_cmds);
                                    tokio::spawn(async move {
                                        handle_command(
                                            &payload, cmd, &client, &topic, &bridge, &names,
                                        )
                                        .await;
                                    });
                                }
                                Err(e) => {
                                    warn!("Failed to parse MQTT command: {e}");
                                }
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("MQTT event loop error: {e}");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        // Wait for a signal
        info!("MQTT bridge running. Send SIGHUP to restart, SIGINT/SIGTERM to stop.");
        let restart = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT, shutting down...");
                false
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
                false
            }
            _ = sighup.recv() => {
                info!("Received SIGHUP, reloading config and restarting connections...");
                true
            }
        };

        // Abort tasks
        event_handle.abort();
        mqtt_handle.abort();
        let _ = event_handle.await;
        let _ = mqtt_handle.await;
        if discovery_done.load(Ordering::SeqCst) {
            discovery.complete();
        }

        // Disconnect bridge
        match Arc::try_unwrap(bridge) {
            Ok(mut b) => {
                if let Err(e) = b.disconnect().await {
                    warn!("Error disconnecting bridge: {e}");
                }
            }
            Err(bridge) => {
                // the last command task to finish drops the handle
                warn!("Commands still in flight, stopping bridge without waiting");
                bridge.stop();
            }
        }

        if !restart {
            break;
        }

        // Reload config from disk; keep previous config on failure
        info!("Reloading config from {}", cli.config);
        match std::fs::read_to_string(&cli.config)
            .context("Failed to read config file")
            .and_then(|text| {
                toml::from_str::<Config>(&text).context("Failed to parse config file")
            }) {
            Ok(new_config) => match build_bridge_config(&new_config.panel) {
                Ok(new_bridge_config) => match parse_mqtt_url(&new_config.mqtt.url) {
                    Ok((new_host, new_port)) => {
                        bridge_config = new_bridge_config;
                        discovery.reload(new_config.panel.discovery);
                        mqtt_host = new_host;
                        mqtt_port = new_port;
                        mqtt_client_id = new_config.mqtt.client_id;
                        publish_topic = new_config.mqtt.publish_topic;
                        subscribe_topic = new_config.mqtt.subscribe_topic;
                        contact_names = new_config.contact_names;
                        info!("Config reloaded successfully");
                    }
                    Err(e) => warn!("Invalid MQTT URL in new config, keeping previous: {e}"),
                },
                Err(e) => warn!("Invalid panel config in new config, keeping previous: {e}"),
            },
            Err(e) => warn!("Failed to reload config, keeping previous: {e}"),
        }

        info!("Restarting...");
    }

    info!("Shutdown complete");
    Ok(())
}

/// Parse an MQTT URL like "mqtt://host:port" into (host, port).
fn parse_mqtt_url(url: &str) -> Result<(String, u16)> {
    let stripped = url
        .strip_prefix("mqtt://")
        .or_else(|| url.strip_prefix("tcp://"))
        .unwrap_or(url);

    let (host, port_str) = stripped
        .rsplit_once(':')
        .context("MQTT URL must be in format mqtt://host:port")?;

    let port: u16 = port_str.parse().context("Invalid MQTT port number")?;

    Ok((host.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use telenot_bridge::TransportConfig;

    #[test]
    fn test_parse_mqtt_url() {
        assert_eq!(
            parse_mqtt_url("mqtt://broker.local:1883").unwrap(),
            ("broker.local".to_string(), 1883)
        );
        assert_eq!(
            parse_mqtt_url("10.0.0.2:1884").unwrap(),
            ("10.0.0.2".to_string(), 1884)
        );
        assert!(parse_mqtt_url("mqtt://broker.local").is_err());
    }

    #[test]
    fn test_tcp_panel_config() {
        let config: Config = toml::from_str(
            r#"
            [panel]
            host = "10.0.0.5"
            discovery = true
            stale_timeout_ms = 0

            [mqtt]
            url = "mqtt://localhost:1883"

            [contact_names]
            "7" = "Haustür"
            "#,
        )
        .unwrap();
        let bridge = build_bridge_config(&config.panel).unwrap();
        assert_eq!(
            bridge.transport,
            TransportConfig::Tcp {
                host: "10.0.0.5".into(),
                port: 4116
            }
        );
        assert!(bridge.discovery);
        assert_eq!(bridge.stale_timeout_ms, 0);
        assert_eq!(bridge.send_timeout_ms, 20_000);
        assert_eq!(config.mqtt.publish_topic, "telenot");
        assert_eq!(config.contact_names.get(&7).map(String::as_str), Some("Haustür"));
    }

    #[test]
    fn test_serial_panel_config_wins_over_host() {
        let panel: PanelToml = toml::from_str(
            r#"
            host = "10.0.0.5"
            serial_port = "/dev/ttyUSB0"
            baud_rate = 19200
            "#,
        )
        .unwrap();
        let bridge = build_bridge_config(&panel).unwrap();
        assert_eq!(
            bridge.transport,
            TransportConfig::Serial {
                path: "/dev/ttyUSB0".into(),
                baud_rate: 19200
            }
        );
    }

    #[test]
    fn test_discovery_runs_once_per_enable() {
        let mut discovery = DiscoveryLatch::new(true);
        assert!(discovery.should_run());

        // a reload with the flag still set does not walk again
        discovery.complete();
        discovery.reload(true);
        assert!(!discovery.should_run());

        discovery.reload(false);
        assert!(!discovery.should_run());
        discovery.reload(true);
        assert!(discovery.should_run());
    }

    #[test]
    fn test_unfinished_discovery_is_retried_after_reload() {
        let mut discovery = DiscoveryLatch::new(true);
        discovery.reload(true);
        assert!(discovery.should_run());
    }

    #[test]
    fn test_panel_needs_an_endpoint() {
        let panel: PanelToml = toml::from_str("discovery = true").unwrap();
        assert!(build_bridge_config(&panel).is_err());
    }

    #[test]
    fn test_contact_name_override() {
        let mut names = ContactNames::new(HashMap::from([(3, "Terrasse".to_string())]));
        names.from_panel.insert(3, "MG 3".into());
        names.from_panel.insert(4, "Flur".into());
        assert_eq!(names.get(3).as_deref(), Some("Terrasse"));
        assert_eq!(names.get(4).as_deref(), Some("Flur"));
        assert_eq!(names.get(5), None);
        assert_eq!(names.all().len(), 2);
    }

    #[test]
    fn test_invalid_contact_name_key() {
        let result: std::result::Result<Config, _> = toml::from_str(
            r#"
            [panel]
            host = "10.0.0.5"
            [mqtt]
            url = "mqtt://localhost:1883"
            [contact_names]
            flur = "Flur"
            "#,
        );
        assert!(result.is_err());
    }
}
