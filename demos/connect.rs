//! Example: connect to a Telenot panel, enumerate used addresses and print
//! every change until Ctrl+C.

use std::time::Duration;

use telenot_bridge::{BridgeConfig, BridgeEvent, TelenotBridge};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let host = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "192.168.0.100".to_string());
    let config = BridgeConfig::builder()
        .host(host)
        .port(4116)
        .discovery(true)
        .build();

    println!("Connecting to panel at {}...", config.transport.describe());
    let mut bridge = TelenotBridge::start(config);
    let mut events = bridge.subscribe();
    bridge.wait_connected(Duration::from_secs(30)).await?;

    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                BridgeEvent::Address(change) => println!(
                    "  {} {:4}: {}",
                    change.group.as_str(),
                    change.address,
                    change.value
                ),
                BridgeEvent::SecurityArea(area) => {
                    println!("  Area {}: {:?}", area.area, area.status().names())
                }
                BridgeEvent::AreaState(record) | BridgeEvent::SystemState(record) => println!(
                    "  {} address={} contact={:?} set={} at {:?}",
                    record.msg_type,
                    record.address,
                    record.contact,
                    record.set_clear,
                    record.timestamp
                ),
                BridgeEvent::ContactDiscovered(contact) => println!(
                    "  {} 0x{:04x}: {}",
                    contact.kind.as_str(),
                    contact.address,
                    contact.name
                ),
                BridgeEvent::DiscoveryComplete(found) => {
                    println!("\n--- Discovery ---");
                    println!("  Inputs: {:?}", found.inputs);
                    println!("  Outputs: {:?}", found.outputs);
                    println!("  Security areas: {:?}", found.security_areas);
                    println!("  Reporting areas: {:?}", found.reporting_areas);
                }
                other => println!("  {:?}", other),
            }
        }
    });

    println!("\nPress Ctrl+C to disconnect...");
    tokio::signal::ctrl_c().await?;

    printer.abort();
    bridge.disconnect().await?;
    println!("Disconnected.");

    Ok(())
}
