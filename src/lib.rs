// MIT License - Copyright (c) 2026 telenot-bridge authors
//
//! # telenot-bridge
//!
//! Talks the binary GMS telegram protocol of Telenot alarm panels
//! (complex 400H / 3000 series) over a serial-to-Ethernet converter or a
//! direct serial line.
//!
//! The bridge answers the panel's polls, turns the input, security area and
//! reporting area bitmaps into per-address change events, decodes arm and
//! malfunction records, enumerates used addresses and their names, and
//! sends arm/disarm/reset commands through the panel's readiness handshake.
//!
//! ## Quick Start
//!
//! ```no_run
//! use telenot_bridge::{ArmMode, BridgeConfig, TelenotBridge};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = BridgeConfig::builder()
//!         .host("192.168.0.100")
//!         .discovery(true)
//!         .build();
//!
//!     let mut bridge = TelenotBridge::start(config);
//!
//!     let mut events = bridge.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     bridge.wait_connected(std::time::Duration::from_secs(30)).await?;
//!     bridge.arm_area(1, ArmMode::Internal).await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     bridge.disconnect().await?;
//!     Ok(())
//! }
//! ```

pub mod bridge;
pub mod config;
pub mod constants;
pub mod devices;
pub mod diff;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod event;
pub mod frame;
pub mod gate;
pub mod message;
pub mod protocol;
pub mod transport;

// Re-exports for convenience
pub use bridge::{ConnectionState, TelenotBridge};
pub use config::{ArmMode, BridgeConfig, BridgeConfigBuilder, TransportConfig};
pub use devices::SecurityAreaStatus;
pub use discovery::DiscoveryPhase;
pub use error::{Result, TelenotError};
pub use event::{
    AddressEvent, BridgeEvent, ContactKind, DiscoveredAddresses, DiscoveredContact,
    EventReceiver, GroupTag, SecurityAreaEvent, StateRecord,
};
pub use frame::{FrameAccumulator, Telegram};
pub use message::MessageType;
pub use protocol::Command;
