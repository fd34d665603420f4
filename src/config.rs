// MIT License - Copyright (c) 2026 telenot-bridge authors
// Bridge configuration

use crate::constants::{
    DEFAULT_BAUD_RATE, DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_RECONNECT_INTERVAL_MS,
    DEFAULT_REFRESH_INTERVAL_MS, DEFAULT_SEND_TIMEOUT_MS, DEFAULT_STALE_TIMEOUT_MS,
    DEFAULT_TCP_PORT,
};

/// How the bridge reaches the panel's GMS interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportConfig {
    /// Serial-to-Ethernet converter (default port 4116).
    Tcp { host: String, port: u16 },
    /// Direct serial line, 8N1, no flow control.
    Serial { path: String, baud_rate: u32 },
}

impl TransportConfig {
    pub fn is_serial(&self) -> bool {
        matches!(self, TransportConfig::Serial { .. })
    }

    /// Human-readable endpoint for log lines.
    pub fn describe(&self) -> String {
        match self {
            TransportConfig::Tcp { host, port } => format!("{host}:{port}"),
            TransportConfig::Serial { path, baud_rate } => format!("{path}@{baud_rate}"),
        }
    }
}

/// Arm mode for security area commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmMode {
    /// Internal arm (people inside, perimeter only)
    Internal,
    /// External arm (building empty)
    External,
}

/// Configuration for a bridge to one Telenot panel.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub transport: TransportConfig,
    /// Enumerate used contacts and their names on the next connect.
    /// Cleared once the used-state request has been sent.
    pub discovery: bool,
    /// Interval of the connection check, also the delay before a reconnect attempt.
    pub reconnect_interval_ms: u64,
    /// Interval at which all current states are re-announced.
    pub refresh_interval_ms: u64,
    /// Reconnect when no telegram arrived for this long (0 = never).
    pub stale_timeout_ms: u64,
    /// Interval at which the panel clock is set (0 = never).
    pub clock_sync_interval_ms: u64,
    /// How long a command waits for the panel to become ready.
    pub send_timeout_ms: u64,
    /// TCP connect timeout.
    pub connect_timeout_ms: u64,
    /// Capacity of the broadcast event channel.
    pub event_capacity: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::Tcp {
                host: "192.168.0.100".to_string(),
                port: DEFAULT_TCP_PORT,
            },
            discovery: false,
            reconnect_interval_ms: DEFAULT_RECONNECT_INTERVAL_MS,
            refresh_interval_ms: DEFAULT_REFRESH_INTERVAL_MS,
            stale_timeout_ms: DEFAULT_STALE_TIMEOUT_MS,
            clock_sync_interval_ms: 0,
            send_timeout_ms: DEFAULT_SEND_TIMEOUT_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            // a first SB telegram alone reports 264 addresses
            event_capacity: 1024,
        }
    }
}

impl BridgeConfig {
    /// Create a new config builder starting from defaults.
    pub fn builder() -> BridgeConfigBuilder {
        BridgeConfigBuilder::default()
    }
}

/// Builder for BridgeConfig.
#[derive(Debug, Clone, Default)]
pub struct BridgeConfigBuilder {
    config: BridgeConfig,
}

impl BridgeConfigBuilder {
    /// Connect over TCP to `host` on the default port, keeping a port set earlier.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        let port = match self.config.transport {
            TransportConfig::Tcp { port, .. } => port,
            TransportConfig::Serial { .. } => DEFAULT_TCP_PORT,
        };
        self.config.transport = TransportConfig::Tcp {
            host: host.into(),
            port,
        };
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        if let TransportConfig::Tcp { port: p, .. } = &mut self.config.transport {
            *p = port;
        }
        self
    }

    /// Use a serial line at the default baud rate.
    pub fn serial_port(mut self, path: impl Into<String>) -> Self {
        self.config.transport = TransportConfig::Serial {
            path: path.into(),
            baud_rate: DEFAULT_BAUD_RATE,
        };
        self
    }

    pub fn baud_rate(mut self, baud: u32) -> Self {
        if let TransportConfig::Serial { baud_rate, .. } = &mut self.config.transport {
            *baud_rate = baud;
        }
        self
    }

    pub fn transport(mut self, transport: TransportConfig) -> Self {
        self.config.transport = transport;
        self
    }

    pub fn discovery(mut self, discovery: bool) -> Self {
        self.config.discovery = discovery;
        self
    }

    pub fn reconnect_interval_ms(mut self, ms: u64) -> Self {
        self.config.reconnect_interval_ms = ms;
        self
    }

    pub fn refresh_interval_ms(mut self, ms: u64) -> Self {
        self.config.refresh_interval_ms = ms;
        self
    }

    pub fn stale_timeout_ms(mut self, ms: u64) -> Self {
        self.config.stale_timeout_ms = ms;
        self
    }

    pub fn clock_sync_interval_ms(mut self, ms: u64) -> Self {
        self.config.clock_sync_interval_ms = ms;
        self
    }

    pub fn send_timeout_ms(mut self, ms: u64) -> Self {
        self.config.send_timeout_ms = ms;
        self
    }

    pub fn connect_timeout_ms(mut self, ms: u64) -> Self {
        self.config.connect_timeout_ms = ms;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    pub fn build(self) -> BridgeConfig {
        self.config
    }
}
