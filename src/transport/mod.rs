// MIT License - Copyright (c) 2026 telenot-bridge authors
// Byte-stream transports to the panel's GMS interface

pub mod tcp;
#[cfg(feature = "serial")]
pub mod serial;

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::config::TransportConfig;
use crate::error::Result;

/// Read half of a panel connection.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
/// Write half of a panel connection.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Open the configured transport and split it into halves.
pub async fn connect(
    transport: &TransportConfig,
    connect_timeout: Duration,
) -> Result<(BoxedReader, BoxedWriter)> {
    match transport {
        TransportConfig::Tcp { host, port } => tcp::connect(host, *port, connect_timeout).await,
        #[cfg(feature = "serial")]
        TransportConfig::Serial { path, baud_rate } => serial::open(path, *baud_rate),
        #[cfg(not(feature = "serial"))]
        TransportConfig::Serial { path, .. } => Err(crate::error::TelenotError::invalid(format!(
            "cannot open {path}: built without the serial feature"
        ))),
    }
}
