// MIT License - Copyright (c) 2026 telenot-bridge authors
// TCP transport (serial-to-Ethernet converter)

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::{BoxedReader, BoxedWriter};
use crate::error::{Result, TelenotError};

pub async fn connect(host: &str, port: u16, connect_timeout: Duration) -> Result<(BoxedReader, BoxedWriter)> {
    let addr = format!("{host}:{port}");
    debug!("TCP connecting: {}", addr);

    let stream = match timeout(connect_timeout, TcpStream::connect(&addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            error!("TCP connect to {} failed: {}", addr, e);
            return Err(TelenotError::Io(e));
        }
        Err(_) => {
            warn!("TCP connect to {} timed out", addr);
            return Err(TelenotError::ConnectionTimeout);
        }
    };

    if let Err(e) = stream.set_nodelay(true) {
        debug!("TCP_NODELAY: {}", e);
    }
    info!("TCP connected: {}", addr);

    let (reader, writer) = stream.into_split();
    Ok((Box::new(reader), Box::new(writer)))
}
