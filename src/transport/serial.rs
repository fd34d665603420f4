// MIT License - Copyright (c) 2026 telenot-bridge authors
// Serial transport, 8N1 without flow control

use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, error, info};

use super::{BoxedReader, BoxedWriter};
use crate::error::Result;

/// Open a serial port. Failures are not retryable: the port needs an operator.
pub fn open(path: &str, baud_rate: u32) -> Result<(BoxedReader, BoxedWriter)> {
    debug!("Serial: {} @{}baud", path, baud_rate);

    let port = tokio_serial::new(path, baud_rate)
        .data_bits(tokio_serial::DataBits::Eight)
        .stop_bits(tokio_serial::StopBits::One)
        .parity(tokio_serial::Parity::None)
        .flow_control(tokio_serial::FlowControl::None)
        .open_native_async()
        .map_err(|e| {
            error!("Serial open {} failed: {}", path, e);
            e
        })?;
    info!("Serial port opened: {}", path);

    let (reader, writer) = tokio::io::split(port);
    Ok((Box::new(reader), Box::new(writer)))
}
