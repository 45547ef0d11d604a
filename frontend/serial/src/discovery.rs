use std::io::{Read, Write};
use std::time::Duration;

use anyhow::Context;
use serialport::{ClearBuffer, SerialPortType};
use tracing::debug;

/// An open byte stream to a device.
///
/// Reads are expected to time out (`TimedOut` or `WouldBlock`) instead of
/// blocking forever.
pub trait Transport: Read + Write + Send {}

impl<T: Read + Write + Send> Transport for T {}

/// Finds and opens device paths that might be the controller
pub trait PortDiscovery: Send + 'static {
    fn candidates(&mut self) -> anyhow::Result<Vec<String>>;

    fn open(&mut self, path: &str) -> anyhow::Result<Box<dyn Transport>>;
}

/// Enumerates the host's USB serial ports
pub struct SerialPortDiscovery {
    pub baud_rate: u32,
    pub vendor_id: Option<u16>,
    /// Skip enumeration and only try this path
    pub pinned: Option<String>,
    pub read_timeout: Duration,
}

impl PortDiscovery for SerialPortDiscovery {
    fn candidates(&mut self) -> anyhow::Result<Vec<String>> {
        if let Some(path) = &self.pinned {
            return Ok(vec![path.clone()]);
        }

        let ports = serialport::available_ports().context("Enumerate serial ports")?;
        Ok(ports
            .into_iter()
            .filter(|port| match &port.port_type {
                SerialPortType::UsbPort(info) => self.vendor_id.map_or(true, |vid| info.vid == vid),
                _ => false,
            })
            .map(|port| port.port_name)
            .inspect(|path| debug!(port = %path, "candidate port"))
            .collect())
    }

    fn open(&mut self, path: &str) -> anyhow::Result<Box<dyn Transport>> {
        let port = serialport::new(path, self.baud_rate)
            .timeout(self.read_timeout)
            .open()
            .with_context(|| format!("Could not open {}", path))?;

        port.clear(ClearBuffer::All).context("Could not clear port")?;

        Ok(Box::new(port))
    }
}
