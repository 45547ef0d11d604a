pub mod discovery;
pub mod link;
pub mod log;

pub use discovery::{PortDiscovery, SerialPortDiscovery, Transport};
pub use link::{LinkConfig, LinkConfigError, LinkError, LinkStatus, SerialLink};
pub use log::{LogDirection, SerialLog, SerialLogEntry};
