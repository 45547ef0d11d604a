use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use common::controller::{ActuatorCommand, UpstreamMessage};
use common::CommunicationError;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::discovery::{PortDiscovery, Transport};
use crate::log::{LineBuffer, LogDirection, SerialLog, SerialLogEntry};

const READ_BUFFER: usize = 4098;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct LinkConfig {
    pub baud_rate: u32,
    /// Only USB ports from this vendor are probed
    pub usb_vendor_id: Option<u16>,
    pub handshake_timeout_ms: u64,
    /// Opening the port resets the board, give it time to boot
    pub settle_delay_ms: u64,
    pub read_timeout_ms: u64,
    pub backoff_min_ms: u64,
    pub backoff_max_ms: u64,
    pub queue_depth: usize,
    pub log_capacity: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            baud_rate: common::BAUD_RATE_CTRL,
            usb_vendor_id: None,
            handshake_timeout_ms: 2000,
            settle_delay_ms: 2000,
            read_timeout_ms: 10,
            backoff_min_ms: 500,
            backoff_max_ms: 8000,
            queue_depth: 16,
            log_capacity: 100,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkConfigError {
    #[error("{name} must be positive")]
    NotPositive { name: &'static str },
    #[error("backoffMaxMs {max} is below backoffMinMs {min}")]
    BackoffRange { min: u64, max: u64 },
}

impl LinkConfig {
    pub fn validate(&self) -> Result<(), LinkConfigError> {
        for (name, value) in [
            ("baudRate", self.baud_rate as u64),
            ("readTimeoutMs", self.read_timeout_ms),
            ("backoffMinMs", self.backoff_min_ms),
            ("queueDepth", self.queue_depth as u64),
        ] {
            if value == 0 {
                return Err(LinkConfigError::NotPositive { name });
            }
        }

        if self.backoff_max_ms < self.backoff_min_ms {
            return Err(LinkConfigError::BackoffRange {
                min: self.backoff_min_ms,
                max: self.backoff_max_ms,
            });
        }

        Ok(())
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum LinkError {
    #[error("no controller connected, command dropped")]
    LinkUnavailable,
    #[error("serial queue is full, command dropped")]
    QueueFull,
    #[error("could not encode command: {0}")]
    Encode(#[from] CommunicationError),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum LinkStatus {
    Searching { failed_attempts: u32 },
    Connected { port: String },
    Closed,
}

type MessageCallback = Box<dyn Fn(&UpstreamMessage<'_>) + Send + Sync>;

struct Shared {
    status: RwLock<LinkStatus>,
    connected: AtomicBool,
    callbacks: RwLock<Vec<MessageCallback>>,
    log: SerialLog,
}

impl Shared {
    fn set_status(&self, status: LinkStatus) {
        self.connected
            .store(matches!(status, LinkStatus::Connected { .. }), Ordering::Release);
        *self.status.write() = status;
    }

    fn receive(&self, frame: &[u8]) {
        match common::read(frame) {
            Ok(message) => {
                if message.text().is_empty() {
                    return;
                }
                self.log.push(LogDirection::Inbound, message.text());
                for callback in self.callbacks.read().iter() {
                    (callback)(&message);
                }
            }
            Err(err) => {
                warn!("Read error: {}", err);
            }
        }
    }
}

/// Exponential delay between discovery attempts
struct Backoff {
    min: Duration,
    max: Duration,
    next: Duration,
}

impl Backoff {
    fn new(min: Duration, max: Duration) -> Self {
        Backoff { min, max: max.max(min), next: min }
    }

    fn next(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(self.max);
        delay
    }

    fn reset(&mut self) {
        self.next = self.min;
    }
}

/// Sole owner of the connection to the controller.
///
/// A background thread discovers the board, holds the port and writes queued
/// commands in order. `send` never blocks on the port.
pub struct SerialLink {
    shared: Arc<Shared>,
    commands: Sender<String>,
    shutdown: Mutex<Option<Sender<()>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl SerialLink {
    pub fn spawn<D: PortDiscovery>(discovery: D, config: LinkConfig) -> anyhow::Result<Self> {
        config.validate().context("Invalid link config")?;

        let shared = Arc::new(Shared {
            status: RwLock::new(LinkStatus::Searching { failed_attempts: 0 }),
            connected: AtomicBool::new(false),
            callbacks: RwLock::new(Vec::new()),
            log: SerialLog::new(config.log_capacity),
        });

        let (tx_command, rx_command) = channel::bounded(config.queue_depth.max(1));
        let (tx_shutdown, rx_shutdown) = channel::bounded(0);

        let thread = {
            let shared = shared.clone();
            thread::Builder::new()
                .name("serial link".to_owned())
                .spawn(move || run(discovery, config, shared, rx_command, rx_shutdown))
                .context("Spawn serial link thread")?
        };

        Ok(SerialLink {
            shared,
            commands: tx_command,
            shutdown: Mutex::new(Some(tx_shutdown)),
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Queues one command for the controller. Fails fast while no
    /// controller is connected.
    pub fn send(&self, command: &ActuatorCommand) -> Result<(), LinkError> {
        let mut buffer = [0; common::MAX_COMMAND_LEN];
        let encoded = common::write(command, &mut buffer)?;
        let text = String::from_utf8_lossy(encoded).into_owned();

        if !self.is_connected() {
            return Err(LinkError::LinkUnavailable);
        }

        self.commands.try_send(text).map_err(|err| match err {
            TrySendError::Full(_) => LinkError::QueueFull,
            TrySendError::Disconnected(_) => LinkError::LinkUnavailable,
        })
    }

    /// `callback` sees every line received from the controller. It runs on
    /// the serial thread and must return quickly.
    pub fn register_callback<F>(&self, callback: F)
    where
        F: Fn(&UpstreamMessage<'_>) + Send + Sync + 'static,
    {
        self.shared.callbacks.write().push(Box::new(callback));
    }

    pub fn status(&self) -> LinkStatus {
        self.shared.status.read().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    /// True while discovery keeps failing to find the controller
    pub fn discovery_failed(&self) -> bool {
        matches!(self.status(), LinkStatus::Searching { failed_attempts } if failed_attempts > 0)
    }

    pub fn log(&self) -> Vec<SerialLogEntry> {
        self.shared.log.recent()
    }

    /// Writes out what is queued, releases the port and joins the thread
    pub fn close(&self) {
        drop(self.shutdown.lock().take());

        if let Some(thread) = self.thread.lock().take() {
            if thread.join().is_err() {
                warn!("Serial link thread panicked");
            }
        }
        self.shared.set_status(LinkStatus::Closed);
    }
}

impl Drop for SerialLink {
    fn drop(&mut self) {
        self.close();
    }
}

fn stopping(shutdown: &Receiver<()>) -> bool {
    matches!(shutdown.try_recv(), Err(TryRecvError::Disconnected))
}

/// Sleeps for `delay`, returns early with true once shutdown is requested
fn wait(shutdown: &Receiver<()>, delay: Duration) -> bool {
    matches!(shutdown.recv_timeout(delay), Err(RecvTimeoutError::Disconnected))
}

fn is_idle(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted)
}

fn run<D: PortDiscovery>(
    mut discovery: D,
    config: LinkConfig,
    shared: Arc<Shared>,
    commands: Receiver<String>,
    shutdown: Receiver<()>,
) {
    let mut backoff = Backoff::new(
        Duration::from_millis(config.backoff_min_ms),
        Duration::from_millis(config.backoff_max_ms),
    );
    let mut failed_attempts = 0;

    while !stopping(&shutdown) {
        match connect(&mut discovery, &config, &shutdown) {
            Ok((path, mut port)) => {
                info!(port = %path, "Controller connected");
                failed_attempts = 0;
                backoff.reset();

                // anything queued before this port identified is stale
                let stale = commands.try_iter().count();
                if stale > 0 {
                    debug!(port = %path, stale, "Discarded commands queued while disconnected");
                }
                shared.set_status(LinkStatus::Connected { port: path.clone() });

                let outcome = service(port.as_mut(), &commands, &shutdown, &shared);
                shared.set_status(LinkStatus::Searching { failed_attempts });

                match outcome {
                    Ok(()) => break,
                    Err(err) => {
                        let dropped = commands.try_iter().count();
                        warn!(port = %path, dropped, "Lost controller: {:#}", err);
                    }
                }
            }
            Err(err) => {
                failed_attempts += 1;
                shared.set_status(LinkStatus::Searching { failed_attempts });
                if failed_attempts == 1 {
                    warn!("Controller not found: {:#}", err);
                } else {
                    debug!(failed_attempts, "Controller not found: {:#}", err);
                }
            }
        }

        if wait(&shutdown, backoff.next()) {
            break;
        }
    }

    shared.set_status(LinkStatus::Closed);
}

fn connect<D: PortDiscovery>(
    discovery: &mut D,
    config: &LinkConfig,
    shutdown: &Receiver<()>,
) -> anyhow::Result<(String, Box<dyn Transport>)> {
    let candidates = discovery.candidates().context("List candidate ports")?;
    if candidates.is_empty() {
        bail!("No candidate serial ports");
    }

    for path in candidates {
        let port = match discovery.open(&path) {
            Ok(port) => port,
            Err(err) => {
                debug!(port = %path, "Skipping port: {:#}", err);
                continue;
            }
        };

        if wait(shutdown, Duration::from_millis(config.settle_delay_ms)) {
            bail!("Shutting down");
        }

        match handshake(port, Duration::from_millis(config.handshake_timeout_ms)) {
            Ok(port) => return Ok((path, port)),
            Err(err) => debug!(port = %path, "Not the controller: {:#}", err),
        }
    }

    bail!("No port identified itself as the controller")
}

fn handshake(mut port: Box<dyn Transport>, timeout: Duration) -> anyhow::Result<Box<dyn Transport>> {
    let mut buffer = [0; 16];
    let request = common::write_identify_request(&mut buffer)?;
    port.write_all(request).context("Write identify request")?;
    port.flush().context("Flush identify request")?;

    let deadline = Instant::now() + timeout;
    let mut lines = LineBuffer::new(READ_BUFFER);

    while Instant::now() < deadline {
        match port.read(lines.spare()) {
            Ok(0) => bail!("Remote device was disconnected"),
            Ok(read) => {
                let mut identified = false;
                let result = lines.commit(read, |frame| {
                    if let Ok(UpstreamMessage::Identify(_)) = common::read(frame) {
                        identified = true;
                    }
                });
                if identified {
                    return Ok(port);
                }
                if let Err(err) = result {
                    debug!("Discarded handshake noise: {}", err);
                }
            }
            Err(ref err) if is_idle(err) => {}
            Err(err) => return Err(err).context("Io error"),
        }
    }

    bail!("No identify response within {:?}", timeout)
}

/// Owns the connected port until it fails or shutdown is requested.
///
/// Queued commands are written whole and in order, then flushed. On shutdown
/// whatever is still queued goes out before returning.
fn service(
    port: &mut dyn Transport,
    commands: &Receiver<String>,
    shutdown: &Receiver<()>,
    shared: &Shared,
) -> anyhow::Result<()> {
    let mut lines = LineBuffer::new(READ_BUFFER);

    loop {
        let stop = stopping(shutdown);

        let mut wrote = false;
        for text in commands.try_iter() {
            port.write_all(text.as_bytes()).context("Write command")?;
            for line in text.lines() {
                shared.log.push(LogDirection::Outbound, line);
            }
            wrote = true;
        }
        if wrote {
            port.flush().context("Flush commands")?;
        }

        if stop {
            return Ok(());
        }

        match port.read(lines.spare()) {
            Ok(0) => bail!("Remote device was disconnected"),
            Ok(read) => {
                if let Err(err) = lines.commit(read, |frame| shared.receive(frame)) {
                    warn!("Dropped inbound line: {}", err);
                }
            }
            Err(ref err) if is_idle(err) => {}
            Err(err) => return Err(err).context("Io error"),
        }
    }
}
