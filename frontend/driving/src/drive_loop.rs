use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::Context;
use common::controller::{ActuatorCommand, CameraSide, HoeCommand, RcMode, TravelDirection, UpstreamMessage};
use crossbeam::channel::{Sender, TrySendError};
use cv::{Frame, TrackingHint, TrackingMasks, TrackingResult};
use image::imageops::{self, FilterType};
use serde::{Deserialize, Serialize};
use serial::{LinkError, LinkStatus, SerialLink, SerialLogEntry};
use tracing::{debug, error, info, trace, warn};

use crate::collaborators::{FrameSource, SharedTuning, TemperatureSensor};
use crate::controller::RowController;
use crate::state::Stage;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorEvent {
    ToggleDirection,
    ToggleHoe,
}

/// What the dashboard shows after one cycle of one side
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub side: CameraSide,
    pub cycle: u64,
    /// JPEG data URI of the pipeline stages
    pub preview: Option<String>,
    pub command: ActuatorCommand,
    /// Whether the command was handed to the serial link
    pub forwarded: bool,
    pub lost_context: bool,
    pub stage: Stage,
    pub mode: RcMode,
    pub direction: TravelDirection,
    pub hoe_engaged: bool,
    pub link: LinkStatus,
    pub discovery_failed: bool,
    pub serial_log: Vec<SerialLogEntry>,
    pub temperature: Option<f64>,
}

/// External collaborators the loop reads from
#[derive(Clone)]
pub struct Collaborators {
    pub frames: Arc<dyn FrameSource>,
    pub temperature: Option<Arc<dyn TemperatureSensor>>,
    pub tuning: SharedTuning,
}

struct Worker {
    side: CameraSide,
    collaborators: Collaborators,
    controller: Arc<RowController>,
    link: Arc<SerialLink>,
    status: Sender<StatusSnapshot>,
    running: Arc<AtomicBool>,
    halted: Arc<AtomicBool>,
}

impl Worker {
    fn run(self) {
        let period = Duration::from_millis(self.controller.config().cycle_period_ms);
        let mut hint: Option<TrackingHint> = None;
        let mut cycle = 0;

        info!(side = ?self.side, "Worker started");

        while self.running.load(Ordering::Acquire) {
            let started = Instant::now();

            self.cycle(&mut hint, cycle);
            cycle += 1;

            if let Some(remaining) = period.checked_sub(started.elapsed()) {
                thread::sleep(remaining);
            }
        }

        info!(side = ?self.side, cycles = cycle, "Worker stopped");
    }

    fn cycle(&self, hint: &mut Option<TrackingHint>, cycle: u64) {
        let tuning = self.collaborators.tuning.snapshot();
        let physical = self.side.physical(tuning.swap_cameras);

        let (result, tracked) = match self.collaborators.frames.next_frame(physical) {
            Some(frame) => {
                let frame = self.prepare(frame);
                let (result, masks) = cv::track_with_masks(&frame, &tuning, hint.as_ref());
                *hint = Some(result.hint());
                (result, Some((frame, masks)))
            }
            None => {
                // a silent camera counts as a lost cycle so hold then stop still applies
                trace!(side = ?self.side, "No frame");
                let config = self.controller.config();
                (TrackingResult::lost(self.side, config.frame_width, config.frame_height), None)
            }
        };

        let command = self.controller.step(&result);
        if !command.in_bounds() {
            self.halt(format_args!("out of bounds command {:?}", command));
            return;
        }

        let forwarded =
            self.controller.active_side() == self.side && self.controller.is_auto() && self.forward(&command);

        let preview = tracked.and_then(|(frame, masks)| self.preview(&frame, &result, &masks));

        let mode = self.controller.mode();
        let state = self.controller.state(self.side);
        let snapshot = StatusSnapshot {
            side: self.side,
            cycle,
            preview,
            command,
            forwarded,
            lost_context: result.lost_context,
            stage: state.stage,
            mode,
            direction: state.driving_direction,
            hoe_engaged: state.hoe_engaged,
            link: self.link.status(),
            discovery_failed: self.link.discovery_failed(),
            serial_log: self.link.log(),
            temperature: self
                .collaborators
                .temperature
                .as_ref()
                .and_then(|sensor| sensor.current_temperature()),
        };

        match self.status.try_send(snapshot) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => debug!(side = ?self.side, "Status consumer lagging, snapshot dropped"),
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    fn preview(&self, frame: &Frame, result: &TrackingResult, masks: &TrackingMasks) -> Option<String> {
        if !self.controller.config().preview_enabled {
            return None;
        }

        match cv::preview::encode_data_uri(&cv::preview::compose(frame, result, masks)) {
            Ok(uri) => Some(uri),
            Err(err) => {
                warn!(side = ?self.side, "Preview failed: {:#}", err);
                None
            }
        }
    }

    /// Relabels the frame with its logical side and scales it to the working resolution
    fn prepare(&self, frame: Frame) -> Frame {
        let config = self.controller.config();
        let (width, height) = (config.frame_width, config.frame_height);

        let image = if frame.is_empty() || frame.image.dimensions() == (width, height) {
            frame.image
        } else {
            imageops::resize(&frame.image, width, height, FilterType::Triangle)
        };

        Frame {
            image,
            side: self.side,
            captured_at: frame.captured_at,
        }
    }

    /// False when the command was dropped
    fn forward(&self, command: &ActuatorCommand) -> bool {
        match self.link.send(command) {
            Ok(()) => true,
            Err(LinkError::LinkUnavailable) => {
                debug!(side = ?self.side, "Link unavailable, command dropped");
                false
            }
            Err(LinkError::QueueFull) => {
                warn!(side = ?self.side, "Serial queue full, command dropped");
                false
            }
            Err(LinkError::Encode(err)) => {
                self.halt(format_args!("could not encode command: {}", err));
                false
            }
        }
    }

    /// Stops every worker, a command outside the actuator bounds is a bug
    fn halt(&self, reason: std::fmt::Arguments) {
        error!(side = ?self.side, "Halting drive loop: {}", reason);
        self.halted.store(true, Ordering::Release);
        self.running.store(false, Ordering::Release);

        if let Err(err) = self.link.send(&ActuatorCommand::stop(HoeCommand::Raise)) {
            warn!("Could not send stop command: {}", err);
        }
    }
}

/// Runs one tracking worker per camera side and routes the active side's
/// commands to the serial link
pub struct DriveLoop {
    controller: Arc<RowController>,
    link: Arc<SerialLink>,
    running: Arc<AtomicBool>,
    halted: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
}

impl DriveLoop {
    pub fn spawn(
        controller: Arc<RowController>,
        collaborators: Collaborators,
        link: Arc<SerialLink>,
        status: Sender<StatusSnapshot>,
    ) -> anyhow::Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let halted = Arc::new(AtomicBool::new(false));

        let routed = controller.clone();
        link.register_callback(move |message| {
            if let UpstreamMessage::Mode { mode, direction, .. } = *message {
                routed.set_mode(mode, direction);
            }
        });

        let mut workers = Vec::with_capacity(CameraSide::ALL.len());
        for side in CameraSide::ALL {
            let worker = Worker {
                side,
                collaborators: collaborators.clone(),
                controller: controller.clone(),
                link: link.clone(),
                status: status.clone(),
                running: running.clone(),
                halted: halted.clone(),
            };

            let handle = thread::Builder::new()
                .name(format!("{:?} tracker", side))
                .spawn(move || worker.run())
                .with_context(|| format!("Spawn {:?} worker", side))?;
            workers.push(handle);
        }

        Ok(DriveLoop {
            controller,
            link,
            running,
            halted,
            workers,
        })
    }

    pub fn handle_event(&self, event: OperatorEvent) {
        match event {
            OperatorEvent::ToggleDirection => {
                self.controller.toggle_direction();
            }
            OperatorEvent::ToggleHoe => {
                self.controller.toggle_hoe();
            }
        }
    }

    pub fn controller(&self) -> &RowController {
        &self.controller
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Set once a worker stopped everything over an invalid command
    pub fn halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    /// Stops the workers, leaves the board stopped with the hoe raised, then
    /// lets the link flush and release the port
    pub fn shutdown(self) {
        self.running.store(false, Ordering::Release);

        for worker in self.workers {
            if worker.join().is_err() {
                error!("Tracking worker panicked");
            }
        }

        // outside auto nothing was sent, so there is nothing to cancel
        if self.controller.is_auto() {
            match self.link.send(&ActuatorCommand::stop(HoeCommand::Raise)) {
                Ok(()) => {}
                Err(LinkError::LinkUnavailable) => debug!("No controller connected, final stop skipped"),
                Err(err) => warn!("Could not send final stop: {}", err),
            }
        }

        self.link.close();
        info!("Drive loop shut down");
    }
}
