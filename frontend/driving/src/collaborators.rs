use std::sync::Arc;

use common::controller::CameraSide;
use cv::{Frame, SettingsError, TuningParameters};
use parking_lot::RwLock;
use tracing::info;

/// Camera capture, owned outside the core
pub trait FrameSource: Send + Sync {
    /// Latest frame from a physical camera, `None` when nothing is ready
    fn next_frame(&self, side: CameraSide) -> Option<Frame>;
}

/// Advisory only, reported in the status snapshot
pub trait TemperatureSensor: Send + Sync {
    fn current_temperature(&self) -> Option<f64>;
}

/// Tuning shared between the settings collaborator and the workers.
///
/// Only validated parameters get in. Workers take a snapshot at the start of
/// each cycle, so a change applies from the next cycle on.
#[derive(Clone)]
pub struct SharedTuning(Arc<RwLock<TuningParameters>>);

impl SharedTuning {
    pub fn new(tuning: TuningParameters) -> Result<Self, SettingsError> {
        tuning.validate()?;
        Ok(SharedTuning(Arc::new(RwLock::new(tuning))))
    }

    pub fn replace(&self, tuning: TuningParameters) -> Result<(), SettingsError> {
        tuning.validate()?;
        info!("Tuning updated");
        *self.0.write() = tuning;
        Ok(())
    }

    pub fn snapshot(&self) -> TuningParameters {
        self.0.read().clone()
    }
}
