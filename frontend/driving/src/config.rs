use common::controller::RcMode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Gains and timing of the row controller and drive loop
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct DrivingConfig {
    /// Share of full PWM used for straight travel, 0..1
    pub driving_speed: f64,
    pub steering_deadzone_px: f64,
    /// Steering error at which the correction saturates
    pub steering_max_px: f64,
    /// Gain applied to the track on the side the row drifts toward
    pub forward_correction: f64,
    /// Gain applied to the other track
    pub reverse_correction: f64,
    pub gantry_deadzone_px: f64,
    pub gantry_max_px: f64,
    /// Lost cycles the last drive command is held before stopping
    pub lost_context_hold_cycles: u32,
    pub cycle_period_ms: u64,
    pub frame_width: u32,
    pub frame_height: u32,
    pub preview_enabled: bool,
    /// Mode assumed until the board reports one
    pub initial_mode: RcMode,
}

impl Default for DrivingConfig {
    fn default() -> Self {
        DrivingConfig {
            driving_speed: 0.1,
            steering_deadzone_px: 2.0,
            steering_max_px: 100.0,
            forward_correction: 1.5,
            reverse_correction: -1.0,
            gantry_deadzone_px: 5.0,
            gantry_max_px: 50.0,
            lost_context_hold_cycles: 10,
            cycle_period_ms: 100,
            frame_width: 270,
            frame_height: 180,
            preview_enabled: true,
            initial_mode: RcMode::Manual,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("driving speed {0} is outside 0..=1")]
    Speed(f64),
    #[error("{name} must be positive, got {value}")]
    NotPositive { name: &'static str, value: f64 },
    #[error("working resolution {0}x{1} is empty")]
    Resolution(u32, u32),
}

impl DrivingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.driving_speed) {
            return Err(ConfigError::Speed(self.driving_speed));
        }

        for (name, value) in [
            ("steeringMaxPx", self.steering_max_px),
            ("gantryMaxPx", self.gantry_max_px),
        ] {
            if !(value > 0.0) {
                return Err(ConfigError::NotPositive { name, value });
            }
        }

        if self.frame_width == 0 || self.frame_height == 0 {
            return Err(ConfigError::Resolution(self.frame_width, self.frame_height));
        }

        Ok(())
    }
}
