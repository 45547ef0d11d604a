use common::controller::{
    ActuatorCommand, DriveData, GantryData, HoeCommand, TravelDirection, GANTRY_MAX_DELAY_US, GANTRY_MIN_DELAY_US,
    PWM_LIMIT,
};
use cv::{Line, TrackingResult};
use serde::{Deserialize, Serialize};

use crate::config::DrivingConfig;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Stage {
    #[default]
    Tracking,
    /// Context lost for `lost_cycles` consecutive cycles, last drive command held
    Degraded { lost_cycles: u32 },
    Stopped,
}

/// A single side's view of the robot, updated once per tracked frame
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ControllerState {
    pub stage: Stage,
    pub driving_direction: TravelDirection,
    pub hoe_engaged: bool,
    /// Last command computed from fresh geometry, cleared on reversal
    pub last_drive_command: Option<DriveData>,
    pub last_hoe_command: HoeCommand,
}

impl Default for ControllerState {
    fn default() -> Self {
        ControllerState {
            stage: Stage::Stopped,
            driving_direction: TravelDirection::Forward,
            hoe_engaged: false,
            last_drive_command: None,
            last_hoe_command: HoeCommand::Raise,
        }
    }
}

impl ControllerState {
    /// Transition function, one call per tracking result
    pub fn update(&mut self, result: &TrackingResult, config: &DrivingConfig) -> ActuatorCommand {
        let hoe = HoeCommand::from_engaged(self.hoe_engaged);
        self.last_hoe_command = hoe;

        let center = if result.lost_context { None } else { result.lines.center };

        if let Some(center) = center {
            let center_x = result.frame_center_x();
            let drive = drive_command(&center, center_x, self.driving_direction, config);
            let gantry = match (result.lines.left, result.lines.right) {
                (Some(left), Some(right)) => gantry_command(&left, &right, center_x, self.driving_direction, config),
                _ => GantryData::HOLD,
            };

            self.stage = Stage::Tracking;
            self.last_drive_command = Some(drive);

            return ActuatorCommand { drive, gantry, hoe };
        }

        let lost_cycles = match self.stage {
            Stage::Tracking => 1,
            Stage::Degraded { lost_cycles } => lost_cycles.saturating_add(1),
            Stage::Stopped => u32::MAX,
        };

        match self.last_drive_command {
            Some(drive) if lost_cycles <= config.lost_context_hold_cycles => {
                self.stage = Stage::Degraded { lost_cycles };
                ActuatorCommand { drive, gantry: GantryData::HOLD, hoe }
            }
            _ => {
                self.stage = Stage::Stopped;
                self.last_drive_command = None;
                ActuatorCommand::stop(hoe)
            }
        }
    }

    pub fn toggle_direction(&mut self) {
        self.driving_direction = self.driving_direction.toggled();
        self.last_drive_command = None;
    }

    pub fn toggle_hoe(&mut self) {
        self.hoe_engaged = !self.hoe_engaged;
    }

    /// Same as a toggle when `direction` differs, otherwise nothing
    pub fn set_direction(&mut self, direction: TravelDirection) {
        if self.driving_direction != direction {
            self.toggle_direction();
        }
    }

    /// Back to the initial state, only the hoe setting survives
    pub fn reset(&mut self) {
        *self = ControllerState {
            hoe_engaged: self.hoe_engaged,
            ..Default::default()
        };
    }
}

/// Differential steering toward the far end of the center line.
///
/// The track on the side the row drifts toward speeds up, the other slows.
/// Reversing swaps and negates the tracks.
pub fn drive_command(
    center: &Line,
    frame_center_x: f64,
    direction: TravelDirection,
    config: &DrivingConfig,
) -> DriveData {
    let mut error = center.end.x - frame_center_x;
    if error.abs() < config.steering_deadzone_px {
        error = 0.0;
    }
    let error = error.clamp(-config.steering_max_px, config.steering_max_px);

    let pwm = PWM_LIMIT as f64 * config.driving_speed.clamp(0.0, 1.0);
    let scale = error.abs() / config.steering_max_px * pwm;
    let forward = scale * config.forward_correction;
    let reverse = scale * config.reverse_correction;

    let (left, right) = if error > 0.0 { (forward, reverse) } else { (reverse, forward) };
    let left = (pwm + left) as i16;
    let right = (pwm + right) as i16;

    match direction {
        TravelDirection::Forward => DriveData::new(left, right),
        TravelDirection::Reverse => DriveData::new(right.saturating_neg(), left.saturating_neg()),
    }
}

/// Lateral hoe correction, a faster step rate for a larger offset
pub fn gantry_command(
    left: &Line,
    right: &Line,
    frame_center_x: f64,
    direction: TravelDirection,
    config: &DrivingConfig,
) -> GantryData {
    let midpoint_x = ((left.midpoint().x + right.midpoint().x) / 2.0).floor();
    let error = midpoint_x - frame_center_x;

    if error.abs() < config.gantry_deadzone_px || error == 0.0 {
        return GantryData::HOLD;
    }

    let span = (GANTRY_MAX_DELAY_US - GANTRY_MIN_DELAY_US) as f64;
    let ratio = (error.abs() / config.gantry_max_px).min(1.0);
    let magnitude =
        ((GANTRY_MAX_DELAY_US as f64 - ratio * span) as i32).clamp(GANTRY_MIN_DELAY_US, GANTRY_MAX_DELAY_US);

    let step_delay_us = if error > 0.0 { magnitude } else { -magnitude };
    let step_delay_us = match direction {
        TravelDirection::Forward => step_delay_us,
        TravelDirection::Reverse => -step_delay_us,
    };

    GantryData { step_delay_us }
}
