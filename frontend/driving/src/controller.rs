use common::controller::{ActuatorCommand, CameraSide, RcMode, TravelDirection};
use cv::TrackingResult;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::DrivingConfig;
use crate::state::ControllerState;

/// Turns tracking results and operator intent into actuator commands.
///
/// Each camera side keeps its own state behind its own lock, so the two
/// workers never contend except on operator events.
pub struct RowController {
    config: DrivingConfig,
    sides: [Mutex<ControllerState>; 2],
    mode: Mutex<RcMode>,
}

impl RowController {
    pub fn new(config: DrivingConfig) -> Self {
        RowController {
            mode: Mutex::new(config.initial_mode),
            config,
            sides: [Mutex::new(ControllerState::default()), Mutex::new(ControllerState::default())],
        }
    }

    pub fn config(&self) -> &DrivingConfig {
        &self.config
    }

    /// One command per call, always within actuator bounds
    pub fn step(&self, result: &TrackingResult) -> ActuatorCommand {
        let mut state = self.sides[result.side.index()].lock();
        let before = state.stage;
        let command = state.update(result, &self.config);

        if state.stage != before {
            debug!(side = ?result.side, from = ?before, to = ?state.stage, "Stage changed");
        }

        command
    }

    pub fn toggle_direction(&self) -> TravelDirection {
        let [front, rear] = &self.sides;
        let (mut front, mut rear) = (front.lock(), rear.lock());
        front.toggle_direction();
        rear.toggle_direction();

        info!(direction = ?front.driving_direction, "Direction toggled");
        front.driving_direction
    }

    pub fn toggle_hoe(&self) -> bool {
        let [front, rear] = &self.sides;
        let (mut front, mut rear) = (front.lock(), rear.lock());
        front.toggle_hoe();
        rear.toggle_hoe();

        info!(engaged = front.hoe_engaged, "Hoe toggled");
        front.hoe_engaged
    }

    /// Applies a mode reported by the board. Auto adopts the reported
    /// direction, manual and stop reset both sides.
    pub fn set_mode(&self, mode: RcMode, direction: Option<TravelDirection>) {
        let [front, rear] = &self.sides;
        let (mut front, mut rear) = (front.lock(), rear.lock());

        match mode {
            RcMode::Auto => {
                if let Some(direction) = direction {
                    front.set_direction(direction);
                    rear.set_direction(direction);
                }
            }
            RcMode::Manual | RcMode::Stop => {
                front.reset();
                rear.reset();
            }
        }

        let mut current = self.mode.lock();
        if *current != mode {
            info!(from = ?*current, to = ?mode, direction = ?front.driving_direction, "RC mode changed");
        }
        *current = mode;
    }

    pub fn mode(&self) -> RcMode {
        *self.mode.lock()
    }

    /// Commands only reach the board while it is in auto mode
    pub fn is_auto(&self) -> bool {
        self.mode() == RcMode::Auto
    }

    pub fn state(&self, side: CameraSide) -> ControllerState {
        self.sides[side.index()].lock().clone()
    }

    pub fn direction(&self) -> TravelDirection {
        self.sides[CameraSide::Front.index()].lock().driving_direction
    }

    /// Side whose commands reach the controller board
    pub fn active_side(&self) -> CameraSide {
        self.direction().facing_side()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Stage;
    use common::controller::HoeCommand;
    use cv::{Evidence, Line, TrackedLines};
    use glam::DVec2;
    use std::sync::Arc;
    use std::thread;

    fn result(side: CameraSide, lost_context: bool) -> TrackingResult {
        let left = Line::new(DVec2::new(100.0, 179.0), DVec2::new(100.0, 0.0), 0.95);
        let right = Line::new(DVec2::new(180.0, 179.0), DVec2::new(180.0, 0.0), 0.95);
        let lines = if lost_context {
            TrackedLines::default()
        } else {
            TrackedLines {
                left: Some(left),
                right: Some(right),
                center: Some(Line::average(&left, &right)),
            }
        };

        TrackingResult {
            side,
            lines,
            left_evidence: Evidence::Fresh,
            right_evidence: Evidence::Fresh,
            lost_context,
            frame_width: 270,
            frame_height: 180,
        }
    }

    #[test]
    fn sides_keep_separate_stages() {
        let controller = RowController::new(DrivingConfig { lost_context_hold_cycles: 0, ..Default::default() });

        controller.step(&result(CameraSide::Front, false));
        controller.step(&result(CameraSide::Rear, true));

        assert_eq!(controller.state(CameraSide::Front).stage, Stage::Tracking);
        assert_eq!(controller.state(CameraSide::Rear).stage, Stage::Stopped);
    }

    #[test]
    fn toggles_apply_to_both_sides() {
        let controller = RowController::new(DrivingConfig::default());

        assert_eq!(controller.active_side(), CameraSide::Front);
        assert_eq!(controller.toggle_direction(), TravelDirection::Reverse);
        assert_eq!(controller.active_side(), CameraSide::Rear);
        assert!(controller.toggle_hoe());

        for side in CameraSide::ALL {
            let state = controller.state(side);
            assert_eq!(state.driving_direction, TravelDirection::Reverse);
            assert!(state.hoe_engaged);
        }
        assert_eq!(controller.step(&result(CameraSide::Rear, true)).hoe, HoeCommand::Lower);
    }

    #[test]
    fn mode_gates_and_sets_direction() {
        let controller = RowController::new(DrivingConfig::default());
        assert_eq!(controller.mode(), RcMode::Manual);
        assert!(!controller.is_auto());

        controller.set_mode(RcMode::Auto, Some(TravelDirection::Reverse));
        assert!(controller.is_auto());
        assert_eq!(controller.active_side(), CameraSide::Rear);

        // a bare auto report keeps the current direction
        controller.set_mode(RcMode::Auto, None);
        assert_eq!(controller.direction(), TravelDirection::Reverse);
    }

    #[test]
    fn manual_and_stop_reset_both_sides() {
        let controller = RowController::new(DrivingConfig {
            initial_mode: RcMode::Auto,
            ..Default::default()
        });
        controller.toggle_hoe();
        controller.toggle_direction();
        controller.step(&result(CameraSide::Rear, false));
        assert_eq!(controller.state(CameraSide::Rear).stage, Stage::Tracking);

        for mode in [RcMode::Stop, RcMode::Manual] {
            controller.set_mode(mode, Some(TravelDirection::Reverse));
            assert_eq!(controller.mode(), mode);
            for side in CameraSide::ALL {
                let state = controller.state(side);
                assert_eq!(state.stage, Stage::Stopped);
                assert_eq!(state.driving_direction, TravelDirection::Forward);
                assert!(state.last_drive_command.is_none());
                assert!(state.hoe_engaged);
            }
        }
    }

    #[test]
    fn concurrent_workers_stay_in_bounds() {
        let controller = Arc::new(RowController::new(DrivingConfig::default()));

        let workers: Vec<_> = CameraSide::ALL
            .into_iter()
            .map(|side| {
                let controller = controller.clone();
                thread::spawn(move || {
                    for i in 0..500 {
                        let command = controller.step(&result(side, i % 4 == 0));
                        assert!(command.in_bounds());
                    }
                })
            })
            .collect();

        for _ in 0..50 {
            controller.toggle_direction();
            controller.toggle_hoe();
        }
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(controller.direction(), TravelDirection::Forward);
        assert!(!controller.state(CameraSide::Rear).hoe_engaged);
    }
}
