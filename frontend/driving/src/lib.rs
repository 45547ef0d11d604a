pub mod collaborators;
pub mod config;
pub mod controller;
pub mod drive_loop;
pub mod state;

pub use collaborators::{FrameSource, SharedTuning, TemperatureSensor};
pub use config::{ConfigError, DrivingConfig};
pub use controller::RowController;
pub use drive_loop::{Collaborators, DriveLoop, OperatorEvent, StatusSnapshot};
pub use state::{ControllerState, Stage};
