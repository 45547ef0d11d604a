pub mod frame;
pub mod hsv;
pub mod line;
pub mod line_tracker;
pub mod morphology;
pub mod preview;
pub mod settings;

pub use frame::Frame;
pub use line::Line;
pub use line_tracker::{track, track_with_masks, Evidence, TrackedLines, TrackingHint, TrackingMasks, TrackingResult};
pub use settings::{SettingsError, TuningParameters};
