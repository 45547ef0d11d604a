use serde::{Deserialize, Serialize};

/// Largest magnitude the motor driver accepts for either track
pub const PWM_LIMIT: i16 = 255;

/// Slowest non-zero gantry step rate, used for small corrections
pub const GANTRY_MAX_DELAY_US: i32 = 20_000;
/// Fastest gantry step rate, used for large corrections
pub const GANTRY_MIN_DELAY_US: i32 = 5_000;

/// Which camera a frame came from
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CameraSide {
    Front,
    Rear,
}

impl CameraSide {
    pub const ALL: [CameraSide; 2] = [CameraSide::Front, CameraSide::Rear];

    pub fn opposite(self) -> Self {
        match self {
            CameraSide::Front => CameraSide::Rear,
            CameraSide::Rear => CameraSide::Front,
        }
    }

    /// The physical camera feeding this logical side
    pub fn physical(self, swap_cameras: bool) -> Self {
        if swap_cameras {
            self.opposite()
        } else {
            self
        }
    }

    pub fn index(self) -> usize {
        match self {
            CameraSide::Front => 0,
            CameraSide::Rear => 1,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TravelDirection {
    #[default]
    Forward,
    Reverse,
}

impl TravelDirection {
    pub fn toggled(self) -> Self {
        match self {
            TravelDirection::Forward => TravelDirection::Reverse,
            TravelDirection::Reverse => TravelDirection::Forward,
        }
    }

    /// The camera looking where the robot is heading
    pub fn facing_side(self) -> CameraSide {
        match self {
            TravelDirection::Forward => CameraSide::Front,
            TravelDirection::Reverse => CameraSide::Rear,
        }
    }
}

/// Tank drive set points, one per track
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DriveData {
    pub left: i16,
    pub right: i16,
}

impl DriveData {
    pub const STOP: DriveData = DriveData { left: 0, right: 0 };

    pub fn new(left: i16, right: i16) -> Self {
        DriveData { left, right }.clamp()
    }

    pub fn clamp(self) -> Self {
        DriveData {
            left: self.left.clamp(-PWM_LIMIT, PWM_LIMIT),
            right: self.right.clamp(-PWM_LIMIT, PWM_LIMIT),
        }
    }

    pub fn in_bounds(&self) -> bool {
        self.left.abs() <= PWM_LIMIT && self.right.abs() <= PWM_LIMIT
    }
}

/// Lateral hoe positioning, expressed as a signed step delay in microseconds.
/// Zero holds the gantry still.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GantryData {
    pub step_delay_us: i32,
}

impl GantryData {
    pub const HOLD: GantryData = GantryData { step_delay_us: 0 };

    pub fn in_bounds(&self) -> bool {
        let magnitude = self.step_delay_us.unsigned_abs();
        magnitude == 0
            || (GANTRY_MIN_DELAY_US as u32..=GANTRY_MAX_DELAY_US as u32).contains(&magnitude)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HoeCommand {
    Lower,
    Raise,
}

impl HoeCommand {
    pub fn from_engaged(engaged: bool) -> Self {
        if engaged {
            HoeCommand::Lower
        } else {
            HoeCommand::Raise
        }
    }
}

/// Everything the microcontroller needs for one control cycle
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActuatorCommand {
    pub drive: DriveData,
    pub gantry: GantryData,
    pub hoe: HoeCommand,
}

impl ActuatorCommand {
    pub fn stop(hoe: HoeCommand) -> Self {
        ActuatorCommand {
            drive: DriveData::STOP,
            gantry: GantryData::HOLD,
            hoe,
        }
    }

    pub fn in_bounds(&self) -> bool {
        self.drive.in_bounds() && self.gantry.in_bounds()
    }
}

/// Who is driving, as reported by the board from the RC receiver
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RcMode {
    /// Commands from the row controller reach the actuators
    Auto,
    #[default]
    Manual,
    Stop,
}

impl RcMode {
    /// Mode number used on the wire
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(RcMode::Auto),
            1 => Some(RcMode::Manual),
            2 => Some(RcMode::Stop),
            _ => None,
        }
    }
}

/// Lines received from the microcontroller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamMessage<'a> {
    /// Reply to an identification request
    Identify(&'a str),
    /// `mode <n> [FORWARD|BACKWARD]`
    Mode {
        mode: RcMode,
        direction: Option<TravelDirection>,
        text: &'a str,
    },
    Log(&'a str),
}

impl<'a> UpstreamMessage<'a> {
    /// The received line without its terminator
    pub fn text(&self) -> &'a str {
        match *self {
            UpstreamMessage::Identify(text) | UpstreamMessage::Log(text) => text,
            UpstreamMessage::Mode { text, .. } => text,
        }
    }
}
