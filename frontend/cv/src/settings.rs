use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hsv::Channel;

pub const MAX_KERNEL: u32 = 31;
pub const MAX_VERTICAL_DILATION: u32 = 20;

/// Thresholds the operator tunes from the dashboard.
///
/// Field names follow the persisted settings document. Percentiles, the
/// R² threshold and the region of interest are percentages.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct TuningParameters {
    pub h_lower_percentile: u8,
    pub h_upper_percentile: u8,
    pub s_lower_percentile: u8,
    pub s_upper_percentile: u8,
    pub v_lower_percentile: u8,
    pub v_upper_percentile: u8,
    pub close_kernel: u32,
    pub open_kernel: u32,
    /// Lateral distance in pixels below which two candidate lines are one boundary
    pub dist_threshold: u32,
    pub vertical_dilation_iterations: u32,
    pub r2_threshold: u8,
    pub swap_cameras: bool,

    pub min_component_pixels: u32,
    pub min_candidate_pixels: u32,
    pub min_line_length: u32,
    /// Degrees
    pub max_angle_from_vertical: u32,
    /// Rows above this share of the frame height are ignored
    pub roi_top_percent: u8,
    /// How many consecutive cycles a boundary may be carried over from the hint
    pub hint_reuse_cycles: u32,
}

impl Default for TuningParameters {
    fn default() -> Self {
        TuningParameters {
            h_lower_percentile: 0,
            h_upper_percentile: 100,
            s_lower_percentile: 80,
            s_upper_percentile: 100,
            v_lower_percentile: 0,
            v_upper_percentile: 100,
            close_kernel: 3,
            open_kernel: 3,
            dist_threshold: 10,
            vertical_dilation_iterations: 1,
            r2_threshold: 80,
            swap_cameras: false,

            min_component_pixels: 10,
            min_candidate_pixels: 100,
            min_line_length: 70,
            max_angle_from_vertical: 45,
            roi_top_percent: 0,
            hint_reuse_cycles: 3,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SettingsError {
    #[error("{channel:?} percentile {value} is above 100")]
    PercentileRange { channel: Channel, value: u8 },
    #[error("{channel:?} lower percentile {lower} is above upper percentile {upper}")]
    InvertedPercentiles { channel: Channel, lower: u8, upper: u8 },
    #[error("{name} kernel size {size} exceeds the 31 pixel limit")]
    KernelTooLarge { name: &'static str, size: u32 },
    #[error("{0} vertical dilation iterations exceeds the limit of 20")]
    TooManyDilations(u32),
    #[error("R² threshold {0} is above 100")]
    R2Range(u8),
    #[error("region of interest must leave part of the frame, got {0}%")]
    RoiRange(u8),
    #[error("angle limit {0} is above 90 degrees")]
    AngleRange(u32),
}

impl TuningParameters {
    pub fn percentiles(&self, channel: Channel) -> (u8, u8) {
        match channel {
            Channel::Hue => (self.h_lower_percentile, self.h_upper_percentile),
            Channel::Saturation => (self.s_lower_percentile, self.s_upper_percentile),
            Channel::Value => (self.v_lower_percentile, self.v_upper_percentile),
        }
    }

    pub fn min_r2(&self) -> f64 {
        self.r2_threshold as f64 / 100.0
    }

    /// Rejects documents the line tracker cannot work with
    pub fn validate(&self) -> Result<(), SettingsError> {
        for channel in Channel::ALL {
            let (lower, upper) = self.percentiles(channel);
            for value in [lower, upper] {
                if value > 100 {
                    return Err(SettingsError::PercentileRange { channel, value });
                }
            }
            if lower > upper {
                return Err(SettingsError::InvertedPercentiles { channel, lower, upper });
            }
        }

        for (name, size) in [("close", self.close_kernel), ("open", self.open_kernel)] {
            if size > MAX_KERNEL {
                return Err(SettingsError::KernelTooLarge { name, size });
            }
        }

        if self.vertical_dilation_iterations > MAX_VERTICAL_DILATION {
            return Err(SettingsError::TooManyDilations(self.vertical_dilation_iterations));
        }
        if self.r2_threshold > 100 {
            return Err(SettingsError::R2Range(self.r2_threshold));
        }
        if self.roi_top_percent >= 100 {
            return Err(SettingsError::RoiRange(self.roi_top_percent));
        }
        if self.max_angle_from_vertical > 90 {
            return Err(SettingsError::AngleRange(self.max_angle_from_vertical));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(TuningParameters::default().validate(), Ok(()));
    }

    #[test]
    fn inverted_percentiles_are_rejected() {
        let tuning = TuningParameters {
            s_lower_percentile: 70,
            s_upper_percentile: 40,
            ..Default::default()
        };
        assert_eq!(
            tuning.validate(),
            Err(SettingsError::InvertedPercentiles {
                channel: Channel::Saturation,
                lower: 70,
                upper: 40
            })
        );
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let tuning = TuningParameters { h_upper_percentile: 101, ..Default::default() };
        assert!(matches!(tuning.validate(), Err(SettingsError::PercentileRange { .. })));

        let tuning = TuningParameters { close_kernel: 40, ..Default::default() };
        assert!(matches!(tuning.validate(), Err(SettingsError::KernelTooLarge { name: "close", .. })));

        let tuning = TuningParameters { r2_threshold: 120, ..Default::default() };
        assert_eq!(tuning.validate(), Err(SettingsError::R2Range(120)));
    }

    #[test]
    fn reads_the_persisted_document() {
        let document = r#"{
            "hLowerPercentile": 10,
            "hUpperPercentile": 90,
            "sLowerPercentile": 5,
            "sUpperPercentile": 95,
            "vLowerPercentile": 0,
            "vUpperPercentile": 100,
            "closeKernel": 2,
            "openKernel": 1,
            "distThreshold": 5,
            "verticalDilationIterations": 2,
            "r2Threshold": 80,
            "swapCameras": true
        }"#;
        let tuning: TuningParameters = serde_json::from_str(document).unwrap();
        assert_eq!(tuning.h_lower_percentile, 10);
        assert_eq!(tuning.close_kernel, 2);
        assert!(tuning.swap_cameras);
        assert_eq!(tuning.hint_reuse_cycles, TuningParameters::default().hint_reuse_cycles);
        assert_eq!(tuning.validate(), Ok(()));
    }
}
