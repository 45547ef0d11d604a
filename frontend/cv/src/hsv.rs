//! Colour conversion and per-frame adaptive thresholds.
//!
//! Hue follows the 8-bit OpenCV convention (0..180), saturation and value
//! span 0..255.

use image::{GrayImage, Luma, Rgb, RgbImage};
use serde::{Deserialize, Serialize};

use crate::settings::TuningParameters;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Hue,
    Saturation,
    Value,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Hue, Channel::Saturation, Channel::Value];

    fn index(self) -> usize {
        match self {
            Channel::Hue => 0,
            Channel::Saturation => 1,
            Channel::Value => 2,
        }
    }
}

pub fn rgb_to_hsv(pixel: &Rgb<u8>) -> [u8; 3] {
    let [r, g, b] = pixel.0.map(i32::from);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let saturation = if max == 0 {
        0
    } else {
        (delta * 255 + max / 2) / max
    };

    let hue = if delta == 0 {
        0.0
    } else {
        let degrees = if max == r {
            60.0 * (g - b) as f64 / delta as f64
        } else if max == g {
            120.0 + 60.0 * (b - r) as f64 / delta as f64
        } else {
            240.0 + 60.0 * (r - g) as f64 / delta as f64
        };
        let degrees = if degrees < 0.0 { degrees + 360.0 } else { degrees };
        degrees / 2.0
    };

    // 180 wraps back onto red
    let hue = (hue.round() as i32 % 180) as u8;

    [hue, saturation as u8, max as u8]
}

/// The three HSV planes of a frame, row major
pub struct HsvPlanes {
    pub width: u32,
    pub height: u32,
    planes: [Vec<u8>; 3],
}

impl HsvPlanes {
    pub fn from_rgb(image: &RgbImage) -> Self {
        let len = (image.width() * image.height()) as usize;
        let mut planes = [Vec::with_capacity(len), Vec::with_capacity(len), Vec::with_capacity(len)];

        for pixel in image.pixels() {
            let hsv = rgb_to_hsv(pixel);
            for (plane, value) in planes.iter_mut().zip(hsv) {
                plane.push(value);
            }
        }

        HsvPlanes {
            width: image.width(),
            height: image.height(),
            planes,
        }
    }

    pub fn plane(&self, channel: Channel) -> &[u8] {
        &self.planes[channel.index()]
    }
}

/// Count of each 8-bit value
pub struct Histogram {
    counts: [u32; 256],
    total: u32,
}

impl Histogram {
    pub fn from_values<'a>(values: impl IntoIterator<Item = &'a u8>) -> Self {
        let mut counts = [0; 256];
        let mut total = 0;
        for &value in values {
            counts[value as usize] += 1;
            total += 1;
        }
        Histogram { counts, total }
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Value of the `rank`-th smallest sample, zero based
    fn order_statistic(&self, rank: u32) -> f64 {
        let mut seen = 0;
        for (value, &count) in self.counts.iter().enumerate() {
            seen += count;
            if seen > rank {
                return value as f64;
            }
        }
        255.0
    }

    /// Percentile with linear interpolation between neighbouring samples
    pub fn percentile(&self, percent: u8) -> f64 {
        if self.total == 0 {
            return 0.0;
        }

        let rank = (percent.min(100) as f64 / 100.0) * (self.total - 1) as f64;
        let below = rank.floor();
        let above = rank.ceil();

        let low = self.order_statistic(below as u32);
        let high = self.order_statistic(above as u32);

        low + (high - low) * (rank - below)
    }
}

/// Inclusive band of accepted channel values
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelBounds {
    pub lower: f64,
    pub upper: f64,
}

impl ChannelBounds {
    pub fn contains(&self, value: u8) -> bool {
        let value = value as f64;
        self.lower <= value && value <= self.upper
    }
}

/// First row inside the region of interest
pub fn roi_start_row(height: u32, tuning: &TuningParameters) -> u32 {
    (height as u64 * tuning.roi_top_percent.min(99) as u64 / 100) as u32
}

/// Derives one band per channel from the percentiles of the current frame,
/// so the thresholds follow the light instead of being fixed numbers
pub fn adaptive_bounds(planes: &HsvPlanes, tuning: &TuningParameters) -> [ChannelBounds; 3] {
    let start = (roi_start_row(planes.height, tuning) * planes.width) as usize;

    Channel::ALL.map(|channel| {
        let histogram = Histogram::from_values(&planes.plane(channel)[start..]);
        let (lower, upper) = tuning.percentiles(channel);
        ChannelBounds {
            lower: histogram.percentile(lower),
            upper: histogram.percentile(upper),
        }
    })
}

/// Foreground is every pixel inside all three bands
pub fn threshold_mask(planes: &HsvPlanes, bounds: &[ChannelBounds; 3], tuning: &TuningParameters) -> GrayImage {
    let start_row = roi_start_row(planes.height, tuning);
    let [hue, saturation, value] = Channel::ALL.map(|channel| planes.plane(channel));

    GrayImage::from_fn(planes.width, planes.height, |x, y| {
        if y < start_row {
            return Luma([0]);
        }

        let i = (y * planes.width + x) as usize;
        let inside = bounds[0].contains(hue[i])
            && bounds[1].contains(saturation[i])
            && bounds[2].contains(value[i]);

        Luma([if inside { 255 } else { 0 }])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn converts_primaries() {
        assert_eq!(rgb_to_hsv(&Rgb([255, 0, 0])), [0, 255, 255]);
        assert_eq!(rgb_to_hsv(&Rgb([0, 255, 0])), [60, 255, 255]);
        assert_eq!(rgb_to_hsv(&Rgb([0, 0, 255])), [120, 255, 255]);
        assert_eq!(rgb_to_hsv(&Rgb([0, 0, 0])), [0, 0, 0]);
        assert_eq!(rgb_to_hsv(&Rgb([128, 128, 128])), [0, 0, 128]);
    }

    #[test]
    fn percentile_interpolates() {
        let values = [10u8, 20, 30, 40, 50];
        let histogram = Histogram::from_values(&values);
        assert_eq!(histogram.percentile(0), 10.0);
        assert_eq!(histogram.percentile(50), 30.0);
        assert_eq!(histogram.percentile(100), 50.0);
        assert!((histogram.percentile(10) - 14.0).abs() < 1e-9);
    }

    #[test]
    fn empty_histogram_is_zero() {
        let histogram = Histogram::from_values(&[]);
        assert!(histogram.is_empty());
        assert_eq!(histogram.percentile(50), 0.0);
    }

    fn noisy_frame(seed: u64) -> RgbImage {
        let mut rng = StdRng::seed_from_u64(seed);
        RgbImage::from_fn(64, 48, |_, _| Rgb([rng.gen(), rng.gen(), rng.gen()]))
    }

    fn foreground(mask: &GrayImage) -> Vec<bool> {
        mask.pixels().map(|p| p.0[0] > 0).collect()
    }

    #[test]
    fn raising_upper_percentile_never_shrinks_mask() {
        let planes = HsvPlanes::from_rgb(&noisy_frame(7));

        for channel in Channel::ALL {
            let mut previous: Option<Vec<bool>> = None;
            for upper in (40..=100).step_by(5) {
                let mut tuning = TuningParameters {
                    h_lower_percentile: 20,
                    h_upper_percentile: 80,
                    s_lower_percentile: 20,
                    s_upper_percentile: 80,
                    v_lower_percentile: 20,
                    v_upper_percentile: 80,
                    ..Default::default()
                };
                match channel {
                    Channel::Hue => tuning.h_upper_percentile = upper,
                    Channel::Saturation => tuning.s_upper_percentile = upper,
                    Channel::Value => tuning.v_upper_percentile = upper,
                }

                let bounds = adaptive_bounds(&planes, &tuning);
                let mask = foreground(&threshold_mask(&planes, &bounds, &tuning));

                if let Some(previous) = &previous {
                    for (was, is) in previous.iter().zip(&mask) {
                        assert!(!was || *is, "{:?} upper {} dropped a pixel", channel, upper);
                    }
                }
                previous = Some(mask);
            }
        }
    }

    #[test]
    fn roi_blanks_upper_rows() {
        let image = RgbImage::from_pixel(10, 10, Rgb([0, 200, 0]));
        let planes = HsvPlanes::from_rgb(&image);
        let tuning = TuningParameters {
            s_lower_percentile: 0,
            roi_top_percent: 50,
            ..Default::default()
        };
        let bounds = adaptive_bounds(&planes, &tuning);
        let mask = threshold_mask(&planes, &bounds, &tuning);

        assert_eq!(mask.get_pixel(3, 4).0[0], 0);
        assert_eq!(mask.get_pixel(3, 5).0[0], 255);
    }
}
