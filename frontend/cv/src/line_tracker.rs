use common::controller::CameraSide;
use image::{GrayImage, Luma};
use imageproc::region_labelling::{connected_components, Connectivity};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::frame::Frame;
use crate::hsv::{self, HsvPlanes};
use crate::line::{Line, Moments};
use crate::morphology;
use crate::settings::TuningParameters;

/// Where a boundary in the result came from
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evidence {
    Fresh,
    /// Carried over from the hint, `age` cycles without fresh evidence
    Reused { age: u32 },
    Missing,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct TrackedLines {
    pub left: Option<Line>,
    pub right: Option<Line>,
    pub center: Option<Line>,
}

/// The previous estimate, handed back in on the next call
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TrackingHint {
    pub left: Option<Line>,
    pub right: Option<Line>,
    pub left_age: u32,
    pub right_age: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct TrackingResult {
    pub side: CameraSide,
    pub lines: TrackedLines,
    pub left_evidence: Evidence,
    pub right_evidence: Evidence,
    /// Set whenever either boundary lacks fresh evidence this cycle
    pub lost_context: bool,
    pub frame_width: u32,
    pub frame_height: u32,
}

impl TrackingResult {
    /// No boundaries at all, as for a frame that could not be read
    pub fn lost(side: CameraSide, frame_width: u32, frame_height: u32) -> Self {
        TrackingResult {
            side,
            lines: TrackedLines::default(),
            left_evidence: Evidence::Missing,
            right_evidence: Evidence::Missing,
            lost_context: true,
            frame_width,
            frame_height,
        }
    }

    pub fn frame_center_x(&self) -> f64 {
        self.frame_width as f64 / 2.0
    }

    /// Hint to pass into the next call for the same camera
    pub fn hint(&self) -> TrackingHint {
        fn age(evidence: Evidence) -> u32 {
            match evidence {
                Evidence::Reused { age } => age,
                Evidence::Fresh | Evidence::Missing => 0,
            }
        }

        TrackingHint {
            left: self.lines.left,
            right: self.lines.right,
            left_age: age(self.left_evidence),
            right_age: age(self.right_evidence),
        }
    }
}

/// Intermediate masks, kept for the dashboard preview
pub struct TrackingMasks {
    pub threshold: GrayImage,
    pub cleaned: GrayImage,
}

/// A component that fits a line well enough to be a row boundary
#[derive(Debug, Clone, Copy)]
pub(crate) struct Candidate {
    pub moments: Moments,
    pub line: Line,
    /// Column of the line at the frame's middle row
    pub offset: f64,
}

impl Candidate {
    fn from_moments(moments: Moments, reference_y: f64) -> Option<Self> {
        let line = moments.fit()?;
        Some(Candidate {
            moments,
            line,
            offset: line.x_at(reference_y),
        })
    }
}

/// Finds the left, right and center row lines in one frame.
///
/// Pure: the only memory between calls is the optional hint, which the caller
/// takes from the previous result.
pub fn track(frame: &Frame, tuning: &TuningParameters, previous: Option<&TrackingHint>) -> TrackingResult {
    track_with_masks(frame, tuning, previous).0
}

pub fn track_with_masks(
    frame: &Frame,
    tuning: &TuningParameters,
    previous: Option<&TrackingHint>,
) -> (TrackingResult, TrackingMasks) {
    let (width, height) = (frame.width(), frame.height());
    if frame.is_empty() {
        let masks = TrackingMasks {
            threshold: GrayImage::new(width, height),
            cleaned: GrayImage::new(width, height),
        };
        return (TrackingResult::lost(frame.side, width, height), masks);
    }

    let planes = HsvPlanes::from_rgb(&frame.image);
    let bounds = hsv::adaptive_bounds(&planes, tuning);
    let threshold = hsv::threshold_mask(&planes, &bounds, tuning);
    if covers_roi(&threshold, hsv::roi_start_row(height, tuning)) {
        trace!(side = ?frame.side, "no contrast in frame");
        let cleaned = threshold.clone();
        return (TrackingResult::lost(frame.side, width, height), TrackingMasks { threshold, cleaned });
    }
    let cleaned = clean_mask(&threshold, tuning);

    let reference_y = height as f64 / 2.0;
    let center_x = width as f64 / 2.0;

    let components = find_components(&cleaned);
    let candidates = candidate_lines(&components, tuning, reference_y, width);
    let fragments: Vec<Moments> = components
        .iter()
        .filter(|moments| {
            moments.count >= tuning.min_component_pixels && moments.count < tuning.min_candidate_pixels
        })
        .copied()
        .collect();

    let (left, right): (Vec<Candidate>, Vec<Candidate>) =
        candidates.into_iter().partition(|candidate| candidate.offset <= center_x);

    let fresh_left = select_boundary(left, &fragments, tuning, reference_y, Inner::Right);
    let fresh_right = select_boundary(right, &fragments, tuning, reference_y, Inner::Left);

    let hint = previous.copied().unwrap_or_default();
    let limit = tuning.hint_reuse_cycles;
    let (left, left_evidence) = resolve(fresh_left, hint.left, hint.left_age, limit);
    let (right, right_evidence) = resolve(fresh_right, hint.right, hint.right_age, limit);

    let center = left.zip(right).map(|(left, right)| Line::average(&left, &right));
    let lost_context = left_evidence != Evidence::Fresh || right_evidence != Evidence::Fresh;

    trace!(
        side = ?frame.side,
        components = components.len(),
        ?left_evidence,
        ?right_evidence,
        "tracked frame"
    );

    let result = TrackingResult {
        side: frame.side,
        lines: TrackedLines { left, right, center },
        left_evidence,
        right_evidence,
        lost_context,
        frame_width: width,
        frame_height: height,
    };

    (result, TrackingMasks { threshold, cleaned })
}

/// Every pixel below the ROI start passed the threshold, so nothing separates
/// rows from ground
fn covers_roi(mask: &GrayImage, start_row: u32) -> bool {
    let start = (start_row * mask.width()) as usize;
    mask.as_raw().get(start..).map_or(true, |roi| roi.iter().all(|&value| value > 0))
}

/// Close small gaps, drop specks, then bridge vertically broken segments
pub fn clean_mask(mask: &GrayImage, tuning: &TuningParameters) -> GrayImage {
    let closed = morphology::close(mask, tuning.close_kernel);
    let opened = morphology::open(&closed, tuning.open_kernel);
    morphology::dilate_vertical(&opened, tuning.vertical_dilation_iterations)
}

/// Moments of each 8-connected foreground component, in label order
fn find_components(mask: &GrayImage) -> Vec<Moments> {
    let labels = connected_components(mask, Connectivity::Eight, Luma([0u8]));

    let mut components: Vec<Moments> = Vec::new();
    for (x, y, label) in labels.enumerate_pixels() {
        let label = label.0[0] as usize;
        if label == 0 {
            continue;
        }
        if components.len() < label {
            components.resize(label, Moments::default());
        }
        components[label - 1].add(x, y);
    }

    components
}

fn candidate_lines(
    components: &[Moments],
    tuning: &TuningParameters,
    reference_y: f64,
    frame_width: u32,
) -> Vec<Candidate> {
    components
        .iter()
        .filter(|moments| moments.count >= tuning.min_candidate_pixels.max(tuning.min_component_pixels))
        // a boundary never spans the whole frame
        .filter(|moments| moments.width() < frame_width as f64)
        .filter_map(|moments| Candidate::from_moments(*moments, reference_y))
        .filter(|candidate| candidate.line.r2 >= tuning.min_r2())
        .filter(|candidate| candidate.line.angle_from_vertical() <= tuning.max_angle_from_vertical as f64)
        .collect()
}

/// Pools candidates whose lateral offsets are closer than `threshold`.
///
/// Chains merge transitively, so broken pieces of one row edge become one
/// boundary while rows further apart stay separate.
pub(crate) fn merge_boundaries(mut candidates: Vec<Candidate>, threshold: f64, reference_y: f64) -> Vec<Candidate> {
    candidates.sort_by(|a, b| a.offset.total_cmp(&b.offset));

    let mut groups: Vec<Vec<Candidate>> = Vec::new();
    for candidate in candidates {
        match groups.last_mut() {
            Some(group) if group.iter().any(|member| (candidate.offset - member.offset).abs() < threshold) => {
                group.push(candidate);
            }
            _ => groups.push(vec![candidate]),
        }
    }

    groups
        .into_iter()
        .filter_map(|group| {
            if group.len() == 1 {
                return group.into_iter().next();
            }
            let pooled = group
                .iter()
                .skip(1)
                .fold(group[0].moments, |acc, member| acc.merge(&member.moments));
            Candidate::from_moments(pooled, reference_y).or_else(|| group.into_iter().next())
        })
        .collect()
}

/// Small components lying on a boundary are folded into it
fn absorb_fragments(
    boundaries: Vec<Candidate>,
    fragments: &[Moments],
    threshold: f64,
    reference_y: f64,
) -> Vec<Candidate> {
    if fragments.is_empty() {
        return boundaries;
    }

    boundaries
        .into_iter()
        .map(|boundary| {
            let pooled = fragments
                .iter()
                .filter(|fragment| {
                    let centroid = fragment.centroid();
                    (centroid.x - boundary.line.x_at(centroid.y)).abs() < threshold
                })
                .fold(boundary.moments, |acc, fragment| acc.merge(fragment));

            if pooled == boundary.moments {
                boundary
            } else {
                Candidate::from_moments(pooled, reference_y).unwrap_or(boundary)
            }
        })
        .collect()
}

/// Which way the frame center lies from a side's candidates
#[derive(Clone, Copy)]
enum Inner {
    Left,
    Right,
}

fn select_boundary(
    candidates: Vec<Candidate>,
    fragments: &[Moments],
    tuning: &TuningParameters,
    reference_y: f64,
    inner: Inner,
) -> Option<Line> {
    let threshold = tuning.dist_threshold as f64;
    let merged = merge_boundaries(candidates, threshold, reference_y);

    absorb_fragments(merged, fragments, threshold, reference_y)
        .into_iter()
        .filter(|candidate| candidate.line.length() >= tuning.min_line_length as f64)
        .max_by(|a, b| match inner {
            Inner::Right => a.offset.total_cmp(&b.offset),
            Inner::Left => b.offset.total_cmp(&a.offset),
        })
        .map(|candidate| candidate.line)
}

fn resolve(fresh: Option<Line>, hinted: Option<Line>, hinted_age: u32, limit: u32) -> (Option<Line>, Evidence) {
    match (fresh, hinted) {
        (Some(line), _) => (Some(line), Evidence::Fresh),
        (None, Some(line)) if hinted_age < limit => (Some(line), Evidence::Reused { age: hinted_age + 1 }),
        _ => (None, Evidence::Missing),
    }
}
