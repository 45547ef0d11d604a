use glam::DVec2;
use serde::{Deserialize, Serialize};

/// A fitted row boundary in pixel coordinates.
///
/// `start` is the end closest to the robot (largest y), `end` the far end.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Line {
    pub start: DVec2,
    pub end: DVec2,
    /// Linearity of the pixels the line was fitted to, 0..1
    pub r2: f64,
}

impl Line {
    pub fn new(start: DVec2, end: DVec2, r2: f64) -> Self {
        if start.y < end.y {
            Line { start: end, end: start, r2 }
        } else {
            Line { start, end, r2 }
        }
    }

    pub fn midpoint(&self) -> DVec2 {
        (self.start + self.end) / 2.0
    }

    pub fn length(&self) -> f64 {
        self.start.distance(self.end)
    }

    /// Degrees between the line and the image's vertical axis
    pub fn angle_from_vertical(&self) -> f64 {
        let delta = self.end - self.start;
        delta.x.abs().atan2(delta.y.abs()).to_degrees()
    }

    /// Column where the (extended) line crosses row `y`
    pub fn x_at(&self, y: f64) -> f64 {
        let delta = self.end - self.start;
        if delta.y.abs() < f64::EPSILON {
            return self.midpoint().x;
        }
        self.start.x + (y - self.start.y) * delta.x / delta.y
    }

    /// Midline between two boundaries, pairing their near and far ends
    pub fn average(a: &Line, b: &Line) -> Line {
        Line {
            start: (a.start + b.start) / 2.0,
            end: (a.end + b.end) / 2.0,
            r2: a.r2.min(b.r2),
        }
    }
}

/// Running sums over a set of pixels, enough to fit a line through them.
/// Pooling two sets is adding their moments.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Moments {
    pub count: u32,
    sum_x: f64,
    sum_y: f64,
    sum_xx: f64,
    sum_yy: f64,
    sum_xy: f64,
    min: DVec2,
    max: DVec2,
}

impl Default for Moments {
    fn default() -> Self {
        Moments {
            count: 0,
            sum_x: 0.0,
            sum_y: 0.0,
            sum_xx: 0.0,
            sum_yy: 0.0,
            sum_xy: 0.0,
            min: DVec2::splat(f64::INFINITY),
            max: DVec2::splat(f64::NEG_INFINITY),
        }
    }
}

impl Moments {
    pub fn add(&mut self, x: u32, y: u32) {
        let (x, y) = (x as f64, y as f64);
        self.count += 1;
        self.sum_x += x;
        self.sum_y += y;
        self.sum_xx += x * x;
        self.sum_yy += y * y;
        self.sum_xy += x * y;
        self.min = self.min.min(DVec2::new(x, y));
        self.max = self.max.max(DVec2::new(x, y));
    }

    pub fn merge(&self, other: &Moments) -> Moments {
        Moments {
            count: self.count + other.count,
            sum_x: self.sum_x + other.sum_x,
            sum_y: self.sum_y + other.sum_y,
            sum_xx: self.sum_xx + other.sum_xx,
            sum_yy: self.sum_yy + other.sum_yy,
            sum_xy: self.sum_xy + other.sum_xy,
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Columns spanned by the bounding box
    pub fn width(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.max.x - self.min.x + 1.0
    }

    pub fn centroid(&self) -> DVec2 {
        DVec2::new(self.sum_x, self.sum_y) / self.count.max(1) as f64
    }

    /// Total least squares fit.
    ///
    /// The direction is the principal axis of the pixel covariance and the
    /// goodness of fit is `1 - λmin / λmax`: near 1 for thin strokes, near 0
    /// for round blobs.
    pub fn fit(&self) -> Option<Line> {
        if self.count < 2 {
            return None;
        }

        let n = self.count as f64;
        let mean = self.centroid();
        let cxx = self.sum_xx / n - mean.x * mean.x;
        let cyy = self.sum_yy / n - mean.y * mean.y;
        let cxy = self.sum_xy / n - mean.x * mean.y;

        let half_trace = (cxx + cyy) / 2.0;
        let spread = (((cxx - cyy) / 2.0).powi(2) + cxy * cxy).sqrt();
        let lambda_max = half_trace + spread;
        let lambda_min = (half_trace - spread).max(0.0);

        if lambda_max <= f64::EPSILON {
            return None;
        }

        let direction = if cxy.abs() > 1e-12 {
            DVec2::new(lambda_max - cyy, cxy).normalize()
        } else if cxx >= cyy {
            DVec2::X
        } else {
            DVec2::Y
        };

        let r2 = 1.0 - lambda_min / lambda_max;

        // Evaluate along the dominant axis so the end points stay on the pixels' extent
        let (a, b) = if direction.y.abs() >= direction.x.abs() {
            let x_at = |y: f64| mean.x + (y - mean.y) * direction.x / direction.y;
            (
                DVec2::new(x_at(self.max.y), self.max.y),
                DVec2::new(x_at(self.min.y), self.min.y),
            )
        } else {
            let y_at = |x: f64| mean.y + (x - mean.x) * direction.y / direction.x;
            (
                DVec2::new(self.min.x, y_at(self.min.x)),
                DVec2::new(self.max.x, y_at(self.max.x)),
            )
        };

        Some(Line::new(a, b, r2))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn moments_of(points: impl IntoIterator<Item = (u32, u32)>) -> Moments {
        let mut moments = Moments::default();
        for (x, y) in points {
            moments.add(x, y);
        }
        moments
    }

    #[test]
    fn vertical_stripe_fits_straight_up() {
        let moments = moments_of((10..14).flat_map(|x| (0..60).map(move |y| (x, y))));
        let line = moments.fit().unwrap();

        assert!((line.start.x - 11.5).abs() < 1e-9);
        assert!((line.end.x - 11.5).abs() < 1e-9);
        assert_eq!(line.start.y, 59.0);
        assert_eq!(line.end.y, 0.0);
        assert!(line.r2 > 0.99);
        assert!(line.angle_from_vertical() < 1e-6);
    }

    #[test]
    fn slanted_stroke_follows_slope() {
        // x = 5 + y / 2
        let moments = moments_of((0..80).map(|y| (5 + y / 2, y)));
        let line = moments.fit().unwrap();

        assert!((line.x_at(40.0) - 25.0).abs() < 1.0);
        assert!((line.angle_from_vertical() - 26.565).abs() < 1.0);
        assert!(line.r2 > 0.99);
    }

    #[test]
    fn square_blob_is_not_a_line() {
        let moments = moments_of((0..20).flat_map(|x| (0..20).map(move |y| (x, y))));
        let line = moments.fit().unwrap();
        assert!(line.r2 < 0.05);
    }

    #[test]
    fn pooled_segments_refit_as_one() {
        let top = moments_of((30..33).flat_map(|x| (0..20).map(move |y| (x, y))));
        let bottom = moments_of((30..33).flat_map(|x| (40..60).map(move |y| (x, y))));
        let line = top.merge(&bottom).fit().unwrap();

        assert_eq!(line.start.y, 59.0);
        assert_eq!(line.end.y, 0.0);
        assert!((line.x_at(30.0) - 31.0).abs() < 1e-9);
    }

    #[test]
    fn single_pixel_has_no_line() {
        assert!(moments_of([(3, 3)]).fit().is_none());
    }

    #[test]
    fn average_pairs_near_and_far_ends() {
        let left = Line::new(DVec2::new(10.0, 100.0), DVec2::new(20.0, 0.0), 0.9);
        let right = Line::new(DVec2::new(50.0, 0.0), DVec2::new(60.0, 100.0), 0.95);
        let center = Line::average(&left, &right);

        assert_eq!(center.start, DVec2::new(35.0, 100.0));
        assert_eq!(center.end, DVec2::new(35.0, 0.0));
        assert_eq!(center.r2, 0.9);
    }
}
