use std::time::Instant;

use common::controller::CameraSide;
use image::RgbImage;

/// One captured image, tagged with the camera it came from
#[derive(Clone, Debug)]
pub struct Frame {
    pub image: RgbImage,
    pub side: CameraSide,
    pub captured_at: Instant,
}

impl Frame {
    pub fn new(image: RgbImage, side: CameraSide) -> Self {
        Frame {
            image,
            side,
            captured_at: Instant::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn is_empty(&self) -> bool {
        self.image.width() == 0 || self.image.height() == 0
    }
}
